//! The kind discriminant.
//!
//! [`Kind`] names each fault type the engine ships with. The wire names
//! (lower-case, dash-separated) are what external layers — workflow and
//! schedule templates, the dashboard — use as tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Discriminant identifying one of the fault types known to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    PodKill,
    PodFailure,
    ContainerKill,
    NetworkPartition,
    NetworkDelay,
    IoDelay,
    TimeSkew,
    KernelFault,
    StressCpu,
    DnsFault,
}

impl Kind {
    /// Stable wire name of the kind.
    pub const fn name(self) -> &'static str {
        match self {
            Kind::PodKill => "pod-kill",
            Kind::PodFailure => "pod-failure",
            Kind::ContainerKill => "container-kill",
            Kind::NetworkPartition => "network-partition",
            Kind::NetworkDelay => "network-delay",
            Kind::IoDelay => "io-delay",
            Kind::TimeSkew => "time-skew",
            Kind::KernelFault => "kernel-fault",
            Kind::StressCpu => "stress-cpu",
            Kind::DnsFault => "dns-fault",
        }
    }

    /// Every kind, in registration order.
    pub const fn all() -> [Kind; 10] {
        [
            Kind::PodKill,
            Kind::PodFailure,
            Kind::ContainerKill,
            Kind::NetworkPartition,
            Kind::NetworkDelay,
            Kind::IoDelay,
            Kind::TimeSkew,
            Kind::KernelFault,
            Kind::StressCpu,
            Kind::DnsFault,
        ]
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::all()
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| SpecError::InvalidTemplateType { tag: s.to_string() })
    }
}
