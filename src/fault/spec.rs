//! Kind-specific fault specifications.
//!
//! [`FaultSpec`] is the tagged union over every kind's parameters. It is
//! a proper enum with payload — consumers match exhaustively on it, and
//! an unset payload is unrepresentable. Each variant carries a
//! [`Selector`] describing which targets the fault acts on, plus the
//! kind's own knobs.

use serde::{Deserialize, Serialize};

use crate::kinds::Kind;
use crate::target::Selector;

/// Kills selected pods, optionally with a grace period.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PodKillSpec {
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<u64>,
}

/// Replaces selected pods' images with a non-functional placeholder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PodFailureSpec {
    pub selector: Selector,
}

/// Kills named containers inside selected pods.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerKillSpec {
    pub selector: Selector,
    pub container_names: Vec<String>,
}

/// Traffic direction a network fault applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    To,
    From,
    Both,
}

/// Cuts connectivity between selected pods and their peers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPartitionSpec {
    pub selector: Selector,
    #[serde(default)]
    pub direction: Direction,
    /// Peer selector; empty means everything outside the selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Selector>,
}

/// Adds latency to selected pods' egress traffic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDelaySpec {
    pub selector: Selector,
    /// Added latency, e.g. `"250ms"`.
    pub latency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

/// Delays filesystem operations under a volume path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IoDelaySpec {
    pub selector: Selector,
    pub volume_path: String,
    /// Added delay per operation, e.g. `"100ms"`.
    pub delay: String,
    /// Percentage of operations affected (0–100).
    #[serde(default)]
    pub percent: u32,
}

/// Skews the clock observed by selected processes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSkewSpec {
    pub selector: Selector,
    /// Signed offset, e.g. `"-5m"`.
    pub time_offset: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clock_ids: Vec<String>,
}

/// Injects failures into kernel request paths.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelFaultSpec {
    pub selector: Selector,
    /// Which kernel callsite to fail, e.g. `"should_failslab"`.
    pub fail_kern_request: String,
}

/// Burns CPU on selected targets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StressCpuSpec {
    pub selector: Selector,
    pub workers: u32,
    /// Load percentage per worker (0–100).
    pub load: u32,
}

/// Rewrites DNS answers for matching names.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsFaultSpec {
    pub selector: Selector,
    /// Name patterns to hijack, e.g. `"*.internal"`.
    pub patterns: Vec<String>,
    /// Answer with errors instead of random addresses.
    #[serde(default)]
    pub error_responses: bool,
}

/// One fault specification, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FaultSpec {
    PodKill(PodKillSpec),
    PodFailure(PodFailureSpec),
    ContainerKill(ContainerKillSpec),
    NetworkPartition(NetworkPartitionSpec),
    NetworkDelay(NetworkDelaySpec),
    IoDelay(IoDelaySpec),
    TimeSkew(TimeSkewSpec),
    KernelFault(KernelFaultSpec),
    StressCpu(StressCpuSpec),
    DnsFault(DnsFaultSpec),
}

impl FaultSpec {
    /// The kind this spec belongs to.
    pub fn kind(&self) -> Kind {
        match self {
            FaultSpec::PodKill(_) => Kind::PodKill,
            FaultSpec::PodFailure(_) => Kind::PodFailure,
            FaultSpec::ContainerKill(_) => Kind::ContainerKill,
            FaultSpec::NetworkPartition(_) => Kind::NetworkPartition,
            FaultSpec::NetworkDelay(_) => Kind::NetworkDelay,
            FaultSpec::IoDelay(_) => Kind::IoDelay,
            FaultSpec::TimeSkew(_) => Kind::TimeSkew,
            FaultSpec::KernelFault(_) => Kind::KernelFault,
            FaultSpec::StressCpu(_) => Kind::StressCpu,
            FaultSpec::DnsFault(_) => Kind::DnsFault,
        }
    }

    /// The target selector of this spec.
    pub fn selector(&self) -> &Selector {
        match self {
            FaultSpec::PodKill(s) => &s.selector,
            FaultSpec::PodFailure(s) => &s.selector,
            FaultSpec::ContainerKill(s) => &s.selector,
            FaultSpec::NetworkPartition(s) => &s.selector,
            FaultSpec::NetworkDelay(s) => &s.selector,
            FaultSpec::IoDelay(s) => &s.selector,
            FaultSpec::TimeSkew(s) => &s.selector,
            FaultSpec::KernelFault(s) => &s.selector,
            FaultSpec::StressCpu(s) => &s.selector,
            FaultSpec::DnsFault(s) => &s.selector,
        }
    }

    /// A zero-valued spec of the given kind, used as registry prototype.
    pub fn prototype(kind: Kind) -> FaultSpec {
        match kind {
            Kind::PodKill => FaultSpec::PodKill(PodKillSpec::default()),
            Kind::PodFailure => FaultSpec::PodFailure(PodFailureSpec::default()),
            Kind::ContainerKill => FaultSpec::ContainerKill(ContainerKillSpec::default()),
            Kind::NetworkPartition => FaultSpec::NetworkPartition(NetworkPartitionSpec::default()),
            Kind::NetworkDelay => FaultSpec::NetworkDelay(NetworkDelaySpec::default()),
            Kind::IoDelay => FaultSpec::IoDelay(IoDelaySpec::default()),
            Kind::TimeSkew => FaultSpec::TimeSkew(TimeSkewSpec::default()),
            Kind::KernelFault => FaultSpec::KernelFault(KernelFaultSpec::default()),
            Kind::StressCpu => FaultSpec::StressCpu(StressCpuSpec::default()),
            Kind::DnsFault => FaultSpec::DnsFault(DnsFaultSpec::default()),
        }
    }
}
