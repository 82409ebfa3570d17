//! The fault data model.
//!
//! ## Contents
//! - [`FaultSpec`] and the per-kind spec structs
//! - [`FaultInstance`] / [`Meta`] / [`Finalizers`] — one experiment
//! - [`FaultStatus`] / [`Phase`] / [`Conditions`] — observed state
//! - [`SchedulerSpec`] — recurrence rules for the scheduled path
//! - [`EmbedFault`] — the embeddable "one of N specs" container

mod embed;
mod instance;
mod scheduler;
mod spec;
mod status;

pub use embed::EmbedFault;
pub use instance::{FaultInstance, Finalizers, InstanceKey, Meta, ANNOTATION_PAUSE};
pub use scheduler::SchedulerSpec;
pub use spec::{
    ContainerKillSpec, Direction, DnsFaultSpec, FaultSpec, IoDelaySpec, KernelFaultSpec,
    NetworkDelaySpec, NetworkPartitionSpec, PodFailureSpec, PodKillSpec, StressCpuSpec,
    TimeSkewSpec,
};
pub use status::{Conditions, ExperimentWindow, FaultStatus, Phase, ScheduleStatus};
