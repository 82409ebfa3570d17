//! Fault instance status: conditions, phase, bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse lifecycle phase of a fault instance.
///
/// One-shot instances move `Initializing → Selecting → Injecting →
/// Running|Holding → Finished`; scheduled instances alternate between
/// `Running` and `Waiting`. `Paused` is entered from any non-terminal
/// phase when the pause annotation is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Nothing has happened yet.
    #[default]
    Initializing,
    /// Target selection in progress.
    Selecting,
    /// Injection RPCs dispatched, not all confirmed.
    Injecting,
    /// All targets injected; the fault completes without a hold window.
    Running,
    /// All targets injected; waiting for the duration to elapse.
    Holding,
    /// Scheduled instance between cycles: recovered, waiting for the
    /// next start time.
    Waiting,
    /// Paused by annotation; injected state has been recovered.
    Paused,
    /// Terminal: duration elapsed or instance recovered and deleted.
    Finished,
}

impl Phase {
    /// Terminal phases are never reconciled again by time.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished)
    }
}

/// Observed facts about the experiment, set by the reconcilers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// Targets were resolved at least once.
    pub selected: bool,
    /// Every selected target acknowledged injection.
    pub all_injected: bool,
    /// The pause overlay is in effect.
    pub paused: bool,
}

/// Wall-clock window of the current (or last) injection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Schedule bookkeeping for the scheduled (two-phase) path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// Next time a cycle starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_start: Option<DateTime<Utc>>,
    /// When the current cycle must be recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_recover: Option<DateTime<Utc>>,
}

/// Full status of a fault instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultStatus {
    pub phase: Phase,
    pub conditions: Conditions,
    /// Last reconcile failure, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_message: Option<String>,
    #[serde(default)]
    pub experiment: ExperimentWindow,
    #[serde(default)]
    pub schedule: ScheduleStatus,
}
