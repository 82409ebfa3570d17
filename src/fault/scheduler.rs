//! Recurrence rules for scheduled fault instances.
//!
//! [`SchedulerSpec`] accepts two forms:
//! - `"@every <duration>"` — fixed interval, e.g. `"@every 1m"`;
//! - a standard cron expression, e.g. `"0 0 3 * * *"`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Recurrence rule of a scheduled fault instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerSpec {
    pub cron: String,
}

impl SchedulerSpec {
    pub fn new(expr: impl Into<String>) -> Self {
        Self { cron: expr.into() }
    }

    /// The first fire time strictly after `now`.
    pub fn next_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SpecError> {
        if let Some(interval) = self.cron.strip_prefix("@every ") {
            let every = humantime::parse_duration(interval.trim()).map_err(|e| SpecError::Parse {
                field: "scheduler",
                message: format!("bad @every interval {interval:?}: {e}"),
            })?;
            let every = chrono::Duration::from_std(every).map_err(|e| SpecError::Parse {
                field: "scheduler",
                message: format!("@every interval out of range: {e}"),
            })?;
            return Ok(now + every);
        }

        let schedule = Schedule::from_str(&self.cron).map_err(|e| SpecError::Parse {
            field: "scheduler",
            message: format!("bad cron expression {:?}: {e}", self.cron),
        })?;
        schedule.after(&now).next().ok_or_else(|| SpecError::Parse {
            field: "scheduler",
            message: format!("cron expression {:?} has no upcoming fire time", self.cron),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn every_interval_advances_by_the_interval() {
        let spec = SchedulerSpec::new("@every 1m");
        let next = spec.next_time(at(1_000)).unwrap();
        assert_eq!(next, at(1_060));
    }

    #[test]
    fn cron_expression_fires_at_the_next_match() {
        // Every hour on the hour (sec min hour dom month dow).
        let spec = SchedulerSpec::new("0 0 * * * *");
        let next = spec.next_time(at(10)).unwrap();
        assert_eq!(next, at(3_600));
    }

    #[test]
    fn malformed_expressions_are_parse_errors() {
        for bad in ["@every soon", "not cron at all", "@every "] {
            let err = SchedulerSpec::new(bad).next_time(at(0)).unwrap_err();
            assert!(
                matches!(err, SpecError::Parse { field: "scheduler", .. }),
                "{bad:?}"
            );
        }
    }
}
