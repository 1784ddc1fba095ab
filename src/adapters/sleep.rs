use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Adapter, AdapterContext, from_params};
use crate::error::AdapterError;
use crate::state_machine::{RunResult, RunStatus};

/// A point in time given either as unix seconds or as an RFC 3339 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnyTime {
    Unix(i64),
    Text(String),
}

impl AnyTime {
    fn resolve(&self) -> Result<DateTime<Utc>, AdapterError> {
        let invalid = |reason: String| AdapterError::InvalidParams {
            adapter: "sleep",
            reason,
        };
        match self {
            AnyTime::Unix(secs) => DateTime::from_timestamp(*secs, 0)
                .ok_or_else(|| invalid(format!("timestamp {secs} out of range"))),
            AnyTime::Text(text) => {
                if let Ok(secs) = text.parse::<i64>() {
                    return AnyTime::Unix(secs).resolve();
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| invalid(format!("until {text:?}: {e}")))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    #[serde(default)]
    until: Option<AnyTime>,
    #[serde(default)]
    seconds: Option<u64>,
}

/// Suspends the run until a wall-clock deadline. Never waits itself: it
/// reports `PendingSleep` and the deadline, and the runner schedules the wake-up.
#[derive(Debug, Clone, PartialEq)]
pub enum Sleep {
    Until(DateTime<Utc>),
    /// Relative to the first invocation.
    For(Duration),
}

impl Sleep {
    pub fn factory(params: &Map<String, Value>) -> Result<Box<dyn Adapter>, AdapterError> {
        Ok(Box::new(Self::from_params(params)?))
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, AdapterError> {
        let raw: SleepParams = from_params("sleep", params)?;
        match (raw.until, raw.seconds) {
            (Some(until), _) => Ok(Sleep::Until(until.resolve()?)),
            (None, Some(secs)) => Ok(Sleep::For(Duration::from_secs(secs))),
            (None, None) => Err(AdapterError::InvalidParams {
                adapter: "sleep",
                reason: "one of `until` or `seconds` is required".into(),
            }),
        }
    }

    /// Deadline when first invoked at `now`.
    pub fn target(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Sleep::Until(at) => *at,
            Sleep::For(d) => TimeDelta::from_std(*d)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Time left until the deadline, clamped to zero.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        duration_until(self.target(now), now)
    }
}

pub fn duration_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl Adapter for Sleep {
    async fn perform(&self, input: RunResult, ctx: &AdapterContext) -> RunResult {
        let deadline = match (input.status, input.resume_at) {
            (RunStatus::PendingSleep, Some(at)) => at,
            _ => self.target(ctx.now),
        };
        if duration_until(deadline, ctx.now).is_zero() {
            input.completed()
        } else {
            input.mark_pending_sleep(deadline)
        }
    }
}
