use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a run and of each of its tasks.
///
/// `Unstarted → InProgress → Pending* → InProgress → {Completed, Errored}`.
/// The `Pending*` statuses are suspension points, `Completed` and `Errored`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Unstarted,
    InProgress,
    /// Waiting for a transaction to reach safe depth. Resumed by new blocks.
    PendingConfirmations,
    /// Waiting for the chain connection. Resumed on reconnect.
    PendingConnection,
    /// Waiting for a wall-clock deadline.
    PendingSleep,
    Completed,
    Errored,
}

impl RunStatus {
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RunStatus::PendingConfirmations | RunStatus::PendingConnection | RunStatus::PendingSleep
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Errored)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Unstarted => "unstarted",
            RunStatus::InProgress => "in_progress",
            RunStatus::PendingConfirmations => "pending_confirmations",
            RunStatus::PendingConnection => "pending_connection",
            RunStatus::PendingSleep => "pending_sleep",
            RunStatus::Completed => "completed",
            RunStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// The value threaded through a run's pipeline.
///
/// Adapters receive it by value and hand back the next one; only the state
/// machine commits it to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub data: Map<String, Value>,
    pub status: RunStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Deadline of a `PendingSleep` suspension.
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,
}

impl RunResult {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            status: RunStatus::Unstarted,
            error_message: None,
            resume_at: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The `value` field as text. Numbers and booleans are rendered, other shapes yield `None`.
    pub fn value(&self) -> Option<String> {
        match self.data.get("value")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn with_value(self, value: impl Into<Value>) -> Self {
        self.add("value", value)
    }

    pub fn add(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Marks the result errored. Accumulated data is kept for diagnostics.
    pub fn with_error(mut self, err: impl fmt::Display) -> Self {
        self.status = RunStatus::Errored;
        self.error_message = Some(err.to_string());
        self
    }

    pub fn completed(mut self) -> Self {
        self.status = RunStatus::Completed;
        self.resume_at = None;
        self
    }

    pub fn mark_pending_confirmations(mut self) -> Self {
        self.status = RunStatus::PendingConfirmations;
        self
    }

    pub fn mark_pending_connection(mut self) -> Self {
        self.status = RunStatus::PendingConnection;
        self
    }

    pub fn mark_pending_sleep(mut self, until: DateTime<Utc>) -> Self {
        self.status = RunStatus::PendingSleep;
        self.resume_at = Some(until);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_renders_scalars() {
        let result = RunResult::new(Map::new()).with_value("0xabc");
        assert_eq!(result.value().as_deref(), Some("0xabc"));
        let result = RunResult::new(Map::new()).with_value(42);
        assert_eq!(result.value().as_deref(), Some("42"));
        let result = RunResult::new(Map::new()).with_value(json!({"a": 1}));
        assert_eq!(result.value(), None);
    }

    #[test]
    fn error_keeps_accumulated_data() {
        let result = RunResult::new(Map::new())
            .add("url", "http://x")
            .with_error("boom");
        assert_eq!(result.status, RunStatus::Errored);
        assert_eq!(result.error_message.as_deref(), Some("boom"));
        assert_eq!(result.get("url"), Some(&json!("http://x")));
    }

    #[test]
    fn pending_and_terminal_are_disjoint() {
        let all = [
            RunStatus::Unstarted,
            RunStatus::InProgress,
            RunStatus::PendingConfirmations,
            RunStatus::PendingConnection,
            RunStatus::PendingSleep,
            RunStatus::Completed,
            RunStatus::Errored,
        ];
        for status in all {
            assert!(!(status.is_pending() && status.is_terminal()), "{status}");
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::PendingConfirmations).unwrap();
        assert_eq!(json, "\"pending_confirmations\"");
    }
}
