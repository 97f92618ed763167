use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Why a report is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskReportReason {
    Started,
    Finished,
    Errored,
    HealthCheck,
}

impl TaskReportReason {
    /// Wire spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Errored => "ERRORED",
            Self::HealthCheck => "HEALTH_CHECK",
        }
    }

    /// Human label used in log lines and error messages
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::HealthCheck => "health status",
        }
    }
}

impl fmt::Display for TaskReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event sent to the backend
///
/// Built fresh for every call and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: String,
    pub reason: TaskReportReason,
    /// Epoch milliseconds at send time
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskReport {
    /// A report stamped with the current time
    #[must_use]
    pub fn now(task_id: impl Into<String>, reason: TaskReportReason, data: Option<Value>) -> Self {
        Self {
            task_id: task_id.into(),
            reason,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// Structured wrapper around a fatal error for post-mortem reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub service_code: String,
    pub retryable: bool,
    pub data: Value,
    pub message: String,
}

impl ErrorEnvelope {
    /// Envelope for a crash: status 500, never retryable
    #[must_use]
    pub fn crash(error: &anyhow::Error, service_code: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            service_code: service_code.into(),
            retryable: false,
            data: error_data(error),
            message: error.to_string(),
        }
    }
}

/// `{"message", "causes"}` from an error and its source chain
#[must_use]
pub fn error_data(error: &anyhow::Error) -> Value {
    let causes: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    json!({
        "message": error.to_string(),
        "causes": causes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(TaskReportReason::HealthCheck).unwrap(),
            json!("HEALTH_CHECK")
        );
        for reason in [
            TaskReportReason::Started,
            TaskReportReason::Finished,
            TaskReportReason::Errored,
            TaskReportReason::HealthCheck,
        ] {
            assert_eq!(serde_json::to_value(reason).unwrap(), json!(reason.as_str()));
        }
    }

    #[test]
    fn test_report_wire_shape_without_data() {
        let report = TaskReport {
            task_id: "t-42".into(),
            reason: TaskReportReason::Started,
            timestamp: 1_700_000_000_000,
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({ "taskId": "t-42", "reason": "STARTED", "timestamp": 1_700_000_000_000_i64 })
        );
    }

    #[test]
    fn test_report_now_uses_current_time() {
        let before = chrono::Utc::now().timestamp_millis();
        let report = TaskReport::now("t-1", TaskReportReason::Finished, None);
        let after = chrono::Utc::now().timestamp_millis();
        assert!(report.timestamp >= before && report.timestamp <= after);
    }

    #[test]
    fn test_crash_envelope() {
        let error = Err::<(), _>(std::io::Error::other("disk full"))
            .context("write site files")
            .unwrap_err();
        let envelope = ErrorEnvelope::crash(&error, "WORKER");

        assert_eq!(envelope.status_code, 500);
        assert!(!envelope.retryable);
        assert_eq!(envelope.message, "write site files");
        assert_eq!(
            envelope.data,
            json!({ "message": "write site files", "causes": ["disk full"] })
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap()["serviceCode"],
            json!("WORKER")
        );
    }
}
