// Allow module inception - this is a common Rust pattern for protocol clients
#![allow(clippy::module_name_repetitions)]

use crate::api::BackendApi;
use crate::error::{WorkerError, WorkerResult};
use crate::identity::Identity;
use crate::report::{TaskReport, TaskReportReason};
use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

const CONTEXT: &str = "BackendTaskClient";

/// HTTP method used for lifecycle reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMethod {
    Post,
    #[default]
    Patch,
}

impl From<ReportMethod> for Method {
    fn from(method: ReportMethod) -> Self {
        match method {
            ReportMethod::Post => Method::Post,
            ReportMethod::Patch => Method::Patch,
        }
    }
}

impl FromStr for ReportMethod {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PATCH" => Ok(Self::Patch),
            other => Err(WorkerError::InvalidConfig(format!(
                "Unsupported report method: {other}"
            ))),
        }
    }
}

/// Outcome of a report whose failure must not reach the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Delivered,
    Failed(String),
}

impl BestEffort {
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Talks to the backend about one task
///
/// Fetches the task descriptor and sends lifecycle reports. No ordering of
/// reports is enforced here and nothing is retried: every call is one
/// request, and a failure comes back annotated with what was being done.
///
/// Clone is cheap; the transport is shared.
#[derive(Clone)]
pub struct BackendTaskClient {
    transport: Arc<dyn Transport>,
    api: BackendApi,
    task_id: String,
    debug: bool,
    report_method: ReportMethod,
}

impl BackendTaskClient {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, identity: &Identity) -> Self {
        Self {
            transport,
            api: BackendApi::new(identity),
            task_id: identity.task_id.clone(),
            debug: false,
            report_method: ReportMethod::default(),
        }
    }

    /// Log every report request (method, URL, body) at DEBUG
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_report_method(mut self, method: ReportMethod) -> Self {
        self.report_method = method;
        self
    }

    #[must_use]
    pub fn api(&self) -> &BackendApi {
        &self.api
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Fetch the task descriptor
    ///
    /// # Errors
    ///
    /// Fails with `FetchFailed` wrapping the cause: a transport error, an
    /// error status, a missing or empty `data` field (`NoTaskPayload`), or a
    /// payload that does not deserialize into `T`
    pub async fn fetch_task<T: DeserializeOwned>(&self) -> WorkerResult<T> {
        info!(context = CONTEXT, "Getting new task config from backend");

        let data = self.fetch_data().await.map_err(WorkerError::fetch)?;
        serde_json::from_value(data).map_err(|e| WorkerError::fetch(e.into()))
    }

    async fn fetch_data(&self) -> WorkerResult<Value> {
        let request = TransportRequest::new(Method::Get, self.api.task_fetch_url())
            .header("Authorization", self.api.authorization_header());
        let response = self.send(request).await?;

        match response.body {
            Value::Object(mut body) => body
                .remove("data")
                .filter(|data| !is_empty_payload(data))
                .ok_or(WorkerError::NoTaskPayload),
            _ => Err(WorkerError::NoTaskPayload),
        }
    }

    /// Report that task execution has begun
    ///
    /// # Errors
    ///
    /// Returns `ReportFailed` if the request fails
    pub async fn report_started(&self) -> WorkerResult<()> {
        self.report(TaskReportReason::Started, None).await
    }

    /// Report successful completion
    ///
    /// # Errors
    ///
    /// Returns `ReportFailed` if the request fails
    pub async fn report_finished(&self) -> WorkerResult<()> {
        self.report(TaskReportReason::Finished, None).await
    }

    /// Send a liveness signal; not a state transition
    ///
    /// # Errors
    ///
    /// Returns `ReportFailed` if the request fails
    pub async fn report_health_status(&self) -> WorkerResult<()> {
        self.report(TaskReportReason::HealthCheck, None).await
    }

    /// Report failure with `data` attached, typically an `ErrorEnvelope`
    ///
    /// # Errors
    ///
    /// Returns `ReportFailed` if `data` does not serialize or the request fails
    pub async fn report_errored<D: Serialize + ?Sized>(&self, data: &D) -> WorkerResult<()> {
        let reason = TaskReportReason::Errored;
        let data =
            serde_json::to_value(data).map_err(|e| WorkerError::report(reason.label(), e.into()))?;
        self.report(reason, Some(data)).await
    }

    /// `report_errored` that logs its failure instead of returning it
    pub async fn try_report_errored(&self, data: Value) -> BestEffort {
        match self.report_errored(&data).await {
            Ok(()) => BestEffort::Delivered,
            Err(e) => {
                error!(context = CONTEXT, "{e}");
                BestEffort::Failed(e.to_string())
            }
        }
    }

    async fn report(&self, reason: TaskReportReason, data: Option<Value>) -> WorkerResult<()> {
        let label = reason.label();
        debug!(context = CONTEXT, "Reporting worker task {} to backend", label);

        let report = TaskReport::now(self.task_id.as_str(), reason, data);
        let response = self
            .send_report(&report)
            .await
            .map_err(|e| WorkerError::report(label, e))?;

        info!(
            context = CONTEXT,
            "Report worker task {} to backend {}", label, response.status_code
        );
        Ok(())
    }

    async fn send_report(&self, report: &TaskReport) -> WorkerResult<TransportResponse> {
        let body = serde_json::to_value(report)?;
        let method = Method::from(self.report_method);
        let url = self.api.task_report_url();

        if self.debug {
            debug!(context = CONTEXT, "Request {} to {} send {}", method, url, body);
        }

        let request = TransportRequest::new(method, url)
            .header("Authorization", self.api.authorization_header())
            .json(body);
        self.send(request).await
    }

    /// One request; error statuses become errors
    async fn send(&self, request: TransportRequest) -> WorkerResult<TransportResponse> {
        let response = self.transport.request(request).await?;
        if response.status_code >= 400 {
            return Err(TransportError::Status {
                status: response.status_code,
                message: status_message(&response),
            }
            .into());
        }
        Ok(response)
    }
}

impl std::fmt::Debug for BackendTaskClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTaskClient")
            .field("api", &self.api)
            .field("task_id", &self.task_id)
            .field("debug", &self.debug)
            .field("report_method", &self.report_method)
            .finish_non_exhaustive()
    }
}

/// Missing-ish payloads: null, false, zero, empty string, empty container
fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn status_message(response: &TransportResponse) -> String {
    response
        .body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            reqwest::StatusCode::from_u16(response.status_code)
                .ok()
                .and_then(|status| status.canonical_reason())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "request failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::capture;
    use crate::report::ErrorEnvelope;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::error::Error as _;
    use tokio_test::{assert_err, assert_ok};

    const FETCH_URL: &str = "http://api.test/v1/pipelines/worker-tasks/t-42";
    const REPORT_URL: &str = "http://api.test/v1/pipelines/worker-tasks/t-42/reports";
    const AUTH: &str = "Basic dzE6czNjcjN0";

    fn identity() -> Identity {
        Identity::new("w1", "s3cr3t", "http://api.test", "t-42")
    }

    fn client(transport: MockTransport) -> BackendTaskClient {
        BackendTaskClient::new(Arc::new(transport), &identity())
    }

    fn answering(status: u16, body: Value) -> MockTransport {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .returning(move |_| Ok(TransportResponse::new(status, body.clone())));
        transport
    }

    #[tokio::test]
    async fn test_fetch_task_returns_data() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|req| {
                req.method == Method::Get
                    && req.url == FETCH_URL
                    && req.header_value("Authorization") == Some(AUTH)
                    && req.body.is_none()
            })
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, json!({ "data": { "foo": 1 } }))));

        let task: Value = client(transport).fetch_task().await.unwrap();
        assert_eq!(task, json!({ "foo": 1 }));
    }

    #[tokio::test]
    async fn test_fetch_task_deserializes_typed_payload() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Descriptor {
            foo: u32,
        }

        let task: Descriptor = client(answering(200, json!({ "data": { "foo": 7 } })))
            .fetch_task()
            .await
            .unwrap();
        assert_eq!(task, Descriptor { foo: 7 });
    }

    #[tokio::test]
    async fn test_fetch_task_without_data_fails() {
        for body in [json!({}), json!({ "data": null }), json!({ "data": {} }), json!("text")] {
            let err = client(answering(200, body))
                .fetch_task::<Value>()
                .await
                .unwrap_err();
            let message = err.to_string();
            assert!(message.starts_with("Get task config from backend failed, "));
            assert!(message.contains("Can not get task config from backend"));
        }
    }

    #[tokio::test]
    async fn test_fetch_task_transport_error_is_annotated() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Err(TransportError::Request("connection refused".into())));

        let err = client(transport).fetch_task::<Value>().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Get task config from backend failed, Transport error: connection refused"
        );
        let cause = err.source().map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("Transport error: connection refused"));
    }

    #[tokio::test]
    async fn test_fetch_task_error_status_fails() {
        let err = client(answering(401, Value::Null))
            .fetch_task::<Value>()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 401: Unauthorized"));
    }

    #[tokio::test]
    async fn test_report_started_sends_patch_with_report_body() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|req| {
                let body = req.body.clone().unwrap_or_default();
                req.method == Method::Patch
                    && req.url == REPORT_URL
                    && req.header_value("Authorization") == Some(AUTH)
                    && body["taskId"] == "t-42"
                    && body["reason"] == "STARTED"
                    && body["timestamp"].is_i64()
                    && body.get("data").is_none()
            })
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, Value::Null)));

        assert_ok!(client(transport).report_started().await);
    }

    #[tokio::test]
    async fn test_report_methods_use_matching_reasons() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        for reason in ["FINISHED", "HEALTH_CHECK"] {
            transport
                .expect_request()
                .withf(move |req| req.body.as_ref().is_some_and(|b| b["reason"] == reason))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(TransportResponse::new(201, Value::Null)));
        }

        let client = client(transport);
        assert_ok!(client.report_finished().await);
        assert_ok!(client.report_health_status().await);
    }

    #[tokio::test]
    async fn test_report_errored_carries_data_and_timestamp() {
        let envelope = ErrorEnvelope {
            status_code: 500,
            service_code: "WORKER".into(),
            retryable: false,
            data: json!({ "message": "boom", "causes": [] }),
            message: "boom".into(),
        };
        let expected = serde_json::to_value(&envelope).unwrap();
        let before = chrono::Utc::now().timestamp_millis();

        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(move |req| {
                let body = req.body.clone().unwrap_or_default();
                let timestamp = body["timestamp"].as_i64().unwrap_or_default();
                body["reason"] == "ERRORED"
                    && body["data"] == expected
                    && timestamp >= before
                    && timestamp <= chrono::Utc::now().timestamp_millis()
            })
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, Value::Null)));

        assert_ok!(client(transport).report_errored(&envelope).await);
    }

    #[tokio::test]
    async fn test_report_failure_is_annotated_and_not_retried() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .times(1)
            .returning(|_| Err(TransportError::Request("timeout".into())));

        let err = assert_err!(client(transport).report_health_status().await);
        assert_eq!(
            err.to_string(),
            "Report worker task health status failed, Transport error: timeout"
        );
    }

    #[tokio::test]
    async fn test_report_error_status_uses_body_message() {
        let err = client(answering(422, json!({ "message": "invalid transition" })))
            .report_finished()
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Report worker task finished failed, Transport error: HTTP 422: invalid transition"
        );
    }

    #[tokio::test]
    async fn test_post_report_method() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|req| req.method == Method::Post)
            .times(1)
            .returning(|_| Ok(TransportResponse::new(200, Value::Null)));

        let client = client(transport).with_report_method(ReportMethod::Post);
        assert_ok!(client.report_started().await);
    }

    #[tokio::test]
    async fn test_try_report_errored_swallows_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .returning(|_| Err(TransportError::Request("down".into())));

        let outcome = client(transport).try_report_errored(json!("boom")).await;
        assert_eq!(
            outcome,
            BestEffort::Failed("Report worker task errored failed, Transport error: down".into())
        );
        assert!(!outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_report_logs_status_and_debug_dump() {
        let (logs, _guard) = capture();
        let client = client(answering(200, Value::Null)).with_debug(true);
        client.report_started().await.unwrap();

        let logs = logs.contents();
        assert!(logs.contains("Reporting worker task started to backend"));
        assert!(logs.contains("Report worker task started to backend 200"));
        assert!(logs.contains(&format!("Request PATCH to {REPORT_URL} send {{")));
        assert!(logs.contains("context=\"BackendTaskClient\""));
        assert!(!logs.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_request_dump_requires_debug_flag() {
        let (logs, _guard) = capture();
        client(answering(200, Value::Null))
            .report_finished()
            .await
            .unwrap();

        let logs = logs.contents();
        assert!(logs.contains("Report worker task finished to backend 200"));
        assert!(!logs.contains("Request PATCH"));
    }

    #[test]
    fn test_report_method_from_str() {
        assert_eq!("post".parse::<ReportMethod>().unwrap(), ReportMethod::Post);
        assert_eq!("PATCH".parse::<ReportMethod>().unwrap(), ReportMethod::Patch);
        assert!("GET".parse::<ReportMethod>().is_err());
    }

    #[test]
    fn test_empty_payload_detection() {
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!("")));
        assert!(is_empty_payload(&json!(0)));
        assert!(is_empty_payload(&json!(false)));
        assert!(is_empty_payload(&json!([])));
        assert!(!is_empty_payload(&json!({ "foo": 1 })));
        assert!(!is_empty_payload(&json!("task")));
    }
}
