use crate::client::{BackendTaskClient, BestEffort};
use crate::logging::LogHandle;
use crate::report::ErrorEnvelope;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const CONTEXT: &str = "CrashReporter";

/// Service identifier used when none is configured
pub const DEFAULT_SERVICE_CODE: &str = "WORKER";

/// Ends the hosting process
#[cfg_attr(test, mockall::automock)]
pub trait Shutdown: Send + Sync {
    fn terminate(&self, exit_code: i32);
}

/// Exits the real process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Shutdown for ProcessExit {
    fn terminate(&self, exit_code: i32) {
        std::process::exit(exit_code);
    }
}

/// What `on_exit` did
#[derive(Debug)]
pub struct ExitOutcome {
    pub exit_code: i32,
    /// The crash report still in flight, if one was sent
    pub report: Option<JoinHandle<BestEffort>>,
}

/// Last words of a worker process
///
/// On a fatal error the error is wrapped in an `ErrorEnvelope` and reported
/// as ERRORED without awaiting the outcome; the report's own failure is only
/// logged. Either way the log directory is announced, logs are flushed, and
/// only then is the process terminated.
pub struct CrashReporter {
    client: BackendTaskClient,
    shutdown: Arc<dyn Shutdown>,
    logs: LogHandle,
    service_code: String,
    grace: Duration,
}

impl CrashReporter {
    #[must_use]
    pub fn new(client: BackendTaskClient, shutdown: Arc<dyn Shutdown>, logs: LogHandle) -> Self {
        Self {
            client,
            shutdown,
            logs,
            service_code: DEFAULT_SERVICE_CODE.to_string(),
            grace: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_service_code(mut self, service_code: impl Into<String>) -> Self {
        self.service_code = service_code.into();
        self
    }

    /// Upper bound on how long the exit path lingers for the crash report
    ///
    /// Zero, the default, does not wait at all. Waiting blocks the calling
    /// thread, so the report only progresses meanwhile on a multi-threaded
    /// runtime.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Finish the process: exit code 1 with a crash report when `cause` is
    /// an error, exit code 0 otherwise
    pub fn on_exit(&self, cause: Option<anyhow::Error>) -> ExitOutcome {
        let (exit_code, report) = match cause {
            Some(error) => {
                error!(context = CONTEXT, "The process was exit cause: {error:#}");
                let envelope = ErrorEnvelope::crash(&error, self.service_code.as_str());
                (1, self.spawn_report(&envelope))
            }
            None => {
                info!(context = CONTEXT, "The process was exit cause: completed");
                (0, None)
            }
        };

        let report = report.map(|(handle, done)| {
            if !self.grace.is_zero() {
                // Timing out is fine; the report stays best-effort
                let _ = done.recv_timeout(self.grace);
            }
            handle
        });

        if let Err(e) = self.logs.close() {
            eprintln!("Failed to flush logs: {e}");
        }

        self.shutdown.terminate(exit_code);

        ExitOutcome { exit_code, report }
    }

    fn spawn_report(
        &self,
        envelope: &ErrorEnvelope,
    ) -> Option<(JoinHandle<BestEffort>, mpsc::Receiver<()>)> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(context = CONTEXT, "No async runtime, crash report skipped");
            return None;
        };
        let data = match serde_json::to_value(envelope) {
            Ok(data) => data,
            Err(e) => {
                error!(context = CONTEXT, "Failed to encode crash report: {e}");
                return None;
            }
        };

        let client = self.client.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = runtime.spawn(async move {
            let outcome = client.try_report_errored(data).await;
            let _ = done_tx.send(());
            outcome
        });
        Some((handle, done_rx))
    }
}
