use crate::client::BackendTaskClient;
use crate::error::{WorkerError, WorkerResult};
use serde_json::Value;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const CONTEXT: &str = "Worker";

/// Environment variable carrying the task payload to the handler
pub const TASK_PAYLOAD_VAR: &str = "WORKER_TASK_PAYLOAD";

/// Default seconds between HEALTH_CHECK reports
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Drives one task through its lifecycle
///
/// Fetch, report STARTED, run the external handler while sending health
/// checks, report FINISHED. Any failure ends the run with an error; the
/// caller decides what to report about it.
pub struct Worker {
    client: BackendTaskClient,
    health_interval: Duration,
    handler: Vec<String>,
}

impl Worker {
    /// Create a worker
    ///
    /// `handler` is the external command (program then arguments); an empty
    /// vector means there is nothing to execute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `health_interval` is zero
    pub fn new(
        client: BackendTaskClient,
        health_interval: Duration,
        handler: Vec<String>,
    ) -> WorkerResult<Self> {
        if health_interval.is_zero() {
            return Err(WorkerError::InvalidConfig(
                "Health check interval must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            client,
            health_interval,
            handler,
        })
    }

    /// Run the task to completion
    ///
    /// # Errors
    ///
    /// Returns an error if fetching or a lifecycle report fails, or the
    /// handler cannot be started or exits unsuccessfully
    pub async fn run(&self) -> WorkerResult<()> {
        info!(context = CONTEXT, "Worker starting task {}", self.client.task_id());

        let task: Value = self.client.fetch_task().await?;
        self.client.report_started().await?;

        match self.handler.split_first() {
            Some((program, args)) => self.supervise(program, args, &task).await?,
            None => info!(context = CONTEXT, "No handler command given, nothing to execute"),
        }

        self.client.report_finished().await?;
        info!(context = CONTEXT, "Task {} finished", self.client.task_id());
        Ok(())
    }

    /// Wait for the handler while reporting health on every tick
    async fn supervise(&self, program: &str, args: &[String], task: &Value) -> WorkerResult<()> {
        let mut child = spawn_handler(program, args, task)?;
        let mut heartbeat = tokio::time::interval(self.health_interval);

        // The first tick completes immediately
        heartbeat.tick().await;

        let status: ExitStatus = loop {
            tokio::select! {
                biased;

                status = child.wait() => {
                    break status.map_err(|e| {
                        WorkerError::Handler(format!("Failed to wait for handler: {e}"))
                    })?;
                }

                _ = heartbeat.tick() => {
                    // Liveness is a side channel; a missed beat is not fatal
                    if let Err(e) = self.client.report_health_status().await {
                        warn!(context = CONTEXT, "{e}");
                    }
                }
            }
        };

        if status.success() {
            debug!(context = CONTEXT, "Handler exited successfully");
            Ok(())
        } else {
            Err(WorkerError::Handler(format!(
                "Handler '{program}' exited with {status}"
            )))
        }
    }
}

/// Start the handler with the payload on stdin and in `WORKER_TASK_PAYLOAD`
fn spawn_handler(program: &str, args: &[String], task: &Value) -> WorkerResult<Child> {
    let payload = serde_json::to_string(task)?;

    debug!(context = CONTEXT, "Handler: {} with args: {:?}", program, args);

    let mut child = Command::new(program)
        .args(args)
        .env(TASK_PAYLOAD_VAR, &payload)
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| WorkerError::Handler(format!("Failed to spawn command '{program}': {e}")))?;

    // Written from a separate task so a handler that never reads stdin
    // cannot stall supervision
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!(context = CONTEXT, "Handler did not read the payload: {e}");
            }
            let _ = stdin.shutdown().await;
        });
    }

    Ok(child)
}
