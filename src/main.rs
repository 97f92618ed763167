use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use worker_control::config::{
    ConfigResolver, DEBUG, WORKER_APP_NAME, WORKER_BACKEND_URL, WORKER_HEALTH_INTERVAL,
    WORKER_NAME, WORKER_REPORT_METHOD, WORKER_SECRET, WORKER_SERVICE_CODE,
    WORKER_SHUTDOWN_GRACE_MS, WORKER_TASK_ID,
};
use worker_control::crash::DEFAULT_SERVICE_CODE;
use worker_control::worker::{Worker, DEFAULT_HEALTH_INTERVAL_SECS};
use worker_control::{
    logging, BackendTaskClient, CrashReporter, HttpTransport, Identity, ProcessExit, ReportMethod,
};

/// Milliseconds the exit path waits for an in-flight crash report
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

/// Worker control-plane client: runs one backend task and reports its lifecycle
///
/// Options are the fallback layer; environment variables of the same name
/// take precedence.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker name used in the Basic credential (WORKER_NAME)
    #[arg(short = 'w', long)]
    worker_name: Option<String>,

    /// Shared secret (WORKER_SECRET)
    #[arg(short = 's', long)]
    secret: Option<String>,

    /// Backend base URL (WORKER_BACKEND_URL)
    #[arg(short = 'b', long)]
    backend_url: Option<String>,

    /// Task id to fetch and report on (WORKER_TASK_ID)
    #[arg(short = 't', long)]
    task_id: Option<String>,

    /// Application name, prefixes the log directory (WORKER_APP_NAME)
    #[arg(long)]
    app_name: Option<String>,

    /// Service code placed in crash reports (WORKER_SERVICE_CODE)
    #[arg(long)]
    service_code: Option<String>,

    /// Seconds between health check reports (WORKER_HEALTH_INTERVAL)
    #[arg(long)]
    health_interval: Option<u64>,

    /// HTTP method for reports, PATCH or POST (WORKER_REPORT_METHOD)
    #[arg(long)]
    report_method: Option<String>,

    /// Handler command and arguments; receives the task payload on stdin
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    handler: Vec<String>,
}

impl Cli {
    fn to_config(&self) -> ConfigResolver {
        ConfigResolver::builder()
            .set_opt(WORKER_NAME, self.worker_name.clone())
            .set_opt(WORKER_SECRET, self.secret.clone())
            .set_opt(WORKER_BACKEND_URL, self.backend_url.clone())
            .set_opt(WORKER_TASK_ID, self.task_id.clone())
            .set_opt(WORKER_APP_NAME, self.app_name.clone())
            .set_opt(WORKER_SERVICE_CODE, self.service_code.clone())
            .set_opt(WORKER_HEALTH_INTERVAL, self.health_interval)
            .set_opt(WORKER_REPORT_METHOD, self.report_method.clone())
            .build()
    }
}

/// Resolve the identity and report method into a lifecycle client
fn build_client(config: &ConfigResolver) -> Result<BackendTaskClient> {
    let identity = Identity::from_config(config)?;
    info!(context = "main", "Resolved identity {:?}", identity);

    let report_method = config
        .get::<String>(WORKER_REPORT_METHOD)
        .map(|method| method.parse::<ReportMethod>())
        .transpose()?
        .unwrap_or_default();

    Ok(BackendTaskClient::new(Arc::new(HttpTransport::new()), &identity)
        .with_debug(config.flag(DEBUG))
        .with_report_method(report_method))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.to_config();

    let app_name: String = config.get_or(WORKER_APP_NAME, env!("CARGO_PKG_NAME").to_string());
    let logs = logging::init(&config, &app_name)?;

    info!(
        context = "main",
        "{} v{} starting...",
        app_name,
        env!("CARGO_PKG_VERSION")
    );

    let client = match build_client(&config) {
        Ok(client) => client,
        Err(e) => {
            // No crash reporter without a client; still leave the logs behind
            error!(context = "main", "Worker setup failed: {e:#}");
            if let Err(flush) = logs.close() {
                eprintln!("Failed to flush logs: {flush}");
            }
            return Err(e);
        }
    };

    let crash = CrashReporter::new(client.clone(), Arc::new(ProcessExit), logs)
        .with_service_code(config.get_or(WORKER_SERVICE_CODE, DEFAULT_SERVICE_CODE.to_string()))
        .with_grace(Duration::from_millis(
            config.get_or(WORKER_SHUTDOWN_GRACE_MS, DEFAULT_SHUTDOWN_GRACE_MS),
        ));

    let health_interval = Duration::from_secs(
        config.get_or(WORKER_HEALTH_INTERVAL, DEFAULT_HEALTH_INTERVAL_SECS),
    );

    let result = match Worker::new(client, health_interval, cli.handler) {
        // Run on its own task so a panic surfaces as a JoinError
        Ok(worker) => match tokio::spawn(async move { worker.run().await }).await {
            Ok(run) => run.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow!("Worker task panicked: {e}")),
        },
        Err(e) => Err(e.into()),
    };

    crash.on_exit(result.err());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use worker_control::StaticEnvironment;

    fn identity_env() -> StaticEnvironment {
        StaticEnvironment::new()
            .with(WORKER_NAME, "w1")
            .with(WORKER_SECRET, "s3cr3t")
            .with(WORKER_BACKEND_URL, "http://api.test")
            .with(WORKER_TASK_ID, "t-42")
    }

    #[test]
    fn test_build_client_from_config() {
        let config = ConfigResolver::new(identity_env(), json!({ WORKER_REPORT_METHOD: "post" }));
        let client = build_client(&config).unwrap();
        assert_eq!(client.task_id(), "t-42");
    }

    #[test]
    fn test_build_client_missing_identity_fails() {
        let config = ConfigResolver::new(StaticEnvironment::new(), json!({}));
        let err = build_client(&config).unwrap_err();
        assert!(err.to_string().contains(WORKER_NAME));
    }

    #[test]
    fn test_build_client_rejects_unknown_report_method() {
        let config = ConfigResolver::new(identity_env().with(WORKER_REPORT_METHOD, "PUT"), json!({}));
        assert!(build_client(&config).is_err());
    }

    #[test]
    fn test_cli_values_feed_internal_layer() {
        let cli = Cli::parse_from(["worker-control", "-w", "w1", "-t", "t-7", "--", "sh", "-c", "true"]);
        let config = cli.to_config();
        assert_eq!(config.internal()[WORKER_TASK_ID], "t-7");
        assert_eq!(cli.handler, vec!["sh", "-c", "true"]);
    }
}
