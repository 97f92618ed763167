use crate::config::{
    ConfigResolver, WORKER_BACKEND_URL, WORKER_NAME, WORKER_SECRET, WORKER_TASK_ID,
};
use crate::error::{WorkerError, WorkerResult};
use std::fmt;

/// Who this worker is and which task it runs
///
/// Supplied once when building the lifecycle client. The secret is redacted
/// from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub worker_name: String,
    pub secret: String,
    pub backend_url: String,
    pub task_id: String,
}

impl Identity {
    /// Build an identity without validation
    #[must_use]
    pub fn new(
        worker_name: impl Into<String>,
        secret: impl Into<String>,
        backend_url: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            worker_name: worker_name.into(),
            secret: secret.into(),
            backend_url: backend_url.into(),
            task_id: task_id.into(),
        }
    }

    /// Resolve the identity from configuration
    ///
    /// Values are taken as given; a bad URL or secret shows up later as a
    /// failed request.
    ///
    /// # Errors
    ///
    /// Returns `MissingConfig` if a key is absent at every layer and
    /// `InvalidConfig` if the worker name cannot be carried in a Basic
    /// credential
    pub fn from_config(config: &ConfigResolver) -> WorkerResult<Self> {
        let identity = Self {
            worker_name: required(config, WORKER_NAME)?,
            secret: required(config, WORKER_SECRET)?,
            backend_url: required(config, WORKER_BACKEND_URL)?,
            task_id: required(config, WORKER_TASK_ID)?,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Check the identity can be encoded as `worker:secret`
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the worker name contains `:`
    pub fn validate(&self) -> WorkerResult<()> {
        validate_worker_name(&self.worker_name)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("worker_name", &self.worker_name)
            .field("secret", &"<redacted>")
            .field("backend_url", &self.backend_url)
            .field("task_id", &self.task_id)
            .finish()
    }
}

fn required(config: &ConfigResolver, key: &str) -> WorkerResult<String> {
    config
        .get::<String>(key)
        .ok_or_else(|| WorkerError::MissingConfig(key.to_string()))
}

/// A `:` in the worker name would split the Basic credential
///
/// # Errors
///
/// Returns `InvalidConfig` if the name contains `:`
pub fn validate_worker_name(name: &str) -> WorkerResult<()> {
    if name.contains(':') {
        return Err(WorkerError::InvalidConfig(
            "Worker name cannot contain ':'".to_string(),
        ));
    }
    Ok(())
}
