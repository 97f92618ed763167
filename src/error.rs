// Allow module inception for error types - this is a common Rust pattern
#![allow(clippy::module_name_repetitions)]

use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Can not get task config from backend")]
    NoTaskPayload,

    #[error("Get task config from backend failed, {source}")]
    FetchFailed {
        #[source]
        source: Box<WorkerError>,
    },

    #[error("Report worker task {report} failed, {source}")]
    ReportFailed {
        report: &'static str,
        #[source]
        source: Box<WorkerError>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Wrap a failure raised while fetching the task descriptor
    #[must_use]
    pub fn fetch(source: WorkerError) -> Self {
        Self::FetchFailed {
            source: Box::new(source),
        }
    }

    /// Wrap a failure raised while sending the named report
    #[must_use]
    pub fn report(report: &'static str, source: WorkerError) -> Self {
        Self::ReportFailed {
            report,
            source: Box::new(source),
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
