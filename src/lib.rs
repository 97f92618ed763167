// Public exports for library usage
pub mod api;
pub mod client;
pub mod config;
pub mod crash;
pub mod error;
pub mod identity;
pub mod logging;
pub mod path;
pub mod report;
pub mod transport;
pub mod worker;

pub use api::BackendApi;
pub use client::{BackendTaskClient, BestEffort, ReportMethod};
pub use config::{ConfigResolver, EnvironmentView, ProcessEnvironment, StaticEnvironment};
pub use crash::{CrashReporter, ExitOutcome, ProcessExit, Shutdown};
pub use error::{WorkerError, WorkerResult};
pub use identity::Identity;
pub use report::{ErrorEnvelope, TaskReport, TaskReportReason};
pub use transport::{HttpTransport, Method, Transport, TransportError, TransportRequest, TransportResponse};
