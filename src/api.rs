use crate::identity::Identity;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of `/` not directly after a scheme's `:`
static DUPLICATE_SLASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^:]/)/+").expect("duplicate slash pattern is valid"));

/// Request targets and credential for one task
///
/// Everything is derived once from the identity at construction and never
/// changes afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendApi {
    authorization: String,
    task_url: String,
    report_url: String,
}

impl BackendApi {
    #[must_use]
    pub fn new(identity: &Identity) -> Self {
        let credential = format!("{}:{}", identity.worker_name, identity.secret);
        let authorization = format!("Basic {}", BASE64_STANDARD.encode(credential));

        let base = normalize_base_url(&identity.backend_url);
        // /v1/pipelines/worker-tasks/{worker-task-id}
        let task_url = format!("{base}/v1/pipelines/worker-tasks/{}", identity.task_id);
        // /v1/pipelines/worker-tasks/{worker-task-id}/reports
        let report_url = format!("{task_url}/reports");

        Self {
            authorization,
            task_url,
            report_url,
        }
    }

    /// `GET` target for the task descriptor
    #[must_use]
    pub fn task_fetch_url(&self) -> &str {
        &self.task_url
    }

    /// Target for lifecycle reports
    #[must_use]
    pub fn task_report_url(&self) -> &str {
        &self.report_url
    }

    /// Value of the `Authorization` header
    #[must_use]
    pub fn authorization_header(&self) -> &str {
        &self.authorization
    }
}

impl std::fmt::Debug for BackendApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendApi")
            .field("authorization", &"Basic <redacted>")
            .field("task_url", &self.task_url)
            .field("report_url", &self.report_url)
            .finish()
    }
}

/// Collapse duplicate path separators and drop trailing ones
///
/// `http://host//v1/` becomes `http://host/v1`; the `//` after the scheme
/// is kept.
#[must_use]
pub fn normalize_base_url(url: &str) -> String {
    let collapsed = DUPLICATE_SLASHES.replace_all(url, "$1");
    let trimmed = collapsed.trim_end_matches('/');
    if trimmed.ends_with(':') {
        // Nothing but a scheme; leave it alone
        return collapsed.into_owned();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(base: &str) -> Identity {
        Identity::new("w1", "s3cr3t", base, "t-42")
    }

    #[test]
    fn test_urls_for_task() {
        let api = BackendApi::new(&identity("http://api.test"));
        assert_eq!(
            api.task_fetch_url(),
            "http://api.test/v1/pipelines/worker-tasks/t-42"
        );
        assert_eq!(
            api.task_report_url(),
            "http://api.test/v1/pipelines/worker-tasks/t-42/reports"
        );
    }

    #[test]
    fn test_authorization_header() {
        let api = BackendApi::new(&identity("http://api.test"));
        // base64("w1:s3cr3t")
        assert_eq!(api.authorization_header(), "Basic dzE6czNjcjN0");
    }

    #[test]
    fn test_normalize_collapses_duplicate_slashes() {
        assert_eq!(normalize_base_url("http://host///v1//x"), "http://host/v1/x");
        assert_eq!(normalize_base_url("http://host//v1"), "http://host/v1");
        assert_eq!(normalize_base_url("https://host/"), "https://host");
        assert_eq!(normalize_base_url("http://host"), "http://host");
    }

    #[test]
    fn test_base_path_is_kept() {
        let api = BackendApi::new(&identity("https://api.test//base//"));
        assert_eq!(
            api.task_fetch_url(),
            "https://api.test/base/v1/pipelines/worker-tasks/t-42"
        );
    }

    #[test]
    fn test_derivation_is_stable() {
        let mut id = identity("http://api.test");
        let api = BackendApi::new(&id);
        let first = api.task_fetch_url().to_string();
        id.task_id = "other".into();
        id.secret = "changed".into();
        assert_eq!(api.task_fetch_url(), first);
        assert_eq!(api.task_fetch_url(), api.task_fetch_url());
        assert_eq!(api.authorization_header(), "Basic dzE6czNjcjN0");
    }
}
