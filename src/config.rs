// Allow module inception - ConfigResolver is the natural name here
#![allow(clippy::module_name_repetitions)]

use crate::path::{self, PropertyPath};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::trace;

const CONTEXT: &str = "ConfigResolver";

/// Worker display name, half of the Basic credential
pub const WORKER_NAME: &str = "WORKER_NAME";
/// Shared secret, the other half of the Basic credential
pub const WORKER_SECRET: &str = "WORKER_SECRET";
/// Backend base URL
pub const WORKER_BACKEND_URL: &str = "WORKER_BACKEND_URL";
/// Id of the task this process executes
pub const WORKER_TASK_ID: &str = "WORKER_TASK_ID";
/// Application name, used for the log directory prefix
pub const WORKER_APP_NAME: &str = "WORKER_APP_NAME";
/// Service identifier placed in crash error envelopes
pub const WORKER_SERVICE_CODE: &str = "WORKER_SERVICE_CODE";
/// Seconds between HEALTH_CHECK reports
pub const WORKER_HEALTH_INTERVAL: &str = "WORKER_HEALTH_INTERVAL";
/// Milliseconds the exit path waits for an in-flight crash report
pub const WORKER_SHUTDOWN_GRACE_MS: &str = "WORKER_SHUTDOWN_GRACE_MS";
/// HTTP method used for reports (`PATCH` or `POST`)
pub const WORKER_REPORT_METHOD: &str = "WORKER_REPORT_METHOD";
/// Explicit log level
pub const LOG_LEVEL: &str = "LOG_LEVEL";
/// Debug flag; any value enables request dumps and raises the default level
pub const DEBUG: &str = "DEBUG";
/// Deployment environment; `production` disables console logging
pub const WORKER_ENV: &str = "WORKER_ENV";
/// Disables ANSI colours on the console
pub const NO_COLOR: &str = "NO_COLOR";

/// Read-only view of the process environment
#[cfg_attr(test, mockall::automock)]
pub trait EnvironmentView: Send + Sync {
    /// Value of the variable `name`, if set
    fn get(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl EnvironmentView for ProcessEnvironment {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables, for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct StaticEnvironment {
    vars: HashMap<String, String>,
}

impl StaticEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for StaticEnvironment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvironmentView for StaticEnvironment {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Layered configuration lookup
///
/// Precedence, highest first:
/// 1. the environment (cached once a lookup produced a value),
/// 2. the internal configuration supplied at construction,
/// 3. the caller's default.
///
/// Misses are never cached, so a variable that appears later is still seen.
/// A cached hit masks later changes to the same variable for the lifetime of
/// the resolver.
pub struct ConfigResolver {
    env: Box<dyn EnvironmentView>,
    internal: Value,
    cache: RwLock<HashMap<String, Value>>,
}

impl ConfigResolver {
    /// Create a resolver over `env` and a static internal configuration
    ///
    /// A non-object `internal` value is treated as an empty configuration.
    #[must_use]
    pub fn new(env: impl EnvironmentView + 'static, internal: Value) -> Self {
        let internal = if internal.is_object() {
            internal
        } else {
            Value::Object(Map::new())
        };
        Self {
            env: Box::new(env),
            internal,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver over the real process environment
    #[must_use]
    pub fn from_process_env(internal: Value) -> Self {
        Self::new(ProcessEnvironment, internal)
    }

    #[must_use]
    pub fn builder() -> ConfigResolverBuilder {
        ConfigResolverBuilder::default()
    }

    /// Resolve `path` to a raw value, or `None` if no layer has it
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.from_env(path) {
            return Some(value);
        }
        path::get(&self.internal, path)
            .filter(|value| !value.is_null())
            .cloned()
    }

    /// Resolve `path` and convert it to `T`
    ///
    /// Environment values are strings; when a string does not convert
    /// directly it is re-read as JSON text, so `"30"` yields `30u64`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get_value(path).and_then(convert)
    }

    /// Resolve `path`, falling back to `default` when absent or unconvertible
    #[must_use]
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    /// Truthiness of `path`: empty strings, `false`, `0` and `null` are off
    #[must_use]
    pub fn flag(&self, path: &str) -> bool {
        match self.get_value(path) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(_) => true,
        }
    }

    /// Whether any layer defines `path`
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get_value(path).is_some()
    }

    /// The internal configuration layer
    #[must_use]
    pub fn internal(&self) -> &Value {
        &self.internal
    }

    fn from_env(&self, path: &str) -> Option<Value> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            trace!(context = CONTEXT, "Config cache hit for {}", path);
            return Some(hit.clone());
        }

        let value = self.lookup_env(path)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), value.clone());
        Some(value)
    }

    /// Literal variable first; otherwise the head segment names a variable
    /// holding JSON and the rest of the path is walked inside it.
    fn lookup_env(&self, path: &str) -> Option<Value> {
        if let Some(raw) = self.env.get(path) {
            return Some(Value::String(raw));
        }
        let parsed = PropertyPath::parse(path)?;
        let (head, rest) = parsed.segments().split_first()?;
        if rest.is_empty() {
            return None;
        }
        let raw = self.env.get(head)?;
        let document: Value = serde_json::from_str(&raw).ok()?;
        path::get_segments(&document, rest)
            .filter(|value| !value.is_null())
            .cloned()
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ConfigResolver")
            .field("cached_paths", &cached)
            .finish_non_exhaustive()
    }
}

fn convert<T: DeserializeOwned>(value: Value) -> Option<T> {
    match value {
        Value::String(raw) => serde_json::from_value(Value::String(raw.clone()))
            .ok()
            .or_else(|| serde_json::from_str(&raw).ok()),
        other => serde_json::from_value(other).ok(),
    }
}

/// Builds the internal configuration layer path by path
#[derive(Default)]
pub struct ConfigResolverBuilder {
    internal: Value,
    env: Option<Box<dyn EnvironmentView>>,
}

impl ConfigResolverBuilder {
    /// Set `value` at `path` in the internal layer, creating parents
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        path::set(&mut self.internal, path, value.into());
        self
    }

    /// Set `path` only when `value` is present
    #[must_use]
    pub fn set_opt(self, path: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.set(path, value),
            None => self,
        }
    }

    /// Use `env` instead of the process environment
    #[must_use]
    pub fn env(mut self, env: impl EnvironmentView + 'static) -> Self {
        self.env = Some(Box::new(env));
        self
    }

    #[must_use]
    pub fn build(self) -> ConfigResolver {
        let internal = self.internal;
        match self.env {
            Some(env) => ConfigResolver::new(BoxedEnvironment(env), internal),
            None => ConfigResolver::new(ProcessEnvironment, internal),
        }
    }
}

struct BoxedEnvironment(Box<dyn EnvironmentView>);

impl EnvironmentView for BoxedEnvironment {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name)
    }
}
