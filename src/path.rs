//! Dot-notation property paths over nested JSON values.
//!
//! Paths are not checked against any configuration shape at runtime; callers
//! are responsible for passing paths that make sense for their configuration.

use serde_json::{Map, Value};
use std::fmt;

/// A parsed dot-notation path such as `database.host` or `servers.0.port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    raw: String,
    segments: Vec<String>,
}

impl PropertyPath {
    /// Parse a dot-notation path
    ///
    /// Returns `None` for the empty string and for paths with empty segments
    /// (`a..b`, `.a`, `a.`).
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// The literal path string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Look up `path` in `source`
///
/// A literal top-level key equal to the whole path wins over traversal, so a
/// flat map keyed by `"database.host"` resolves as well as a nested one.
/// Missing intermediates resolve to `None`.
#[must_use]
pub fn get<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.as_object().and_then(|map| map.get(path)) {
        return Some(value);
    }
    let path = PropertyPath::parse(path)?;
    get_segments(source, path.segments())
}

/// Traverse `source` one segment at a time
#[must_use]
pub fn get_segments<'a>(source: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(source, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Whether `path` resolves to a value (including an explicit `null`)
#[must_use]
pub fn has(source: &Value, path: &str) -> bool {
    get(source, path).is_some()
}

/// Largest segment value treated as an array index by `set`; larger
/// numeric segments become object keys
pub const MAX_ARRAY_INDEX: usize = u16::MAX as usize;

/// Parse `segment` as an array index `set` may grow an array to
fn array_index(segment: &str) -> Option<usize> {
    segment
        .parse::<usize>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
}

/// Write `value` at `path`, creating intermediate containers as needed
///
/// A numeric next segment creates an array, anything else an object. Scalars
/// standing in the way are replaced. Invalid paths are ignored.
pub fn set(target: &mut Value, path: &str, value: Value) {
    let Some(path) = PropertyPath::parse(path) else {
        return;
    };
    let segments = path.segments();
    let mut current = target;

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let next_is_index = segments
            .get(i + 1)
            .is_some_and(|s| array_index(s).is_some());

        let slot = match array_index(segment) {
            Some(index) if current.is_array() => {
                let Value::Array(items) = current else {
                    return;
                };
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
                &mut items[index]
            }
            _ => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    return;
                };
                map.entry(segment.clone()).or_insert(Value::Null)
            }
        };

        if last {
            *slot = value;
            return;
        }

        if !slot.is_object() && !slot.is_array() {
            *slot = if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
        }
        current = slot;
    }
}
