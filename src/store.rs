use crate::error::StoreError;
use crate::resource::{Resource, ResourceHandle, Resources, TraceEntry};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key under which recipe parameters are stored.
pub const PARAMS_KEY: &str = "params";

/// Shared state of one recipe execution.
///
/// Keys may be dotted paths (`api.password`) that address nested mappings.
/// The store also carries the resources declared by steps and the trace
/// entries they recorded; neither is part of the [`snapshot`](Self::snapshot).
///
/// A for-each installs transient bindings on top of the base map: reads see
/// the innermost binding first. Writes land in the base map and are refused
/// under a name that is currently bound.
///
/// # Examples
///
/// ```
/// use batter::Store;
/// use serde_json::json;
///
/// let mut store = Store::new();
/// store.set("api.user", json!("ana")).unwrap();
/// assert_eq!(store.lookup("api.user").unwrap(), &json!("ana"));
///
/// // Checked writes refuse to change the kind of a value
/// assert!(store.set("api.user", json!(42)).is_err());
/// store.replace("api.user", json!(42)).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    data: Map<String, Value>,
    bindings: Vec<(String, Value)>,
    resources: Resources,
    traces: Vec<TraceEntry>,
    started_at: Instant,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store holding an empty `params` mapping.
    pub fn new() -> Self {
        let mut data = Map::new();
        data.insert(PARAMS_KEY.to_string(), Value::Object(Map::new()));
        Self {
            data,
            bindings: Vec::new(),
            resources: Resources::default(),
            traces: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Returns the top-level value for `key`, bindings first.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
            .or_else(|| self.data.get(key))
    }

    /// Resolves a dotted path. Numeric segments index into sequences.
    pub fn lookup(&self, path: &str) -> Result<&Value, StoreError> {
        let segments = split_path(path)?;
        let (head, rest) = segments
            .split_first()
            .ok_or(StoreError::EmptyKey)?;
        let root = self
            .get(head)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        descend(root, rest).ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    /// Writes `value` at `key`, refusing to change the kind of an existing value.
    ///
    /// Null is compatible with every kind in both directions. Returns the
    /// previous value, if any.
    pub fn set(&mut self, key: &str, value: Value) -> Result<Option<Value>, StoreError> {
        self.write(key, value, true)
    }

    /// Writes `value` at `key` regardless of what was there.
    pub fn replace(&mut self, key: &str, value: Value) -> Result<Option<Value>, StoreError> {
        self.write(key, value, false)
    }

    /// Checked [`set`](Self::set) of every entry, in order.
    ///
    /// Stops at the first rejected entry; earlier entries stay written.
    pub fn merge(&mut self, partial: Map<String, Value>) -> Result<(), StoreError> {
        for (key, value) in partial {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Removes a value by dotted path and returns it.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let segments = split_path(key).ok()?;
        let (last, parents) = segments.split_last()?;
        let mut current = &mut self.data;
        for segment in parents {
            current = current.get_mut(*segment)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Returns `true` if the dotted path resolves.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lookup(key).is_ok()
    }

    /// Returns an iterator over the top-level keys of the base map.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns the number of top-level entries in the base map.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the base map has no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The recipe parameters.
    pub fn params(&self) -> &Value {
        self.data.get(PARAMS_KEY).unwrap_or(&Value::Null)
    }

    /// A copy of the base map, bindings excluded.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// The resource named `name`, if one of type `R` was declared.
    pub fn resource<R: Resource + 'static>(&self, name: &str) -> Option<Arc<R>> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Trace entries recorded since the last bake.
    pub fn traces(&self) -> &[TraceEntry] {
        &self.traces
    }

    /// Returns the time elapsed since the store was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn seed_params(&mut self, params: Value) {
        self.data.insert(PARAMS_KEY.to_string(), params);
    }

    pub(crate) fn add_resource(&mut self, name: String, handle: ResourceHandle) -> Result<(), StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::EmptyKey);
        }
        if self.resources.insert(name.clone(), handle) {
            Ok(())
        } else {
            Err(StoreError::DuplicateResource(name))
        }
    }

    pub(crate) fn take_resources(&mut self) -> Vec<(String, ResourceHandle)> {
        self.resources.drain()
    }

    pub(crate) fn push_trace(&mut self, entry: TraceEntry) {
        self.traces.push(entry);
    }

    pub(crate) fn take_traces(&mut self) -> Vec<TraceEntry> {
        std::mem::take(&mut self.traces)
    }

    pub(crate) fn push_binding(&mut self, name: &str, value: Value) {
        self.bindings.push((name.to_string(), value));
    }

    pub(crate) fn pop_binding(&mut self) {
        self.bindings.pop();
    }

    fn write(&mut self, key: &str, value: Value, checked: bool) -> Result<Option<Value>, StoreError> {
        let segments = split_path(key)?;
        let (last, parents) = segments.split_last().ok_or(StoreError::EmptyKey)?;
        let head = segments.first().copied().unwrap_or(*last);
        if self.bindings.iter().any(|(name, _)| name == head) {
            return Err(StoreError::Bound(head.to_string()));
        }

        let mut current = &mut self.data;
        let mut walked = String::new();
        for segment in parents {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            current = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .ok_or_else(|| StoreError::NotAMapping(walked.clone()))?;
        }

        if checked {
            if let Some(existing) = current.get(*last) {
                if !compatible(existing, &value) {
                    return Err(StoreError::TypeMismatch {
                        key: key.to_string(),
                        existing: kind_of(existing),
                        incoming: kind_of(&value),
                    });
                }
            }
        }
        Ok(current.insert(last.to_string(), value))
    }
}

/// Name of the JSON kind of `value`, used in diagnostics.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn compatible(existing: &Value, incoming: &Value) -> bool {
    existing.is_null() || incoming.is_null() || kind_of(existing) == kind_of(incoming)
}

fn split_path(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::EmptyKey);
    }
    Ok(segments)
}

pub(crate) fn descend<'v>(root: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
