//! Built-in steps.
//!
//! Nothing here has privileged access to the engine; every step is an
//! ordinary [`Step`](crate::Step) implementation.

pub mod base;
pub mod mutate;
pub mod text;
pub mod validate;

use crate::error::StepError;
use crate::store::Store;
use serde_json::{json, Value};
use std::fmt;

/// The value a step operates on.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    /// The value at a dotted store path, read when the step runs.
    Field(String),
    /// A literal value, rendered as a template before the step runs.
    Value(Value),
}

impl Subject {
    pub fn field(path: impl Into<String>) -> Self {
        Subject::Field(path.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Subject::Value(value.into())
    }

    pub(crate) fn params(&self) -> Value {
        match self {
            Subject::Field(path) => json!({ "field": path }),
            Subject::Value(value) => json!({ "value": value }),
        }
    }

    /// Resolves the rendered form produced by [`Subject::params`].
    pub(crate) fn resolve(rendered: &Value, store: &Store) -> Result<Value, StepError> {
        match rendered.get("field").and_then(Value::as_str) {
            Some(path) => Ok(store.lookup(path)?.clone()),
            None => Ok(rendered.get("value").cloned().unwrap_or(Value::Null)),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Field(path) => write!(f, "field '{}'", path),
            Subject::Value(_) => write!(f, "value"),
        }
    }
}

/// Resolves the `subject` entry of a step's rendered params.
pub(crate) fn resolve_subject(params: &Value, store: &Store) -> Result<Value, StepError> {
    Subject::resolve(params.get("subject").unwrap_or(&Value::Null), store)
}

/// Flattens a sequence, or the values of a mapping, into items.
pub(crate) fn iterable(value: Value) -> Result<Vec<Value>, StepError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .flat_map(|(_, value)| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()),
        other => Err(StepError::invalid_input(format!(
            "expected a sequence or mapping, got {}",
            crate::store::kind_of(&other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_resolution() {
        let mut store = Store::new();
        store.set("x", json!(5)).unwrap();

        let field = Subject::field("x");
        assert_eq!(Subject::resolve(&field.params(), &store).unwrap(), json!(5));

        let literal = Subject::value(json!([1, 2]));
        assert_eq!(Subject::resolve(&literal.params(), &store).unwrap(), json!([1, 2]));

        let missing = Subject::field("y");
        assert!(Subject::resolve(&missing.params(), &store).is_err());
    }

    #[test]
    fn test_iterable_flattens_mappings() {
        assert_eq!(
            iterable(json!({"a": [1, 2], "b": 3})).unwrap(),
            vec![json!(1), json!(2), json!(3)]
        );
        assert!(iterable(json!("text")).is_err());
    }
}
