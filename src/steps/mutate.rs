//! Steps that reshape data.
//!
//! `Filter`, `Map` and `Reduce` work over a sequence; a mapping subject is
//! flattened to its values first.

use super::{iterable, resolve_subject, Subject};
use crate::error::StepError;
use crate::step::{Scope, Step, StepResult};
use crate::store::descend;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;

/// Outputs the value at a dotted path inside the subject.
#[derive(Debug, Clone)]
pub struct Select {
    subject: Subject,
    path: String,
}

impl Select {
    pub fn new(subject: Subject, path: impl Into<String>) -> Self {
        Self {
            subject,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Step for Select {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(resolve_subject(&params, scope.store()).and_then(|subject| {
            let path = params.get("path").and_then(Value::as_str).unwrap_or_default();
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            descend(&subject, &segments)
                .cloned()
                .ok_or_else(|| StepError::execution(format!("path '{}' not found", path)))
        }))
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params(), "path": self.path })
    }
}

/// Keeps the items for which the closure returns `true`.
pub struct Filter {
    subject: Subject,
    keep: Box<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Filter {
    pub fn new<F>(subject: Subject, keep: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            subject,
            keep: Box::new(keep),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for Filter {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(
            resolve_subject(&params, scope.store())
                .and_then(iterable)
                .map(|items| items.into_iter().filter(|item| (self.keep)(item)).collect()),
        )
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}

type MapFn = dyn Fn(&Value) -> Result<Value, StepError> + Send + Sync;

/// Applies the closure to every item.
pub struct Map {
    subject: Subject,
    func: Box<MapFn>,
}

impl Map {
    pub fn new<F>(subject: Subject, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self {
            subject,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for Map {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(
            resolve_subject(&params, scope.store())
                .and_then(iterable)
                .and_then(|items| {
                    items
                        .iter()
                        .map(|item| (self.func)(item))
                        .collect::<Result<Vec<_>, _>>()
                })
                .map(Value::Array),
        )
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}

type ReduceFn = dyn Fn(Value, &Value) -> Result<Value, StepError> + Send + Sync;

/// Folds the items left to right, starting from the first one.
///
/// An empty input is an error.
pub struct Reduce {
    subject: Subject,
    func: Box<ReduceFn>,
}

impl Reduce {
    pub fn new<F>(subject: Subject, func: F) -> Self
    where
        F: Fn(Value, &Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self {
            subject,
            func: Box::new(func),
        }
    }

    fn fold(&self, items: Vec<Value>) -> Result<Value, StepError> {
        let mut items = items.into_iter();
        let first = items
            .next()
            .ok_or_else(|| StepError::invalid_input("cannot reduce an empty sequence"))?;
        items.try_fold(first, |acc, item| (self.func)(acc, &item))
    }
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reduce")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for Reduce {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(
            resolve_subject(&params, scope.store())
                .and_then(iterable)
                .and_then(|items| self.fold(items)),
        )
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}
