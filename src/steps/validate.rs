//! Assertions and requirements.
//!
//! Both families evaluate a [`Predicate`] over a [`Subject`]. An `Assert`
//! records a SOFT failure when the predicate does not hold and the recipe
//! continues; a `Require` records a HARD failure and the enclosing
//! container aborts. Either way the step's output is the evaluated subject.

use super::resolve_subject;
use crate::error::StepError;
use crate::failure::{Failure, FailureClass, FailureKind};
use crate::step::{Scope, Step, StepName, StepResult};
use crate::store::kind_of;
use crate::template::stringify;
use async_trait::async_trait;
use serde_json::{json, Value};

pub use super::Subject;

/// A condition over a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Null, or an empty string, sequence or mapping.
    Empty,
    NotEmpty,
    /// Equal to the operand; numbers and numeric strings compare by value.
    Equal(Value),
    GreaterThan(f64),
    LessThan(f64),
    /// A string containing every substring, or a sequence or mapping holding
    /// every element or key.
    Contains(Vec<String>),
    /// Every element of a sequence (or value of a mapping) is truthy.
    AllTruthy,
}

impl Predicate {
    /// Short name used in step names, e.g. `GreaterThan`.
    pub fn label(&self) -> &'static str {
        match self {
            Predicate::Empty => "Empty",
            Predicate::NotEmpty => "NotEmpty",
            Predicate::Equal(_) => "Equal",
            Predicate::GreaterThan(_) => "GreaterThan",
            Predicate::LessThan(_) => "LessThan",
            Predicate::Contains(_) => "Contains",
            Predicate::AllTruthy => "AllTruthy",
        }
    }

    /// The operand as a templated value, rendered with the step's params.
    pub(crate) fn operand(&self) -> Value {
        match self {
            Predicate::Equal(expected) => expected.clone(),
            Predicate::GreaterThan(bound) | Predicate::LessThan(bound) => json!(bound),
            Predicate::Contains(needles) => json!(needles),
            Predicate::Empty | Predicate::NotEmpty | Predicate::AllTruthy => Value::Null,
        }
    }

    /// Evaluates the predicate against `subject` with its own operand.
    ///
    /// A subject of the wrong kind is an error, not a `false`.
    ///
    /// ```
    /// use batter::steps::validate::Predicate;
    /// use serde_json::json;
    ///
    /// assert!(Predicate::GreaterThan(2.0).check(&json!(3)).unwrap());
    /// assert!(Predicate::Equal(json!(5)).check(&json!("5")).unwrap());
    /// ```
    pub fn check(&self, subject: &Value) -> Result<bool, StepError> {
        self.evaluate(subject, &self.operand())
    }

    /// Like [`check`](Self::check), with an operand rendered from templates.
    pub(crate) fn evaluate(&self, subject: &Value, operand: &Value) -> Result<bool, StepError> {
        match self {
            Predicate::Empty => is_empty(subject),
            Predicate::NotEmpty => is_empty(subject).map(|empty| !empty),
            Predicate::Equal(_) => Ok(match (as_number(subject), as_number(operand)) {
                (Some(a), Some(b)) => a == b,
                _ => subject == operand,
            }),
            Predicate::GreaterThan(_) => Ok(number(subject)? > number(operand)?),
            Predicate::LessThan(_) => Ok(number(subject)? < number(operand)?),
            Predicate::Contains(_) => contains(subject, operand),
            Predicate::AllTruthy => match subject {
                Value::Array(items) => Ok(items.iter().all(truthy)),
                Value::Object(map) => Ok(map.values().all(truthy)),
                other => Err(mismatch("a sequence or mapping", other)),
            },
        }
    }

    fn describe(&self, operand: &Value) -> String {
        match self {
            Predicate::Empty => "to be empty".to_string(),
            Predicate::NotEmpty => "not to be empty".to_string(),
            Predicate::Equal(_) => format!("to equal {}", operand),
            Predicate::GreaterThan(_) => format!("to be greater than {}", stringify(operand)),
            Predicate::LessThan(_) => format!("to be less than {}", stringify(operand)),
            Predicate::Contains(_) => format!("to contain {}", operand),
            Predicate::AllTruthy => "to hold only truthy values".to_string(),
        }
    }
}

fn mismatch(expected: &str, value: &Value) -> StepError {
    StepError::invalid_input(format!("expected {}, got {}", expected, kind_of(value)))
}

fn is_empty(value: &Value) -> Result<bool, StepError> {
    match value {
        Value::Null => Ok(true),
        Value::String(s) => Ok(s.is_empty()),
        Value::Array(items) => Ok(items.is_empty()),
        Value::Object(map) => Ok(map.is_empty()),
        other => Err(mismatch("a string, sequence or mapping", other)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(value: &Value) -> Result<f64, StepError> {
    as_number(value).ok_or_else(|| mismatch("a number", value))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn contains(subject: &Value, operand: &Value) -> Result<bool, StepError> {
    let needles: Vec<String> = match operand {
        Value::Array(items) => items.iter().map(stringify).collect(),
        other => vec![stringify(other)],
    };
    match subject {
        Value::String(haystack) => Ok(needles.iter().all(|n| haystack.contains(n.as_str()))),
        Value::Array(items) => {
            let present: Vec<String> = items.iter().map(stringify).collect();
            Ok(needles.iter().all(|n| present.contains(n)))
        }
        Value::Object(map) => Ok(needles.iter().all(|n| map.contains_key(n))),
        other => Err(mismatch("a string, sequence or mapping", other)),
    }
}

/// A step checking a predicate over a subject.
///
/// Built with the [`Assert`] and [`Require`] constructors.
#[derive(Debug, Clone)]
pub struct Validate {
    class: FailureClass,
    predicate: Predicate,
    subject: Subject,
}

impl Validate {
    pub fn new(class: FailureClass, subject: Subject, predicate: Predicate) -> Self {
        Self {
            class,
            predicate,
            subject,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    fn kind(&self) -> FailureKind {
        match self.class {
            FailureClass::Soft => FailureKind::Assertion,
            FailureClass::Hard => FailureKind::Requirement,
        }
    }
}

#[async_trait]
impl Step for Validate {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let subject = match resolve_subject(&params, scope.store()) {
            Ok(subject) => subject,
            Err(e) => return StepResult::from_result(Err(e)),
        };
        let operand = params.get("operand").cloned().unwrap_or(Value::Null);

        match self.predicate.evaluate(&subject, &operand) {
            Ok(true) => StepResult::ok(subject),
            Ok(false) => {
                let message = format!(
                    "expected {} {}, got {}",
                    self.subject,
                    self.predicate.describe(&operand),
                    subject
                );
                StepResult::ok(subject).with_failure(Failure::new(self.class, self.kind(), message))
            }
            Err(e) => StepResult::from_result(Err(e)),
        }
    }

    fn name(&self) -> StepName {
        let family = match self.class {
            FailureClass::Soft => "Assert",
            FailureClass::Hard => "Require",
        };
        StepName::new(format!("{}{}", family, self.predicate.label()))
    }

    fn params(&self) -> Value {
        json!({
            "subject": self.subject.params(),
            "operand": self.predicate.operand(),
        })
    }
}

macro_rules! constructors {
    ($family:ident, $class:expr) => {
        impl $family {
            pub fn check(subject: Subject, predicate: Predicate) -> Validate {
                Validate::new($class, subject, predicate)
            }

            pub fn empty(subject: Subject) -> Validate {
                Self::check(subject, Predicate::Empty)
            }

            pub fn not_empty(subject: Subject) -> Validate {
                Self::check(subject, Predicate::NotEmpty)
            }

            pub fn equal(subject: Subject, expected: impl Into<Value>) -> Validate {
                Self::check(subject, Predicate::Equal(expected.into()))
            }

            pub fn greater_than(subject: Subject, bound: f64) -> Validate {
                Self::check(subject, Predicate::GreaterThan(bound))
            }

            pub fn less_than(subject: Subject, bound: f64) -> Validate {
                Self::check(subject, Predicate::LessThan(bound))
            }

            pub fn contains<I, T>(subject: Subject, needles: I) -> Validate
            where
                I: IntoIterator<Item = T>,
                T: Into<String>,
            {
                Self::check(
                    subject,
                    Predicate::Contains(needles.into_iter().map(Into::into).collect()),
                )
            }

            pub fn all_truthy(subject: Subject) -> Validate {
                Self::check(subject, Predicate::AllTruthy)
            }
        }
    };
}

/// Checks whose failure is SOFT: recorded, execution continues.
#[derive(Debug, Clone, Copy)]
pub struct Assert;

/// Checks whose failure is HARD: recorded, the enclosing container aborts.
#[derive(Debug, Clone, Copy)]
pub struct Require;

constructors!(Assert, FailureClass::Soft);
constructors!(Require, FailureClass::Hard);
