//! Tagged failure values threaded through step results.

use crate::step::StepName;
use serde::Serialize;
use std::fmt;

/// How a failure affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Recorded; execution continues with the next step.
    Soft,
    /// Recorded; the enclosing section and every level above it abort.
    Hard,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Soft => write!(f, "SOFT"),
            FailureClass::Hard => write!(f, "HARD"),
        }
    }
}

/// What produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureKind {
    /// A template could not be rendered.
    Template,
    /// The step's action errored outside the assert/require model.
    Execution,
    /// An assert-style predicate did not hold.
    Assertion,
    /// A require-style predicate did not hold.
    Requirement,
    /// A for-each source did not resolve to something iterable.
    IterationSource,
    /// A store write was rejected.
    Store,
}

/// One level of nesting a failure passed through on its way up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Raised inside the named section.
    Section {
        /// Section title
        name: StepName,
    },
    /// Raised inside iteration `index` of the named for-each.
    Iteration {
        /// For-each title
        name: StepName,
        /// Zero-based iteration index
        index: usize,
    },
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Section { name } => write!(f, "{}", name),
            Frame::Iteration { name, index } => write!(f, "{}[{}]", name, index),
        }
    }
}

/// A recorded failure.
///
/// `step` is stamped by the engine with the name of the step that produced
/// the failure. `trace` lists the enclosing sections and iterations,
/// innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub class: FailureClass,
    pub kind: FailureKind,
    pub message: String,
    pub step: Option<StepName>,
    pub trace: Vec<Frame>,
}

impl Failure {
    pub fn new(class: FailureClass, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            class,
            kind,
            message: message.into(),
            step: None,
            trace: Vec::new(),
        }
    }

    pub fn soft(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(FailureClass::Soft, kind, message)
    }

    pub fn hard(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(FailureClass::Hard, kind, message)
    }

    pub fn with_step(mut self, step: StepName) -> Self {
        self.step = Some(step);
        self
    }

    pub fn is_hard(&self) -> bool {
        self.class == FailureClass::Hard
    }

    pub fn is_soft(&self) -> bool {
        self.class == FailureClass::Soft
    }

    /// Index of the innermost for-each iteration the failure came from.
    pub fn iteration(&self) -> Option<usize> {
        self.trace.iter().find_map(|frame| match frame {
            Frame::Iteration { index, .. } => Some(*index),
            Frame::Section { .. } => None,
        })
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.trace.push(frame);
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.class)?;
        for frame in self.trace.iter().rev() {
            write!(f, "{} > ", frame)?;
        }
        match &self.step {
            Some(step) => write!(f, "{}: {}", step, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
