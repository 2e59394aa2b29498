use crate::failure::Failure;
use thiserror::Error;

/// Errors raised while rendering a template against the store.
///
/// The engine records a `TemplateError` as a HARD failure of the step that
/// owns the template; the step itself is not run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    /// A `{{` without a matching `}}`.
    #[error("unclosed placeholder at position {position} in '{template}'")]
    Unclosed {
        /// The template being rendered
        template: String,
        /// Byte offset of the opening braces
        position: usize,
    },

    /// The placeholder references a path that does not exist in the store.
    #[error("unresolved reference '{expression}' in '{template}'")]
    Unresolved {
        /// The template being rendered
        template: String,
        /// The expression inside the braces
        expression: String,
    },

    /// The placeholder names a filter the renderer does not know.
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// A filter was applied to a value it cannot handle.
    #[error("filter '{filter}' failed: {details}")]
    Filter {
        /// Name of the failing filter
        filter: String,
        /// What went wrong
        details: String,
    },

    /// The expression is syntactically invalid.
    #[error("invalid expression '{0}'")]
    Syntax(String),
}

/// Errors raised by [`Store`](crate::Store) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// No value exists at the given path.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A checked write would replace a value with one of another kind.
    ///
    /// Use [`Store::replace`](crate::Store::replace) when the overwrite is intended.
    #[error("refusing to overwrite {existing} at '{key}' with {incoming}")]
    TypeMismatch {
        /// The key being written
        key: String,
        /// Kind of the stored value
        existing: &'static str,
        /// Kind of the rejected value
        incoming: &'static str,
    },

    /// A dotted path walks through a value that is not a mapping.
    #[error("'{0}' is not a mapping")]
    NotAMapping(String),

    /// Empty keys and empty path segments are rejected.
    #[error("empty key")]
    EmptyKey,

    /// A resource with this name was already declared in the current run.
    #[error("resource '{0}' is already declared")]
    DuplicateResource(String),

    /// The first path segment names a binding installed by a running loop.
    #[error("'{0}' is bound by a running loop and cannot be written")]
    Bound(String),
}

/// Error returned by a step whose action failed outside the
/// assert/require model (I/O, bad input, a closure returning an error).
///
/// [`StepResult::from_result`](crate::StepResult::from_result) records it as a
/// HARD `Execution` failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    /// The step's action failed.
    #[error("{0}")]
    Execution(String),

    /// The step received input it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O operation failed.
    #[error("io error on '{path}': {details}")]
    Io {
        /// The file or resource involved
        path: String,
        /// Details from the underlying error
        details: String,
    },

    /// A store read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StepError {
    /// Shorthand for [`StepError::Execution`].
    pub fn execution(details: impl Into<String>) -> Self {
        StepError::Execution(details.into())
    }

    /// Shorthand for [`StepError::InvalidInput`].
    pub fn invalid_input(details: impl Into<String>) -> Self {
        StepError::InvalidInput(details.into())
    }
}

/// Errors surfaced by recipe construction and preparation.
///
/// `bake` never returns an error; these only come from the builder and
/// from [`Recipe::prepare_from`](crate::Recipe::prepare_from).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The recipe configuration is invalid.
    #[error("invalid recipe configuration: {0}")]
    Configuration(String),

    /// The step computing the recipe parameters failed hard.
    #[error("preparing parameters failed: {}", summarize(.0))]
    Prepare(Vec<Failure>),
}

fn summarize(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
