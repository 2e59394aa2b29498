//! Commonly used types and traits

pub use crate::error::{EngineError, StepError};
pub use crate::failure::{Failure, FailureClass, FailureKind};
pub use crate::foreach::ForEach;
pub use crate::recipe::{Recipe, RunResult};
pub use crate::resource::{Resource, TraceLevel};
pub use crate::section::Section;
pub use crate::step::{Scope, Step, StepExt, StepName, StepResult};
pub use crate::steps;
pub use crate::store::Store;
pub use crate::template::{MissingPolicy, PlaceholderRenderer, Renderer};
