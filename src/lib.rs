//! # Batter
//!
//! A small declarative recipe engine for Rust.
//!
//! A [`Recipe`] is an ordered list of [`Step`]s sharing one [`Store`]. Steps
//! carry templated parameters (`{{ store.params.region }}`) that are rendered
//! against the store right before they run. A step may be a nested
//! [`Section`] or a [`ForEach`] loop over a collection.
//!
//! ## Features
//!
//! - **Async First**: Built with `async-trait`; steps may await I/O
//! - **Two failure classes**: SOFT failures are recorded and the recipe
//!   continues, HARD failures abort the enclosing section, loop or recipe
//! - **Snapshot reads**: a step sees every write of earlier steps, never its own
//! - **Pluggable templates**: implement [`Renderer`] or pass a closure
//! - **Shared resources**: declare a connection once, reuse it by name, and
//!   have it closed when the run ends
//! - **Built-in steps**: assertions, requirements, data and text transforms,
//!   file reading, traces (see [`steps`])
//!
//! ## Quick Start
//!
//! ```rust
//! use batter::prelude::*;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! #[derive(Debug)]
//! struct Greet;
//!
//! #[async_trait]
//! impl Step for Greet {
//!     fn params(&self) -> Value {
//!         json!("Hello, {{ store.params.name }}!")
//!     }
//!
//!     async fn run(&self, params: Value, _scope: &mut Scope<'_>) -> StepResult {
//!         StepResult::ok(params)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut recipe = Recipe::new("Greeting", steps![Greet.store_as("greeting")])
//!     .prepare(json!({"name": "Batter"}));
//!
//! let result = recipe.bake().await;
//! assert!(result.success);
//! assert_eq!(recipe.store().get("greeting"), Some(&json!("Hello, Batter!")));
//! # }
//! ```
//!
//! ## Soft and Hard Failures
//!
//! ```rust
//! use batter::prelude::*;
//! use batter::steps::base::SetValue;
//! use batter::steps::validate::{Assert, Require, Subject};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut recipe = Recipe::new(
//!     "Checks",
//!     steps![
//!         SetValue::new("x", json!(5)),
//!         Assert::not_empty(Subject::value(json!([]))),
//!         Require::greater_than(Subject::field("x"), 10.0),
//!         SetValue::new("never", json!(true)),
//!     ],
//! );
//!
//! let result = recipe.bake().await;
//! assert!(result.aborted);
//! assert_eq!(result.soft_failures().count(), 1);
//! assert_eq!(result.hard_failures().count(), 1);
//! assert!(!recipe.store().contains_key("never"));
//! # }
//! ```
//!
//! ## Loops
//!
//! ```rust
//! use batter::prelude::*;
//! use batter::steps::base::Echo;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut recipe = Recipe::new(
//!     "Deploy",
//!     steps![ForEach::over("store.params.hosts", Echo::new("deploy {{ store.loop.item }}"))
//!         .store_as("deployed")],
//! )
//! .prepare(json!({"hosts": ["a", "b"]}));
//!
//! recipe.bake().await;
//! assert_eq!(
//!     recipe.store().get("deployed"),
//!     Some(&json!(["deploy a", "deploy b"]))
//! );
//! # }
//! ```

mod config;
mod error;
mod failure;
mod foreach;
mod recipe;
mod resource;
mod section;
mod step;
mod store;
mod template;

pub mod prelude;
pub mod steps;

pub use config::RecipeConfig;
pub use error::{EngineError, StepError, StoreError, TemplateError};
pub use failure::{Failure, FailureClass, FailureKind, Frame};
pub use foreach::{ForEach, LOOP_BINDING};
pub use recipe::{Recipe, RecipeBuilder, RecipeState, RunResult};
pub use resource::{Resource, Resources, TraceEntry, TraceLevel};
pub use section::Section;
pub use step::{Scope, SequenceOutcome, Step, StepExt, StepName, StepResult, Stored, Titled};
pub use store::{kind_of, Store, PARAMS_KEY};
pub use template::{
    render_value, stringify, MissingPolicy, PlaceholderRenderer, Renderer, STORE_ROOT,
};

/// Boxes a list of steps into a `Vec<Box<dyn Step>>`.
///
/// # Example
///
/// ```rust
/// use batter::steps;
/// use batter::steps::base::{Echo, Fail};
///
/// let list = steps![Echo::new("one"), Fail::new("two")];
/// assert_eq!(list.len(), 2);
/// ```
#[macro_export]
macro_rules! steps {
    ($($step:expr),* $(,)?) => {
        vec![$($crate::StepExt::boxed($step)),*]
    };
}
