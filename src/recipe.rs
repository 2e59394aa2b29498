use crate::config::RecipeConfig;
use crate::error::EngineError;
use crate::failure::Failure;
use crate::resource::TraceEntry;
use crate::step::{Scope, Step};
use crate::store::Store;
use crate::template::Renderer;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle of a [`Recipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeState {
    Created,
    Prepared,
    Baked,
}

/// Aggregate outcome of [`Recipe::bake`].
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// No failure of any class was recorded.
    pub success: bool,
    /// A HARD failure stopped the recipe.
    pub aborted: bool,
    /// Every failure, in the order it was recorded.
    pub failures: Vec<Failure>,
    /// Outputs of the top-level steps that ran.
    pub outputs: Vec<Value>,
    /// Trace entries recorded by steps, in order.
    pub traces: Vec<TraceEntry>,
    /// The store as it was when the recipe finished.
    pub store: Value,
}

impl RunResult {
    pub fn hard_failures(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(|f| f.is_hard())
    }

    pub fn soft_failures(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(|f| f.is_soft())
    }
}

/// An ordered list of steps sharing one store.
///
/// # Examples
///
/// ```
/// use batter::prelude::*;
/// use batter::steps::base::SetValue;
/// use batter::steps::validate::{Require, Subject};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut recipe = Recipe::new(
///     "Replicas",
///     steps![
///         SetValue::new("replicas", json!("{{ store.params.replicas | tojson }}")),
///         Require::greater_than(Subject::field("replicas"), 0.0),
///     ],
/// )
/// .prepare(json!({"replicas": 3}));
///
/// let result = recipe.bake().await;
/// assert!(result.success);
/// assert_eq!(recipe.store().get("replicas"), Some(&json!(3)));
/// # }
/// ```
pub struct Recipe {
    title: String,
    steps: Vec<Box<dyn Step>>,
    store: Store,
    renderer: Box<dyn Renderer>,
    config: RecipeConfig,
    state: RecipeState,
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("title", &self.title)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl Recipe {
    pub fn new(title: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        let config = RecipeConfig::default();
        Self {
            title: title.into(),
            steps,
            store: Store::new(),
            renderer: Box::new(config.renderer()),
            config,
            state: RecipeState::Created,
        }
    }

    pub fn builder(title: impl Into<String>) -> RecipeBuilder {
        RecipeBuilder::new(title)
    }

    /// Replaces the template renderer.
    pub fn with_renderer<R: Renderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Seeds `params`, replacing any previous params.
    pub fn prepare(mut self, params: impl Into<Value>) -> Self {
        self.store.seed_params(params.into());
        self.state = RecipeState::Prepared;
        self
    }

    /// Seeds `params` with the output of `step`, run against the store.
    ///
    /// SOFT failures are logged; a HARD failure is returned as
    /// [`EngineError::Prepare`].
    pub async fn prepare_from<S: Step>(mut self, step: S) -> Result<Self, EngineError> {
        let result = {
            let mut scope = Scope::new(&mut self.store, &*self.renderer);
            scope.run_step(&step).await
        };
        if result.is_hard() {
            return Err(EngineError::Prepare(result.failures));
        }
        for failure in &result.failures {
            warn!("Recipe '{}' prepared with a failure: {}", self.title, failure);
        }
        Ok(self.prepare(result.output))
    }

    /// Runs every step in order and reports the outcome.
    ///
    /// Never fails: failures are reported in the [`RunResult`]. Baking again
    /// re-runs every step against the store left by the previous run.
    /// Resources declared during the run are closed before it returns.
    pub async fn bake(&mut self) -> RunResult {
        if self.state == RecipeState::Created {
            self.store.seed_params(Value::Object(Default::default()));
        }

        let (steps, sections) = self.step_count();
        info!(
            "Baking '{}': {} step(s), {} section(s)",
            self.title, steps, sections
        );

        let outcome = {
            let mut scope = Scope::new(&mut self.store, &*self.renderer);
            scope.run_sequence(&self.steps).await
        };
        self.state = RecipeState::Baked;
        self.close_resources().await;

        let success = outcome.failures.is_empty();
        if outcome.aborted {
            warn!(
                "Recipe '{}' aborted after {} step(s) with {} failure(s)",
                self.title,
                outcome.outputs.len(),
                outcome.failures.len()
            );
        } else if !success {
            warn!(
                "Recipe '{}' finished with {} failure(s)",
                self.title,
                outcome.failures.len()
            );
        } else {
            info!(
                "Recipe '{}' finished in {:?}",
                self.title,
                self.store.elapsed()
            );
        }

        RunResult {
            success,
            aborted: outcome.aborted,
            failures: outcome.failures,
            outputs: outcome.outputs,
            traces: self.store.take_traces(),
            store: self.store.snapshot(),
        }
    }

    async fn close_resources(&mut self) {
        for (name, resource) in self.store.take_resources() {
            match resource.close().await {
                Ok(()) => debug!("Closed resource '{}'", name),
                Err(e) => warn!("Error closing resource '{}': {}", name, e),
            }
        }
    }

    /// Counts `(steps, sections)` over the whole tree.
    ///
    /// Every step counts, sections and loops included; those also count as
    /// sections. Wrappers such as `tolerate()` add nothing of their own.
    pub fn step_count(&self) -> (usize, usize) {
        fn walk(step: &dyn Step, counts: &mut (usize, usize)) {
            counts.0 += 1;
            if step.is_container() {
                counts.1 += 1;
            }
            for child in step.children() {
                walk(child, counts);
            }
        }

        let mut counts = (0, 0);
        for step in &self.steps {
            walk(step.as_ref(), &mut counts);
        }
        counts
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> RecipeState {
        self.state
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }
}

pub struct RecipeBuilder {
    title: String,
    steps: Vec<Box<dyn Step>>,
    renderer: Option<Box<dyn Renderer>>,
    config: RecipeConfig,
}

impl RecipeBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            steps: Vec::new(),
            renderer: None,
            config: RecipeConfig::default(),
        }
    }

    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn steps(mut self, steps: Vec<Box<dyn Step>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// A custom renderer; `on_missing` from the config no longer applies.
    pub fn renderer<R: Renderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn config(mut self, config: RecipeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Recipe, EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Configuration(
                "Recipe title must not be empty".to_string(),
            ));
        }

        let renderer = self
            .renderer
            .unwrap_or_else(|| Box::new(self.config.renderer()) as Box<dyn Renderer>);
        Ok(Recipe {
            title: self.title,
            steps: self.steps,
            store: Store::new(),
            renderer,
            config: self.config,
            state: RecipeState::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::failure::FailureKind;
    use crate::foreach::ForEach;
    use crate::section::Section;
    use crate::step::StepExt;
    use crate::steps::base::{Echo, Fail, SetValue};
    use crate::template::{stringify, MissingPolicy};
    use serde_json::json;

    #[test]
    fn test_builder_requires_title() {
        let result = Recipe::builder("  ").step(Echo::new("hi")).build();
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_step_count_walks_nested_steps() {
        let recipe = Recipe::new(
            "Counts",
            crate::steps![
                Echo::new("a"),
                Section::new(
                    "Inner",
                    crate::steps![Echo::new("b"), ForEach::over("store.params.x", Echo::new("c"))],
                ),
            ],
        );
        assert_eq!(recipe.step_count(), (5, 2));
    }

    #[test]
    fn test_step_count_ignores_wrappers() {
        let recipe = Recipe::new(
            "Wrapped",
            crate::steps![
                Fail::new("x").tolerate(),
                Section::new("Inner", crate::steps![Echo::new("a")])
                    .tolerate()
                    .titled("Renamed"),
                ForEach::over("store.params.x", Echo::new("b")).store_as("out"),
            ],
        );
        assert_eq!(recipe.step_count(), (5, 2));
    }

    #[tokio::test]
    async fn test_bake_without_prepare_uses_empty_params() {
        let mut recipe = Recipe::new("Plain", crate::steps![Echo::new("{{ store.params | tojson }}")]);
        assert_eq!(recipe.state(), RecipeState::Created);

        let result = recipe.bake().await;
        assert!(result.success);
        assert_eq!(result.outputs, vec![json!("{}")]);
        assert_eq!(recipe.state(), RecipeState::Baked);
    }

    #[tokio::test]
    async fn test_missing_policy_from_config() {
        let mut recipe = Recipe::builder("Lenient")
            .step(Echo::new("[{{ store.nothing }}]"))
            .config(RecipeConfig::default().with_missing(MissingPolicy::Empty))
            .build()
            .unwrap();

        let result = recipe.bake().await;
        assert!(result.success);
        assert_eq!(result.outputs, vec![json!("[]")]);
    }

    #[tokio::test]
    async fn test_custom_renderer() {
        let shout = |template: &str, _store: &Store| -> Result<String, TemplateError> {
            Ok(template.to_uppercase())
        };
        let mut recipe = Recipe::new("Loud", crate::steps![Echo::new("{{ hi }}")]).with_renderer(shout);

        let result = recipe.bake().await;
        assert_eq!(result.outputs, vec![json!("{{ HI }}")]);
    }

    #[tokio::test]
    async fn test_custom_grammar_without_braces() {
        let dollars = |template: &str, store: &Store| -> Result<String, TemplateError> {
            let who = store.lookup("params.who").map(stringify).unwrap_or_default();
            Ok(template.replace("${who}", &who))
        };
        let mut recipe = Recipe::new("Dollars", crate::steps![Echo::new("hi ${who}")])
            .with_renderer(dollars)
            .prepare(json!({"who": "ana"}));

        let result = recipe.bake().await;
        assert!(result.success);
        assert_eq!(result.outputs, vec![json!("hi ana")]);
    }

    #[tokio::test]
    async fn test_prepare_from_hard_failure() {
        let recipe = Recipe::new("Broken", Vec::new());
        let err = recipe.prepare_from(Fail::new("no params")).await.unwrap_err();
        match err {
            EngineError::Prepare(failures) => {
                assert_eq!(failures[0].kind, FailureKind::Execution);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_prepare_from_step_output() {
        let recipe = Recipe::new("Seeded", Vec::new())
            .prepare_from(SetValue::new("unused", json!({"env": "dev"})))
            .await
            .unwrap();
        assert_eq!(recipe.state(), RecipeState::Prepared);
        assert_eq!(recipe.store().params(), &json!({"env": "dev"}));
    }

    #[tokio::test]
    async fn test_run_result_partitions_failures() {
        let mut recipe = Recipe::new(
            "Mixed",
            crate::steps![Fail::new("soft").tolerate(), Fail::new("hard")],
        );
        let result = recipe.bake().await;

        assert!(result.aborted);
        assert!(!result.success);
        assert_eq!(result.soft_failures().count(), 1);
        assert_eq!(result.hard_failures().count(), 1);
    }
}
