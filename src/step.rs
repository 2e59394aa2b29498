use crate::error::{StepError, StoreError, TemplateError};
use crate::failure::{Failure, FailureKind, Frame};
use crate::resource::{Resource, ResourceHandle, TraceEntry, TraceLevel};
use crate::store::Store;
use crate::template::{render_value, Renderer};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use batter::StepName;
///
/// let name = StepName::new("LoadSettings");
/// assert_eq!(name.as_str(), "LoadSettings");
///
/// let name: StepName = "Validate".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a StepName from a type's name (last path segment, generics dropped)
    pub fn from_type_name<T: ?Sized>() -> Self {
        let full_name = std::any::type_name::<T>();
        let base = full_name.split('<').next().unwrap_or(full_name);
        let short_name = base.rsplit("::").next().unwrap_or("UnknownStep");
        Self::new(short_name)
    }

    /// Returns the step name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// What a step produced: an output value and the failures it recorded.
///
/// A result with no failures is a success. A result may carry an output
/// and soft failures at the same time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepResult {
    pub output: Value,
    pub failures: Vec<Failure>,
    /// Stop the enclosing sequence without recording a failure.
    pub halt: bool,
}

impl StepResult {
    pub fn ok(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    /// The output is kept and a SOFT failure is recorded.
    pub fn soft(output: Value, kind: FailureKind, message: impl Into<String>) -> Self {
        Self::ok(output).with_failure(Failure::soft(kind, message))
    }

    /// A HARD failure with a null output.
    pub fn hard(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::failed(Failure::hard(kind, message))
    }

    pub fn failed(failure: Failure) -> Self {
        Self::ok(Value::Null).with_failure(failure)
    }

    /// Halts the enclosing sequence after this step.
    pub fn halted(output: Value) -> Self {
        Self {
            output,
            halt: true,
            ..Self::default()
        }
    }

    /// Maps `Err` to a HARD `Execution` failure.
    pub fn from_result(result: Result<Value, StepError>) -> Self {
        match result {
            Ok(output) => Self::ok(output),
            Err(e) => Self::hard(FailureKind::Execution, e.to_string()),
        }
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_hard(&self) -> bool {
        self.failures.iter().any(Failure::is_hard)
    }
}

/// A unit of work in a recipe.
///
/// `params` returns the step's templated configuration; the engine renders
/// it against the store right before `run` and passes the rendered value in.
/// Steps read the store through the [`Scope`] and stage writes with
/// [`Scope::set`] or [`Scope::replace`]; staged writes are committed after
/// `run` returns, so a step never observes its own writes.
///
/// # Examples
///
/// ```
/// use batter::prelude::*;
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// #[derive(Debug)]
/// struct Greet;
///
/// #[async_trait]
/// impl Step for Greet {
///     fn params(&self) -> Value {
///         json!("Hello {{ store.params.name }}")
///     }
///
///     async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
///         scope.set("greeting", params.clone());
///         StepResult::ok(params)
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Executes the step with its rendered parameters.
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult;

    /// Returns the step name.
    ///
    /// By default, uses the type name. Override to provide a custom name.
    fn name(&self) -> StepName {
        StepName::from_type_name::<Self>()
    }

    /// Templated configuration rendered before each run.
    fn params(&self) -> Value {
        Value::Null
    }

    /// Store key the engine writes the output under after a non-hard run.
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Nested steps, used when analysing a recipe.
    fn children(&self) -> Vec<&dyn Step> {
        Vec::new()
    }

    /// Whether the step is a section or loop running its children itself.
    ///
    /// Wrappers delegate to the wrapped step.
    fn is_container(&self) -> bool {
        false
    }

    /// Called after a run without failures.
    async fn on_success(&self, _store: &Store) -> Result<(), StepError> {
        Ok(())
    }

    /// Called after a run that recorded failures.
    async fn on_failure(&self, _store: &Store, _failures: &[Failure]) -> Result<(), StepError> {
        Ok(())
    }
}

#[derive(Debug)]
struct StagedWrite {
    key: String,
    value: Value,
    checked: bool,
}

/// Outcome of running an ordered list of steps.
#[derive(Debug, Clone, Default)]
pub struct SequenceOutcome {
    /// Outputs of the steps that ran, in order.
    pub outputs: Vec<Value>,
    pub failures: Vec<Failure>,
    /// A HARD failure stopped the sequence.
    pub aborted: bool,
    /// A step asked to stop the sequence.
    pub halted: bool,
}

impl SequenceOutcome {
    /// Turns the outcome into the result of the composite step that ran it,
    /// tagging every failure with `frame`.
    pub fn into_result(self, frame: Frame) -> StepResult {
        let mut failures = self.failures;
        for failure in &mut failures {
            failure.push_frame(frame.clone());
        }
        StepResult {
            output: Value::Array(self.outputs),
            failures,
            halt: false,
        }
    }
}

/// Execution handle given to a running step.
pub struct Scope<'a> {
    store: &'a mut Store,
    renderer: &'a dyn Renderer,
    staged: Vec<StagedWrite>,
    provided: Vec<(String, ResourceHandle)>,
    traces: Vec<TraceEntry>,
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("store", &self.store)
            .field("staged", &self.staged)
            .field("provided", &self.provided)
            .field("traces", &self.traces)
            .finish()
    }
}

impl<'a> Scope<'a> {
    pub fn new(store: &'a mut Store, renderer: &'a dyn Renderer) -> Self {
        Self {
            store,
            renderer,
            staged: Vec::new(),
            provided: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// Read access to the store as of the start of the current step.
    pub fn store(&self) -> &Store {
        &*self.store
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer
    }

    pub fn lookup(&self, path: &str) -> Result<&Value, StoreError> {
        self.store.lookup(path)
    }

    /// Stages a checked write, committed when the current step completes.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.stage(key.into(), value, true);
    }

    /// Stages an unchecked overwrite, committed when the current step completes.
    pub fn replace(&mut self, key: impl Into<String>, value: Value) {
        self.stage(key.into(), value, false);
    }

    /// Declares a named resource, registered with the step's writes.
    ///
    /// A resource of a step that fails HARD is closed instead.
    pub fn provide<R: Resource + 'static>(&mut self, name: impl Into<String>, resource: R) {
        let name = name.into();
        debug!("Staging resource '{}'", name);
        self.provided.push((name, ResourceHandle::new(resource)));
    }

    /// The resource named `name`, if one of type `R` was declared.
    pub fn resource<R: Resource + 'static>(&self, name: &str) -> Option<Arc<R>> {
        self.store.resource(name)
    }

    /// Records a line reported in [`RunResult::traces`](crate::RunResult::traces).
    pub fn trace(&mut self, level: TraceLevel, message: impl Into<String>) {
        self.traces.push(TraceEntry::new(level, message));
    }

    /// Renders `value` against the current store.
    pub fn render(&self, value: &Value) -> Result<Value, TemplateError> {
        render_value(self.renderer, value, &*self.store)
    }

    /// Renders, runs and commits a single step.
    pub async fn run_step(&mut self, step: &dyn Step) -> StepResult {
        let name = step.name();

        let params = match render_value(self.renderer, &step.params(), &*self.store) {
            Ok(params) => params,
            Err(e) => {
                warn!("Step '{}' could not render its parameters: {}", name, e);
                let result = StepResult::failed(
                    Failure::hard(FailureKind::Template, e.to_string()).with_step(name),
                );
                if let Err(e) = step.on_failure(&*self.store, &result.failures).await {
                    warn!("Error in on_failure handler: {}", e);
                }
                return result;
            }
        };

        debug!("Running step '{}'", name);
        let (mut result, staged, provided, traces) = {
            let mut child = Scope::new(&mut *self.store, self.renderer);
            let result = step.run(params, &mut child).await;
            (result, child.staged, child.provided, child.traces)
        };

        for failure in &mut result.failures {
            if failure.step.is_none() {
                failure.step = Some(name.clone());
            }
        }
        for mut entry in traces {
            if entry.step.is_none() {
                entry.step = Some(name.clone());
            }
            log_trace(&entry);
            self.store.push_trace(entry);
        }

        let committed = if result.is_hard() {
            if !staged.is_empty() {
                debug!("Discarding {} staged write(s) of step '{}'", staged.len(), name);
            }
            false
        } else {
            match commit(&mut *self.store, staged, &provided, step.output_key(), &result.output) {
                Ok(()) => true,
                Err(e) => {
                    result
                        .failures
                        .push(Failure::hard(FailureKind::Store, e.to_string()).with_step(name.clone()));
                    false
                }
            }
        };
        if !committed {
            for (resource, handle) in provided {
                if let Err(e) = handle.close().await {
                    warn!("Error closing discarded resource '{}': {}", resource, e);
                }
            }
        }

        if result.is_success() {
            info!("Step '{}' completed successfully", name);
            if let Err(e) = step.on_success(&*self.store).await {
                warn!("Error in on_success handler: {}", e);
            }
        } else {
            for failure in result.failures.iter().filter(|f| f.step.as_ref() == Some(&name)) {
                warn!("Step '{}' failed: {}", name, failure);
            }
            if let Err(e) = step.on_failure(&*self.store, &result.failures).await {
                warn!("Error in on_failure handler: {}", e);
            }
        }
        result
    }

    /// Runs steps in order, continuing past SOFT failures and stopping at the
    /// first HARD failure or halt.
    pub async fn run_sequence(&mut self, steps: &[Box<dyn Step>]) -> SequenceOutcome {
        let mut outcome = SequenceOutcome::default();

        for (position, step) in steps.iter().enumerate() {
            let result = self.run_step(step.as_ref()).await;
            let hard = result.is_hard();
            let halt = result.halt;
            outcome.outputs.push(result.output);
            outcome.failures.extend(result.failures);

            let remaining = steps.len() - position - 1;
            if hard {
                outcome.aborted = true;
                if remaining > 0 {
                    warn!("Aborting after '{}', skipping {} step(s)", step.name(), remaining);
                }
                break;
            }
            if halt {
                outcome.halted = true;
                debug!("Short circuit at '{}', skipping {} step(s)", step.name(), remaining);
                break;
            }
        }
        outcome
    }

    pub(crate) fn bind(&mut self, name: &str, value: Value) {
        self.store.push_binding(name, value);
    }

    pub(crate) fn unbind(&mut self) {
        self.store.pop_binding();
    }

    fn stage(&mut self, key: String, value: Value, checked: bool) {
        debug!("Staging write to '{}'", key);
        self.staged.push(StagedWrite {
            key,
            value,
            checked,
        });
    }
}

/// Applies every staged write, resource and the output, or none of them.
fn commit(
    store: &mut Store,
    staged: Vec<StagedWrite>,
    provided: &[(String, ResourceHandle)],
    output_key: Option<&str>,
    output: &Value,
) -> Result<(), StoreError> {
    if staged.is_empty() && provided.is_empty() && output_key.is_none() {
        return Ok(());
    }

    let mut next = store.clone();
    for write in staged {
        if write.checked {
            next.set(&write.key, write.value)?;
        } else {
            next.replace(&write.key, write.value)?;
        }
    }
    for (name, handle) in provided {
        next.add_resource(name.clone(), handle.clone())?;
    }
    if let Some(key) = output_key {
        next.set(key, output.clone())?;
    }
    *store = next;
    Ok(())
}

fn log_trace(entry: &TraceEntry) {
    match entry.level {
        TraceLevel::Debug => debug!("{}", entry),
        TraceLevel::Info => info!("{}", entry),
        TraceLevel::Warn => warn!("{}", entry),
    }
}

/// Combinators available on every step.
pub trait StepExt: Step + Sized + 'static {
    /// Writes the step's output under `key` after each non-hard run.
    fn store_as(self, key: impl Into<String>) -> Stored<Self> {
        Stored {
            inner: self,
            key: key.into(),
        }
    }

    /// Overrides the step name.
    fn titled(self, title: impl Into<String>) -> Titled<Self> {
        Titled {
            inner: self,
            title: StepName::new(title),
        }
    }

    /// Downgrades every HARD failure of the step to SOFT.
    fn tolerate(self) -> crate::steps::base::Tolerate<Self> {
        crate::steps::base::Tolerate::new(self)
    }

    fn boxed(self) -> Box<dyn Step> {
        Box::new(self)
    }
}

impl<S: Step + 'static> StepExt for S {}

/// See [`StepExt::store_as`].
#[derive(Debug)]
pub struct Stored<S> {
    inner: S,
    key: String,
}

#[async_trait]
impl<S: Step> Step for Stored<S> {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        self.inner.run(params, scope).await
    }

    fn name(&self) -> StepName {
        self.inner.name()
    }

    fn params(&self) -> Value {
        self.inner.params()
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.key)
    }

    fn children(&self) -> Vec<&dyn Step> {
        self.inner.children()
    }

    fn is_container(&self) -> bool {
        self.inner.is_container()
    }

    async fn on_success(&self, store: &Store) -> Result<(), StepError> {
        self.inner.on_success(store).await
    }

    async fn on_failure(&self, store: &Store, failures: &[Failure]) -> Result<(), StepError> {
        self.inner.on_failure(store, failures).await
    }
}

/// See [`StepExt::titled`].
#[derive(Debug)]
pub struct Titled<S> {
    inner: S,
    title: StepName,
}

#[async_trait]
impl<S: Step> Step for Titled<S> {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        self.inner.run(params, scope).await
    }

    fn name(&self) -> StepName {
        self.title.clone()
    }

    fn params(&self) -> Value {
        self.inner.params()
    }

    fn output_key(&self) -> Option<&str> {
        self.inner.output_key()
    }

    fn children(&self) -> Vec<&dyn Step> {
        self.inner.children()
    }

    fn is_container(&self) -> bool {
        self.inner.is_container()
    }

    async fn on_success(&self, store: &Store) -> Result<(), StepError> {
        self.inner.on_success(store).await
    }

    async fn on_failure(&self, store: &Store, failures: &[Failure]) -> Result<(), StepError> {
        self.inner.on_failure(store, failures).await
    }
}
