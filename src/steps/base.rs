use super::resolve_subject;
use crate::error::StepError;
use crate::failure::{FailureClass, FailureKind};
use crate::resource::{Resource, TraceLevel};
use crate::step::{Scope, Step, StepName, StepResult};
use crate::steps::validate::{Predicate, Subject};
use crate::store::Store;
use crate::template::stringify;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Overwrites a store key with a rendered value and outputs that value.
///
/// Uses [`Store::replace`], so the previous kind of the key does not matter.
#[derive(Debug, Clone)]
pub struct SetValue {
    key: String,
    value: Value,
}

impl SetValue {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl Step for SetValue {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let key = match params.get("key") {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            _ => return StepResult::from_result(Err(StepError::invalid_input("empty key"))),
        };
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        scope.replace(key, value.clone());
        StepResult::ok(value)
    }

    fn params(&self) -> Value {
        json!({ "key": self.key, "value": self.value })
    }
}

type StepFn = dyn Fn(&Value, &Store) -> Result<Value, StepError> + Send + Sync;

/// A step backed by a closure over its rendered params and the store.
///
/// An `Err` from the closure is a HARD `Execution` failure.
///
/// # Examples
///
/// ```
/// use batter::steps::base::FnStep;
/// use serde_json::{json, Value};
///
/// let double = FnStep::new(|params: &Value, _store: &batter::Store| {
///     Ok(json!(params.as_i64().unwrap_or(0) * 2))
/// })
/// .with_params(json!("{{ store.params.n }}"));
/// ```
pub struct FnStep {
    func: Box<StepFn>,
    params: Value,
}

impl FnStep {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value, &Store) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
            params: Value::Null,
        }
    }

    /// Templated params passed to the closure after rendering.
    pub fn with_params(mut self, params: impl Into<Value>) -> Self {
        self.params = params.into();
        self
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Step for FnStep {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result((self.func)(&params, scope.store()))
    }

    fn params(&self) -> Value {
        self.params.clone()
    }
}

/// Renders a message, logs it and outputs it.
#[derive(Debug, Clone)]
pub struct Echo {
    message: String,
}

impl Echo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Step for Echo {
    async fn run(&self, params: Value, _scope: &mut Scope<'_>) -> StepResult {
        let message = stringify(&params);
        info!("{}", message);
        StepResult::ok(Value::String(message))
    }

    fn params(&self) -> Value {
        Value::String(self.message.clone())
    }
}

/// Always fails HARD with a rendered message.
#[derive(Debug, Clone)]
pub struct Fail {
    message: String,
}

impl Fail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Step for Fail {
    async fn run(&self, params: Value, _scope: &mut Scope<'_>) -> StepResult {
        StepResult::hard(FailureKind::Execution, stringify(&params))
    }

    fn params(&self) -> Value {
        Value::String(self.message.clone())
    }
}

/// Stops the enclosing sequence, without a failure, when its condition holds.
///
/// Only the innermost container (section, recipe or for-each) is stopped.
#[derive(Debug, Clone)]
pub struct ShortCircuit {
    condition: Option<(Subject, Predicate)>,
}

impl ShortCircuit {
    pub fn always() -> Self {
        Self { condition: None }
    }

    pub fn when(subject: Subject, predicate: Predicate) -> Self {
        Self {
            condition: Some((subject, predicate)),
        }
    }
}

#[async_trait]
impl Step for ShortCircuit {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let Some((_, predicate)) = &self.condition else {
            return StepResult::halted(Value::Bool(true));
        };
        let holds = resolve_subject(&params, scope.store()).and_then(|subject| {
            let operand = params.get("operand").unwrap_or(&Value::Null);
            predicate.evaluate(&subject, operand)
        });
        match holds {
            Ok(true) => StepResult::halted(Value::Bool(true)),
            Ok(false) => StepResult::ok(Value::Bool(false)),
            Err(e) => StepResult::from_result(Err(e)),
        }
    }

    fn params(&self) -> Value {
        match &self.condition {
            Some((subject, predicate)) => json!({
                "subject": subject.params(),
                "operand": predicate.operand(),
            }),
            None => Value::Null,
        }
    }
}

/// Records its rendered message as a trace of the run.
///
/// A message that renders to a sequence records one entry per element. The
/// output is the rendered message.
///
/// # Examples
///
/// ```
/// use batter::prelude::*;
/// use batter::steps::base::Trace;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut recipe = Recipe::new(
///     "Traced",
///     steps![Trace::new("region is {{ store.params.region }}")],
/// )
/// .prepare(json!({"region": "eu"}));
///
/// let result = recipe.bake().await;
/// assert_eq!(result.traces[0].message, "region is eu");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Trace {
    message: Value,
    level: TraceLevel,
}

impl Trace {
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            message: message.into(),
            level: TraceLevel::Info,
        }
    }

    pub fn level(mut self, level: TraceLevel) -> Self {
        self.level = level;
        self
    }
}

#[async_trait]
impl Step for Trace {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        match &params {
            Value::Array(lines) => {
                for line in lines {
                    scope.trace(self.level, stringify(line));
                }
            }
            other => scope.trace(self.level, stringify(other)),
        }
        StepResult::ok(params)
    }

    fn params(&self) -> Value {
        self.message.clone()
    }
}

type ResourceFactory<R> = dyn Fn(&Value) -> Result<R, StepError> + Send + Sync;

/// Builds a named resource from its rendered configuration and shares it
/// with the rest of the recipe.
///
/// The output is the rendered configuration. Declaring a name twice in one
/// run is a HARD `Store` failure; a factory error is a HARD `Execution`
/// failure.
pub struct DeclareResource<R> {
    name: String,
    config: Value,
    factory: Box<ResourceFactory<R>>,
}

impl<R: Resource + 'static> DeclareResource<R> {
    pub fn new<F>(name: impl Into<String>, config: impl Into<Value>, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<R, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config: config.into(),
            factory: Box::new(factory),
        }
    }
}

impl<R> fmt::Debug for DeclareResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclareResource")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R: Resource + 'static> Step for DeclareResource<R> {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let name = match params.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => return StepResult::from_result(Err(StepError::invalid_input("empty resource name"))),
        };
        let config = params.get("config").cloned().unwrap_or(Value::Null);
        match (self.factory)(&config) {
            Ok(resource) => {
                scope.trace(TraceLevel::Info, format!("{} {:?}", name, resource));
                scope.provide(name, resource);
                StepResult::ok(config)
            }
            Err(e) => StepResult::from_result(Err(e)),
        }
    }

    fn name(&self) -> StepName {
        StepName::new("DeclareResource")
    }

    fn params(&self) -> Value {
        json!({ "name": self.name, "config": self.config })
    }
}

/// Reads a file and outputs its content.
///
/// Files ending in `.json` are decoded. With [`ReadFile::render_content`]
/// the content is first rendered as a template against the store.
#[derive(Debug, Clone)]
pub struct ReadFile {
    path: String,
    render: bool,
}

impl ReadFile {
    /// `path` may contain placeholders.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            render: false,
        }
    }

    pub fn render_content(mut self) -> Self {
        self.render = true;
        self
    }
}

#[async_trait]
impl Step for ReadFile {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let path = stringify(&params);
        debug!("Reading '{}'", path);
        let mut content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return StepResult::from_result(Err(StepError::Io {
                    path,
                    details: e.to_string(),
                }))
            }
        };

        if self.render {
            content = match scope.renderer().render(&content, scope.store()) {
                Ok(rendered) => rendered,
                Err(e) => return StepResult::hard(FailureKind::Template, e.to_string()),
            };
        }

        let is_json = Path::new(&path)
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return StepResult::ok(Value::String(content));
        }
        StepResult::from_result(serde_json::from_str(&content).map_err(|e| {
            StepError::invalid_input(format!("'{}' is not valid JSON: {}", path, e))
        }))
    }

    fn params(&self) -> Value {
        Value::String(self.path.clone())
    }
}

/// Runs a step and downgrades every HARD failure it records to SOFT.
///
/// The wrapped step is run as its own step: its params are rendered, its
/// writes committed and its hooks called as usual. Writes of a failed run
/// are still discarded.
#[derive(Debug)]
pub struct Tolerate<S> {
    inner: S,
}

impl<S: Step> Tolerate<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: Step> Step for Tolerate<S> {
    async fn run(&self, _params: Value, scope: &mut Scope<'_>) -> StepResult {
        let mut result = scope.run_step(&self.inner).await;
        for failure in result.failures.iter_mut().filter(|f| f.is_hard()) {
            debug!("Tolerating failure: {}", failure);
            failure.class = FailureClass::Soft;
        }
        result
    }

    fn name(&self) -> StepName {
        self.inner.name()
    }

    fn children(&self) -> Vec<&dyn Step> {
        self.inner.children()
    }

    fn is_container(&self) -> bool {
        self.inner.is_container()
    }
}
