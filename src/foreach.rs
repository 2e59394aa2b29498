use crate::failure::{Failure, FailureKind, Frame};
use crate::step::{Scope, Step, StepName, StepResult};
use crate::store::kind_of;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

/// Default name of the per-iteration binding.
pub const LOOP_BINDING: &str = "loop";

/// Runs a body step once per item of a collection found in the store.
///
/// Each iteration sees `{{ store.loop.item }}` and `{{ store.loop.index }}`
/// (or the name set with [`ForEach::binding`]). The binding shadows the
/// store only for the duration of the iteration; writes made by the body go
/// to the shared store. A short circuit in the body ends only the current
/// iteration.
///
/// # Examples
///
/// ```
/// use batter::prelude::*;
/// use batter::steps::base::Echo;
///
/// let each = ForEach::over(
///     "store.params.hosts",
///     Echo::new("deploying {{ store.host.item }}"),
/// )
/// .binding("host");
/// assert_eq!(each.name().as_str(), "ForEach");
/// ```
pub struct ForEach {
    title: StepName,
    source: Value,
    body: Box<dyn Step>,
    binding: String,
}

impl fmt::Debug for ForEach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEach")
            .field("title", &self.title)
            .field("source", &self.source)
            .field("body", &self.body.name())
            .field("binding", &self.binding)
            .finish()
    }
}

impl ForEach {
    /// Iterates whatever `source` renders to: a sequence, a mapping, or a
    /// string holding JSON for one of those.
    pub fn new<S: Step + 'static>(source: impl Into<Value>, body: S) -> Self {
        Self {
            title: StepName::new("ForEach"),
            source: source.into(),
            body: Box::new(body),
            binding: LOOP_BINDING.to_string(),
        }
    }

    /// Iterates the value at a `store.` path.
    pub fn over<S: Step + 'static>(path: &str, body: S) -> Self {
        Self::new(format!("{{{{ {} | tojson }}}}", path), body)
    }

    pub fn titled(mut self, title: impl Into<StepName>) -> Self {
        self.title = title.into();
        self
    }

    /// Name under which the current item and index are bound.
    pub fn binding(mut self, name: impl Into<String>) -> Self {
        self.binding = name.into();
        self
    }
}

fn iteration_items(source: Value) -> Result<Vec<Value>, String> {
    match source {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| json!({"key": key, "value": value}))
            .collect()),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded @ (Value::Array(_) | Value::Object(_))) => iteration_items(decoded),
            _ => Err(format!("source is not iterable: {:?}", text)),
        },
        other => Err(format!("source is not iterable: {}", kind_of(&other))),
    }
}

#[async_trait]
impl Step for ForEach {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let source = match params {
            Value::Object(mut map) => map.remove("source").unwrap_or(Value::Null),
            other => other,
        };
        let items = match iteration_items(source) {
            Ok(items) => items,
            Err(message) => {
                return StepResult::failed(Failure::hard(FailureKind::IterationSource, message))
            }
        };
        debug!("'{}' iterating over {} item(s)", self.title, items.len());

        let mut outputs = Vec::with_capacity(items.len());
        let mut failures = Vec::new();
        let total = items.len();

        for (index, item) in items.into_iter().enumerate() {
            scope.bind(&self.binding, json!({"item": item, "index": index}));
            let result = scope.run_step(self.body.as_ref()).await;
            scope.unbind();

            let hard = result.is_hard();
            if result.halt {
                debug!("'{}' short-circuited iteration {}", self.title, index);
            }
            outputs.push(result.output);
            failures.extend(result.failures.into_iter().map(|mut failure| {
                failure.push_frame(Frame::Iteration {
                    name: self.title.clone(),
                    index,
                });
                failure
            }));

            if hard {
                warn!(
                    "'{}' aborted at iteration {}, skipping {} iteration(s)",
                    self.title,
                    index,
                    total - index - 1
                );
                break;
            }
        }

        StepResult {
            output: Value::Array(outputs),
            failures,
            halt: false,
        }
    }

    fn name(&self) -> StepName {
        self.title.clone()
    }

    fn params(&self) -> Value {
        json!({ "source": self.source })
    }

    fn children(&self) -> Vec<&dyn Step> {
        vec![self.body.as_ref()]
    }

    fn is_container(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::failure::FailureClass;
    use crate::section::Section;
    use crate::steps::base::{Echo, FnStep, ShortCircuit};
    use crate::steps::validate::{Assert, Predicate, Require, Subject};
    use crate::store::Store;
    use crate::template::PlaceholderRenderer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn run(step: &dyn Step, params: Value) -> (StepResult, Store) {
        let mut store = Store::new();
        store.replace("params", params).unwrap();
        let renderer = PlaceholderRenderer::new();
        let result = Scope::new(&mut store, &renderer).run_step(step).await;
        (result, store)
    }

    #[tokio::test]
    async fn test_iterates_in_order_with_binding() {
        let each = ForEach::over("store.params.hosts", Echo::new("{{ store.loop.index }}:{{ store.loop.item }}"));
        let (result, store) = run(&each, json!({"hosts": ["a", "b", "c"]})).await;

        assert!(result.is_success());
        assert_eq!(result.output, json!(["0:a", "1:b", "2:c"]));
        assert!(store.get(LOOP_BINDING).is_none());
    }

    #[tokio::test]
    async fn test_empty_source_does_not_run_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = FnStep::new(move |_params, _store| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let each = ForEach::over("store.params.items", body);
        let (result, _) = run(&each, json!({"items": []})).await;

        assert!(result.is_success());
        assert_eq!(result.output, json!([]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hard_failure_stops_at_failing_index() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = FnStep::new(move |_params, store| {
            counter.fetch_add(1, Ordering::SeqCst);
            let item = store.lookup("loop.item")?.clone();
            if item == json!(3) {
                return Err(StepError::execution("three is not allowed"));
            }
            Ok(item)
        });
        let each = ForEach::over("store.params.items", body).titled("Numbers");
        let (result, _) = run(&each, json!({"items": [1, 2, 3, 4, 5]})).await;

        assert!(result.is_hard());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.output, json!([1, 2, null]));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].iteration(), Some(2));
        assert_eq!(
            result.failures[0].to_string(),
            "[HARD] Numbers[2] > FnStep: three is not allowed"
        );
    }

    #[tokio::test]
    async fn test_soft_failures_are_concatenated() {
        let each = ForEach::over(
            "store.params.lists",
            Assert::empty(Subject::value(json!("{{ store.loop.item | tojson }}"))),
        );
        let (result, _) = run(&each, json!({"lists": [[1], [], [2, 3]]})).await;

        assert_eq!(result.failures.len(), 2);
        assert!(result.failures.iter().all(|f| f.class == FailureClass::Soft));
        assert_eq!(result.failures[0].iteration(), Some(0));
        assert_eq!(result.failures[1].iteration(), Some(2));
        assert_eq!(result.output, json!([[1], [], [2, 3]]));
    }

    #[tokio::test]
    async fn test_non_iterable_source_fails_hard() {
        let each = ForEach::over("store.params.n", Echo::new("x"));
        let (result, _) = run(&each, json!({"n": 5})).await;

        assert!(result.is_hard());
        assert_eq!(result.failures[0].kind, FailureKind::IterationSource);
    }

    #[tokio::test]
    async fn test_mapping_source_and_nested_bindings() {
        let inner = ForEach::over(
            "store.outer.item.value",
            Echo::new("{{ store.outer.item.key }}={{ store.loop.item }}"),
        );
        let outer = ForEach::over("store.params.groups", inner).binding("outer");
        let (result, _) = run(&outer, json!({"groups": {"a": [1, 2], "b": [3]}})).await;

        assert!(result.is_success());
        assert_eq!(result.output, json!([["a=1", "a=2"], ["b=3"]]));
    }

    #[tokio::test]
    async fn test_section_body_hard_failure_unwinds_both_levels() {
        let body = Section::new(
            "Check",
            crate::steps![
                Echo::new("{{ store.loop.item }}"),
                Require::greater_than(Subject::value(json!("{{ store.loop.item | tojson }}")), 1.0),
                Echo::new("after"),
            ],
        );
        let each = ForEach::over("store.params.items", body).titled("Items");
        let (result, _) = run(&each, json!({"items": [5, 0, 7]})).await;

        assert!(result.is_hard());
        assert_eq!(result.output, json!([["5", 5, "after"], ["0", 0]]));
        let failure = &result.failures[0];
        assert_eq!(failure.iteration(), Some(1));
        assert_eq!(
            failure.trace,
            vec![
                Frame::Section {
                    name: StepName::new("Check")
                },
                Frame::Iteration {
                    name: StepName::new("Items"),
                    index: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_ends_only_the_current_iteration() {
        let body = Section::new(
            "Maybe",
            crate::steps![
                ShortCircuit::when(
                    Subject::value(json!("{{ store.loop.item }}")),
                    Predicate::Equal(json!(1)),
                ),
                Echo::new("ran {{ store.loop.item }}"),
            ],
        );
        let each = ForEach::over("store.params.items", body);
        let (result, _) = run(&each, json!({"items": [1, 2, 3]})).await;

        assert!(result.is_success());
        assert!(!result.halt);
        assert_eq!(
            result.output,
            json!([[true], [false, "ran 2"], [false, "ran 3"]])
        );
    }

    #[tokio::test]
    async fn test_short_circuit_body_runs_every_iteration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = Section::new(
            "Halting",
            crate::steps![
                FnStep::new(move |_params, _store| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }),
                ShortCircuit::always(),
                Echo::new("never"),
            ],
        );
        let each = ForEach::over("store.params.items", body);
        let (result, _) = run(&each, json!({"items": ["a", "b", "c"]})).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.output, json!([[null, true], [null, true], [null, true]]));
    }
}
