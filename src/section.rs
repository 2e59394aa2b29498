use crate::failure::Frame;
use crate::step::{Scope, Step, StepName, StepResult};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// A step made of an ordered list of steps, run against the same store.
///
/// SOFT failures of children are collected and the next child runs. The
/// first HARD failure skips the remaining children and fails the section
/// HARD. The output is the sequence of outputs of the children that ran.
///
/// # Examples
///
/// ```
/// use batter::prelude::*;
/// use batter::steps::base::SetValue;
/// use serde_json::json;
///
/// let section = Section::new(
///     "Defaults",
///     steps![
///         SetValue::new("region", json!("eu")),
///         SetValue::new("replicas", json!(3)),
///     ],
/// );
/// assert_eq!(section.len(), 2);
/// ```
pub struct Section {
    title: StepName,
    steps: Vec<Box<dyn Step>>,
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("title", &self.title)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Section {
    pub fn new(title: impl Into<StepName>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            title: title.into(),
            steps,
        }
    }

    pub fn add_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Step for Section {
    async fn run(&self, _params: Value, scope: &mut Scope<'_>) -> StepResult {
        let outcome = scope.run_sequence(&self.steps).await;
        outcome.into_result(Frame::Section {
            name: self.title.clone(),
        })
    }

    fn name(&self) -> StepName {
        self.title.clone()
    }

    fn children(&self) -> Vec<&dyn Step> {
        self.steps.iter().map(|s| s.as_ref()).collect()
    }

    fn is_container(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureClass, FailureKind};
    use crate::steps::base::{Fail, SetValue, ShortCircuit};
    use crate::steps::validate::{Assert, Subject};
    use crate::store::Store;
    use crate::template::PlaceholderRenderer;
    use serde_json::json;

    async fn run(section: &Section, store: &mut Store) -> StepResult {
        let renderer = PlaceholderRenderer::new();
        let mut scope = Scope::new(store, &renderer);
        scope.run_step(section).await
    }

    #[tokio::test]
    async fn test_section_shares_the_store() {
        let section = Section::new(
            "Setup",
            crate::steps![
                SetValue::new("a", json!(1)),
                SetValue::new("b", json!("{{ store.a }}")),
            ],
        );
        let mut store = Store::new();
        let result = run(&section, &mut store).await;

        assert!(result.is_success());
        assert_eq!(result.output, json!([1, "1"]));
        assert_eq!(store.get("b"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_soft_failure_continues() {
        let section = Section::new(
            "Checks",
            crate::steps![
                Assert::not_empty(Subject::value(json!([]))),
                SetValue::new("after", json!(true)),
            ],
        );
        let mut store = Store::new();
        let result = run(&section, &mut store).await;

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].class, FailureClass::Soft);
        assert_eq!(
            result.failures[0].trace,
            vec![Frame::Section {
                name: StepName::new("Checks")
            }]
        );
        assert_eq!(store.get("after"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_hard_failure_short_circuits() {
        let section = Section::new(
            "Critical",
            crate::steps![Fail::new("stop here"), SetValue::new("after", json!(true))],
        );
        let mut store = Store::new();
        let result = run(&section, &mut store).await;

        assert!(result.is_hard());
        assert_eq!(result.failures[0].kind, FailureKind::Execution);
        assert_eq!(result.output, json!([null]));
        assert!(!store.contains_key("after"));
    }

    #[tokio::test]
    async fn test_halt_stays_inside_the_section() {
        let section = Section::new(
            "Maybe",
            crate::steps![
                ShortCircuit::always(),
                SetValue::new("skipped", json!(true)),
            ],
        );
        let mut store = Store::new();
        let result = run(&section, &mut store).await;

        assert!(result.is_success());
        assert!(!result.halt);
        assert!(!store.contains_key("skipped"));
    }

    #[test]
    fn test_section_children() {
        let section = Section::new("Empty", Vec::new()).add_step(SetValue::new("a", json!(1)));
        assert_eq!(section.len(), 1);
        assert_eq!(section.children().len(), 1);
        assert_eq!(section.name(), StepName::new("Empty"));
    }
}
