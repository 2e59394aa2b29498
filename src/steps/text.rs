//! Text transforms over a string or a sequence of strings.
//!
//! Non-string items of a sequence are passed through unchanged.

use super::{resolve_subject, Subject};
use crate::error::StepError;
use crate::step::{Scope, Step, StepName, StepResult};
use crate::store::kind_of;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

/// How a text step matches: a regular expression or a literal substring.
#[derive(Debug, Clone)]
pub enum Pattern {
    Regex(Regex),
    Fixed(String),
}

impl Pattern {
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern::Regex)
    }

    pub fn fixed(needle: impl Into<String>) -> Self {
        Pattern::Fixed(needle.into())
    }

    fn replace(&self, text: &str, replacement: &str) -> String {
        match self {
            Pattern::Regex(re) => re.replace_all(text, replacement).into_owned(),
            Pattern::Fixed(needle) if needle.is_empty() => text.to_string(),
            Pattern::Fixed(needle) => text.replace(needle.as_str(), replacement),
        }
    }

    fn find_all(&self, text: &str) -> Vec<Value> {
        match self {
            Pattern::Regex(re) => re
                .find_iter(text)
                .map(|m| Value::String(m.as_str().to_string()))
                .collect(),
            Pattern::Fixed(needle) if needle.is_empty() => Vec::new(),
            Pattern::Fixed(needle) => text
                .matches(needle.as_str())
                .map(|m| Value::String(m.to_string()))
                .collect(),
        }
    }

    fn split(&self, text: &str) -> Vec<Value> {
        let parts: Vec<&str> = match self {
            Pattern::Regex(re) => re.split(text).collect(),
            Pattern::Fixed(needle) if needle.is_empty() => vec![text],
            Pattern::Fixed(needle) => text.split(needle.as_str()).collect(),
        };
        parts.into_iter().map(|p| Value::String(p.to_string())).collect()
    }
}

fn map_text(value: Value, f: impl Fn(&str) -> Value) -> Result<Value, StepError> {
    match value {
        Value::String(text) => Ok(f(&text)),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => f(&text),
                    other => other,
                })
                .collect(),
        )),
        other => Err(StepError::invalid_input(format!(
            "expected a string or a sequence of strings, got {}",
            kind_of(&other)
        ))),
    }
}

/// Changes the case of the subject.
#[derive(Debug, Clone)]
pub struct TextCase {
    subject: Subject,
    upper: bool,
}

impl TextCase {
    pub fn lower(subject: Subject) -> Self {
        Self {
            subject,
            upper: false,
        }
    }

    pub fn upper(subject: Subject) -> Self {
        Self {
            subject,
            upper: true,
        }
    }
}

#[async_trait]
impl Step for TextCase {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let upper = self.upper;
        StepResult::from_result(resolve_subject(&params, scope.store()).and_then(|subject| {
            map_text(subject, |text| {
                Value::String(if upper {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                })
            })
        }))
    }

    fn name(&self) -> StepName {
        StepName::new(if self.upper { "TextUpper" } else { "TextLower" })
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}

/// Replaces every match with a (templated) replacement.
///
/// Regex replacements may refer to groups as `$1` or `${name}`.
#[derive(Debug, Clone)]
pub struct TextReplace {
    subject: Subject,
    pattern: Pattern,
    replacement: String,
}

impl TextReplace {
    pub fn new(subject: Subject, pattern: Pattern, replacement: impl Into<String>) -> Self {
        Self {
            subject,
            pattern,
            replacement: replacement.into(),
        }
    }

    pub fn regex(
        subject: Subject,
        pattern: &str,
        replacement: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(subject, Pattern::regex(pattern)?, replacement))
    }

    pub fn fixed(subject: Subject, needle: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::new(subject, Pattern::fixed(needle), replacement)
    }
}

#[async_trait]
impl Step for TextReplace {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        let replacement = params
            .get("replacement")
            .and_then(Value::as_str)
            .unwrap_or_default();
        StepResult::from_result(resolve_subject(&params, scope.store()).and_then(|subject| {
            map_text(subject, |text| {
                Value::String(self.pattern.replace(text, replacement))
            })
        }))
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params(), "replacement": self.replacement })
    }
}

/// Outputs every match of the pattern, per string.
#[derive(Debug, Clone)]
pub struct TextFindAll {
    subject: Subject,
    pattern: Pattern,
}

impl TextFindAll {
    pub fn new(subject: Subject, pattern: Pattern) -> Self {
        Self { subject, pattern }
    }

    pub fn regex(subject: Subject, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(subject, Pattern::regex(pattern)?))
    }

    pub fn fixed(subject: Subject, needle: impl Into<String>) -> Self {
        Self::new(subject, Pattern::fixed(needle))
    }
}

#[async_trait]
impl Step for TextFindAll {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(resolve_subject(&params, scope.store()).and_then(|subject| {
            map_text(subject, |text| Value::Array(self.pattern.find_all(text)))
        }))
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}

/// Splits each string around the pattern.
#[derive(Debug, Clone)]
pub struct TextSplit {
    subject: Subject,
    pattern: Pattern,
}

impl TextSplit {
    pub fn new(subject: Subject, pattern: Pattern) -> Self {
        Self { subject, pattern }
    }

    pub fn regex(subject: Subject, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(subject, Pattern::regex(pattern)?))
    }

    pub fn fixed(subject: Subject, separator: impl Into<String>) -> Self {
        Self::new(subject, Pattern::fixed(separator))
    }
}

#[async_trait]
impl Step for TextSplit {
    async fn run(&self, params: Value, scope: &mut Scope<'_>) -> StepResult {
        StepResult::from_result(resolve_subject(&params, scope.store()).and_then(|subject| {
            map_text(subject, |text| Value::Array(self.pattern.split(text)))
        }))
    }

    fn params(&self) -> Value {
        json!({ "subject": self.subject.params() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::template::PlaceholderRenderer;

    async fn run(step: &dyn Step, store: &mut Store) -> StepResult {
        let renderer = PlaceholderRenderer::new();
        Scope::new(store, &renderer).run_step(step).await
    }

    #[tokio::test]
    async fn test_case_over_sequence_skips_non_strings() {
        let mut store = Store::new();
        store.set("names", json!(["Ana", 3, "bo"])).unwrap();

        let step = TextCase::upper(Subject::field("names"));
        let result = run(&step, &mut store).await;
        assert_eq!(result.output, json!(["ANA", 3, "BO"]));
        assert_eq!(step.name(), "TextUpper");
    }

    #[tokio::test]
    async fn test_regex_replace_with_groups() {
        let mut store = Store::new();
        store.set("suffix", json!("prod")).unwrap();

        let step = TextReplace::regex(
            Subject::value(json!("db-01.local")),
            r"^(\w+)-\d+",
            "$1-{{ store.suffix }}",
        )
        .unwrap();
        let result = run(&step, &mut store).await;
        assert_eq!(result.output, json!("db-prod.local"));
    }

    #[tokio::test]
    async fn test_fixed_replace_is_literal() {
        let mut store = Store::new();
        let step = TextReplace::fixed(Subject::value(json!("a.b.c")), ".", "/");
        let result = run(&step, &mut store).await;
        assert_eq!(result.output, json!("a/b/c"));
    }

    #[tokio::test]
    async fn test_find_all_and_split() {
        let mut store = Store::new();
        let subject = Subject::value(json!("10.0.0.1, 10.0.0.2"));

        let find = TextFindAll::regex(subject.clone(), r"\d+\.\d+\.\d+\.\d+").unwrap();
        let result = run(&find, &mut store).await;
        assert_eq!(result.output, json!(["10.0.0.1", "10.0.0.2"]));

        let split = TextSplit::regex(subject, r",\s*").unwrap();
        let result = run(&split, &mut store).await;
        assert_eq!(result.output, json!(["10.0.0.1", "10.0.0.2"]));
    }

    #[test]
    fn test_invalid_regex_is_rejected_at_construction() {
        assert!(TextSplit::regex(Subject::field("x"), "(").is_err());
    }

    #[tokio::test]
    async fn test_non_text_subject_fails() {
        let mut store = Store::new();
        let step = TextSplit::fixed(Subject::value(json!({"a": 1})), ",");
        let result = run(&step, &mut store).await;
        assert!(result.is_hard());
    }
}
