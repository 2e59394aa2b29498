//! Placeholder rendering against the store.
//!
//! The engine only depends on the [`Renderer`] trait; [`PlaceholderRenderer`]
//! is the grammar used when none is injected:
//!
//! ```text
//! {{ store.params.namespace }}
//! {{ store.hosts | tojson }}
//! {{ store.params.region | default("eu-west-1") | upper }}
//! ```

use crate::error::TemplateError;
use crate::store::{descend, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Root every placeholder path starts from.
pub const STORE_ROOT: &str = "store";

/// Renders a template string against the store.
///
/// Any `Fn(&str, &Store) -> Result<String, TemplateError>` is a renderer, so
/// the expression grammar can be swapped without touching the engine.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, store: &Store) -> Result<String, TemplateError>;
}

impl<F> Renderer for F
where
    F: Fn(&str, &Store) -> Result<String, TemplateError> + Send + Sync,
{
    fn render(&self, template: &str, store: &Store) -> Result<String, TemplateError> {
        self(template, store)
    }
}

/// What to do when a placeholder references a missing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Return [`TemplateError::Unresolved`]; the owning step fails HARD.
    #[default]
    Fail,
    /// Substitute the empty string.
    Empty,
}

/// The default `{{ store.path | filter }}` renderer.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer {
    on_missing: MissingPolicy,
}

impl PlaceholderRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing(on_missing: MissingPolicy) -> Self {
        Self { on_missing }
    }

    pub fn on_missing(&self) -> MissingPolicy {
        self.on_missing
    }

    /// Evaluates one expression. `Ok(None)` means the path did not resolve
    /// and no `default` filter supplied a value.
    ///
    /// Filters other than `default` are skipped while the value is missing.
    pub fn evaluate(&self, expression: &str, store: &Store) -> Result<Option<Value>, TemplateError> {
        let mut parts = split_pipes(expression).into_iter();
        let path = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| TemplateError::Syntax(expression.to_string()))?;

        let mut value = resolve_path(path, store)?;
        for part in parts {
            let filter = Filter::parse(part)?;
            if filter.name == "default" {
                if value.as_ref().map_or(true, Value::is_null) {
                    value = Some(filter.arg.unwrap_or_else(|| Value::String(String::new())));
                }
                continue;
            }
            let Some(current) = value.take() else {
                continue;
            };
            value = Some(filter.apply(current)?);
        }
        Ok(value)
    }
}

impl Renderer for PlaceholderRenderer {
    fn render(&self, template: &str, store: &Store) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let inner = &rest[open + 2..];
            let close = inner.find("}}").ok_or_else(|| TemplateError::Unclosed {
                template: template.to_string(),
                position: offset + open,
            })?;
            let expression = inner[..close].trim();

            match self.evaluate(expression, store)? {
                Some(value) => out.push_str(&stringify(&value)),
                None => match self.on_missing {
                    MissingPolicy::Fail => {
                        return Err(TemplateError::Unresolved {
                            template: template.to_string(),
                            expression: expression.to_string(),
                        })
                    }
                    MissingPolicy::Empty => {
                        debug!("Rendering unresolved '{}' as empty", expression);
                    }
                },
            }

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Renders every string leaf of `value`, mapping keys included.
///
/// A leaf that is exactly one placeholder using the `tojson` filter is
/// decoded back into a structured value.
pub fn render_value(
    renderer: &dyn Renderer,
    value: &Value,
    store: &Store,
) -> Result<Value, TemplateError> {
    match value {
        Value::String(template) => {
            let rendered = renderer.render(template, store)?;
            if is_structured(template) {
                if let Ok(decoded) = serde_json::from_str(&rendered) {
                    return Ok(decoded);
                }
            }
            Ok(Value::String(rendered))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(renderer, item, store))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(renderer.render(key, store)?, render_value(renderer, item, store)?);
            }
            Ok(Value::Object(rendered))
        }
        _ => Ok(value.clone()),
    }
}

/// Text form of a value: null is empty, strings are raw, everything else is JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// The whole text is one placeholder whose last filter is `tojson`.
fn is_structured(template: &str) -> bool {
    let Some(expression) = template
        .trim()
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    else {
        return false;
    };
    if expression.contains("{{") || expression.contains("}}") {
        return false;
    }
    let parts = split_pipes(expression);
    parts.len() > 1 && parts.last() == Some(&"tojson")
}

fn resolve_path(path: &str, store: &Store) -> Result<Option<Value>, TemplateError> {
    let mut segments = path.split('.').map(str::trim);
    if segments.next() != Some(STORE_ROOT) {
        return Err(TemplateError::Syntax(path.to_string()));
    }
    let rest: Vec<&str> = segments.collect();
    if rest.iter().any(|s| s.is_empty()) {
        return Err(TemplateError::Syntax(path.to_string()));
    }
    let Some((head, tail)) = rest.split_first() else {
        return Ok(Some(store.snapshot()));
    };
    Ok(store
        .get(head)
        .and_then(|root| descend(root, tail))
        .cloned())
}

fn split_pipes(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '|') => {
                parts.push(expression[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(expression[start..].trim());
    parts
}

struct Filter<'a> {
    name: &'a str,
    arg: Option<Value>,
}

impl<'a> Filter<'a> {
    fn parse(text: &'a str) -> Result<Self, TemplateError> {
        let Some(open) = text.find('(') else {
            return Ok(Self {
                name: text,
                arg: None,
            });
        };
        let raw = text[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| TemplateError::Syntax(text.to_string()))?
            .trim();
        let arg = if raw.is_empty() {
            None
        } else if let Some(single) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            Some(Value::String(single.to_string()))
        } else {
            Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        };
        Ok(Self {
            name: text[..open].trim(),
            arg,
        })
    }

    fn apply(&self, value: Value) -> Result<Value, TemplateError> {
        match self.name {
            "tojson" => Ok(Value::String(value.to_string())),
            "keys" => match decode_json_text(value) {
                Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
                other => Err(self.error(&other)),
            },
            "length" => match &value {
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                other => Err(self.error(other)),
            },
            "upper" => Ok(Value::String(stringify(&value).to_uppercase())),
            "lower" => Ok(Value::String(stringify(&value).to_lowercase())),
            "trim" => Ok(Value::String(stringify(&value).trim().to_string())),
            "first" | "last" => match decode_json_text(value) {
                Value::Array(items) => {
                    let picked = if self.name == "first" {
                        items.into_iter().next()
                    } else {
                        items.into_iter().last()
                    };
                    Ok(picked.unwrap_or(Value::Null))
                }
                other => Err(self.error(&other)),
            },
            "join" => match decode_json_text(value) {
                Value::Array(items) => {
                    let separator = self.arg.as_ref().map(stringify).unwrap_or_else(|| ",".to_string());
                    Ok(Value::String(
                        items.iter().map(stringify).collect::<Vec<_>>().join(&separator),
                    ))
                }
                other => Err(self.error(&other)),
            },
            unknown => Err(TemplateError::UnknownFilter(unknown.to_string())),
        }
    }

    fn error(&self, value: &Value) -> TemplateError {
        TemplateError::Filter {
            filter: self.name.to_string(),
            details: format!("unsupported {}", crate::store::kind_of(value)),
        }
    }
}

// `x | tojson | keys` hands a JSON string to the next filter.
fn decode_json_text(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(decoded @ (Value::Array(_) | Value::Object(_))) => decoded,
            _ => Value::String(text),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Store {
        let mut store = Store::new();
        store
            .replace(
                "params",
                json!({"dest": "world", "out": {"one": "a", "two": "b"}, "n": 3, "hosts": ["h1", "h2"]}),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_render_plain_text_is_unchanged() {
        let renderer = PlaceholderRenderer::new();
        assert_eq!(renderer.render("no placeholders here", &store()).unwrap(), "no placeholders here");
    }

    #[test]
    fn test_render_scalar_paths() {
        let renderer = PlaceholderRenderer::new();
        let store = store();
        assert_eq!(renderer.render("Hello {{ store.params.dest }}!", &store).unwrap(), "Hello world!");
        assert_eq!(renderer.render("n={{store.params.n}}", &store).unwrap(), "n=3");
        assert_eq!(renderer.render("{{ store.params.hosts.1 }}", &store).unwrap(), "h2");
    }

    #[test]
    fn test_render_filters() {
        let renderer = PlaceholderRenderer::new();
        let store = store();
        assert_eq!(renderer.render("{{ store.params.dest | upper }}", &store).unwrap(), "WORLD");
        assert_eq!(renderer.render("{{ store.params.hosts | length }}", &store).unwrap(), "2");
        assert_eq!(renderer.render("{{ store.params.hosts | join(\" \") }}", &store).unwrap(), "h1 h2");
        assert_eq!(renderer.render("{{ store.params.out | tojson | keys | first }}", &store).unwrap(), "one");
        assert_eq!(
            renderer.render("{{ store.params.region | default('eu') | upper }}", &store).unwrap(),
            "EU"
        );
    }

    #[test]
    fn test_render_missing_reference_policies() {
        let store = store();
        let err = PlaceholderRenderer::new().render("x{{ store.nope }}", &store).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                template: "x{{ store.nope }}".to_string(),
                expression: "store.nope".to_string(),
            }
        );

        let lenient = PlaceholderRenderer::with_missing(MissingPolicy::Empty);
        assert_eq!(lenient.render("x{{ store.nope }}y", &store).unwrap(), "xy");
    }

    #[test]
    fn test_render_errors() {
        let renderer = PlaceholderRenderer::new();
        let store = store();
        assert!(matches!(
            renderer.render("{{ store.params.dest", &store),
            Err(TemplateError::Unclosed { position: 0, .. })
        ));
        assert_eq!(
            renderer.render("{{ store.params.dest | shout }}", &store),
            Err(TemplateError::UnknownFilter("shout".to_string()))
        );
        assert_eq!(
            renderer.render("{{ params.dest }}", &store),
            Err(TemplateError::Syntax("params.dest".to_string()))
        );
        assert!(matches!(
            renderer.render("{{ store.params.n | keys }}", &store),
            Err(TemplateError::Filter { .. })
        ));
    }

    #[test]
    fn test_render_value_decodes_tojson() {
        let renderer = PlaceholderRenderer::new();
        let store = store();
        let rendered = render_value(
            &renderer,
            &json!({"out": "{{ store.params.out | tojson }}", "list": ["{{ store.params.dest }}", 1]}),
            &store,
        )
        .unwrap();
        assert_eq!(rendered, json!({"out": {"one": "a", "two": "b"}, "list": ["world", 1]}));

        let keys = render_value(&renderer, &json!("{{ store.params.out | keys | tojson }}"), &store).unwrap();
        assert_eq!(keys, json!(["one", "two"]));
    }

    #[test]
    fn test_render_value_decodes_only_trailing_tojson() {
        let renderer = PlaceholderRenderer::new();
        let mut store = Store::new();
        store.set("ids", json!(["123"])).unwrap();
        store.set("tojson_id", json!("42")).unwrap();

        let first = render_value(&renderer, &json!("{{ store.ids | tojson | first }}"), &store).unwrap();
        assert_eq!(first, json!("123"));

        let path = render_value(&renderer, &json!("{{ store.tojson_id }}"), &store).unwrap();
        assert_eq!(path, json!("42"));

        let quoted = render_value(&renderer, &json!("{{ store.tojson_id | default('tojson') }}"), &store).unwrap();
        assert_eq!(quoted, json!("42"));

        let ids = render_value(&renderer, &json!("{{ store.ids | tojson }}"), &store).unwrap();
        assert_eq!(ids, json!(["123"]));
    }

    #[test]
    fn test_default_applies_after_skipped_filters() {
        let renderer = PlaceholderRenderer::new();
        let store = store();
        assert_eq!(
            renderer.render("{{ store.params.region | upper | default('eu') }}", &store).unwrap(),
            "eu"
        );
        assert_eq!(
            renderer.render("{{ store.params.region | upper | trim | default('eu') | upper }}", &store).unwrap(),
            "EU"
        );
        assert_eq!(
            renderer.render("{{ store.params.dest | upper | default('eu') }}", &store).unwrap(),
            "WORLD"
        );
        assert!(matches!(
            renderer.render("{{ store.params.region | upper }}", &store),
            Err(TemplateError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_closure_renderer() {
        let shout = |template: &str, _store: &Store| -> Result<String, TemplateError> {
            Ok(template.to_uppercase())
        };
        let rendered = render_value(&shout, &json!(["{{ a }}", "plain"]), &Store::new()).unwrap();
        assert_eq!(rendered, json!(["{{ A }}", "PLAIN"]));
    }

    #[test]
    fn test_custom_grammar_sees_every_string() {
        let dollars = |template: &str, store: &Store| -> Result<String, TemplateError> {
            let who = store.lookup("who").map(stringify).unwrap_or_default();
            Ok(template.replace("${who}", &who))
        };
        let mut store = Store::new();
        store.set("who", json!("ana")).unwrap();

        let rendered = render_value(&dollars, &json!({"${who}": "hi ${who}"}), &store).unwrap();
        assert_eq!(rendered, json!({"ana": "hi ana"}));
    }
}
