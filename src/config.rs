use crate::template::{MissingPolicy, PlaceholderRenderer};
use serde::{Deserialize, Serialize};

/// Recipe-wide settings.
///
/// Every field has a default, so a partial document deserializes.
///
/// # Examples
///
/// ```
/// use batter::{MissingPolicy, RecipeConfig};
///
/// let config: RecipeConfig = serde_json::from_str(r#"{"on_missing": "empty"}"#).unwrap();
/// assert_eq!(config.on_missing, MissingPolicy::Empty);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// What the default renderer does with a reference to a missing key.
    pub on_missing: MissingPolicy,
}

impl RecipeConfig {
    pub fn with_missing(mut self, on_missing: MissingPolicy) -> Self {
        self.on_missing = on_missing;
        self
    }

    /// The default renderer configured with these settings.
    pub fn renderer(&self) -> PlaceholderRenderer {
        PlaceholderRenderer::with_missing(self.on_missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fails_on_missing() {
        let config = RecipeConfig::default();
        assert_eq!(config.on_missing, MissingPolicy::Fail);
        assert_eq!(config.renderer().on_missing(), MissingPolicy::Fail);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: RecipeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RecipeConfig::default());
    }

    #[test]
    fn test_round_trip_names() {
        let config = RecipeConfig::default().with_missing(MissingPolicy::Empty);
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            serde_json::json!({"on_missing": "empty"})
        );
    }
}
