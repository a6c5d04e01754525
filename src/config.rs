use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::grouping::PAGE_LENGTH;
use crate::data::model::{SeriesType, DEFAULT_INDEX_COLUMN, HIGH_CARDINALITY_LEVELS};
use crate::fit::ModelSpec;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Engine defaults. Every field is optional in the JSON file:
///
/// ```json
/// {
///   "page_length": 20,
///   "high_cardinality_levels": 100,
///   "index_column": "day",
///   "series_type": "surveillance",
///   "model": { "method": "auto", "span": 0.75, "k": 10 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Subjects per page in the individual view.
    pub page_length: usize,
    /// Covariates with more levels than this are flagged when summarised.
    pub high_cardinality_levels: usize,
    pub index_column: String,
    pub series_type: SeriesType,
    /// Model used when a trace request does not choose one.
    pub model: ModelSpec,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            page_length: PAGE_LENGTH,
            high_cardinality_levels: HIGH_CARDINALITY_LEVELS,
            index_column: DEFAULT_INDEX_COLUMN.to_string(),
            series_type: SeriesType::default(),
            model: ModelSpec::default(),
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self> {
        let mut settings: Settings = serde_json::from_str(text).context("parsing settings")?;
        settings.page_length = settings.page_length.max(1);
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::Method;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = Settings::from_json(r#"{ "page_length": 5 }"#).unwrap();
        assert_eq!(settings.page_length, 5);
        assert_eq!(settings.index_column, "day");
        assert_eq!(settings.model, ModelSpec::default());
    }

    #[test]
    fn model_block_is_clamped() {
        let settings =
            Settings::from_json(r#"{ "model": { "method": "loess", "span": 2.0 }, "page_length": 0 }"#)
                .unwrap();
        assert_eq!(settings.model.method(), Method::Loess);
        assert_eq!(settings.model.span(), 1.0);
        assert_eq!(settings.page_length, 1);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Settings::from_json("{ page_length: }").is_err());
    }
}
