//! Stimulus types presented to the model.

use serde::{Deserialize, Serialize};

/// Category of a stimulus within a trial sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusCategory {
    /// The ambiguous symbol under study.
    Target,
    /// Geometric control symbol.
    Geometric,
    /// Null control (whitespace only).
    Null,
}

impl StimulusCategory {
    /// All categories in canonical order.
    pub const ALL: [Self; 3] = [Self::Target, Self::Geometric, Self::Null];

    /// Returns the lowercase name used in records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Geometric => "geometric",
            Self::Null => "null",
        }
    }

    /// Parses a category name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "target" => Some(Self::Target),
            "geometric" => Some(Self::Geometric),
            "null" => Some(Self::Null),
            _ => None,
        }
    }
}

impl std::fmt::Display for StimulusCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable unit presented in a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stimulus {
    /// The text payload shown to the model.
    pub symbol: String,
    /// Which category this stimulus belongs to.
    pub category: StimulusCategory,
}

impl Stimulus {
    /// Creates a new stimulus.
    #[must_use]
    pub fn new(symbol: impl Into<String>, category: StimulusCategory) -> Self {
        Self {
            symbol: symbol.into(),
            category,
        }
    }
}

/// The symbols used for each stimulus category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StimulusSet {
    /// Target stimulus.
    #[serde(default = "default_target")]
    pub target: String,
    /// Geometric control.
    #[serde(default = "default_geometric")]
    pub geometric: String,
    /// Null control.
    #[serde(default = "default_null")]
    pub null: String,
}

fn default_target() -> String {
    "†⟡".to_string()
}

fn default_geometric() -> String {
    "•".to_string()
}

fn default_null() -> String {
    " ".to_string()
}

impl Default for StimulusSet {
    fn default() -> Self {
        Self {
            target: default_target(),
            geometric: default_geometric(),
            null: default_null(),
        }
    }
}

impl StimulusSet {
    /// Returns the stimulus for a category.
    #[must_use]
    pub fn get(&self, category: StimulusCategory) -> Stimulus {
        let symbol = match category {
            StimulusCategory::Target => &self.target,
            StimulusCategory::Geometric => &self.geometric,
            StimulusCategory::Null => &self.null,
        };
        Stimulus::new(symbol.clone(), category)
    }

    /// Returns the target stimulus.
    #[must_use]
    pub fn target(&self) -> Stimulus {
        self.get(StimulusCategory::Target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_symbols() {
        let set = StimulusSet::default();
        assert_eq!(set.target().symbol, "†⟡");
        assert_eq!(set.get(StimulusCategory::Geometric).symbol, "•");
        assert_eq!(set.get(StimulusCategory::Null).symbol, " ");
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(
            StimulusCategory::from_str_case_insensitive("Target"),
            Some(StimulusCategory::Target)
        );
        assert_eq!(
            StimulusCategory::from_str_case_insensitive(" NULL "),
            Some(StimulusCategory::Null)
        );
        assert_eq!(StimulusCategory::from_str_case_insensitive("square"), None);
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(
            serde_json::to_string(&StimulusCategory::Geometric).unwrap(),
            r#""geometric""#
        );
    }
}
