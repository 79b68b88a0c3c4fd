//! Style identifiers and the per-theme catalog they are validated against

use super::token::Theme;
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A style key accepted by the catalog of some theme
///
/// Only [`StyleCatalog::parse`] hands these out for inbound requests, so a
/// free-text style never reaches the engine. Persisted tokens deserialize
/// directly since they were validated when written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleId(String);

impl StyleId {
    pub(crate) fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StyleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a style from one token's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleStatus {
    /// Already exercised; reusing it is free
    Used,
    /// New style that still fits in the budget
    Available,
    /// New style but the budget is spent
    Unavailable,
}

/// Closed set of styles offered for one theme
#[derive(Debug, Clone)]
pub struct StyleCatalog {
    theme: Theme,
    styles: Vec<StyleId>,
    default_style: StyleId,
}

impl StyleCatalog {
    /// Built from validated config; the default style is always in `styles`
    pub(crate) fn new(theme: Theme, styles: Vec<StyleId>, default_style: StyleId) -> Self {
        Self {
            theme,
            styles,
            default_style,
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn styles(&self) -> &[StyleId] {
        &self.styles
    }

    pub fn default_style(&self) -> &StyleId {
        &self.default_style
    }

    /// Validate a requested style; blank input selects the default style
    pub fn parse(&self, raw: &str) -> Result<StyleId, GateError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(self.default_style.clone());
        }

        self.styles
            .iter()
            .find(|s| s.as_str() == raw)
            .cloned()
            .ok_or_else(|| GateError::UnknownStyle {
                theme: self.theme.to_string(),
                style: raw.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StyleCatalog {
        let styles: Vec<StyleId> = ["classic", "ink", "neon"]
            .into_iter()
            .map(StyleId::new_unchecked)
            .collect();
        StyleCatalog::new(Theme::Ice, styles, StyleId::new_unchecked("classic"))
    }

    #[test]
    fn test_parse_known_style() {
        assert_eq!(catalog().parse("ink").unwrap().as_str(), "ink");
    }

    #[test]
    fn test_parse_blank_selects_default() {
        assert_eq!(catalog().parse("  ").unwrap().as_str(), "classic");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = catalog().parse("sepia").unwrap_err();
        assert!(matches!(err, GateError::UnknownStyle { ref style, .. } if style == "sepia"));
    }
}
