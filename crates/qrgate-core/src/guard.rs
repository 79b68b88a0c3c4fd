//! Per-token guards: image reuse and style budget
//!
//! Both are pure functions of a token snapshot. They run once as a fast
//! pre-check and again inside the usage recorder's critical section.

use crate::config::DEFAULT_STYLE_BUDGET;
use crate::error::{GateError, Result};
use crate::models::{StyleCatalog, StyleId, StyleStatus, Token};

/// Rejects an image the token has already consumed
pub struct FingerprintGuard;

impl FingerprintGuard {
    pub fn check(token: &Token, image_hash: &str) -> Result<()> {
        if token.has_used_image(image_hash) {
            return Err(GateError::DuplicateImage {
                token_id: token.id.clone(),
                image_hash: image_hash.to_string(),
            });
        }
        Ok(())
    }
}

/// Cap on distinct styles per token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleBudget {
    budget: usize,
}

impl Default for StyleBudget {
    fn default() -> Self {
        Self::new(DEFAULT_STYLE_BUDGET)
    }
}

impl StyleBudget {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn check(&self, token: &Token, style: &StyleId) -> Result<()> {
        match self.status(token, style) {
            StyleStatus::Used | StyleStatus::Available => Ok(()),
            StyleStatus::Unavailable => Err(GateError::StyleBudgetExceeded {
                token_id: token.id.clone(),
                style: style.to_string(),
                budget: self.budget,
            }),
        }
    }

    pub fn status(&self, token: &Token, style: &StyleId) -> StyleStatus {
        if token.has_used_style(style) {
            StyleStatus::Used
        } else if token.used_styles.len() >= self.budget {
            StyleStatus::Unavailable
        } else {
            StyleStatus::Available
        }
    }

    /// New styles the token may still pick
    pub fn remaining(&self, token: &Token) -> usize {
        self.budget.saturating_sub(token.used_styles.len())
    }

    /// Status of every style in the token's catalog, in catalog order
    pub fn availability(&self, token: &Token, catalog: &StyleCatalog) -> Vec<(StyleId, StyleStatus)> {
        catalog
            .styles()
            .iter()
            .map(|style| (style.clone(), self.status(token, style)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::models::Theme;

    fn token_with_styles(styles: &[&str]) -> Token {
        let mut token = Token::new("t1", Theme::Fire, 10, 0, 100, 200);
        token.used_styles = styles.iter().map(|s| StyleId::new_unchecked(*s)).collect();
        token
    }

    #[test]
    fn test_fingerprint_guard() {
        let mut token = token_with_styles(&[]);
        assert!(FingerprintGuard::check(&token, "h1").is_ok());

        token.used_image_hashes.push("h1".into());
        let err = FingerprintGuard::check(&token, "h1").unwrap_err();
        assert_eq!(err.kind(), "duplicate_image");
        assert!(FingerprintGuard::check(&token, "h2").is_ok());
    }

    #[test]
    fn test_budget_admits_new_style_under_cap() {
        let token = token_with_styles(&["classic", "ink"]);
        assert!(StyleBudget::default().check(&token, &StyleId::new_unchecked("anime")).is_ok());
    }

    #[test]
    fn test_budget_rejects_fourth_style() {
        let token = token_with_styles(&["classic", "ink", "anime"]);
        let budget = StyleBudget::default();

        let err = budget
            .check(&token, &StyleId::new_unchecked("watercolor"))
            .unwrap_err();
        assert!(matches!(err, GateError::StyleBudgetExceeded { budget: 3, .. }));

        // Reusing a style is always free
        assert!(budget.check(&token, &StyleId::new_unchecked("ink")).is_ok());
        assert_eq!(budget.remaining(&token), 0);
    }

    #[test]
    fn test_availability() {
        let catalog = GateConfig::default().catalog(Theme::Fire).unwrap();
        let budget = StyleBudget::new(2);

        let fresh = token_with_styles(&[]);
        assert!(budget
            .availability(&fresh, &catalog)
            .iter()
            .all(|(_, status)| *status == StyleStatus::Available));

        let spent = token_with_styles(&["classic", "ink"]);
        let statuses: Vec<StyleStatus> = budget
            .availability(&spent, &catalog)
            .into_iter()
            .map(|(_, status)| status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                StyleStatus::Used,
                StyleStatus::Used,
                StyleStatus::Unavailable,
                StyleStatus::Unavailable
            ]
        );
    }
}
