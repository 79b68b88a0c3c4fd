//! Usage recorder
//!
//! Applies a successful generation to a token. The checks are repeated under
//! the token's lock, so two requests admitted from the same snapshot cannot
//! both land when only one slot (or one new style) is left.

use crate::error::{GateError, Result};
use crate::guard::StyleBudget;
use crate::models::{GenerationRecord, StyleId, Token};
use crate::store::TokenStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct UsageRecorder {
    store: Arc<TokenStore>,
    budget: StyleBudget,
}

impl UsageRecorder {
    pub fn new(store: Arc<TokenStore>, budget: StyleBudget) -> Self {
        Self { store, budget }
    }

    /// Record one generation with no cache or output details
    pub fn commit(&self, token_id: &str, image_hash: &str, style: &StyleId, now: i64) -> Result<Token> {
        self.commit_record(
            token_id,
            GenerationRecord::new(image_hash, style.clone(), now, false, Vec::new()),
        )
    }

    /// Increment usage, add the fingerprint and style, append the record
    ///
    /// Fails with `Conflict` when the token changed since admission in a way
    /// that makes this record invalid.
    pub fn commit_record(&self, token_id: &str, record: GenerationRecord) -> Result<Token> {
        let result = self.store.update(token_id, |token| {
            self.revalidate(token, &record)?;
            token.apply_generation(record);
            Ok(token.clone())
        });

        match &result {
            Ok(token) => info!(
                token_id,
                usage_count = token.usage_count,
                max_usage_count = token.max_usage_count,
                styles = token.used_styles.len(),
                "Generation recorded"
            ),
            Err(e) if e.is_retryable() => warn!(token_id, error = %e, "Commit lost a race"),
            Err(_) => {}
        }

        result
    }

    fn revalidate(&self, token: &Token, record: &GenerationRecord) -> Result<()> {
        let conflict = |reason: &str| GateError::Conflict {
            token_id: token.id.clone(),
            reason: reason.to_string(),
        };

        if token.usage_count >= token.max_usage_count {
            return Err(conflict("usage exhausted"));
        }
        if token.has_used_image(&record.image_hash) {
            return Err(conflict("image already recorded"));
        }
        if self.budget.check(token, &record.style).is_err() {
            return Err(conflict("style budget spent"));
        }
        Ok(())
    }
}
