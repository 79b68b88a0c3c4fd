//! Authorization engine
//!
//! Read-only admission checks against a token's time windows and usage
//! counter. Recording a generation is the usage recorder's job.

use crate::error::{GateError, Result};
use crate::models::{Theme, Token};
use crate::store::TokenStore;
use serde::Serialize;
use std::sync::Arc;

/// Admitted decision for one token at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthDecision {
    pub token_id: String,
    pub theme: Theme,
    pub usage_count: u32,
    pub max_usage_count: u32,
    pub remaining_uses: u32,
}

/// Generation checks, in order: access window, usage window, usage count
pub fn check_token(token: &Token, now: i64) -> Result<AuthDecision> {
    check_access(token, now)?;

    if now > token.usage_valid_until {
        return Err(GateError::UsageWindowClosed {
            token_id: token.id.clone(),
            usage_valid_until: token.usage_valid_until,
        });
    }

    if token.usage_count >= token.max_usage_count {
        return Err(GateError::UsageExhausted {
            token_id: token.id.clone(),
            max_usage_count: token.max_usage_count,
        });
    }

    Ok(AuthDecision {
        token_id: token.id.clone(),
        theme: token.theme,
        usage_count: token.usage_count,
        max_usage_count: token.max_usage_count,
        remaining_uses: token.remaining_uses(),
    })
}

/// Viewing checks only: the token exists and its access window is open
pub fn check_access(token: &Token, now: i64) -> Result<()> {
    if now > token.access_valid_until {
        return Err(GateError::Expired {
            token_id: token.id.clone(),
            access_valid_until: token.access_valid_until,
        });
    }
    Ok(())
}

pub struct AuthorizationEngine {
    store: Arc<TokenStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<TokenStore>) -> Self {
        Self { store }
    }

    pub fn authorize(&self, token_id: &str, now: i64) -> Result<AuthDecision> {
        self.store.read(token_id, |token| check_token(token, now))
    }

    /// Weaker check for history and status views
    pub fn validate_access(&self, token_id: &str, now: i64) -> Result<Token> {
        self.store.read(token_id, |token| {
            check_access(token, now)?;
            Ok(token.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(token: Token) -> AuthorizationEngine {
        let store = TokenStore::in_memory();
        store.insert_new(token);
        AuthorizationEngine::new(Arc::new(store))
    }

    fn token() -> Token {
        Token::new("t1", Theme::Ice, 3, 0, 1_000, 2_000)
    }

    #[test]
    fn test_admits_valid_token() {
        let decision = engine_with(token()).authorize("t1", 500).unwrap();
        assert_eq!(decision.theme, Theme::Ice);
        assert_eq!(decision.remaining_uses, 3);
    }

    #[test]
    fn test_unknown_token() {
        let err = engine_with(token()).authorize("t2", 500).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_access_boundary() {
        let mut t = token();
        t.usage_valid_until = 2_000;
        let engine = engine_with(t);

        assert!(engine.authorize("t1", 2_000).is_ok());
        let err = engine.authorize("t1", 2_001).unwrap_err();
        assert!(matches!(err, GateError::Expired { access_valid_until: 2_000, .. }));
    }

    #[test]
    fn test_usage_window_closed_before_access_expiry() {
        let engine = engine_with(token());
        assert!(engine.authorize("t1", 1_000).is_ok());
        let err = engine.authorize("t1", 1_001).unwrap_err();
        assert_eq!(err.kind(), "usage_window_closed");

        // Still viewable
        assert!(engine.validate_access("t1", 1_001).is_ok());
        assert!(engine.validate_access("t1", 2_001).is_err());
    }

    #[test]
    fn test_expired_takes_precedence() {
        let mut t = token();
        t.usage_count = 3;
        let err = engine_with(t).authorize("t1", 5_000).unwrap_err();
        assert_eq!(err.kind(), "expired");
    }

    #[test]
    fn test_usage_exhausted() {
        let mut t = token();
        t.usage_count = 3;
        let err = engine_with(t).authorize("t1", 10).unwrap_err();
        assert!(matches!(err, GateError::UsageExhausted { max_usage_count: 3, .. }));
    }
}
