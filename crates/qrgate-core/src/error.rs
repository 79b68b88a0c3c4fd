//! Error types for qrgate-core
//!
//! One taxonomy covers the admission decision (what the caller sees when a
//! token is turned away) and the infrastructure underneath it.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for qrgate operations
#[derive(Error, Debug)]
pub enum GateError {
    // ===================
    // Admission
    // ===================
    #[error("Unknown access token: {token_id}")]
    NotFound { token_id: String },

    #[error("Access token {token_id} expired at {access_valid_until}")]
    Expired {
        token_id: String,
        access_valid_until: i64,
    },

    #[error("Usage window for token {token_id} closed at {usage_valid_until}")]
    UsageWindowClosed {
        token_id: String,
        usage_valid_until: i64,
    },

    #[error("Token {token_id} has used all {max_usage_count} generations")]
    UsageExhausted {
        token_id: String,
        max_usage_count: u32,
    },

    #[error("Image {image_hash} was already used with token {token_id}")]
    DuplicateImage {
        token_id: String,
        image_hash: String,
    },

    #[error("Token {token_id} already used {budget} distinct styles, cannot add {style}")]
    StyleBudgetExceeded {
        token_id: String,
        style: String,
        budget: usize,
    },

    #[error("Token {token_id} changed concurrently: {reason}")]
    Conflict { token_id: String, reason: String },

    #[error("Generation backend failed during {stage}")]
    CollaboratorFailure {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    // ===================
    // Boundary validation
    // ===================
    #[error("Unknown theme: {value}")]
    UnknownTheme { value: String },

    #[error("Style {style} is not offered for theme {theme}")]
    UnknownStyle { theme: String, style: String },

    // ===================
    // Storage
    // ===================
    #[error("Cache storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to persist {path}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize {what}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Config / provisioning
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid provisioning request: {message}")]
    InvalidProvisioning { message: String },
}

impl GateError {
    pub(crate) fn storage(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Storage {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn collaborator(stage: &'static str, source: anyhow::Error) -> Self {
        Self::CollaboratorFailure { stage, source }
    }

    /// Stable machine-readable name, used in logs, events and CLI JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::NotFound { .. } => "not_found",
            GateError::Expired { .. } => "expired",
            GateError::UsageWindowClosed { .. } => "usage_window_closed",
            GateError::UsageExhausted { .. } => "usage_exhausted",
            GateError::DuplicateImage { .. } => "duplicate_image",
            GateError::StyleBudgetExceeded { .. } => "style_budget_exceeded",
            GateError::Conflict { .. } => "conflict",
            GateError::CollaboratorFailure { .. } => "collaborator_failure",
            GateError::UnknownTheme { .. } => "unknown_theme",
            GateError::UnknownStyle { .. } => "unknown_style",
            GateError::Storage { .. } => "storage",
            GateError::Persist { .. } => "persist",
            GateError::Serialization { .. } => "serialization",
            GateError::InvalidConfig { .. } => "invalid_config",
            GateError::InvalidProvisioning { .. } => "invalid_provisioning",
        }
    }

    /// Only a lost race is worth re-running the admit→commit sequence for
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::Conflict { .. })
    }

    /// True for the terminal admission failures reported to the token holder
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GateError::NotFound { .. }
                | GateError::Expired { .. }
                | GateError::UsageWindowClosed { .. }
                | GateError::UsageExhausted { .. }
                | GateError::DuplicateImage { .. }
                | GateError::StyleBudgetExceeded { .. }
                | GateError::UnknownStyle { .. }
        )
    }
}

pub type Result<T, E = GateError> = std::result::Result<T, E>;
