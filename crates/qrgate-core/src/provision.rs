//! Token provisioning
//!
//! Batch creation of fresh tokens for printing as QR codes. Ids are the
//! provisioning instant in seconds plus the batch offset, behind an optional
//! prefix.

use crate::error::{GateError, Result};
use crate::models::{Theme, Token};
use chrono::{DateTime, TimeDelta, Utc};

pub const MAX_BATCH: usize = 100;

/// Upper bound for either validity window
pub const MAX_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub count: usize,
    pub theme: Theme,
    pub prefix: String,
    pub max_usage_count: u32,
    /// Generation window, in days from now (rounded down to midnight UTC)
    pub usage_days: i64,
    /// Viewing window, in days from now (rounded down to midnight UTC)
    pub access_days: i64,
}

impl Default for ProvisionRequest {
    fn default() -> Self {
        Self {
            count: 10,
            theme: Theme::Ice,
            prefix: String::new(),
            max_usage_count: 10,
            usage_days: 2,
            access_days: 9,
        }
    }
}

impl ProvisionRequest {
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(GateError::InvalidProvisioning { message });

        if !(1..=MAX_BATCH).contains(&self.count) {
            return invalid(format!("count must be between 1 and {}", MAX_BATCH));
        }
        if self.max_usage_count == 0 {
            return invalid("max usage count must be at least 1".to_string());
        }
        if self.usage_days < 0 || self.access_days < 0 {
            return invalid("validity days cannot be negative".to_string());
        }
        if self.usage_days > MAX_VALIDITY_DAYS || self.access_days > MAX_VALIDITY_DAYS {
            return invalid(format!("validity days cannot exceed {}", MAX_VALIDITY_DAYS));
        }
        if !self
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return invalid(format!("prefix {:?} must be [A-Za-z0-9_-]", self.prefix));
        }
        Ok(())
    }
}

/// Midnight UTC of the day `days` after `now`, as unix seconds
pub fn midnight_after(now: DateTime<Utc>, days: i64) -> Result<i64> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .and_then(|later| later.date_naive().and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| GateError::InvalidProvisioning {
            message: format!("{} days from {} is out of range", days, now),
        })
}

/// Build `request.count` fresh tokens
pub fn provision(request: &ProvisionRequest, now: DateTime<Utc>) -> Result<Vec<Token>> {
    request.validate()?;

    let created_at = now.timestamp();
    let usage_valid_until = midnight_after(now, request.usage_days)?;
    let access_valid_until = midnight_after(now, request.access_days)?;

    if usage_valid_until > access_valid_until {
        tracing::warn!(
            usage_days = request.usage_days,
            access_days = request.access_days,
            "Usage window outlives access window"
        );
    }

    let tokens = (0..request.count)
        .map(|i| {
            Token::new(
                format!("{}{}", request.prefix, created_at + i as i64),
                request.theme,
                request.max_usage_count,
                created_at,
                usage_valid_until,
                access_valid_until,
            )
        })
        .collect::<Vec<_>>();

    tracing::info!(
        count = tokens.len(),
        theme = %request.theme,
        usage_valid_until,
        access_valid_until,
        "Tokens provisioned"
    );

    Ok(tokens)
}
