//! Access token model
//!
//! A token scopes its holder to one theme with bounded usage and time
//! validity. Timestamps are unix seconds, matching the persisted token file.

use super::style::StyleId;
use crate::error::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visual theme a token is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Ice,
    Fire,
}

impl Theme {
    pub const ALL: [Theme; 2] = [Theme::Ice, Theme::Fire];

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Ice => "ice",
            Theme::Fire => "fire",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ice" => Ok(Theme::Ice),
            "fire" => Ok(Theme::Fire),
            _ => Err(GateError::UnknownTheme {
                value: s.to_string(),
            }),
        }
    }
}

/// One successful generation, appended by the usage recorder and never edited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub image_hash: String,
    pub style: StyleId,
    pub timestamp: i64,
    /// Human-readable copy of `timestamp` (UTC)
    #[serde(default)]
    pub datetime: String,
    /// Whether the caption for this image came from the cache
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub output_files: Vec<String>,
}

impl GenerationRecord {
    pub fn new(
        image_hash: impl Into<String>,
        style: StyleId,
        timestamp: i64,
        cache_hit: bool,
        output_files: Vec<String>,
    ) -> Self {
        let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        Self {
            image_hash: image_hash.into(),
            style,
            timestamp,
            datetime,
            cache_hit,
            output_files,
        }
    }
}

/// Persisted state of one access token
///
/// The id is the key of the token file map, so it is not serialized inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(skip)]
    pub id: String,
    pub theme: Theme,
    #[serde(default)]
    pub usage_count: u32,
    pub max_usage_count: u32,
    pub created_at: i64,
    pub usage_valid_until: i64,
    pub access_valid_until: i64,
    #[serde(default)]
    pub used_image_hashes: Vec<String>,
    #[serde(default)]
    pub used_styles: Vec<StyleId>,
    #[serde(default)]
    pub generation_records: Vec<GenerationRecord>,
}

impl Token {
    /// Fresh token with zeroed counters
    pub fn new(
        id: impl Into<String>,
        theme: Theme,
        max_usage_count: u32,
        created_at: i64,
        usage_valid_until: i64,
        access_valid_until: i64,
    ) -> Self {
        Self {
            id: id.into(),
            theme,
            usage_count: 0,
            max_usage_count,
            created_at,
            usage_valid_until,
            access_valid_until,
            used_image_hashes: Vec::new(),
            used_styles: Vec::new(),
            generation_records: Vec::new(),
        }
    }

    /// Bounds are inclusive: a request at exactly `access_valid_until` is admitted
    pub fn is_access_valid(&self, now: i64) -> bool {
        now <= self.access_valid_until
    }

    pub fn is_usage_valid(&self, now: i64) -> bool {
        now <= self.usage_valid_until && self.usage_count < self.max_usage_count
    }

    pub fn remaining_uses(&self) -> u32 {
        self.max_usage_count.saturating_sub(self.usage_count)
    }

    pub fn has_used_image(&self, image_hash: &str) -> bool {
        self.used_image_hashes.iter().any(|h| h == image_hash)
    }

    pub fn has_used_style(&self, style: &StyleId) -> bool {
        self.used_styles.contains(style)
    }

    /// Apply one generation: bump usage, remember the image and style, log it.
    ///
    /// Callers must have re-validated the token under its lock first.
    pub(crate) fn apply_generation(&mut self, record: GenerationRecord) {
        if !self.has_used_image(&record.image_hash) {
            self.used_image_hashes.push(record.image_hash.clone());
        }
        if !self.has_used_style(&record.style) {
            self.used_styles.push(record.style.clone());
        }
        self.usage_count += 1;
        self.generation_records.push(record);
    }
}

/// Read-only view of a token for status pages and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub token_id: String,
    pub theme: Theme,
    pub usage_count: u32,
    pub max_usage_count: u32,
    pub remaining_uses: u32,
    pub is_usage_valid: bool,
    pub is_access_valid: bool,
    pub usage_valid_until: i64,
    pub access_valid_until: i64,
    pub used_styles: Vec<StyleId>,
    pub can_use_more_styles: bool,
    pub generation_records: Vec<GenerationRecord>,
}

impl TokenSummary {
    pub fn from_token(token: &Token, now: i64, style_budget: usize) -> Self {
        Self {
            token_id: token.id.clone(),
            theme: token.theme,
            usage_count: token.usage_count,
            max_usage_count: token.max_usage_count,
            remaining_uses: token.remaining_uses(),
            is_usage_valid: token.is_usage_valid(now),
            is_access_valid: token.is_access_valid(now),
            usage_valid_until: token.usage_valid_until,
            access_valid_until: token.access_valid_until,
            used_styles: token.used_styles.clone(),
            can_use_more_styles: token.used_styles.len() < style_budget,
            generation_records: token.generation_records.clone(),
        }
    }
}
