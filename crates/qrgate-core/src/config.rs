//! Gate configuration
//!
//! Stored as `qrgate.json` in the data directory. A missing file means
//! defaults; a present but malformed file is an error so a typo does not
//! silently reset the style budget.

use crate::error::GateError;
use crate::models::{StyleCatalog, StyleId, Theme};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "qrgate.json";

/// Distinct styles a token may exercise, default style included
pub const DEFAULT_STYLE_BUDGET: usize = 3;

/// Styles offered for one theme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeConfig {
    pub styles: Vec<String>,
    pub default_style: String,
}

impl ThemeConfig {
    fn standard() -> Self {
        Self {
            styles: ["classic", "ink", "anime", "watercolor"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_style: "classic".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Cap on distinct styles per token
    pub style_budget: usize,

    /// Prefix of the access URL encoded into QR codes
    pub base_url: String,

    /// Token file name, relative to the data directory
    pub tokens_file: String,

    /// SQLite cache file name, relative to the data directory
    pub cache_file: String,

    pub themes: BTreeMap<Theme, ThemeConfig>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            style_budget: DEFAULT_STYLE_BUDGET,
            base_url: "http://localhost:7860".to_string(),
            tokens_file: "tokens.json".to_string(),
            cache_file: "qrgate-cache.db".to_string(),
            themes: Theme::ALL
                .into_iter()
                .map(|theme| (theme, ThemeConfig::standard()))
                .collect(),
        }
    }
}

impl GateConfig {
    /// Load `<data_dir>/qrgate.json`, falling back to defaults when absent
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: GateConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Persist to `<data_dir>/qrgate.json`
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let path = data_dir.join(CONFIG_FILE_NAME);
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.style_budget == 0 {
            return Err(GateError::InvalidConfig {
                message: "style_budget must be at least 1".to_string(),
            });
        }

        for theme in Theme::ALL {
            let Some(theme_config) = self.themes.get(&theme) else {
                return Err(GateError::InvalidConfig {
                    message: format!("no styles configured for theme {}", theme),
                });
            };
            if theme_config.styles.is_empty() {
                return Err(GateError::InvalidConfig {
                    message: format!("style list for theme {} is empty", theme),
                });
            }
            if !theme_config.styles.contains(&theme_config.default_style) {
                return Err(GateError::InvalidConfig {
                    message: format!(
                        "default style {} is not offered for theme {}",
                        theme_config.default_style, theme
                    ),
                });
            }
        }

        Ok(())
    }

    pub fn catalog(&self, theme: Theme) -> Result<StyleCatalog, GateError> {
        let theme_config = self
            .themes
            .get(&theme)
            .ok_or_else(|| GateError::InvalidConfig {
                message: format!("no styles configured for theme {}", theme),
            })?;

        let styles = theme_config
            .styles
            .iter()
            .map(|s| StyleId::new_unchecked(s.trim()))
            .collect();

        Ok(StyleCatalog::new(
            theme,
            styles,
            StyleId::new_unchecked(theme_config.default_style.trim()),
        ))
    }

    pub fn tokens_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.tokens_file)
    }

    pub fn cache_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.cache_file)
    }

    /// URL a token's QR code points at
    pub fn access_url(&self, token_id: &str) -> String {
        format!("{}/?token={}", self.base_url.trim_end_matches('/'), token_id)
    }
}
