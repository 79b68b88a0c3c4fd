//! Output helpers for the admin commands
//!
//! Every formatter returns either a comfy-table rendering or pretty JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use qrgate_core::cache::{CacheStats, NamespaceStats};
use qrgate_core::models::{StyleId, StyleStatus, TokenSummary};
use qrgate_core::{extract_token, Admission};
use serde::Serialize;

// ============================================================================
// Arguments
// ============================================================================

/// Accept a bare token id or a scanned access URL
pub fn resolve_token_arg(input: &str) -> Result<String> {
    extract_token(input).with_context(|| format!("No token id found in '{}'", input.trim()))
}

// ============================================================================
// Views
// ============================================================================

/// Token details as shown by `tokens show`
#[derive(Debug, Serialize)]
pub struct TokenView {
    #[serde(flatten)]
    pub summary: TokenSummary,
    pub access_url: String,
    pub styles: Vec<StyleView>,
}

#[derive(Debug, Serialize)]
pub struct StyleView {
    pub style: StyleId,
    pub status: StyleStatus,
}

impl TokenView {
    pub fn new(
        summary: TokenSummary,
        access_url: String,
        availability: Vec<(StyleId, StyleStatus)>,
    ) -> Self {
        Self {
            summary,
            access_url,
            styles: availability
                .into_iter()
                .map(|(style, status)| StyleView { style, status })
                .collect(),
        }
    }
}

// ============================================================================
// Formatters
// ============================================================================

fn header(labels: &[&str], no_color: bool) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| {
            let cell = Cell::new(label);
            if no_color {
                cell
            } else {
                cell.fg(Color::Cyan)
            }
        })
        .collect()
}

fn to_json<T: Serialize + ?Sized>(value: &T, empty: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| empty.to_string())
}

/// Token listing, one row per token
pub fn format_token_table(tokens: &[(TokenSummary, String)], json: bool, no_color: bool) -> String {
    if json {
        let rows: Vec<_> = tokens
            .iter()
            .map(|(summary, url)| serde_json::json!({ "token": summary, "access_url": url }))
            .collect();
        return to_json(&rows, "[]");
    }

    if tokens.is_empty() {
        return "No tokens found.".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header(
        &["Token", "Theme", "Uses", "Styles", "Usage until", "Access until", "URL"],
        no_color,
    ));

    for (summary, url) in tokens {
        let uses = format!("{}/{}", summary.usage_count, summary.max_usage_count);
        let styles = if summary.used_styles.is_empty() {
            "-".to_string()
        } else {
            summary
                .used_styles
                .iter()
                .map(StyleId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let usage_until = format_validity(summary.usage_valid_until, summary.is_usage_valid);
        let access_until = format_validity(summary.access_valid_until, summary.is_access_valid);

        table.add_row(Row::from(vec![
            summary.token_id.as_str(),
            summary.theme.as_str(),
            &uses,
            &styles,
            &usage_until,
            &access_until,
            url,
        ]));
    }

    table.to_string()
}

/// Detailed view of one token
pub fn format_token_info(view: &TokenView, json: bool) -> String {
    if json {
        return to_json(view, "{}");
    }

    let summary = &view.summary;
    let mut lines = vec![];
    lines.push(format!("Token:            {}", summary.token_id));
    lines.push(format!("Theme:            {}", summary.theme));
    lines.push(format!("Access URL:       {}", view.access_url));
    lines.push(format!(
        "Uses:             {}/{} ({} left)",
        summary.usage_count, summary.max_usage_count, summary.remaining_uses
    ));
    lines.push(format!(
        "Usage until:      {}",
        format_validity(summary.usage_valid_until, summary.is_usage_valid)
    ));
    lines.push(format!(
        "Access until:     {}",
        format_validity(summary.access_valid_until, summary.is_access_valid)
    ));

    let styles = view
        .styles
        .iter()
        .map(|s| format!("{} ({})", s.style, status_label(s.status)))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!("Styles:           {}", styles));

    if !summary.generation_records.is_empty() {
        lines.push(String::new());
        lines.push("Generations:".to_string());
        for record in &summary.generation_records {
            lines.push(format!(
                "  {}  {:<12} {}{}",
                record.datetime,
                record.style.as_str(),
                truncate(&record.image_hash, 12),
                if record.cache_hit { "  (cached caption)" } else { "" }
            ));
        }
    }

    lines.join("\n")
}

/// Result of a dry-run admission
pub fn format_admission(admission: &Admission, json: bool) -> String {
    if json {
        return to_json(admission, "{}");
    }

    let decision = &admission.decision;
    [
        format!("Admitted:         {}", decision.token_id),
        format!("Theme:            {}", decision.theme),
        format!("Style:            {}", admission.style),
        format!("Image hash:       {}", admission.image_hash),
        format!(
            "Uses:             {}/{} ({} left)",
            decision.usage_count, decision.max_usage_count, decision.remaining_uses
        ),
    ]
    .join("\n")
}

/// Entry counts plus the most recent samples per namespace
pub fn format_cache_stats(stats: &CacheStats, json: bool, no_color: bool) -> String {
    if json {
        return to_json(stats, "{}");
    }

    [&stats.caption, &stats.story]
        .into_iter()
        .map(|ns| format_namespace(ns, no_color))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_namespace(stats: &NamespaceStats, no_color: bool) -> String {
    let title = format!("{} cache: {} entries", stats.namespace.as_str(), stats.entries);
    if stats.samples.is_empty() {
        return title;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header(&["Key", "Created", "Value"], no_color));
    for sample in &stats.samples {
        table.add_row(Row::from(vec![
            truncate(&sample.key, 16),
            sample.created_at.clone().unwrap_or_else(|| "-".to_string()),
            sample.preview.clone(),
        ]));
    }

    format!("{}\n{}", title, table)
}

// ============================================================================
// Utilities
// ============================================================================

/// Unix seconds as `YYYY-MM-DD HH:MM` (UTC)
pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_validity(ts: i64, valid: bool) -> String {
    if valid {
        format_timestamp(ts)
    } else {
        format!("{} (closed)", format_timestamp(ts))
    }
}

fn status_label(status: StyleStatus) -> &'static str {
    match status {
        StyleStatus::Used => "used",
        StyleStatus::Available => "available",
        StyleStatus::Unavailable => "unavailable",
    }
}

/// Truncate to `max_chars`, appending "..." when cut
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
