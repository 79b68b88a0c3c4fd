//! SQLite result cache for generated captions and story prompts
//!
//! Schema:
//! - caption_cache: image fingerprint → caption text
//! - story_cache: (caption, style, additional text) digest → story prompt
//! - Both tables keyed and indexed on their hash column
//!
//! Entries are write-once: the only write path is `INSERT OR IGNORE`, and
//! nothing here updates or evicts a row. Growth is unbounded.
//!
//! Concurrency:
//! - One connection behind a mutex, WAL journal
//! - `get_or_compute` serializes computation per key through an in-flight map,
//!   so concurrent misses on a fresh key run the compute closure once

use crate::error::{GateError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sample values longer than this are truncated in [`CacheStats`]
const SAMPLE_PREVIEW_CHARS: usize = 50;

/// One of the two independent key/value tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheNamespace {
    Caption,
    Story,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 2] = [CacheNamespace::Caption, CacheNamespace::Story];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Caption => "caption",
            CacheNamespace::Story => "story",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            CacheNamespace::Caption => "caption_cache",
            CacheNamespace::Story => "story_cache",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            CacheNamespace::Caption => "hash_key",
            CacheNamespace::Story => "cache_key",
        }
    }

    fn value_column(&self) -> &'static str {
        match self {
            CacheNamespace::Caption => "caption",
            CacheNamespace::Story => "prompt",
        }
    }

    /// File name used by JSON export/import
    fn export_file(&self) -> &'static str {
        match self {
            CacheNamespace::Caption => "caption_cache.json",
            CacheNamespace::Story => "story_cache.json",
        }
    }
}

/// Result of [`ResultCache::get_or_compute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub value: String,
    /// Value was already stored; the compute closure did not run
    pub hit: bool,
    /// This call wrote the row (false on hits and on a lost insert race)
    pub inserted: bool,
}

/// SQLite-backed caption/story cache (thread-safe)
pub struct ResultCache {
    conn: Mutex<Connection>,
    inflight: DashMap<(CacheNamespace, String), Arc<Mutex<()>>>,
    cache_path: PathBuf,
    closed: bool,
}

impl ResultCache {
    /// Open (creating if needed) the cache database at `cache_path`
    pub fn open(cache_path: &Path) -> Result<Self> {
        if let Some(parent) = cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| GateError::Persist {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(cache_path)
            .map_err(|e| GateError::storage(format!("open {}", cache_path.display()), e))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| GateError::storage("enable WAL mode", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS caption_cache (
                hash_key TEXT PRIMARY KEY,
                caption TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS story_cache (
                cache_key TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_caption_cache_hash_key ON caption_cache(hash_key);
            CREATE INDEX IF NOT EXISTS idx_story_cache_cache_key ON story_cache(cache_key);
            "#,
        )
        .map_err(|e| GateError::storage("create schema", e))?;

        info!(path = %cache_path.display(), "Result cache opened");

        Ok(Self {
            conn: Mutex::new(conn),
            inflight: DashMap::new(),
            cache_path: cache_path.to_path_buf(),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.cache_path
    }

    /// Stored value for `key`, if any
    pub fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            namespace.value_column(),
            namespace.table(),
            namespace.key_column()
        );

        let conn = self.conn.lock();
        conn.query_row(&sql, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| GateError::storage(format!("query {}", namespace.table()), e))
    }

    /// Insert unless the key exists; returns whether a row was written
    pub fn insert_if_absent(&self, namespace: CacheNamespace, key: &str, value: &str) -> Result<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?, ?)",
            namespace.table(),
            namespace.key_column(),
            namespace.value_column()
        );

        let conn = self.conn.lock();
        let changed = conn
            .execute(&sql, params![key, value])
            .map_err(|e| GateError::storage(format!("insert into {}", namespace.table()), e))?;
        Ok(changed == 1)
    }

    /// Return the cached value for `key`, computing and storing it on a miss
    ///
    /// `compute` runs at most once per fresh key across concurrent callers.
    /// Its error is returned untouched and nothing is stored.
    pub fn get_or_compute<F>(
        &self,
        namespace: CacheNamespace,
        key: &str,
        compute: F,
    ) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<String>,
    {
        if let Some(value) = self.get(namespace, key)? {
            debug!(namespace = namespace.as_str(), key = short(key), "Cache hit");
            return Ok(CacheLookup {
                value,
                hit: true,
                inserted: false,
            });
        }

        let slot_key = (namespace, key.to_string());
        let slot = Arc::clone(&self.inflight.entry(slot_key.clone()).or_default());

        let result = {
            let _guard = slot.lock();
            self.compute_locked(namespace, key, compute)
        };

        // Map entry + our clone; anyone else still holds a reference and is waiting
        self.inflight
            .remove_if(&slot_key, |_, s| Arc::strong_count(s) <= 2);

        result
    }

    fn compute_locked<F>(&self, namespace: CacheNamespace, key: &str, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Result<String>,
    {
        // Another caller may have filled the key while we waited for the slot
        if let Some(value) = self.get(namespace, key)? {
            debug!(namespace = namespace.as_str(), key = short(key), "Cache hit after wait");
            return Ok(CacheLookup {
                value,
                hit: true,
                inserted: false,
            });
        }

        debug!(namespace = namespace.as_str(), key = short(key), "Cache miss, computing");
        let computed = compute()?;

        let inserted = self.insert_if_absent(namespace, key, &computed)?;
        if inserted {
            debug!(namespace = namespace.as_str(), key = short(key), "Cache entry stored");
            return Ok(CacheLookup {
                value: computed,
                hit: false,
                inserted,
            });
        }

        // Lost the insert race: the stored row wins
        warn!(
            namespace = namespace.as_str(),
            key = short(key),
            "Concurrent insert won, discarding computed value"
        );
        let value = self.get(namespace, key)?.unwrap_or(computed);
        Ok(CacheLookup {
            value,
            hit: false,
            inserted,
        })
    }

    /// Entry counts plus the `limit` most recent entries per namespace
    pub fn stats(&self, limit: usize) -> Result<CacheStats> {
        Ok(CacheStats {
            caption: self.namespace_stats(CacheNamespace::Caption, limit)?,
            story: self.namespace_stats(CacheNamespace::Story, limit)?,
        })
    }

    fn namespace_stats(&self, namespace: CacheNamespace, limit: usize) -> Result<NamespaceStats> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", namespace.table()), [], |row| {
                row.get(0)
            })
            .map_err(|e| GateError::storage(format!("count {}", namespace.table()), e))?;

        let sql = format!(
            "SELECT {}, {}, created_at FROM {} ORDER BY created_at DESC, rowid DESC LIMIT ?",
            namespace.key_column(),
            namespace.value_column(),
            namespace.table()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GateError::storage("prepare sample query", e))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let value: String = row.get(1)?;
                Ok(CacheSample {
                    key: row.get(0)?,
                    preview: preview(&value),
                    created_at: row.get(2)?,
                })
            })
            .map_err(|e| GateError::storage("query samples", e))?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row.map_err(|e| GateError::storage("read sample row", e))?);
        }

        Ok(NamespaceStats {
            namespace,
            entries: count as usize,
            samples,
        })
    }

    /// Dump both tables as `key → value` JSON maps into `dir`
    pub fn export_json(&self, dir: &Path) -> Result<ExportReport> {
        std::fs::create_dir_all(dir).map_err(|source| GateError::Persist {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut report = ExportReport::default();
        for namespace in CacheNamespace::ALL {
            let entries = self.all_entries(namespace)?;
            let path = dir.join(namespace.export_file());
            let json = serde_json::to_string_pretty(&entries).map_err(|source| {
                GateError::Serialization {
                    what: path.display().to_string(),
                    source,
                }
            })?;
            std::fs::write(&path, json).map_err(|source| GateError::Persist {
                path: path.clone(),
                source,
            })?;

            match namespace {
                CacheNamespace::Caption => report.captions = entries.len(),
                CacheNamespace::Story => report.stories = entries.len(),
            }
        }

        info!(
            dir = %dir.display(),
            captions = report.captions,
            stories = report.stories,
            "Cache exported"
        );
        Ok(report)
    }

    /// Load JSON maps written by [`export_json`](Self::export_json); existing keys win
    pub fn import_json(&self, dir: &Path) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for namespace in CacheNamespace::ALL {
            let path = dir.join(namespace.export_file());
            if !path.exists() {
                debug!(path = %path.display(), "No export file, skipping");
                continue;
            }

            let content = std::fs::read_to_string(&path).map_err(|source| GateError::Persist {
                path: path.clone(),
                source,
            })?;
            let entries: BTreeMap<String, String> =
                serde_json::from_str(&content).map_err(|source| GateError::Serialization {
                    what: path.display().to_string(),
                    source,
                })?;

            for (key, value) in &entries {
                if self.insert_if_absent(namespace, key, value)? {
                    report.inserted += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        info!(
            dir = %dir.display(),
            inserted = report.inserted,
            skipped = report.skipped,
            "Cache imported"
        );
        Ok(report)
    }

    fn all_entries(&self, namespace: CacheNamespace) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {}, {} FROM {}",
            namespace.key_column(),
            namespace.value_column(),
            namespace.table()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| GateError::storage("prepare export query", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| GateError::storage("query export rows", e))?;

        let mut entries = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(|e| GateError::storage("read export row", e))?;
            entries.insert(key, value);
        }
        Ok(entries)
    }

    /// Flush the WAL into the main database file and close
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.checkpoint()?;
        info!(path = %self.cache_path.display(), "Result cache closed");
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")
            .map_err(|e| GateError::storage("checkpoint WAL", e))
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.checkpoint() {
            warn!("Failed to checkpoint WAL on ResultCache drop: {}", e);
        } else {
            debug!("WAL checkpoint completed on ResultCache drop");
        }
    }
}

fn short(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}

fn preview(value: &str) -> String {
    if value.chars().count() > SAMPLE_PREVIEW_CHARS {
        let head: String = value.chars().take(SAMPLE_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        value.to_string()
    }
}

/// Cache statistics for both namespaces
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub caption: NamespaceStats,
    pub story: NamespaceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    pub namespace: CacheNamespace,
    pub entries: usize,
    /// Most recent entries first
    pub samples: Vec<CacheSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSample {
    pub key: String,
    pub preview: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub captions: usize,
    pub stories: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
}
