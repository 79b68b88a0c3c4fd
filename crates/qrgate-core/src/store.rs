//! Token store with DashMap + per-token parking_lot::Mutex
//!
//! Every token sits behind its own mutex inside a sharded map, so the
//! read-check-write sequence for one token is serialized while requests for
//! different tokens never wait on each other. Disk persistence is a separate
//! step (`flush`) that runs outside any token's critical section.

use crate::error::{GateError, Result};
use crate::models::Token;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable record of every token's state
pub struct TokenStore {
    /// Token id → token, each behind its own lock
    tokens: DashMap<String, Arc<Mutex<Token>>>,

    /// Backing JSON file (None for in-memory stores)
    path: Option<PathBuf>,

    /// Serializes file writes only
    flush_lock: Mutex<()>,

    /// Bumped on every mutation
    revision: AtomicU64,

    /// Revision last written to disk
    flushed_revision: AtomicU64,
}

impl TokenStore {
    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self {
            tokens: DashMap::new(),
            path: None,
            flush_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
            flushed_revision: AtomicU64::new(0),
        }
    }

    /// Open the token file at `path`; a missing file is an empty store
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self::in_memory();
        store.path = Some(path.to_path_buf());

        if !path.exists() {
            debug!(path = %path.display(), "No token file yet, starting empty");
            return Ok(store);
        }

        let content = std::fs::read_to_string(path).map_err(|source| GateError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: BTreeMap<String, Token> =
            serde_json::from_str(&content).map_err(|source| GateError::Serialization {
                what: path.display().to_string(),
                source,
            })?;

        for (id, mut token) in parsed {
            token.id = id.clone();
            store.tokens.insert(id, Arc::new(Mutex::new(token)));
        }

        info!(path = %path.display(), tokens = store.tokens.len(), "Token store loaded");
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token_id: &str) -> bool {
        self.tokens.contains_key(token_id)
    }

    /// Sorted token ids
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Clone the slot out so the shard lock is released before locking the token
    fn slot(&self, token_id: &str) -> Result<Arc<Mutex<Token>>> {
        self.tokens
            .get(token_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GateError::NotFound {
                token_id: token_id.to_string(),
            })
    }

    /// Snapshot of one token
    pub fn get(&self, token_id: &str) -> Option<Token> {
        self.slot(token_id).ok().map(|slot| slot.lock().clone())
    }

    /// Run `f` against a token while holding its lock
    pub fn read<R>(&self, token_id: &str, f: impl FnOnce(&Token) -> Result<R>) -> Result<R> {
        let slot = self.slot(token_id)?;
        let guard = slot.lock();
        f(&guard)
    }

    /// Atomic read-modify-write of one token
    ///
    /// `f` works on a copy; the copy replaces the stored token only when `f`
    /// returns Ok, so an error part-way through leaves the token untouched.
    pub fn update<R>(&self, token_id: &str, f: impl FnOnce(&mut Token) -> Result<R>) -> Result<R> {
        let slot = self.slot(token_id)?;
        let mut guard = slot.lock();

        let mut draft = guard.clone();
        let result = f(&mut draft)?;
        *guard = draft;

        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    /// Insert a freshly provisioned token; existing ids are left alone
    pub fn insert_new(&self, token: Token) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.tokens.entry(token.id.clone()) {
            Entry::Occupied(_) => {
                warn!(token_id = %token.id, "Token id already exists, skipping");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(token)));
                self.revision.fetch_add(1, Ordering::SeqCst);
                true
            }
        }
    }

    /// Insert a batch, returning how many were new
    pub fn insert_all(&self, tokens: impl IntoIterator<Item = Token>) -> usize {
        tokens
            .into_iter()
            .filter(|token| self.insert_new(token.clone()))
            .count()
    }

    /// Consistent per-token snapshots of the whole store, keyed by id
    pub fn snapshot(&self) -> BTreeMap<String, Token> {
        let slots: Vec<(String, Arc<Mutex<Token>>)> = self
            .tokens
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        slots
            .into_iter()
            .map(|(id, slot)| {
                let token = slot.lock().clone();
                (id, token)
            })
            .collect()
    }

    /// Whether mutations exist that the token file does not have yet
    pub fn is_dirty(&self) -> bool {
        self.revision.load(Ordering::SeqCst) > self.flushed_revision.load(Ordering::SeqCst)
    }

    /// Write the token file if anything changed since the last flush
    ///
    /// Blocks until the file holds every mutation made before the call.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.flush_lock.lock();
        if !self.is_dirty() && path.exists() {
            return Ok(());
        }
        self.write_file(path)
    }

    /// Coalescing flush for the request path
    ///
    /// Only one caller writes at a time; the others return at once and the
    /// writer keeps going until no mutation is left unwritten. Every change
    /// made before this call is picked up either by this caller or by the
    /// writer currently holding the lock.
    pub fn flush_pending(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        while self.is_dirty() {
            let Some(_guard) = self.flush_lock.try_lock() else {
                debug!("Flush already in progress, coalescing");
                return Ok(());
            };
            // Re-checked under the lock: the previous writer may have covered us
            if self.is_dirty() {
                self.write_file(path)?;
            }
        }
        Ok(())
    }

    /// Snapshot and write; caller holds `flush_lock`
    ///
    /// Written to a sibling temp file and renamed into place, so readers never
    /// see a half-written file.
    fn write_file(&self, path: &Path) -> Result<()> {
        // Read before the snapshot so the snapshot covers at least this revision
        let revision = self.revision.load(Ordering::SeqCst);
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot).map_err(|source| {
            GateError::Serialization {
                what: "token store".to_string(),
                source,
            }
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| GateError::Persist {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| GateError::Persist {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| GateError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

        self.flushed_revision.fetch_max(revision, Ordering::SeqCst);
        debug!(path = %path.display(), tokens = snapshot.len(), revision, "Token store flushed");
        Ok(())
    }
}
