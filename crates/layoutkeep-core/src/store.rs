//! Bounded arrangement history per key with debounced persistence.
//!
//! # Data flow
//!
//! ```text
//! set / delete_arrangement → in-memory histories + dirty keys → (debounce) → flush
//!                                                                     ↓
//!                                              PersistenceBackend (one unit per key)
//! ```
//!
//! Each key keeps at most `max_entries` records, oldest evicted first. Every
//! mutation marks its key dirty and re-arms a single flush timer; the flush
//! writes the whole history of each dirty key as one unit, or deletes the
//! unit once the history is empty. A unit that fails to write stays dirty for
//! the next cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::snapshot::{Snapshot, deserialize_any_version, epoch_ms};

// =============================================================================
// Configuration
// =============================================================================

/// Store settings (`[store]` in layoutkeep.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for persisted units. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Quiet period before dirty keys are written.
    pub debounce_ms: u64,
    /// History length used when a caller does not ask for one.
    pub default_max_entries: usize,
    /// Upper bound for any requested history length.
    pub max_entries_limit: usize,
}

impl StoreConfig {
    /// Largest history length the store supports.
    pub const HARD_MAX_ENTRIES: usize = 5;

    /// Clamp a requested history length into `1..=max_entries_limit`.
    #[must_use]
    pub fn clamp_entries(&self, requested: Option<usize>) -> usize {
        let limit = self.max_entries_limit.clamp(1, Self::HARD_MAX_ENTRIES);
        requested.unwrap_or(self.default_max_entries).clamp(1, limit)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            debounce_ms: 2000,
            default_max_entries: 1,
            max_entries_limit: Self::HARD_MAX_ENTRIES,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One saved arrangement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrangementRecord {
    #[serde(deserialize_with = "deserialize_any_version")]
    pub arrangement: Snapshot,
    /// Epoch milliseconds.
    pub saved_at: u64,
}

/// On-disk unit: current list form or the older single-record form.
#[derive(Deserialize)]
#[serde(untagged)]
enum PersistedUnit {
    History(Vec<ArrangementRecord>),
    Single(ArrangementRecord),
}

// =============================================================================
// Persistence backends
// =============================================================================

/// Where persisted units live.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Every stored unit as `(key, json)`.
    async fn load_all(&self) -> Result<Vec<(String, String)>, StoreError>;

    async fn save(&self, key: &str, data: &str) -> Result<(), StoreError>;

    /// Remove a unit. Removing a missing unit is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// One JSON file per key; the file name is the URL-safe base64 of the key.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }

    fn key_for(file_name: &str) -> Option<String> {
        let stem = file_name.strip_suffix(".json")?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn backend_error(key: &str, e: &std::io::Error) -> StoreError {
        StoreError::Backend {
            key: key.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn load_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::backend_error("*", &e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::backend_error("*", &e))?
        {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(Self::key_for) else {
                debug!(file = ?name, "skipping foreign file in data dir");
                continue;
            };
            let text = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| Self::backend_error(&key, &e))?;
            out.push((key, text));
        }
        out.sort();
        Ok(out)
    }

    async fn save(&self, key: &str, data: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::backend_error(key, &e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Self::backend_error(key, &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::backend_error(key, &e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::backend_error(key, &e)),
        }
    }
}

/// Backend kept in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    units: Mutex<BTreeMap<String, String>>,
    failing: Mutex<BTreeSet<String>>,
    saves: AtomicUsize,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated backend.
    pub fn with_units<K, V>(units: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let backend = Self::default();
        backend
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(units.into_iter().map(|(k, v)| (k.into(), v.into())));
        backend
    }

    #[must_use]
    pub fn unit(&self, key: &str) -> Option<String> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make saves of `key` fail until [`allow_saves`](Self::allow_saves).
    pub fn fail_saves(&self, key: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn allow_saves(&self, key: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn save(&self, key: &str, data: &str) -> Result<(), StoreError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
        {
            return Err(StoreError::Backend {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), data.to_string());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Default)]
struct StoreState {
    initialized: bool,
    histories: BTreeMap<String, Vec<ArrangementRecord>>,
    dirty: BTreeSet<String>,
}

struct StoreInner {
    backend: Arc<dyn PersistenceBackend>,
    config: StoreConfig,
    state: tokio::sync::Mutex<StoreState>,
    flush_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Per-key arrangement history. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ArrangementStore {
    inner: Arc<StoreInner>,
}

fn sort_and_evict(history: &mut Vec<ArrangementRecord>, max_entries: usize) {
    history.sort_by_key(|r| r.saved_at);
    let excess = history.len().saturating_sub(max_entries);
    if excess > 0 {
        history.drain(..excess);
    }
}

impl ArrangementStore {
    pub fn new(backend: Arc<dyn PersistenceBackend>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                state: tokio::sync::Mutex::new(StoreState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Load all persisted units. Runs once; later calls return immediately.
    ///
    /// Single-record units from older versions are converted to list form
    /// and marked dirty so the next flush rewrites them. Unreadable units are
    /// skipped with a warning.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        let units = self.inner.backend.load_all().await?;
        let limit = self.inner.config.clamp_entries(Some(StoreConfig::HARD_MAX_ENTRIES));
        let mut upgraded = 0;
        for (key, text) in units {
            let mut history = match serde_json::from_str::<PersistedUnit>(&text) {
                Ok(PersistedUnit::History(history)) => history,
                Ok(PersistedUnit::Single(record)) => {
                    state.dirty.insert(key.clone());
                    upgraded += 1;
                    vec![record]
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable arrangement unit");
                    continue;
                }
            };
            sort_and_evict(&mut history, limit);
            if !history.is_empty() {
                state.histories.insert(key, history);
            }
        }
        state.initialized = true;
        info!(keys = state.histories.len(), upgraded, "arrangement store loaded");
        drop(state);
        if upgraded > 0 {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Append a record saved now. Returns its timestamp.
    pub async fn set(
        &self,
        key: &str,
        arrangement: Snapshot,
        max_entries: Option<usize>,
    ) -> Result<u64, StoreError> {
        let saved_at = epoch_ms();
        self.set_at(key, arrangement, max_entries, saved_at).await?;
        Ok(saved_at)
    }

    /// Append a record with an explicit timestamp, then evict the oldest
    /// records beyond `max_entries` (clamped to the configured limit).
    pub async fn set_at(
        &self,
        key: &str,
        arrangement: Snapshot,
        max_entries: Option<usize>,
        saved_at: u64,
    ) -> Result<(), StoreError> {
        self.initialize().await?;
        let max_entries = self.inner.config.clamp_entries(max_entries);
        {
            let mut state = self.inner.state.lock().await;
            let history = state.histories.entry(key.to_string()).or_default();
            history.push(ArrangementRecord {
                arrangement,
                saved_at,
            });
            sort_and_evict(history, max_entries);
            debug!(key = %key, saved_at, kept = history.len(), max_entries, "arrangement saved");
            state.dirty.insert(key.to_string());
        }
        self.schedule_flush();
        Ok(())
    }

    /// Newest record for `key`.
    pub async fn get(&self, key: &str) -> Result<Option<ArrangementRecord>, StoreError> {
        self.initialize().await?;
        let state = self.inner.state.lock().await;
        Ok(state.histories.get(key).and_then(|h| h.last().cloned()))
    }

    /// All records for `key`, newest first.
    pub async fn get_all(&self, key: &str) -> Result<Vec<ArrangementRecord>, StoreError> {
        self.initialize().await?;
        let state = self.inner.state.lock().await;
        Ok(state
            .histories
            .get(key)
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.initialize().await?;
        Ok(self.inner.state.lock().await.histories.keys().cloned().collect())
    }

    /// Remove one record. When several records share `saved_at`, only the
    /// oldest is removed. The key disappears with its last record.
    pub async fn delete_arrangement(&self, key: &str, saved_at: u64) -> Result<bool, StoreError> {
        self.initialize().await?;
        let removed = {
            let mut state = self.inner.state.lock().await;
            let Some(history) = state.histories.get_mut(key) else {
                return Ok(false);
            };
            let removed = match history.iter().position(|r| r.saved_at == saved_at) {
                Some(index) => {
                    history.remove(index);
                    true
                }
                None => false,
            };
            if history.is_empty() {
                state.histories.remove(key);
            }
            if removed {
                state.dirty.insert(key.to_string());
            }
            removed
        };
        if removed {
            debug!(key = %key, saved_at, "arrangement deleted");
            self.schedule_flush();
        }
        Ok(removed)
    }

    /// Remove every record for `key`.
    pub async fn delete_key(&self, key: &str) -> Result<bool, StoreError> {
        self.initialize().await?;
        let removed = {
            let mut state = self.inner.state.lock().await;
            let removed = state.histories.remove(key).is_some();
            if removed {
                state.dirty.insert(key.to_string());
            }
            removed
        };
        if removed {
            self.schedule_flush();
        }
        Ok(removed)
    }

    /// Keys with unflushed changes.
    pub async fn dirty_keys(&self) -> Vec<String> {
        self.inner.state.lock().await.dirty.iter().cloned().collect()
    }

    /// Write every dirty key now. Returns the number of units written or
    /// deleted; failed units stay dirty.
    ///
    /// Flushes run one at a time. A flush that has taken the dirty set always
    /// finishes, so every taken key is either written or marked dirty again.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let _flushing = self.inner.flush_lock.lock().await;
        let mut failed = Vec::new();
        let pending: Vec<(String, Option<String>)> = {
            let mut state = self.inner.state.lock().await;
            let dirty = std::mem::take(&mut state.dirty);
            let mut pending = Vec::with_capacity(dirty.len());
            for key in dirty {
                let data = match state.histories.get(&key) {
                    Some(history) => match serde_json::to_string(history) {
                        Ok(data) => Some(data),
                        Err(e) => {
                            warn!(key = %key, error = %e, "cannot encode arrangement unit");
                            failed.push(key);
                            continue;
                        }
                    },
                    None => None,
                };
                pending.push((key, data));
            }
            pending
        };

        let mut written = 0;
        for (key, data) in pending {
            let result = match &data {
                Some(data) => self.inner.backend.save(&key, data).await,
                None => self.inner.backend.delete(&key).await,
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "flush failed, will retry");
                    failed.push(key);
                }
            }
        }
        if !failed.is_empty() {
            self.inner.state.lock().await.dirty.extend(failed);
        }
        debug!(written, "arrangement store flushed");
        Ok(written)
    }

    /// Cancel any pending timer and start a new quiet period.
    fn schedule_flush(&self) {
        let store = self.clone();
        let delay = Duration::from_millis(self.inner.config.debounce_ms);
        let mut timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        // Aborting only ever cancels the sleep; the write runs detached.
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(async move {
                if let Err(e) = store.flush().await {
                    warn!(error = %e, "debounced flush failed");
                }
            });
        }));
    }

    /// Cancel the timer and flush synchronously. Waits for any flush already
    /// in progress.
    pub async fn cleanup(&self) -> Result<usize, StoreError> {
        if let Some(timer) = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        self.flush().await
    }

    /// Every history, oldest record first.
    pub async fn export_all(&self) -> Result<BTreeMap<String, Vec<ArrangementRecord>>, StoreError> {
        self.initialize().await?;
        Ok(self.inner.state.lock().await.histories.clone())
    }

    /// Replace all histories with `histories`.
    pub async fn replace_all(
        &self,
        histories: BTreeMap<String, Vec<ArrangementRecord>>,
    ) -> Result<(), StoreError> {
        self.initialize().await?;
        let limit = self.inner.config.clamp_entries(Some(StoreConfig::HARD_MAX_ENTRIES));
        {
            let mut state = self.inner.state.lock().await;
            let old_keys: Vec<String> = state.histories.keys().cloned().collect();
            state.dirty.extend(old_keys);
            state.histories.clear();
            for (key, mut history) in histories {
                sort_and_evict(&mut history, limit);
                if !history.is_empty() {
                    state.dirty.insert(key.clone());
                    state.histories.insert(key, history);
                }
            }
        }
        self.schedule_flush();
        Ok(())
    }

    /// Merge `histories` into the store. Records with an existing timestamp
    /// are skipped; eviction uses the configured limit.
    pub async fn merge_all(
        &self,
        histories: BTreeMap<String, Vec<ArrangementRecord>>,
    ) -> Result<(), StoreError> {
        self.initialize().await?;
        let limit = self.inner.config.clamp_entries(Some(StoreConfig::HARD_MAX_ENTRIES));
        {
            let mut state = self.inner.state.lock().await;
            for (key, incoming) in histories {
                let history = state.histories.entry(key.clone()).or_default();
                let existing: BTreeSet<u64> = history.iter().map(|r| r.saved_at).collect();
                history.extend(incoming.into_iter().filter(|r| !existing.contains(&r.saved_at)));
                sort_and_evict(history, limit);
                if history.is_empty() {
                    state.histories.remove(&key);
                } else {
                    state.dirty.insert(key);
                }
            }
        }
        self.schedule_flush();
        Ok(())
    }
}
