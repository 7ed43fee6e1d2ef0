//! Persisted set of log line identifiers that have already been relayed.
//!
//! Identifiers live in an insertion-ordered LRU so the oldest entries fall out once
//! the cap is reached. On load, entries whose embedded epoch is older than the
//! retention window are dropped and the pruned set is written back straight away.

use anyhow::{bail, Context as AnyhowContext};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Prefixes below this are not treated as epochs (anything before Sept 2001).
const MIN_PLAUSIBLE_EPOCH: f64 = 1_000_000_000.0;
const MAX_RETENTION_DAYS: u64 = 36_500;

#[derive(Debug, Serialize, Deserialize)]
struct SeenLogFile {
    processed_logs: Vec<String>,
    last_updated: String,
    total_count: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSeenLog {
    Document(SeenLogFile),
    Legacy(Vec<String>),
}

impl StoredSeenLog {
    fn into_ids(self) -> Vec<String> {
        match self {
            StoredSeenLog::Document(doc) => doc.processed_logs,
            StoredSeenLog::Legacy(ids) => ids,
        }
    }
}

/// Extract the epoch from an identifier shaped like `<epoch>-<rest>`.
pub fn embedded_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let (prefix, _) = id.split_once('-')?;
    let secs: f64 = prefix.parse().ok()?;
    if !secs.is_finite() || secs < MIN_PLAUSIBLE_EPOCH {
        return None;
    }
    DateTime::from_timestamp(secs.trunc() as i64, 0)
}

pub struct SeenLog {
    path: PathBuf,
    retention: ChronoDuration,
    ids: LruCache<String, ()>,
}

impl SeenLog {
    pub fn new(path: impl Into<PathBuf>, retention_days: u64, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            path: path.into(),
            retention: ChronoDuration::days(retention_days.min(MAX_RETENTION_DAYS) as i64),
            ids: LruCache::new(cap),
        }
    }

    /// Load persisted identifiers. Never fails: unreadable state starts empty.
    pub fn load(path: impl Into<PathBuf>, retention_days: u64, max_entries: usize) -> Self {
        let mut store = Self::new(path, retention_days, max_entries);
        if !store.path.exists() {
            info!(
                "No seen-log state at {}, starting empty",
                store.path.display()
            );
            return store;
        }

        let ids = match read_ids(&store.path) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Ignoring unreadable seen-log state: {:#}", e);
                return store;
            }
        };

        let cutoff = Utc::now() - store.retention;
        let loaded = ids.len();
        let mut expired = 0usize;
        for id in ids {
            if embedded_timestamp(&id).is_some_and(|ts| ts < cutoff) {
                expired += 1;
                continue;
            }
            store.add(&id);
        }

        let dropped = loaded - store.len();
        info!(
            "Loaded {} seen log identifiers from {} ({} expired, {} over cap)",
            store.len(),
            store.path.display(),
            expired,
            dropped - expired
        );

        if dropped > 0 {
            if let Err(e) = store.save() {
                error!("Failed to write back pruned seen-log state: {:#}", e);
            }
        }
        store
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record an identifier. Adding one that is already present is a no-op.
    pub fn add(&mut self, id: &str) {
        if !self.ids.contains(id) {
            self.ids.put(id.to_string(), ());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifiers oldest first.
    fn ordered_ids(&self) -> Vec<String> {
        self.ids.iter().rev().map(|(id, _)| id.clone()).collect()
    }

    fn snapshot(&self) -> (PathBuf, SeenLogFile) {
        let processed_logs = self.ordered_ids();
        let file = SeenLogFile {
            total_count: processed_logs.len(),
            processed_logs,
            last_updated: Utc::now().to_rfc3339(),
        };
        (self.path.clone(), file)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let (path, file) = self.snapshot();
        write_state(&path, &file)
    }
}

fn read_ids(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let stored: StoredSeenLog = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(stored.into_ids())
}

fn write_state(path: &Path, file: &SeenLogFile) -> anyhow::Result<()> {
    let mut payload =
        serde_json::to_string_pretty(file).context("failed to serialize seen-log state")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
}

/// Write to a sibling temp file, then rename over the destination.
fn write_text_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("seen-log"),
        std::process::id()
    );
    let temp_path = parent.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

pub type SharedSeenLog = Arc<Mutex<SeenLog>>;

/// Background persistence for a [`SeenLog`].
///
/// Save requests set a single pending slot; any number of requests made while a
/// write is in flight collapse into one follow-up write. All writes, including
/// [`StateWriter::flush`], go through one lock so they never race on the file.
#[derive(Clone)]
pub struct StateWriter {
    store: SharedSeenLog,
    pending: Arc<Notify>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl StateWriter {
    pub fn new(store: SharedSeenLog) -> Self {
        Self {
            store,
            pending: Arc::new(Notify::new()),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Spawn the writer loop. It lives for the rest of the process.
    pub fn spawn(&self) -> JoinHandle<()> {
        let writer = self.clone();
        tokio::spawn(async move {
            loop {
                writer.pending.notified().await;
                if let Err(e) = writer.write_now().await {
                    error!("Failed to persist seen-log state: {:#}", e);
                }
            }
        })
    }

    /// Ask for a save. Returns immediately.
    pub fn request(&self) {
        self.pending.notify_one();
    }

    /// Write the current state synchronously with respect to the caller.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.write_now().await
    }

    async fn write_now(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let (path, file) = {
            let store = self
                .store
                .lock()
                .map_err(|_| anyhow::anyhow!("seen-log mutex is poisoned"))?;
            store.snapshot()
        };
        let count = file.total_count;
        tokio::task::spawn_blocking(move || write_state(&path, &file)).await??;
        debug!("Persisted {} seen log identifiers", count);
        Ok(())
    }
}
