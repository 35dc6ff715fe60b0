//! Filesystem-backed snapshot storage.
//!
//! One file per snapshot inside the state directory:
//!
//! ```text
//! 00000007-auto-auto-20240101T000000123456Z.snapshot.json
//! 00000008-named-checkpoint-1.snapshot.json
//! ```
//!
//! The leading sequence number gives a total newest-first order even when
//! several rolling checkpoints land in the same millisecond, and lets
//! eviction work from file names alone. Writes go through
//! [`atomic_write`], so a crash never leaves a half-written snapshot under
//! a `*.snapshot.json` name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::state::codec::SnapshotCodec;
use crate::state::error::{StateError, StateResult};
use crate::state::models::{CompatibilityKey, Snapshot, SnapshotKind};
use crate::state::scrub::ScrubConfig;
use crate::util::fs::{atomic_write, sweep_temp_files};

pub const SNAPSHOT_FILE_SUFFIX: &str = ".snapshot.json";
pub const DEFAULT_ROLLING_WINDOW: usize = 10;

/// Handle to a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRef {
    pub sequence: u64,
    pub id: String,
    pub kind: SnapshotKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub compatibility_key: CompatibilityKey,
    pub path: PathBuf,
}

impl StoredRef {
    fn from_snapshot(sequence: u64, snapshot: &Snapshot, path: PathBuf) -> Self {
        Self {
            sequence,
            id: snapshot.id.clone(),
            kind: snapshot.kind,
            reason: snapshot.reason.clone(),
            created_at: snapshot.created_at,
            compatibility_key: snapshot.compatibility_key.clone(),
            path,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.kind {
            SnapshotKind::Named => Some(&self.id),
            SnapshotKind::Auto => None,
        }
    }
}

/// Which snapshot a user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// Newest snapshot compatible with the current target files.
    Latest,
    Name(String),
    Path(PathBuf),
}

impl Selector {
    /// `""`/`latest` → [`Selector::Latest`]; an existing file or anything
    /// that looks like a path → [`Selector::Path`]; otherwise a name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("latest") {
            return Selector::Latest;
        }
        let path = Path::new(raw);
        if path.is_file() || raw.contains('/') || raw.contains('\\') || raw.ends_with(".json") {
            Selector::Path(path.to_path_buf())
        } else {
            Selector::Name(raw.to_string())
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Selector::Latest => "latest".to_string(),
            Selector::Name(name) => name.clone(),
            Selector::Path(path) => path.display().to_string(),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_display())
    }
}

/// A resolved selector plus any compatibility warnings.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub stored: StoredRef,
    pub warnings: Vec<String>,
}

/// Outcome of a save.
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub stored: StoredRef,
    pub redactions: usize,
    /// Rolling checkpoints removed to stay within the window.
    pub evicted: Vec<PathBuf>,
}

/// Parsed `<seq>-<kind>-<slug>.snapshot.json` file name.
#[derive(Debug, Clone)]
struct FileEntry {
    sequence: u64,
    kind: SnapshotKind,
    path: PathBuf,
}

fn parse_file_name(path: &Path) -> Option<FileEntry> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(SNAPSHOT_FILE_SUFFIX)?;
    let mut parts = stem.splitn(3, '-');
    let sequence = parts.next()?.parse().ok()?;
    let kind = SnapshotKind::parse(parts.next()?)?;
    Some(FileEntry {
        sequence,
        kind,
        path: path.to_path_buf(),
    })
}

/// File-name-safe rendering of a snapshot id.
pub fn slug(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '_');
    let cleaned: String = cleaned.chars().take(64).collect();
    if cleaned.is_empty() {
        "state".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    rolling_window: usize,
    codec: SnapshotCodec,
    next_sequence: AtomicU64,
}

impl SnapshotStore {
    /// Open (creating if needed) the state directory, sweeping temp files
    /// left by an interrupted write.
    pub fn open(
        dir: impl Into<PathBuf>,
        rolling_window: usize,
        codec: SnapshotCodec,
    ) -> StateResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StateError::storage(&dir, e))?;

        match sweep_temp_files(&dir) {
            Ok(0) => {}
            Ok(removed) => {
                tracing::info!(dir = %dir.display(), removed, "Removed stale snapshot temp files");
            }
            Err(e) => return Err(StateError::storage(&dir, e)),
        }

        let store = Self {
            dir,
            rolling_window: rolling_window.max(1),
            codec,
            next_sequence: AtomicU64::new(1),
        };
        let max_seen = store
            .scan()?
            .iter()
            .map(|entry| entry.sequence)
            .max()
            .unwrap_or(0);
        store.next_sequence.store(max_seen + 1, Ordering::SeqCst);
        Ok(store)
    }

    /// Open the configured state directory with the configured redaction
    /// patterns.
    pub fn from_config(config: &Config) -> StateResult<Self> {
        let scrub = ScrubConfig::with_extra_patterns(&config.redaction_patterns);
        Self::open(
            &config.state.dir,
            config.state.rolling_window,
            SnapshotCodec::new(scrub),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rolling_window(&self) -> usize {
        self.rolling_window
    }

    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    /// Persist `snapshot` as `kind`. Named snapshots use their id as name.
    pub fn save(&self, mut snapshot: Snapshot, kind: SnapshotKind) -> StateResult<SavedSnapshot> {
        snapshot.kind = kind;
        if kind == SnapshotKind::Named && snapshot.id.trim().is_empty() {
            return Err(StateError::InvalidName(snapshot.id));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let file_name = format!(
            "{sequence:08}-{}-{}{SNAPSHOT_FILE_SUFFIX}",
            kind.as_str(),
            slug(&snapshot.id)
        );
        let path = self.dir.join(file_name);

        let encoded = self.codec.encode(&snapshot)?;
        atomic_write(&path, &encoded.bytes).map_err(|e| StateError::storage(&path, e))?;
        tracing::debug!(
            path = %path.display(),
            kind = %kind,
            id = %snapshot.id,
            "Saved snapshot"
        );

        let evicted = if kind == SnapshotKind::Auto {
            self.evict_rolling()?
        } else {
            Vec::new()
        };

        Ok(SavedSnapshot {
            stored: StoredRef::from_snapshot(sequence, &snapshot, path),
            redactions: encoded.redactions,
            evicted,
        })
    }

    /// Every readable snapshot, newest first. Corrupt files are logged and
    /// skipped.
    pub fn list(&self) -> StateResult<Vec<StoredRef>> {
        let mut entries = self.scan()?;
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        let mut refs = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.read_snapshot(&entry.path) {
                Ok(snapshot) => {
                    refs.push(StoredRef::from_snapshot(entry.sequence, &snapshot, entry.path))
                }
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path.display(),
                        error = %e,
                        "Skipping unreadable snapshot"
                    );
                }
            }
        }
        Ok(refs)
    }

    /// Resolve a selector. `current_key` is the fingerprint of the current
    /// target files; mismatches produce warnings, never errors.
    pub fn resolve(
        &self,
        selector: &Selector,
        current_key: Option<&CompatibilityKey>,
    ) -> StateResult<Resolved> {
        let mut warnings = Vec::new();

        let stored = match selector {
            Selector::Latest => {
                let entries = self.list()?;
                let newest = entries.first().cloned().ok_or_else(|| {
                    StateError::NotFound(format!("no saved states in {}", self.dir.display()))
                })?;
                let compatible = current_key.and_then(|key| {
                    entries
                        .iter()
                        .find(|entry| &entry.compatibility_key == key)
                        .cloned()
                });
                match (current_key, compatible) {
                    (None, _) => newest,
                    (Some(_), Some(found)) => found,
                    (Some(_), None) => {
                        warnings.push(format!(
                            "No saved state matches the current target files; falling back to the most recent state '{}'. Breakpoints will be remapped best-effort.",
                            newest.id
                        ));
                        return Ok(Resolved {
                            stored: newest,
                            warnings,
                        });
                    }
                }
            }
            Selector::Name(name) => self
                .list()?
                .into_iter()
                .find(|entry| &entry.id == name)
                .ok_or_else(|| StateError::NotFound(name.clone()))?,
            Selector::Path(path) => {
                if !path.is_file() {
                    return Err(StateError::NotFound(path.display().to_string()));
                }
                let snapshot = self.read_snapshot(path)?;
                let sequence = parse_file_name(path).map(|e| e.sequence).unwrap_or(0);
                StoredRef::from_snapshot(sequence, &snapshot, path.clone())
            }
        };

        if let Some(key) = current_key {
            if &stored.compatibility_key != key {
                warnings.push(format!(
                    "State '{}' was captured against different target files (code drift detected). Breakpoints will be remapped best-effort.",
                    stored.id
                ));
            }
        }

        Ok(Resolved { stored, warnings })
    }

    /// Read a stored snapshot. Fails closed on corrupt or unknown-version
    /// files.
    pub fn load(&self, stored: &StoredRef) -> StateResult<Snapshot> {
        self.read_snapshot(&stored.path)
    }

    pub fn delete(&self, stored: &StoredRef) -> StateResult<()> {
        match fs::remove_file(&stored.path) {
            Ok(()) => {
                tracing::debug!(path = %stored.path.display(), "Deleted snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StateError::NotFound(stored.path.display().to_string()))
            }
            Err(e) => Err(StateError::storage(&stored.path, e)),
        }
    }

    fn read_snapshot(&self, path: &Path) -> StateResult<Snapshot> {
        let bytes = fs::read(path).map_err(|e| StateError::storage(path, e))?;
        SnapshotCodec::decode(&bytes)
    }

    fn scan(&self) -> StateResult<Vec<FileEntry>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| StateError::storage(&self.dir, e))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| StateError::storage(&self.dir, e))?;
            if let Some(parsed) = parse_file_name(&entry.path()) {
                entries.push(parsed);
            }
        }
        Ok(entries)
    }

    /// Drop the oldest rolling checkpoints beyond the window.
    fn evict_rolling(&self) -> StateResult<Vec<PathBuf>> {
        let mut autos: Vec<FileEntry> = self
            .scan()?
            .into_iter()
            .filter(|entry| entry.kind == SnapshotKind::Auto)
            .collect();
        if autos.len() <= self.rolling_window {
            return Ok(Vec::new());
        }

        autos.sort_by_key(|entry| entry.sequence);
        let excess = autos.len() - self.rolling_window;
        let mut evicted = Vec::with_capacity(excess);
        for entry in autos.into_iter().take(excess) {
            fs::remove_file(&entry.path).map_err(|e| StateError::storage(&entry.path, e))?;
            tracing::debug!(path = %entry.path.display(), "Evicted rolling checkpoint");
            evicted.push(entry.path);
        }
        Ok(evicted)
    }
}
