//! Labeled performance checkpoints and comparisons.
//!
//! Every checkpoint stores its offsets from the session baseline (the sample
//! taken when the recorder was created), so comparing any two checkpoints of
//! a session is a subtraction of cumulative values. Checkpoints are persisted
//! in `perf-index.json`, keyed by a time-ordered session id.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::error::{StateError, StateResult};
use crate::util::fs::atomic_write;

pub const PERF_INDEX_FILE: &str = "perf-index.json";
pub const PERF_INDEX_VERSION: u32 = 1;
/// Older sessions are dropped from the index beyond this many.
pub const MAX_INDEXED_SESSIONS: usize = 20;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Raw resource readings. `wall_ns` is monotonic, relative to an arbitrary
/// origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSample {
    pub wall_ns: u64,
    pub process_ns: u64,
    pub memory_bytes: Option<u64>,
}

pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Samples the current process: monotonic wall clock, process CPU time and
/// resident memory.
#[derive(Debug)]
pub struct ProcessSampler {
    origin: Instant,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&self) -> ResourceSample {
        ResourceSample {
            wall_ns: u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX),
            process_ns: process_cpu_ns(),
            memory_bytes: resident_memory_bytes(),
        }
    }
}

#[cfg(unix)]
fn process_cpu_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

#[cfg(not(unix))]
fn process_cpu_ns() -> u64 {
    0
}

#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<u64> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no memory-safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages.saturating_mul(page_size as u64))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn resident_memory_bytes() -> Option<u64> {
    // Peak RSS; the closest portable reading outside Linux.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: `usage` is a valid, writable rusage struct.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let max_rss = usage.ru_maxrss as u64;
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss.saturating_mul(1024))
    }
}

#[cfg(not(unix))]
fn resident_memory_bytes() -> Option<u64> {
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfCheckpoint {
    pub label: String,
    pub timestamp: DateTime<Utc>,
    /// Deltas against the previous checkpoint, or the session baseline for
    /// the first one.
    pub wall_delta_ms: f64,
    pub process_delta_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_delta_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_label: Option<String>,
    /// Offsets from the session baseline.
    pub wall_ns: u64,
    pub process_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub checkpoint: PerfCheckpoint,
    /// The earlier checkpoint with the same label, if one was overwritten.
    pub replaced: Option<PerfCheckpoint>,
}

/// `B - A` over the cumulative offsets of two checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfDiff {
    pub label_a: String,
    pub label_b: String,
    pub wall_delta_ns: i64,
    pub wall_delta_ms: f64,
    pub process_delta_ns: i64,
    pub process_delta_ms: f64,
    pub memory_delta_bytes: Option<i64>,
}

impl PerfDiff {
    pub fn between(a: &PerfCheckpoint, b: &PerfCheckpoint) -> Self {
        let wall_delta_ns = signed_delta(a.wall_ns, b.wall_ns);
        let process_delta_ns = signed_delta(a.process_ns, b.process_ns);
        Self {
            label_a: a.label.clone(),
            label_b: b.label.clone(),
            wall_delta_ns,
            wall_delta_ms: wall_delta_ns as f64 / NANOS_PER_MILLI,
            process_delta_ns,
            process_delta_ms: process_delta_ns as f64 / NANOS_PER_MILLI,
            memory_delta_bytes: match (a.memory_bytes, b.memory_bytes) {
                (Some(a), Some(b)) => Some(b - a),
                _ => None,
            },
        }
    }
}

fn signed_delta(from: u64, to: u64) -> i64 {
    (i128::from(to) - i128::from(from)).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfSessionRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub checkpoints: Vec<PerfCheckpoint>,
}

/// On-disk `perf-index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfIndex {
    pub schema_version: u32,
    /// Session id (UUID v7, so lexical order is chronological) to record.
    #[serde(default)]
    pub sessions: BTreeMap<String, PerfSessionRecord>,
}

impl Default for PerfIndex {
    fn default() -> Self {
        Self {
            schema_version: PERF_INDEX_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

impl PerfIndex {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PERF_INDEX_FILE)
    }

    /// Load the index from `dir`; a missing file is an empty index.
    pub fn load(dir: &Path) -> StateResult<Self> {
        let path = Self::path_in(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StateError::storage(&path, e)),
        };
        let index: PerfIndex =
            serde_json::from_slice(&bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        if index.schema_version != PERF_INDEX_VERSION {
            return Err(StateError::IncompatibleVersion {
                found: index.schema_version,
                min_supported: PERF_INDEX_VERSION,
                max_supported: PERF_INDEX_VERSION,
            });
        }
        Ok(index)
    }

    pub fn save(&self, dir: &Path) -> StateResult<()> {
        let path = Self::path_in(dir);
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        atomic_write(&path, &bytes).map_err(|e| StateError::storage(&path, e))
    }

    /// Most recent session id, if any.
    pub fn latest_session(&self) -> Option<(&String, &PerfSessionRecord)> {
        self.sessions.iter().next_back()
    }

    /// Compare two labels inside the most recent session that recorded both.
    pub fn compare_latest(&self, label_a: &str, label_b: &str) -> StateResult<PerfDiff> {
        for record in self.sessions.values().rev() {
            let a = record.checkpoints.iter().find(|c| c.label == label_a);
            let b = record.checkpoints.iter().find(|c| c.label == label_b);
            if let (Some(a), Some(b)) = (a, b) {
                return Ok(PerfDiff::between(a, b));
            }
        }
        let missing = if self.has_label(label_a) { label_b } else { label_a };
        Err(StateError::LabelNotFound(missing.to_string()))
    }

    fn has_label(&self, label: &str) -> bool {
        self.sessions
            .values()
            .any(|record| record.checkpoints.iter().any(|c| c.label == label))
    }

    fn prune(&mut self) {
        while self.sessions.len() > MAX_INDEXED_SESSIONS {
            let Some(oldest) = self.sessions.keys().next().cloned() else {
                break;
            };
            self.sessions.remove(&oldest);
        }
    }
}

/// Records checkpoints for one session.
pub struct PerfRecorder {
    dir: PathBuf,
    session_id: String,
    started_at: DateTime<Utc>,
    sampler: Box<dyn ResourceSampler>,
    baseline: ResourceSample,
    checkpoints: Vec<PerfCheckpoint>,
    last_comparison: Option<PerfDiff>,
}

impl PerfRecorder {
    /// Start a session in `dir`, taking the baseline sample now.
    pub fn new(dir: impl Into<PathBuf>, sampler: Box<dyn ResourceSampler>) -> Self {
        let baseline = sampler.sample();
        Self {
            dir: dir.into(),
            session_id: Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            sampler,
            baseline,
            checkpoints: Vec::new(),
            last_comparison: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn last_comparison(&self) -> Option<&PerfDiff> {
        self.last_comparison.as_ref()
    }

    /// Record a checkpoint. Without a label it is named `perf_<n>`.
    pub fn record(&mut self, label: Option<&str>) -> StateResult<Recorded> {
        let sample = self.sampler.sample();
        let label = match label.map(str::trim).filter(|l| !l.is_empty()) {
            Some(label) => label.to_string(),
            None => format!("perf_{}", self.checkpoints.len() + 1),
        };

        let replaced = self
            .checkpoints
            .iter()
            .position(|c| c.label == label)
            .map(|idx| self.checkpoints.remove(idx));
        if replaced.is_some() {
            tracing::warn!(label = %label, "Overwriting existing perf checkpoint");
        }

        let wall_ns = sample.wall_ns.saturating_sub(self.baseline.wall_ns);
        let process_ns = sample.process_ns.saturating_sub(self.baseline.process_ns);
        let memory_bytes = match (sample.memory_bytes, self.baseline.memory_bytes) {
            (Some(now), Some(base)) => Some(now as i64 - base as i64),
            _ => None,
        };

        let previous = self.checkpoints.last();
        let (prev_wall, prev_process, prev_memory) = match previous {
            Some(p) => (p.wall_ns, p.process_ns, p.memory_bytes),
            None => (0, 0, Some(0)),
        };
        let checkpoint = PerfCheckpoint {
            label,
            timestamp: Utc::now(),
            wall_delta_ms: signed_delta(prev_wall, wall_ns) as f64 / NANOS_PER_MILLI,
            process_delta_ms: signed_delta(prev_process, process_ns) as f64 / NANOS_PER_MILLI,
            memory_delta_bytes: match (memory_bytes, prev_memory) {
                (Some(now), Some(prev)) => Some(now - prev),
                _ => None,
            },
            baseline_label: previous.map(|p| p.label.clone()),
            wall_ns,
            process_ns,
            memory_bytes,
        };

        self.checkpoints.push(checkpoint.clone());
        self.persist()?;
        tracing::debug!(
            label = %checkpoint.label,
            wall_ms = checkpoint.wall_delta_ms,
            "Recorded perf checkpoint"
        );

        Ok(Recorded {
            checkpoint,
            replaced,
        })
    }

    /// Checkpoints of this session in recording order.
    pub fn list(&self) -> &[PerfCheckpoint] {
        &self.checkpoints
    }

    pub fn compare(&mut self, label_a: &str, label_b: &str) -> StateResult<PerfDiff> {
        let a = self.find(label_a)?;
        let b = self.find(label_b)?;
        let diff = PerfDiff::between(a, b);
        self.last_comparison = Some(diff.clone());
        Ok(diff)
    }

    /// The comparison a report should show: explicit labels, else the last
    /// comparison, else the two newest checkpoints.
    pub fn comparison_for_report(
        &mut self,
        labels: Option<(&str, &str)>,
    ) -> StateResult<Option<PerfDiff>> {
        if let Some((a, b)) = labels {
            return self.compare(a, b).map(Some);
        }
        if let Some(diff) = &self.last_comparison {
            return Ok(Some(diff.clone()));
        }
        match self.checkpoints.as_slice() {
            [.., older, newer] => Ok(Some(PerfDiff::between(older, newer))),
            _ => Ok(None),
        }
    }

    fn find(&self, label: &str) -> StateResult<&PerfCheckpoint> {
        self.checkpoints
            .iter()
            .find(|c| c.label == label)
            .ok_or_else(|| StateError::LabelNotFound(label.to_string()))
    }

    fn persist(&self) -> StateResult<()> {
        let mut index = match PerfIndex::load(&self.dir) {
            Ok(index) => index,
            Err(e @ (StateError::Decode(_) | StateError::IncompatibleVersion { .. })) => {
                tracing::warn!(error = %e, "Replacing unreadable perf index");
                PerfIndex::default()
            }
            Err(e) => return Err(e),
        };
        index.sessions.insert(
            self.session_id.clone(),
            PerfSessionRecord {
                started_at: self.started_at,
                checkpoints: self.checkpoints.clone(),
            },
        );
        index.prune();
        fs::create_dir_all(&self.dir).map_err(|e| StateError::storage(&self.dir, e))?;
        index.save(&self.dir)
    }
}

/// Inputs for [`render_perf_report`] beyond the comparison itself.
#[derive(Debug, Clone, Default)]
pub struct PerfReportContext {
    pub title: Option<String>,
    pub target: String,
    pub restore_selector: String,
    pub breakpoints: usize,
    pub focus_filters: Vec<String>,
}

/// Markdown write-up of a performance investigation.
pub fn render_perf_report(diff: Option<&PerfDiff>, ctx: &PerfReportContext) -> String {
    let title = ctx
        .title
        .as_deref()
        .unwrap_or("Performance regression investigation");
    let selector = match ctx.restore_selector.trim() {
        "" => "latest",
        s => s,
    };
    let target = if ctx.target.is_empty() {
        "<target>"
    } else {
        ctx.target.as_str()
    };

    let mut out = String::new();
    out.push_str(&format!("# {title}\n\n"));
    out.push_str("## Symptom\n- Potential performance issue under investigation.\n\n");
    out.push_str("## Reproduction\n");
    out.push_str(&format!("- Target: `{target}`\n"));
    out.push_str(&format!("- Restore command: `rewind --restore {selector}`\n\n"));

    out.push_str("## Checkpoint Comparison\n");
    match diff {
        Some(diff) => {
            out.push_str(&format!("- Baseline: `{}`\n", diff.label_a));
            out.push_str(&format!("- Current: `{}`\n", diff.label_b));
            out.push_str(&format!("- Wall delta: `{:.3} ms`\n", diff.wall_delta_ms));
            out.push_str(&format!("- CPU process delta: `{:.3} ms`\n", diff.process_delta_ms));
            match diff.memory_delta_bytes {
                Some(bytes) => out.push_str(&format!("- Memory delta: `{bytes} bytes`\n")),
                None => out.push_str("- Memory delta: `n/a`\n"),
            }
        }
        None => out.push_str("- No perf checkpoint comparison available yet.\n"),
    }
    out.push('\n');

    out.push_str("## Debugger Context\n");
    out.push_str(&format!("- Breakpoints: `{}`\n", ctx.breakpoints));
    let filters = if ctx.focus_filters.is_empty() {
        "(none)".to_string()
    } else {
        ctx.focus_filters.join(", ")
    };
    out.push_str(&format!("- Focus filters: `{filters}`\n\n"));

    out.push_str("## Next Verification Steps\n");
    out.push_str("- Restore the baseline state if needed.\n");
    out.push_str("- Rerun and collect fresh perf checkpoints around the target code path.\n");
    out.push_str("- Compare wall, CPU and memory deltas to confirm the regression.\n");
    out
}
