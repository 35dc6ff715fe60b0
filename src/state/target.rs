//! Interfaces to the external debugger core.
//!
//! The state subsystem never talks to the instrumentation engine directly:
//! it reads session state through [`SessionStateSource`], re-applies
//! controls through [`ControlTarget`] and reads source text through
//! [`SourceAccessor`].

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::state::error::ControlError;
use crate::state::models::{FocusFilter, MemorySummary, RuntimeSummary, WatchRecord};

/// A breakpoint as currently set in the debugger, including the runtime
/// state a restore must carry over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBreakpoint {
    pub file: String,
    pub line: usize,
    pub condition: Option<String>,
    pub enabled: bool,
    pub temporary: bool,
    pub hits: u64,
    pub ignore_count: u64,
}

impl ActiveBreakpoint {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
            condition: None,
            enabled: true,
            temporary: false,
            hits: 0,
            ignore_count: 0,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn with_hits(mut self, hits: u64) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_ignore_count(mut self, ignore_count: u64) -> Self {
        self.ignore_count = ignore_count;
        self
    }
}

/// Owned copy of the debugger's controls at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub breakpoints: Vec<ActiveBreakpoint>,
    pub watches: Vec<WatchRecord>,
    pub focus_filters: Vec<FocusFilter>,
}

/// Read side of the debugger core, used when capturing snapshots.
///
/// Implementations hand out copies; the caller never holds a lock on the
/// debugger while a snapshot is written.
pub trait SessionStateSource: Send + Sync {
    fn current_control_state(&self) -> ControlState;

    fn current_runtime_summary(&self) -> Option<RuntimeSummary>;

    fn current_memory_summary(&self) -> Option<MemorySummary>;

    /// Compact conversation summary, already redacted by the agent layer.
    fn conversation_summary(&self) -> String;

    /// Files whose contents define snapshot compatibility.
    fn target_files(&self) -> Vec<PathBuf>;
}

/// Write side of the debugger core, used when restoring.
#[async_trait]
pub trait ControlTarget: Send + Sync {
    /// Whether controls can be applied right now (target attached and paused
    /// or otherwise accepting commands).
    fn is_ready(&self) -> bool;

    /// Remove every breakpoint, watch and focus filter so a restore replaces
    /// the session's controls instead of adding to them.
    async fn clear_controls(&self) -> Result<(), ControlError>;

    /// Set `breakpoint` with its condition, enabled flag, temporary flag,
    /// hit count and ignore count.
    async fn apply_breakpoint(&self, breakpoint: &ActiveBreakpoint) -> Result<(), ControlError>;

    async fn apply_watch(&self, watch: &WatchRecord) -> Result<(), ControlError>;

    async fn apply_focus_filter(&self, filter: &FocusFilter) -> Result<(), ControlError>;
}

/// Source text lookup used to capture and remap breakpoint context.
pub trait SourceAccessor: Send + Sync {
    /// Lines of `file`, or `None` when it cannot be read.
    fn lines(&self, file: &str) -> Option<Vec<String>>;
}

/// Reads source straight from disk, resolving relative paths against `root`.
#[derive(Debug, Clone, Default)]
pub struct FsSourceAccessor {
    root: Option<PathBuf>,
}

impl FsSourceAccessor {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl SourceAccessor for FsSourceAccessor {
    fn lines(&self, file: &str) -> Option<Vec<String>> {
        let path = self.resolve(file);
        match fs::read_to_string(&path) {
            Ok(contents) => Some(contents.lines().map(str::to_string).collect()),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Source file unavailable");
                None
            }
        }
    }
}
