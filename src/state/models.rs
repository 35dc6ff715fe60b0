//! Plain-data model for persisted debugging-session state.
//!
//! Everything here is owned by value: a [`Snapshot`] is built from copies of
//! the debugger's in-memory state and is never mutated once persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker appended when bounded text had to be cut.
pub const TRUNCATION_MARKER: &str = "…[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Explicitly saved by the user, never auto-evicted.
    Named,
    /// Rolling checkpoint taken before a state-changing action.
    Auto,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Named => "named",
            SnapshotKind::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "named" => Some(SnapshotKind::Named),
            "auto" => Some(SnapshotKind::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fingerprint of the target file set (paths + sizes + content hashes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompatibilityKey(pub String);

impl CompatibilityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First 12 hex chars, for listings.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for CompatibilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: SnapshotKind,
    /// Why the snapshot was taken (`manual`, `before:breakpoint`, ...).
    #[serde(default)]
    pub reason: String,
    pub compatibility_key: CompatibilityKey,
    /// Files that went into `compatibility_key`.
    #[serde(default)]
    pub target_files: Vec<String>,
    #[serde(default)]
    pub breakpoints: Vec<BreakpointRecord>,
    #[serde(default)]
    pub watches: Vec<WatchRecord>,
    #[serde(default)]
    pub focus_filters: BTreeSet<FocusFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_summary: Option<RuntimeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_summary: Option<MemorySummary>,
    #[serde(default)]
    pub conversation_summary: String,
}

impl Snapshot {
    /// Display name for named snapshots, `None` for rolling ones.
    pub fn name(&self) -> Option<&str> {
        match self.kind {
            SnapshotKind::Named => Some(&self.id),
            SnapshotKind::Auto => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub file: String,
    /// 1-based line, best known at capture time.
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Removed by the debugger after its first hit.
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub hits: u64,
    /// Hits still to be ignored before the breakpoint stops.
    #[serde(default)]
    pub ignore_count: u64,
    /// Source lines around the breakpoint at capture time.
    #[serde(default)]
    pub context_snippet: Vec<String>,
    /// Index of the breakpoint line inside `context_snippet`.
    #[serde(default)]
    pub snippet_anchor: usize,
    #[serde(default)]
    pub snippet_hash: String,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRecord {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl WatchRecord {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusScope {
    File,
    Module,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FocusFilter {
    pub pattern: String,
    pub scope: FocusScope,
    pub mode: FocusMode,
}

impl FocusFilter {
    pub fn include(scope: FocusScope, pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            scope,
            mode: FocusMode::Include,
        }
    }

    pub fn exclude(scope: FocusScope, pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            scope,
            mode: FocusMode::Exclude,
        }
    }
}

impl fmt::Display for FocusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.mode {
            FocusMode::Include => '+',
            FocusMode::Exclude => '-',
        };
        let scope = match self.scope {
            FocusScope::File => "file",
            FocusScope::Module => "module",
            FocusScope::Function => "function",
        };
        write!(f, "{sign}{scope}:{}", self.pattern)
    }
}

impl std::str::FromStr for FocusFilter {
    type Err = String;

    /// Parses the `Display` form: `[+|-]scope:pattern`, include by default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (mode, rest) = match s.strip_prefix('-') {
            Some(rest) => (FocusMode::Exclude, rest),
            None => (FocusMode::Include, s.strip_prefix('+').unwrap_or(s)),
        };
        let (scope, pattern) = rest
            .split_once(':')
            .ok_or_else(|| format!("expected [+|-]scope:pattern, got {s:?}"))?;
        let scope = match scope {
            "file" => FocusScope::File,
            "module" => FocusScope::Module,
            "function" => FocusScope::Function,
            other => return Err(format!("unknown focus scope {other:?}")),
        };
        if pattern.is_empty() {
            return Err("empty focus pattern".to_string());
        }
        Ok(Self {
            pattern: pattern.to_string(),
            scope,
            mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSummary {
    pub function: String,
    pub file: String,
    pub line: usize,
}

/// Where the target last stopped, as reported by the instrumentation core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_location: Option<SourceLocation>,
    #[serde(default)]
    pub stack_frames: Vec<FrameSummary>,
    /// Variable name to a bounded textual rendering of its value.
    #[serde(default)]
    pub safe_locals: BTreeMap<String, String>,
}

/// Aggregated memory metadata; never a raw heap dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub label: String,
    #[serde(default)]
    pub traced: BTreeMap<String, f64>,
}

/// Cut `text` to at most `budget` characters, marker included.
///
/// Returns the bounded text and the number of characters removed.
pub fn bound_text(text: &str, budget: usize) -> (String, Option<usize>) {
    let total = text.chars().count();
    if total <= budget {
        return (text.to_string(), None);
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if budget <= marker_len {
        return (text.chars().take(budget).collect(), Some(total - budget));
    }
    let keep = budget - marker_len;
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    (out, Some(total - keep))
}
