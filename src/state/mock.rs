//! In-memory stand-ins for the debugger core.
//!
//! [`MockStateSource`] hands out configurable session state and
//! [`MockControlTarget`] records every control it is asked to apply, with
//! optional per-item failures and delays. [`ScriptedSampler`] feeds
//! synthetic resource readings to the perf recorder. The binary also uses
//! `MockControlTarget` as its detached target when no debugger is attached.
//!
//! # Example
//! ```no_run
//! use rewind::state::mock::{MockControlTarget, MockStateSource};
//! use rewind::state::target::ActiveBreakpoint;
//!
//! let source = MockStateSource::new().with_breakpoint(ActiveBreakpoint::new("app.py", 12));
//! let target = MockControlTarget::new().failing_breakpoint("app.py", 30);
//! ```

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::state::error::ControlError;
use crate::state::models::{FocusFilter, MemorySummary, RuntimeSummary, WatchRecord};
use crate::state::perf::{ResourceSample, ResourceSampler};
use crate::state::target::{ActiveBreakpoint, ControlState, ControlTarget, SessionStateSource};

#[derive(Debug, Clone, Default)]
struct SourceState {
    controls: ControlState,
    runtime: Option<RuntimeSummary>,
    memory: Option<MemorySummary>,
    summary: String,
    target_files: Vec<PathBuf>,
}

/// Session state held in memory. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockStateSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockStateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_breakpoint(self, breakpoint: ActiveBreakpoint) -> Self {
        self.add_breakpoint(breakpoint);
        self
    }

    pub fn with_watch(self, watch: WatchRecord) -> Self {
        self.add_watch(watch);
        self
    }

    pub fn with_focus_filter(self, filter: FocusFilter) -> Self {
        self.add_focus_filter(filter);
        self
    }

    pub fn with_target_file(self, path: impl Into<PathBuf>) -> Self {
        self.add_target_file(path);
        self
    }

    pub fn with_summary(self, summary: impl Into<String>) -> Self {
        self.set_summary(summary);
        self
    }

    pub fn with_runtime(self, runtime: RuntimeSummary) -> Self {
        self.state.lock().runtime = Some(runtime);
        self
    }

    pub fn with_memory(self, memory: MemorySummary) -> Self {
        self.state.lock().memory = Some(memory);
        self
    }

    pub fn add_breakpoint(&self, breakpoint: ActiveBreakpoint) {
        self.state.lock().controls.breakpoints.push(breakpoint);
    }

    pub fn add_watch(&self, watch: WatchRecord) {
        self.state.lock().controls.watches.push(watch);
    }

    pub fn add_focus_filter(&self, filter: FocusFilter) {
        self.state.lock().controls.focus_filters.push(filter);
    }

    /// Track `path` for compatibility keys; duplicates are ignored.
    pub fn add_target_file(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state.lock();
        if !state.target_files.contains(&path) {
            state.target_files.push(path);
        }
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        self.state.lock().summary = summary.into();
    }

    /// Flip `enabled` on every breakpoint at `file:line`; false when there is
    /// none.
    pub fn set_breakpoint_enabled(&self, file: &str, line: usize, enabled: bool) -> bool {
        let mut state = self.state.lock();
        let mut found = false;
        for bp in &mut state.controls.breakpoints {
            if bp.file == file && bp.line == line {
                bp.enabled = enabled;
                found = true;
            }
        }
        found
    }

    pub fn clear_controls(&self) {
        self.state.lock().controls = ControlState::default();
    }
}

impl SessionStateSource for MockStateSource {
    fn current_control_state(&self) -> ControlState {
        self.state.lock().controls.clone()
    }

    fn current_runtime_summary(&self) -> Option<RuntimeSummary> {
        self.state.lock().runtime.clone()
    }

    fn current_memory_summary(&self) -> Option<MemorySummary> {
        self.state.lock().memory.clone()
    }

    fn conversation_summary(&self) -> String {
        self.state.lock().summary.clone()
    }

    fn target_files(&self) -> Vec<PathBuf> {
        self.state.lock().target_files.clone()
    }
}

/// Behavior knobs for [`MockControlTarget`].
#[derive(Debug, Clone, Default)]
pub struct MockTargetConfig {
    /// `(file, line)` pairs whose breakpoints are rejected
    pub failing_breakpoints: HashSet<(String, usize)>,
    /// Watch expressions that are rejected
    pub failing_watches: HashSet<String>,
    /// Delay before each apply call completes
    pub apply_delay: Duration,
}

/// Control target that records applied items. Clones share recordings, and
/// clearing controls empties them.
#[derive(Debug, Clone)]
pub struct MockControlTarget {
    config: MockTargetConfig,
    ready: Arc<Mutex<bool>>,
    breakpoints: Arc<Mutex<Vec<ActiveBreakpoint>>>,
    watches: Arc<Mutex<Vec<WatchRecord>>>,
    filters: Arc<Mutex<Vec<FocusFilter>>>,
    mirror: Option<MockStateSource>,
}

impl Default for MockControlTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlTarget {
    /// A ready target that accepts everything.
    pub fn new() -> Self {
        Self {
            config: MockTargetConfig::default(),
            ready: Arc::new(Mutex::new(true)),
            breakpoints: Arc::new(Mutex::new(Vec::new())),
            watches: Arc::new(Mutex::new(Vec::new())),
            filters: Arc::new(Mutex::new(Vec::new())),
            mirror: None,
        }
    }

    /// Also add every applied control to `source`, so a restored session
    /// shows up in later snapshots.
    pub fn mirroring(mut self, source: MockStateSource) -> Self {
        self.mirror = Some(source);
        self
    }

    pub fn with_config(mut self, config: MockTargetConfig) -> Self {
        self.config = config;
        self
    }

    /// Start out not ready (no program attached).
    pub fn detached(self) -> Self {
        self.set_ready(false);
        self
    }

    pub fn failing_breakpoint(mut self, file: impl Into<String>, line: usize) -> Self {
        self.config.failing_breakpoints.insert((file.into(), line));
        self
    }

    pub fn failing_watch(mut self, expression: impl Into<String>) -> Self {
        self.config.failing_watches.insert(expression.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config.apply_delay = delay;
        self
    }

    pub fn set_ready(&self, ready: bool) {
        *self.ready.lock() = ready;
    }

    pub fn applied_breakpoints(&self) -> Vec<ActiveBreakpoint> {
        self.breakpoints.lock().clone()
    }

    pub fn applied_watches(&self) -> Vec<WatchRecord> {
        self.watches.lock().clone()
    }

    pub fn applied_filters(&self) -> Vec<FocusFilter> {
        self.filters.lock().clone()
    }

    async fn pause(&self) {
        if !self.config.apply_delay.is_zero() {
            tokio::time::sleep(self.config.apply_delay).await;
        }
    }

    fn check_ready(&self) -> Result<(), ControlError> {
        if *self.ready.lock() {
            Ok(())
        } else {
            Err(ControlError::NotReady)
        }
    }
}

#[async_trait]
impl ControlTarget for MockControlTarget {
    fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    async fn clear_controls(&self) -> Result<(), ControlError> {
        self.check_ready()?;
        self.breakpoints.lock().clear();
        self.watches.lock().clear();
        self.filters.lock().clear();
        if let Some(mirror) = &self.mirror {
            mirror.clear_controls();
        }
        Ok(())
    }

    async fn apply_breakpoint(&self, breakpoint: &ActiveBreakpoint) -> Result<(), ControlError> {
        self.pause().await;
        self.check_ready()?;
        if self
            .config
            .failing_breakpoints
            .contains(&(breakpoint.file.clone(), breakpoint.line))
        {
            return Err(ControlError::Application(format!(
                "cannot set breakpoint at {}:{}",
                breakpoint.file, breakpoint.line
            )));
        }
        if let Some(mirror) = &self.mirror {
            mirror.add_breakpoint(breakpoint.clone());
        }
        self.breakpoints.lock().push(breakpoint.clone());
        Ok(())
    }

    async fn apply_watch(&self, watch: &WatchRecord) -> Result<(), ControlError> {
        self.pause().await;
        self.check_ready()?;
        if self.config.failing_watches.contains(&watch.expression) {
            return Err(ControlError::Application(format!(
                "invalid watch expression: {}",
                watch.expression
            )));
        }
        if let Some(mirror) = &self.mirror {
            mirror.add_watch(watch.clone());
        }
        self.watches.lock().push(watch.clone());
        Ok(())
    }

    async fn apply_focus_filter(&self, filter: &FocusFilter) -> Result<(), ControlError> {
        self.pause().await;
        self.check_ready()?;
        if let Some(mirror) = &self.mirror {
            mirror.add_focus_filter(filter.clone());
        }
        self.filters.lock().push(filter.clone());
        Ok(())
    }
}

/// Replays a fixed list of samples, repeating the last one once exhausted.
///
/// The first sample becomes the recorder's session baseline.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    samples: Mutex<VecDeque<ResourceSample>>,
    last: Mutex<ResourceSample>,
}

impl ScriptedSampler {
    pub fn new(samples: Vec<ResourceSample>) -> Self {
        Self {
            samples: Mutex::new(samples.into()),
            last: Mutex::new(ResourceSample::default()),
        }
    }

    /// Always reports zero usage.
    pub fn constant() -> Self {
        Self::new(Vec::new())
    }
}

impl ResourceSampler for ScriptedSampler {
    fn sample(&self) -> ResourceSample {
        let mut last = self.last.lock();
        if let Some(next) = self.samples.lock().pop_front() {
            *last = next;
        }
        *last
    }
}
