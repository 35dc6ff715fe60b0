//! One debugging session's view of the state subsystem.
//!
//! [`StateSession`] wires the store, rolling trigger, restore orchestrator
//! and perf recorder to the debugger interfaces, decides what to restore at
//! startup and executes [`StateCommand`]s into printable text.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::state::capture::{capture_snapshot, CaptureLimits};
use crate::state::commands::{StateCommand, HELP};
use crate::state::error::StateResult;
use crate::state::fingerprint::compute_compatibility_key;
use crate::state::models::{CompatibilityKey, SnapshotKind};
use crate::state::perf::{
    render_perf_report, PerfCheckpoint, PerfDiff, PerfRecorder, PerfReportContext, Recorded,
    ResourceSampler,
};
use crate::state::remap::BreakpointRemapper;
use crate::state::restore::{PendingRestore, RestoreOrchestrator, RestoreOutcome, RestoreReport};
use crate::state::store::{SavedSnapshot, Selector, SnapshotStore, StoredRef};
use crate::state::target::{ControlTarget, SessionStateSource, SourceAccessor};
use crate::state::trigger::{ActionKind, RollingCheckpointTrigger};

/// Label recorded by `--perf-mode` when the session opens.
pub const SESSION_START_LABEL: &str = "session-start";

/// A named save plus anything lossy that happened while capturing.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub saved: SavedSnapshot,
    pub warnings: Vec<String>,
}

pub struct StateSession {
    store: Arc<SnapshotStore>,
    trigger: RollingCheckpointTrigger,
    orchestrator: RestoreOrchestrator,
    perf: PerfRecorder,
    source: Arc<dyn SessionStateSource>,
    target: Arc<dyn ControlTarget>,
    accessor: Arc<dyn SourceAccessor>,
    limits: CaptureLimits,
    perf_mode: bool,
}

impl StateSession {
    pub fn open(
        config: &Config,
        source: Arc<dyn SessionStateSource>,
        target: Arc<dyn ControlTarget>,
        accessor: Arc<dyn SourceAccessor>,
        sampler: Box<dyn ResourceSampler>,
    ) -> StateResult<Self> {
        let store = Arc::new(SnapshotStore::from_config(config)?);
        let scrub = store.codec().scrub().clone();
        let limits = config.capture_limits();

        let trigger = RollingCheckpointTrigger::new(
            store.clone(),
            source.clone(),
            accessor.clone(),
            limits,
        )
        .with_enabled(config.state.auto_save);

        let orchestrator = RestoreOrchestrator::new(
            store.clone(),
            BreakpointRemapper::new(config.remap).with_scrub(scrub),
            accessor.clone(),
        )
        .with_item_timeout(config.restore.item_timeout);

        let perf = PerfRecorder::new(&config.state.dir, sampler);

        tracing::debug!(
            dir = %config.state.dir.display(),
            auto_save = config.state.auto_save,
            perf_mode = config.perf.enabled,
            "Opened state session"
        );

        Ok(Self {
            store,
            trigger,
            orchestrator,
            perf,
            source,
            target,
            accessor,
            limits,
            perf_mode: config.perf.enabled,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn perf(&self) -> &PerfRecorder {
        &self.perf
    }

    fn current_key(&self) -> CompatibilityKey {
        compute_compatibility_key(&self.source.target_files())
    }

    /// Session startup. A pending `restore-next` intent wins over the
    /// `--restore` request; with neither nothing is restored.
    pub async fn start(
        &mut self,
        requested: Option<&Selector>,
    ) -> StateResult<Option<RestoreOutcome>> {
        if self.perf_mode {
            self.perf.record(Some(SESSION_START_LABEL))?;
        }

        let key = self.current_key();
        if let Some(pending) = self.orchestrator.pending()? {
            if let Some(requested) = requested {
                tracing::info!(
                    pending = %pending.selector,
                    requested = %requested,
                    "Pending restore takes precedence over --restore"
                );
            }
            if !self.target.is_ready() {
                return Ok(Some(RestoreOutcome::Queued(pending)));
            }
            let report = self
                .orchestrator
                .resume_pending(self.target.as_ref(), Some(&key))
                .await?;
            return Ok(report.map(RestoreOutcome::Restored));
        }

        match requested {
            Some(selector) => self
                .orchestrator
                .restore_or_queue(selector, self.target.as_ref(), Some(&key))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Replay a queued restore once the target is ready. Call whenever the
    /// debugger stops.
    pub async fn poll_pending(&self) -> StateResult<Option<RestoreReport>> {
        let key = self.current_key();
        self.orchestrator
            .resume_pending(self.target.as_ref(), Some(&key))
            .await
    }

    /// Rolling checkpoint ahead of a state-changing action.
    pub fn before_action(&self, action: &ActionKind) -> Option<StoredRef> {
        self.trigger.on_state_change(action)
    }

    pub fn save_state(&self, name: Option<&str>) -> StateResult<SaveOutcome> {
        let generated;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                generated = format!("manual-{}", Utc::now().format("%Y%m%dT%H%M%SZ"));
                generated.as_str()
            }
        };
        let captured = capture_snapshot(
            self.source.as_ref(),
            self.accessor.as_ref(),
            &self.limits,
            self.store.codec().scrub(),
            SnapshotKind::Named,
            Some(name),
            "manual",
        );
        let mut saved = self.store.save(captured.snapshot, SnapshotKind::Named)?;
        saved.redactions += captured.redactions;
        Ok(SaveOutcome {
            saved,
            warnings: captured.warnings,
        })
    }

    pub async fn load_state(&self, selector: &Selector) -> StateResult<RestoreOutcome> {
        let key = self.current_key();
        self.orchestrator
            .restore_or_queue(selector, self.target.as_ref(), Some(&key))
            .await
    }

    pub fn restore_next(&self, selector: &Selector) -> StateResult<PendingRestore> {
        self.orchestrator.queue(selector)
    }

    pub fn list_states(&self) -> StateResult<Vec<StoredRef>> {
        self.store.list()
    }

    pub fn perf_checkpoint(&mut self, label: Option<&str>) -> StateResult<Recorded> {
        self.perf.record(label)
    }

    pub fn perf_checkpoints(&self) -> &[PerfCheckpoint] {
        self.perf.list()
    }

    pub fn perf_compare(&mut self, label_a: &str, label_b: &str) -> StateResult<PerfDiff> {
        self.perf.compare(label_a, label_b)
    }

    pub fn perf_report(&mut self, labels: Option<(&str, &str)>) -> StateResult<String> {
        let diff = self.perf.comparison_for_report(labels)?;
        let controls = self.source.current_control_state();
        let restore_selector = self
            .store
            .list()?
            .into_iter()
            .find(|stored| stored.kind == SnapshotKind::Named)
            .map(|stored| stored.id)
            .unwrap_or_else(|| "latest".to_string());
        let target = self
            .source
            .target_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let ctx = PerfReportContext {
            title: None,
            target,
            restore_selector,
            breakpoints: controls.breakpoints.len(),
            focus_filters: controls
                .focus_filters
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
        Ok(render_perf_report(diff.as_ref(), &ctx))
    }

    /// Execute a command and render its result for the terminal.
    pub async fn execute(&mut self, command: StateCommand) -> StateResult<String> {
        match command {
            StateCommand::SaveState { name } => {
                let outcome = self.save_state(name.as_deref())?;
                let mut out = format!(
                    "Saved state '{}' to {}",
                    outcome.saved.stored.id,
                    outcome.saved.stored.path.display()
                );
                if outcome.saved.redactions > 0 {
                    let _ = write!(out, "\n  {} secret(s) redacted", outcome.saved.redactions);
                }
                push_warnings(&mut out, &outcome.warnings);
                Ok(out)
            }
            StateCommand::LoadState { selector } => match self.load_state(&selector).await? {
                RestoreOutcome::Restored(report) => Ok(render_restore_report(&report)),
                RestoreOutcome::Queued(pending) => Ok(render_queued(&pending)),
            },
            StateCommand::ListStates => Ok(render_state_list(&self.list_states()?)),
            StateCommand::RestoreNext { selector } => {
                let pending = self.restore_next(&selector)?;
                Ok(render_queued(&pending))
            }
            StateCommand::PerfCheckpoint { label } => {
                let recorded = self.perf_checkpoint(label.as_deref())?;
                let mut out = format!("Recorded {}", render_checkpoint(&recorded.checkpoint));
                if recorded.replaced.is_some() {
                    out.push_str("\n  replaced an earlier checkpoint with the same label");
                }
                Ok(out)
            }
            StateCommand::PerfCheckpoints => Ok(render_checkpoints(self.perf_checkpoints())),
            StateCommand::PerfCompare { label_a, label_b } => {
                Ok(render_diff(&self.perf_compare(&label_a, &label_b)?))
            }
            StateCommand::PerfReport { labels } => {
                let labels = labels.as_ref().map(|(a, b)| (a.as_str(), b.as_str()));
                self.perf_report(labels)
            }
            StateCommand::Help => Ok(HELP.to_string()),
        }
    }
}

fn push_warnings(out: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    out.push_str("\nWarnings:");
    for warning in warnings {
        let _ = write!(out, "\n  - {warning}");
    }
}

pub fn render_queued(pending: &PendingRestore) -> String {
    format!(
        "Target is not ready; restore of '{}' queued for the next run",
        pending.selector
    )
}

pub fn render_restore_report(report: &RestoreReport) -> String {
    let mut out = format!("Restored state '{}'", report.snapshot_id);
    let _ = write!(
        out,
        "\n  breakpoints: {} applied, {} relocated, {} skipped",
        report.applied_breakpoints.len(),
        report.relocated_breakpoints.len(),
        report.skipped_breakpoints.len()
    );
    for bp in &report.applied_breakpoints {
        let _ = write!(out, "\n    applied   {}:{} ({})", bp.file, bp.line, bp.reason);
    }
    for bp in &report.relocated_breakpoints {
        let _ = write!(
            out,
            "\n    relocated {}:{} -> {} (confidence {:.2}): {}",
            bp.file,
            bp.saved_line,
            bp.line,
            bp.confidence.unwrap_or_default(),
            bp.reason
        );
    }
    for bp in &report.skipped_breakpoints {
        let _ = write!(out, "\n    skipped   {}:{}: {}", bp.file, bp.saved_line, bp.reason);
    }
    let _ = write!(
        out,
        "\n  watches: {} applied\n  focus filters: {} applied",
        report.watches_applied, report.filters_applied
    );
    if !report.summaries_loaded.conversation_summary.is_empty() {
        out.push_str("\n  conversation summary loaded");
    }
    push_warnings(&mut out, &report.warnings);
    out
}

pub fn render_state_list(states: &[StoredRef]) -> String {
    if states.is_empty() {
        return "No saved states".to_string();
    }
    let mut out = String::new();
    for (i, stored) in states.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(
            out,
            "{:>8}  {:<5}  {:<32}  {}  {:<18}  key={}",
            stored.sequence,
            stored.kind.as_str(),
            stored.id,
            stored.created_at.format("%Y-%m-%d %H:%M:%S"),
            stored.reason,
            stored.compatibility_key.short()
        );
    }
    out
}

fn render_checkpoint(checkpoint: &PerfCheckpoint) -> String {
    let memory = checkpoint
        .memory_delta_bytes
        .map(|b| format!("{b:+} bytes"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{}: wall {:+.3} ms, cpu {:+.3} ms, memory {} (since {})",
        checkpoint.label,
        checkpoint.wall_delta_ms,
        checkpoint.process_delta_ms,
        memory,
        checkpoint.baseline_label.as_deref().unwrap_or("session start")
    )
}

pub fn render_checkpoints(checkpoints: &[PerfCheckpoint]) -> String {
    if checkpoints.is_empty() {
        return "No perf checkpoints recorded".to_string();
    }
    checkpoints
        .iter()
        .map(render_checkpoint)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_diff(diff: &PerfDiff) -> String {
    let memory = diff
        .memory_delta_bytes
        .map(|b| format!("{b:+} bytes"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{} -> {}\n  wall: {:+.3} ms\n  cpu: {:+.3} ms\n  memory: {}",
        diff.label_a, diff.label_b, diff.wall_delta_ms, diff.process_delta_ms, memory
    )
}
