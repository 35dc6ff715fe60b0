//! Best-effort restore of a saved snapshot into the live debugger.
//!
//! Restore never fails because of a single item. Breakpoints the remapper
//! cannot place, controls the debugger rejects and controls that time out
//! all become skipped entries plus a warning in the [`RestoreReport`]. Only
//! store-level problems (unreadable state directory, corrupt snapshot) are
//! returned as errors.
//!
//! When the target is not ready the request is persisted as a pending
//! intent (`pending-restore.json`) and replayed by [`RestoreOrchestrator::resume_pending`]
//! on the next run or as soon as the target becomes ready.

use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::state::error::{ControlError, StateError, StateResult};
use crate::state::models::{CompatibilityKey, MemorySummary, RuntimeSummary};
use crate::state::remap::{BreakpointRemapper, RemapResult};
use crate::state::store::{Selector, SnapshotStore};
use crate::state::target::{ControlTarget, SourceAccessor};
use crate::util::fs::atomic_write;

pub const PENDING_RESTORE_FILE: &str = "pending-restore.json";
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(2);

/// A restore request waiting for the target to become ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRestore {
    pub selector: Selector,
    pub requested_at: DateTime<Utc>,
}

/// Breakpoint that made it into the debugger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoredBreakpoint {
    pub file: String,
    pub saved_line: usize,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBreakpoint {
    pub file: String,
    pub saved_line: usize,
    pub reason: String,
}

/// Opaque summaries handed back to the caller (agent layer, UI).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadedSummaries {
    pub conversation_summary: String,
    pub runtime_summary: Option<RuntimeSummary>,
    pub memory_summary: Option<MemorySummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub applied_breakpoints: Vec<RestoredBreakpoint>,
    pub relocated_breakpoints: Vec<RestoredBreakpoint>,
    pub skipped_breakpoints: Vec<SkippedBreakpoint>,
    pub watches_applied: usize,
    pub filters_applied: usize,
    pub summaries_loaded: LoadedSummaries,
    pub warnings: Vec<String>,
}

impl RestoreReport {
    pub fn breakpoints_restored(&self) -> usize {
        self.applied_breakpoints.len() + self.relocated_breakpoints.len()
    }
}

#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    Restored(RestoreReport),
    Queued(PendingRestore),
}

pub struct RestoreOrchestrator {
    store: Arc<SnapshotStore>,
    remapper: BreakpointRemapper,
    accessor: Arc<dyn SourceAccessor>,
    item_timeout: Duration,
}

impl RestoreOrchestrator {
    pub fn new(
        store: Arc<SnapshotStore>,
        remapper: BreakpointRemapper,
        accessor: Arc<dyn SourceAccessor>,
    ) -> Self {
        Self {
            store,
            remapper,
            accessor,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    fn pending_path(&self) -> PathBuf {
        self.store.dir().join(PENDING_RESTORE_FILE)
    }

    /// Persist a restore request for the next opportunity. Replaces any
    /// earlier request.
    ///
    /// The selector is resolved first so a name that matches nothing is
    /// reported now instead of when the request is replayed.
    pub fn queue(&self, selector: &Selector) -> StateResult<PendingRestore> {
        self.store.resolve(selector, None)?;
        let pending = PendingRestore {
            selector: selector.clone(),
            requested_at: Utc::now(),
        };
        let path = self.pending_path();
        let bytes = serde_json::to_vec_pretty(&pending)?;
        atomic_write(&path, &bytes).map_err(|e| StateError::storage(&path, e))?;
        tracing::info!(selector = %selector, "Queued restore for next run");
        Ok(pending)
    }

    /// Peek at the pending request without consuming it.
    pub fn pending(&self) -> StateResult<Option<PendingRestore>> {
        let path = self.pending_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::storage(&path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(pending) => Ok(Some(pending)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable pending restore");
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    /// Consume the pending request, if any.
    pub fn take_pending(&self) -> StateResult<Option<PendingRestore>> {
        let pending = self.pending()?;
        if pending.is_some() {
            let path = self.pending_path();
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StateError::storage(&path, e)),
            }
        }
        Ok(pending)
    }

    /// Restore now if the target is ready, otherwise queue.
    pub async fn restore_or_queue(
        &self,
        selector: &Selector,
        target: &dyn ControlTarget,
        current_key: Option<&CompatibilityKey>,
    ) -> StateResult<RestoreOutcome> {
        if !target.is_ready() {
            return self.queue(selector).map(RestoreOutcome::Queued);
        }
        self.restore(selector, target, current_key)
            .await
            .map(RestoreOutcome::Restored)
    }

    /// Replay a pending request once the target is ready. Leaves the request
    /// in place while the target is still not ready.
    pub async fn resume_pending(
        &self,
        target: &dyn ControlTarget,
        current_key: Option<&CompatibilityKey>,
    ) -> StateResult<Option<RestoreReport>> {
        if !target.is_ready() {
            return Ok(None);
        }
        let Some(pending) = self.take_pending()? else {
            return Ok(None);
        };
        tracing::info!(selector = %pending.selector, "Resuming queued restore");
        self.restore(&pending.selector, target, current_key)
            .await
            .map(Some)
    }

    pub async fn restore(
        &self,
        selector: &Selector,
        target: &dyn ControlTarget,
        current_key: Option<&CompatibilityKey>,
    ) -> StateResult<RestoreReport> {
        let resolved = self.store.resolve(selector, current_key)?;
        let snapshot = self.store.load(&resolved.stored)?;

        let mut report = RestoreReport {
            snapshot_id: snapshot.id.clone(),
            warnings: resolved.warnings,
            ..RestoreReport::default()
        };

        // Replace the session's controls rather than stacking on top of them.
        match timeout(self.item_timeout, target.clear_controls()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to clear controls before restore");
                report
                    .warnings
                    .push(format!("Existing controls were not cleared: {e}"));
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.item_timeout.as_millis() as u64,
                    "Clearing controls before restore timed out"
                );
                report
                    .warnings
                    .push("Existing controls were not cleared: timed out".to_string());
            }
        }

        let results = self.remapper.remap(&snapshot.breakpoints, self.accessor.as_ref());
        for (record, result) in snapshot.breakpoints.iter().zip(results) {
            let (line, confidence, reason) = match result {
                RemapResult::Applied { line } => (
                    line,
                    None,
                    format!("saved context matches at line {line}"),
                ),
                RemapResult::Relocated {
                    line,
                    confidence,
                    reason,
                } => (line, Some(confidence), reason),
                RemapResult::Skipped { reason } => {
                    report
                        .warnings
                        .push(format!("Breakpoint {}:{} skipped: {reason}", record.file, record.line));
                    report.skipped_breakpoints.push(SkippedBreakpoint {
                        file: record.file.clone(),
                        saved_line: record.line,
                        reason,
                    });
                    continue;
                }
            };

            let what = format!("Breakpoint {}:{}", record.file, line);
            let breakpoint = record.to_active(line);
            let applied = self
                .apply_item(&what, target.apply_breakpoint(&breakpoint))
                .await;
            match applied {
                Ok(()) => {
                    let restored = RestoredBreakpoint {
                        file: record.file.clone(),
                        saved_line: record.line,
                        line,
                        confidence,
                        reason,
                    };
                    if confidence.is_some() {
                        report.relocated_breakpoints.push(restored);
                    } else {
                        report.applied_breakpoints.push(restored);
                    }
                }
                Err(warning) => {
                    report.skipped_breakpoints.push(SkippedBreakpoint {
                        file: record.file.clone(),
                        saved_line: record.line,
                        reason: warning.clone(),
                    });
                    report.warnings.push(warning);
                }
            }
        }

        for watch in &snapshot.watches {
            let what = format!("Watch '{}'", watch.expression);
            match self.apply_item(&what, target.apply_watch(watch)).await {
                Ok(()) => report.watches_applied += 1,
                Err(warning) => report.warnings.push(warning),
            }
        }

        for filter in &snapshot.focus_filters {
            let what = format!("Focus filter {filter}");
            match self.apply_item(&what, target.apply_focus_filter(filter)).await {
                Ok(()) => report.filters_applied += 1,
                Err(warning) => report.warnings.push(warning),
            }
        }

        report.summaries_loaded = LoadedSummaries {
            conversation_summary: snapshot.conversation_summary,
            runtime_summary: snapshot.runtime_summary,
            memory_summary: snapshot.memory_summary,
        };

        tracing::info!(
            snapshot = %report.snapshot_id,
            applied = report.applied_breakpoints.len(),
            relocated = report.relocated_breakpoints.len(),
            skipped = report.skipped_breakpoints.len(),
            watches = report.watches_applied,
            filters = report.filters_applied,
            warnings = report.warnings.len(),
            "Restore finished"
        );
        Ok(report)
    }

    /// Run one control call under the per-item timeout, turning any failure
    /// into a warning line.
    async fn apply_item<F>(&self, what: &str, call: F) -> Result<(), String>
    where
        F: Future<Output = Result<(), ControlError>>,
    {
        match timeout(self.item_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(item = %what, error = %e, "Restore item rejected");
                Err(format!("{what} not restored: {e}"))
            }
            Err(_) => {
                tracing::warn!(
                    item = %what,
                    timeout_ms = self.item_timeout.as_millis() as u64,
                    "Restore item timed out"
                );
                Err(format!(
                    "{what} not restored: timed out after {} ms",
                    self.item_timeout.as_millis()
                ))
            }
        }
    }
}
