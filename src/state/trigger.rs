//! Rolling checkpoints before state-changing actions.

use std::fmt;
use std::sync::Arc;

use crate::state::capture::{capture_snapshot, CaptureLimits};
use crate::state::models::SnapshotKind;
use crate::state::store::{SnapshotStore, StoredRef};
use crate::state::target::{SessionStateSource, SourceAccessor};

/// The action about to mutate session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    FileEdit,
    Breakpoint,
    Watch,
    Focus,
    Other(String),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::FileEdit => f.write_str("file_edit"),
            ActionKind::Breakpoint => f.write_str("breakpoint"),
            ActionKind::Watch => f.write_str("watch"),
            ActionKind::Focus => f.write_str("focus"),
            ActionKind::Other(name) => f.write_str(name),
        }
    }
}

pub struct RollingCheckpointTrigger {
    store: Arc<SnapshotStore>,
    source: Arc<dyn SessionStateSource>,
    accessor: Arc<dyn SourceAccessor>,
    limits: CaptureLimits,
    enabled: bool,
}

impl RollingCheckpointTrigger {
    pub fn new(
        store: Arc<SnapshotStore>,
        source: Arc<dyn SessionStateSource>,
        accessor: Arc<dyn SourceAccessor>,
        limits: CaptureLimits,
    ) -> Self {
        Self {
            store,
            source,
            accessor,
            limits,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Snapshot the current state ahead of `action`.
    ///
    /// Never fails the action: storage errors are logged and `None` is
    /// returned.
    pub fn on_state_change(&self, action: &ActionKind) -> Option<StoredRef> {
        if !self.enabled {
            return None;
        }

        let captured = capture_snapshot(
            self.source.as_ref(),
            self.accessor.as_ref(),
            &self.limits,
            self.store.codec().scrub(),
            SnapshotKind::Auto,
            None,
            &format!("before:{action}"),
        );
        for warning in &captured.warnings {
            tracing::debug!(action = %action, warning = %warning, "Rolling checkpoint capture warning");
        }

        match self.store.save(captured.snapshot, SnapshotKind::Auto) {
            Ok(saved) => {
                tracing::debug!(
                    action = %action,
                    path = %saved.stored.path.display(),
                    evicted = saved.evicted.len(),
                    "Rolling checkpoint saved"
                );
                Some(saved.stored)
            }
            Err(e) => {
                tracing::warn!(action = %action, error = %e, "Failed to save rolling checkpoint");
                None
            }
        }
    }
}
