//! Restorable debugging-session state.
//!
//! Snapshots of breakpoints, watches, focus filters and session summaries
//! are captured into a versioned, redacted on-disk format, kept as named
//! saves or rolling checkpoints, and restored best-effort with breakpoint
//! remapping when the source drifted. Perf checkpoints live alongside them.

pub mod capture;
pub mod codec;
pub mod commands;
pub mod error;
pub mod fingerprint;
pub mod mock;
pub mod models;
pub mod perf;
pub mod remap;
pub mod restore;
pub mod scrub;
pub mod session;
pub mod store;
pub mod target;
pub mod trigger;

pub use capture::{capture_snapshot, CaptureLimits, Captured};
pub use codec::{Encoded, SnapshotCodec, SNAPSHOT_SCHEMA_VERSION};
pub use commands::{CommandError, StateCommand};
pub use error::{ControlError, StateError, StateResult};
pub use fingerprint::compute_compatibility_key;
pub use models::{
    BreakpointRecord, CompatibilityKey, FocusFilter, FocusMode, FocusScope, MemorySummary,
    RuntimeSummary, Snapshot, SnapshotKind, WatchRecord,
};
pub use perf::{PerfCheckpoint, PerfDiff, PerfIndex, PerfRecorder, ProcessSampler, ResourceSampler};
pub use remap::{BreakpointRemapper, RemapConfig, RemapResult};
pub use restore::{PendingRestore, RestoreOrchestrator, RestoreOutcome, RestoreReport};
pub use scrub::ScrubConfig;
pub use session::StateSession;
pub use store::{Selector, SnapshotStore, StoredRef};
pub use target::{ControlTarget, FsSourceAccessor, SessionStateSource, SourceAccessor};
pub use trigger::{ActionKind, RollingCheckpointTrigger};
