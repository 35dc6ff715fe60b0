pub mod config;
pub mod console;
pub mod state;
pub mod util;

pub use config::Config;
pub use console::{Console, ConsoleInput, Reply};
pub use state::{
    ActionKind, BreakpointRemapper, ControlTarget, RestoreOrchestrator, RestoreOutcome,
    RestoreReport, Selector, SessionStateSource, Snapshot, SnapshotStore, StateError,
    StateSession,
};
