//! Integration tests for rolling checkpoints taken before state changes

use super::common::fixtures::{source_lines, TestEnv};
use rewind::state::mock::{MockControlTarget, MockStateSource};
use rewind::state::target::ActiveBreakpoint;
use rewind::state::SnapshotKind;
use rewind::ActionKind;

/// Seven state changes with a window of three keep exactly the three newest
/// rolling checkpoints and never touch named saves.
#[test]
fn test_rolling_window_evicts_oldest_checkpoints() {
    let mut env = TestEnv::new();
    env.config.state.rolling_window = 3;
    let path = env.write_source("ledger.py", &source_lines(30));
    let file = path.display().to_string();

    let source = MockStateSource::new().with_target_file(&path);
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);
    session.save_state(Some("keep-me")).expect("save failed");

    let mut taken = Vec::new();
    for line in 1..=7 {
        let stored = session
            .before_action(&ActionKind::Breakpoint)
            .expect("rolling checkpoint should be written");
        assert_eq!(stored.reason, "before:breakpoint");
        taken.push(stored);
        source.add_breakpoint(ActiveBreakpoint::new(&file, line));
    }

    let states = session.list_states().expect("list failed");
    let autos: Vec<_> = states
        .iter()
        .filter(|s| s.kind == SnapshotKind::Auto)
        .collect();
    assert_eq!(autos.len(), 3);

    // Newest first, and they are the last three taken.
    let expected: Vec<u64> = taken.iter().rev().take(3).map(|s| s.sequence).collect();
    let actual: Vec<u64> = autos.iter().map(|s| s.sequence).collect();
    assert_eq!(actual, expected);
    for evicted in &taken[..4] {
        assert!(!evicted.path.exists(), "{} should be evicted", evicted.path.display());
    }

    let named: Vec<_> = states
        .iter()
        .filter(|s| s.kind == SnapshotKind::Named)
        .collect();
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, "keep-me");
}

/// The newest rolling checkpoint holds the state from just before the last
/// action, so it can undo that action.
#[test]
fn test_rolling_checkpoint_captures_state_before_action() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(30));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 3));
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);

    let stored = session
        .before_action(&ActionKind::Breakpoint)
        .expect("rolling checkpoint should be written");
    source.add_breakpoint(ActiveBreakpoint::new(&file, 12));

    let snapshot = session.store().load(&stored).expect("load failed");
    assert_eq!(snapshot.kind, SnapshotKind::Auto);
    assert_eq!(snapshot.breakpoints.len(), 1);
    assert_eq!(snapshot.breakpoints[0].line, 3);
    assert!(!snapshot.breakpoints[0].context_snippet.is_empty());
}

/// With auto-save disabled no rolling checkpoint is written.
#[test]
fn test_auto_save_disabled_writes_nothing() {
    let mut env = TestEnv::new();
    env.config = env.config.clone().with_auto_save(false);
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);

    for _ in 0..3 {
        assert!(session.before_action(&ActionKind::FileEdit).is_none());
    }
    assert!(session.list_states().expect("list failed").is_empty());
}

/// Rolling checkpoints survive a restart and are evicted together with the
/// ones written by the next process.
#[test]
fn test_rolling_window_spans_sessions() {
    let mut env = TestEnv::new();
    env.config.state.rolling_window = 2;
    let source = MockStateSource::new();
    let target = MockControlTarget::new();

    {
        let session = env.open_session(&source, &target);
        session.before_action(&ActionKind::Watch);
        session.before_action(&ActionKind::Watch);
    }

    let session = env.open_session(&source, &target);
    let newest = session
        .before_action(&ActionKind::Focus)
        .expect("rolling checkpoint should be written");
    let states = session.list_states().expect("list failed");
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].sequence, newest.sequence);
    assert_eq!(states[0].reason, "before:focus");
}
