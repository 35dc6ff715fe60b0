//! Integration tests for saving and restoring session state
//!
//! Covers code drift between save and restore, partial restores when the
//! debugger rejects items, and queued `restore-next` intents consumed on a
//! later run or later in the same session.

use std::collections::{BTreeMap, HashSet};

use super::common::fixtures::{source_line, source_lines, TestEnv};
use rewind::state::mock::{MockControlTarget, MockStateSource, MockTargetConfig};
use rewind::state::target::ActiveBreakpoint;
use rewind::state::{FocusFilter, FocusScope, MemorySummary, WatchRecord};
use rewind::{RestoreOutcome, Selector, SessionStateSource, StateError};

fn checkpoint_1() -> Selector {
    Selector::Name("checkpoint-1".to_string())
}

fn invoice_block() -> Vec<String> {
    [
        "def render_invoice(order):",
        "    header = build_header(order.customer)",
        "    rows = [format_row(item) for item in order.items]",
        "    subtotal = sum(row.amount for row in rows)",
        "    tax = compute_tax(subtotal, order.region)",
        "    footer = build_footer(subtotal, tax)",
        "    return join_sections(header, rows, footer)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Lines shifted by an edit above a breakpoint are relocated, untouched
/// breakpoints are applied in place, and the drift is reported.
#[tokio::test]
async fn test_drift_relocates_shifted_breakpoint() {
    let env = TestEnv::new();
    let original = source_lines(60);
    let path = env.write_source("ledger.py", &original);
    let file = path.display().to_string();

    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 10))
        .with_breakpoint(ActiveBreakpoint::new(&file, 40).with_condition("rate > 3"))
        .with_watch(WatchRecord::new("entry_40"))
        .with_focus_filter(FocusFilter::include(FocusScope::File, "ledger.py"));
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    // Insert five lines between the two breakpoints.
    let mut drifted = original[..25].to_vec();
    drifted.extend((0..5).map(|i| format!("    audit.record(step={i})")));
    drifted.extend_from_slice(&original[25..]);
    env.write_source("ledger.py", &drifted);

    let outcome = session.load_state(&checkpoint_1()).await.expect("restore failed");
    let RestoreOutcome::Restored(report) = outcome else {
        panic!("expected an immediate restore");
    };

    assert_eq!(report.snapshot_id, "checkpoint-1");
    assert_eq!(report.applied_breakpoints.len(), 1);
    assert_eq!(report.applied_breakpoints[0].line, 10);
    assert!(!report.applied_breakpoints[0].reason.is_empty());

    assert_eq!(report.relocated_breakpoints.len(), 1);
    let relocated = &report.relocated_breakpoints[0];
    assert_eq!(relocated.saved_line, 40);
    assert_eq!(relocated.line, 45);
    assert!(relocated.confidence.unwrap() >= 0.8);
    assert!(!relocated.reason.is_empty());

    assert!(report.skipped_breakpoints.is_empty());
    assert_eq!(report.watches_applied, 1);
    assert_eq!(report.filters_applied, 1);
    assert_eq!(report.warnings.len(), 1, "warnings: {:?}", report.warnings);
    assert!(report.warnings[0].contains("code drift detected"));

    let applied = target.applied_breakpoints();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[1].line, 45);
    assert_eq!(applied[1].condition.as_deref(), Some("rate > 3"));
}

/// A breakpoint whose surrounding code was deleted is skipped with a
/// reason instead of being placed on an unrelated line.
#[tokio::test]
async fn test_drift_skips_breakpoint_in_deleted_region() {
    let env = TestEnv::new();
    let mut original = source_lines(36);
    original.extend(invoice_block());
    original.extend((44..=60).map(source_line));
    let path = env.write_source("billing.py", &original);
    let file = path.display().to_string();

    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 10))
        .with_breakpoint(ActiveBreakpoint::new(&file, 40));
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let mut drifted = original[..36].to_vec();
    drifted.extend_from_slice(&original[43..]);
    env.write_source("billing.py", &drifted);

    let RestoreOutcome::Restored(report) =
        session.load_state(&checkpoint_1()).await.expect("restore failed")
    else {
        panic!("expected an immediate restore");
    };

    assert_eq!(report.applied_breakpoints.len(), 1);
    assert_eq!(report.skipped_breakpoints.len(), 1);
    let skipped = &report.skipped_breakpoints[0];
    assert_eq!(skipped.saved_line, 40);
    assert!(!skipped.reason.is_empty());
    assert_eq!(target.applied_breakpoints().len(), 1);
    // Drift warning plus the skipped breakpoint.
    assert_eq!(report.warnings.len(), 2);
}

/// One rejected breakpoint out of three leaves the other two applied and
/// produces exactly one warning.
#[tokio::test]
async fn test_partial_restore_reports_failed_item() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(40));
    let file = path.display().to_string();

    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 10))
        .with_breakpoint(ActiveBreakpoint::new(&file, 20))
        .with_breakpoint(ActiveBreakpoint::new(&file, 30));
    let target = MockControlTarget::new().failing_breakpoint(&file, 20);
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let RestoreOutcome::Restored(report) =
        session.load_state(&checkpoint_1()).await.expect("restore must not fail")
    else {
        panic!("expected an immediate restore");
    };

    assert_eq!(report.applied_breakpoints.len(), 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains(":20"));
    let lines: Vec<usize> = target.applied_breakpoints().iter().map(|b| b.line).collect();
    assert_eq!(lines, vec![10, 30]);
}

/// A restore requested while the target is not running is persisted and
/// consumed by the next process once the target is ready.
#[tokio::test]
async fn test_pending_restore_consumed_on_cold_start() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 5));

    {
        let detached = MockControlTarget::new().detached();
        let session = env.open_session(&source, &detached);
        session.save_state(Some("checkpoint-1")).expect("save failed");
        let outcome = session.load_state(&checkpoint_1()).await.expect("queue failed");
        assert!(matches!(outcome, RestoreOutcome::Queued(_)));
        assert!(detached.applied_breakpoints().is_empty());
    }
    assert!(env.state_dir().join("pending-restore.json").exists());

    let target = MockControlTarget::new();
    let mut session = env.open_session(&source, &target);
    let outcome = session.start(None).await.expect("startup failed");
    match outcome {
        Some(RestoreOutcome::Restored(report)) => {
            assert_eq!(report.snapshot_id, "checkpoint-1");
            assert_eq!(report.applied_breakpoints.len(), 1);
        }
        other => panic!("expected restore at startup, got {other:?}"),
    }
    assert!(!env.state_dir().join("pending-restore.json").exists());

    // Consumed: a further startup restores nothing.
    let mut again = env.open_session(&source, &target);
    assert!(again.start(None).await.expect("startup failed").is_none());
}

/// `restore-next` queued in a running session fires once the target
/// becomes ready, without a restart.
#[tokio::test]
async fn test_pending_restore_consumed_in_same_session() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 7));
    let target = MockControlTarget::new().detached();
    let session = env.open_session(&source, &target);

    session.save_state(Some("checkpoint-1")).expect("save failed");
    session.restore_next(&checkpoint_1()).expect("queue failed");

    assert!(session.poll_pending().await.expect("poll failed").is_none());

    target.set_ready(true);
    let report = session
        .poll_pending()
        .await
        .expect("poll failed")
        .expect("pending restore should run");
    assert_eq!(report.snapshot_id, "checkpoint-1");
    assert_eq!(target.applied_breakpoints().len(), 1);
    assert!(session.poll_pending().await.expect("poll failed").is_none());
}

/// A pending intent wins over the state named on the command line.
#[tokio::test]
async fn test_pending_restore_takes_precedence_over_flag() {
    let env = TestEnv::new();
    let source = MockStateSource::new().with_summary("first");
    let target = MockControlTarget::new();
    {
        let session = env.open_session(&source, &target);
        session.save_state(Some("first")).expect("save failed");
        source.set_summary("second");
        session.save_state(Some("second")).expect("save failed");
        session
            .restore_next(&Selector::Name("first".to_string()))
            .expect("queue failed");
    }

    let mut session = env.open_session(&source, &target);
    let outcome = session
        .start(Some(&Selector::Name("second".to_string())))
        .await
        .expect("startup failed");
    match outcome {
        Some(RestoreOutcome::Restored(report)) => {
            assert_eq!(report.snapshot_id, "first");
            assert_eq!(report.summaries_loaded.conversation_summary, "first");
        }
        other => panic!("expected the pending restore, got {other:?}"),
    }
}

/// `--restore` against a detached target is queued rather than failing.
#[tokio::test]
async fn test_restore_flag_with_detached_target_is_queued() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new().detached();
    let mut session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let outcome = session
        .start(Some(&Selector::Latest))
        .await
        .expect("startup failed");
    assert!(matches!(
        outcome,
        Some(RestoreOutcome::Queued(ref pending)) if pending.selector == Selector::Latest
    ));
}

/// Secrets in the conversation summary never reach disk.
#[tokio::test]
async fn test_saved_state_is_redacted_on_disk() {
    let env = TestEnv::new();
    let source = MockStateSource::new()
        .with_summary("retrying with key sk-abcdefghijklmnopqrstuv")
        .with_watch(WatchRecord::new("os.environ['API_TOKEN']"));
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);

    let outcome = session.save_state(Some("checkpoint-1")).expect("save failed");
    assert_eq!(outcome.saved.redactions, 1);
    let on_disk = std::fs::read_to_string(&outcome.saved.stored.path).expect("read failed");
    assert!(!on_disk.contains("sk-abcdefghijklmnopqrstuv"));
    assert!(on_disk.contains("[REDACTED]"));
    assert!(on_disk.contains("os.environ['API_TOKEN']"));
}

/// Loading a state replaces the session's controls, so loading it twice
/// leaves one copy of each.
#[tokio::test]
async fn test_reloading_state_replaces_controls() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 4))
        .with_watch(WatchRecord::new("entry_4"))
        .with_focus_filter(FocusFilter::include(FocusScope::File, "ledger.py"));
    let target = MockControlTarget::new().mirroring(source.clone());
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    for _ in 0..2 {
        let outcome = session.load_state(&checkpoint_1()).await.expect("restore failed");
        assert!(matches!(outcome, RestoreOutcome::Restored(ref r) if r.warnings.is_empty()));
    }

    let controls = source.current_control_state();
    assert_eq!(controls.breakpoints.len(), 1);
    assert_eq!(controls.watches.len(), 1);
    assert_eq!(controls.focus_filters.len(), 1);
    assert_eq!(target.applied_breakpoints().len(), 1);
    assert_eq!(target.applied_watches().len(), 1);
    assert_eq!(target.applied_filters().len(), 1);
}

/// Disabled and temporary breakpoints come back the way they were saved,
/// along with their hit and ignore counts.
#[tokio::test]
async fn test_breakpoint_runtime_state_is_restored() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 3).disabled().with_hits(7))
        .with_breakpoint(ActiveBreakpoint::new(&file, 9).temporary().with_ignore_count(2))
        .with_breakpoint(ActiveBreakpoint::new(&file, 15));
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    session.load_state(&checkpoint_1()).await.expect("restore failed");

    let applied = target.applied_breakpoints();
    assert_eq!(applied, source.current_control_state().breakpoints);
    assert!(!applied[0].enabled);
    assert_eq!(applied[0].hits, 7);
    assert!(applied[1].temporary);
    assert_eq!(applied[1].ignore_count, 2);
    assert!(applied[2].enabled && !applied[2].temporary);
}

/// A watch the debugger rejects is reported and does not stop the
/// remaining controls from being applied.
#[tokio::test]
async fn test_rejected_watch_is_reported() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 5))
        .with_watch(WatchRecord::new("entry_5"))
        .with_watch(WatchRecord::new("entry_5 +"))
        .with_watch(WatchRecord::new("rate"));
    let target = MockControlTarget::new().failing_watch("entry_5 +");
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let RestoreOutcome::Restored(report) =
        session.load_state(&checkpoint_1()).await.expect("restore must not fail")
    else {
        panic!("expected an immediate restore");
    };

    assert_eq!(report.applied_breakpoints.len(), 1);
    assert_eq!(report.watches_applied, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("entry_5 +"));
    let watched: Vec<String> = target
        .applied_watches()
        .into_iter()
        .map(|w| w.expression)
        .collect();
    assert_eq!(watched, vec!["entry_5", "rate"]);
}

/// Target behavior can be configured up front: rejected breakpoints and
/// watches together still leave the rest of the state restored.
#[tokio::test]
async fn test_configured_target_rejections() {
    let env = TestEnv::new();
    let path = env.write_source("ledger.py", &source_lines(20));
    let file = path.display().to_string();
    let source = MockStateSource::new()
        .with_target_file(&path)
        .with_breakpoint(ActiveBreakpoint::new(&file, 5))
        .with_breakpoint(ActiveBreakpoint::new(&file, 6))
        .with_watch(WatchRecord::new("entry_6"))
        .with_focus_filter(FocusFilter::exclude(FocusScope::Module, "vendor"));
    let target = MockControlTarget::new().with_config(MockTargetConfig {
        failing_breakpoints: HashSet::from([(file.clone(), 6)]),
        failing_watches: HashSet::from(["entry_6".to_string()]),
        ..MockTargetConfig::default()
    });
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let RestoreOutcome::Restored(report) =
        session.load_state(&checkpoint_1()).await.expect("restore must not fail")
    else {
        panic!("expected an immediate restore");
    };

    assert_eq!(report.applied_breakpoints.len(), 1);
    assert_eq!(report.skipped_breakpoints.len(), 1);
    assert_eq!(report.watches_applied, 0);
    assert_eq!(report.filters_applied, 1);
    assert_eq!(report.warnings.len(), 2);
    assert!(target.applied_watches().is_empty());
    assert_eq!(
        target.applied_filters(),
        vec![FocusFilter::exclude(FocusScope::Module, "vendor")]
    );
}

/// Queuing a restore for a state that does not exist fails right away and
/// leaves no pending intent behind.
#[tokio::test]
async fn test_restore_next_unknown_state_is_rejected() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new().detached();
    let mut session = env.open_session(&source, &target);

    match session.restore_next(&Selector::Name("typo".to_string())) {
        Err(StateError::NotFound(name)) => assert!(name.contains("typo")),
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(matches!(
        session.start(Some(&Selector::Latest)).await,
        Err(StateError::NotFound(_))
    ));
    assert!(!env.state_dir().join("pending-restore.json").exists());
}

/// The memory summary is saved with the state and handed back on restore.
#[tokio::test]
async fn test_memory_summary_is_restored() {
    let env = TestEnv::new();
    let mut traced = BTreeMap::new();
    traced.insert("python.current_bytes".to_string(), 52_428_800.0);
    traced.insert("python.peak_bytes".to_string(), 73_400_320.0);
    let memory = MemorySummary {
        label: "after-load".to_string(),
        traced,
    };
    let source = MockStateSource::new().with_memory(memory.clone());
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);
    session.save_state(Some("checkpoint-1")).expect("save failed");

    let RestoreOutcome::Restored(report) =
        session.load_state(&checkpoint_1()).await.expect("restore failed")
    else {
        panic!("expected an immediate restore");
    };
    assert_eq!(report.summaries_loaded.memory_summary, Some(memory));
}

/// A secret that straddles the summary budget is redacted before the cut,
/// so no fragment of it is written.
#[tokio::test]
async fn test_secret_at_summary_budget_is_redacted() {
    let mut env = TestEnv::new();
    env.config.state.summary_char_budget = 30;
    let source = MockStateSource::new()
        .with_summary("context text sk-ABCDEFGHIJKLMNOPQRST and the rest of the notes");
    let target = MockControlTarget::new();
    let session = env.open_session(&source, &target);

    let outcome = session.save_state(Some("checkpoint-1")).expect("save failed");
    assert_eq!(outcome.saved.redactions, 1);
    let on_disk = std::fs::read_to_string(&outcome.saved.stored.path).expect("read failed");
    assert!(!on_disk.contains("sk-AB"));
    assert!(on_disk.contains("context text"));
    assert!(on_disk.contains("[truncated]"));
}
