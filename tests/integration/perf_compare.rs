//! Integration tests for perf checkpoints and the persisted perf index

use super::common::fixtures::TestEnv;
use rewind::state::mock::{MockControlTarget, MockStateSource, ScriptedSampler};
use rewind::state::perf::{ResourceSample, PERF_INDEX_FILE};
use rewind::state::session::SESSION_START_LABEL;
use rewind::state::{PerfIndex, StateCommand, StateError};

const MS: u64 = 1_000_000;

fn sample(wall_ms: u64, cpu_ms: u64, memory: u64) -> ResourceSample {
    ResourceSample {
        wall_ns: wall_ms * MS,
        process_ns: cpu_ms * MS,
        memory_bytes: Some(memory),
    }
}

/// Baseline at 1s, `before` 100ms later, `after` another 50ms later.
fn scripted() -> Box<ScriptedSampler> {
    Box::new(ScriptedSampler::new(vec![
        sample(1_000, 0, 10_000),
        sample(1_100, 20, 14_096),
        ResourceSample {
            wall_ns: 1_150 * MS,
            process_ns: 32 * MS + MS / 2,
            memory_bytes: Some(11_024),
        },
    ]))
}

/// Comparing two checkpoints reports exact `B - A` deltas.
#[test]
fn test_compare_reports_exact_deltas() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    let mut session = env.open_session_with_sampler(&source, &target, scripted());

    let before = session.perf_checkpoint(Some("before")).expect("record failed");
    assert_eq!(before.checkpoint.wall_delta_ms, 100.0);
    assert_eq!(before.checkpoint.baseline_label, None);

    let after = session.perf_checkpoint(Some("after")).expect("record failed");
    assert_eq!(after.checkpoint.wall_delta_ms, 50.0);
    assert_eq!(after.checkpoint.baseline_label.as_deref(), Some("before"));

    let diff = session.perf_compare("before", "after").expect("compare failed");
    assert_eq!(diff.wall_delta_ms, 50.0);
    assert_eq!(diff.process_delta_ms, 12.5);
    assert_eq!(diff.memory_delta_bytes, Some(-3_072));

    let reversed = session.perf_compare("after", "before").expect("compare failed");
    assert_eq!(reversed.wall_delta_ms, -50.0);
}

/// Checkpoints are persisted and can be compared by a later process.
#[test]
fn test_perf_index_compares_latest_session() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    {
        let mut session = env.open_session_with_sampler(&source, &target, scripted());
        session.perf_checkpoint(Some("before")).expect("record failed");
        session.perf_checkpoint(Some("after")).expect("record failed");
    }
    assert!(env.state_dir().join(PERF_INDEX_FILE).exists());

    let index = PerfIndex::load(env.state_dir()).expect("load failed");
    let (_, record) = index.latest_session().expect("session should be indexed");
    let labels: Vec<&str> = record.checkpoints.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["before", "after"]);

    let diff = index.compare_latest("before", "after").expect("compare failed");
    assert_eq!(diff.wall_delta_ms, 50.0);
}

/// An unknown label is an error naming the label, not a zero diff.
#[test]
fn test_compare_unknown_label_fails() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    let mut session = env.open_session_with_sampler(&source, &target, scripted());
    session.perf_checkpoint(Some("before")).expect("record failed");

    match session.perf_compare("before", "missing") {
        Err(StateError::LabelNotFound(label)) => assert_eq!(label, "missing"),
        other => panic!("expected LabelNotFound, got {other:?}"),
    }

    let index = PerfIndex::load(env.state_dir()).expect("load failed");
    assert!(matches!(
        index.compare_latest("nope", "before"),
        Err(StateError::LabelNotFound(label)) if label == "nope"
    ));
}

/// Perf mode records a checkpoint as soon as the session starts.
#[tokio::test]
async fn test_perf_mode_records_session_start() {
    let mut env = TestEnv::new();
    env.config = env.config.clone().with_perf_mode(true);
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    let mut session = env.open_session_with_sampler(&source, &target, scripted());

    assert!(session.start(None).await.expect("startup failed").is_none());
    let labels: Vec<&str> = session
        .perf_checkpoints()
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(labels, vec![SESSION_START_LABEL]);
}

/// `/perf-report` renders markdown with the comparison and a restore hint.
#[tokio::test]
async fn test_perf_report_command_renders_markdown() {
    let env = TestEnv::new();
    let source = MockStateSource::new();
    let target = MockControlTarget::new();
    let mut session = env.open_session_with_sampler(&source, &target, scripted());
    session.save_state(Some("slow-path")).expect("save failed");

    let cmd = |line: &str| {
        StateCommand::parse(line)
            .expect("parse failed")
            .expect("not a state command")
    };
    session.execute(cmd("/perf-checkpoint before")).await.expect("checkpoint failed");
    session.execute(cmd("/perf-checkpoint after")).await.expect("checkpoint failed");
    let report = session
        .execute(cmd("/perf-report before after"))
        .await
        .expect("report failed");

    assert!(report.contains("before"));
    assert!(report.contains("after"));
    assert!(report.contains("50.0"));
    assert!(report.contains("rewind --restore slow-path"));
}
