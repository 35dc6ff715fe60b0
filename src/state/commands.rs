//! Slash commands for the state subsystem.

use crate::state::store::Selector;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: /{0}")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateCommand {
    SaveState { name: Option<String> },
    LoadState { selector: Selector },
    ListStates,
    RestoreNext { selector: Selector },
    PerfCheckpoint { label: Option<String> },
    PerfCheckpoints,
    PerfCompare { label_a: String, label_b: String },
    PerfReport { labels: Option<(String, String)> },
    Help,
}

pub const HELP: &str = "\
/save-state [NAME]                 Save the current session state
/load-state [latest|NAME|PATH]     Restore a saved state now
/list-states                       List saved states, newest first
/restore-next [latest|NAME|PATH]   Restore a state on the next run
/perf-checkpoint [LABEL]           Record a performance checkpoint
/perf-checkpoints                  List this session's perf checkpoints
/perf-compare A B                  Compare two perf checkpoints
/perf-report [A B]                 Render a perf investigation report
/help                              Show this help";

impl StateCommand {
    /// Parse one input line. Lines that are not slash commands yield
    /// `Ok(None)`.
    pub fn parse(input: &str) -> Result<Option<Self>, CommandError> {
        let Some(rest) = input.trim().strip_prefix('/') else {
            return Ok(None);
        };
        let mut parts = rest.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(CommandError::Unknown(String::new()));
        };
        let args: Vec<&str> = parts.collect();

        let command = match name {
            "save-state" => match args.as_slice() {
                [] => StateCommand::SaveState { name: None },
                [name] => StateCommand::SaveState {
                    name: Some((*name).to_string()),
                },
                _ => return Err(CommandError::Usage("/save-state [NAME]")),
            },
            "load-state" => StateCommand::LoadState {
                selector: selector_arg(&args, "/load-state [latest|NAME|PATH]")?,
            },
            "list-states" => StateCommand::ListStates,
            "restore-next" => StateCommand::RestoreNext {
                selector: selector_arg(&args, "/restore-next [latest|NAME|PATH]")?,
            },
            "perf-checkpoint" => match args.as_slice() {
                [] => StateCommand::PerfCheckpoint { label: None },
                [label] => StateCommand::PerfCheckpoint {
                    label: Some((*label).to_string()),
                },
                _ => return Err(CommandError::Usage("/perf-checkpoint [LABEL]")),
            },
            "perf-checkpoints" => StateCommand::PerfCheckpoints,
            "perf-compare" => match args.as_slice() {
                [a, b] => StateCommand::PerfCompare {
                    label_a: (*a).to_string(),
                    label_b: (*b).to_string(),
                },
                _ => return Err(CommandError::Usage("/perf-compare LABEL_A LABEL_B")),
            },
            "perf-report" => match args.as_slice() {
                [] => StateCommand::PerfReport { labels: None },
                [a, b] => StateCommand::PerfReport {
                    labels: Some(((*a).to_string(), (*b).to_string())),
                },
                _ => return Err(CommandError::Usage("/perf-report [LABEL_A LABEL_B]")),
            },
            "help" => StateCommand::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn selector_arg(args: &[&str], usage: &'static str) -> Result<Selector, CommandError> {
    match args {
        [] => Ok(Selector::Latest),
        [raw] => Ok(Selector::parse(raw)),
        _ => Err(CommandError::Usage(usage)),
    }
}
