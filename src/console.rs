//! Line-oriented console for the `rewind` binary.
//!
//! Besides the state slash commands, the console drives a small in-process
//! debugger so sessions can be built up, checkpointed and restored from a
//! terminal or a script:
//!
//! ```text
//! break app.py:42 if x > 3
//! tbreak app.py:50
//! disable app.py:42
//! watch totals["eu"]
//! focus -module:vendor
//! summary chasing the off-by-one in paginate()
//! attach
//! /save-state checkpoint-1
//! ```

use crate::state::commands::StateCommand;
use crate::state::mock::{MockControlTarget, MockStateSource};
use crate::state::models::{FocusFilter, WatchRecord};
use crate::state::session::{render_restore_report, StateSession};
use crate::state::target::ActiveBreakpoint;
use crate::state::trigger::ActionKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    State(StateCommand),
    Break(ActiveBreakpoint),
    /// Enable or disable the breakpoint at `file:line`.
    Toggle {
        file: String,
        line: usize,
        enabled: bool,
    },
    Watch(WatchRecord),
    Focus(FocusFilter),
    Summary(String),
    Attach,
    Quit,
    Empty,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(ConsoleInput::Empty);
        }
        if matches!(line, "quit" | "exit" | "/quit" | "/exit") {
            return Ok(ConsoleInput::Quit);
        }
        if let Some(command) = StateCommand::parse(line).map_err(|e| e.to_string())? {
            return Ok(ConsoleInput::State(command));
        }

        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match verb {
            "break" => parse_break(rest).map(ConsoleInput::Break),
            "tbreak" => parse_break(rest).map(|bp| ConsoleInput::Break(bp.temporary())),
            "enable" | "disable" => {
                let (file, line) = parse_location(rest)?;
                Ok(ConsoleInput::Toggle {
                    file: file.to_string(),
                    line,
                    enabled: verb == "enable",
                })
            }
            "watch" if !rest.is_empty() => Ok(ConsoleInput::Watch(WatchRecord::new(rest))),
            "focus" => rest.parse().map(ConsoleInput::Focus),
            "summary" => Ok(ConsoleInput::Summary(rest.to_string())),
            "attach" => Ok(ConsoleInput::Attach),
            _ => Err(format!("Unrecognized input: {line} (try /help)")),
        }
    }
}

/// `FILE:LINE [if CONDITION]`
fn parse_break(rest: &str) -> Result<ActiveBreakpoint, String> {
    let (location, condition) = match rest.split_once(" if ") {
        Some((location, condition)) => (location.trim(), Some(condition.trim())),
        None => (rest, None),
    };
    let (file, line) = parse_location(location)?;
    let breakpoint = ActiveBreakpoint::new(file, line);
    Ok(match condition.filter(|c| !c.is_empty()) {
        Some(condition) => breakpoint.with_condition(condition),
        None => breakpoint,
    })
}

/// `FILE:LINE`, splitting on the last colon so drive letters survive.
fn parse_location(location: &str) -> Result<(&str, usize), String> {
    let (file, line) = location
        .rsplit_once(':')
        .ok_or_else(|| "Usage: break FILE:LINE [if CONDITION]".to_string())?;
    let line: usize = line
        .parse()
        .map_err(|_| format!("Invalid line number: {line}"))?;
    if file.is_empty() || line == 0 {
        return Err("Usage: break FILE:LINE [if CONDITION]".to_string());
    }
    Ok((file, line))
}

/// Result of handling one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Output(String),
    Silent,
    Quit,
}

/// Console state: the session plus the in-process debugger it talks to.
pub struct Console {
    session: StateSession,
    debugger: MockStateSource,
    target: MockControlTarget,
}

impl Console {
    pub fn new(session: StateSession, debugger: MockStateSource, target: MockControlTarget) -> Self {
        Self {
            session,
            debugger,
            target,
        }
    }

    pub fn session(&self) -> &StateSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut StateSession {
        &mut self.session
    }

    /// Build the debugger pair used by the binary: a detached target whose
    /// applied controls flow back into the session state.
    pub fn local_debugger() -> (MockStateSource, MockControlTarget) {
        let debugger = MockStateSource::new();
        let target = MockControlTarget::new()
            .mirroring(debugger.clone())
            .detached();
        (debugger, target)
    }

    pub async fn handle_line(&mut self, line: &str) -> Reply {
        let input = match ConsoleInput::parse(line) {
            Ok(input) => input,
            Err(message) => return Reply::Output(message),
        };

        match input {
            ConsoleInput::Empty => Reply::Silent,
            ConsoleInput::Quit => Reply::Quit,
            ConsoleInput::State(command) => match self.session.execute(command).await {
                Ok(out) => Reply::Output(out),
                Err(e) => Reply::Output(format!("Error: {e}")),
            },
            ConsoleInput::Break(breakpoint) => {
                self.session.before_action(&ActionKind::Breakpoint);
                let kind = if breakpoint.temporary {
                    "Temporary breakpoint"
                } else {
                    "Breakpoint"
                };
                let out = format!("{kind} set at {}:{}", breakpoint.file, breakpoint.line);
                self.debugger.add_target_file(&breakpoint.file);
                self.debugger.add_breakpoint(breakpoint);
                Reply::Output(out)
            }
            ConsoleInput::Toggle {
                file,
                line,
                enabled,
            } => {
                self.session.before_action(&ActionKind::Breakpoint);
                let state = if enabled { "enabled" } else { "disabled" };
                if self.debugger.set_breakpoint_enabled(&file, line, enabled) {
                    Reply::Output(format!("Breakpoint {file}:{line} {state}"))
                } else {
                    Reply::Output(format!("No breakpoint at {file}:{line}"))
                }
            }
            ConsoleInput::Watch(watch) => {
                self.session.before_action(&ActionKind::Watch);
                let out = format!("Watching {}", watch.expression);
                self.debugger.add_watch(watch);
                Reply::Output(out)
            }
            ConsoleInput::Focus(filter) => {
                self.session.before_action(&ActionKind::Focus);
                let out = format!("Focus filter {filter}");
                self.debugger.add_focus_filter(filter);
                Reply::Output(out)
            }
            ConsoleInput::Summary(text) => {
                self.debugger.set_summary(text);
                Reply::Silent
            }
            ConsoleInput::Attach => {
                self.target.set_ready(true);
                match self.session.poll_pending().await {
                    Ok(Some(report)) => {
                        Reply::Output(format!("Attached\n{}", render_restore_report(&report)))
                    }
                    Ok(None) => Reply::Output("Attached".to_string()),
                    Err(e) => Reply::Output(format!("Attached\nError: {e}")),
                }
            }
        }
    }
}
