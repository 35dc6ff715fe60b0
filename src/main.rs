use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use rewind::state::perf::PerfIndex;
use rewind::state::session::{
    render_checkpoints, render_diff, render_queued, render_restore_report, render_state_list,
};
use rewind::state::{
    compute_compatibility_key, FsSourceAccessor, ProcessSampler, RestoreOutcome,
};
use rewind::{util, Config, Console, Reply, Selector, SnapshotStore, StateSession};

/// Restorable debugging sessions: snapshots, rolling checkpoints and
/// best-effort restore
#[derive(Debug, Parser)]
#[command(name = "rewind", version, about)]
struct Cli {
    /// Restore a saved state at startup (latest compatible if NAME is omitted)
    #[arg(long, value_name = "NAME", num_args = 0..=1, default_missing_value = "latest")]
    restore: Option<String>,

    /// Directory for snapshots and perf checkpoints
    #[arg(long, value_name = "PATH", global = true)]
    state_dir: Option<PathBuf>,

    /// Do not take rolling checkpoints before state-changing actions
    #[arg(long, global = true)]
    no_auto_save_state: bool,

    /// Record a session-start perf checkpoint and keep perf tooling on
    #[arg(long)]
    perf_mode: bool,

    /// Source file that defines snapshot compatibility (repeatable)
    #[arg(long = "target", value_name = "FILE", global = true)]
    targets: Vec<PathBuf>,

    /// Base directory for config and logs (default ~/.rewind)
    #[arg(long, value_name = "PATH", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List saved states, newest first
    List,

    /// Print a saved state as JSON
    Show {
        /// latest, a snapshot name or a path
        selector: String,
    },

    /// Delete a saved state
    Delete {
        /// A snapshot name or a path
        selector: String,
    },

    /// Inspect perf checkpoints from the most recent sessions
    Perf {
        #[command(subcommand)]
        command: PerfCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PerfCommand {
    /// List checkpoints of the most recent session
    List,

    /// Compare two checkpoints recorded in the same session
    Compare { label_a: String, label_b: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (~/.rewind/logs/rewind.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let mut config = Config::load();
    if let Some(dir) = cli.state_dir.clone() {
        config = config.with_state_dir(dir);
    }
    if cli.no_auto_save_state {
        config = config.with_auto_save(false);
    }
    if cli.perf_mode {
        config = config.with_perf_mode(true);
    }

    match cli.command {
        Some(command) => run_command(&config, &cli.targets, command),
        None => run_console(config, &cli.targets, cli.restore.as_deref()).await,
    }
}

fn open_store(config: &Config) -> Result<SnapshotStore> {
    SnapshotStore::from_config(config)
        .with_context(|| format!("opening state directory {}", config.state.dir.display()))
}

fn run_command(config: &Config, targets: &[PathBuf], command: Command) -> Result<()> {
    let key = (!targets.is_empty()).then(|| compute_compatibility_key(targets));

    match command {
        Command::List => {
            let store = open_store(config)?;
            println!("{}", render_state_list(&store.list()?));
        }
        Command::Show { selector } => {
            let store = open_store(config)?;
            let resolved = store.resolve(&Selector::parse(&selector), key.as_ref())?;
            for warning in &resolved.warnings {
                eprintln!("warning: {warning}");
            }
            let snapshot = store.load(&resolved.stored)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Delete { selector } => {
            let store = open_store(config)?;
            let selector = Selector::parse(&selector);
            if selector == Selector::Latest {
                anyhow::bail!("refusing to delete 'latest'; name the state to delete");
            }
            let resolved = store.resolve(&selector, None)?;
            store.delete(&resolved.stored)?;
            println!("Deleted {}", resolved.stored.path.display());
        }
        Command::Perf { command } => {
            let index = PerfIndex::load(&config.state.dir)?;
            match command {
                PerfCommand::List => match index.latest_session() {
                    Some((session_id, record)) => {
                        println!("Session {session_id} (started {})", record.started_at);
                        println!("{}", render_checkpoints(&record.checkpoints));
                    }
                    None => println!("No perf checkpoints recorded"),
                },
                PerfCommand::Compare { label_a, label_b } => {
                    println!("{}", render_diff(&index.compare_latest(&label_a, &label_b)?));
                }
            }
        }
    }
    Ok(())
}

async fn run_console(config: Config, targets: &[PathBuf], restore: Option<&str>) -> Result<()> {
    let (debugger, target) = Console::local_debugger();
    for path in targets {
        debugger.add_target_file(path.clone());
    }

    let mut session = StateSession::open(
        &config,
        Arc::new(debugger.clone()),
        Arc::new(target.clone()),
        Arc::new(FsSourceAccessor::new()),
        Box::new(ProcessSampler::new()),
    )
    .with_context(|| format!("opening state directory {}", config.state.dir.display()))?;

    let requested = restore.map(Selector::parse);
    match session.start(requested.as_ref()).await? {
        Some(RestoreOutcome::Restored(report)) => println!("{}", render_restore_report(&report)),
        Some(RestoreOutcome::Queued(pending)) => println!("{}", render_queued(&pending)),
        None => {}
    }

    let mut console = Console::new(session, debugger, target);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    while let Some(line) = lines.next_line().await? {
        match console.handle_line(&line).await {
            Reply::Output(text) => writeln!(stdout, "{text}")?,
            Reply::Silent => {}
            Reply::Quit => break,
        }
        stdout.flush()?;
    }
    Ok(())
}
