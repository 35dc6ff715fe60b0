//! Locations under the rewind data directory (`~/.rewind` unless overridden
//! with `--data-dir`).

use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Pin the data directory for the rest of the process. Call once from
/// `main` before anything reads a path; later calls are ignored.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let requested = custom_path.unwrap_or_else(home_data_dir);
    if let Err(rejected) = DATA_DIR.set(requested) {
        tracing::debug!(
            requested = %rejected.display(),
            active = %data_dir().display(),
            "Data directory already set; keeping the first one"
        );
    }
}

fn home_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".rewind"),
        None => PathBuf::from(".rewind"),
    }
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(home_data_dir)
}

/// Where snapshots, `perf-index.json` and `pending-restore.json` live when
/// neither the config nor `--state-dir` says otherwise.
pub fn default_state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join("rewind.log")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
