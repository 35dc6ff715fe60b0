use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::state::capture::{
    CaptureLimits, DEFAULT_MAX_LOCAL_CHARS, DEFAULT_MAX_STACK_FRAMES,
    DEFAULT_SUMMARY_CHAR_BUDGET,
};
use crate::state::remap::{
    RemapConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_SEARCH_RADIUS, DEFAULT_SNIPPET_RADIUS,
};
use crate::state::restore::DEFAULT_ITEM_TIMEOUT;
use crate::state::store::DEFAULT_ROLLING_WINDOW;
use crate::util::paths::{config_path, default_state_dir};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub state: StateConfig,
    pub remap: RemapConfig,
    pub restore: RestoreConfig,
    pub perf: PerfConfig,
    /// Secret patterns added to the built-in redaction set
    pub redaction_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Directory holding snapshots, the perf index and pending restores
    pub dir: PathBuf,
    /// Take rolling checkpoints before state-changing actions
    pub auto_save: bool,
    /// Number of rolling checkpoints kept
    pub rolling_window: usize,
    pub summary_char_budget: usize,
    /// Lines of context kept on each side of a breakpoint
    pub snippet_radius: usize,
    pub max_stack_frames: usize,
    pub max_local_chars: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RestoreConfig {
    pub item_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct PerfConfig {
    /// Record a `session-start` checkpoint when a session opens
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStateConfig {
    pub dir: Option<PathBuf>,
    pub auto_save: Option<bool>,
    pub rolling_window: Option<usize>,
    pub summary_char_budget: Option<usize>,
    pub snippet_radius: Option<usize>,
    pub max_stack_frames: Option<usize>,
    pub max_local_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlRemapConfig {
    pub search_radius: Option<usize>,
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlRestoreConfig {
    pub item_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlPerfConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlRedactionConfig {
    pub extra_patterns: Option<Vec<String>>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub state: Option<TomlStateConfig>,
    pub remap: Option<TomlRemapConfig>,
    pub restore: Option<TomlRestoreConfig>,
    pub perf: Option<TomlPerfConfig>,
    pub redaction: Option<TomlRedactionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state: StateConfig {
                dir: default_state_dir(),
                auto_save: true,
                rolling_window: DEFAULT_ROLLING_WINDOW,
                summary_char_budget: DEFAULT_SUMMARY_CHAR_BUDGET,
                snippet_radius: DEFAULT_SNIPPET_RADIUS,
                max_stack_frames: DEFAULT_MAX_STACK_FRAMES,
                max_local_chars: DEFAULT_MAX_LOCAL_CHARS,
            },
            remap: RemapConfig {
                search_radius: DEFAULT_SEARCH_RADIUS,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            },
            restore: RestoreConfig {
                item_timeout: DEFAULT_ITEM_TIMEOUT,
            },
            perf: PerfConfig { enabled: false },
            redaction_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, merging with defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        Self::load_from(&config_file)
    }

    /// Load a specific config file over the defaults. Unreadable or invalid
    /// files are logged and ignored.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No config file loaded");
                return Config::default();
            }
        };
        match toml::from_str::<TomlConfig>(&contents) {
            Ok(toml_config) => Config::default().merged(toml_config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Config::default()
            }
        }
    }

    /// Apply the values present in `toml` over `self`.
    pub fn merged(mut self, toml: TomlConfig) -> Self {
        if let Some(state) = toml.state {
            if let Some(dir) = state.dir {
                self.state.dir = expand_home(dir);
            }
            if let Some(auto_save) = state.auto_save {
                self.state.auto_save = auto_save;
            }
            if let Some(window) = state.rolling_window {
                self.state.rolling_window = window.max(1);
            }
            if let Some(budget) = state.summary_char_budget {
                self.state.summary_char_budget = budget;
            }
            if let Some(radius) = state.snippet_radius {
                self.state.snippet_radius = radius;
            }
            if let Some(frames) = state.max_stack_frames {
                self.state.max_stack_frames = frames;
            }
            if let Some(chars) = state.max_local_chars {
                self.state.max_local_chars = chars;
            }
        }

        if let Some(remap) = toml.remap {
            if let Some(radius) = remap.search_radius {
                self.remap.search_radius = radius;
            }
            if let Some(threshold) = remap.confidence_threshold {
                self.remap.confidence_threshold = threshold.clamp(0.0, 1.0);
            }
        }

        if let Some(restore) = toml.restore {
            if let Some(ms) = restore.item_timeout_ms {
                self.restore.item_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(perf) = toml.perf {
            if let Some(enabled) = perf.enabled {
                self.perf.enabled = enabled;
            }
        }

        if let Some(redaction) = toml.redaction {
            if let Some(patterns) = redaction.extra_patterns {
                self.redaction_patterns = patterns;
            }
        }

        self
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &PathBuf) {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        // Write the example config
        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state.dir = dir;
        self
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.state.auto_save = auto_save;
        self
    }

    pub fn with_perf_mode(mut self, enabled: bool) -> Self {
        self.perf.enabled = enabled;
        self
    }

    pub fn capture_limits(&self) -> CaptureLimits {
        CaptureLimits {
            summary_char_budget: self.state.summary_char_budget,
            snippet_radius: self.state.snippet_radius,
            max_stack_frames: self.state.max_stack_frames,
            max_local_chars: self.state.max_local_chars,
        }
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.clone()),
        Err(_) => path,
    }
}
