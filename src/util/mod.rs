//! Utility modules

pub mod fs;
pub mod paths;

pub use fs::atomic_write;
pub use paths::{config_path, data_dir, default_state_dir, init_data_dir, log_file_path, logs_dir};
