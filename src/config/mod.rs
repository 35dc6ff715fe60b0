mod settings;

pub use settings::{
    Config, PerfConfig, RestoreConfig, StateConfig, TomlConfig, EXAMPLE_CONFIG,
};
