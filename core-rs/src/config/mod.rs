//! Configuration: harness settings and per-process option files

pub mod settings;
pub mod writer;

pub use settings::{PortSettings, Settings, SETTINGS_FILE};
pub use writer::{
    write_config, write_config_in, ProcessConfig, DBPATH_KEY, KEY_FILE_KEY, LOG_PATH_KEY,
    PORT_KEY,
};
