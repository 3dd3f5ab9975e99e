//! Parsing and validation of `kestrel.toml` configuration files.
//!
//! This crate reads the project configuration and produces a strongly-typed
//! [`KestrelConfig`]. It also owns log setup through [`init_logging`].

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod logging;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use logging::init_logging;
pub use types::*;
