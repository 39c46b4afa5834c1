//! Configuration for toolbridge.
//!
//! Loads TOML config from the user config dir, the project directory and an
//! optional explicit file, merges them field by field, then applies
//! environment overrides.
//!
//! ```no_run
//! let loaded = toolbridge_config::load_config(None)?;
//! for warning in &loaded.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! let timeout = loaded.config.client.timeout();
//! # Ok::<(), toolbridge_config::ConfigError>(())
//! ```

pub mod discovery;
pub mod env;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, default_log_dir, load_config,
    load_config_file, load_config_with_options, xdg_config_dir,
};
pub use env::{apply_env, apply_env_with};
pub use error::{ConfigError, Result};
pub use types::{ClientConfig, LoggingConfig, RelaySettings, ToolbridgeConfig};
