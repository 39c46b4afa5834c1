//! Config file discovery and layered loading.
//!
//! Layers, lowest priority first:
//!
//! 1. User config: `$TOOLBRIDGE_CONFIG_DIR/config.toml` or the platform
//!    config dir (`~/.config/toolbridge/config.toml` on Linux)
//! 2. Project config: `./toolbridge.toml`
//! 3. An explicit file passed with `--config`
//! 4. Environment variables (see [`crate::env`])
//!
//! Missing implicit layers are skipped. A broken implicit layer is skipped
//! with a warning; a missing or broken explicit file is an error.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::types::ToolbridgeConfig;

const APP_NAME: &str = "toolbridge";
const USER_CONFIG_FILE: &str = "config.toml";
const PROJECT_CONFIG_FILE: &str = "toolbridge.toml";

/// Environment variable to override the config directory.
pub const CONFIG_DIR_ENV: &str = "TOOLBRIDGE_CONFIG_DIR";

/// A config file that was checked during loading.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// The merged configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ToolbridgeConfig,
    /// Every file considered, in load order.
    pub sources: Vec<ConfigSource>,
    /// Non-fatal problems (unparseable implicit layers).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that actually contributed.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Where to look for config layers.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Overrides `TOOLBRIDGE_CONFIG_DIR` and the platform default.
    pub config_dir: Option<PathBuf>,
    /// Directory holding `toolbridge.toml`. Defaults to the working directory.
    pub project_dir: Option<PathBuf>,
    /// File given with `--config`.
    pub explicit: Option<PathBuf>,
}

/// Load every layer, including the process environment.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let options = LoadOptions {
        explicit: explicit.map(Path::to_path_buf),
        ..LoadOptions::default()
    };
    let mut loaded = load_config_with_options(&options)?;
    crate::env::apply_env(&mut loaded.config)?;
    Ok(loaded)
}

/// Load the file layers only, with explicit control over where to look.
pub fn load_config_with_options(options: &LoadOptions) -> Result<LoadedConfig> {
    let mut config = ToolbridgeConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match &options.config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = options
        .project_dir
        .as_ref()
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    if let Some(path) = &options.explicit {
        config.merge(load_config_file(path)?);
        sources.push(ConfigSource {
            path: path.clone(),
            loaded: true,
        });
    }

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load a single config file.
pub fn load_config_file(path: &Path) -> Result<ToolbridgeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ToolbridgeConfig::from_toml(&contents)
}

/// Get the user config file path.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the config directory for toolbridge.
///
/// Checks `TOOLBRIDGE_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default directory for log files.
pub fn default_log_dir() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join("logs"))
}

fn load_layer(
    config: &mut ToolbridgeConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}
