//! # Persistence Module
//!
//! ## Why This Module Exists
//! The bridge is configured once at startup and never writes configuration
//! back. This module finds the configuration file, reads it and hands the
//! parsed schema to validation, producing the immutable [`BridgeConfig`]
//! every other component receives.
//!
//! ## Lookup Order
//! 1. An explicit path (`--config` / `SOCKET_GIANT_CONFIG`)
//! 2. `/data/options.json`, where the Home Assistant supervisor puts add-on options
//! 3. `config.toml` in the working directory
//! 4. `<user config dir>/socket-giant-bridge/config.toml`
//!
//! ## Error Handling Strategy
//! Unlike runtime failures, every problem here is fatal: a bridge with a
//! half-understood board list would publish wrong topics or drive the wrong
//! relays. Errors carry the file path and the offending field.

pub mod config_file;

use std::path::{Path, PathBuf};
use tokio::fs::{read_to_string, try_exists};
use tracing::{debug, info};

use crate::config::{BridgeConfig, ConfigError};
use config_file::RawConfig;

const ADDON_OPTIONS_FILE: &str = "/data/options.json";
const LOCAL_CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR: &str = "socket-giant-bridge";

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(ADDON_OPTIONS_FILE),
        PathBuf::from(LOCAL_CONFIG_FILE),
    ];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push(CONFIG_DIR);
        dir.push(LOCAL_CONFIG_FILE);
        paths.push(dir);
    }
    paths
}

/// Resolves the configuration file to use. An explicit path is taken as is,
/// otherwise the first existing candidate wins.
pub async fn locate_config(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = candidate_paths();
    for path in &candidates {
        debug!("Looking for configuration at {}", path.display());
        if try_exists(path).await.unwrap_or(false) {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::NotFound(
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    ))
}

/// Reads and validates one configuration file. `.json` files are parsed as
/// JSON, everything else as TOML.
pub async fn read_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let text = read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let raw = if is_json {
        RawConfig::from_json(&text).map_err(|e| e.to_string())
    } else {
        RawConfig::from_toml(&text).map_err(|e| e.to_string())
    }
    .map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;

    raw.validate()
}

pub async fn load_config(explicit: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let path = locate_config(explicit).await?;
    info!("Loading configuration from {}", path.display());
    let config = read_config(&path).await?;
    info!(
        "Configured {} boards ({} enabled), polling every {:?}",
        config.boards.len(),
        config.enabled_boards().count(),
        config.poll_interval
    );
    Ok(config)
}
