//! Resolution of the per-platform configuration directory.

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Returns the configuration directory for `app_name`, creating it if needed.
///
/// Resolves to the platform user-configuration directory (`%APPDATA%\<app>`,
/// `~/Library/Application Support/<app>` or `~/.config/<app>`). If that
/// directory cannot be created, falls back to a hidden `.<app>` directory
/// under the current working directory.
pub fn ensure_config_dir(app_name: &str) -> Result<PathBuf> {
    if let Some(base) = dirs::config_dir() {
        let dir = base.join(app_name);
        if fs::create_dir_all(&dir).is_ok() {
            return Ok(dir);
        }
    }

    let fallback = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(format!(".{app_name}"));
    fs::create_dir_all(&fallback).map_err(|e| {
        Error::Config(format!(
            "unable to create configuration directory {}: {e}",
            fallback.display()
        ))
    })?;
    Ok(fallback)
}
