//! Storage Layer
//!
//! Session directories for detection artifacts, plus the platform
//! configuration directory.

pub mod illustration;
pub mod session;

pub use session::ResultPersister;

use anyhow::Result;
use std::path::PathBuf;

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "menutextspot", "MenuTextspot")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
