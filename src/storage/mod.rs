//! Storage Layer
//!
//! Platform directories for the config file, models and saved snapshots.

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "platereader", "PlateReader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Get the directory models are looked up in when a relative path is given
pub fn get_models_dir() -> Result<PathBuf> {
    let models_dir = get_data_dir()?.join("models");
    std::fs::create_dir_all(&models_dir)?;

    Ok(models_dir)
}
