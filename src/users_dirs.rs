use std::{fs::create_dir_all, path::PathBuf};

use anyhow::Result;
use app_dirs2::{AppDataType, AppInfo, app_root};
use tracing::info;

#[tracing::instrument]
fn get_app_info() -> AppInfo {
    AppInfo{
        name: "git-lfs-remote-store",
        author: "git-lfs-remote-store"
    }
}

/// Per-user directory holding the log files and the credential database.
#[tracing::instrument]
pub fn get_config_dir() -> Result<PathBuf> {
    let path = app_root(AppDataType::UserConfig, &get_app_info())?;

    if !path.exists() {
        info!("Config directory does not exist, creating it.");
        create_dir_all(&path)?;
    }

    Ok(path)
}
