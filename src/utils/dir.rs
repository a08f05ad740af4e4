use std::{io, path::PathBuf};

use anyhow::{anyhow, Result};

/// Every ActivityWatch component keeps its files under an `activitywatch` directory.
const ACTIVITYWATCH_DIR: &str = "activitywatch";

pub const APPLICATION_NAME: &str = "aw-watcher-lock";

/// `$XDG_CONFIG_HOME/activitywatch/aw-watcher-lock` on linux, `%APPDATA%\activitywatch\...` on
/// Windows.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Couldn't locate a config directory"))?;
    Ok(base.join(ACTIVITYWATCH_DIR).join(APPLICATION_NAME))
}

pub fn log_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Couldn't locate a local data directory"))?;
    Ok(base.join(ACTIVITYWATCH_DIR).join(APPLICATION_NAME).join("log"))
}

pub fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}
