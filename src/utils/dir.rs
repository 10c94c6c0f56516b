use std::{env, io, path::PathBuf};

use anyhow::{anyhow, Result};

const APP_DIR: &str = "gnotime";
pub const JOURNAL_FILE: &str = "journal.json";

/// Directory for the journal and log files. Uses `$XDG_STATE_HOME` or `$HOME/.local/state` on
/// unix-likes and `%APPDATA%` on Windows. The directory is created when missing.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = state_home()?;
    path.push(APP_DIR);

    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

#[cfg(windows)]
fn state_home() -> Result<PathBuf> {
    env::var("APPDATA")
        .map(PathBuf::from)
        .map_err(|_| anyhow!("APPDATA should be present on Windows"))
}

#[cfg(not(windows))]
fn state_home() -> Result<PathBuf> {
    env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))
}
