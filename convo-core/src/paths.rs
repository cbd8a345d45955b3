//! Per-user locations of the config file and logs.
//!
//! `CONVO_HOME`, when set, replaces both platform directories so a
//! deployment (or a test) can keep everything under one root.

use std::path::PathBuf;

use crate::constants::{APP_NAME, CONFIG_FILE_NAME};
use crate::error::{ConvoError, ConvoResult};

/// Environment variable overriding the platform directories.
pub const HOME_ENV: &str = "CONVO_HOME";

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Directory holding `config.toml`: `$CONVO_HOME` or `<config dir>/Convo`.
pub fn config_dir() -> ConvoResult<PathBuf> {
    if let Some(home) = home_override() {
        return Ok(home);
    }
    dirs::config_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| ConvoError::Config("could not determine config directory".into()))
}

/// Directory for runtime data: `$CONVO_HOME` or `<data dir>/Convo`.
pub fn data_dir() -> ConvoResult<PathBuf> {
    if let Some(home) = home_override() {
        return Ok(home);
    }
    dirs::data_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or_else(|| ConvoError::Config("could not determine data directory".into()))
}

pub fn config_file() -> ConvoResult<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn default_log_dir() -> ConvoResult<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

/// Short OS/arch label for startup logs, e.g. `linux-x86_64`.
pub fn os_label() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
