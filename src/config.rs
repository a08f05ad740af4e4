//! Watcher configuration. Values come from a TOML file shared with the other ActivityWatch
//! components and can be overridden from the command line.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::utils::dir::{config_dir, ensure_dir, APPLICATION_NAME};

pub const DEFAULT_CONFIG: &str = r#"[aw-watcher-lock]
timeout = 180
poll_time = 5

[aw-watcher-lock-testing]
timeout = 20
poll_time = 1
"#;

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("timeout ({timeout:?}) must not be shorter than the poll interval ({poll_time:?})")]
    TimeoutShorterThanPoll {
        timeout: Duration,
        poll_time: Duration,
    },
    #[error("poll_time must be longer than zero")]
    ZeroPollTime,
    #[error("{name} must be a finite non-negative amount of seconds, got {value}")]
    InvalidSeconds { name: &'static str, value: f64 },
}

/// One `[aw-watcher-lock*]` table of the config file. Both values are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatcherSection {
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_poll_time")]
    pub poll_time: f64,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            poll_time: default_poll_time(),
        }
    }
}

impl WatcherSection {
    fn testing() -> Self {
        Self {
            timeout: 20.,
            poll_time: 1.,
        }
    }
}

fn default_timeout() -> f64 {
    180.
}

fn default_poll_time() -> f64 {
    5.
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "aw-watcher-lock", default)]
    pub production: WatcherSection,
    #[serde(rename = "aw-watcher-lock-testing", default = "WatcherSection::testing")]
    pub testing: WatcherSection,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn section(self, testing: bool) -> WatcherSection {
        if testing {
            self.testing
        } else {
            self.production
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(format!("{APPLICATION_NAME}.toml")))
}

/// Reads the watcher section from `path`. A missing file is created with [DEFAULT_CONFIG] first,
/// so users get a template to edit.
pub fn load_config(path: &Path, testing: bool) -> Result<WatcherSection> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            ensure_dir(parent.to_path_buf())?;
        }
        info!("Writing default config to {path:?}");
        std::fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write default config to {path:?}"))?;
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path:?}"))?;
    Ok(ConfigFile::parse(&content)?.section(testing))
}

/// Timing settings of the watcher. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Time spent locked before the user is considered AFK.
    pub timeout: Duration,
    /// How often the lock state is sampled.
    pub poll_time: Duration,
}

impl Settings {
    /// Explicit `timeout`/`poll_time` take precedence over the config section.
    pub fn new(
        section: &WatcherSection,
        timeout: Option<f64>,
        poll_time: Option<f64>,
    ) -> Result<Self, SettingsError> {
        let timeout = seconds("timeout", timeout.unwrap_or(section.timeout))?;
        let poll_time = seconds("poll_time", poll_time.unwrap_or(section.poll_time))?;
        Self::from_durations(timeout, poll_time)
    }

    pub fn from_durations(timeout: Duration, poll_time: Duration) -> Result<Self, SettingsError> {
        if poll_time.is_zero() {
            return Err(SettingsError::ZeroPollTime);
        }
        if timeout < poll_time {
            return Err(SettingsError::TimeoutShorterThanPoll { timeout, poll_time });
        }
        Ok(Self { timeout, poll_time })
    }

    /// Merge window handed to the server: consecutive equal heartbeats at most this far apart
    /// collapse into one event.
    pub fn pulsetime(&self) -> Duration {
        self.timeout + self.poll_time
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, SettingsError> {
    Duration::try_from_secs_f64(value).map_err(|_| SettingsError::InvalidSeconds { name, value })
}
