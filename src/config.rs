//! Daemon configuration and the PID file.
//!
//! - **Config** (`config.json`): presence client id, port, sweep timings.
//! - **PID file** (`daemon.pid`): written on start, removed on shutdown.
//!
//! Both live in `~/.claude-discord-status/`. Environment variables override
//! the file, the file overrides the defaults.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CLIENT_ID: &str = "1472915568930848829";
pub const DEFAULT_PORT: u16 = 19452;
pub const DEFAULT_STALE_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_REMOVE_TIMEOUT_MS: u64 = 1_800_000;

pub const ENV_CLIENT_ID: &str = "CLAUDE_DISCORD_CLIENT_ID";
pub const ENV_PORT: &str = "CLAUDE_DISCORD_PORT";

const DIR_NAME: &str = ".claude-discord-status";
const CONFIG_FILE: &str = "config.json";
const PID_FILE: &str = "daemon.pid";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Daemon settings (persisted to config.json). Timings are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_client_id")]
    pub discord_client_id: String,
    #[serde(default = "default_port")]
    pub daemon_port: u16,
    #[serde(default = "default_stale_check_interval")]
    pub stale_check_interval: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_remove_timeout")]
    pub remove_timeout: u64,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_stale_check_interval() -> u64 {
    DEFAULT_STALE_CHECK_INTERVAL_MS
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_remove_timeout() -> u64 {
    DEFAULT_REMOVE_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_client_id: default_client_id(),
            daemon_port: default_port(),
            stale_check_interval: default_stale_check_interval(),
            idle_timeout: default_idle_timeout(),
            remove_timeout: default_remove_timeout(),
        }
    }
}

impl Config {
    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_millis(self.stale_check_interval)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    pub fn remove_timeout(&self) -> Duration {
        Duration::from_millis(self.remove_timeout)
    }

    /// Apply environment overrides through `lookup`. An unparsable port is ignored.
    fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup(ENV_CLIENT_ID).filter(|v| !v.is_empty()) {
            self.discord_client_id = id;
        }
        if let Some(raw) = lookup(ENV_PORT) {
            match raw.trim().parse::<u16>() {
                Ok(port) if port > 0 => self.daemon_port = port,
                _ => warn!(value = %raw, "ignoring invalid {ENV_PORT}"),
            }
        }
        self
    }

    /// Replace unusable timings with their defaults
    fn validated(mut self) -> Self {
        if self.stale_check_interval == 0 {
            warn!("staleCheckInterval must be positive, using default");
            self.stale_check_interval = DEFAULT_STALE_CHECK_INTERVAL_MS;
        }
        if self.idle_timeout >= self.remove_timeout {
            warn!(
                idle = self.idle_timeout,
                remove = self.remove_timeout,
                "idleTimeout must be below removeTimeout, using defaults"
            );
            self.idle_timeout = DEFAULT_IDLE_TIMEOUT_MS;
            self.remove_timeout = DEFAULT_REMOVE_TIMEOUT_MS;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Daemon state directory (`~/.claude-discord-status/`)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(DIR_NAME))
}

pub fn pid_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(PID_FILE))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from disk and the environment, falling back to defaults.
pub fn load_config() -> Config {
    let from_file = config_dir()
        .map(|d| load_config_from(&d.join(CONFIG_FILE)))
        .unwrap_or_default();
    from_file
        .apply_env(|key| std::env::var(key).ok())
        .validated()
}

/// Write the daemon's PID atomically.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    atomic_write(path, pid.to_string().as_bytes())
}

/// Read a PID file, `None` if missing or garbled.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove the PID file; a missing file is not an error.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove PID file {}: {}", path.display(), e);
    }
}

// ---------------------------------------------------------------------------
// Path-parameterised helpers (used by public API and tests)
// ---------------------------------------------------------------------------

fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!("Ignoring invalid config {}: {}", path.display(), e);
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

#[cfg(test)]
fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
