//! Envar configuration stored in `config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::DefaultMode;

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "ENVAR_CONFIG";

const MACHINE_STORE: &str = "/etc/envar/environment.toml";

/// Envar configuration (TOML).
///
/// Every field is optional in the file. Unset store and broadcast paths resolve
/// against the platform directories at use time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvarConfig {
    /// Backing file for the user scope.
    pub user_store: Option<PathBuf>,

    /// Backing file for the machine scope.
    pub machine_store: Option<PathBuf>,

    /// Directory shared by the change broadcaster and its listeners.
    pub broadcast_dir: Option<PathBuf>,

    /// Upper bound on the wait for listener acknowledgments.
    pub broadcast_timeout_ms: u64,

    /// Interval between listener polls while waiting.
    pub broadcast_poll_ms: u64,

    /// Mode applied to `-s` when neither `-a` nor `-o` is given.
    pub default_mode: DefaultMode,
}

impl Default for EnvarConfig {
    fn default() -> Self {
        Self {
            user_store: None,
            machine_store: None,
            broadcast_dir: None,
            broadcast_timeout_ms: 15_000,
            broadcast_poll_ms: 50,
            default_mode: DefaultMode::Append,
        }
    }
}

impl EnvarConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_timeout_ms == 0 {
            return Err(anyhow!("broadcast_timeout_ms must be > 0"));
        }
        if self.broadcast_poll_ms == 0 {
            return Err(anyhow!("broadcast_poll_ms must be > 0"));
        }
        if self.broadcast_poll_ms > self.broadcast_timeout_ms {
            return Err(anyhow!(
                "broadcast_poll_ms must not exceed broadcast_timeout_ms"
            ));
        }
        Ok(())
    }

    pub fn user_store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.user_store {
            return Ok(path.clone());
        }
        let base = dirs::config_dir().context("no per-user config directory on this platform")?;
        Ok(base.join("envar").join("environment.toml"))
    }

    pub fn machine_store_path(&self) -> PathBuf {
        self.machine_store
            .clone()
            .unwrap_or_else(|| PathBuf::from(MACHINE_STORE))
    }

    pub fn broadcast_dir_path(&self) -> PathBuf {
        self.broadcast_dir.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("envar")
        })
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn broadcast_poll(&self) -> Duration {
        Duration::from_millis(self.broadcast_poll_ms)
    }
}

/// Default config location: `<config_dir>/envar/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("envar").join("config.toml"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EnvarConfig::default()`.
pub fn load_config(path: &Path) -> Result<EnvarConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = EnvarConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EnvarConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Load the config named on the command line, else the default location.
pub fn resolve_config(explicit: Option<&Path>) -> Result<EnvarConfig> {
    match explicit {
        Some(path) => load_config(path),
        None => match default_config_path() {
            Some(path) => load_config(&path),
            None => Ok(EnvarConfig::default()),
        },
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EnvarConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
