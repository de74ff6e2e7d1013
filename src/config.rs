//! Persisted runtime configuration.
//!
//! A single JSON file under `~/.courier/`. The oracle selection is read back
//! at the start of every relay decision rather than cached, so a `courier use`
//! while the daemon runs takes effect on the next question. The
//! `COURIER_ORACLE` environment variable overrides the stored selection
//! without touching the file.

use crate::oracle::OracleKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the configured oracle kind.
pub const ORACLE_ENV: &str = "COURIER_ORACLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which oracle receives relayed questions.
    pub oracle: OracleKind,
    /// DevTools endpoint of the browser to attach to.
    pub devtools_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oracle: OracleKind::default(),
            devtools_url: "http://127.0.0.1:9222".to_string(),
        }
    }
}

/// File-backed config access.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.courier/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
            .join("config.json")
    }

    pub fn at_default() -> Self {
        Self::open(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config. A missing file reads as defaults; a malformed file
    /// is an error so a typo does not silently reset settings.
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config at {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed config at {}", self.path.display()))
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write config at {}", self.path.display()))
    }

    /// Persist a new oracle selection, returning the updated config.
    pub fn set_oracle(&self, kind: OracleKind) -> Result<Config> {
        let mut config = self.load()?;
        config.oracle = kind;
        self.save(&config)?;
        Ok(config)
    }

    /// The oracle kind in effect right now: environment override first,
    /// then the stored config, then the default. Never fails; a broken
    /// config file is logged and read as the default.
    pub fn oracle_kind(&self) -> OracleKind {
        if let Ok(value) = std::env::var(ORACLE_ENV) {
            match OracleKind::parse(&value) {
                Ok(kind) => return kind,
                Err(err) => warn!("ignoring {ORACLE_ENV}: {err}"),
            }
        }
        match self.load() {
            Ok(config) => config.oracle,
            Err(err) => {
                warn!("falling back to default oracle: {err:#}");
                OracleKind::default()
            }
        }
    }
}
