//! Daemon configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! command-line overrides applied by the binary.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IndexError, Result};

/// Directory (under the first root) holding the index image, socket and pid file.
pub const STATE_DIR: &str = ".cnav";

/// Default flush interval in seconds.
pub const DEFAULT_FLUSH_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories to index and watch.
    pub roots: Vec<PathBuf>,
    /// Parser worker count; 0 means one per core.
    pub workers: usize,
    /// Seconds between periodic index flushes.
    pub flush_interval_secs: u64,
    /// Prefixes never pruned by reconciliation. Also searched for `<...>` includes.
    pub system_include_dirs: Vec<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
    /// Register filesystem watches. Disabled only for one-shot indexing and tests.
    pub watch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            workers: 0,
            flush_interval_secs: DEFAULT_FLUSH_SECS,
            system_include_dirs: vec![PathBuf::from("/usr/include/"), PathBuf::from("/usr/lib/")],
            db_path: None,
            socket_path: None,
            watch: true,
        }
    }
}

impl Config {
    /// Load a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    /// Config file that is picked up automatically when present.
    pub fn default_file(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(IndexError::Config("at least one root directory is required".into()));
        }
        if self.flush_interval_secs == 0 {
            return Err(IndexError::Config("flush interval must be positive".into()));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    fn state_dir(&self) -> PathBuf {
        let root = self.roots.first().cloned().unwrap_or_else(|| PathBuf::from("."));
        root.join(STATE_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("symbols.db"))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("cnav.sock"))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir().join("daemon.pid")
    }
}
