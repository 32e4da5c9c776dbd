//! Store abstraction: where a facility's log, roster and configuration live.
//!
//! A project root is any directory containing `.haccp/`. Paths in
//! `config.toml` are resolved relative to that root unless absolute.

use crate::core::error::HaccpError;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `.haccp/config.toml`. Every field is optional on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_path: PathBuf,
    pub roster_path: PathBuf,
    pub audit_path: PathBuf,
    pub lock_timeout_ms: u64,
    pub recent_limit: usize,
    pub fallback_employees: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data = PathBuf::from(schemas::DEFAULT_DATA_DIR);
        Self {
            log_path: data.join(schemas::DEFAULT_LOG_NAME),
            roster_path: PathBuf::from(schemas::DEFAULT_ROSTER_NAME),
            audit_path: data.join(schemas::DEFAULT_AUDIT_NAME),
            lock_timeout_ms: 5_000,
            recent_limit: 25,
            fallback_employees: schemas::FALLBACK_EMPLOYEES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Store handle representing one facility's traceability workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the project root (parent of `.haccp/`)
    pub root: PathBuf,
    pub config: Config,
}

impl Store {
    /// Open a store rooted at `root`, loading `.haccp/config.toml` if present.
    pub fn open(root: &Path) -> Result<Self, HaccpError> {
        let config = load_config(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Store with in-memory defaults; nothing is read from disk.
    pub fn with_defaults(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            config: Config::default(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.config.log_path)
    }

    pub fn roster_path(&self) -> PathBuf {
        self.resolve(&self.config.roster_path)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.resolve(&self.config.audit_path)
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(schemas::PROJECT_DIR_NAME)
        .join(schemas::CONFIG_FILE_NAME)
}

/// No config file means defaults; a config file that does not parse is an error.
pub fn load_config(root: &Path) -> Result<Config, HaccpError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&path).map_err(HaccpError::IoError)?;
    toml::from_str(&content)
        .map_err(|e| HaccpError::ConfigError(format!("{}: {}", path.display(), e)))
}

/// Write the default config unless one already exists. Returns true when written.
pub fn write_default_config(root: &Path) -> Result<bool, HaccpError> {
    let path = config_path(root);
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(HaccpError::IoError)?;
    }
    let body = toml::to_string_pretty(&Config::default())
        .map_err(|e| HaccpError::ConfigError(e.to_string()))?;
    fs::write(&path, body).map_err(HaccpError::IoError)?;
    Ok(true)
}

/// Walk up from `start_dir` until a directory containing `.haccp/` is found.
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, HaccpError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(schemas::PROJECT_DIR_NAME).exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(HaccpError::NotFound(
                "'.haccp' directory not found in current or parent directories. Run `haccp-trace init` first.".to_string(),
            ));
        }
    }
}
