use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Result, StarError};

const CONFIG_PATH: &str = ".starwrap/config.json";
const SCRATCH_DIR_ENV: &str = "STARWRAP_SCRATCH_DIR";
const TIMEOUT_ENV: &str = "STARWRAP_TIMEOUT_SECS";
const INTERACTIVE_ENV: &str = "STARWRAP_INTERACTIVE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarConfig {
    /// Installation root; takes priority over `$STARLINK_DIR`.
    pub toolkit_dir: Option<PathBuf>,
    /// Where scratch directories are created (default: cwd).
    pub scratch_parent: Option<PathBuf>,
    /// Maximum wait per command; unset waits forever.
    pub timeout_secs: Option<u64>,
    /// Allow applications to prompt on the terminal.
    pub interactive: bool,
    /// Append `quiet=true` to commands that do not set it.
    pub quiet: bool,
}

impl StarConfig {
    /// Load `.starwrap/config.json` if present, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_PATH))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            StarError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup(SCRATCH_DIR_ENV) {
            self.scratch_parent = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup(TIMEOUT_ENV).and_then(|v| v.trim().parse::<u64>().ok()) {
            self.timeout_secs = Some(secs);
        }
        if let Some(flag) = lookup(INTERACTIVE_ENV) {
            self.interactive = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
