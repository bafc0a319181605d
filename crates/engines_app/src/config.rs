//! Application configuration.

use std::path::Path;

use anyhow::{Context, Result};
use engines_root::TickConfig;
use serde::{Deserialize, Serialize};

/// Settings for the demo binary, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Submission tick loop settings.
    pub tick: TickConfig,
    /// Build this many entities of each kind and time it, instead of
    /// running the removal/swap walkthrough (0 = off).
    pub profile_entities: u32,
}

impl AppConfig {
    /// Read a config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Returns `true` when profiling mode is on.
    #[must_use]
    pub fn is_profiling(&self) -> bool {
        self.profile_entities > 0
    }
}
