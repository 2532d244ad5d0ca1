//! Filter configuration

use std::fs;
use std::path::{Path, PathBuf};

use bw_core::FilterError;
use serde::{Deserialize, Serialize};

/// Where rules and cosmetic lists come from, and what starts enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Directory holding `<id>.json` rulesets
    pub rules_dir: PathBuf,

    /// Ruleset ids loaded into the engine
    pub enabled_rulesets: Vec<String>,

    /// Cosmetic filter list files
    pub filter_lists: Vec<PathBuf>,

    /// Enable request filtering
    pub enabled: bool,

    /// Enable cosmetic filtering
    pub cosmetic_enabled: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("rules"),
            enabled_rulesets: vec!["default".to_string()],
            filter_lists: Vec::new(),
            enabled: true,
            cosmetic_enabled: true,
        }
    }
}

impl FilterConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, FilterError> {
        let text = fs::read_to_string(path).map_err(|e| {
            FilterError::ConfigInvalid(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
            .map_err(|e| FilterError::ConfigInvalid(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
