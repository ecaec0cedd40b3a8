use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::ErrorLevel;
use crate::memory::{MemoryFill, DEFAULT_MEM_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Simulator settings, typically loaded from a JSON file and then
/// overridden from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub mem_size: usize,
    pub error_level: ErrorLevel,
    /// Zero means unlimited.
    pub cycle_limit: u64,
    pub trace: bool,
    pub profile: bool,
    pub metrics: bool,
    pub fill: MemoryFill,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            mem_size: DEFAULT_MEM_SIZE,
            error_level: ErrorLevel::default(),
            cycle_limit: 0,
            trace: false,
            profile: false,
            metrics: false,
            fill: MemoryFill::Zero,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: SimConfig = serde_json::from_str(s)?;
        config.mem_size = config.mem_size.clamp(1, DEFAULT_MEM_SIZE);
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
