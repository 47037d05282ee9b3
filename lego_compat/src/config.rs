use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LegoError;

/// How requested repeat counts are stored when a frame function is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// Every frame function fires once, whatever the script asked for.
    #[default]
    SingleShot,
    /// Positive counts are honored; "repeat forever" fires once.
    FiniteOnly,
    /// Positive counts are honored and negative counts repeat forever.
    Full,
}

impl RepeatPolicy {
    /// Cycle counter stored for a requested count.
    pub fn stored_cycles(self, requested: i32) -> i32 {
        match self {
            RepeatPolicy::SingleShot => 0,
            RepeatPolicy::FiniteOnly => requested.max(0),
            RepeatPolicy::Full => requested,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameFunctionConfig {
    pub repeat_policy: RepeatPolicy,
    /// Give `FF_Remove`/`FF_RemoveAll` real behavior instead of no-ops.
    pub bulk_removal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegoConfig {
    pub frame_functions: FrameFunctionConfig,
}

impl LegoConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, LegoError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Loads a config file, falling back to defaults when no path is given.
    pub fn from_json_file(path: Option<&Path>) -> Result<Self, LegoError> {
        let Some(path) = path else {
            return Ok(LegoConfig::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| LegoError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}
