//! Dump artifact configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where dump artifacts are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Directory receiving the dump files. Created by the host module at load.
    pub dir: PathBuf,

    /// File name prefix; files are named `{prefix}-YYYYMMDD_HHMMSS.txt`.
    pub prefix: String,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            dir: PathBuf::from("garrysmod/gcrash"),
            prefix: "luadump".to_string(),
        }
    }
}
