//! Storage configuration types.

use serde::Deserialize;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: `memory` or `sqlite`.
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Database file for `sqlite`.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "memory".to_string(),
            path: "./data/freshcycle.db".to_string(),
        }
    }
}
