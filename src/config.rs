use serde::{Deserialize, Serialize};

/// Tunables for one interpreter instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of object slots in the heap.
    pub capacity: usize,
    /// Symbol and string literals longer than this many characters are truncated.
    pub max_token_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_token_len: 99,
        }
    }
}

impl Config {
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }
}
