// Session configuration
//
// Static settings for one debug session plus the defaults for the
// features the IDE can change at runtime through feature_set.

use serde::{Deserialize, Serialize};

/// Hard cap on the children enumerated for a single composite value
pub const DEFAULT_MAX_CHILDREN: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Language tag announced in `<init>`
    pub language: String,
    pub protocol_version: String,
    pub idekey: String,
    pub app_id: String,
    /// Levels of eager child expansion in property responses
    pub max_depth: usize,
    pub max_children: usize,
    /// Maximum length of a single encoded value, 0 for unlimited
    pub max_data: usize,
    /// Number of commands that may execute concurrently
    pub worker_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "javascript".to_string(),
            protocol_version: "1.0".to_string(),
            idekey: String::new(),
            app_id: std::process::id().to_string(),
            max_depth: 2,
            max_children: DEFAULT_MAX_CHILDREN,
            max_data: 0,
            worker_limit: 16,
        }
    }
}
