use serde::{Deserialize, Serialize};

/// Live operator settings, persisted as a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AppConfig {
    pub attempt_notify: bool,
    pub max_concurrent_syncs: i32,
    pub max_message_length: i32,
    pub skip_launch_syncs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            attempt_notify: false,
            max_concurrent_syncs: 5,
            max_message_length: 300,
            skip_launch_syncs: false,
        }
    }
}
