use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A PSA service board. `notify_enabled` and `chat_recipient_id` are owned
/// locally and survive re-syncs from PSA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Board {
    pub id: i32,
    pub name: String,
    pub notify_enabled: bool,
    pub chat_recipient_id: Option<i32>,
    pub deleted: bool,
    pub updated_on: DateTime<Utc>,
}

impl Board {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            notify_enabled: false,
            chat_recipient_id: None,
            deleted: false,
            updated_on: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketStatus {
    pub id: i32,
    pub board_id: i32,
    pub name: String,
    pub is_default: bool,
    pub display_on_board: bool,
    pub inactive: bool,
    pub closed: bool,
    pub deleted: bool,
    pub updated_on: DateTime<Utc>,
}
