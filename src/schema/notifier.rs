use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotifierRule {
    pub id: i32,
    pub board_id: i32,
    pub recipient_id: i32,
    pub enabled: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserForward {
    pub id: i32,
    pub source_id: i32,
    pub dest_id: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub user_keeps_copy: bool,
    pub created_on: DateTime<Utc>,
}

impl UserForward {
    /// A forward applies only while enabled and inside its date range. A
    /// forward without a start date never applies.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(start) = self.start_date else {
            return false;
        };
        match self.end_date {
            Some(end) => now > start && now < end,
            None => now > start,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserForward {
    pub source_id: i32,
    pub dest_id: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub user_keeps_copy: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewTicket,
    UpdatedTicket,
}

/// One row per outbound message attempt, or per note deliberately skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketNotification {
    pub id: i64,
    pub ticket_id: i32,
    pub note_id: Option<i32>,
    pub recipient_id: Option<i32>,
    pub forwarded_from_id: Option<i32>,
    pub kind: NotificationKind,
    pub sent: bool,
    pub skipped: bool,
    pub error: Option<String>,
    pub trace_id: Option<Uuid>,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub ticket_id: i32,
    pub note_id: Option<i32>,
    pub recipient_id: Option<i32>,
    pub forwarded_from_id: Option<i32>,
    pub kind: NotificationKind,
    pub skipped: bool,
    pub trace_id: Option<Uuid>,
}
