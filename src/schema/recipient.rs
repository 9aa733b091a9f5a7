use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipient_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    Room,
    Person,
}

/// A chat room or person that notifications can be delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatRecipient {
    pub id: i32,
    pub external_id: String,
    pub name: String,
    pub kind: RecipientKind,
    pub email: Option<String>,
    pub last_activity: DateTime<Utc>,
}
