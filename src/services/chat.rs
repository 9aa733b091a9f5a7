use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat resource not found: {0}")]
    NotFound(String),
    /// Credentials were rejected. Retrying cannot help.
    #[error("chat rejected credentials")]
    Unauthorized,
    #[error("chat upstream error: {0}")]
    Upstream(String),
}

impl ChatError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Destination {
    Room(String),
    Person(String),
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room {id}"),
            Self::Person(email) => write!(f, "person {email}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_person_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
}

impl ChatMessage {
    pub fn outbound(to: &Destination, markdown: &str) -> Self {
        let (room_id, to_person_email) = match to {
            Destination::Room(id) => (Some(id.clone()), None),
            Destination::Person(email) => (None, Some(email.clone())),
        };
        Self {
            id: None,
            room_id,
            to_person_email,
            markdown: Some(markdown.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Outbound chat capability.
#[async_trait::async_trait]
pub trait ChatService: Send + Sync {
    /// Returns the id of the posted message.
    async fn post_message(&self, to: &Destination, markdown: &str) -> Result<String, ChatError>;
    async fn list_rooms(&self, kind: Option<&str>) -> Result<Vec<Room>, ChatError>;
    async fn list_people(&self, email: &str) -> Result<Vec<Person>, ChatError>;
    async fn get_message(&self, id: &str) -> Result<ChatMessage, ChatError>;
}
