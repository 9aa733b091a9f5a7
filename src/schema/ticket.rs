use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: i32,
    pub board_id: i32,
    pub company_id: i32,
    pub contact_id: Option<i32>,
    pub owner_id: Option<i32>,
    pub summary: String,
    pub resources_csv: Option<String>,
    pub updated_by: Option<String>,
    pub added_to_store_at: DateTime<Utc>,
    pub deleted: bool,
    pub updated_on: DateTime<Utc>,
}

impl Ticket {
    /// Resource identifiers as listed by PSA, trimmed, in order, without blanks.
    pub fn resource_identifiers(&self) -> Vec<String> {
        parse_resources(self.resources_csv.as_deref())
    }
}

pub fn parse_resources(csv: Option<&str>) -> Vec<String> {
    csv.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketNote {
    pub id: i32,
    pub ticket_id: i32,
    pub member_id: Option<i32>,
    pub contact_id: Option<i32>,
    pub created_by: Option<String>,
    pub content: Option<String>,
    pub notified: bool,
    pub skipped: bool,
    pub added_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}
