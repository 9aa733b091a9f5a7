use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PsaError {
    #[error("psa resource not found: {0}")]
    NotFound(String),
    #[error("psa rejected credentials")]
    Unauthorized,
    #[error("psa upstream error: {0}")]
    Upstream(String),
}

impl PsaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for PsaError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Reference to another PSA record as embedded in a parent payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaRef {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaInfo {
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub entered_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaTicket {
    pub id: i32,
    #[serde(default)]
    pub summary: String,
    pub board: PsaRef,
    pub company: PsaRef,
    #[serde(default)]
    pub contact: Option<PsaRef>,
    #[serde(default)]
    pub owner: Option<PsaRef>,
    #[serde(default)]
    pub resources: Option<String>,
    #[serde(default)]
    pub closed_flag: bool,
    #[serde(default, rename = "_info")]
    pub info: PsaInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaNote {
    pub id: i32,
    #[serde(default)]
    pub ticket_id: i32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub member: Option<PsaRef>,
    #[serde(default)]
    pub contact: Option<PsaRef>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaBoard {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub inactive_flag: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaBoardStatus {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub board: Option<PsaRef>,
    #[serde(default)]
    pub default_flag: bool,
    #[serde(default)]
    pub display_on_board: bool,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub closed_status: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaCompany {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaContact {
    pub id: i32,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<PsaRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaMember {
    pub id: i32,
    pub identifier: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub primary_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaCallback {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i32,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub object_id: i32,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: String,
    #[serde(default)]
    pub inactive_flag: bool,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Filter and ordering for PSA list endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsaQuery {
    pub conditions: Option<String>,
    pub order_by: Option<String>,
    pub page_size: Option<u32>,
}

impl PsaQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 100;

    pub fn conditions(conditions: impl Into<String>) -> Self {
        Self {
            conditions: Some(conditions.into()),
            ..Self::default()
        }
    }

    /// Open tickets, optionally restricted to a set of boards.
    pub fn open_tickets(board_ids: &[i32]) -> Self {
        let mut conditions = "closedFlag = false".to_string();
        if !board_ids.is_empty() {
            let boards: Vec<String> = board_ids.iter().map(|id| format!("board/id = {id}")).collect();
            conditions.push_str(&format!(" AND ({})", boards.join(" OR ")));
        }
        Self::conditions(conditions)
    }

    pub fn member_identifier(identifier: &str) -> Self {
        Self::conditions(format!("identifier = \"{}\"", identifier.replace('"', "")))
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(
            "pageSize",
            self.page_size.unwrap_or(Self::DEFAULT_PAGE_SIZE).to_string(),
        )];
        if let Some(c) = &self.conditions {
            pairs.push(("conditions", c.clone()));
        }
        if let Some(o) = &self.order_by {
            pairs.push(("orderBy", o.clone()));
        }
        pairs
    }
}

/// Read access to the PSA plus webhook callback management.
#[async_trait::async_trait]
pub trait PsaService: Send + Sync {
    async fn get_ticket(&self, id: i32) -> Result<PsaTicket, PsaError>;
    async fn list_tickets(&self, query: &PsaQuery) -> Result<Vec<PsaTicket>, PsaError>;
    /// `NotFound` when the ticket has no notes.
    async fn get_most_recent_note(&self, ticket_id: i32) -> Result<PsaNote, PsaError>;
    async fn get_board(&self, id: i32) -> Result<PsaBoard, PsaError>;
    async fn list_boards(&self) -> Result<Vec<PsaBoard>, PsaError>;
    async fn list_board_statuses(&self, board_id: i32) -> Result<Vec<PsaBoardStatus>, PsaError>;
    async fn get_company(&self, id: i32) -> Result<PsaCompany, PsaError>;
    async fn get_contact(&self, id: i32) -> Result<PsaContact, PsaError>;
    async fn get_member(&self, id: i32) -> Result<PsaMember, PsaError>;
    async fn list_members(&self, query: &PsaQuery) -> Result<Vec<PsaMember>, PsaError>;
    async fn list_callbacks(&self) -> Result<Vec<PsaCallback>, PsaError>;
    async fn post_callback(&self, callback: &PsaCallback) -> Result<PsaCallback, PsaError>;
    async fn delete_callback(&self, id: i32) -> Result<(), PsaError>;
}
