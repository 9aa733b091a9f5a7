#[cfg(test)]
pub mod memory;
pub mod postgres;

#[cfg(test)]
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::schema::{
    AppConfig, Board, ChatRecipient, Company, Contact, Member, NewNotification, NewUserForward,
    NotifierRule, Ticket, TicketNote, TicketNotification, TicketStatus, UserForward,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transaction already finished")]
    TxClosed,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of the local projection.
///
/// `begin` returns a store of the same shape bound to a transaction. Writes
/// through it become visible to other handles only after `commit`; dropping
/// it uncommitted rolls everything back. On a store that is not bound to a
/// transaction `commit` and `rollback` are no-ops. Calling `begin` on a
/// transactional store opens a savepoint: its `commit` releases it and its
/// `rollback` undoes only the writes made since, leaving the outer
/// transaction usable.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Arc<dyn Store>>;
    async fn commit(&self) -> StoreResult<()>;
    async fn rollback(&self) -> StoreResult<()>;

    async fn get_board(&self, id: i32) -> StoreResult<Board>;
    async fn list_boards(&self) -> StoreResult<Vec<Board>>;
    /// Inserts or refreshes `name`, clearing `deleted`. Local routing fields
    /// are only taken from `board` on first insert.
    async fn upsert_board(&self, board: &Board) -> StoreResult<Board>;
    async fn soft_delete_board(&self, id: i32) -> StoreResult<()>;
    async fn set_board_notify(&self, id: i32, enabled: bool) -> StoreResult<Board>;

    async fn list_statuses_by_board(&self, board_id: i32) -> StoreResult<Vec<TicketStatus>>;
    async fn upsert_status(&self, status: &TicketStatus) -> StoreResult<TicketStatus>;
    async fn soft_delete_status(&self, id: i32) -> StoreResult<()>;

    async fn get_company(&self, id: i32) -> StoreResult<Company>;
    async fn upsert_company(&self, company: &Company) -> StoreResult<Company>;

    async fn get_contact(&self, id: i32) -> StoreResult<Contact>;
    async fn upsert_contact(&self, contact: &Contact) -> StoreResult<Contact>;

    async fn get_member(&self, id: i32) -> StoreResult<Member>;
    async fn get_member_by_identifier(&self, identifier: &str) -> StoreResult<Member>;
    async fn list_members(&self) -> StoreResult<Vec<Member>>;
    async fn upsert_member(&self, member: &Member) -> StoreResult<Member>;

    async fn get_ticket(&self, id: i32) -> StoreResult<Ticket>;
    /// `added_to_store_at` is kept from the first insert.
    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket>;
    /// Absent tickets are ignored.
    async fn soft_delete_ticket(&self, id: i32) -> StoreResult<()>;

    async fn get_note(&self, id: i32) -> StoreResult<TicketNote>;
    /// `notified`, `skipped` and `added_on` are kept from the first insert.
    async fn upsert_note(&self, note: &TicketNote) -> StoreResult<TicketNote>;
    async fn mark_note_notified(&self, id: i32) -> StoreResult<()>;
    async fn mark_note_skipped(&self, id: i32) -> StoreResult<()>;

    async fn get_recipient(&self, id: i32) -> StoreResult<ChatRecipient>;
    async fn list_recipients(&self) -> StoreResult<Vec<ChatRecipient>>;
    /// Case-insensitive match, most recent `last_activity` first.
    async fn list_recipients_by_email(&self, email: &str) -> StoreResult<Vec<ChatRecipient>>;
    /// Keyed on `external_id`; the local `id` of `recipient` is ignored.
    async fn upsert_recipient(&self, recipient: &ChatRecipient) -> StoreResult<ChatRecipient>;
    async fn delete_recipient(&self, id: i32) -> StoreResult<()>;

    async fn list_rules(&self) -> StoreResult<Vec<NotifierRule>>;
    async fn list_rules_by_board(&self, board_id: i32) -> StoreResult<Vec<NotifierRule>>;
    async fn insert_rule(
        &self,
        board_id: i32,
        recipient_id: i32,
        enabled: bool,
    ) -> StoreResult<NotifierRule>;
    async fn delete_rule(&self, id: i32) -> StoreResult<()>;

    async fn list_forwards(&self) -> StoreResult<Vec<UserForward>>;
    async fn list_forwards_by_source(&self, source_id: i32) -> StoreResult<Vec<UserForward>>;
    async fn insert_forward(&self, forward: &NewUserForward) -> StoreResult<UserForward>;
    async fn delete_forward(&self, id: i32) -> StoreResult<()>;

    async fn exists_notification_for_note(&self, note_id: i32) -> StoreResult<bool>;
    async fn exists_new_ticket_notification(&self, ticket_id: i32) -> StoreResult<bool>;
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> StoreResult<TicketNotification>;
    async fn finish_notification(
        &self,
        id: i64,
        sent: bool,
        error: Option<String>,
    ) -> StoreResult<()>;
    async fn list_notifications_for_ticket(
        &self,
        ticket_id: i32,
    ) -> StoreResult<Vec<TicketNotification>>;

    async fn get_app_config(&self) -> StoreResult<Option<AppConfig>>;
    async fn upsert_app_config(&self, config: &AppConfig) -> StoreResult<AppConfig>;
}
