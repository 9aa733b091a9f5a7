use super::{Store, StoreError, StoreResult};
use crate::schema::{
    AppConfig, Board, ChatRecipient, Company, Contact, Member, NewNotification, NewUserForward,
    NotificationKind, NotifierRule, Ticket, TicketNote, TicketNotification, TicketStatus,
    UserForward,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct MemState {
    pub boards: BTreeMap<i32, Board>,
    pub statuses: BTreeMap<i32, TicketStatus>,
    pub companies: BTreeMap<i32, Company>,
    pub contacts: BTreeMap<i32, Contact>,
    pub members: BTreeMap<i32, Member>,
    pub tickets: BTreeMap<i32, Ticket>,
    pub notes: BTreeMap<i32, TicketNote>,
    pub recipients: BTreeMap<i32, ChatRecipient>,
    pub rules: BTreeMap<i32, NotifierRule>,
    pub forwards: BTreeMap<i32, UserForward>,
    pub notifications: BTreeMap<i64, TicketNotification>,
    pub config: Option<AppConfig>,
    next_recipient_id: i32,
    next_rule_id: i32,
    next_forward_id: i32,
    next_notification_id: i64,
}

/// In-process store. Transactions are a no-op: `begin` hands back the same
/// shared state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Direct access for seeding and inspection.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MemState) -> R) -> R {
        f(&mut self.state())
    }
}

fn get<K: Ord + ToString + Copy, V: Clone>(
    map: &BTreeMap<K, V>,
    entity: &'static str,
    id: K,
) -> StoreResult<V> {
    map.get(&id)
        .cloned()
        .ok_or_else(|| StoreError::not_found(entity, id))
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(self.clone()))
    }

    async fn commit(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_board(&self, id: i32) -> StoreResult<Board> {
        get(&self.state().boards, "board", id)
    }

    async fn list_boards(&self) -> StoreResult<Vec<Board>> {
        Ok(self.state().boards.values().cloned().collect())
    }

    async fn upsert_board(&self, board: &Board) -> StoreResult<Board> {
        let mut state = self.state();
        let now = Utc::now();
        let row = state
            .boards
            .entry(board.id)
            .and_modify(|existing| {
                existing.name = board.name.clone();
                existing.deleted = false;
                existing.updated_on = now;
            })
            .or_insert_with(|| Board {
                deleted: false,
                updated_on: now,
                ..board.clone()
            });
        Ok(row.clone())
    }

    async fn soft_delete_board(&self, id: i32) -> StoreResult<()> {
        let mut state = self.state();
        let board = state
            .boards
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("board", id))?;
        board.deleted = true;
        board.updated_on = Utc::now();
        Ok(())
    }

    async fn set_board_notify(&self, id: i32, enabled: bool) -> StoreResult<Board> {
        let mut state = self.state();
        let board = state
            .boards
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("board", id))?;
        board.notify_enabled = enabled;
        Ok(board.clone())
    }

    async fn list_statuses_by_board(&self, board_id: i32) -> StoreResult<Vec<TicketStatus>> {
        Ok(self
            .state()
            .statuses
            .values()
            .filter(|s| s.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn upsert_status(&self, status: &TicketStatus) -> StoreResult<TicketStatus> {
        let row = TicketStatus {
            deleted: false,
            updated_on: Utc::now(),
            ..status.clone()
        };
        self.state().statuses.insert(row.id, row.clone());
        Ok(row)
    }

    async fn soft_delete_status(&self, id: i32) -> StoreResult<()> {
        let mut state = self.state();
        let status = state
            .statuses
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ticket status", id))?;
        status.deleted = true;
        Ok(())
    }

    async fn get_company(&self, id: i32) -> StoreResult<Company> {
        get(&self.state().companies, "company", id)
    }

    async fn upsert_company(&self, company: &Company) -> StoreResult<Company> {
        let row = Company {
            updated_on: Utc::now(),
            ..company.clone()
        };
        self.state().companies.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_contact(&self, id: i32) -> StoreResult<Contact> {
        get(&self.state().contacts, "contact", id)
    }

    async fn upsert_contact(&self, contact: &Contact) -> StoreResult<Contact> {
        let row = Contact {
            updated_on: Utc::now(),
            ..contact.clone()
        };
        self.state().contacts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_member(&self, id: i32) -> StoreResult<Member> {
        get(&self.state().members, "member", id)
    }

    async fn get_member_by_identifier(&self, identifier: &str) -> StoreResult<Member> {
        self.state()
            .members
            .values()
            .find(|m| m.identifier.eq_ignore_ascii_case(identifier))
            .cloned()
            .ok_or_else(|| StoreError::not_found("member", identifier))
    }

    async fn list_members(&self) -> StoreResult<Vec<Member>> {
        Ok(self.state().members.values().cloned().collect())
    }

    async fn upsert_member(&self, member: &Member) -> StoreResult<Member> {
        let mut state = self.state();
        if state
            .members
            .values()
            .any(|m| m.id != member.id && m.identifier == member.identifier)
        {
            return Err(StoreError::Conflict(format!(
                "member identifier {} already in use",
                member.identifier
            )));
        }
        let row = Member {
            updated_on: Utc::now(),
            ..member.clone()
        };
        state.members.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_ticket(&self, id: i32) -> StoreResult<Ticket> {
        get(&self.state().tickets, "ticket", id)
    }

    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut state = self.state();
        let now = Utc::now();
        let added = state
            .tickets
            .get(&ticket.id)
            .map_or(ticket.added_to_store_at, |t| t.added_to_store_at);
        let row = Ticket {
            added_to_store_at: added,
            deleted: false,
            updated_on: now,
            ..ticket.clone()
        };
        state.tickets.insert(row.id, row.clone());
        Ok(row)
    }

    async fn soft_delete_ticket(&self, id: i32) -> StoreResult<()> {
        if let Some(ticket) = self.state().tickets.get_mut(&id) {
            ticket.deleted = true;
            ticket.updated_on = Utc::now();
        }
        Ok(())
    }

    async fn get_note(&self, id: i32) -> StoreResult<TicketNote> {
        get(&self.state().notes, "ticket note", id)
    }

    async fn upsert_note(&self, note: &TicketNote) -> StoreResult<TicketNote> {
        let mut state = self.state();
        let now = Utc::now();
        let row = match state.notes.get(&note.id) {
            Some(existing) => TicketNote {
                notified: existing.notified,
                skipped: existing.skipped,
                added_on: existing.added_on,
                updated_on: now,
                ..note.clone()
            },
            None => TicketNote {
                updated_on: now,
                ..note.clone()
            },
        };
        state.notes.insert(row.id, row.clone());
        Ok(row)
    }

    async fn mark_note_notified(&self, id: i32) -> StoreResult<()> {
        let mut state = self.state();
        let note = state
            .notes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ticket note", id))?;
        note.notified = true;
        Ok(())
    }

    async fn mark_note_skipped(&self, id: i32) -> StoreResult<()> {
        let mut state = self.state();
        let note = state
            .notes
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ticket note", id))?;
        note.skipped = true;
        Ok(())
    }

    async fn get_recipient(&self, id: i32) -> StoreResult<ChatRecipient> {
        get(&self.state().recipients, "chat recipient", id)
    }

    async fn list_recipients(&self) -> StoreResult<Vec<ChatRecipient>> {
        Ok(self.state().recipients.values().cloned().collect())
    }

    async fn list_recipients_by_email(&self, email: &str) -> StoreResult<Vec<ChatRecipient>> {
        let mut found: Vec<ChatRecipient> = self
            .state()
            .recipients
            .values()
            .filter(|r| {
                r.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(found)
    }

    async fn upsert_recipient(&self, recipient: &ChatRecipient) -> StoreResult<ChatRecipient> {
        let mut state = self.state();
        let existing = state
            .recipients
            .values()
            .find(|r| r.external_id == recipient.external_id)
            .map(|r| r.id);
        let id = match existing {
            Some(id) => id,
            None => {
                state.next_recipient_id += 1;
                state.next_recipient_id
            }
        };
        let row = ChatRecipient {
            id,
            ..recipient.clone()
        };
        state.recipients.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_recipient(&self, id: i32) -> StoreResult<()> {
        let mut state = self.state();
        if state.recipients.remove(&id).is_none() {
            return Err(StoreError::not_found("chat recipient", id));
        }
        state.rules.retain(|_, r| r.recipient_id != id);
        state
            .forwards
            .retain(|_, f| f.source_id != id && f.dest_id != id);
        for board in state.boards.values_mut() {
            if board.chat_recipient_id == Some(id) {
                board.chat_recipient_id = None;
            }
        }
        Ok(())
    }

    async fn list_rules(&self) -> StoreResult<Vec<NotifierRule>> {
        Ok(self.state().rules.values().cloned().collect())
    }

    async fn list_rules_by_board(&self, board_id: i32) -> StoreResult<Vec<NotifierRule>> {
        Ok(self
            .state()
            .rules
            .values()
            .filter(|r| r.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn insert_rule(
        &self,
        board_id: i32,
        recipient_id: i32,
        enabled: bool,
    ) -> StoreResult<NotifierRule> {
        let mut state = self.state();
        if !state.boards.contains_key(&board_id) {
            return Err(StoreError::not_found("board", board_id));
        }
        if !state.recipients.contains_key(&recipient_id) {
            return Err(StoreError::not_found("chat recipient", recipient_id));
        }
        if state
            .rules
            .values()
            .any(|r| r.board_id == board_id && r.recipient_id == recipient_id)
        {
            return Err(StoreError::Conflict(format!(
                "notifier rule for board {board_id} and recipient {recipient_id} already exists"
            )));
        }
        state.next_rule_id += 1;
        let rule = NotifierRule {
            id: state.next_rule_id,
            board_id,
            recipient_id,
            enabled,
            created_on: Utc::now(),
        };
        state.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, id: i32) -> StoreResult<()> {
        self.state()
            .rules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("notifier rule", id))
    }

    async fn list_forwards(&self) -> StoreResult<Vec<UserForward>> {
        Ok(self.state().forwards.values().cloned().collect())
    }

    async fn list_forwards_by_source(&self, source_id: i32) -> StoreResult<Vec<UserForward>> {
        Ok(self
            .state()
            .forwards
            .values()
            .filter(|f| f.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn insert_forward(&self, forward: &NewUserForward) -> StoreResult<UserForward> {
        let mut state = self.state();
        if forward.source_id == forward.dest_id {
            return Err(StoreError::Conflict(
                "a recipient cannot forward to itself".into(),
            ));
        }
        for id in [forward.source_id, forward.dest_id] {
            if !state.recipients.contains_key(&id) {
                return Err(StoreError::not_found("chat recipient", id));
            }
        }
        state.next_forward_id += 1;
        let row = UserForward {
            id: state.next_forward_id,
            source_id: forward.source_id,
            dest_id: forward.dest_id,
            start_date: forward.start_date,
            end_date: forward.end_date,
            enabled: forward.enabled,
            user_keeps_copy: forward.user_keeps_copy,
            created_on: Utc::now(),
        };
        state.forwards.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_forward(&self, id: i32) -> StoreResult<()> {
        self.state()
            .forwards
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("user forward", id))
    }

    async fn exists_notification_for_note(&self, note_id: i32) -> StoreResult<bool> {
        Ok(self
            .state()
            .notifications
            .values()
            .any(|n| n.note_id == Some(note_id)))
    }

    async fn exists_new_ticket_notification(&self, ticket_id: i32) -> StoreResult<bool> {
        Ok(self
            .state()
            .notifications
            .values()
            .any(|n| n.ticket_id == ticket_id && n.kind == NotificationKind::NewTicket))
    }

    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> StoreResult<TicketNotification> {
        let mut state = self.state();
        state.next_notification_id += 1;
        let row = TicketNotification {
            id: state.next_notification_id,
            ticket_id: notification.ticket_id,
            note_id: notification.note_id,
            recipient_id: notification.recipient_id,
            forwarded_from_id: notification.forwarded_from_id,
            kind: notification.kind,
            sent: false,
            skipped: notification.skipped,
            error: None,
            trace_id: notification.trace_id,
            created_on: Utc::now(),
        };
        state.notifications.insert(row.id, row.clone());
        Ok(row)
    }

    async fn finish_notification(
        &self,
        id: i64,
        sent: bool,
        error: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state();
        let row = state
            .notifications
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ticket notification", id))?;
        row.sent = sent;
        row.error = error;
        Ok(())
    }

    async fn list_notifications_for_ticket(
        &self,
        ticket_id: i32,
    ) -> StoreResult<Vec<TicketNotification>> {
        Ok(self
            .state()
            .notifications
            .values()
            .filter(|n| n.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn get_app_config(&self) -> StoreResult<Option<AppConfig>> {
        Ok(self.state().config.clone())
    }

    async fn upsert_app_config(&self, config: &AppConfig) -> StoreResult<AppConfig> {
        self.state().config = Some(config.clone());
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecipientKind;
    use chrono::Duration;

    fn ticket(id: i32, summary: &str) -> Ticket {
        Ticket {
            id,
            board_id: 1,
            company_id: 1,
            contact_id: None,
            owner_id: None,
            summary: summary.to_string(),
            resources_csv: None,
            updated_by: None,
            added_to_store_at: Utc::now(),
            deleted: false,
            updated_on: Utc::now(),
        }
    }

    fn room(external_id: &str) -> ChatRecipient {
        ChatRecipient {
            id: 0,
            external_id: external_id.to_string(),
            name: format!("room {external_id}"),
            kind: RecipientKind::Room,
            email: None,
            last_activity: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ticket_upsert_keeps_first_insert_time() {
        let store = MemoryStore::new();
        let mut first = ticket(1, "first");
        first.added_to_store_at = Utc::now() - Duration::days(3);
        let inserted = store.upsert_ticket(&first).await.unwrap();

        let updated = store.upsert_ticket(&ticket(1, "second")).await.unwrap();
        assert_eq!(updated.summary, "second");
        assert_eq!(updated.added_to_store_at, inserted.added_to_store_at);
    }

    #[tokio::test]
    async fn board_upsert_clears_deleted_and_keeps_notify() {
        let store = MemoryStore::new();
        store.upsert_board(&Board::new(34, "Help Desk")).await.unwrap();
        store.set_board_notify(34, true).await.unwrap();
        store.soft_delete_board(34).await.unwrap();
        assert!(store.get_board(34).await.unwrap().deleted);

        let board = store.upsert_board(&Board::new(34, "Service Desk")).await.unwrap();
        assert!(!board.deleted);
        assert!(board.notify_enabled);
        assert_eq!(board.name, "Service Desk");
    }

    #[tokio::test]
    async fn note_upsert_keeps_markers() {
        let store = MemoryStore::new();
        let note = TicketNote {
            id: 5,
            ticket_id: 1,
            member_id: None,
            contact_id: None,
            created_by: None,
            content: Some("hi".into()),
            notified: false,
            skipped: false,
            added_on: Utc::now(),
            updated_on: Utc::now(),
        };
        store.upsert_note(&note).await.unwrap();
        store.mark_note_notified(5).await.unwrap();

        let again = store.upsert_note(&note).await.unwrap();
        assert!(again.notified);
    }

    #[tokio::test]
    async fn duplicate_rule_is_a_conflict() {
        let store = MemoryStore::new();
        store.upsert_board(&Board::new(1, "b")).await.unwrap();
        let r = store.upsert_recipient(&room("R1")).await.unwrap();

        store.insert_rule(1, r.id, true).await.unwrap();
        let err = store.insert_rule(1, r.id, true).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn recipient_upsert_is_keyed_on_external_id() {
        let store = MemoryStore::new();
        let a = store.upsert_recipient(&room("R1")).await.unwrap();
        let b = store.upsert_recipient(&room("R1")).await.unwrap();
        let c = store.upsert_recipient(&room("R2")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(store.list_recipients().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn forward_to_itself_is_a_conflict() {
        let store = MemoryStore::new();
        let r = store.upsert_recipient(&room("R1")).await.unwrap();
        let forward = NewUserForward {
            source_id: r.id,
            dest_id: r.id,
            start_date: None,
            end_date: None,
            enabled: true,
            user_keeps_copy: false,
        };

        let err = store.insert_forward(&forward).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.list_forwards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_rows_report_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_board(9).await.unwrap_err().is_not_found());
        assert!(store.get_member_by_identifier("nobody").await.unwrap_err().is_not_found());
        store.soft_delete_ticket(9).await.unwrap();
    }
}
