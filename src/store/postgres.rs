use super::{Store, StoreError, StoreResult};
use crate::schema::{
    AppConfig, Board, ChatRecipient, Company, Contact, Member, NewNotification, NewUserForward,
    NotifierRule, Ticket, TicketNote, TicketNotification, TicketStatus, UserForward,
};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;

type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

#[derive(Clone)]
enum Conn {
    Pool(PgPool),
    Tx(SharedTx),
}

/// Postgres-backed store. A handle returned by `begin` owns the transaction;
/// the transaction rolls back when the last handle is dropped uncommitted.
/// `begin` on a transaction handle opens a savepoint one level deeper.
#[derive(Clone)]
pub struct PgStore {
    conn: Conn,
    depth: u32,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conn: Conn::Pool(pool),
            depth: 0,
        }
    }

    async fn savepoint_command(&self, cell: &SharedTx, verb: &str) -> StoreResult<()> {
        let sql = format!("{verb} sp_{}", self.depth);
        let mut guard = cell.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TxClosed)?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }
}

// Runs a query on either the pool or the open transaction.
macro_rules! run {
    ($self:ident, $query:expr, $method:ident) => {
        match &$self.conn {
            Conn::Pool(pool) => $query.$method(pool).await,
            Conn::Tx(cell) => {
                let mut guard = cell.lock().await;
                let tx = guard.as_mut().ok_or(StoreError::TxClosed)?;
                $query.$method(&mut **tx).await
            }
        }
    };
}

fn found<T>(row: Option<T>, entity: &'static str, id: impl ToString) -> StoreResult<T> {
    row.ok_or_else(|| StoreError::not_found(entity, id))
}

fn affected(rows: u64, entity: &'static str, id: impl ToString) -> StoreResult<()> {
    if rows == 0 {
        return Err(StoreError::not_found(entity, id));
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

const BOARD_COLUMNS: &str = "id, name, notify_enabled, chat_recipient_id, deleted, updated_on";
const TICKET_COLUMNS: &str = "id, board_id, company_id, contact_id, owner_id, summary, \
    resources_csv, updated_by, added_to_store_at, deleted, updated_on";
const NOTE_COLUMNS: &str = "id, ticket_id, member_id, contact_id, created_by, content, \
    notified, skipped, added_on, updated_on";
const RECIPIENT_COLUMNS: &str = "id, external_id, name, kind, email, last_activity";
const NOTIFICATION_COLUMNS: &str = "id, ticket_id, note_id, recipient_id, forwarded_from_id, \
    kind, sent, skipped, error, trace_id, created_on";

#[async_trait::async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Arc<dyn Store>> {
        match &self.conn {
            Conn::Pool(pool) => {
                let tx = pool.begin().await?;
                Ok(Arc::new(PgStore {
                    conn: Conn::Tx(Arc::new(Mutex::new(Some(tx)))),
                    depth: 0,
                }))
            }
            Conn::Tx(cell) => {
                let nested = PgStore {
                    conn: Conn::Tx(cell.clone()),
                    depth: self.depth + 1,
                };
                nested.savepoint_command(cell, "SAVEPOINT").await?;
                Ok(Arc::new(nested))
            }
        }
    }

    async fn commit(&self) -> StoreResult<()> {
        match &self.conn {
            Conn::Pool(_) => Ok(()),
            Conn::Tx(cell) if self.depth > 0 => {
                self.savepoint_command(cell, "RELEASE SAVEPOINT").await
            }
            Conn::Tx(cell) => {
                let tx = cell.lock().await.take().ok_or(StoreError::TxClosed)?;
                tx.commit().await?;
                Ok(())
            }
        }
    }

    async fn rollback(&self) -> StoreResult<()> {
        match &self.conn {
            Conn::Pool(_) => Ok(()),
            Conn::Tx(cell) if self.depth > 0 => {
                self.savepoint_command(cell, "ROLLBACK TO SAVEPOINT").await
            }
            Conn::Tx(cell) => {
                let tx = cell.lock().await.take().ok_or(StoreError::TxClosed)?;
                tx.rollback().await?;
                Ok(())
            }
        }
    }

    async fn get_board(&self, id: i32) -> StoreResult<Board> {
        let sql = format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1");
        let row = run!(self, sqlx::query_as::<_, Board>(&sql).bind(id), fetch_optional)?;
        found(row, "board", id)
    }

    async fn list_boards(&self) -> StoreResult<Vec<Board>> {
        let sql = format!("SELECT {BOARD_COLUMNS} FROM boards ORDER BY id");
        Ok(run!(self, sqlx::query_as::<_, Board>(&sql), fetch_all)?)
    }

    /// Keeps `notify_enabled` and `chat_recipient_id` from the first insert.
    async fn upsert_board(&self, board: &Board) -> StoreResult<Board> {
        let sql = format!(
            r#"
            INSERT INTO boards (id, name, notify_enabled, chat_recipient_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, deleted = false, updated_on = now()
            RETURNING {BOARD_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, Board>(&sql)
            .bind(board.id)
            .bind(&board.name)
            .bind(board.notify_enabled)
            .bind(board.chat_recipient_id);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn soft_delete_board(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("UPDATE boards SET deleted = true, updated_on = now() WHERE id = $1")
            .bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "board", id)
    }

    async fn set_board_notify(&self, id: i32, enabled: bool) -> StoreResult<Board> {
        let sql = format!(
            "UPDATE boards SET notify_enabled = $2 WHERE id = $1 RETURNING {BOARD_COLUMNS}"
        );
        let query = sqlx::query_as::<_, Board>(&sql).bind(id).bind(enabled);
        let row = run!(self, query, fetch_optional)?;
        found(row, "board", id)
    }

    async fn list_statuses_by_board(&self, board_id: i32) -> StoreResult<Vec<TicketStatus>> {
        let query = sqlx::query_as::<_, TicketStatus>(
            r#"
            SELECT id, board_id, name, is_default, display_on_board, inactive, closed, deleted, updated_on
            FROM ticket_statuses
            WHERE board_id = $1
            ORDER BY id
            "#,
        )
        .bind(board_id);
        Ok(run!(self, query, fetch_all)?)
    }

    async fn upsert_status(&self, status: &TicketStatus) -> StoreResult<TicketStatus> {
        let query = sqlx::query_as::<_, TicketStatus>(
            r#"
            INSERT INTO ticket_statuses (id, board_id, name, is_default, display_on_board, inactive, closed)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET board_id = EXCLUDED.board_id,
                name = EXCLUDED.name,
                is_default = EXCLUDED.is_default,
                display_on_board = EXCLUDED.display_on_board,
                inactive = EXCLUDED.inactive,
                closed = EXCLUDED.closed,
                deleted = false,
                updated_on = now()
            RETURNING id, board_id, name, is_default, display_on_board, inactive, closed, deleted, updated_on
            "#,
        )
        .bind(status.id)
        .bind(status.board_id)
        .bind(&status.name)
        .bind(status.is_default)
        .bind(status.display_on_board)
        .bind(status.inactive)
        .bind(status.closed);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn soft_delete_status(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query(
            "UPDATE ticket_statuses SET deleted = true, updated_on = now() WHERE id = $1",
        )
        .bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "ticket status", id)
    }

    async fn get_company(&self, id: i32) -> StoreResult<Company> {
        let query =
            sqlx::query_as::<_, Company>("SELECT id, name, updated_on FROM companies WHERE id = $1")
                .bind(id);
        let row = run!(self, query, fetch_optional)?;
        found(row, "company", id)
    }

    async fn upsert_company(&self, company: &Company) -> StoreResult<Company> {
        let query = sqlx::query_as::<_, Company>(
            r#"
            INSERT INTO companies (id, name) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_on = now()
            RETURNING id, name, updated_on
            "#,
        )
        .bind(company.id)
        .bind(&company.name);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn get_contact(&self, id: i32) -> StoreResult<Contact> {
        let query = sqlx::query_as::<_, Contact>(
            "SELECT id, first_name, last_name, company_id, updated_on FROM contacts WHERE id = $1",
        )
        .bind(id);
        let row = run!(self, query, fetch_optional)?;
        found(row, "contact", id)
    }

    async fn upsert_contact(&self, contact: &Contact) -> StoreResult<Contact> {
        let query = sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, first_name, last_name, company_id) VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                company_id = EXCLUDED.company_id,
                updated_on = now()
            RETURNING id, first_name, last_name, company_id, updated_on
            "#,
        )
        .bind(contact.id)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(contact.company_id);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn get_member(&self, id: i32) -> StoreResult<Member> {
        let query = sqlx::query_as::<_, Member>(
            r#"
            SELECT id, identifier, first_name, last_name, primary_email, updated_on
            FROM members WHERE id = $1
            "#,
        )
        .bind(id);
        let row = run!(self, query, fetch_optional)?;
        found(row, "member", id)
    }

    async fn get_member_by_identifier(&self, identifier: &str) -> StoreResult<Member> {
        let query = sqlx::query_as::<_, Member>(
            r#"
            SELECT id, identifier, first_name, last_name, primary_email, updated_on
            FROM members WHERE lower(identifier) = lower($1)
            "#,
        )
        .bind(identifier);
        let row = run!(self, query, fetch_optional)?;
        found(row, "member", identifier)
    }

    async fn list_members(&self) -> StoreResult<Vec<Member>> {
        let query = sqlx::query_as::<_, Member>(
            r#"
            SELECT id, identifier, first_name, last_name, primary_email, updated_on
            FROM members ORDER BY id
            "#,
        );
        Ok(run!(self, query, fetch_all)?)
    }

    /// A unique violation on `identifier` surfaces as `Conflict`.
    async fn upsert_member(&self, member: &Member) -> StoreResult<Member> {
        let query = sqlx::query_as::<_, Member>(
            r#"
            INSERT INTO members (id, identifier, first_name, last_name, primary_email)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET identifier = EXCLUDED.identifier,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                primary_email = EXCLUDED.primary_email,
                updated_on = now()
            RETURNING id, identifier, first_name, last_name, primary_email, updated_on
            "#,
        )
        .bind(member.id)
        .bind(&member.identifier)
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(&member.primary_email);
        run!(self, query, fetch_one).map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "member identifier {} already in use",
                    member.identifier
                ))
            } else {
                e.into()
            }
        })
    }

    async fn get_ticket(&self, id: i32) -> StoreResult<Ticket> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = run!(self, sqlx::query_as::<_, Ticket>(&sql).bind(id), fetch_optional)?;
        found(row, "ticket", id)
    }

    /// Keeps `added_to_store_at` from the first insert.
    async fn upsert_ticket(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let sql = format!(
            r#"
            INSERT INTO tickets (id, board_id, company_id, contact_id, owner_id, summary, resources_csv, updated_by, added_to_store_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET board_id = EXCLUDED.board_id,
                company_id = EXCLUDED.company_id,
                contact_id = EXCLUDED.contact_id,
                owner_id = EXCLUDED.owner_id,
                summary = EXCLUDED.summary,
                resources_csv = EXCLUDED.resources_csv,
                updated_by = EXCLUDED.updated_by,
                deleted = false,
                updated_on = now()
            RETURNING {TICKET_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, Ticket>(&sql)
            .bind(ticket.id)
            .bind(ticket.board_id)
            .bind(ticket.company_id)
            .bind(ticket.contact_id)
            .bind(ticket.owner_id)
            .bind(&ticket.summary)
            .bind(&ticket.resources_csv)
            .bind(&ticket.updated_by)
            .bind(ticket.added_to_store_at);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn soft_delete_ticket(&self, id: i32) -> StoreResult<()> {
        let query =
            sqlx::query("UPDATE tickets SET deleted = true, updated_on = now() WHERE id = $1")
                .bind(id);
        run!(self, query, execute)?;
        Ok(())
    }

    async fn get_note(&self, id: i32) -> StoreResult<TicketNote> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM ticket_notes WHERE id = $1");
        let row = run!(self, sqlx::query_as::<_, TicketNote>(&sql).bind(id), fetch_optional)?;
        found(row, "ticket note", id)
    }

    /// Keeps `notified`, `skipped` and `added_on` from the first insert.
    async fn upsert_note(&self, note: &TicketNote) -> StoreResult<TicketNote> {
        let sql = format!(
            r#"
            INSERT INTO ticket_notes (id, ticket_id, member_id, contact_id, created_by, content, notified, skipped, added_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET ticket_id = EXCLUDED.ticket_id,
                member_id = EXCLUDED.member_id,
                contact_id = EXCLUDED.contact_id,
                created_by = EXCLUDED.created_by,
                content = EXCLUDED.content,
                updated_on = now()
            RETURNING {NOTE_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, TicketNote>(&sql)
            .bind(note.id)
            .bind(note.ticket_id)
            .bind(note.member_id)
            .bind(note.contact_id)
            .bind(&note.created_by)
            .bind(&note.content)
            .bind(note.notified)
            .bind(note.skipped)
            .bind(note.added_on);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn mark_note_notified(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("UPDATE ticket_notes SET notified = true WHERE id = $1").bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "ticket note", id)
    }

    async fn mark_note_skipped(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("UPDATE ticket_notes SET skipped = true WHERE id = $1").bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "ticket note", id)
    }

    async fn get_recipient(&self, id: i32) -> StoreResult<ChatRecipient> {
        let sql = format!("SELECT {RECIPIENT_COLUMNS} FROM chat_recipients WHERE id = $1");
        let row = run!(self, sqlx::query_as::<_, ChatRecipient>(&sql).bind(id), fetch_optional)?;
        found(row, "chat recipient", id)
    }

    async fn list_recipients(&self) -> StoreResult<Vec<ChatRecipient>> {
        let sql = format!("SELECT {RECIPIENT_COLUMNS} FROM chat_recipients ORDER BY id");
        Ok(run!(self, sqlx::query_as::<_, ChatRecipient>(&sql), fetch_all)?)
    }

    async fn list_recipients_by_email(&self, email: &str) -> StoreResult<Vec<ChatRecipient>> {
        let sql = format!(
            r#"
            SELECT {RECIPIENT_COLUMNS} FROM chat_recipients
            WHERE lower(email) = lower($1)
            ORDER BY last_activity DESC
            "#
        );
        Ok(run!(self, sqlx::query_as::<_, ChatRecipient>(&sql).bind(email), fetch_all)?)
    }

    /// Keeps the local `id` from the first insert.
    async fn upsert_recipient(&self, recipient: &ChatRecipient) -> StoreResult<ChatRecipient> {
        let sql = format!(
            r#"
            INSERT INTO chat_recipients (external_id, name, kind, email, last_activity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO UPDATE
            SET name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                email = EXCLUDED.email,
                last_activity = EXCLUDED.last_activity,
                updated_on = now()
            RETURNING {RECIPIENT_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, ChatRecipient>(&sql)
            .bind(&recipient.external_id)
            .bind(&recipient.name)
            .bind(recipient.kind)
            .bind(&recipient.email)
            .bind(recipient.last_activity);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn delete_recipient(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("DELETE FROM chat_recipients WHERE id = $1").bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "chat recipient", id)
    }

    async fn list_rules(&self) -> StoreResult<Vec<NotifierRule>> {
        let query = sqlx::query_as::<_, NotifierRule>(
            "SELECT id, board_id, recipient_id, enabled, created_on FROM notifier_rules ORDER BY id",
        );
        Ok(run!(self, query, fetch_all)?)
    }

    async fn list_rules_by_board(&self, board_id: i32) -> StoreResult<Vec<NotifierRule>> {
        let query = sqlx::query_as::<_, NotifierRule>(
            r#"
            SELECT id, board_id, recipient_id, enabled, created_on
            FROM notifier_rules WHERE board_id = $1 ORDER BY id
            "#,
        )
        .bind(board_id);
        Ok(run!(self, query, fetch_all)?)
    }

    async fn insert_rule(
        &self,
        board_id: i32,
        recipient_id: i32,
        enabled: bool,
    ) -> StoreResult<NotifierRule> {
        let query = sqlx::query_as::<_, NotifierRule>(
            r#"
            INSERT INTO notifier_rules (board_id, recipient_id, enabled)
            VALUES ($1, $2, $3)
            RETURNING id, board_id, recipient_id, enabled, created_on
            "#,
        )
        .bind(board_id)
        .bind(recipient_id)
        .bind(enabled);
        run!(self, query, fetch_one).map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "notifier rule for board {board_id} and recipient {recipient_id} already exists"
                ))
            } else if e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation())
            {
                StoreError::not_found("board or chat recipient", format!("{board_id}/{recipient_id}"))
            } else {
                e.into()
            }
        })
    }

    async fn delete_rule(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("DELETE FROM notifier_rules WHERE id = $1").bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "notifier rule", id)
    }

    async fn list_forwards(&self) -> StoreResult<Vec<UserForward>> {
        let query = sqlx::query_as::<_, UserForward>(
            r#"
            SELECT id, source_id, dest_id, start_date, end_date, enabled, user_keeps_copy, created_on
            FROM user_forwards ORDER BY id
            "#,
        );
        Ok(run!(self, query, fetch_all)?)
    }

    async fn list_forwards_by_source(&self, source_id: i32) -> StoreResult<Vec<UserForward>> {
        let query = sqlx::query_as::<_, UserForward>(
            r#"
            SELECT id, source_id, dest_id, start_date, end_date, enabled, user_keeps_copy, created_on
            FROM user_forwards WHERE source_id = $1 ORDER BY id
            "#,
        )
        .bind(source_id);
        Ok(run!(self, query, fetch_all)?)
    }

    async fn insert_forward(&self, forward: &NewUserForward) -> StoreResult<UserForward> {
        let query = sqlx::query_as::<_, UserForward>(
            r#"
            INSERT INTO user_forwards (source_id, dest_id, start_date, end_date, enabled, user_keeps_copy)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, source_id, dest_id, start_date, end_date, enabled, user_keeps_copy, created_on
            "#,
        )
        .bind(forward.source_id)
        .bind(forward.dest_id)
        .bind(forward.start_date)
        .bind(forward.end_date)
        .bind(forward.enabled)
        .bind(forward.user_keeps_copy);
        run!(self, query, fetch_one).map_err(|e| match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => StoreError::not_found(
                "chat recipient",
                format!("{}/{}", forward.source_id, forward.dest_id),
            ),
            Some(db) if db.is_check_violation() => {
                StoreError::Conflict("a recipient cannot forward to itself".into())
            }
            _ => e.into(),
        })
    }

    async fn delete_forward(&self, id: i32) -> StoreResult<()> {
        let query = sqlx::query("DELETE FROM user_forwards WHERE id = $1").bind(id);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "user forward", id)
    }

    async fn exists_notification_for_note(&self, note_id: i32) -> StoreResult<bool> {
        let query = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ticket_notifications WHERE note_id = $1)",
        )
        .bind(note_id);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn exists_new_ticket_notification(&self, ticket_id: i32) -> StoreResult<bool> {
        let query = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ticket_notifications
                WHERE ticket_id = $1 AND kind = 'new_ticket'
            )
            "#,
        )
        .bind(ticket_id);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> StoreResult<TicketNotification> {
        let sql = format!(
            r#"
            INSERT INTO ticket_notifications (ticket_id, note_id, recipient_id, forwarded_from_id, kind, skipped, trace_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, TicketNotification>(&sql)
            .bind(notification.ticket_id)
            .bind(notification.note_id)
            .bind(notification.recipient_id)
            .bind(notification.forwarded_from_id)
            .bind(notification.kind)
            .bind(notification.skipped)
            .bind(notification.trace_id);
        Ok(run!(self, query, fetch_one)?)
    }

    async fn finish_notification(
        &self,
        id: i64,
        sent: bool,
        error: Option<String>,
    ) -> StoreResult<()> {
        let query = sqlx::query("UPDATE ticket_notifications SET sent = $2, error = $3 WHERE id = $1")
            .bind(id)
            .bind(sent)
            .bind(error);
        let done = run!(self, query, execute)?;
        affected(done.rows_affected(), "ticket notification", id)
    }

    async fn list_notifications_for_ticket(
        &self,
        ticket_id: i32,
    ) -> StoreResult<Vec<TicketNotification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM ticket_notifications WHERE ticket_id = $1 ORDER BY id"
        );
        let query = sqlx::query_as::<_, TicketNotification>(&sql).bind(ticket_id);
        Ok(run!(self, query, fetch_all)?)
    }

    async fn get_app_config(&self) -> StoreResult<Option<AppConfig>> {
        let query = sqlx::query_as::<_, AppConfig>(
            r#"
            SELECT attempt_notify, max_concurrent_syncs, max_message_length, skip_launch_syncs
            FROM app_config WHERE id = 1
            "#,
        );
        Ok(run!(self, query, fetch_optional)?)
    }

    async fn upsert_app_config(&self, config: &AppConfig) -> StoreResult<AppConfig> {
        let query = sqlx::query_as::<_, AppConfig>(
            r#"
            INSERT INTO app_config (id, attempt_notify, max_concurrent_syncs, max_message_length, skip_launch_syncs)
            VALUES (1, $1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET attempt_notify = EXCLUDED.attempt_notify,
                max_concurrent_syncs = EXCLUDED.max_concurrent_syncs,
                max_message_length = EXCLUDED.max_message_length,
                skip_launch_syncs = EXCLUDED.skip_launch_syncs,
                updated_on = now()
            RETURNING attempt_notify, max_concurrent_syncs, max_message_length, skip_launch_syncs
            "#,
        )
        .bind(config.attempt_notify)
        .bind(config.max_concurrent_syncs)
        .bind(config.max_message_length)
        .bind(config.skip_launch_syncs);
        Ok(run!(self, query, fetch_one)?)
    }
}
