use crate::config::SharedConfig;
use crate::functions::pipeline::{ProcessOptions, TicketAction, TicketPipeline};
use crate::functions::reconcile::{board_row, member_row};
use crate::schema::{ChatRecipient, RecipientKind, TicketStatus};
use crate::services::{ChatError, ChatService, PsaBoardStatus, PsaError, PsaQuery, PsaService};
use crate::store::{Store, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const MAX_CONCURRENCY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Psa(#[from] PsaError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub cw_boards: bool,
    pub webex_recipients: bool,
    pub cw_tickets: bool,
    pub board_ids: Vec<i32>,
    pub max_concurrent_syncs: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreloadRequest {
    pub boards: bool,
    pub tickets: bool,
    pub max_concurrent_syncs: Option<i32>,
}

impl From<PreloadRequest> for SyncRequest {
    fn from(req: PreloadRequest) -> Self {
        Self {
            cw_boards: req.boards,
            webex_recipients: false,
            cw_tickets: req.tickets,
            board_ids: Vec::new(),
            max_concurrent_syncs: req.max_concurrent_syncs,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub boards: usize,
    pub statuses: usize,
    pub recipients: usize,
    pub tickets: usize,
    pub errors: Vec<String>,
}

/// Requested fan-out width, falling back to `default` and capped at
/// [`MAX_CONCURRENCY`].
pub fn clamp_concurrency(requested: Option<i32>, default: i32) -> usize {
    let pick = |v: i32| usize::try_from(v).ok().filter(|v| *v > 0);
    requested
        .and_then(pick)
        .or_else(|| pick(default))
        .unwrap_or(DEFAULT_CONCURRENCY)
        .min(MAX_CONCURRENCY)
}

/// Clears the single-flight flag when dropped.
#[derive(Debug)]
pub struct SyncFlight {
    running: Arc<AtomicBool>,
}

impl Drop for SyncFlight {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Bulk sync of boards, chat recipients and open tickets. At most one runs at
/// a time.
#[derive(Clone)]
pub struct SyncEngine {
    psa: Arc<dyn PsaService>,
    chat: Arc<dyn ChatService>,
    store: Arc<dyn Store>,
    pipeline: Arc<TicketPipeline>,
    config: SharedConfig,
    running: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        psa: Arc<dyn PsaService>,
        chat: Arc<dyn ChatService>,
        store: Arc<dyn Store>,
        pipeline: Arc<TicketPipeline>,
        config: SharedConfig,
    ) -> Self {
        Self {
            psa,
            chat,
            store,
            pipeline,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the single-flight slot. A losing caller leaves the flag alone.
    pub fn begin(&self) -> Result<SyncFlight, SyncError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(SyncFlight {
            running: self.running.clone(),
        })
    }

    pub async fn sync(&self, ctx: &CancellationToken, req: SyncRequest) -> Result<SyncReport, SyncError> {
        let flight = self.begin()?;
        self.run(ctx, req, flight).await
    }

    /// Runs a sync under an already claimed flight. Section failures are
    /// collected into the report rather than returned.
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        req: SyncRequest,
        _flight: SyncFlight,
    ) -> Result<SyncReport, SyncError> {
        let limit = clamp_concurrency(
            req.max_concurrent_syncs,
            self.config.snapshot().max_concurrent_syncs,
        );
        tracing::info!(
            boards = req.cw_boards,
            recipients = req.webex_recipients,
            tickets = req.cw_tickets,
            limit,
            "sync started"
        );
        let mut report = SyncReport::default();

        let (boards, recipients) = tokio::join!(
            async {
                if req.cw_boards {
                    Some(self.sync_boards().await)
                } else {
                    None
                }
            },
            async {
                if req.webex_recipients {
                    Some(self.sync_recipients(limit).await)
                } else {
                    None
                }
            }
        );
        match boards {
            Some(Ok((boards, statuses, errors))) => {
                report.boards = boards;
                report.statuses = statuses;
                report.errors.extend(errors);
            }
            Some(Err(e)) => report.errors.push(format!("boards: {e}")),
            None => {}
        }
        match recipients {
            Some(Ok((count, errors))) => {
                report.recipients = count;
                report.errors.extend(errors);
            }
            Some(Err(e)) => report.errors.push(format!("recipients: {e}")),
            None => {}
        }

        if req.cw_tickets && !ctx.is_cancelled() {
            match self.sync_tickets(ctx, &req.board_ids, limit).await {
                Ok((count, errors)) => {
                    report.tickets = count;
                    report.errors.extend(errors);
                }
                Err(e) => report.errors.push(format!("tickets: {e}")),
            }
        }

        for error in &report.errors {
            tracing::warn!(error = %error, "sync item failed");
        }
        tracing::info!(
            boards = report.boards,
            statuses = report.statuses,
            recipients = report.recipients,
            tickets = report.tickets,
            errors = report.errors.len(),
            cancelled = ctx.is_cancelled(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_boards(&self) -> Result<(usize, usize, Vec<String>), SyncError> {
        let remote = self.psa.list_boards().await?;
        let seen: HashSet<i32> = remote.iter().map(|b| b.id).collect();

        let tx = self.store.begin().await?;
        for board in &remote {
            tx.upsert_board(&board_row(board)).await?;
        }
        for local in tx.list_boards().await? {
            if !local.deleted && !seen.contains(&local.id) {
                tx.soft_delete_board(local.id).await?;
                tracing::info!(board_id = local.id, "board removed from psa");
            }
        }
        tx.commit().await?;

        let mut statuses = 0;
        let mut errors = Vec::new();
        for board in &remote {
            match self.sync_statuses(board.id).await {
                Ok(n) => statuses += n,
                Err(e) => errors.push(format!("statuses for board {}: {e}", board.id)),
            }
        }
        Ok((remote.len(), statuses, errors))
    }

    async fn sync_statuses(&self, board_id: i32) -> Result<usize, SyncError> {
        let remote = self.psa.list_board_statuses(board_id).await?;
        let seen: HashSet<i32> = remote.iter().map(|s| s.id).collect();

        let tx = self.store.begin().await?;
        for status in &remote {
            tx.upsert_status(&status_row(board_id, status)).await?;
        }
        for local in tx.list_statuses_by_board(board_id).await? {
            if !local.deleted && !seen.contains(&local.id) {
                tx.soft_delete_status(local.id).await?;
            }
        }
        tx.commit().await?;
        Ok(remote.len())
    }

    /// Group rooms, then one chat lookup per PSA member email. People whose
    /// email no longer belongs to a PSA member are dropped.
    async fn sync_recipients(&self, limit: usize) -> Result<(usize, Vec<String>), SyncError> {
        let mut count = 0;
        for room in self.chat.list_rooms(Some("group")).await? {
            self.store
                .upsert_recipient(&ChatRecipient {
                    id: 0,
                    external_id: room.id,
                    name: room.title,
                    kind: RecipientKind::Room,
                    email: None,
                    last_activity: room.last_activity.unwrap_or_else(Utc::now),
                })
                .await?;
            count += 1;
        }

        let members = self.psa.list_members(&PsaQuery::default()).await?;
        let mut emails = HashSet::new();
        // An identifier can still be held locally by a member PSA renamed
        // later in the list; those rows are written again once the list is.
        let mut collided = Vec::new();
        for member in &members {
            match self.store.upsert_member(&member_row(member)).await {
                Ok(_) => {}
                Err(StoreError::Conflict(_)) => collided.push(member),
                Err(e) => return Err(e.into()),
            }
            let email = member.primary_email.trim().to_ascii_lowercase();
            if !email.is_empty() {
                emails.insert(email);
            }
        }
        for member in collided {
            self.store.upsert_member(&member_row(member)).await?;
        }

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut lookups = JoinSet::new();
        for email in emails.iter().cloned() {
            let chat = self.chat.clone();
            let semaphore = semaphore.clone();
            lookups.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let found = chat.list_people(&email).await;
                (email, found)
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            let (email, found) = match joined {
                Ok(v) => v,
                Err(e) => {
                    errors.push(format!("people lookup task: {e}"));
                    continue;
                }
            };
            let people = match found {
                Ok(p) => p,
                Err(e) => {
                    errors.push(format!("people lookup for {email}: {e}"));
                    continue;
                }
            };
            for person in people {
                self.store
                    .upsert_recipient(&ChatRecipient {
                        id: 0,
                        external_id: person.id,
                        name: person.display_name,
                        kind: RecipientKind::Person,
                        email: Some(email.clone()),
                        last_activity: person.last_activity.unwrap_or_else(Utc::now),
                    })
                    .await?;
                count += 1;
            }
        }

        for recipient in self.store.list_recipients().await? {
            let orphaned = recipient.kind == RecipientKind::Person
                && !recipient
                    .email
                    .as_deref()
                    .is_some_and(|e| emails.contains(&e.to_ascii_lowercase()));
            if orphaned {
                self.store.delete_recipient(recipient.id).await?;
                tracing::info!(recipient_id = recipient.id, "removed chat person no longer in psa");
            }
        }
        Ok((count, errors))
    }

    /// Runs every open ticket through the pipeline in bulk mode, never more
    /// than `limit` at once.
    async fn sync_tickets(
        &self,
        ctx: &CancellationToken,
        board_ids: &[i32],
        limit: usize,
    ) -> Result<(usize, Vec<String>), SyncError> {
        let tickets = self.psa.list_tickets(&PsaQuery::open_tickets(board_ids)).await?;
        tracing::info!(count = tickets.len(), limit, "syncing open tickets");

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();
        for ticket in tickets {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = ctx.cancelled() => break,
            };
            let Ok(permit) = permit else {
                break;
            };
            let pipeline = self.pipeline.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let opts = ProcessOptions {
                    override_notify: true,
                    ..ProcessOptions::default()
                };
                let result = pipeline
                    .process_ticket(&ctx, ticket.id, TicketAction::Updated, opts)
                    .await;
                (ticket.id, result)
            });
        }

        let mut count = 0;
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => count += 1,
                Ok((ticket_id, Err(e))) => errors.push(format!("ticket {ticket_id}: {e}")),
                Err(e) => errors.push(format!("ticket task: {e}")),
            }
        }
        Ok((count, errors))
    }
}

fn status_row(board_id: i32, remote: &PsaBoardStatus) -> TicketStatus {
    TicketStatus {
        id: remote.id,
        board_id,
        name: remote.name.clone(),
        is_default: remote.default_flag,
        display_on_board: remote.display_on_board,
        inactive: remote.inactive,
        closed: remote.closed_status,
        deleted: false,
        updated_on: Utc::now(),
    }
}
