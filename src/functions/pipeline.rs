use crate::functions::locks::TicketLocks;
use crate::functions::notifier::{Notifier, NotifyError, NotifyReport};
use crate::functions::reconcile::{ReconcileError, Reconciler};
use crate::schema::FullTicket;
use crate::services::{PsaError, PsaNote, PsaService, PsaTicket};
use crate::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketAction {
    Added,
    Updated,
    Deleted,
}

impl std::fmt::Display for TicketAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Bulk mode: record the note as handled without sending anything.
    pub override_notify: bool,
    pub attempt_notify: bool,
    pub trace_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Deleted,
    /// PSA no longer knows the ticket or something it depends on.
    ExternallyDeleted,
    Processed {
        note_id: Option<i32>,
        report: Option<NotifyReport>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("processing cancelled")]
    Cancelled,
    #[error(transparent)]
    Psa(#[from] PsaError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Brings one ticket's projection up to date and hands it to the notifier.
pub struct TicketPipeline {
    psa: Arc<dyn PsaService>,
    store: Arc<dyn Store>,
    reconciler: Reconciler,
    notifier: Arc<Notifier>,
    locks: Arc<TicketLocks>,
}

impl TicketPipeline {
    pub fn new(
        psa: Arc<dyn PsaService>,
        store: Arc<dyn Store>,
        reconciler: Reconciler,
        notifier: Arc<Notifier>,
        locks: Arc<TicketLocks>,
    ) -> Self {
        Self {
            psa,
            store,
            reconciler,
            notifier,
            locks,
        }
    }

    pub async fn process_ticket(
        &self,
        ctx: &CancellationToken,
        ticket_id: i32,
        action: TicketAction,
        opts: ProcessOptions,
    ) -> Result<ProcessOutcome, PipelineError> {
        let started = Instant::now();
        let _guard = self.locks.acquire(ticket_id).await;
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        if action == TicketAction::Deleted {
            self.store.soft_delete_ticket(ticket_id).await?;
            tracing::info!(ticket_id, "ticket deleted in psa");
            return Ok(ProcessOutcome::Deleted);
        }

        let remote = match self.psa.get_ticket(ticket_id).await {
            Ok(t) => t,
            Err(e) if e.is_not_found() => {
                self.store.soft_delete_ticket(ticket_id).await?;
                tracing::info!(ticket_id, %action, "ticket no longer exists in psa, marked deleted");
                return Ok(ProcessOutcome::ExternallyDeleted);
            }
            Err(e) => return Err(e.into()),
        };
        let remote_note = match self.psa.get_most_recent_note(ticket_id).await {
            Ok(n) => Some(n),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let full = match self.reconcile(&remote, remote_note.as_ref()).await {
            Ok(full) => full,
            Err(e) if e.is_externally_deleted() => {
                self.store.soft_delete_ticket(ticket_id).await?;
                tracing::warn!(ticket_id, error = %e, "ticket dependency missing in psa, marked deleted");
                return Ok(ProcessOutcome::ExternallyDeleted);
            }
            Err(e) => return Err(e.into()),
        };

        let report = if opts.override_notify || !opts.attempt_notify {
            self.mark_skipped(&full, action, opts.trace_id).await?;
            None
        } else {
            Some(self.notifier.notify(&full, action, opts.trace_id).await?)
        };

        if let Some(note) = &full.note
            && !note.notified
        {
            self.store.mark_note_notified(note.id).await?;
        }

        tracing::debug!(
            ticket_id,
            %action,
            elapsed = started.elapsed().as_secs_f64(),
            "ticket processed"
        );
        Ok(ProcessOutcome::Processed {
            note_id: full.note.as_ref().map(|n| n.id),
            report,
        })
    }

    async fn mark_skipped(
        &self,
        full: &FullTicket,
        action: TicketAction,
        trace_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let Some(note) = &full.note else {
            return Ok(());
        };
        if note.notified {
            return Ok(());
        }
        self.store.mark_note_skipped(note.id).await?;
        self.notifier.record_skipped(full, action, trace_id).await
    }

    /// Writes the ticket and everything it references in one transaction.
    async fn reconcile(
        &self,
        remote: &PsaTicket,
        remote_note: Option<&PsaNote>,
    ) -> Result<FullTicket, ReconcileError> {
        let tx = self.store.begin().await?;
        let store = tx.as_ref();
        let rec = &self.reconciler;

        let board = rec.ensure_board(store, remote.board.id).await?;
        let company = rec.ensure_company(store, remote.company.id).await?;
        let contact = match remote.contact.as_ref().map(|c| c.id).filter(|id| *id != 0) {
            Some(id) => rec.optional(rec.ensure_contact(store, id).await)?,
            None => None,
        };
        let owner = match remote.owner.as_ref().map(|o| o.id).filter(|id| *id != 0) {
            Some(id) => rec.optional(rec.ensure_member(store, id).await)?,
            None => None,
        };
        let ticket = rec
            .ensure_ticket(
                store,
                remote,
                contact.as_ref().map(|c| c.id),
                owner.as_ref().map(|m| m.id),
            )
            .await?;

        // Each resource gets its own savepoint so one failure leaves the
        // transaction usable for the rest.
        let mut resources = Vec::new();
        for identifier in ticket.resource_identifiers() {
            let savepoint = store.begin().await?;
            match rec
                .ensure_member_by_identifier(savepoint.as_ref(), &identifier)
                .await
            {
                Ok(member) => {
                    savepoint.commit().await?;
                    resources.push(member);
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(ticket_id = ticket.id, member = %identifier, error = %e, "could not resolve ticket resource")
                }
            }
        }

        let resolved = match remote_note {
            Some(note) => Some(rec.ensure_ticket_note(store, ticket.id, note).await?),
            None => None,
        };
        tx.commit().await?;

        let (note, note_member, note_contact) = match resolved {
            Some(r) => (Some(r.note), r.member, r.contact),
            None => (None, None, None),
        };
        Ok(FullTicket {
            board,
            ticket,
            company,
            contact,
            owner,
            resources,
            note,
            note_member,
            note_contact,
        })
    }
}
