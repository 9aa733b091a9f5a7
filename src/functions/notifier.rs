use crate::config::SharedConfig;
use crate::functions::message::{self, TicketLinks};
use crate::functions::pipeline::TicketAction;
use crate::schema::{ChatRecipient, FullTicket, NewNotification, NotificationKind, RecipientKind};
use crate::services::{ChatError, ChatService, Destination};
use crate::store::{Store, StoreError};
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("chat delivery failed: {0}")]
    Fatal(ChatError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: Option<&'static str>,
}

impl NotifyReport {
    fn skipped(reason: &'static str) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    destination: Destination,
    recipient: Option<ChatRecipient>,
    chain: Vec<ChatRecipient>,
}

impl Target {
    fn recipient_id(&self) -> Option<i32> {
        self.recipient.as_ref().map(|r| r.id)
    }
}

fn destination_for(recipient: &ChatRecipient) -> Option<Destination> {
    match recipient.kind {
        RecipientKind::Room => Some(Destination::Room(recipient.external_id.clone())),
        RecipientKind::Person => recipient.email.clone().map(Destination::Person),
    }
}

fn dedupe(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| seen.insert(t.destination.clone()))
        .collect()
}

/// Decides whether a reconciled ticket produces chat messages, and to whom.
pub struct Notifier {
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatService>,
    config: SharedConfig,
    links: TicketLinks,
    excluded_members: Vec<String>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn Store>,
        chat: Arc<dyn ChatService>,
        config: SharedConfig,
        links: TicketLinks,
        excluded_members: Vec<String>,
    ) -> Self {
        Self {
            store,
            chat,
            config,
            links,
            excluded_members,
        }
    }

    pub async fn notify(
        &self,
        full: &FullTicket,
        action: TicketAction,
        trace_id: Option<Uuid>,
    ) -> Result<NotifyReport, NotifyError> {
        let is_new = match action {
            TicketAction::Added => true,
            TicketAction::Updated => false,
            TicketAction::Deleted => return Ok(NotifyReport::skipped("ticket deleted")),
        };
        if !full.board.notify_enabled {
            return Ok(NotifyReport::skipped("board notifications disabled"));
        }
        match &full.note {
            Some(note) if note.notified => {
                return Ok(NotifyReport::skipped("note already notified"));
            }
            Some(note) => {
                if self.store.exists_notification_for_note(note.id).await? {
                    return Ok(NotifyReport::skipped("notification already recorded"));
                }
            }
            None if is_new => {
                if self.store.exists_new_ticket_notification(full.ticket.id).await? {
                    return Ok(NotifyReport::skipped("notification already recorded"));
                }
            }
            None => return Ok(NotifyReport::skipped("no note on ticket")),
        }

        let natural = if is_new {
            self.room_targets(full).await?
        } else {
            self.member_targets(full).await?
        };
        let targets = self.expand_forwards(natural).await?;
        if targets.is_empty() {
            return Ok(NotifyReport::skipped("no recipients"));
        }

        let config = self.config.snapshot();
        let max_len = usize::try_from(config.max_message_length).unwrap_or_default();
        let main_header = message::header(full, is_new, &self.links);

        let mut report = NotifyReport::default();
        for target in &targets {
            let header = match &target.recipient {
                Some(recipient) if !target.chain.is_empty() => format!(
                    "{}\n{main_header}",
                    message::forward_header(recipient, &target.chain)
                ),
                _ => main_header.clone(),
            };
            let body = message::body(full, &header, max_len);
            if self.deliver(full, is_new, target, &body, trace_id).await? {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::info!(
            ticket_id = full.ticket.id,
            note_id = ?full.note.as_ref().map(|n| n.id),
            sent = report.sent,
            failed = report.failed,
            "notifications processed"
        );
        Ok(report)
    }

    /// Records that the current note was deliberately not sent, unless a
    /// notification for it already exists.
    pub async fn record_skipped(
        &self,
        full: &FullTicket,
        action: TicketAction,
        trace_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let Some(note) = &full.note else {
            return Ok(());
        };
        if self.store.exists_notification_for_note(note.id).await? {
            return Ok(());
        }
        let kind = if action == TicketAction::Added {
            NotificationKind::NewTicket
        } else {
            NotificationKind::UpdatedTicket
        };
        self.store
            .insert_notification(&NewNotification {
                ticket_id: full.ticket.id,
                note_id: Some(note.id),
                recipient_id: None,
                forwarded_from_id: None,
                kind,
                skipped: true,
                trace_id,
            })
            .await?;
        tracing::debug!(ticket_id = full.ticket.id, note_id = note.id, "recorded skipped notification");
        Ok(())
    }

    async fn room_targets(&self, full: &FullTicket) -> Result<Vec<Target>, StoreError> {
        let rules = self.store.list_rules_by_board(full.board.id).await?;
        let mut ids: Vec<i32> = rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.recipient_id)
            .collect();
        if ids.is_empty()
            && let Some(default_room) = full.board.chat_recipient_id
        {
            ids.push(default_room);
        }

        let mut targets = Vec::new();
        for id in ids {
            let recipient = match self.store.get_recipient(id).await {
                Ok(r) => r,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(board_id = full.board.id, recipient_id = id, "rule points at missing recipient");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(destination) = destination_for(&recipient) {
                targets.push(Target {
                    destination,
                    recipient: Some(recipient),
                    chain: Vec::new(),
                });
            }
        }
        Ok(dedupe(targets))
    }

    /// Ticket resources minus excluded members and the note's author.
    async fn member_targets(&self, full: &FullTicket) -> Result<Vec<Target>, StoreError> {
        let author = full.note.as_ref().and_then(|n| n.member_id);
        let mut targets = Vec::new();
        for member in &full.resources {
            if Some(member.id) == author {
                continue;
            }
            if self
                .excluded_members
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&member.identifier))
            {
                continue;
            }
            let email = member.primary_email.trim();
            if email.is_empty() {
                tracing::debug!(member = %member.identifier, "member has no email, skipping");
                continue;
            }
            let known = self.store.list_recipients_by_email(email).await?;
            let recipient = known.into_iter().next();
            targets.push(Target {
                destination: Destination::Person(email.to_string()),
                recipient,
                chain: Vec::new(),
            });
        }
        Ok(dedupe(targets))
    }

    /// Applies active user forwards breadth-first. A source stays when one of
    /// its active forwards keeps a copy, or when every forward leads back to
    /// a recipient already expanded. Each recipient is expanded at most once.
    async fn expand_forwards(&self, natural: Vec<Target>) -> Result<Vec<Target>, StoreError> {
        let now = Utc::now();
        let mut targets = natural;
        let mut queue: VecDeque<i32> = targets.iter().filter_map(Target::recipient_id).collect();
        let mut seen = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(source) = targets.iter().find(|t| t.recipient_id() == Some(id)).cloned() else {
                continue;
            };
            let forwards: Vec<_> = self
                .store
                .list_forwards_by_source(id)
                .await?
                .into_iter()
                .filter(|f| f.is_active(now))
                .collect();
            if forwards.is_empty() {
                continue;
            }

            let keep = forwards.iter().any(|f| f.user_keeps_copy);
            let mut handed_off = false;
            for forward in forwards {
                let dest_id = forward.dest_id;
                if targets.iter().any(|t| t.recipient_id() == Some(dest_id)) {
                    handed_off = true;
                    continue;
                }
                if seen.contains(&dest_id) {
                    continue;
                }
                let dest = match self.store.get_recipient(dest_id).await {
                    Ok(r) => r,
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(forward_id = forward.id, dest_id, "forward destination missing");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let Some(destination) = destination_for(&dest) else {
                    continue;
                };
                let mut chain = source.chain.clone();
                chain.extend(source.recipient.clone());
                targets.push(Target {
                    destination,
                    recipient: Some(dest),
                    chain,
                });
                queue.push_back(dest_id);
                handed_off = true;
            }

            if handed_off && !keep {
                targets.retain(|t| t.recipient_id() != Some(id));
            }
        }
        Ok(dedupe(targets))
    }

    /// Records the attempt before posting so a crash mid-send cannot cause a
    /// second message for the same note. Returns whether the post succeeded.
    async fn deliver(
        &self,
        full: &FullTicket,
        is_new: bool,
        target: &Target,
        body: &str,
        trace_id: Option<Uuid>,
    ) -> Result<bool, NotifyError> {
        let kind = if is_new {
            NotificationKind::NewTicket
        } else {
            NotificationKind::UpdatedTicket
        };
        let record = self
            .store
            .insert_notification(&NewNotification {
                ticket_id: full.ticket.id,
                note_id: full.note.as_ref().map(|n| n.id),
                recipient_id: target.recipient_id(),
                forwarded_from_id: target.chain.last().map(|r| r.id),
                kind,
                skipped: false,
                trace_id,
            })
            .await?;

        match self.chat.post_message(&target.destination, body).await {
            Ok(message_id) => {
                self.store.finish_notification(record.id, true, None).await?;
                tracing::debug!(
                    ticket_id = full.ticket.id,
                    to = %target.destination,
                    message_id = %message_id,
                    "notification sent"
                );
                Ok(true)
            }
            Err(e) => {
                self.store
                    .finish_notification(record.id, false, Some(e.to_string()))
                    .await?;
                if e.is_fatal() {
                    return Err(NotifyError::Fatal(e));
                }
                tracing::warn!(
                    ticket_id = full.ticket.id,
                    to = %target.destination,
                    error = %e,
                    "failed to send notification"
                );
                Ok(false)
            }
        }
    }
}
