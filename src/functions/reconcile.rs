use crate::schema::{Board, Company, Contact, Member, Ticket, TicketNote};
use crate::services::{
    PsaBoard, PsaCompany, PsaContact, PsaError, PsaMember, PsaNote, PsaQuery, PsaService,
    PsaTicket,
};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{entity} {id} no longer exists in psa")]
    ExternallyDeleted { entity: &'static str, id: String },
    #[error(transparent)]
    Psa(PsaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_externally_deleted(&self) -> bool {
        matches!(self, Self::ExternallyDeleted { .. })
    }
}

fn from_psa(err: PsaError, entity: &'static str, id: impl ToString) -> ReconcileError {
    match err {
        PsaError::NotFound(_) => ReconcileError::ExternallyDeleted {
            entity,
            id: id.to_string(),
        },
        other => ReconcileError::Psa(other),
    }
}

/// A note together with the author records it references.
#[derive(Debug, Clone)]
pub struct ResolvedNote {
    pub note: TicketNote,
    pub member: Option<Member>,
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Copy)]
enum Refresh {
    Board(i32),
    Company(i32),
    Contact(i32),
    Member(i32),
}

/// Ensures PSA entities exist in the local store before they are referenced.
///
/// Every `ensure_*` takes the store to write through, normally a
/// transaction. Rows older than the TTL are returned as-is and refreshed in
/// the background against the non-transactional store.
#[derive(Clone)]
pub struct Reconciler {
    psa: Arc<dyn PsaService>,
    store: Arc<dyn Store>,
    ttl: Option<chrono::Duration>,
}

impl Reconciler {
    pub fn new(
        psa: Arc<dyn PsaService>,
        store: Arc<dyn Store>,
        ttl: Option<chrono::Duration>,
    ) -> Self {
        Self { psa, store, ttl }
    }

    fn is_stale(&self, updated_on: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| Utc::now() > updated_on + ttl)
    }

    fn refresh_if_stale(&self, target: Refresh, updated_on: DateTime<Utc>) {
        if !self.is_stale(updated_on) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let store = this.store.clone();
            let result = match target {
                Refresh::Board(id) => this.fetch_board(store.as_ref(), id).await.map(|_| ()),
                Refresh::Company(id) => this.fetch_company(store.as_ref(), id).await.map(|_| ()),
                Refresh::Contact(id) => this.fetch_contact(store.as_ref(), id).await.map(|_| ()),
                Refresh::Member(id) => this.fetch_member(store.as_ref(), id).await.map(|_| ()),
            };
            match result {
                Ok(()) => tracing::debug!(?target, "refreshed stale row"),
                Err(e) if e.is_externally_deleted() => {
                    tracing::info!(?target, "stale row no longer exists in psa")
                }
                Err(e) => tracing::warn!(?target, error = %e, "background refresh failed"),
            }
        });
    }

    /// A locally soft-deleted board is refetched, which clears the flag.
    pub async fn ensure_board(&self, store: &dyn Store, id: i32) -> Result<Board, ReconcileError> {
        match store.get_board(id).await {
            Ok(board) if !board.deleted => {
                self.refresh_if_stale(Refresh::Board(id), board.updated_on);
                Ok(board)
            }
            Ok(_) => self.fetch_board(store, id).await,
            Err(e) if e.is_not_found() => self.fetch_board(store, id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_board(&self, store: &dyn Store, id: i32) -> Result<Board, ReconcileError> {
        let remote = self
            .psa
            .get_board(id)
            .await
            .map_err(|e| from_psa(e, "board", id))?;
        Ok(store.upsert_board(&board_row(&remote)).await?)
    }

    pub async fn ensure_company(
        &self,
        store: &dyn Store,
        id: i32,
    ) -> Result<Company, ReconcileError> {
        match store.get_company(id).await {
            Ok(company) => {
                self.refresh_if_stale(Refresh::Company(id), company.updated_on);
                Ok(company)
            }
            Err(e) if e.is_not_found() => self.fetch_company(store, id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_company(&self, store: &dyn Store, id: i32) -> Result<Company, ReconcileError> {
        let remote = self
            .psa
            .get_company(id)
            .await
            .map_err(|e| from_psa(e, "company", id))?;
        Ok(store.upsert_company(&company_row(&remote)).await?)
    }

    pub async fn ensure_contact(
        &self,
        store: &dyn Store,
        id: i32,
    ) -> Result<Contact, ReconcileError> {
        match store.get_contact(id).await {
            Ok(contact) => {
                self.refresh_if_stale(Refresh::Contact(id), contact.updated_on);
                Ok(contact)
            }
            Err(e) if e.is_not_found() => self.fetch_contact(store, id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_contact(&self, store: &dyn Store, id: i32) -> Result<Contact, ReconcileError> {
        let remote = self
            .psa
            .get_contact(id)
            .await
            .map_err(|e| from_psa(e, "contact", id))?;
        let mut company_id = remote.company.as_ref().map(|c| c.id).filter(|id| *id != 0);
        if let Some(cid) = company_id {
            match self.ensure_company(store, cid).await {
                Ok(_) => {}
                Err(e) if e.is_externally_deleted() => {
                    tracing::warn!(contact_id = id, company_id = cid, "contact company missing in psa");
                    company_id = None;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(store.upsert_contact(&contact_row(&remote, company_id)).await?)
    }

    pub async fn ensure_member(&self, store: &dyn Store, id: i32) -> Result<Member, ReconcileError> {
        match store.get_member(id).await {
            Ok(member) => {
                self.refresh_if_stale(Refresh::Member(id), member.updated_on);
                Ok(member)
            }
            Err(e) if e.is_not_found() => self.fetch_member(store, id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_member(&self, store: &dyn Store, id: i32) -> Result<Member, ReconcileError> {
        let remote = self
            .psa
            .get_member(id)
            .await
            .map_err(|e| from_psa(e, "member", id))?;
        self.release_identifier(store, &remote).await?;
        Ok(store.upsert_member(&member_row(&remote)).await?)
    }

    /// PSA hands identifiers of renamed members to new ones. A local row
    /// still holding `remote`'s identifier under another id is refreshed
    /// first so the upsert does not collide with it.
    async fn release_identifier(
        &self,
        store: &dyn Store,
        remote: &PsaMember,
    ) -> Result<(), ReconcileError> {
        let holder = match store.get_member_by_identifier(&remote.identifier).await {
            Ok(holder) if holder.id != remote.id => holder,
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let current = self
            .psa
            .get_member(holder.id)
            .await
            .map_err(|e| from_psa(e, "member", holder.id))?;
        tracing::info!(
            member_id = holder.id,
            identifier = %remote.identifier,
            now = %current.identifier,
            "member identifier reused in psa, refreshing previous holder"
        );
        store.upsert_member(&member_row(&current)).await?;
        Ok(())
    }

    pub async fn ensure_member_by_identifier(
        &self,
        store: &dyn Store,
        identifier: &str,
    ) -> Result<Member, ReconcileError> {
        match store.get_member_by_identifier(identifier).await {
            Ok(member) => {
                self.refresh_if_stale(Refresh::Member(member.id), member.updated_on);
                return Ok(member);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let found = self
            .psa
            .list_members(&PsaQuery::member_identifier(identifier))
            .await
            .map_err(|e| from_psa(e, "member", identifier))?;
        let Some(remote) = found.into_iter().next() else {
            return Err(ReconcileError::ExternallyDeleted {
                entity: "member",
                id: identifier.to_string(),
            });
        };
        self.ensure_member(store, remote.id).await
    }

    /// Writes the projected ticket row. Referenced rows must already exist.
    pub async fn ensure_ticket(
        &self,
        store: &dyn Store,
        remote: &PsaTicket,
        contact_id: Option<i32>,
        owner_id: Option<i32>,
    ) -> Result<Ticket, ReconcileError> {
        let now = Utc::now();
        let row = Ticket {
            id: remote.id,
            board_id: remote.board.id,
            company_id: remote.company.id,
            contact_id,
            owner_id,
            summary: remote.summary.clone(),
            resources_csv: remote.resources.clone(),
            updated_by: remote.info.updated_by.clone(),
            added_to_store_at: now,
            deleted: false,
            updated_on: now,
        };
        Ok(store.upsert_ticket(&row).await?)
    }

    /// Ensures the note's author records, then writes the note.
    pub async fn ensure_ticket_note(
        &self,
        store: &dyn Store,
        ticket_id: i32,
        remote: &PsaNote,
    ) -> Result<ResolvedNote, ReconcileError> {
        let member = match remote.member.as_ref().map(|m| m.id).filter(|id| *id != 0) {
            Some(id) => self.optional(self.ensure_member(store, id).await)?,
            None => None,
        };
        let contact = match remote.contact.as_ref().map(|c| c.id).filter(|id| *id != 0) {
            Some(id) => self.optional(self.ensure_contact(store, id).await)?,
            None => None,
        };
        let now = Utc::now();
        let row = TicketNote {
            id: remote.id,
            ticket_id,
            member_id: member.as_ref().map(|m| m.id),
            contact_id: contact.as_ref().map(|c| c.id),
            created_by: remote.created_by.clone().filter(|s| !s.is_empty()),
            content: remote.text.clone(),
            notified: false,
            skipped: false,
            added_on: now,
            updated_on: now,
        };
        let note = store.upsert_note(&row).await?;
        Ok(ResolvedNote {
            note,
            member,
            contact,
        })
    }

    /// Turns `ExternallyDeleted` into `None`.
    pub fn optional<T>(&self, result: Result<T, ReconcileError>) -> Result<Option<T>, ReconcileError> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(ReconcileError::ExternallyDeleted { entity, id }) => {
                tracing::warn!(entity, id = %id, "referenced record missing in psa, leaving unset");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

pub fn board_row(remote: &PsaBoard) -> Board {
    Board::new(remote.id, remote.name.clone())
}

fn company_row(remote: &PsaCompany) -> Company {
    Company {
        id: remote.id,
        name: remote.name.clone(),
        updated_on: Utc::now(),
    }
}

fn contact_row(remote: &PsaContact, company_id: Option<i32>) -> Contact {
    Contact {
        id: remote.id,
        first_name: remote.first_name.clone(),
        last_name: remote.last_name.clone(),
        company_id,
        updated_on: Utc::now(),
    }
}

pub fn member_row(remote: &PsaMember) -> Member {
    Member {
        id: remote.id,
        identifier: remote.identifier.clone(),
        first_name: remote.first_name.clone(),
        last_name: remote.last_name.clone(),
        primary_email: remote.primary_email.clone(),
        updated_on: Utc::now(),
    }
}
