use super::{Board, Company, Contact, Member, Ticket, TicketNote};
use serde::Serialize;

/// Snapshot of a ticket and everything the notifier reads, assembled after
/// reconciliation commits.
#[derive(Debug, Clone, Serialize)]
pub struct FullTicket {
    pub board: Board,
    pub ticket: Ticket,
    pub company: Company,
    pub contact: Option<Contact>,
    pub owner: Option<Member>,
    pub resources: Vec<Member>,
    pub note: Option<TicketNote>,
    pub note_member: Option<Member>,
    pub note_contact: Option<Contact>,
}
