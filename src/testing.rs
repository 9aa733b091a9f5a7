//! In-memory PSA and chat fakes plus shared fixtures for unit tests.

use crate::functions::message::TicketLinks;
use crate::schema::{
    Board, ChatRecipient, Company, FullTicket, Member, RecipientKind, Ticket, TicketNote,
};
use crate::services::{
    ChatError, ChatMessage, ChatService, Destination, Person, PsaBoard, PsaBoardStatus,
    PsaCallback, PsaCompany, PsaContact, PsaError, PsaMember, PsaNote, PsaQuery, PsaRef,
    PsaService, PsaTicket, Room, SignatureError, SigningKeySource,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct PsaState {
    tickets: BTreeMap<i32, PsaTicket>,
    failing_tickets: HashSet<i32>,
    notes: BTreeMap<i32, PsaNote>,
    boards: BTreeMap<i32, PsaBoard>,
    statuses: BTreeMap<i32, Vec<PsaBoardStatus>>,
    companies: BTreeMap<i32, PsaCompany>,
    contacts: BTreeMap<i32, PsaContact>,
    members: BTreeMap<i32, PsaMember>,
    callbacks: Vec<PsaCallback>,
}

/// PSA backed by maps. Every call is counted and, with a delay set, held
/// open long enough to observe concurrency.
#[derive(Default)]
pub struct FakePsa {
    state: Mutex<PsaState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

fn not_found(what: &str, id: impl std::fmt::Display) -> PsaError {
    PsaError::NotFound(format!("{what} {id}"))
}

impl FakePsa {
    async fn enter(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn with<R>(&self, f: impl FnOnce(&mut PsaState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn add_board(&self, id: i32, name: &str) {
        self.with(|s| {
            s.boards.insert(
                id,
                PsaBoard {
                    id,
                    name: name.into(),
                    inactive_flag: false,
                },
            )
        });
    }

    pub fn add_status(&self, board_id: i32, id: i32, name: &str) {
        self.with(|s| {
            s.statuses.entry(board_id).or_default().push(PsaBoardStatus {
                id,
                name: name.into(),
                board: Some(PsaRef {
                    id: board_id,
                    ..PsaRef::default()
                }),
                ..PsaBoardStatus::default()
            })
        });
    }

    pub fn remove_board(&self, id: i32) {
        self.with(|s| {
            s.boards.remove(&id);
            s.statuses.remove(&id);
        });
    }

    pub fn clear_statuses(&self, board_id: i32) {
        self.with(|s| s.statuses.remove(&board_id));
    }

    pub fn add_company(&self, id: i32, name: &str) {
        self.with(|s| {
            s.companies.insert(
                id,
                PsaCompany {
                    id,
                    name: name.into(),
                },
            )
        });
    }

    pub fn add_contact(&self, id: i32, first: &str, last: Option<&str>, company: Option<i32>) {
        self.with(|s| {
            s.contacts.insert(
                id,
                PsaContact {
                    id,
                    first_name: first.into(),
                    last_name: last.map(str::to_string),
                    company: company.map(|id| PsaRef {
                        id,
                        ..PsaRef::default()
                    }),
                },
            )
        });
    }

    pub fn add_member(&self, member: PsaMember) {
        self.with(|s| s.members.insert(member.id, member));
    }

    pub fn add_ticket(&self, ticket: PsaTicket) {
        self.with(|s| s.tickets.insert(ticket.id, ticket));
    }

    /// Listed as open but every fetch fails upstream.
    pub fn add_failing_ticket(&self, id: i32) {
        self.with(|s| {
            s.tickets.insert(
                id,
                PsaTicket {
                    id,
                    ..PsaTicket::default()
                },
            );
            s.failing_tickets.insert(id);
        });
    }

    pub fn set_ticket_owner(&self, ticket_id: i32, member_id: i32) {
        self.with(|s| {
            if let Some(ticket) = s.tickets.get_mut(&ticket_id) {
                ticket.owner = Some(psa_ref(member_id));
            }
        });
    }

    pub fn remove_ticket(&self, id: i32) {
        self.with(|s| {
            s.tickets.remove(&id);
            s.notes.remove(&id);
        });
    }

    pub fn set_note(&self, ticket_id: i32, note: PsaNote) {
        self.with(|s| s.notes.insert(ticket_id, note));
    }

    pub fn set_note_text(&self, ticket_id: i32, text: &str) {
        self.with(|s| {
            if let Some(note) = s.notes.get_mut(&ticket_id) {
                note.text = Some(text.into());
            }
        });
    }

    pub fn add_callback(&self, callback: PsaCallback) {
        self.with(|s| s.callbacks.push(callback));
    }

    pub fn callbacks(&self) -> Vec<PsaCallback> {
        self.with(|s| s.callbacks.clone())
    }
}

#[async_trait::async_trait]
impl PsaService for FakePsa {
    async fn get_ticket(&self, id: i32) -> Result<PsaTicket, PsaError> {
        self.enter("get_ticket").await;
        self.with(|s| {
            if s.failing_tickets.contains(&id) {
                return Err(PsaError::Upstream(format!("ticket {id}: 502 Bad Gateway")));
            }
            s.tickets.get(&id).cloned().ok_or_else(|| not_found("ticket", id))
        })
    }

    async fn list_tickets(&self, _query: &PsaQuery) -> Result<Vec<PsaTicket>, PsaError> {
        self.enter("list_tickets").await;
        Ok(self.with(|s| s.tickets.values().cloned().collect()))
    }

    async fn get_most_recent_note(&self, ticket_id: i32) -> Result<PsaNote, PsaError> {
        self.enter("get_most_recent_note").await;
        self.with(|s| {
            s.notes
                .get(&ticket_id)
                .cloned()
                .ok_or_else(|| not_found("notes for ticket", ticket_id))
        })
    }

    async fn get_board(&self, id: i32) -> Result<PsaBoard, PsaError> {
        self.enter("get_board").await;
        self.with(|s| s.boards.get(&id).cloned().ok_or_else(|| not_found("board", id)))
    }

    async fn list_boards(&self) -> Result<Vec<PsaBoard>, PsaError> {
        self.enter("list_boards").await;
        Ok(self.with(|s| s.boards.values().cloned().collect()))
    }

    async fn list_board_statuses(&self, board_id: i32) -> Result<Vec<PsaBoardStatus>, PsaError> {
        self.enter("list_board_statuses").await;
        Ok(self.with(|s| s.statuses.get(&board_id).cloned().unwrap_or_default()))
    }

    async fn get_company(&self, id: i32) -> Result<PsaCompany, PsaError> {
        self.enter("get_company").await;
        self.with(|s| s.companies.get(&id).cloned().ok_or_else(|| not_found("company", id)))
    }

    async fn get_contact(&self, id: i32) -> Result<PsaContact, PsaError> {
        self.enter("get_contact").await;
        self.with(|s| s.contacts.get(&id).cloned().ok_or_else(|| not_found("contact", id)))
    }

    async fn get_member(&self, id: i32) -> Result<PsaMember, PsaError> {
        self.enter("get_member").await;
        self.with(|s| s.members.get(&id).cloned().ok_or_else(|| not_found("member", id)))
    }

    async fn list_members(&self, query: &PsaQuery) -> Result<Vec<PsaMember>, PsaError> {
        self.enter("list_members").await;
        let identifier = query
            .conditions
            .as_deref()
            .and_then(|c| c.strip_prefix("identifier = \""))
            .map(|c| c.trim_end_matches('"').to_string());
        Ok(self.with(|s| {
            s.members
                .values()
                .filter(|m| identifier.as_deref().is_none_or(|i| m.identifier == i))
                .cloned()
                .collect()
        }))
    }

    async fn list_callbacks(&self) -> Result<Vec<PsaCallback>, PsaError> {
        self.enter("list_callbacks").await;
        Ok(self.callbacks())
    }

    async fn post_callback(&self, callback: &PsaCallback) -> Result<PsaCallback, PsaError> {
        self.enter("post_callback").await;
        Ok(self.with(|s| {
            let id = s.callbacks.iter().map(|c| c.id).max().unwrap_or(100) + 1;
            let created = PsaCallback {
                id,
                ..callback.clone()
            };
            s.callbacks.push(created.clone());
            created
        }))
    }

    async fn delete_callback(&self, id: i32) -> Result<(), PsaError> {
        self.enter("delete_callback").await;
        self.with(|s| {
            let before = s.callbacks.len();
            s.callbacks.retain(|c| c.id != id);
            if s.callbacks.len() == before {
                return Err(not_found("callback", id));
            }
            Ok(())
        })
    }
}

/// Records successful posts. `fail_with` makes every post fail until
/// `succeed` is called.
#[derive(Default)]
pub struct FakeChat {
    posts: Mutex<Vec<(Destination, String)>>,
    rooms: Mutex<Vec<Room>>,
    people: Mutex<Vec<Person>>,
    failure: Mutex<Option<fn() -> ChatError>>,
}

impl FakeChat {
    pub fn posts(&self) -> Vec<(Destination, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn fail_with(&self, err: fn() -> ChatError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn add_room(&self, room: Room) {
        self.rooms.lock().unwrap().push(room);
    }

    pub fn add_person(&self, person: Person) {
        self.people.lock().unwrap().push(person);
    }
}

#[async_trait::async_trait]
impl ChatService for FakeChat {
    async fn post_message(&self, to: &Destination, markdown: &str) -> Result<String, ChatError> {
        if let Some(fail) = *self.failure.lock().unwrap() {
            return Err(fail());
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push((to.clone(), markdown.to_string()));
        Ok(format!("msg-{}", posts.len()))
    }

    async fn list_rooms(&self, kind: Option<&str>) -> Result<Vec<Room>, ChatError> {
        Ok(self
            .rooms
            .lock()
            .unwrap()
            .iter()
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .cloned()
            .collect())
    }

    async fn list_people(&self, email: &str) -> Result<Vec<Person>, ChatError> {
        Ok(self
            .people
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.emails.iter().any(|e| e.eq_ignore_ascii_case(email)))
            .cloned()
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<ChatMessage, ChatError> {
        Err(ChatError::NotFound(format!("message {id}")))
    }
}

/// Signing key source that ignores the key URL.
pub struct StaticKey(pub &'static str);

#[async_trait::async_trait]
impl SigningKeySource for StaticKey {
    async fn signing_key(&self, _key_url: &str) -> Result<String, SignatureError> {
        Ok(self.0.to_string())
    }
}

pub fn links() -> TicketLinks {
    TicketLinks {
        view_url: "https://psa.example.com/ticket".into(),
        company_id: "acme".into(),
    }
}

pub fn psa_member(id: i32, identifier: &str, first: &str, last: &str, email: &str) -> PsaMember {
    PsaMember {
        id,
        identifier: identifier.into(),
        first_name: first.into(),
        last_name: last.into(),
        primary_email: email.into(),
    }
}

pub fn member(id: i32, identifier: &str, first: &str, last: &str, email: &str) -> Member {
    Member {
        id,
        identifier: identifier.into(),
        first_name: first.into(),
        last_name: last.into(),
        primary_email: email.into(),
        updated_on: Utc::now(),
    }
}

pub fn room_recipient(external_id: &str, name: &str) -> ChatRecipient {
    ChatRecipient {
        id: 0,
        external_id: external_id.into(),
        name: name.into(),
        kind: RecipientKind::Room,
        email: None,
        last_activity: Utc::now(),
    }
}

pub fn person_recipient(external_id: &str, name: &str, email: &str) -> ChatRecipient {
    ChatRecipient {
        id: 0,
        external_id: external_id.into(),
        name: name.into(),
        kind: RecipientKind::Person,
        email: Some(email.into()),
        last_activity: Utc::now(),
    }
}

fn psa_ref(id: i32) -> PsaRef {
    PsaRef {
        id,
        ..PsaRef::default()
    }
}

/// Board 34 "Help Desk", company 1 "Acme", members ada (7) and bob (8), and
/// ticket 900 "Printer down" whose latest note 9000 ("hello") is by Ada.
pub fn seed_printer_ticket(psa: &FakePsa, resources: &str) {
    psa.add_board(34, "Help Desk");
    psa.add_company(1, "Acme");
    psa.add_member(psa_member(7, "ada", "Ada", "L", "ada@x"));
    psa.add_member(psa_member(8, "bob", "Bob", "M", "bob@x"));
    psa.add_ticket(PsaTicket {
        id: 900,
        summary: "Printer down".into(),
        board: psa_ref(34),
        company: psa_ref(1),
        resources: Some(resources.into()),
        ..PsaTicket::default()
    });
    psa.set_note(
        900,
        PsaNote {
            id: 9000,
            ticket_id: 900,
            text: Some("hello".into()),
            member: Some(psa_ref(7)),
            ..PsaNote::default()
        },
    );
}

/// `count` open tickets on board 34, each with one note.
pub fn seed_open_tickets(psa: &FakePsa, count: i32) {
    psa.add_board(34, "Help Desk");
    psa.add_company(1, "Acme");
    for i in 0..count {
        let id = 1000 + i;
        psa.add_ticket(PsaTicket {
            id,
            summary: format!("Ticket {i}"),
            board: psa_ref(34),
            company: psa_ref(1),
            ..PsaTicket::default()
        });
        psa.set_note(
            id,
            PsaNote {
                id: 20_000 + i,
                ticket_id: id,
                text: Some(format!("note {i}")),
                ..PsaNote::default()
            },
        );
    }
}

/// Ticket 900 as the notifier sees it after reconciliation.
pub fn full_ticket() -> FullTicket {
    let now = Utc::now();
    let mut board = Board::new(34, "Help Desk");
    board.notify_enabled = true;
    FullTicket {
        board,
        ticket: Ticket {
            id: 900,
            board_id: 34,
            company_id: 1,
            contact_id: None,
            owner_id: None,
            summary: "Printer down".into(),
            resources_csv: None,
            updated_by: None,
            added_to_store_at: now,
            deleted: false,
            updated_on: now,
        },
        company: Company {
            id: 1,
            name: "Acme".into(),
            updated_on: now,
        },
        contact: None,
        owner: None,
        resources: Vec::new(),
        note: Some(TicketNote {
            id: 9000,
            ticket_id: 900,
            member_id: Some(7),
            contact_id: None,
            created_by: None,
            content: Some("hello".into()),
            notified: false,
            skipped: false,
            added_on: now,
            updated_on: now,
        }),
        note_member: Some(member(7, "ada", "Ada", "L", "ada@x")),
        note_contact: None,
    }
}
