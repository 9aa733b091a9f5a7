use crate::schema::{ChatRecipient, FullTicket, RecipientKind, full_name};

#[derive(Debug, Clone)]
pub struct TicketLinks {
    pub view_url: String,
    pub company_id: String,
}

impl TicketLinks {
    pub fn ticket_url(&self, ticket_id: i32) -> String {
        format!(
            "{}?service_recid={ticket_id}&companyName={}",
            self.view_url, self.company_id
        )
    }

    pub fn markdown_link(&self, ticket_id: i32) -> String {
        format!("[{ticket_id}]({})", self.ticket_url(ticket_id))
    }
}

pub fn header(full: &FullTicket, is_new: bool, links: &TicketLinks) -> String {
    let label = if is_new {
        "**New Ticket:** "
    } else {
        "**Ticket Updated:** "
    };
    format!(
        "{label}{} {}",
        links.markdown_link(full.ticket.id),
        full.ticket.summary
    )
}

/// `**FWD:** A > B > You`; a room reads its own name instead of "You".
pub fn forward_header(recipient: &ChatRecipient, chain: &[ChatRecipient]) -> String {
    let names: Vec<&str> = chain.iter().map(|r| r.name.as_str()).collect();
    let to = match recipient.kind {
        RecipientKind::Room => recipient.name.as_str(),
        RecipientKind::Person => "You",
    };
    format!("**FWD:** {} > {to}", names.join(" > "))
}

pub fn body(full: &FullTicket, header: &str, max_len: usize) -> String {
    let mut body = header.to_string();

    if !full.company.name.is_empty() {
        body.push_str(&format!("\n**Company:** {}", full.company.name));
    }

    if let Some(contact) = full.contact.as_ref().filter(|c| c.id != 0) {
        body.push_str(&format!("\n**Ticket Contact:** {}", contact.full_name()));
    }

    if full.note.is_some()
        && let Some(sender) = sender_name(full)
    {
        body.push_str(&format!("\n**Latest Note Sent By:** {sender}"));
    }

    if let Some(content) = full.note.as_ref().and_then(|n| n.content.as_deref()) {
        body.push('\n');
        body.push_str(&block_quote(&truncate(content, max_len)));
    }

    body.push_str("\n\n---");
    body
}

/// Member, then the free-form creator, then the contact.
pub fn sender_name(full: &FullTicket) -> Option<String> {
    let note = full.note.as_ref()?;
    if let Some(member) = &full.note_member {
        return Some(member.full_name());
    }
    if let Some(created_by) = note.created_by.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(created_by.to_string());
    }
    full.note_contact
        .as_ref()
        .map(|c| full_name(&c.first_name, c.last_name.as_deref()))
}

/// Cuts at `max` characters and appends "..." when longer.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

pub fn block_quote(text: &str) -> String {
    text.split('\n')
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
