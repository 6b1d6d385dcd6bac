//! Text and keyboards shown to submitters and to the admin chat.

use crate::core::bot::channels::{InlineButton, Keyboard};
use crate::core::config::IntakeConfig;
use crate::core::shared::utils::truncate_chars;
use crate::tickets::{AdminAction, Category, Ticket, TicketStatus};

pub const START_REQUEST_DATA: &str = "create_request";
pub const FULL_NAME_EXAMPLE: &str = "Ivanov Ivan Ivanovich";

pub fn welcome_text() -> &'static str {
    "👋 Hi! I collect help-desk requests.\nPress the button below to file one."
}

pub fn start_request_keyboard() -> Keyboard {
    Keyboard::Inline(vec![InlineButton::new(
        "📝 Create request",
        START_REQUEST_DATA,
    )])
}

pub fn category_keyboard(config: &IntakeConfig) -> Keyboard {
    Keyboard::Choices(config.categories.labels())
}

pub fn department_keyboard(config: &IntakeConfig) -> Keyboard {
    Keyboard::Choices(config.departments.clone())
}

pub fn attachment_choice_keyboard(config: &IntakeConfig) -> Keyboard {
    Keyboard::Choices(vec![config.attach_label.clone(), config.skip_label.clone()])
}

/// The two status actions, offered on every admin card whatever the current status.
pub fn admin_controls(ticket_id: i32) -> Keyboard {
    let in_progress = AdminAction::MarkInProgress(ticket_id);
    let resolved = AdminAction::MarkResolved(ticket_id);
    Keyboard::Inline(vec![
        InlineButton::new(TicketStatus::InProgress.label(), in_progress.encode()),
        InlineButton::new(TicketStatus::Resolved.label(), resolved.encode()),
    ])
}

pub fn category_title(category: Category) -> &'static str {
    match category {
        Category::Incident => "Incident",
        Category::Procurement => "Procurement",
    }
}

/// Renders the admin card, cutting the description so the card stays within `max_len`
/// UTF-16 code units, the unit the Bot API measures text in.
pub fn admin_card(ticket: &Ticket, max_len: usize) -> String {
    let card = render_admin_card(ticket, &ticket.description);
    let overflow = card.encode_utf16().count().saturating_sub(max_len);
    if overflow == 0 {
        return card;
    }
    let keep = ticket
        .description
        .chars()
        .count()
        .saturating_sub(overflow + 3);
    render_admin_card(ticket, &truncate_chars(&ticket.description, keep))
}

fn render_admin_card(ticket: &Ticket, description: &str) -> String {
    let submitter = match &ticket.submitter_handle {
        Some(handle) => format!("@{handle}"),
        None => format!("id {}", ticket.submitter_id),
    };
    format!(
        "🚨 Request #{}\n\
         📂 Category: {}\n\
         👤 Name: {}\n\
         🏢 Department: {}\n\
         💬 From: {}\n\
         📝 Description: {}\n\
         🕒 Created: {}\n\
         Status: {}",
        ticket.id,
        category_title(ticket.category),
        ticket.full_name,
        ticket.department,
        submitter,
        description,
        ticket.created_at.format("%d.%m.%Y %H:%M"),
        ticket.status.label(),
    )
}

pub fn submitter_status_alert(ticket: &Ticket, preview_chars: usize) -> String {
    format!(
        "🔔 Your request #{} changed status: {}\n📝 {}",
        ticket.id,
        ticket.status.label(),
        truncate_chars(&ticket.description, preview_chars),
    )
}

pub fn ticket_list(tickets: &[Ticket], preview_chars: usize) -> String {
    if tickets.is_empty() {
        return "You have no requests yet.".to_string();
    }
    let mut text = String::from("📋 Your requests:");
    for ticket in tickets {
        text.push_str(&format!(
            "\n#{} · {} · {} · {}",
            ticket.id,
            ticket.created_at.format("%d.%m.%Y"),
            ticket.status.label(),
            truncate_chars(&ticket.description, preview_chars),
        ));
    }
    text
}
