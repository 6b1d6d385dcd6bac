//! Inbound Telegram updates: wire types, parsing into events, and dispatch.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::bot::channels::telegram::TelegramAdapter;
use crate::core::bot::channels::{ChatId, Document, Keyboard, OutgoingMessage};
use crate::core::shared::error::DeskError;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::truncate_chars;
use crate::tickets::report::DateRange;
use crate::tickets::{ui, AdminAction, ConversationInput, Reply, Submitter};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramDocument {
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

impl From<&TelegramUser> for Submitter {
    fn from(user: &TelegramUser) -> Self {
        Submitter {
            id: user.id,
            handle: user.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    NewRequest,
    MyTickets,
    Cancel,
    Help,
    Report(String),
    Unknown(String),
}

impl Command {
    /// Parses `/name[@bot] args`; `None` when `text` is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('/')?;
        let (head, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let name = head.split('@').next().unwrap_or(head);

        Some(match name {
            "start" => Self::Start,
            "new" => Self::NewRequest,
            "mytickets" => Self::MyTickets,
            "cancel" => Self::Cancel,
            "help" => Self::Help,
            "report" => Self::Report(args.trim().to_string()),
            other => Self::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    StartRequest,
    Admin(AdminAction),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        if data == ui::START_REQUEST_DATA {
            return Some(Self::StartRequest);
        }
        AdminAction::parse(data).map(Self::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Command {
        chat_id: ChatId,
        private: bool,
        from: Submitter,
        command: Command,
    },
    Input {
        chat_id: ChatId,
        private: bool,
        from: Submitter,
        input: ConversationInput,
    },
    Callback {
        id: String,
        chat_id: Option<ChatId>,
        from: Submitter,
        action: Option<CallbackAction>,
    },
}

fn message_input(message: &TelegramMessage) -> ConversationInput {
    if let Some(text) = &message.text {
        return ConversationInput::Text(text.clone());
    }

    // sizes are listed smallest first
    if let Some(largest) = message
        .photo
        .as_ref()
        .and_then(|sizes| sizes.iter().max_by_key(|size| size.width * size.height))
    {
        return ConversationInput::Photo {
            file_id: largest.file_id.clone(),
        };
    }

    // an uncompressed image sent as a file
    if let Some(document) = &message.document {
        let is_image = document
            .mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"));
        if is_image {
            return ConversationInput::Photo {
                file_id: document.file_id.clone(),
            };
        }
    }

    ConversationInput::Unsupported
}

impl InboundEvent {
    pub fn from_update(update: TelegramUpdate) -> Option<Self> {
        if let Some(callback) = update.callback_query {
            let action = callback.data.as_deref().and_then(CallbackAction::parse);
            return Some(Self::Callback {
                id: callback.id,
                chat_id: callback.message.as_ref().map(|m| m.chat.id),
                from: Submitter::from(&callback.from),
                action,
            });
        }

        let message = update.message?;
        let from = message.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        let from = Submitter::from(from);
        let chat_id = message.chat.id;
        let private = message.chat.chat_type == "private";

        if let Some(command) = message.text.as_deref().and_then(Command::parse) {
            return Some(Self::Command {
                chat_id,
                private,
                from,
                command,
            });
        }

        Some(Self::Input {
            chat_id,
            private,
            from,
            input: message_input(&message),
        })
    }
}

async fn send_reply(state: &AppState, chat_id: ChatId, reply: Reply) {
    let mut message = OutgoingMessage::text(reply.text);
    message.keyboard = reply.keyboard;
    if let Err(e) = state.sink.send(chat_id, &message).await {
        error!("Failed to reply in chat {}: {}", chat_id, e);
    }
}

async fn send_text(state: &AppState, chat_id: ChatId, text: impl Into<String>) {
    if let Err(e) = state.sink.send(chat_id, &OutgoingMessage::text(text)).await {
        error!("Failed to send message to chat {}: {}", chat_id, e);
    }
}

async fn answer(state: &AppState, callback_id: &str, text: &str, alert: bool) {
    if let Err(e) = state.sink.answer_action(callback_id, text, alert).await {
        debug!("Failed to answer callback {}: {}", callback_id, e);
    }
}

pub async fn dispatch(state: &AppState, event: InboundEvent) {
    match event {
        InboundEvent::Command {
            chat_id,
            private,
            from,
            command,
        } => handle_command(state, chat_id, private, &from, command).await,
        InboundEvent::Input {
            chat_id,
            private,
            from,
            input,
        } => {
            if !private {
                return;
            }
            if let ConversationInput::Text(text) = &input {
                debug!(
                    "Input from submitter {}: {}",
                    from.id,
                    truncate_chars(text, 50)
                );
            }
            let reply = state.conversations.handle(&from, input).await;
            send_reply(state, chat_id, reply).await;
        }
        InboundEvent::Callback {
            id,
            chat_id,
            from,
            action,
        } => handle_callback(state, &id, chat_id, &from, action).await,
    }
}

async fn handle_command(
    state: &AppState,
    chat_id: ChatId,
    private: bool,
    from: &Submitter,
    command: Command,
) {
    let admin_chat = chat_id == state.config.telegram.admin_chat_id;

    match command {
        Command::Report(args) if admin_chat => run_report(state, chat_id, &args).await,
        Command::Report(_) => {
            send_text(state, chat_id, "⛔ Reports are only available in the admin chat.").await
        }
        _ if !private => {}
        Command::Start | Command::Help => {
            let message =
                OutgoingMessage::text(ui::welcome_text()).with_keyboard(ui::start_request_keyboard());
            if let Err(e) = state.sink.send(chat_id, &message).await {
                error!("Failed to greet chat {}: {}", chat_id, e);
            }
        }
        Command::NewRequest => {
            let reply = state.conversations.start(from).await;
            send_reply(state, chat_id, reply).await;
        }
        Command::Cancel => {
            let text = if state.conversations.cancel(from).await {
                "🗑 Your unfinished request was discarded."
            } else {
                "There is no unfinished request to cancel."
            };
            let message = OutgoingMessage::text(text).with_keyboard(Keyboard::Remove);
            if let Err(e) = state.sink.send(chat_id, &message).await {
                error!("Failed to confirm cancel in chat {}: {}", chat_id, e);
            }
        }
        Command::MyTickets => match state.store.list_by_submitter(from.id) {
            Ok(tickets) => {
                let text = ui::ticket_list(
                    &tickets,
                    state.config.intake.description_preview_chars,
                );
                send_text(state, chat_id, text).await;
            }
            Err(e) => {
                error!("Failed to list tickets of submitter {}: {}", from.id, e);
                send_text(state, chat_id, "⚠️ Could not load your requests right now.").await;
            }
        },
        Command::Unknown(name) => {
            debug!("Unknown command /{} from {}", name, from.id);
            send_text(state, chat_id, "Unknown command. Use /start to begin.").await;
        }
    }
}

async fn handle_callback(
    state: &AppState,
    callback_id: &str,
    chat_id: Option<ChatId>,
    from: &Submitter,
    action: Option<CallbackAction>,
) {
    match action {
        Some(CallbackAction::StartRequest) => {
            answer(state, callback_id, "", false).await;
            let reply = state.conversations.start(from).await;
            send_reply(state, chat_id.unwrap_or(from.chat_id()), reply).await;
        }
        Some(CallbackAction::Admin(action)) => {
            if chat_id != Some(state.config.telegram.admin_chat_id) {
                warn!(
                    "Admin action {:?} from {} outside the admin chat ignored",
                    action, from.id
                );
                answer(state, callback_id, "⛔ Not allowed", true).await;
                return;
            }

            info!("Admin {} requested {:?}", from.id, action);
            match state.lifecycle.apply_transition(action).await {
                Ok(outcome) => {
                    let text = format!(
                        "Request #{} status changed to: {}",
                        outcome.ticket.id, outcome.status_label
                    );
                    answer(state, callback_id, &text, false).await;
                }
                Err(DeskError::NotFound(id)) => {
                    warn!("Admin {} acted on missing ticket #{}", from.id, id);
                    answer(state, callback_id, "⚠️ Ticket not found", true).await;
                }
                Err(e @ DeskError::TransitionNotAllowed { .. }) => {
                    answer(state, callback_id, &format!("⛔ {e}"), true).await;
                }
                Err(e) => {
                    error!(
                        "Transition {:?} by admin {} failed: {}",
                        action, from.id, e
                    );
                    answer(state, callback_id, "⚠️ Could not update the status", true).await;
                }
            }
        }
        None => answer(state, callback_id, "Unknown action", false).await,
    }
}

async fn run_report(state: &AppState, chat_id: ChatId, args: &str) {
    let range = match DateRange::parse_args(args) {
        Ok(range) => range,
        Err(e) => {
            info!("Rejected report request '{}': {}", args, e);
            send_text(
                state,
                chat_id,
                format!("❌ {e}\nUsage: /report [YYYY-MM-DD] [YYYY-MM-DD]"),
            )
            .await;
            return;
        }
    };

    let reports = match state.reports.run(range) {
        Ok(reports) => reports,
        Err(e) => {
            error!("Report for {} failed: {}", range.describe(), e);
            send_text(state, chat_id, "⚠️ Could not build the report right now.").await;
            return;
        }
    };

    for report in reports {
        if report.degraded {
            send_text(
                state,
                chat_id,
                format!(
                    "⚠️ The {} report was rendered in plain-text mode; some characters may be replaced.",
                    report.category
                ),
            )
            .await;
        }
        let document = Document {
            file_name: report.file_name,
            mime_type: report.mime_type,
            bytes: report.bytes,
            caption: Some(format!(
                "{}: {} request(s), {}",
                ui::category_title(report.category),
                report.rows,
                range.describe()
            )),
        };
        if let Err(e) = state.sink.send_document(chat_id, &document).await {
            error!("Failed to deliver {} report: {}", document.file_name, e);
        }
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/telegram", post(handle_webhook))
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> impl IntoResponse {
    let expected = state.config.telegram.webhook_secret.as_deref();
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if expected.is_none() || presented != expected {
        warn!("Telegram webhook call with a missing or bad secret rejected");
        return StatusCode::UNAUTHORIZED;
    }

    debug!("Telegram webhook received: update_id={}", update.update_id);
    if let Some(event) = InboundEvent::from_update(update) {
        dispatch(&state, event).await;
    }

    StatusCode::OK
}

/// Long-polls `getUpdates` until the task is dropped; updates are handled in arrival order.
pub async fn run_polling(state: Arc<AppState>, adapter: Arc<TelegramAdapter>) {
    let timeout = state.config.telegram.poll_timeout_secs;
    let mut offset = 0_i64;

    if let Err(e) = adapter.delete_webhook().await {
        warn!("Could not clear webhook before polling: {}", e);
    }
    info!("Telegram long polling started");

    loop {
        match adapter.get_updates(offset, timeout).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(event) = InboundEvent::from_update(update) {
                        dispatch(&state, event).await;
                    }
                }
            }
            Err(e) => {
                error!("Telegram getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
