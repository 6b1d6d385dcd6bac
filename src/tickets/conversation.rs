//! Guided request intake: one linear draft per submitter.
//!
//! ```text
//! AwaitCategory -> AwaitDepartment -> AwaitFullName -> AwaitDescription
//!     -> AwaitAttachmentChoice -> (AwaitAttachment | finalize)
//! ```

use chrono::Local;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::bot::channels::{ChatId, Keyboard};
use crate::core::config::IntakeConfig;
use crate::core::shared::error::{DeskError, DeskResult};
use crate::core::shared::keyed::KeyedSlots;
use crate::tickets::lifecycle::StatusLifecycleManager;
use crate::tickets::store::TicketStore;
use crate::tickets::{ui, Category, NewTicket, TicketId};

static FULL_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\p{Lu}\p{Ll}+\s+\p{Lu}\p{Ll}+\s+\p{Lu}\p{Ll}+$").unwrap_or_else(|e| {
        panic!("invalid full name pattern: {e}")
    })
});

pub fn is_valid_full_name(input: &str) -> bool {
    FULL_NAME_RE.is_match(input.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitCategory,
    AwaitDepartment,
    AwaitFullName,
    AwaitDescription,
    AwaitAttachmentChoice,
    AwaitAttachment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationInput {
    Text(String),
    Photo { file_id: String },
    Unsupported,
}

/// Who is talking to the bot. Replies go to the private chat, whose id is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub id: i64,
    pub handle: Option<String>,
}

impl Submitter {
    pub fn chat_id(&self) -> ChatId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
    /// Set when this reply concludes a successful submission.
    pub created: Option<TicketId>,
}

impl Reply {
    fn prompt(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
            created: None,
        }
    }

    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            created: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftFields {
    pub category: Option<Category>,
    pub department: Option<String>,
    pub full_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub state: ConversationState,
    pub fields: DraftFields,
    touched_at: Instant,
}

impl Draft {
    fn new() -> Self {
        Self {
            state: ConversationState::AwaitCategory,
            fields: DraftFields::default(),
            touched_at: Instant::now(),
        }
    }

    fn advance(&mut self, state: ConversationState) {
        self.state = state;
        self.touched_at = Instant::now();
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.touched_at.elapsed() > ttl)
    }

    fn into_new_ticket(self, submitter: &Submitter, attachment_ref: Option<String>) -> DeskResult<NewTicket> {
        let missing = |field: &str| DeskError::Validation(format!("draft has no {field}"));
        let fields = self.fields;
        Ok(NewTicket {
            submitter_id: submitter.id,
            submitter_handle: submitter.handle.clone(),
            category: fields.category.ok_or_else(|| missing("category"))?,
            department: fields.department.ok_or_else(|| missing("department"))?,
            full_name: fields.full_name.ok_or_else(|| missing("full name"))?,
            description: fields.description.ok_or_else(|| missing("description"))?,
            attachment_ref,
            created_at: Local::now().naive_local(),
        })
    }
}

enum Step {
    Stay(Reply),
    Next(ConversationState, Reply),
    Finalize(Option<String>),
}

pub struct ConversationEngine {
    config: IntakeConfig,
    store: Arc<dyn TicketStore>,
    lifecycle: Arc<StatusLifecycleManager>,
    drafts: KeyedSlots<i64, Option<Draft>>,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("drafts", &self.drafts)
            .field("draft_ttl_secs", &self.config.draft_ttl_secs)
            .finish()
    }
}

impl ConversationEngine {
    pub fn new(
        config: IntakeConfig,
        store: Arc<dyn TicketStore>,
        lifecycle: Arc<StatusLifecycleManager>,
    ) -> Self {
        Self {
            config,
            store,
            lifecycle,
            drafts: KeyedSlots::new(),
        }
    }

    fn ttl(&self) -> Option<Duration> {
        self.config.draft_ttl_secs.map(Duration::from_secs)
    }

    /// Opens a fresh draft, replacing any live one.
    pub async fn start(&self, submitter: &Submitter) -> Reply {
        let mut slot = self.drafts.lock(&submitter.id).await;
        if slot.replace(Draft::new()).is_some() {
            debug!("Submitter {} restarted their request", submitter.id);
        }
        info!("Submitter {} started a request", submitter.id);
        Reply::prompt(
            "📂 Choose the request category:",
            ui::category_keyboard(&self.config),
        )
    }

    /// Discards the live draft; returns whether there was one.
    pub async fn cancel(&self, submitter: &Submitter) -> bool {
        let mut slot = self.drafts.lock(&submitter.id).await;
        slot.take().is_some()
    }

    pub async fn state_of(&self, submitter_id: i64) -> Option<ConversationState> {
        let slot = self.drafts.lock(&submitter_id).await;
        slot.as_ref()
            .filter(|draft| !draft.is_expired(self.ttl()))
            .map(|draft| draft.state)
    }

    pub async fn has_draft(&self, submitter_id: i64) -> bool {
        self.state_of(submitter_id).await.is_some()
    }

    pub async fn fields_of(&self, submitter_id: i64) -> Option<DraftFields> {
        let slot = self.drafts.lock(&submitter_id).await;
        slot.as_ref().map(|draft| draft.fields.clone())
    }

    /// Feeds one input to the submitter's draft and returns what to answer.
    pub async fn handle(&self, submitter: &Submitter, input: ConversationInput) -> Reply {
        let mut slot = self.drafts.lock(&submitter.id).await;

        let Some(draft) = slot.as_mut() else {
            return Reply::prompt(
                "Press \"Create request\" to file a new request.",
                ui::start_request_keyboard(),
            );
        };

        if draft.is_expired(self.ttl()) {
            info!("Draft of submitter {} expired", submitter.id);
            *slot = None;
            return Reply::prompt(
                "⌛ Your unfinished request expired. Please start again.",
                ui::start_request_keyboard(),
            );
        }

        match self.step(draft, input) {
            Step::Stay(reply) => reply,
            Step::Next(state, reply) => {
                debug!(
                    "Submitter {} moved from {:?} to {:?}",
                    submitter.id, draft.state, state
                );
                draft.advance(state);
                reply
            }
            Step::Finalize(attachment_ref) => {
                // the draft is gone whatever happens next; the slot stays locked
                // until the submission is stored and announced
                let Some(draft) = slot.take() else {
                    return Reply::plain("⚠️ Something went wrong, please start again.");
                };
                self.finalize(submitter, draft, attachment_ref).await
            }
        }
    }

    fn step(&self, draft: &mut Draft, input: ConversationInput) -> Step {
        use ConversationState::*;

        match draft.state {
            AwaitCategory => match self.text_of(&input) {
                Some(text) => match self.config.categories.parse(text) {
                    Some(category) => {
                        draft.fields.category = Some(category);
                        Step::Next(
                            AwaitDepartment,
                            Reply::prompt(
                                "🏢 Choose your department:",
                                ui::department_keyboard(&self.config),
                            ),
                        )
                    }
                    None => self.reprompt_category(),
                },
                None => self.reprompt_category(),
            },
            AwaitDepartment => match self.text_of(&input) {
                Some(text) if self.config.departments.iter().any(|d| d == text) => {
                    draft.fields.department = Some(text.to_string());
                    Step::Next(
                        AwaitFullName,
                        Reply::prompt("👤 Enter your full name:", Keyboard::Remove),
                    )
                }
                _ => Step::Stay(Reply::prompt(
                    "❌ Please pick a department from the list.",
                    ui::department_keyboard(&self.config),
                )),
            },
            AwaitFullName => match self.text_of(&input) {
                Some(text) if is_valid_full_name(text) => {
                    draft.fields.full_name = Some(normalize_whitespace(text));
                    Step::Next(AwaitDescription, Reply::plain("📝 Describe the problem:"))
                }
                _ => Step::Stay(Reply::plain(format!(
                    "❌ Invalid name format. Example: {}",
                    ui::FULL_NAME_EXAMPLE
                ))),
            },
            AwaitDescription => match self.text_of(&input) {
                Some(text) if !text.trim().is_empty() => {
                    draft.fields.description = Some(text.to_string());
                    Step::Next(
                        AwaitAttachmentChoice,
                        Reply::prompt(
                            "📎 Would you like to attach a photo?",
                            ui::attachment_choice_keyboard(&self.config),
                        ),
                    )
                }
                _ => Step::Stay(Reply::plain("📝 Please describe the problem in text.")),
            },
            AwaitAttachmentChoice => match self.text_of(&input) {
                Some(text) if text == self.config.attach_label => Step::Next(
                    AwaitAttachment,
                    Reply::prompt("📷 Send one photo:", Keyboard::Remove),
                ),
                Some(text) if text == self.config.skip_label => Step::Finalize(None),
                _ => Step::Stay(Reply::prompt(
                    "Please choose one of the options below.",
                    ui::attachment_choice_keyboard(&self.config),
                )),
            },
            AwaitAttachment => match input {
                ConversationInput::Photo { file_id } => Step::Finalize(Some(file_id)),
                _ => Step::Stay(Reply::plain("📷 Please send a photo.")),
            },
        }
    }

    fn text_of<'a>(&self, input: &'a ConversationInput) -> Option<&'a str> {
        match input {
            ConversationInput::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    fn reprompt_category(&self) -> Step {
        Step::Stay(Reply::prompt(
            "❌ Please pick a category from the list.",
            ui::category_keyboard(&self.config),
        ))
    }

    async fn finalize(
        &self,
        submitter: &Submitter,
        draft: Draft,
        attachment_ref: Option<String>,
    ) -> Reply {
        let failure = || Reply {
            text: "⚠️ Could not create your request. Please try again later.".to_string(),
            keyboard: Some(Keyboard::Remove),
            created: None,
        };

        let new_ticket = match draft.into_new_ticket(submitter, attachment_ref) {
            Ok(ticket) => ticket,
            Err(e) => {
                error!("Incomplete draft for submitter {}: {}", submitter.id, e);
                return failure();
            }
        };

        let ticket = match self
            .store
            .create(&new_ticket)
            .and_then(|id| self.store.get(id))
        {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(
                    "Failed to create ticket for submitter {}: {}",
                    submitter.id, e
                );
                return failure();
            }
        };

        info!(
            "Ticket #{} created by submitter {} ({})",
            ticket.id, submitter.id, ticket.category
        );

        if let Err(e) = self.lifecycle.publish(&ticket).await {
            warn!("Ticket #{} created without admin card: {}", ticket.id, e);
        }

        Reply {
            text: format!(
                "✅ Thank you! Request #{} was created.\nWe will handle it soon.",
                ticket.id
            ),
            keyboard: Some(Keyboard::Remove),
            created: Some(ticket.id),
        }
    }

    /// Drops finished and expired drafts nobody is typing into.
    pub fn prune_expired(&self) -> usize {
        let ttl = self.ttl();
        self.drafts
            .prune(|draft| draft.as_ref().map_or(true, |d| d.is_expired(ttl)))
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
