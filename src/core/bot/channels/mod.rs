pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::shared::error::DeskResult;

/// Chat identifier on the transport side (private chats use the user id).
pub type ChatId = i64;

/// Longest text message the transport accepts, in UTF-16 code units.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Longest photo caption the transport accepts, in UTF-16 code units.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Points at a message that was delivered, so it can be edited later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Buttons attached to the message, one per row.
    Inline(Vec<InlineButton>),
    /// One-time reply keyboard offering fixed answers, one per row.
    Choices(Vec<String>),
    /// Hide a previously shown reply keyboard.
    Remove,
}

impl Keyboard {
    pub fn inline_buttons(&self) -> &[InlineButton] {
        match self {
            Self::Inline(buttons) => buttons,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub text: String,
    /// Transport reference of an image to send, with `text` as its caption.
    pub photo: Option<String>,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_photo(mut self, photo: Option<String>) -> Self {
        self.photo = photo;
        self
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
}

/// Outbound side of a chat channel.
///
/// Every method may fail with [`DeskError::Delivery`](crate::core::shared::error::DeskError);
/// callers treat that as non-fatal once their own state is committed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, recipient: ChatId, message: &OutgoingMessage) -> DeskResult<MessageRef>;

    async fn edit(
        &self,
        target: &MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> DeskResult<()>;

    async fn send_document(&self, recipient: ChatId, document: &Document)
        -> DeskResult<MessageRef>;

    /// Acknowledges an inline button press; `alert` shows a modal instead of a toast.
    async fn answer_action(&self, action_id: &str, text: &str, alert: bool) -> DeskResult<()>;
}
