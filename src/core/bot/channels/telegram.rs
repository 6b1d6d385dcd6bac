use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::bot::channels::{
    ChatId, Document, InlineButton, Keyboard, MessageRef, NotificationSink, OutgoingMessage,
};
use crate::core::config::TelegramConfig;
use crate::core::shared::error::{DeskError, DeskResult};
use crate::telegram::TelegramUpdate;

#[derive(Debug, Serialize)]
struct TelegramSendMessage {
    chat_id: ChatId,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<TelegramReplyMarkup>,
}

#[derive(Debug, Serialize)]
struct TelegramSendPhoto {
    chat_id: ChatId,
    photo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<TelegramReplyMarkup>,
}

#[derive(Debug, Serialize)]
struct TelegramEditMessageText {
    chat_id: ChatId,
    message_id: i64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<TelegramReplyMarkup>,
}

#[derive(Debug, Serialize)]
struct TelegramAnswerCallback {
    callback_query_id: String,
    text: String,
    show_alert: bool,
}

#[derive(Debug, Serialize)]
struct TelegramGetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: Vec<&'static str>,
}

#[derive(Debug, Serialize, PartialEq)]
struct TelegramReplyMarkup {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_keyboard: Option<Vec<Vec<TelegramInlineButton>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keyboard: Option<Vec<Vec<TelegramKeyboardButton>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    one_time_keyboard: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resize_keyboard: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remove_keyboard: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq)]
struct TelegramInlineButton {
    text: String,
    callback_data: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct TelegramKeyboardButton {
    text: String,
}

impl From<&Keyboard> for TelegramReplyMarkup {
    fn from(keyboard: &Keyboard) -> Self {
        let empty = TelegramReplyMarkup {
            inline_keyboard: None,
            keyboard: None,
            one_time_keyboard: None,
            resize_keyboard: None,
            remove_keyboard: None,
        };
        match keyboard {
            Keyboard::Inline(buttons) => TelegramReplyMarkup {
                inline_keyboard: Some(
                    buttons
                        .iter()
                        .map(|InlineButton { label, data }| {
                            vec![TelegramInlineButton {
                                text: label.clone(),
                                callback_data: data.clone(),
                            }]
                        })
                        .collect(),
                ),
                ..empty
            },
            Keyboard::Choices(choices) => TelegramReplyMarkup {
                keyboard: Some(
                    choices
                        .iter()
                        .map(|text| vec![TelegramKeyboardButton { text: text.clone() }])
                        .collect(),
                ),
                one_time_keyboard: Some(true),
                resize_keyboard: Some(true),
                ..empty
            },
            Keyboard::Remove => TelegramReplyMarkup {
                remove_keyboard: Some(true),
                ..empty
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TelegramResponse {
    fn message_ref(&self, chat_id: ChatId) -> DeskResult<MessageRef> {
        let message_id = self
            .result
            .as_ref()
            .and_then(|r| r.get("message_id"))
            .and_then(|id| id.as_i64())
            .ok_or_else(|| DeskError::Delivery("Telegram response carries no message_id".into()))?;
        Ok(MessageRef {
            chat_id,
            message_id,
        })
    }
}

#[derive(Debug)]
pub struct TelegramAdapter {
    bot_token: String,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Self {
        let client = reqwest::Client::builder()
            // long polling holds the request open for `poll_timeout_secs`
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            bot_token: config.bot_token.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    fn check(response: TelegramResponse, method: &str) -> DeskResult<TelegramResponse> {
        if response.ok {
            return Ok(response);
        }
        let error_msg = response
            .description
            .unwrap_or_else(|| "Unknown Telegram API error".to_string());
        error!("Telegram API error on {}: {}", method, error_msg);
        Err(DeskError::Delivery(error_msg))
    }

    async fn send_telegram_request<T: Serialize>(
        &self,
        method: &str,
        payload: &T,
    ) -> DeskResult<TelegramResponse> {
        if self.bot_token.is_empty() {
            return Err(DeskError::Delivery("Telegram bot token not configured".into()));
        }

        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await?
            .json::<TelegramResponse>()
            .await?;

        Self::check(response, method)
    }

    pub async fn get_updates(&self, offset: i64, timeout: u64) -> DeskResult<Vec<TelegramUpdate>> {
        let payload = TelegramGetUpdates {
            offset,
            timeout,
            allowed_updates: vec!["message", "callback_query"],
        };

        let response = self.send_telegram_request("getUpdates", &payload).await?;
        let updates = match response.result {
            Some(result) => serde_json::from_value(result)
                .map_err(|e| DeskError::Delivery(format!("malformed getUpdates result: {e}")))?,
            None => Vec::new(),
        };
        Ok(updates)
    }

    pub async fn set_webhook(&self, webhook_url: &str, secret: Option<&str>) -> DeskResult<()> {
        #[derive(Serialize)]
        struct SetWebhook<'a> {
            url: &'a str,
            allowed_updates: Vec<&'static str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            secret_token: Option<&'a str>,
        }

        let payload = SetWebhook {
            url: webhook_url,
            allowed_updates: vec!["message", "callback_query"],
            secret_token: secret,
        };

        self.send_telegram_request("setWebhook", &payload).await?;
        info!("Telegram webhook set to {}", webhook_url);
        Ok(())
    }

    pub async fn delete_webhook(&self) -> DeskResult<()> {
        #[derive(Serialize)]
        struct DeleteWebhook {
            drop_pending_updates: bool,
        }

        let payload = DeleteWebhook {
            drop_pending_updates: false,
        };

        self.send_telegram_request("deleteWebhook", &payload).await?;
        info!("Telegram webhook deleted");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramAdapter {
    fn name(&self) -> &'static str {
        "Telegram"
    }

    async fn send(&self, recipient: ChatId, message: &OutgoingMessage) -> DeskResult<MessageRef> {
        let reply_markup = message.keyboard.as_ref().map(TelegramReplyMarkup::from);

        let response = match &message.photo {
            Some(photo) => {
                let payload = TelegramSendPhoto {
                    chat_id: recipient,
                    photo: photo.clone(),
                    caption: Some(message.text.clone()),
                    reply_markup,
                };
                self.send_telegram_request("sendPhoto", &payload).await?
            }
            None => {
                let payload = TelegramSendMessage {
                    chat_id: recipient,
                    text: message.text.clone(),
                    reply_markup,
                };
                self.send_telegram_request("sendMessage", &payload).await?
            }
        };

        let message_ref = response.message_ref(recipient)?;
        debug!(
            "Telegram message {} sent to chat {}",
            message_ref.message_id, recipient
        );
        Ok(message_ref)
    }

    async fn edit(
        &self,
        target: &MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> DeskResult<()> {
        let payload = TelegramEditMessageText {
            chat_id: target.chat_id,
            message_id: target.message_id,
            text: text.to_string(),
            reply_markup: keyboard.map(TelegramReplyMarkup::from),
        };

        match self.send_telegram_request("editMessageText", &payload).await {
            Ok(_) => Ok(()),
            // re-applying the current status renders identical text
            Err(DeskError::Delivery(msg)) if msg.contains("message is not modified") => {
                debug!(
                    "Telegram message {} already up to date",
                    target.message_id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send_document(
        &self,
        recipient: ChatId,
        document: &Document,
    ) -> DeskResult<MessageRef> {
        if self.bot_token.is_empty() {
            return Err(DeskError::Delivery("Telegram bot token not configured".into()));
        }

        let part = Part::bytes(document.bytes.clone())
            .file_name(document.file_name.clone())
            .mime_str(&document.mime_type)?;
        let mut form = Form::new()
            .text("chat_id", recipient.to_string())
            .part("document", part);
        if let Some(caption) = &document.caption {
            form = form.text("caption", caption.clone());
        }

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?
            .json::<TelegramResponse>()
            .await?;
        let response = Self::check(response, "sendDocument")?;

        info!(
            "Telegram document {} sent to chat {}",
            document.file_name, recipient
        );
        response.message_ref(recipient)
    }

    async fn answer_action(&self, action_id: &str, text: &str, alert: bool) -> DeskResult<()> {
        let payload = TelegramAnswerCallback {
            callback_query_id: action_id.to_string(),
            text: text.to_string(),
            show_alert: alert,
        };

        self.send_telegram_request("answerCallbackQuery", &payload)
            .await?;
        Ok(())
    }
}
