use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::core::bot::channels::{
    ChatId, Document, Keyboard, MessageRef, NotificationSink, OutgoingMessage,
};
use crate::core::config::{AppConfig, DatabaseConfig};
use crate::core::shared::error::{DeskError, DeskResult};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{create_conn, run_migrations};
use crate::tickets::report::{CsvReportRenderer, ReportRenderer, ReportRow};
use crate::tickets::{
    Category, DieselTicketStore, NewTicket, Ticket, TicketId, TicketStatus, TicketStore,
};

pub const ADMIN_CHAT: ChatId = -1002595180902;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Sent {
        recipient: ChatId,
        message: OutgoingMessage,
        message_ref: MessageRef,
    },
    Edited {
        target: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Document {
        recipient: ChatId,
        document: Document,
    },
    Answered {
        action_id: String,
        text: String,
        alert: bool,
    },
}

/// Records every outbound call; recipients in `unreachable` fail with a delivery error.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    unreachable: Mutex<HashSet<ChatId>>,
    next_message_id: AtomicI64,
    send_delay_ms: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message_id: AtomicI64::new(100),
            ..Default::default()
        })
    }

    /// Makes every `send` take `delay` before it is recorded.
    pub fn slow_down(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn make_unreachable(&self, chat_id: ChatId) {
        self.unreachable.lock().unwrap().insert(chat_id);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<OutgoingMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Sent {
                    recipient, message, ..
                } if recipient == chat_id => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String, Option<Keyboard>)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Edited {
                    target,
                    text,
                    keyboard,
                } => Some((target, text, keyboard)),
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Document { document, .. } => Some(document),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Answered { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    fn check_reachable(&self, chat_id: ChatId) -> DeskResult<()> {
        if self.unreachable.lock().unwrap().contains(&chat_id) {
            return Err(DeskError::Delivery(format!(
                "Forbidden: chat {chat_id} blocked the bot"
            )));
        }
        Ok(())
    }

    fn next_ref(&self, chat_id: ChatId) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "Recording"
    }

    async fn send(&self, recipient: ChatId, message: &OutgoingMessage) -> DeskResult<MessageRef> {
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_reachable(recipient)?;
        let message_ref = self.next_ref(recipient);
        self.events.lock().unwrap().push(SinkEvent::Sent {
            recipient,
            message: message.clone(),
            message_ref,
        });
        Ok(message_ref)
    }

    async fn edit(
        &self,
        target: &MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> DeskResult<()> {
        self.check_reachable(target.chat_id)?;
        self.events.lock().unwrap().push(SinkEvent::Edited {
            target: *target,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        recipient: ChatId,
        document: &Document,
    ) -> DeskResult<MessageRef> {
        self.check_reachable(recipient)?;
        self.events.lock().unwrap().push(SinkEvent::Document {
            recipient,
            document: document.clone(),
        });
        Ok(self.next_ref(recipient))
    }

    async fn answer_action(&self, action_id: &str, text: &str, alert: bool) -> DeskResult<()> {
        self.events.lock().unwrap().push(SinkEvent::Answered {
            action_id: action_id.to_string(),
            text: text.to_string(),
            alert,
        });
        Ok(())
    }
}

/// A real SQLite store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: DieselTicketStore,
    pub fail_create: AtomicBool,
    pub fail_set_status: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: DieselTicketStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_set_status: AtomicBool::new(false),
        })
    }
}

impl TicketStore for FlakyStore {
    fn create(&self, ticket: &NewTicket) -> DeskResult<TicketId> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DeskError::Persistence("disk I/O error".into()));
        }
        self.inner.create(ticket)
    }

    fn get(&self, id: TicketId) -> DeskResult<Ticket> {
        self.inner.get(id)
    }

    fn set_status(&self, id: TicketId, status: TicketStatus) -> DeskResult<()> {
        if self.fail_set_status.load(Ordering::SeqCst) {
            return Err(DeskError::Persistence("database is locked".into()));
        }
        self.inner.set_status(id, status)
    }

    fn set_admin_surface_ref(&self, id: TicketId, surface: &MessageRef) -> DeskResult<()> {
        self.inner.set_admin_surface_ref(id, surface)
    }

    fn list_by_submitter(&self, submitter_id: i64) -> DeskResult<Vec<Ticket>> {
        self.inner.list_by_submitter(submitter_id)
    }

    fn list_by_category_and_date_range(
        &self,
        category: Category,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DeskResult<Vec<Ticket>> {
        self.inner
            .list_by_category_and_date_range(category, start, end)
    }
}

/// Renderer that always fails and counts its calls.
#[derive(Debug, Default)]
pub struct BrokenRenderer {
    pub calls: AtomicI64,
}

impl ReportRenderer for BrokenRenderer {
    fn render(&self, _rows: &[ReportRow], _title: &str) -> DeskResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeskError::Render("font not available".into()))
    }

    fn file_extension(&self) -> &'static str {
        "pdf"
    }

    fn mime_type(&self) -> &'static str {
        "application/pdf"
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.telegram.bot_token = "test-token".to_string();
    config.telegram.admin_chat_id = ADMIN_CHAT;
    config
}

pub fn temp_store() -> (TempDir, DieselTicketStore) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: dir.path().join("tickets.db").to_string_lossy().into_owned(),
        ..DatabaseConfig::default()
    };
    let pool = create_conn(&config).unwrap();
    run_migrations(&pool).unwrap();
    (dir, DieselTicketStore::new(pool))
}

pub struct TestHarness {
    pub state: AppState,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<FlakyStore>,
    _dir: TempDir,
}

pub fn harness_with(config: AppConfig, renderer: Arc<dyn ReportRenderer>) -> TestHarness {
    let (dir, store) = temp_store();
    let store = FlakyStore::new(store);
    let sink = RecordingSink::new();
    let state = AppState::new(config, store.clone(), sink.clone(), renderer);
    TestHarness {
        state,
        sink,
        store,
        _dir: dir,
    }
}

pub fn harness() -> TestHarness {
    harness_with(test_config(), Arc::new(CsvReportRenderer))
}
