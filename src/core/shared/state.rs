use std::sync::Arc;

use crate::core::bot::channels::NotificationSink;
use crate::core::config::AppConfig;
use crate::tickets::report::ReportRenderer;
use crate::tickets::{ConversationEngine, ReportService, StatusLifecycleManager, TicketStore};

/// Everything a request handler needs, built once at startup and shared behind an `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TicketStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub conversations: ConversationEngine,
    pub lifecycle: Arc<StatusLifecycleManager>,
    pub reports: ReportService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TicketStore>,
        sink: Arc<dyn NotificationSink>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let lifecycle = Arc::new(StatusLifecycleManager::new(
            store.clone(),
            sink.clone(),
            config.telegram.admin_chat_id,
            config.intake.transition_policy,
            config.intake.description_preview_chars,
        ));
        let conversations =
            ConversationEngine::new(config.intake.clone(), store.clone(), lifecycle.clone());
        let reports = ReportService::new(store.clone(), renderer);

        Self {
            config,
            store,
            sink,
            conversations,
            lifecycle,
            reports,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sink", &self.sink.name())
            .field("admin_chat_id", &self.config.telegram.admin_chat_id)
            .field("conversations", &self.conversations)
            .finish()
    }
}
