//! Status transitions and the admin surface.
//!
//! A transition commits the new status first and only then refreshes the admin
//! card and alerts the submitter. Both notifications are best effort: a
//! delivery failure is logged and never undoes the committed status.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::core::bot::channels::{
    ChatId, MessageRef, NotificationSink, OutgoingMessage, MAX_CAPTION_CHARS, MAX_TEXT_CHARS,
};
use crate::core::shared::error::{DeskError, DeskResult};
use crate::core::shared::keyed::KeyedSlots;
use crate::tickets::store::TicketStore;
use crate::tickets::{ui, Ticket, TicketId, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    MarkInProgress(TicketId),
    MarkResolved(TicketId),
}

impl AdminAction {
    pub fn ticket_id(self) -> TicketId {
        match self {
            Self::MarkInProgress(id) | Self::MarkResolved(id) => id,
        }
    }

    pub fn target_status(self) -> TicketStatus {
        match self {
            Self::MarkInProgress(_) => TicketStatus::InProgress,
            Self::MarkResolved(_) => TicketStatus::Resolved,
        }
    }

    /// Callback data carried by the inline button.
    pub fn encode(self) -> String {
        format!("status:{}:{}", self.target_status().as_str(), self.ticket_id())
    }

    /// Parses `status:<status>:<id>` and the older `status_<working|done>_<id>` form.
    pub fn parse(data: &str) -> Option<Self> {
        let (status, id) = if let Some(rest) = data.strip_prefix("status:") {
            rest.split_once(':')?
        } else if let Some(rest) = data.strip_prefix("status_") {
            rest.rsplit_once('_')?
        } else {
            return None;
        };

        let id = id.parse::<TicketId>().ok()?;
        match status {
            "in_progress" | "working" => Some(Self::MarkInProgress(id)),
            "resolved" | "done" => Some(Self::MarkResolved(id)),
            _ => None,
        }
    }
}

/// Which status changes the admin may apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any action from any status, including re-applying the current one.
    #[default]
    Permissive,
    /// No moving back to an earlier status; re-applying the current one is allowed.
    ForwardOnly,
}

impl TransitionPolicy {
    pub fn allows(self, from: TicketStatus, to: TicketStatus) -> bool {
        match self {
            Self::Permissive => true,
            Self::ForwardOnly => !to.is_before(from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub ticket: Ticket,
    pub previous: TicketStatus,
    pub status_label: &'static str,
}

pub struct StatusLifecycleManager {
    store: Arc<dyn TicketStore>,
    sink: Arc<dyn NotificationSink>,
    admin_chat_id: ChatId,
    policy: TransitionPolicy,
    preview_chars: usize,
    locks: KeyedSlots<TicketId, ()>,
}

impl std::fmt::Debug for StatusLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLifecycleManager")
            .field("sink", &self.sink.name())
            .field("admin_chat_id", &self.admin_chat_id)
            .field("policy", &self.policy)
            .finish()
    }
}

impl StatusLifecycleManager {
    pub fn new(
        store: Arc<dyn TicketStore>,
        sink: Arc<dyn NotificationSink>,
        admin_chat_id: ChatId,
        policy: TransitionPolicy,
        preview_chars: usize,
    ) -> Self {
        Self {
            store,
            sink,
            admin_chat_id,
            policy,
            preview_chars,
            locks: KeyedSlots::new(),
        }
    }

    pub fn admin_chat_id(&self) -> ChatId {
        self.admin_chat_id
    }

    fn card(ticket: &Ticket) -> OutgoingMessage {
        let limit = if ticket.has_attachment() {
            MAX_CAPTION_CHARS
        } else {
            MAX_TEXT_CHARS
        };
        OutgoingMessage::text(ui::admin_card(ticket, limit))
            .with_photo(ticket.attachment_ref.clone())
            .with_keyboard(ui::admin_controls(ticket.id))
    }

    /// Posts a new admin card for `ticket` and remembers where it went.
    async fn post_card(&self, ticket: &Ticket) -> DeskResult<MessageRef> {
        let surface = self
            .sink
            .send(self.admin_chat_id, &Self::card(ticket))
            .await?;

        if let Err(e) = self.store.set_admin_surface_ref(ticket.id, &surface) {
            error!(
                "Ticket #{}: admin card {} posted but not recorded: {}",
                ticket.id, surface.message_id, e
            );
        }
        Ok(surface)
    }

    /// Announces a freshly created ticket in the admin chat.
    pub async fn publish(&self, ticket: &Ticket) -> DeskResult<MessageRef> {
        let guard = self.locks.lock(&ticket.id).await;
        let posted = self.post_card(ticket).await;
        self.release(guard);

        let surface = posted.map_err(|e| {
            error!("Failed to post admin card for ticket #{}: {}", ticket.id, e);
            e
        })?;
        info!(
            "Ticket #{} announced as message {} in chat {}",
            ticket.id, surface.message_id, surface.chat_id
        );
        Ok(surface)
    }

    pub async fn apply_transition(&self, action: AdminAction) -> DeskResult<TransitionOutcome> {
        let guard = self.locks.lock(&action.ticket_id()).await;
        let outcome = self.transition(action).await;
        self.release(guard);
        outcome
    }

    /// Unlocks a ticket and forgets slots no other caller is using.
    fn release(&self, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks.prune(|_| true);
    }

    async fn transition(&self, action: AdminAction) -> DeskResult<TransitionOutcome> {
        let ticket_id = action.ticket_id();
        let mut ticket = self.store.get(ticket_id)?;
        let previous = ticket.status;
        let new_status = action.target_status();

        if !self.policy.allows(previous, new_status) {
            warn!(
                "Ticket #{}: transition {} -> {} rejected by policy",
                ticket_id, previous, new_status
            );
            return Err(DeskError::TransitionNotAllowed {
                from: previous,
                to: new_status,
            });
        }

        self.store.set_status(ticket_id, new_status).map_err(|e| {
            error!(
                "Ticket #{}: failed to store status {}: {}",
                ticket_id, new_status, e
            );
            e
        })?;
        ticket.status = new_status;
        info!("Ticket #{}: {} -> {}", ticket_id, previous, new_status);

        self.refresh_admin_surface(&mut ticket).await;
        self.notify_submitter(&ticket).await;

        Ok(TransitionOutcome {
            ticket,
            previous,
            status_label: new_status.label(),
        })
    }

    async fn refresh_admin_surface(&self, ticket: &mut Ticket) {
        match (ticket.has_attachment(), ticket.admin_surface_ref) {
            // a photo caption cannot be re-rendered together with its buttons,
            // so photo tickets get a fresh card on every change
            (true, _) | (false, None) => match self.post_card(ticket).await {
                Ok(surface) => ticket.admin_surface_ref = Some(surface),
                Err(e) => error!(
                    "Ticket #{}: failed to post refreshed admin card: {}",
                    ticket.id, e
                ),
            },
            (false, Some(surface)) => {
                let controls = ui::admin_controls(ticket.id);
                if let Err(e) = self
                    .sink
                    .edit(&surface, &ui::admin_card(ticket, MAX_TEXT_CHARS), Some(&controls))
                    .await
                {
                    error!(
                        "Ticket #{}: failed to edit admin card {}: {}",
                        ticket.id, surface.message_id, e
                    );
                }
            }
        }
    }

    async fn notify_submitter(&self, ticket: &Ticket) {
        let alert = OutgoingMessage::text(ui::submitter_status_alert(ticket, self.preview_chars));
        if let Err(e) = self.sink.send(ticket.submitter_id, &alert).await {
            warn!(
                "Ticket #{}: could not notify submitter {}: {}",
                ticket.id, ticket.submitter_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::{
        harness, harness_with, test_config, TestHarness, ADMIN_CHAT,
    };
    use crate::tickets::report::CsvReportRenderer;
    use crate::tickets::store::tests::new_ticket;
    use crate::tickets::Category;
    use chrono::NaiveDate;
    use std::sync::atomic::Ordering;

    async fn published(h: &TestHarness, photo: Option<&str>) -> Ticket {
        let created_at = NaiveDate::from_ymd_opt(2024, 5, 2)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        let mut draft = new_ticket(Category::Incident, created_at);
        draft.attachment_ref = photo.map(String::from);
        let id = h.store.create(&draft).unwrap();
        let ticket = h.store.get(id).unwrap();
        h.state.lifecycle.publish(&ticket).await.unwrap();
        h.sink.clear();
        h.store.get(id).unwrap()
    }

    #[tokio::test]
    async fn test_publish_records_surface() {
        let h = harness();
        let ticket = published(&h, None).await;
        let surface = ticket.admin_surface_ref.expect("surface recorded");
        assert_eq!(surface.chat_id, ADMIN_CHAT);
    }

    #[tokio::test]
    async fn test_transition_edits_card_and_alerts_submitter() {
        let h = harness();
        let ticket = published(&h, None).await;
        let surface = ticket.admin_surface_ref.unwrap();

        let outcome = h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkInProgress(ticket.id))
            .await
            .unwrap();
        assert_eq!(outcome.previous, TicketStatus::New);
        assert_eq!(outcome.status_label, "🔄 In progress");
        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::InProgress);

        let edits = h.sink.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, surface);
        assert!(edits[0].1.ends_with("🔄 In progress"));
        assert_eq!(edits[0].2, Some(ui::admin_controls(ticket.id)));
        assert!(h.sink.sent_to(ADMIN_CHAT).is_empty());

        let alerts = h.sink.sent_to(42);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].text.contains(&format!("#{}", ticket.id)));
        assert!(alerts[0].text.contains("printer broken"));
    }

    #[tokio::test]
    async fn test_repeated_action_notifies_each_time() {
        let h = harness();
        let ticket = published(&h, None).await;

        for _ in 0..2 {
            h.state
                .lifecycle
                .apply_transition(AdminAction::MarkResolved(ticket.id))
                .await
                .unwrap();
        }

        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::Resolved);
        assert_eq!(h.sink.sent_to(42).len(), 2);
        assert_eq!(h.sink.edits().len(), 2);
    }

    #[tokio::test]
    async fn test_photo_ticket_gets_fresh_card() {
        let h = harness();
        let ticket = published(&h, Some("photo-file-id")).await;
        let first = ticket.admin_surface_ref.unwrap();

        h.state
            .lifecycle
            .apply_transition(AdminAction::MarkInProgress(ticket.id))
            .await
            .unwrap();

        assert!(h.sink.edits().is_empty());
        let cards = h.sink.sent_to(ADMIN_CHAT);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].photo.as_deref(), Some("photo-file-id"));
        assert!(cards[0].text.ends_with("🔄 In progress"));

        let second = h.store.get(ticket.id).unwrap().admin_surface_ref.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_unreachable_submitter_does_not_fail_transition() {
        let h = harness();
        let ticket = published(&h, None).await;
        h.sink.make_unreachable(42);

        let outcome = h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(ticket.id))
            .await;
        assert!(outcome.is_ok());
        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::Resolved);
        assert_eq!(h.sink.edits().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_admin_chat_does_not_fail_transition() {
        let h = harness();
        let ticket = published(&h, None).await;
        h.sink.make_unreachable(ADMIN_CHAT);

        h.state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(ticket.id))
            .await
            .unwrap();
        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::Resolved);
        assert_eq!(h.sink.sent_to(42).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_ticket() {
        let h = harness();
        let result = h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(404))
            .await;
        assert!(matches!(result, Err(DeskError::NotFound(404))));
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_sends_nothing() {
        let h = harness();
        let ticket = published(&h, None).await;
        h.store.fail_set_status.store(true, Ordering::SeqCst);

        let result = h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(ticket.id))
            .await;
        assert!(matches!(result, Err(DeskError::Persistence(_))));
        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::New);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_forward_only_rejects_going_back() {
        let mut config = test_config();
        config.intake.transition_policy = TransitionPolicy::ForwardOnly;
        let h = harness_with(config, Arc::new(CsvReportRenderer));
        let ticket = published(&h, None).await;

        h.state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(ticket.id))
            .await
            .unwrap();
        h.sink.clear();

        let result = h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkInProgress(ticket.id))
            .await;
        assert!(matches!(
            result,
            Err(DeskError::TransitionNotAllowed {
                from: TicketStatus::Resolved,
                to: TicketStatus::InProgress
            })
        ));
        assert_eq!(h.store.get(ticket.id).unwrap().status, TicketStatus::Resolved);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_actions_on_one_ticket() {
        let h = harness();
        let ticket = published(&h, None).await;
        let lifecycle = h.state.lifecycle.clone();

        let (first, second) = tokio::join!(
            lifecycle.apply_transition(AdminAction::MarkInProgress(ticket.id)),
            lifecycle.apply_transition(AdminAction::MarkResolved(ticket.id)),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        let stored = h.store.get(ticket.id).unwrap().status;
        assert!(stored == first.ticket.status || stored == second.ticket.status);
        assert_ne!(first.previous, second.previous);
        assert_eq!(h.sink.sent_to(42).len(), 2);
    }

    #[tokio::test]
    async fn test_lock_slots_are_released() {
        let h = harness();
        let mut last = None;
        for _ in 0..50 {
            last = Some(published(&h, None).await);
        }
        assert!(h.state.lifecycle.locks.is_empty());

        let ticket = last.unwrap();
        h.state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(ticket.id))
            .await
            .unwrap();
        assert!(h
            .state
            .lifecycle
            .apply_transition(AdminAction::MarkResolved(999))
            .await
            .is_err());
        assert!(h.state.lifecycle.locks.is_empty());
    }

    #[tokio::test]
    async fn test_long_photo_ticket_fits_caption() {
        let h = harness();
        let created_at = NaiveDate::from_ymd_opt(2024, 5, 2)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        let mut draft = new_ticket(Category::Incident, created_at);
        draft.description = "paper jam ".repeat(200);
        draft.attachment_ref = Some("photo-file-id".to_string());
        let id = h.store.create(&draft).unwrap();
        let ticket = h.store.get(id).unwrap();

        h.state.lifecycle.publish(&ticket).await.unwrap();

        let cards = h.sink.sent_to(ADMIN_CHAT);
        assert_eq!(cards.len(), 1);
        assert!(cards[0].text.encode_utf16().count() <= MAX_CAPTION_CHARS);
        assert!(cards[0].text.contains("paper jam"));
        assert!(cards[0].text.ends_with(TicketStatus::New.label()));
        assert!(h.store.get(id).unwrap().admin_surface_ref.is_some());
    }

    #[test]
    fn test_parse_current_encoding() {
        assert_eq!(
            AdminAction::parse("status:in_progress:15"),
            Some(AdminAction::MarkInProgress(15))
        );
        assert_eq!(
            AdminAction::parse("status:resolved:3"),
            Some(AdminAction::MarkResolved(3))
        );
    }

    #[test]
    fn test_parse_legacy_encoding() {
        assert_eq!(
            AdminAction::parse("status_working_15"),
            Some(AdminAction::MarkInProgress(15))
        );
        assert_eq!(
            AdminAction::parse("status_done_7"),
            Some(AdminAction::MarkResolved(7))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for data in [
            "",
            "create_request",
            "status:closed:1",
            "status:resolved:abc",
            "status:resolved",
            "status_done_",
            "status:new:4",
        ] {
            assert_eq!(AdminAction::parse(data), None, "{data:?}");
        }
    }

    #[test]
    fn test_encode_parse_agree() {
        for action in [AdminAction::MarkInProgress(9), AdminAction::MarkResolved(10)] {
            assert_eq!(AdminAction::parse(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_policies() {
        use TicketStatus::*;
        assert!(TransitionPolicy::Permissive.allows(Resolved, InProgress));
        assert!(TransitionPolicy::ForwardOnly.allows(New, Resolved));
        assert!(TransitionPolicy::ForwardOnly.allows(Resolved, Resolved));
        assert!(!TransitionPolicy::ForwardOnly.allows(Resolved, InProgress));
    }
}
