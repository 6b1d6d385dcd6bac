pub mod conversation;
pub mod lifecycle;
pub mod report;
pub mod store;
pub mod ui;

pub use conversation::{ConversationEngine, ConversationInput, ConversationState, Reply, Submitter};
pub use lifecycle::{AdminAction, StatusLifecycleManager, TransitionOutcome, TransitionPolicy};
pub use report::{ReportAggregator, ReportRow, ReportService};
pub use store::{DieselTicketStore, TicketStore};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::bot::channels::MessageRef;

pub type TicketId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    InProgress,
    Resolved,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    /// Human-readable label used on admin cards and submitter alerts.
    pub fn label(self) -> &'static str {
        match self {
            Self::New => "🆕 New",
            Self::InProgress => "🔄 In progress",
            Self::Resolved => "✅ Resolved",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::InProgress => 1,
            Self::Resolved => 2,
        }
    }

    pub fn is_before(self, other: Self) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_progress" | "working" => Ok(Self::InProgress),
            "resolved" | "done" => Ok(Self::Resolved),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Incident,
    Procurement,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Incident, Category::Procurement];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Procurement => "procurement",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incident" => Ok(Self::Incident),
            "procurement" => Ok(Self::Procurement),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Fields of a ticket about to be persisted; the store assigns id and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub submitter_id: i64,
    pub submitter_handle: Option<String>,
    pub full_name: String,
    pub department: String,
    pub category: Category,
    pub description: String,
    pub attachment_ref: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub id: TicketId,
    pub submitter_id: i64,
    pub submitter_handle: Option<String>,
    pub full_name: String,
    pub department: String,
    pub category: Category,
    pub description: String,
    pub attachment_ref: Option<String>,
    pub status: TicketStatus,
    pub created_at: NaiveDateTime,
    pub admin_surface_ref: Option<MessageRef>,
}

impl Ticket {
    pub fn has_attachment(&self) -> bool {
        self.attachment_ref.is_some()
    }
}
