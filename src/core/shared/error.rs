use axum::{response::IntoResponse, Json};
use chrono::NaiveDate;

use crate::tickets::{TicketId, TicketStatus};

#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Ticket #{0} not found")]
    NotFound(TicketId),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Delivery error: {0}")]
    Delivery(String),
    #[error("Invalid range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("Transition not allowed: {from} -> {to}")]
    TransitionNotAllowed {
        from: TicketStatus,
        to: TicketStatus,
    },
    #[error("Render error: {0}")]
    Render(String),
}

pub type DeskResult<T> = Result<T, DeskError>;

impl DeskError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn delivery(err: impl std::fmt::Display) -> Self {
        Self::Delivery(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for DeskError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        Self::Persistence(format!("connection pool: {err}"))
    }
}

/// The request URL carries the bot token, so it is stripped before the error is kept.
impl From<reqwest::Error> for DeskError {
    fn from(err: reqwest::Error) -> Self {
        Self::Delivery(err.without_url().to_string())
    }
}

impl IntoResponse for DeskError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::InvalidRange { .. } => StatusCode::BAD_REQUEST,
            Self::TransitionNotAllowed { .. } => StatusCode::CONFLICT,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
