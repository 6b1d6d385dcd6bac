//! HTTP surface: health, the Telegram webhook (webhook mode only) and a small read-only ticket API.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::core::config::TransportMode;
use crate::core::shared::error::{DeskError, DeskResult};
use crate::core::shared::state::AppState;
use crate::tickets::report::DateRange;
use crate::tickets::{Category, ReportRow, Ticket, TicketId};

pub fn configure_api_routes(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/tickets/{id}", get(get_ticket))
        .route("/api/reports/{category}", get(get_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_token));

    let mut router = Router::new().route("/health", get(health)).merge(api);
    if state.config.telegram.mode == TransportMode::Webhook {
        router = router.merge(crate::telegram::configure());
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bearer check against `server.api_token`; the API is open when no token is configured.
async fn require_api_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.server.api_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(expected) {
        warn!("Rejected API call to {} without a valid token", request.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            [("WWW-Authenticate", "Bearer")],
            Json(serde_json::json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TicketId>,
) -> DeskResult<Json<Ticket>> {
    state.store.get(id).map(Json)
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub category: Category,
    pub start: Option<String>,
    pub end: Option<String>,
    pub rows: Vec<ReportRow>,
}

async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(query): Query<ReportQuery>,
) -> DeskResult<Json<ReportResponse>> {
    let category = category.parse::<Category>().map_err(DeskError::Validation)?;
    let range = DateRange::parse(query.start.as_deref(), query.end.as_deref())?;
    let rows = state
        .reports
        .aggregator()
        .generate(category, range.start, range.end)?;

    Ok(Json(ReportResponse {
        category,
        start: query.start,
        end: query.end,
        rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::{harness, harness_with, test_config};
    use crate::tickets::report::CsvReportRenderer;
    use crate::tickets::store::tests::new_ticket;
    use crate::tickets::TicketStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn created(date: &str) -> chrono::NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let app = configure_api_routes(Arc::new(h.state));

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_ticket_and_missing_ticket() {
        let h = harness();
        let id = h
            .store
            .create(&new_ticket(Category::Incident, created("2024-05-01")))
            .unwrap();
        let app = configure_api_routes(Arc::new(h.state));

        let response = app
            .clone()
            .oneshot(get(&format!("/api/tickets/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], id);
        assert_eq!(body["status"], "new");

        let response = app.oneshot(get("/api/tickets/999")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_report_endpoint_filters_and_rejects_inverted_range() {
        let h = harness();
        h.store
            .create(&new_ticket(Category::Incident, created("2024-05-01")))
            .unwrap();
        h.store
            .create(&new_ticket(Category::Incident, created("2024-06-01")))
            .unwrap();
        h.store
            .create(&new_ticket(Category::Procurement, created("2024-05-01")))
            .unwrap();
        let app = configure_api_routes(Arc::new(h.state));

        let response = app
            .clone()
            .oneshot(get("/api/reports/incident?start=2024-05-01&end=2024-05-31"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(get("/api/reports/incident?start=2024-06-01&end=2024-05-01"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/api/reports/hardware")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_token_required_when_configured() {
        let mut config = test_config();
        config.server.api_token = Some("s3cret".to_string());
        let h = harness_with(config, Arc::new(CsvReportRenderer));
        let app = configure_api_routes(Arc::new(h.state));

        let response = app
            .clone()
            .oneshot(get("/api/reports/incident"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let authorized = HttpRequest::builder()
            .uri("/api/reports/incident")
            .header(AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(authorized).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn webhook_post(secret: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/webhook/telegram")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(crate::telegram::SECRET_HEADER, secret);
        }
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": { "id": 42, "is_bot": false, "first_name": "Ivan" },
                "chat": { "id": 42, "type": "private" },
                "date": 0,
                "text": "/start"
            }
        });
        builder.body(Body::from(update.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_polling_mode_does_not_route_webhook() {
        let h = harness();
        let sink = h.sink.clone();
        let app = configure_api_routes(Arc::new(h.state));

        let response = app.oneshot(webhook_post(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_mode_routes_webhook_with_secret() {
        let mut config = test_config();
        config.telegram.mode = TransportMode::Webhook;
        config.telegram.webhook_url = Some("https://desk.example.org/webhook/telegram".into());
        config.telegram.webhook_secret = Some("hook-secret".into());
        let h = harness_with(config, Arc::new(CsvReportRenderer));
        let sink = h.sink.clone();
        let app = configure_api_routes(Arc::new(h.state));

        let response = app.clone().oneshot(webhook_post(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(webhook_post(Some("hook-secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.sent_to(42).len(), 1);
    }
}
