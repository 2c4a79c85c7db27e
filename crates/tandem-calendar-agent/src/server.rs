//! Agent B HTTP surface

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_core::envelope::Reply;
use tandem_core::error::ApiError;
use tandem_core::event::{CalendarEvent, EventPatch};
use tandem_core::gatekeeper::{
    CalendarRead, CalendarWrite, Gatekeeper, Scoped, ValidJson, ValidQuery, authenticate,
};
use tandem_core::protocol::{
    AGENT_HEADER, AgentCard, AuthConfig, Capability, CreateEventsRequest, CreateEventsResponse,
    HealthStatus,
};
use tandem_core::rate_limit::{RateLimiter, enforce_rate_limit};
use tandem_core::scope::{CALENDAR_AUDIENCE, CALENDAR_READ, CALENDAR_WRITE};
use tandem_core::server::cors_layer;

use crate::service::CalendarService;

pub const SERVICE_NAME: &str = "calendar-agent";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CalendarService>,
    pub card: Arc<AgentCard>,
}

impl AppState {
    pub fn new(service: Arc<CalendarService>, public_url: &str) -> Self {
        Self {
            service,
            card: Arc::new(agent_card(public_url)),
        }
    }
}

/// Agent B's capability card
pub fn agent_card(public_url: &str) -> AgentCard {
    AgentCard {
        name: SERVICE_NAME.to_string(),
        description: "Creates and manages calendar events on behalf of a delegated caller"
            .to_string(),
        url: public_url.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: vec![
            Capability::new("create_events", "POST", "/api/create-events", Some(CALENDAR_WRITE)),
            Capability::new("list_events", "GET", "/api/events", Some(CALENDAR_READ)),
            Capability::new("get_event", "GET", "/api/events/{eventId}", Some(CALENDAR_READ)),
            Capability::new("update_event", "PUT", "/api/events/{eventId}", Some(CALENDAR_WRITE)),
            Capability::new("delete_event", "DELETE", "/api/events/{eventId}", Some(CALENDAR_WRITE)),
        ],
        authentication: AuthConfig {
            schemes: vec!["bearer".to_string()],
            audience: Some(CALENDAR_AUDIENCE.to_string()),
        },
    }
}

/// Build the router. Calendar routes require a bearer token; health and the
/// agent card are public.
pub fn router(
    state: AppState,
    gate: Gatekeeper,
    limiter: Option<RateLimiter>,
    cors_origins: &[String],
) -> Router {
    let protected = Router::new()
        .route("/api/create-events", post(create_events))
        .route("/api/events", get(list_events))
        .route(
            "/api/events/{event_id}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route_layer(middleware::from_fn_with_state(gate, authenticate));

    let mut app = Router::new()
        .route("/api/health", get(health))
        .route("/.well-known/agent.json", get(card))
        .merge(protected)
        .with_state(state);

    if let Some(limiter) = limiter {
        app = app.layer(middleware::from_fn_with_state(limiter, enforce_rate_limit));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}

async fn health(State(state): State<AppState>) -> Reply<HealthStatus> {
    let mode = if state.service.is_configured() {
        "configured"
    } else {
        "mock"
    };
    Reply::ok(HealthStatus {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstreams: BTreeMap::from([("google_calendar".to_string(), mode.to_string())]),
    })
}

async fn card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn create_events(
    State(state): State<AppState>,
    scoped: Scoped<CalendarWrite>,
    headers: HeaderMap,
    ValidJson(body): ValidJson<CreateEventsRequest>,
) -> Result<Reply<CreateEventsResponse>, ApiError> {
    let caller = headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("direct");
    info!(
        caller,
        subject = %scoped.auth.identity.subject,
        count = body.events.len(),
        "create-events"
    );

    let (status, response) = state.service.create_events(&body.events).await?;
    Ok(Reply::with_status(status, response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    max_results: Option<u32>,
    #[serde(default)]
    time_min: Option<String>,
}

async fn list_events(
    State(state): State<AppState>,
    _scoped: Scoped<CalendarRead>,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<Reply<Vec<CalendarEvent>>, ApiError> {
    let events = state
        .service
        .list_events(query.max_results, query.time_min.as_deref())
        .await?;
    Ok(Reply::ok(events))
}

async fn get_event(
    State(state): State<AppState>,
    _scoped: Scoped<CalendarRead>,
    Path(event_id): Path<String>,
) -> Result<Reply<CalendarEvent>, ApiError> {
    Ok(Reply::ok(state.service.get_event(&event_id).await?))
}

async fn update_event(
    State(state): State<AppState>,
    _scoped: Scoped<CalendarWrite>,
    Path(event_id): Path<String>,
    ValidJson(patch): ValidJson<EventPatch>,
) -> Result<Reply<CalendarEvent>, ApiError> {
    Ok(Reply::ok(state.service.update_event(&event_id, &patch).await?))
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Deleted {
    deleted: bool,
    event_id: String,
}

async fn delete_event(
    State(state): State<AppState>,
    _scoped: Scoped<CalendarWrite>,
    Path(event_id): Path<String>,
) -> Result<Reply<Deleted>, ApiError> {
    state.service.delete_event(&event_id).await?;
    Ok(Reply::ok(Deleted {
        deleted: true,
        event_id,
    }))
}
