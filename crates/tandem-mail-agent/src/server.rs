//! Agent A HTTP surface

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_core::envelope::Reply;
use tandem_core::error::ApiError;
use tandem_core::gatekeeper::{Authenticated, Gatekeeper, ValidJson, ValidQuery, authenticate};
use tandem_core::protocol::{AgentCard, AuthConfig, Capability, HealthStatus};
use tandem_core::rate_limit::{RateLimiter, enforce_rate_limit};
use tandem_core::server::cors_layer;
use tandem_core::token::SESSION_AUDIENCE;

use crate::protocol::{
    EmailListResponse, EmailSummaryResponse, ExtractTasksRequest, ExtractTasksResponse,
    ProcessEmailsRequest, ProcessEmailsResponse,
};
use crate::service::MailAgent;

pub const SERVICE_NAME: &str = "mail-agent";

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<MailAgent>,
    pub card: Arc<AgentCard>,
}

impl AppState {
    pub fn new(agent: Arc<MailAgent>, public_url: &str) -> Self {
        Self {
            agent,
            card: Arc::new(agent_card(public_url)),
        }
    }
}

/// Agent A's capability card. Its routes take the user's session token, not a
/// scoped credential.
pub fn agent_card(public_url: &str) -> AgentCard {
    AgentCard {
        name: SERVICE_NAME.to_string(),
        description: "Summarizes email, extracts action items and schedules them through the calendar agent"
            .to_string(),
        url: public_url.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: vec![
            Capability::new("process_emails", "POST", "/api/process-emails", None),
            Capability::new("extract_tasks", "POST", "/api/extract-tasks", None),
            Capability::new("email_summary", "GET", "/api/email/{emailId}/summary", None),
            Capability::new("list_emails", "GET", "/api/emails", None),
        ],
        authentication: AuthConfig {
            schemes: vec!["bearer".to_string()],
            audience: Some(SESSION_AUDIENCE.to_string()),
        },
    }
}

/// Build the router. Mail routes require a session bearer token; health and
/// the agent card are public.
pub fn router(
    state: AppState,
    gate: Gatekeeper,
    limiter: Option<RateLimiter>,
    cors_origins: &[String],
) -> Router {
    let protected = Router::new()
        .route("/api/process-emails", post(process_emails))
        .route("/api/extract-tasks", post(extract_tasks))
        .route("/api/email/{email_id}/summary", get(email_summary))
        .route("/api/emails", get(list_emails))
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

fn mode(configured: bool) -> String {
    if configured { "configured" } else { "mock" }.to_string()
}

async fn health(State(state): State<AppState>) -> Reply<HealthStatus> {
    Reply::ok(HealthStatus {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        upstreams: BTreeMap::from([
            ("gmail".to_string(), mode(state.agent.mail_configured())),
            ("ai".to_string(), mode(state.agent.ai_configured())),
            (
                "calendar_agent".to_string(),
                state.agent.calendar_agent_url().to_string(),
            ),
        ]),
    })
}

async fn card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn process_emails(
    State(state): State<AppState>,
    auth: Authenticated,
    ValidJson(body): ValidJson<ProcessEmailsRequest>,
) -> Result<Reply<ProcessEmailsResponse>, ApiError> {
    info!(
        subject = %auth.identity.subject,
        max_results = ?body.max_results,
        "process-emails"
    );
    Ok(Reply::ok(state.agent.process_emails(&auth.token, &body).await?))
}

async fn extract_tasks(
    State(state): State<AppState>,
    _auth: Authenticated,
    ValidJson(body): ValidJson<ExtractTasksRequest>,
) -> Result<Reply<ExtractTasksResponse>, ApiError> {
    Ok(Reply::ok(state.agent.extract_tasks(body.email).await?))
}

async fn email_summary(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(email_id): Path<String>,
) -> Result<Reply<EmailSummaryResponse>, ApiError> {
    Ok(Reply::ok(state.agent.email_summary(&email_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    max_results: Option<u32>,
    #[serde(default)]
    q: Option<String>,
}

async fn list_emails(
    State(state): State<AppState>,
    _auth: Authenticated,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<Reply<EmailListResponse>, ApiError> {
    Ok(Reply::ok(
        state
            .agent
            .list_emails(query.max_results, query.q.as_deref())
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_lists_session_routes() {
        let card = agent_card("http://localhost:3001");
        assert_eq!(card.name, SERVICE_NAME);
        assert_eq!(card.capabilities.len(), 4);
        assert_eq!(card.authentication.audience.as_deref(), Some(SESSION_AUDIENCE));
        assert!(card.capabilities.iter().all(|c| c.required_scope.is_none()));
    }
}
