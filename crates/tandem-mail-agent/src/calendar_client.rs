//! Client for the calendar agent's `create-events` endpoint

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use tandem_core::delegation::DelegatedCredential;
use tandem_core::envelope::Envelope;
use tandem_core::error::ApiError;
use tandem_core::event::CalendarEventDraft;
use tandem_core::protocol::{
    AGENT_HEADER, CreateEventsRequest, CreateEventsResponse, MAIL_AGENT_MARKER,
};
use tandem_core::redact::redact_credentials;
use tandem_core::scope::{CALENDAR_AUDIENCE, CALENDAR_WRITE};

/// Code reported when the calendar agent cannot be reached or answers garbage
pub const CALENDAR_AGENT_ERROR: &str = "CALENDAR_AGENT_ERROR";

/// Calls the calendar agent on behalf of a user, with a delegated credential
#[derive(Debug, Clone)]
pub struct CalendarAgentClient {
    http: Client,
    base_url: String,
}

fn unreachable(message: String) -> ApiError {
    ApiError::CalendarAgent {
        status: 502,
        code: CALENDAR_AGENT_ERROR.to_string(),
        message,
    }
}

impl CalendarAgentClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit drafts as one batch. A 207 reply is a success carrying
    /// per-item errors; any other non-2xx reply fails the whole call with the
    /// calendar agent's status and code.
    pub async fn create_events(
        &self,
        credential: &DelegatedCredential,
        events: Vec<CalendarEventDraft>,
    ) -> Result<CreateEventsResponse, ApiError> {
        if credential.audience != CALENDAR_AUDIENCE || !credential.scopes.contains(CALENDAR_WRITE) {
            return Err(ApiError::DelegationFailed(format!(
                "credential for '{}' with scopes '{}' cannot create calendar events",
                credential.audience, credential.scopes
            )));
        }

        let url = format!("{}/api/create-events", self.base_url.trim_end_matches('/'));
        debug!("Submitting {} events to {}", events.len(), url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(credential.token())
            .header(AGENT_HEADER, MAIL_AGENT_MARKER)
            .json(&CreateEventsRequest { events })
            .send()
            .await
            .map_err(|e| unreachable(format!("Failed to reach calendar agent: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| unreachable(format!("Failed to read calendar agent reply: {}", e)))?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<Envelope<Value>>(&body) {
                Ok(Envelope {
                    error: Some(err), ..
                }) => (err.code, err.message),
                _ => (
                    CALENDAR_AGENT_ERROR.to_string(),
                    redact_credentials(body.trim()),
                ),
            };
            warn!("Calendar agent rejected batch: HTTP {} {}", status, code);
            return Err(ApiError::CalendarAgent {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let envelope: Envelope<CreateEventsResponse> = serde_json::from_str(&body)
            .map_err(|e| unreachable(format!("Unreadable calendar agent reply: {}", e)))?;
        let created = envelope
            .data
            .ok_or_else(|| unreachable("Calendar agent reply carried no data".to_string()))?;

        info!(
            "Calendar agent created {}/{} events",
            created.total_created, created.total_requested
        );
        Ok(created)
    }
}
