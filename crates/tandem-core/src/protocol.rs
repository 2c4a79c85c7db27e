//! Wire types for the agent-to-agent calendar contract and agent cards

use serde::{Deserialize, Serialize};

use crate::event::{CalendarEvent, CalendarEventDraft};

/// Header Agent A sets on calls it makes to Agent B
pub const AGENT_HEADER: &str = "x-agent";

/// Marker value Agent A sends in [`AGENT_HEADER`]
pub const MAIL_AGENT_MARKER: &str = "agent-a-email";

/// Agent card, advertises capabilities at /.well-known/agent.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub authentication: AuthConfig,
}

/// One advertised operation and the scope it requires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub name: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scope: Option<String>,
}

impl Capability {
    pub fn new(name: &str, method: &str, path: &str, required_scope: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            required_scope: required_scope.map(String::from),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub schemes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

/// Largest batch `POST /api/create-events` accepts
pub const MAX_BATCH_SIZE: usize = 50;

/// `POST /api/create-events` body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEventsRequest {
    #[serde(default)]
    pub events: Vec<CalendarEventDraft>,
}

/// A per-item failure inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemError {
    pub index: usize,
    pub title: String,
    pub message: String,
    pub code: String,
}

/// `POST /api/create-events` result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventsResponse {
    pub created: Vec<CalendarEvent>,
    pub total_requested: usize,
    pub total_created: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<BatchItemError>>,
}

/// Health payload shared by both agents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    /// Upstream name → "configured" | "mock"
    pub upstreams: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_card_serialization() {
        let card = AgentCard {
            name: "calendar-agent".to_string(),
            description: "Creates calendar events".to_string(),
            url: "http://localhost:3002".to_string(),
            version: "0.1.0".to_string(),
            capabilities: vec![Capability::new(
                "create_events",
                "POST",
                "/api/create-events",
                Some("calendar.write"),
            )],
            authentication: AuthConfig {
                schemes: vec!["bearer".to_string()],
                audience: Some("agent-b-calendar".to_string()),
            },
        };
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["capabilities"][0]["requiredScope"], "calendar.write");
        assert_eq!(json["authentication"]["audience"], "agent-b-calendar");
    }

    #[test]
    fn test_create_events_request_defaults_to_empty() {
        let req: CreateEventsRequest = serde_json::from_str("{}").unwrap();
        assert!(req.events.is_empty());
    }

    #[test]
    fn test_create_events_response_omits_errors_when_none() {
        let resp = CreateEventsResponse::default();
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["created"], serde_json::json!([]));
        assert_eq!(json["totalRequested"], 0);
        assert!(json.get("errors").is_none());
    }
}
