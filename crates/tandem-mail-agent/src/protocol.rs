//! Request and response bodies of the mail agent's HTTP surface

use serde::{Deserialize, Serialize};

use tandem_core::error::ApiError;
use tandem_core::event::CalendarEvent;
use tandem_core::protocol::BatchItemError;

use crate::mail::EmailMessage;
use crate::summarize::{ActionItem, AnalysisMetadata};

/// Default and maximum number of emails one `process-emails` call handles
pub const DEFAULT_MAX_RESULTS: u32 = 5;
pub const MAX_RESULTS_LIMIT: u32 = 50;

/// Which step of the pipeline an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Analyze,
    Calendar,
}

/// A per-item failure inside `process-emails`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    pub code: String,
}

impl ItemError {
    pub fn fetch(email_id: &str, err: &ApiError) -> Self {
        Self {
            stage: Stage::Fetch,
            email_id: Some(email_id.to_string()),
            title: None,
            message: err.to_string(),
            code: err.code(),
        }
    }

    pub fn analyze(email_id: &str, err: &ApiError) -> Self {
        Self {
            stage: Stage::Analyze,
            email_id: Some(email_id.to_string()),
            title: None,
            message: err.to_string(),
            code: err.code(),
        }
    }

    /// Lift a per-event failure reported by the calendar agent
    pub fn calendar(err: BatchItemError) -> Self {
        Self {
            stage: Stage::Calendar,
            email_id: None,
            title: Some(err.title),
            message: err.message,
            code: err.code,
        }
    }
}

/// `POST /api/process-emails` body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEmailsRequest {
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub query: Option<String>,
}

impl ProcessEmailsRequest {
    pub fn resolved_max_results(&self) -> Result<u32, ApiError> {
        let max = self.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if !(1..=MAX_RESULTS_LIMIT).contains(&max) {
            return Err(ApiError::validation(format!(
                "maxResults: must be between 1 and {}",
                MAX_RESULTS_LIMIT
            )));
        }
        Ok(max)
    }

    /// Query with surrounding whitespace trimmed; blank counts as absent
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

/// Summary of one processed email
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSummary {
    pub email_id: String,
    pub subject: String,
    pub from: String,
    pub summary: String,
    pub actions: Vec<ActionItem>,
}

/// `POST /api/process-emails` result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEmailsResponse {
    pub processed: usize,
    pub summaries: Vec<EmailSummary>,
    pub events_created: Vec<CalendarEvent>,
    pub errors: Vec<ItemError>,
}

/// Email as submitted by the frontend to `extract-tasks`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, alias = "content")]
    pub body: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Largest email body accepted by `extract-tasks`
pub const MAX_EMAIL_CHARS: usize = 100_000;

impl EmailInput {
    /// Validate and normalize into an [`EmailMessage`]
    pub fn into_message(self) -> Result<EmailMessage, ApiError> {
        let body = self.body.unwrap_or_default();
        let snippet = self.snippet.unwrap_or_default();
        if body.trim().is_empty() && snippet.trim().is_empty() {
            return Err(ApiError::validation("email.body: is required"));
        }
        if body.chars().count() > MAX_EMAIL_CHARS {
            return Err(ApiError::validation(format!(
                "email.body: must be at most {} characters",
                MAX_EMAIL_CHARS
            )));
        }
        Ok(EmailMessage {
            id: self.id.unwrap_or_else(|| "adhoc".to_string()),
            thread_id: String::new(),
            subject: self.subject.unwrap_or_default(),
            from: self.from.unwrap_or_default(),
            to: String::new(),
            date: self.date.unwrap_or_default(),
            snippet,
            body,
            labels: Vec::new(),
        })
    }
}

/// `POST /api/extract-tasks` body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractTasksRequest {
    #[serde(default)]
    pub email: Option<EmailInput>,
}

/// `POST /api/extract-tasks` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTasksResponse {
    pub summary: String,
    pub actions: Vec<ActionItem>,
    pub metadata: AnalysisMetadata,
}

/// `GET /api/email/{emailId}/summary` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSummaryResponse {
    pub email: EmailMessage,
    pub summary: String,
    pub actions: Vec<ActionItem>,
}

/// `GET /api/emails` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailListResponse {
    pub emails: Vec<EmailMessage>,
    pub errors: Vec<ItemError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_results_bounds() {
        let req = ProcessEmailsRequest::default();
        assert_eq!(req.resolved_max_results().unwrap(), DEFAULT_MAX_RESULTS);
        for bad in [0, MAX_RESULTS_LIMIT + 1] {
            let req = ProcessEmailsRequest {
                max_results: Some(bad),
                query: None,
            };
            assert_eq!(req.resolved_max_results().unwrap_err().code(), "VALIDATION_ERROR");
        }
    }

    #[test]
    fn test_blank_query_is_absent() {
        let req = ProcessEmailsRequest {
            max_results: None,
            query: Some("   ".to_string()),
        };
        assert!(req.query().is_none());
    }

    #[test]
    fn test_email_input_requires_text() {
        assert!(EmailInput::default().into_message().is_err());
        let input: EmailInput =
            serde_json::from_value(serde_json::json!({"subject": "s", "content": "Do X"})).unwrap();
        let message = input.into_message().unwrap();
        assert_eq!(message.body, "Do X");
        assert_eq!(message.id, "adhoc");
    }

    #[test]
    fn test_item_error_serialization_omits_empty_fields() {
        let err = ItemError::fetch("m1", &ApiError::validation("bad"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["stage"], "fetch");
        assert_eq!(json["emailId"], "m1");
        assert!(json.get("title").is_none());
    }
}
