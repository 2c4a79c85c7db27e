//! Summarization and action-item extraction for a single email

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use tandem_core::error::{ApiError, ProviderError, Service};
use tandem_core::fallback::{CallKind, with_fallback};

use crate::llm::LlmProvider;
use crate::mail::EmailMessage;

/// Longest slice of an email sent to the model
const MAX_PROMPT_CHARS: usize = 12_000;

/// Most action items kept per email
const MAX_ACTIONS: usize = 10;

/// Most action items the heuristic extractor produces
const MAX_HEURISTIC_ACTIONS: usize = 3;

const SUMMARY_SYSTEM: &str = "You summarize emails for a busy reader. \
    Reply with two or three plain sentences covering who wants what and by when. \
    No preamble, no bullet points.";

const EXTRACT_SYSTEM: &str = "You extract action items from emails. \
    Reply with only a JSON array. Each element is an object with keys \
    \"title\" (short imperative), \"description\" (one sentence or null), \
    \"suggestedDate\" (ISO 8601 date or null) and \"priority\" (\"low\", \"medium\" or \"high\"). \
    Reply with [] when the email asks nothing of the reader.";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("date pattern is valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Lenient mapping of model output; unknown labels are medium
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" | "urgent" | "critical" => Self::High,
            "low" | "minor" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// A task extracted from an email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_date: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub email_id: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// True when any part of the analysis came from the heuristic fallback
    pub mock: bool,
    pub processed_at: DateTime<Utc>,
}

/// Summary and action items for one email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAnalysis {
    pub summary: String,
    pub actions: Vec<ActionItem>,
    pub metadata: AnalysisMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "dueDate", alias = "date")]
    suggested_date: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// The JSON array inside model output, tolerating code fences and chatter
fn json_array_slice(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse model output into action items
pub fn parse_actions(text: &str) -> Result<Vec<ActionItem>, ProviderError> {
    let slice = json_array_slice(text).ok_or_else(|| {
        ProviderError::classify(Service::Ai, None, "model output contained no JSON array")
    })?;
    let raw: Vec<RawAction> = serde_json::from_str(slice).map_err(|e| {
        ProviderError::classify(Service::Ai, None, &format!("unparseable action items: {}", e))
    })?;

    Ok(raw
        .into_iter()
        .filter_map(|r| {
            let title = r.title?.trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(ActionItem {
                title,
                description: r.description.filter(|d| !d.trim().is_empty()),
                suggested_date: r.suggested_date.filter(|d| !d.trim().is_empty()),
                priority: r.priority.as_deref().map(Priority::from_label).unwrap_or_default(),
            })
        })
        .take(MAX_ACTIONS)
        .collect())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

const ACTION_CUES: &[&str] = &[
    "please", "need to", "needs to", "todo", "to do", "deadline", "schedule", "confirm",
    "review", "send", "follow up", "follow-up", "remind", "submit", "prepare",
];

const URGENT_CUES: &[&str] = &["urgent", "asap", "immediately", "critical"];

/// Deterministic summary used when no model is available
pub fn heuristic_summary(email: &EmailMessage) -> String {
    let lead: Vec<&str> = sentences(email.text()).take(2).collect();
    if lead.is_empty() {
        return "No content to summarize.".to_string();
    }
    let mut summary = truncate(&lead.join(". "), 280);
    summary.push('.');
    summary
}

/// Deterministic action extraction used when no model is available
pub fn heuristic_actions(email: &EmailMessage) -> Vec<ActionItem> {
    let urgent_subject = {
        let subject = email.subject.to_lowercase();
        URGENT_CUES.iter().any(|c| subject.contains(c))
    };

    sentences(email.text())
        .filter(|s| {
            let lower = s.to_lowercase();
            !lower.contains("no action") && ACTION_CUES.iter().any(|c| lower.contains(c))
        })
        .take(MAX_HEURISTIC_ACTIONS)
        .map(|s| {
            let lower = s.to_lowercase();
            let urgent = urgent_subject || URGENT_CUES.iter().any(|c| lower.contains(c));
            ActionItem {
                title: truncate(s, 80),
                description: Some(format!("From \"{}\"", email.subject)),
                suggested_date: ISO_DATE.find(s).map(|m| m.as_str().to_string()),
                priority: if urgent { Priority::High } else { Priority::Medium },
            }
        })
        .collect()
}

fn prompt_for(email: &EmailMessage) -> String {
    format!(
        "From: {}\nSubject: {}\nDate: {}\n\n{}",
        email.from,
        email.subject,
        email.date,
        truncate(email.text(), MAX_PROMPT_CHARS)
    )
}

/// Summarization engine. Without a model every call is served by the
/// deterministic heuristics.
pub struct Summarizer {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Summarizer {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub fn is_configured(&self) -> bool {
        self.llm.is_some()
    }

    fn llm(&self) -> Result<&Arc<dyn LlmProvider>, ProviderError> {
        self.llm
            .as_ref()
            .ok_or(ProviderError::NotConfigured { service: Service::Ai })
    }

    async fn summary_from_model(&self, email: &EmailMessage) -> Result<String, ProviderError> {
        let text = self.llm()?.complete(SUMMARY_SYSTEM, &prompt_for(email)).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::classify(Service::Ai, None, "model returned an empty summary"));
        }
        Ok(text.to_string())
    }

    async fn actions_from_model(&self, email: &EmailMessage) -> Result<Vec<ActionItem>, ProviderError> {
        let text = self.llm()?.complete(EXTRACT_SYSTEM, &prompt_for(email)).await?;
        parse_actions(&text)
    }

    /// Summarize `email` and extract its action items, one after the other
    pub async fn analyze(&self, email: &EmailMessage) -> Result<EmailAnalysis, ApiError> {
        debug!("Analyzing email {}", email.id);
        let mut mocked = false;

        let result = self.summary_from_model(email).await;
        let summary = with_fallback(CallKind::Read, "summarize email", result, || {
            mocked = true;
            heuristic_summary(email)
        })?;

        let result = self.actions_from_model(email).await;
        let actions = with_fallback(CallKind::Read, "extract action items", result, || {
            mocked = true;
            heuristic_actions(email)
        })?;

        info!("Email {}: {} action items", email.id, actions.len());

        let (provider, model) = match &self.llm {
            Some(llm) => (llm.provider_name().to_string(), Some(llm.model().to_string())),
            None => ("mock".to_string(), None),
        };
        Ok(EmailAnalysis {
            summary,
            actions,
            metadata: AnalysisMetadata {
                email_id: email.id.clone(),
                provider,
                model,
                mock: mocked,
                processed_at: Utc::now(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MockMailbox;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, ProviderError> {
            self.replies.lock().unwrap().pop().unwrap_or(Ok(String::new()))
        }
    }

    #[test]
    fn test_parse_actions_tolerates_fences() {
        let text = "Here you go:\n```json\n[{\"title\": \"Send report\", \"suggestedDate\": \"2030-01-15\", \"priority\": \"URGENT\"}, {\"title\": \"  \"}]\n```";
        let actions = parse_actions(text).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].priority, Priority::High);
        assert_eq!(actions[0].suggested_date.as_deref(), Some("2030-01-15"));
    }

    #[test]
    fn test_parse_actions_rejects_prose() {
        let err = parse_actions("Nothing to do here.").unwrap_err();
        assert!(!err.is_typed());
        assert_eq!(parse_actions("[]").unwrap().len(), 0);
    }

    #[test]
    fn test_heuristics_on_mock_mailbox() {
        let mailbox = MockMailbox;
        let q3 = mailbox.get("mock_email_1");
        let actions = heuristic_actions(&q3);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].suggested_date.as_deref(), Some("2030-01-15"));
        assert_eq!(actions[0].priority, Priority::Medium);

        let urgent = mailbox.get("mock_email_2");
        assert!(heuristic_actions(&urgent).iter().all(|a| a.priority == Priority::High));

        let newsletter = mailbox.get("mock_email_3");
        assert!(heuristic_actions(&newsletter).is_empty());
        assert!(heuristic_summary(&newsletter).ends_with('.'));
    }

    #[tokio::test]
    async fn test_analyze_without_model_is_mock() {
        let analysis = Summarizer::new(None)
            .analyze(&MockMailbox.get("mock_email_1"))
            .await
            .unwrap();
        assert!(analysis.metadata.mock);
        assert_eq!(analysis.metadata.provider, "mock");
        assert!(!analysis.actions.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_with_model() {
        let llm = ScriptedLlm::new(vec![
            Ok("Dana wants the Q3 review.".to_string()),
            Ok(r#"[{"title":"Review Q3 report","priority":"high"}]"#.to_string()),
        ]);
        let analysis = Summarizer::new(Some(llm))
            .analyze(&MockMailbox.get("mock_email_1"))
            .await
            .unwrap();
        assert_eq!(analysis.summary, "Dana wants the Q3 review.");
        assert_eq!(analysis.actions[0].title, "Review Q3 report");
        assert!(!analysis.metadata.mock);
        assert_eq!(analysis.metadata.model.as_deref(), Some("test-model"));
    }

    #[tokio::test]
    async fn test_unparseable_actions_fall_back() {
        let llm = ScriptedLlm::new(vec![Ok("Summary.".to_string()), Ok("no json".to_string())]);
        let analysis = Summarizer::new(Some(llm))
            .analyze(&MockMailbox.get("mock_email_1"))
            .await
            .unwrap();
        assert!(analysis.metadata.mock);
        assert_eq!(analysis.actions.len(), 2);
    }

    #[tokio::test]
    async fn test_model_auth_failure_is_typed() {
        let llm = ScriptedLlm::new(vec![Err(ProviderError::classify(
            Service::Ai,
            Some(401),
            "invalid x-api-key",
        ))]);
        let err = Summarizer::new(Some(llm))
            .analyze(&MockMailbox.get("mock_email_1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AI_AUTH_EXPIRED");
    }
}
