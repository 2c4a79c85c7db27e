//! Mail gateways: Gmail over REST, and a deterministic mock mailbox

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use url::Url;

use tandem_core::error::{ApiError, ProviderError, Service};
use tandem_core::fallback::{CallKind, with_fallback};
use tandem_core::google::GoogleTokenSource;

use crate::protocol::ItemError;

/// A normalized mail record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl EmailMessage {
    /// Text handed to the summarizer: body, or the snippet when there is none
    pub fn text(&self) -> &str {
        if self.body.trim().is_empty() {
            &self.snippet
        } else {
            &self.body
        }
    }
}

/// Mail access against an upstream provider
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Ids of the newest messages matching `query`
    async fn list_message_ids(
        &self,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<String>, ProviderError>;

    async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError>;
}

// ── Gmail wire types ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Body,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Part,
}

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("html tag pattern is valid"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("whitespace pattern is valid"));

/// Decode Gmail's base64url body data, padded or not
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn find_part<'a>(part: &'a Part, mime: &str) -> Option<&'a Part> {
    if part.mime_type.eq_ignore_ascii_case(mime) && part.body.data.is_some() {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, mime))
}

fn strip_html(html: &str) -> String {
    let text = HTML_TAG.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    WHITESPACE_RUN.replace_all(&text, " ").trim().to_string()
}

/// Plain-text body: text/plain part if any, else stripped text/html
fn extract_body(payload: &Part) -> String {
    if let Some(text) = find_part(payload, "text/plain")
        .and_then(|p| p.body.data.as_deref())
        .and_then(decode_body)
    {
        return text.trim().to_string();
    }
    find_part(payload, "text/html")
        .and_then(|p| p.body.data.as_deref())
        .and_then(decode_body)
        .map(|html| strip_html(&html))
        .unwrap_or_default()
}

impl GmailMessage {
    fn header(&self, name: &str) -> String {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    }

    fn normalize(self) -> EmailMessage {
        EmailMessage {
            subject: self.header("Subject"),
            from: self.header("From"),
            to: self.header("To"),
            date: self.header("Date"),
            body: extract_body(&self.payload),
            id: self.id,
            thread_id: self.thread_id,
            snippet: self.snippet,
            labels: self.label_ids,
        }
    }
}

// ── Gmail client ────────────────────────────────────────────────

/// Gmail REST client for the authorized user (`users/me`)
pub struct GmailClient {
    http: Client,
    base_url: String,
    tokens: Arc<GoogleTokenSource>,
}

impl GmailClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<GoogleTokenSource>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn messages_url(&self, id: Option<&str>) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ProviderError::classify(Service::Gmail, None, &format!("bad base URL: {}", e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ProviderError::classify(Service::Gmail, None, "base URL cannot be a base")
            })?;
            segments.pop_if_empty().extend(["users", "me", "messages"]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let token = self.tokens.access_token(Service::Gmail).await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::transport(Service::Gmail, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::classify(
                Service::Gmail,
                Some(status.as_u16()),
                &body,
            ));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::transport(Service::Gmail, e))
    }
}

#[async_trait]
impl MailGateway for GmailClient {
    async fn list_message_ids(
        &self,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<Vec<String>, ProviderError> {
        let mut url = self.messages_url(None)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("maxResults", &max_results.to_string());
            if let Some(q) = query {
                pairs.append_pair("q", q);
            }
        }
        let list: MessageList = self.get_json(url).await?;
        debug!("Gmail returned {} message ids", list.messages.len());
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError> {
        let mut url = self.messages_url(Some(id))?;
        url.query_pairs_mut().append_pair("format", "full");
        let message: GmailMessage = self.get_json(url).await?;
        Ok(message.normalize())
    }
}

// ── Mock ────────────────────────────────────────────────────────

const MOCK_MESSAGES: &[(&str, &str, &str, &str)] = &[
    (
        "Q3 report review",
        "dana@example.com",
        "Hi, please review the Q3 report draft and send your comments by 2030-01-15. \
         We also need to schedule a follow-up meeting with finance.",
        "2030-01-15",
    ),
    (
        "Urgent: production deploy checklist",
        "ops@example.com",
        "The deploy is ASAP. Please confirm the rollback plan and update the runbook.",
        "",
    ),
    (
        "Weekly newsletter",
        "news@example.com",
        "Here is what happened this week across the company. No action required.",
        "",
    ),
];

/// Fixed sample mailbox for running without Gmail credentials
#[derive(Debug, Clone, Default)]
pub struct MockMailbox;

impl MockMailbox {
    fn sample(index: usize) -> EmailMessage {
        let (subject, from, body, _) = MOCK_MESSAGES[index % MOCK_MESSAGES.len()];
        EmailMessage {
            id: format!("mock_email_{}", index + 1),
            thread_id: format!("mock_thread_{}", index + 1),
            subject: subject.to_string(),
            from: from.to_string(),
            to: "me@example.com".to_string(),
            date: "Mon, 13 Jan 2030 09:00:00 +0000".to_string(),
            snippet: body.chars().take(100).collect(),
            body: body.to_string(),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        }
    }

    pub fn list(&self, max_results: u32) -> Vec<EmailMessage> {
        (0..MOCK_MESSAGES.len())
            .take(max_results as usize)
            .map(Self::sample)
            .collect()
    }

    /// The sample with this id, or a generic message carrying it
    pub fn get(&self, id: &str) -> EmailMessage {
        if let Some(index) = id
            .strip_prefix("mock_email_")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| (1..=MOCK_MESSAGES.len()).contains(n))
        {
            return Self::sample(index - 1);
        }
        let mut message = Self::sample(2);
        message.id = id.to_string();
        message
    }
}

// ── Service ─────────────────────────────────────────────────────

/// Mail access with the fallback policy applied
pub struct MailService {
    gateway: Option<Arc<dyn MailGateway>>,
    mock: MockMailbox,
}

impl MailService {
    pub fn new(gateway: Option<Arc<dyn MailGateway>>) -> Self {
        Self {
            gateway,
            mock: MockMailbox,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.gateway.is_some()
    }

    /// Newest messages, fetched one by one. A message that fails to load is
    /// reported in the returned errors and skipped.
    pub async fn list_emails(
        &self,
        max_results: u32,
        query: Option<&str>,
    ) -> Result<(Vec<EmailMessage>, Vec<ItemError>), ApiError> {
        let Some(gateway) = &self.gateway else {
            debug!("Gmail not configured, serving mock mailbox");
            return Ok((self.mock.list(max_results), Vec::new()));
        };

        let ids = match gateway.list_message_ids(max_results, query).await {
            Ok(ids) => ids,
            Err(e) if e.is_typed() => return Err(e.into()),
            Err(e) => {
                warn!("list emails failed, falling back to mock data: {}", e);
                return Ok((self.mock.list(max_results), Vec::new()));
            }
        };

        let mut messages = Vec::with_capacity(ids.len());
        let mut errors = Vec::new();
        for id in ids {
            match gateway.get_message(&id).await {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!("Failed to fetch email {}: {}", id, e);
                    errors.push(ItemError::fetch(&id, &ApiError::from(e)));
                }
            }
        }
        Ok((messages, errors))
    }

    pub async fn get_email(&self, id: &str) -> Result<EmailMessage, ApiError> {
        let result = match &self.gateway {
            Some(gateway) => gateway.get_message(id).await,
            None => Err(ProviderError::NotConfigured {
                service: Service::Gmail,
            }),
        };
        with_fallback(CallKind::Read, "get email", result, || self.mock.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gmail(server: &MockServer) -> GmailClient {
        GmailClient::new(
            server.uri(),
            Arc::new(GoogleTokenSource::from_static("ya29.test")),
            std::time::Duration::from_secs(5),
        )
    }

    fn gmail_message(id: &str, text: &str) -> serde_json::Value {
        json!({
            "id": id,
            "threadId": "t1",
            "labelIds": ["INBOX"],
            "snippet": "snip",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "Subject", "value": "Hello"},
                    {"name": "From", "value": "a@example.com"},
                    {"name": "to", "value": "me@example.com"},
                ],
                "parts": [
                    {"mimeType": "text/html", "body": {"data": URL_SAFE.encode("<p>html</p>")}},
                    {"mimeType": "text/plain", "body": {"data": URL_SAFE_NO_PAD.encode(text)}},
                ],
            },
        })
    }

    #[test]
    fn test_decode_body_handles_padding() {
        assert_eq!(decode_body(&URL_SAFE.encode("hi?")).as_deref(), Some("hi?"));
        assert_eq!(decode_body(&URL_SAFE_NO_PAD.encode("hi?")).as_deref(), Some("hi?"));
        assert!(decode_body("***").is_none());
    }

    #[test]
    fn test_html_fallback_is_stripped() {
        let part = Part {
            mime_type: "text/html".to_string(),
            body: Body {
                data: Some(URL_SAFE.encode("<div>Call <b>me</b>&nbsp;today</div>")),
            },
            ..Default::default()
        };
        assert_eq!(extract_body(&part), "Call me today");
    }

    #[tokio::test]
    async fn test_get_message_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .and(header("authorization", "Bearer ya29.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gmail_message("m1", "plain body")))
            .mount(&server)
            .await;

        let message = gmail(&server).get_message("m1").await.unwrap();
        assert_eq!(message.subject, "Hello");
        assert_eq!(message.to, "me@example.com");
        assert_eq!(message.body, "plain body");
        assert_eq!(message.labels, vec!["INBOX"]);
    }

    #[tokio::test]
    async fn test_list_collects_per_message_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param("maxResults", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "ok1", "threadId": "t"}, {"id": "gone", "threadId": "t"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/ok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gmail_message("ok1", "x")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Requested entity was not found."))
            .mount(&server)
            .await;

        let service = MailService::new(Some(Arc::new(gmail(&server))));
        let (messages, errors) = service.list_emails(2, None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "EMAIL_NOT_FOUND");
        assert_eq!(errors[0].email_id.as_deref(), Some("gone"));
    }

    #[tokio::test]
    async fn test_expired_auth_is_not_masked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid Credentials"))
            .mount(&server)
            .await;

        let service = MailService::new(Some(Arc::new(gmail(&server))));
        let err = service.list_emails(5, None).await.unwrap_err();
        assert_eq!(err.code(), "GMAIL_AUTH_EXPIRED");
    }

    #[tokio::test]
    async fn test_unconfigured_serves_mock_mailbox() {
        let service = MailService::new(None);
        let (messages, errors) = service.list_emails(2, None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(errors.is_empty());
        assert_eq!(messages[0].id, "mock_email_1");

        let email = service.get_email("mock_email_2").await.unwrap();
        assert!(email.subject.starts_with("Urgent"));
        let email = service.get_email("abc").await.unwrap();
        assert_eq!(email.id, "abc");
    }
}
