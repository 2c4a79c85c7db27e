//! End-to-end tests for the calendar agent over real HTTP

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use tandem_calendar_agent::{AppState, CalendarGateway, CalendarService, MockCalendar, router};
use tandem_core::error::ProviderError;
use tandem_core::event::{CalendarEvent, CalendarEventDraft, EventPatch};
use tandem_core::gatekeeper::Gatekeeper;
use tandem_core::rate_limit::RateLimiter;
use tandem_core::scope::{CALENDAR_AUDIENCE, CALENDAR_READ, CALENDAR_WRITE, ScopeSet};
use tandem_core::token::LocalIssuer;
use tandem_core::validator::LocalTokenValidator;

const SECRET: &[u8] = b"calendar-test-secret-0123456789ab";

struct Harness {
    addr: SocketAddr,
    issuer: Arc<LocalIssuer>,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

/// Counts every upstream call and otherwise behaves like the mock calendar
#[derive(Default)]
struct CountingGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl CalendarGateway for CountingGateway {
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MockCalendar.create_event(draft))
    }

    async fn list_events(
        &self,
        _max_results: u32,
        _time_min: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::classify(
            tandem_core::error::Service::Calendar,
            Some(404),
            &format!("{} not found", event_id),
        ))
    }

    async fn update_event(
        &self,
        event_id: &str,
        _patch: &EventPatch,
    ) -> Result<CalendarEvent, ProviderError> {
        self.get_event(event_id).await
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Harness {
    async fn start(limiter: Option<RateLimiter>) -> Self {
        Self::start_with(CalendarService::new(None), limiter).await
    }

    async fn start_with(service: CalendarService, limiter: Option<RateLimiter>) -> Self {
        let issuer = Arc::new(LocalIssuer::new("tandem-test", SECRET));
        let gate = Gatekeeper::new(Arc::new(LocalTokenValidator::new(
            issuer.clone(),
            Some(CALENDAR_AUDIENCE.to_string()),
        )));
        let state = AppState::new(Arc::new(service), "http://test");
        let app = router(state, gate, limiter, &[]);

        let listener = tandem_core::server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(tandem_core::server::serve(
            "calendar-agent-test",
            listener,
            app,
            shutdown.clone(),
        ));

        Self {
            addr,
            issuer,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn token(&self, scopes: &[&str]) -> String {
        self.issuer
            .mint(
                "user-1",
                CALENDAR_AUDIENCE,
                &scopes.iter().copied().collect::<ScopeSet>(),
                Duration::minutes(5),
                Some("agent-a-email"),
            )
            .unwrap()
    }

    async fn create(&self, token: Option<&str>, body: Value) -> (u16, Value) {
        let mut req = self
            .http
            .post(self.url("/api/create-events"))
            .header("x-agent", "agent-a-email")
            .json(&body);
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn event(title: &str) -> Value {
    json!({
        "title": title,
        "startTime": "2030-01-15T10:00:00Z",
        "endTime": "2030-01-15T11:00:00Z",
    })
}

#[tokio::test]
async fn empty_batch_returns_ok_with_no_events() {
    let gateway = Arc::new(CountingGateway::default());
    let h = Harness::start_with(CalendarService::new(Some(gateway.clone())), None).await;
    let (status, body) = h
        .create(Some(&h.token(&[CALENDAR_WRITE])), json!({ "events": [] }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["created"], json!([]));
    assert_eq!(body["data"]["totalRequested"], 0);
    assert!(body["timestamp"].is_string());
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_write_scope_is_forbidden() {
    let h = Harness::start(None).await;
    let token = h.token(&[CALENDAR_READ, "admin", "calendar"]);
    let (status, body) = h.create(Some(&token), json!({ "events": [event("x")] })).await;
    assert_eq!(status, 403);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_SCOPE");
    assert_eq!(body["error"]["details"]["requiredScope"], CALENDAR_WRITE);
}

#[tokio::test]
async fn scope_is_checked_before_body() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .post(h.url("/api/create-events"))
        .bearer_auth(h.token(&[CALENDAR_READ]))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn single_event_without_provider_is_mock() {
    let h = Harness::start(None).await;
    let (status, body) = h
        .create(Some(&h.token(&[CALENDAR_WRITE])), json!({ "events": [event("Send report")] }))
        .await;
    assert_eq!(status, 200);
    let created = &body["data"]["created"][0];
    assert!(created["id"].as_str().unwrap().starts_with("mock_"));
    assert_eq!(created["status"], "confirmed");
    assert_eq!(created["title"], "Send report");
}

#[tokio::test]
async fn partial_batch_returns_multi_status() {
    let h = Harness::start(None).await;
    let bad = json!({ "title": "", "startTime": "soon", "endTime": "later" });
    let (status, body) = h
        .create(
            Some(&h.token(&[CALENDAR_WRITE])),
            json!({ "events": [event("a"), bad, event("c")] }),
        )
        .await;
    assert_eq!(status, 207);
    assert_eq!(body["data"]["totalCreated"], 2);
    let errors = body["data"]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["index"], 1);
    assert_eq!(errors[0]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn resubmitting_creates_new_events() {
    let h = Harness::start(None).await;
    let token = h.token(&[CALENDAR_WRITE]);
    let batch = json!({ "events": [event("a"), event("b")] });
    let (_, first) = h.create(Some(&token), batch.clone()).await;
    let (_, second) = h.create(Some(&token), batch).await;
    assert_eq!(second["data"]["totalCreated"], 2);
    assert_ne!(first["data"]["created"][0]["id"], second["data"]["created"][0]["id"]);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let h = Harness::start(None).await;
    let (status, body) = h.create(None, json!({ "events": [] })).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "MISSING_TOKEN");
}

#[tokio::test]
async fn token_for_other_audience_is_invalid() {
    let h = Harness::start(None).await;
    let token = h
        .issuer
        .mint(
            "user-1",
            "tandem-session",
            &ScopeSet::from_iter([CALENDAR_WRITE]),
            Duration::minutes(5),
            None,
        )
        .unwrap();
    let (status, body) = h.create(Some(&token), json!({ "events": [] })).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn read_routes_require_read_scope() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(h.url("/api/events?maxResults=2"))
        .bearer_auth(h.token(&[CALENDAR_WRITE]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let resp = h
        .http
        .get(h.url("/api/events?maxResults=2"))
        .bearer_auth(h.token(&[CALENDAR_READ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_query_is_validation_error() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(h.url("/api/events?maxResults=lots"))
        .bearer_auth(h.token(&[CALENDAR_READ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn update_and_delete_in_mock_mode() {
    let h = Harness::start(None).await;
    let token = h.token(&[CALENDAR_WRITE]);

    let resp = h
        .http
        .put(h.url("/api/events/mock_abc"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["title"], "Renamed");

    let resp = h
        .http
        .delete(h.url("/api/events/mock_abc"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["deleted"], true);
}

#[tokio::test]
async fn health_and_card_are_public() {
    let h = Harness::start(None).await;
    let body: Value = h
        .http
        .get(h.url("/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["upstreams"]["google_calendar"], "mock");

    let card: Value = h
        .http
        .get(h.url("/.well-known/agent.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card["name"], "calendar-agent");
}

#[tokio::test]
async fn rate_limit_applies() {
    let h = Harness::start(Some(RateLimiter::new(2, std::time::Duration::from_secs(60)))).await;
    for _ in 0..2 {
        let resp = h.http.get(h.url("/api/health")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }
    let resp = h.http.get(h.url("/api/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn rate_limit_ignores_forwarded_for() {
    let h = Harness::start(Some(RateLimiter::new(2, std::time::Duration::from_secs(60)))).await;
    let mut statuses = Vec::new();
    for i in 0..4 {
        let resp = h
            .http
            .get(h.url("/api/health"))
            .header("x-forwarded-for", format!("203.0.113.{}", i))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429, 429]);
}
