//! Calendar gateways: Google Calendar v3 over REST, and the deterministic mock

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use tandem_core::error::{ProviderError, Service};
use tandem_core::event::{CalendarEvent, CalendarEventDraft, EventPatch, parse_timestamp};
use tandem_core::google::GoogleTokenSource;

/// Calendar CRUD against an upstream provider
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, ProviderError>;

    async fn list_events(
        &self,
        max_results: u32,
        time_min: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, ProviderError>;

    async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ProviderError>;

    async fn update_event(
        &self,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, ProviderError>;

    async fn delete_event(&self, event_id: &str) -> Result<(), ProviderError>;
}

// ── Google Calendar wire types ──────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl GoogleDateTime {
    fn at(raw: &str, time_zone: Option<&str>) -> Self {
        Self {
            date_time: Some(raw.to_string()),
            date: None,
            time_zone: time_zone.map(String::from),
        }
    }

    fn resolve(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = self.date_time.as_deref() {
            return parse_timestamp(dt);
        }
        // All-day events carry a bare date
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleAttendee {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: GoogleDateTime,
    #[serde(default)]
    end: GoogleDateTime,
    #[serde(default)]
    attendees: Vec<GoogleAttendee>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    html_link: Option<String>,
    #[serde(default)]
    created: Option<String>,
}

impl GoogleEvent {
    fn into_event(self) -> CalendarEvent {
        let now = Utc::now();
        let start_time = self.start.resolve().unwrap_or(now);
        CalendarEvent {
            id: self.id,
            title: self.summary.unwrap_or_else(|| "(untitled)".to_string()),
            description: self.description,
            start_time,
            end_time: self.end.resolve().unwrap_or(start_time + Duration::hours(1)),
            time_zone: self.start.time_zone,
            attendees: self.attendees.into_iter().filter_map(|a| a.email).collect(),
            location: self.location,
            status: self.status.unwrap_or_else(|| "confirmed".to_string()),
            html_link: self.html_link,
            created: self.created.as_deref().and_then(parse_timestamp).unwrap_or(now),
            mock: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

fn draft_body(draft: &CalendarEventDraft) -> Value {
    let tz = draft.time_zone.as_deref();
    let mut body = json!({
        "summary": draft.title,
        "start": GoogleDateTime::at(&draft.start_time, tz),
        "end": GoogleDateTime::at(&draft.end_time, tz),
    });
    if let Some(description) = &draft.description {
        body["description"] = json!(description);
    }
    if let Some(location) = &draft.location {
        body["location"] = json!(location);
    }
    if !draft.attendees.is_empty() {
        body["attendees"] = draft
            .attendees
            .iter()
            .map(|email| json!({ "email": email }))
            .collect();
    }
    if let Some(reminders) = &draft.reminders {
        body["reminders"] = json!({ "useDefault": false, "overrides": reminders });
    }
    body
}

fn patch_body(patch: &EventPatch) -> Value {
    let mut body = json!({});
    if let Some(title) = &patch.title {
        body["summary"] = json!(title);
    }
    if let Some(description) = &patch.description {
        body["description"] = json!(description);
    }
    if let Some(location) = &patch.location {
        body["location"] = json!(location);
    }
    if let Some(start) = &patch.start_time {
        body["start"] = json!(GoogleDateTime::at(start, None));
    }
    if let Some(end) = &patch.end_time {
        body["end"] = json!(GoogleDateTime::at(end, None));
    }
    if let Some(attendees) = &patch.attendees {
        body["attendees"] = attendees.iter().map(|email| json!({ "email": email })).collect();
    }
    body
}

// ── Google Calendar client ──────────────────────────────────────

/// Google Calendar v3 REST client for one calendar
pub struct GoogleCalendarClient {
    http: Client,
    base_url: String,
    calendar_id: String,
    tokens: Arc<GoogleTokenSource>,
}

impl GoogleCalendarClient {
    pub fn new(
        base_url: impl Into<String>,
        calendar_id: impl Into<String>,
        tokens: Arc<GoogleTokenSource>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            calendar_id: calendar_id.into(),
            tokens,
        }
    }

    /// `{base}/calendars/{calendarId}/events[/{eventId}]`, path segments escaped
    fn events_url(&self, event_id: Option<&str>) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ProviderError::classify(Service::Calendar, None, &format!("bad base URL: {}", e))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ProviderError::classify(Service::Calendar, None, "base URL cannot be a base")
            })?;
            segments.pop_if_empty().extend(["calendars", self.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, ProviderError> {
        let token = self.tokens.access_token(Service::Calendar).await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ProviderError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::transport(Service::Calendar, e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProviderError::classify(
            Service::Calendar,
            Some(status.as_u16()),
            &body,
        ))
    }

    async fn event_from(&self, resp: Response) -> Result<CalendarEvent, ProviderError> {
        resp.json::<GoogleEvent>()
            .await
            .map(GoogleEvent::into_event)
            .map_err(|e| ProviderError::transport(Service::Calendar, e))
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendarClient {
    async fn create_event(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, ProviderError> {
        let url = self.events_url(None)?;
        debug!("Creating Google Calendar event '{}'", draft.title);
        let req = self.request(Method::POST, url).await?.json(&draft_body(draft));
        let resp = self.send(req).await?;
        self.event_from(resp).await
    }

    async fn list_events(
        &self,
        max_results: u32,
        time_min: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        let mut url = self.events_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("maxResults", &max_results.to_string())
                .append_pair("singleEvents", "true")
                .append_pair("orderBy", "startTime");
            if let Some(min) = time_min {
                query.append_pair("timeMin", &min.to_rfc3339());
            }
        }
        let resp = self.send(self.request(Method::GET, url).await?).await?;
        let list: GoogleEventList = resp
            .json()
            .await
            .map_err(|e| ProviderError::transport(Service::Calendar, e))?;
        Ok(list.items.into_iter().map(GoogleEvent::into_event).collect())
    }

    async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ProviderError> {
        let url = self.events_url(Some(event_id))?;
        let resp = self.send(self.request(Method::GET, url).await?).await?;
        self.event_from(resp).await
    }

    async fn update_event(
        &self,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, ProviderError> {
        let url = self.events_url(Some(event_id))?;
        let req = self.request(Method::PATCH, url).await?.json(&patch_body(patch));
        let resp = self.send(req).await?;
        self.event_from(resp).await
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), ProviderError> {
        let url = self.events_url(Some(event_id))?;
        self.send(self.request(Method::DELETE, url).await?).await?;
        Ok(())
    }
}

// ── Mock ────────────────────────────────────────────────────────

/// Deterministically shaped events for running without credentials.
/// Ids are `mock_` followed by a fresh uuid, status is always `confirmed`.
#[derive(Debug, Clone, Default)]
pub struct MockCalendar;

impl MockCalendar {
    fn event(id: String, title: &str, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            html_link: Some(format!("https://calendar.google.com/calendar/event?eid={}", id)),
            id,
            title: title.to_string(),
            description: None,
            start_time,
            end_time,
            time_zone: None,
            attendees: Vec::new(),
            location: None,
            status: "confirmed".to_string(),
            created: Utc::now(),
            mock: true,
        }
    }

    fn new_id() -> String {
        format!("mock_{}", Uuid::new_v4().simple())
    }

    fn tomorrow() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc::now() + Duration::hours(24);
        (start, start + Duration::hours(1))
    }

    pub fn create_event(&self, draft: &CalendarEventDraft) -> CalendarEvent {
        let (default_start, default_end) = Self::tomorrow();
        let (start, end) = draft.window().unwrap_or((default_start, default_end));
        let mut event = Self::event(Self::new_id(), &draft.title, start, end);
        event.description = draft.description.clone();
        event.time_zone = draft.time_zone.clone();
        event.attendees = draft.attendees.clone();
        event.location = draft.location.clone();
        event
    }

    pub fn list_events(&self, max_results: u32) -> Vec<CalendarEvent> {
        let base = Utc::now() + Duration::hours(24);
        ["Team standup", "Project review", "1:1 sync"]
            .iter()
            .enumerate()
            .take(max_results as usize)
            .map(|(i, title)| {
                let start = base + Duration::hours(2 * i as i64);
                Self::event(format!("mock_event_{}", i + 1), title, start, start + Duration::hours(1))
            })
            .collect()
    }

    pub fn get_event(&self, event_id: &str) -> CalendarEvent {
        let (start, end) = Self::tomorrow();
        Self::event(event_id.to_string(), "Mock event", start, end)
    }

    pub fn update_event(&self, event_id: &str, patch: &EventPatch) -> CalendarEvent {
        let mut event = self.get_event(event_id);
        if let Some(title) = &patch.title {
            event.title = title.clone();
        }
        if patch.description.is_some() {
            event.description = patch.description.clone();
        }
        if patch.location.is_some() {
            event.location = patch.location.clone();
        }
        if let Some(start) = patch.start_time.as_deref().and_then(parse_timestamp) {
            event.start_time = start;
            event.end_time = start + Duration::hours(1);
        }
        if let Some(end) = patch.end_time.as_deref().and_then(parse_timestamp) {
            event.end_time = end;
        }
        if let Some(attendees) = &patch.attendees {
            event.attendees = attendees.clone();
        }
        event
    }
}
