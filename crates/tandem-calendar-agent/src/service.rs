//! Calendar service: validation, mock fallback and partial-success batches

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use tandem_core::error::{ApiError, ProviderError, Service};
use tandem_core::event::{CalendarEvent, CalendarEventDraft, EventPatch, parse_timestamp};
use tandem_core::fallback::{CallKind, with_fallback};
use tandem_core::protocol::{BatchItemError, CreateEventsResponse};

use crate::gateway::{CalendarGateway, MockCalendar};

pub use tandem_core::protocol::MAX_BATCH_SIZE;

/// Default and maximum page size for `list_events`
pub const DEFAULT_LIST_SIZE: u32 = 10;
pub const MAX_LIST_SIZE: u32 = 250;

/// Longest event id accepted on the path
const MAX_EVENT_ID_LEN: usize = 1_024;

pub struct CalendarService {
    gateway: Option<Arc<dyn CalendarGateway>>,
    mock: MockCalendar,
    default_time_zone: Option<String>,
}

impl CalendarService {
    /// `gateway = None` runs entirely on mock data
    pub fn new(gateway: Option<Arc<dyn CalendarGateway>>) -> Self {
        Self {
            gateway,
            mock: MockCalendar,
            default_time_zone: None,
        }
    }

    pub fn with_default_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.default_time_zone = Some(tz.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        self.gateway.is_some()
    }

    fn gateway(&self) -> Result<&Arc<dyn CalendarGateway>, ProviderError> {
        self.gateway.as_ref().ok_or(ProviderError::NotConfigured {
            service: Service::Calendar,
        })
    }

    fn check_event_id(event_id: &str) -> Result<(), ApiError> {
        let trimmed = event_id.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_EVENT_ID_LEN {
            return Err(ApiError::validation("eventId: must be a non-empty identifier"));
        }
        Ok(())
    }

    /// Validate and create a single event
    pub async fn create_event(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, ApiError> {
        let problems = draft.validate();
        if !problems.is_empty() {
            return Err(ApiError::validation_with(
                format!("Invalid event '{}'", draft.title.trim()),
                problems,
            ));
        }

        let mut draft = draft.clone();
        if draft.time_zone.is_none() {
            draft.time_zone = self.default_time_zone.clone();
        }

        let result = match self.gateway() {
            Ok(gateway) => gateway.create_event(&draft).await,
            Err(e) => Err(e),
        };
        with_fallback(CallKind::Create, "create event", result, || {
            self.mock.create_event(&draft)
        })
    }

    /// Create each draft in order. One draft's failure never aborts the rest.
    ///
    /// Returns 200 when every draft (or none) was created and 207 when some
    /// were. When every draft of a non-empty batch fails, the first failure
    /// is returned as the error.
    pub async fn create_events(
        &self,
        drafts: &[CalendarEventDraft],
    ) -> Result<(StatusCode, CreateEventsResponse), ApiError> {
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(ApiError::validation(format!(
                "events: at most {} events per request",
                MAX_BATCH_SIZE
            )));
        }

        let mut created = Vec::with_capacity(drafts.len());
        let mut errors = Vec::new();
        let mut first_failure = None;

        for (index, draft) in drafts.iter().enumerate() {
            match self.create_event(draft).await {
                Ok(event) => created.push(event),
                Err(e) => {
                    warn!("Event {} ('{}') failed: {}", index, draft.title, e);
                    errors.push(BatchItemError {
                        index,
                        title: draft.title.clone(),
                        message: e.to_string(),
                        code: e.code(),
                    });
                    first_failure.get_or_insert(e);
                }
            }
        }

        if created.is_empty()
            && let Some(e) = first_failure
        {
            return Err(e);
        }

        info!(
            "Created {}/{} events ({} failed)",
            created.len(),
            drafts.len(),
            errors.len()
        );

        let status = if errors.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::MULTI_STATUS
        };
        Ok((
            status,
            CreateEventsResponse {
                total_requested: drafts.len(),
                total_created: created.len(),
                created,
                errors: (!errors.is_empty()).then_some(errors),
            },
        ))
    }

    pub async fn list_events(
        &self,
        max_results: Option<u32>,
        time_min: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, ApiError> {
        let max_results = max_results.unwrap_or(DEFAULT_LIST_SIZE);
        if !(1..=MAX_LIST_SIZE).contains(&max_results) {
            return Err(ApiError::validation(format!(
                "maxResults: must be between 1 and {}",
                MAX_LIST_SIZE
            )));
        }
        let time_min: Option<DateTime<Utc>> = match time_min {
            Some(raw) => Some(
                parse_timestamp(raw)
                    .ok_or_else(|| ApiError::validation("timeMin: must be an ISO 8601 timestamp"))?,
            ),
            None => None,
        };

        let result = match self.gateway() {
            Ok(gateway) => gateway.list_events(max_results, time_min).await,
            Err(e) => Err(e),
        };
        with_fallback(CallKind::Read, "list events", result, || {
            self.mock.list_events(max_results)
        })
    }

    pub async fn get_event(&self, event_id: &str) -> Result<CalendarEvent, ApiError> {
        Self::check_event_id(event_id)?;
        let result = match self.gateway() {
            Ok(gateway) => gateway.get_event(event_id).await,
            Err(e) => Err(e),
        };
        with_fallback(CallKind::Read, "get event", result, || {
            self.mock.get_event(event_id)
        })
    }

    pub async fn update_event(
        &self,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, ApiError> {
        Self::check_event_id(event_id)?;
        let problems = patch.validate();
        if !problems.is_empty() {
            return Err(ApiError::validation_with("Invalid event update", problems));
        }

        let result = match self.gateway() {
            Ok(gateway) => gateway.update_event(event_id, patch).await,
            Err(e) => Err(e),
        };
        with_fallback(CallKind::Destructive, "update event", result, || {
            self.mock.update_event(event_id, patch)
        })
    }

    pub async fn delete_event(&self, event_id: &str) -> Result<(), ApiError> {
        Self::check_event_id(event_id)?;
        let result = match self.gateway() {
            Ok(gateway) => gateway.delete_event(event_id).await,
            Err(e) => Err(e),
        };
        with_fallback(CallKind::Destructive, "delete event", result, || ())
    }
}
