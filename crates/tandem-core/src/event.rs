//! Calendar event types exchanged between the agents

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Maximum title length accepted for an event
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum description length accepted for an event
pub const MAX_DESCRIPTION_LEN: usize = 8_000;

/// Maximum attendees on a single event
pub const MAX_ATTENDEES: usize = 100;

/// Longest reminder offset Google Calendar accepts (four weeks)
pub const MAX_REMINDER_MINUTES: u32 = 40_320;

/// How a reminder is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderMethod {
    Email,
    Popup,
}

/// A reminder override on an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderOverride {
    pub method: ReminderMethod,
    pub minutes: u32,
}

/// A proposed event, as submitted to the calendar agent.
///
/// Timestamps stay as strings until validation so malformed input is reported
/// field by field instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Vec<ReminderOverride>>,
}

/// A stored event as returned by the calendar gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    pub created: DateTime<Utc>,
    /// True when the event was fabricated by the mock fallback
    #[serde(default)]
    pub mock: bool,
}

/// Partial update for an existing event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Parse an ISO 8601 timestamp. Accepts RFC 3339, a naive date-time (taken
/// as UTC) or a bare date (09:00 UTC that day).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Loose email shape check: one `@`, non-empty local part, dotted domain
pub fn looks_like_email(addr: &str) -> bool {
    let addr = addr.trim();
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !addr.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn check_attendees(attendees: &[String], field: &str, problems: &mut Vec<String>) {
    if attendees.len() > MAX_ATTENDEES {
        problems.push(format!("{}: at most {} attendees", field, MAX_ATTENDEES));
    }
    for (i, a) in attendees.iter().enumerate() {
        if !looks_like_email(a) {
            problems.push(format!("{}[{}]: '{}' is not a valid email address", field, i, a));
        }
    }
}

impl CalendarEventDraft {
    /// Parsed `(start, end)` pair, if both timestamps are valid
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((parse_timestamp(&self.start_time)?, parse_timestamp(&self.end_time)?))
    }

    /// Field-level problems with this draft; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let title = self.title.trim();
        if title.is_empty() {
            problems.push("title: is required".to_string());
        } else if title.chars().count() > MAX_TITLE_LEN {
            problems.push(format!("title: must be at most {} characters", MAX_TITLE_LEN));
        }

        if let Some(desc) = &self.description
            && desc.chars().count() > MAX_DESCRIPTION_LEN
        {
            problems.push(format!(
                "description: must be at most {} characters",
                MAX_DESCRIPTION_LEN
            ));
        }

        let start = parse_timestamp(&self.start_time);
        let end = parse_timestamp(&self.end_time);
        if start.is_none() {
            problems.push("startTime: must be an ISO 8601 timestamp".to_string());
        }
        if end.is_none() {
            problems.push("endTime: must be an ISO 8601 timestamp".to_string());
        }
        if let (Some(s), Some(e)) = (start, end)
            && e <= s
        {
            problems.push("endTime: must be after startTime".to_string());
        }

        check_attendees(&self.attendees, "attendees", &mut problems);

        if let Some(reminders) = &self.reminders {
            if reminders.len() > 5 {
                problems.push("reminders: at most 5 overrides".to_string());
            }
            for (i, r) in reminders.iter().enumerate() {
                if r.minutes > MAX_REMINDER_MINUTES {
                    problems.push(format!(
                        "reminders[{}].minutes: must be at most {}",
                        i, MAX_REMINDER_MINUTES
                    ));
                }
            }
        }

        problems
    }
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.attendees.is_none()
            && self.location.is_none()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.is_empty() {
            problems.push("body: at least one field must be provided".to_string());
            return problems;
        }
        if let Some(title) = &self.title {
            let trimmed = title.trim();
            if trimmed.is_empty() || trimmed.chars().count() > MAX_TITLE_LEN {
                problems.push(format!("title: must be 1 to {} characters", MAX_TITLE_LEN));
            }
        }
        let start = self.start_time.as_deref().map(parse_timestamp);
        let end = self.end_time.as_deref().map(parse_timestamp);
        if matches!(start, Some(None)) {
            problems.push("startTime: must be an ISO 8601 timestamp".to_string());
        }
        if matches!(end, Some(None)) {
            problems.push("endTime: must be an ISO 8601 timestamp".to_string());
        }
        if let (Some(Some(s)), Some(Some(e))) = (start, end)
            && e <= s
        {
            problems.push("endTime: must be after startTime".to_string());
        }
        if let Some(attendees) = &self.attendees {
            check_attendees(attendees, "attendees", &mut problems);
        }
        problems
    }
}
