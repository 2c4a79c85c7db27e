//! Turns extracted action items into calendar event drafts

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use tandem_core::event::{
    CalendarEventDraft, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN, ReminderMethod, ReminderOverride,
    parse_timestamp,
};

use crate::protocol::EmailSummary;
use crate::summarize::{ActionItem, Priority};

/// Lead time for actions without a usable date
const DEFAULT_LEAD_HOURS: i64 = 24;

const EVENT_LENGTH_MINUTES: i64 = 60;

/// Popup reminder attached to high-priority actions
const URGENT_REMINDER_MINUTES: u32 = 30;

/// Start and end of the event for an action. A suggested date is used when
/// it parses and lies in the future; otherwise the event starts a day from now.
pub fn event_window(suggested: Option<&str>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = suggested
        .and_then(parse_timestamp)
        .filter(|start| *start > now)
        .unwrap_or(now + Duration::hours(DEFAULT_LEAD_HOURS));
    (start, start + Duration::minutes(EVENT_LENGTH_MINUTES))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn draft_for(action: &ActionItem, email: &EmailSummary, now: DateTime<Utc>) -> CalendarEventDraft {
    let (start, end) = event_window(action.suggested_date.as_deref(), now);

    let mut description = String::new();
    if let Some(text) = &action.description {
        description.push_str(text);
        description.push_str("\n\n");
    }
    description.push_str(&format!("From: {}\nSubject: {}", email.from, email.subject));

    CalendarEventDraft {
        title: truncate(action.title.trim(), MAX_TITLE_LEN),
        description: Some(truncate(&description, MAX_DESCRIPTION_LEN)),
        start_time: start.to_rfc3339_opts(SecondsFormat::Secs, true),
        end_time: end.to_rfc3339_opts(SecondsFormat::Secs, true),
        reminders: (action.priority == Priority::High).then(|| {
            vec![ReminderOverride {
                method: ReminderMethod::Popup,
                minutes: URGENT_REMINDER_MINUTES,
            }]
        }),
        ..Default::default()
    }
}

/// One draft per action item, in email order
pub fn plan_events(summaries: &[EmailSummary], now: DateTime<Utc>) -> Vec<CalendarEventDraft> {
    summaries
        .iter()
        .flat_map(|email| email.actions.iter().map(move |a| draft_for(a, email, now)))
        .filter(|draft| !draft.title.is_empty())
        .collect()
}
