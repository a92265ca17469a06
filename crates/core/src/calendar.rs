//! Today's first calendar event.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tracing::warn;

const NO_EVENTS: &str = "No events scheduled today";

/// Line shown in the schedule panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleInfo {
    /// Text to display.
    pub title: String,
    /// Whether `title` describes an actual event.
    pub has_schedule: bool,
}

impl ScheduleInfo {
    /// Placeholder with a status message.
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            title: message.into(),
            has_schedule: false,
        }
    }
}

/// A single calendar entry in local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// Event title.
    pub summary: String,
    /// Local start. All-day events start at midnight.
    pub start: NaiveDateTime,
}

/// Anything that can list events.
pub trait CalendarSource: Send + Sync {
    /// All known events, in any order.
    fn events(&self) -> Result<Vec<CalendarEvent>>;
}

/// Pick the earliest event starting on `today`.
pub fn first_event_on(events: &[CalendarEvent], today: NaiveDate) -> ScheduleInfo {
    events
        .iter()
        .filter(|event| event.start.date() == today)
        .min_by_key(|event| event.start)
        .map(|event| ScheduleInfo {
            title: format!("{} - {}", event.start.format("%H:%M"), event.summary),
            has_schedule: true,
        })
        .unwrap_or_else(|| ScheduleInfo::empty(NO_EVENTS))
}

/// Schedule line for `today`, degrading to a status message when the
/// calendar is missing or unreadable.
pub fn schedule_for(source: Option<&dyn CalendarSource>, today: NaiveDate) -> ScheduleInfo {
    let Some(source) = source else {
        return ScheduleInfo::empty("No calendar configured");
    };
    match source.events() {
        Ok(events) => first_event_on(&events, today),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "calendar read failed");
            ScheduleInfo::empty("Calendar unavailable")
        }
    }
}

/// Events read from a local iCalendar (`.ics`) file.
#[derive(Debug, Clone)]
pub struct IcsCalendar {
    path: PathBuf,
}

impl IcsCalendar {
    /// Calendar backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CalendarSource for IcsCalendar {
    fn events(&self) -> Result<Vec<CalendarEvent>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(parse_ics(&content))
    }
}

/// Extract VEVENT entries. Events without a usable DTSTART are skipped.
pub fn parse_ics(content: &str) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut current: Option<(Option<String>, Option<NaiveDateTime>)> = None;

    for line in unfold(content) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (property, params) = match name.split_once(';') {
            Some((property, params)) => (property, params),
            None => (name, ""),
        };
        match (property.to_ascii_uppercase().as_str(), value) {
            ("BEGIN", "VEVENT") => current = Some((None, None)),
            ("END", "VEVENT") => {
                if let Some((summary, Some(start))) = current.take() {
                    events.push(CalendarEvent {
                        summary: summary.unwrap_or_default(),
                        start,
                    });
                }
            }
            ("SUMMARY", text) => {
                if let Some(event) = current.as_mut() {
                    event.0 = Some(unescape(text));
                }
            }
            ("DTSTART", raw) => {
                if let Some(event) = current.as_mut() {
                    event.1 = parse_start(raw, params);
                }
            }
            _ => {}
        }
    }
    events
}

/// Continuation lines start with a space or tab.
fn unfold(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        let raw = raw.trim_end_matches('\r');
        match (raw.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(last)) => last.push_str(rest),
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

fn unescape(text: &str) -> String {
    text.replace("\\n", " ")
        .replace("\\N", " ")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

fn parse_start(raw: &str, params: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if params.to_ascii_uppercase().contains("VALUE=DATE") && !raw.contains('T') {
        return NaiveDate::parse_from_str(raw, "%Y%m%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN));
    }
    if let Some(utc) = raw.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        let local: DateTime<Local> = Utc.from_utc_datetime(&naive).with_timezone(&Local);
        return Some(local.naive_local());
    }
    // Floating and TZID-qualified times are taken as local wall-clock time.
    NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y%m%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}
