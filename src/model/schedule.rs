use super::{require_text, EventId, GroupId, ValidationError};
use crate::occurrence::OccurrenceKey;
use chrono::{Duration, NaiveDateTime};
use serde::{Serialize, Serializer};

/// A lesson on the calendar. When `is_recurring` is set it repeats weekly from `start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEvent {
    pub id: EventId,
    pub title: String,
    pub group_id: Option<GroupId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_recurring: bool,
}

impl ScheduleEvent {
    pub fn new<S: Into<String>>(
        title: S,
        group_id: Option<GroupId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        is_recurring: bool,
    ) -> Result<Self, ValidationError> {
        let event = ScheduleEvent {
            id: String::new(),
            title: title.into(),
            group_id,
            start,
            end,
            is_recurring,
        };
        event.validate()?;
        Ok(event)
    }

    /// Zero-length and inverted events never reach the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("event title", &self.title)?;
        check_span(self.start, self.end)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

pub(crate) fn check_span(start: NaiveDateTime, end: NaiveDateTime) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::EmptyEvent { start, end });
    }
    Ok(())
}

/// An override time as it came out of storage.
///
/// A value that cannot be read as a time is kept rather than dropped, so that only the one
/// occurrence it belongs to is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideTime {
    Valid(NaiveDateTime),
    Malformed(String),
}

impl Serialize for OverrideTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            OverrideTime::Valid(ref at) => at.serialize(serializer),
            OverrideTime::Malformed(ref raw) => serializer.serialize_str(raw),
        }
    }
}

/// A change to a single occurrence of a recurring event.
///
/// There is at most one exception per `(event_id, occurrence)`. A deleted occurrence is not
/// shown at all; otherwise any override present replaces the base event's value for that one
/// occurrence only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEventException {
    #[serde(rename = "original_event_id")]
    pub event_id: EventId,
    #[serde(rename = "original_start_time")]
    pub occurrence: OccurrenceKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_title: Option<String>,
    /// `Some(None)` moves the occurrence out of any group, `None` leaves the group alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_group_id: Option<Option<GroupId>>,
    #[serde(rename = "new_start_time", skip_serializing_if = "Option::is_none")]
    pub new_start: Option<OverrideTime>,
    #[serde(rename = "new_end_time", skip_serializing_if = "Option::is_none")]
    pub new_end: Option<OverrideTime>,
    pub is_deleted: bool,
}

impl ScheduleEventException {
    pub fn deletion<S: Into<EventId>>(event_id: S, occurrence: OccurrenceKey) -> Self {
        ScheduleEventException {
            event_id: event_id.into(),
            occurrence,
            new_title: None,
            new_group_id: None,
            new_start: None,
            new_end: None,
            is_deleted: true,
        }
    }

    /// A full replacement of one occurrence's title, group and times.
    pub fn overriding<S: Into<EventId>, T: Into<String>>(
        event_id: S,
        occurrence: OccurrenceKey,
        title: T,
        group_id: Option<GroupId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Self, ValidationError> {
        let title = title.into();
        require_text("event title", &title)?;
        check_span(start, end)?;

        Ok(ScheduleEventException {
            event_id: event_id.into(),
            occurrence,
            new_title: Some(title),
            new_group_id: Some(group_id),
            new_start: Some(OverrideTime::Valid(start)),
            new_end: Some(OverrideTime::Valid(end)),
            is_deleted: false,
        })
    }
}
