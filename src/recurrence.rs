use crate::{
    model::{EventId, GroupId, OverrideTime, ScheduleEvent, ScheduleEventException},
    occurrence::OccurrenceKey,
};
use chrono::{Duration, NaiveDateTime};
use log::{trace, warn};
use serde::Serialize;
use std::collections::HashMap;

/// How many weekly occurrences a recurring event generates after its own start.
pub const RECURRENCE_HORIZON_WEEKS: u32 = 52;

/// Records the recurrence of a schedule event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Once,
    /// Every week, for n occurrences after the first
    Weekly(u32),
}

impl Frequency {
    pub fn of(event: &ScheduleEvent, horizon_weeks: u32) -> Self {
        if event.is_recurring {
            Frequency::Weekly(horizon_weeks)
        } else {
            Frequency::Once
        }
    }

    pub fn get_period_length(&self) -> Duration {
        match *self {
            Frequency::Once => Duration::zero(),
            Frequency::Weekly(_) => Duration::weeks(1),
        }
    }

    /// Start times of the generated occurrences, numbered from 1. The first occurrence (the
    /// event itself) is not included.
    ///
    /// Steps are whole weeks of wall-clock time, so an occurrence keeps its time of day. The
    /// list ends early if a step would leave the representable calendar.
    pub fn get_occurrence_starts(&self, start: NaiveDateTime) -> Vec<(u32, NaiveDateTime)> {
        let count = match *self {
            Frequency::Once => return Vec::new(),
            Frequency::Weekly(count) => count,
        };

        let period = self.get_period_length();
        let mut starts = Vec::with_capacity(count as usize);
        let mut next = start;

        for index in 1..=count {
            next = match next.checked_add_signed(period) {
                Some(at) => at,
                None => {
                    warn!(
                        "recurrence from {} runs past the calendar after {} occurrences",
                        start,
                        index - 1
                    );
                    break;
                }
            };
            starts.push((index, next));
        }

        starts
    }
}

/// One event instance as the calendar shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleEvent {
    /// Display identity. Generated occurrences get `"{event}-recur-{n}"`.
    pub id: String,
    /// The stored event every mutation must target
    pub original_id: EventId,
    pub title: String,
    pub group_id: Option<GroupId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_recurring: bool,
    /// Whether this instance was generated rather than stored
    pub is_virtual: bool,
    pub occurrence_key: OccurrenceKey,
    pub exception: Option<ScheduleEventException>,
}

fn resolve_time(
    event: &ScheduleEvent,
    label: &str,
    time: Option<&OverrideTime>,
    fallback: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match time {
        None => Some(fallback),
        Some(OverrideTime::Valid(at)) => Some(*at),
        Some(OverrideTime::Malformed(raw)) => {
            warn!(
                "skipping occurrence of event {}: unreadable {} time '{}'",
                event.id, label, raw
            );
            None
        }
    }
}

fn occurrence(
    event: &ScheduleEvent,
    index: u32,
    start: NaiveDateTime,
    exception: Option<&ScheduleEventException>,
) -> Option<VisibleEvent> {
    let occurrence_key = OccurrenceKey::from_local(start);

    let exception = match exception {
        Some(e) if e.is_deleted => {
            trace!("occurrence {} of event {} is deleted", occurrence_key, event.id);
            return None;
        }
        other => other,
    };

    let start = resolve_time(event, "start", exception.and_then(|e| e.new_start.as_ref()), start)?;
    let end = match start.checked_add_signed(event.duration()) {
        Some(end) => end,
        None => {
            warn!("skipping occurrence {} of event {}: end out of range", occurrence_key, event.id);
            return None;
        }
    };
    let end = resolve_time(event, "end", exception.and_then(|e| e.new_end.as_ref()), end)?;

    // An empty title override falls back to the event's own title.
    let title = exception
        .and_then(|e| e.new_title.as_ref())
        .filter(|t| !t.is_empty())
        .unwrap_or(&event.title)
        .clone();
    let group_id = match exception.and_then(|e| e.new_group_id.as_ref()) {
        Some(group_id) => group_id.clone(),
        None => event.group_id.clone(),
    };

    Some(VisibleEvent {
        id: format!("{}-recur-{}", event.id, index),
        original_id: event.id.clone(),
        title,
        group_id,
        start,
        end,
        is_recurring: event.is_recurring,
        is_virtual: true,
        occurrence_key,
        exception: exception.cloned(),
    })
}

/// Expand stored events into every instance the calendar shows.
///
/// Each event is emitted as itself, followed (when recurring) by its weekly occurrences up to
/// `horizon_weeks`. Exceptions are matched to occurrences by event id and occurrence key;
/// orphaned exceptions are ignored. The output depends only on the input.
pub fn expand(
    events: &[ScheduleEvent],
    exceptions: &[ScheduleEventException],
    horizon_weeks: u32,
) -> Vec<VisibleEvent> {
    let mut by_occurrence = HashMap::with_capacity(exceptions.len());
    for exception in exceptions {
        by_occurrence.insert(
            (exception.event_id.as_str(), &exception.occurrence),
            exception,
        );
    }

    let mut visible = Vec::new();

    for event in events {
        visible.push(VisibleEvent {
            id: event.id.clone(),
            original_id: event.id.clone(),
            title: event.title.clone(),
            group_id: event.group_id.clone(),
            start: event.start,
            end: event.end,
            is_recurring: event.is_recurring,
            is_virtual: false,
            occurrence_key: OccurrenceKey::from_local(event.start),
            exception: None,
        });

        for (index, start) in Frequency::of(event, horizon_weeks).get_occurrence_starts(event.start)
        {
            let key = OccurrenceKey::from_local(start);
            let exception = by_occurrence.get(&(event.id.as_str(), &key)).copied();
            if let Some(instance) = occurrence(event, index, start, exception) {
                visible.push(instance);
            }
        }
    }

    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::at;

    fn weekly(id: &str) -> ScheduleEvent {
        let mut event =
            ScheduleEvent::new("Maths", Some("g1".into()), at(2024, 3, 4, 15, 0), at(2024, 3, 4, 16, 30), true)
                .unwrap();
        event.id = id.to_owned();
        event
    }

    fn key_of(n: i64) -> OccurrenceKey {
        OccurrenceKey::from_local(at(2024, 3, 4, 15, 0) + Duration::weeks(n))
    }

    #[test]
    fn recurring_event_spans_the_horizon() {
        let event = weekly("e1");
        let visible = expand(&[event.clone()], &[], RECURRENCE_HORIZON_WEEKS);

        assert_eq!(visible.len(), 53);
        assert!(!visible[0].is_virtual);
        assert_eq!(visible[0].id, "e1");
        for pair in visible.windows(2) {
            assert_eq!(pair[1].start - pair[0].start, Duration::days(7));
        }
        for instance in &visible {
            assert_eq!(instance.end - instance.start, event.duration());
            assert_eq!(instance.original_id, "e1");
        }
        assert_eq!(visible[52].id, "e1-recur-52");
    }

    #[test]
    fn one_off_event_is_emitted_once() {
        let mut event = weekly("e1");
        event.is_recurring = false;

        let visible = expand(&[event], &[], RECURRENCE_HORIZON_WEEKS);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].occurrence_key, key_of(0));
    }

    #[test]
    fn deleted_occurrence_is_skipped() {
        let deletion = ScheduleEventException::deletion("e1", key_of(5));
        let visible = expand(&[weekly("e1")], &[deletion], RECURRENCE_HORIZON_WEEKS);

        assert_eq!(visible.len(), 52);
        assert!(visible.iter().all(|v| v.occurrence_key != key_of(5)));
        assert!(visible.iter().all(|v| v.id != "e1-recur-5"));
    }

    #[test]
    fn override_touches_only_its_occurrence() {
        let mut exception = ScheduleEventException::deletion("e1", key_of(5));
        exception.is_deleted = false;
        exception.new_title = Some("Maths (room 4)".into());

        let visible = expand(&[weekly("e1")], &[exception], RECURRENCE_HORIZON_WEEKS);
        let title = |n: i64| {
            visible
                .iter()
                .find(|v| v.occurrence_key == key_of(n))
                .map(|v| v.title.as_str())
        };

        assert_eq!(title(5), Some("Maths (room 4)"));
        assert_eq!(title(4), Some("Maths"));
        assert_eq!(title(6), Some("Maths"));
        assert_eq!(visible.len(), 53);
    }

    #[test]
    fn explicit_no_group_wins_over_event_group() {
        let mut cleared = ScheduleEventException::deletion("e1", key_of(2));
        cleared.is_deleted = false;
        cleared.new_group_id = Some(None);
        let mut untouched = ScheduleEventException::deletion("e1", key_of(3));
        untouched.is_deleted = false;
        untouched.new_title = Some(String::new());

        let visible = expand(&[weekly("e1")], &[cleared, untouched], RECURRENCE_HORIZON_WEEKS);

        assert_eq!(visible[2].group_id, None);
        assert!(visible[2].exception.is_some());
        assert_eq!(visible[3].group_id, Some("g1".to_owned()));
        assert_eq!(visible[3].title, "Maths");
    }

    #[test]
    fn moved_occurrence_keeps_duration_unless_end_given() {
        let mut moved = ScheduleEventException::deletion("e1", key_of(1));
        moved.is_deleted = false;
        moved.new_start = Some(OverrideTime::Valid(at(2024, 3, 12, 10, 0)));

        let visible = expand(&[weekly("e1")], &[moved], RECURRENCE_HORIZON_WEEKS);

        assert_eq!(visible[1].start, at(2024, 3, 12, 10, 0));
        assert_eq!(visible[1].end, at(2024, 3, 12, 11, 30));
        // The key still names the slot the occurrence came from.
        assert_eq!(visible[1].occurrence_key, key_of(1));
    }

    #[test]
    fn malformed_override_skips_only_that_occurrence() {
        let mut broken = ScheduleEventException::deletion("e1", key_of(7));
        broken.is_deleted = false;
        broken.new_end = Some(OverrideTime::Malformed("not a time".into()));

        let visible = expand(&[weekly("e1")], &[broken], RECURRENCE_HORIZON_WEEKS);
        assert_eq!(visible.len(), 52);
        assert!(visible.iter().all(|v| v.occurrence_key != key_of(7)));
    }

    #[test]
    fn exceptions_for_other_events_or_slots_are_ignored() {
        let orphaned = vec![
            ScheduleEventException::deletion("e2", key_of(5)),
            ScheduleEventException::deletion(
                "e1",
                OccurrenceKey::from_local(at(2024, 3, 5, 15, 0)),
            ),
        ];

        let visible = expand(&[weekly("e1")], &orphaned, RECURRENCE_HORIZON_WEEKS);
        assert_eq!(visible.len(), 53);
    }

    #[test]
    fn literal_event_ignores_exceptions() {
        let deletion = ScheduleEventException::deletion("e1", key_of(0));
        let visible = expand(&[weekly("e1")], &[deletion], RECURRENCE_HORIZON_WEEKS);

        assert_eq!(visible.len(), 53);
        assert_eq!(visible[0].id, "e1");
    }

    #[test]
    fn expansion_is_repeatable() {
        let mut moved = ScheduleEventException::deletion("e1", key_of(9));
        moved.is_deleted = false;
        moved.new_title = Some("Exam".into());
        let events = vec![weekly("e1"), weekly("e2")];
        let exceptions = vec![ScheduleEventException::deletion("e2", key_of(3)), moved];

        let first = serde_json::to_string(&expand(&events, &exceptions, 52)).unwrap();
        let second = serde_json::to_string(&expand(&events, &exceptions, 52)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stepping_stops_at_the_end_of_the_calendar() {
        let start = NaiveDateTime::MAX - Duration::days(10);
        let starts = Frequency::Weekly(52).get_occurrence_starts(start);
        assert_eq!(starts.len(), 1);
    }
}
