//! Reminder model and master→exception alarm propagation.
//!
//! When the reminders on a series master change, exceptions that still carry
//! the master's original reminder set should follow along; exceptions whose
//! reminders have diverged must never be silently overwritten. Only
//! relative-trigger (offset-from-start) reminders participate — absolute
//! reminders belong to one concrete instant and are passed through untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{Event, EventId};

/// What the alarm does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    Display,
    Audio,
    Email,
}

/// When the alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTrigger {
    /// Offset from the event start; negative means before.
    Relative { offset: Duration },
    /// A fixed instant, independent of the event's start.
    Absolute(DateTime<Utc>),
}

/// A reminder attached to an event.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: String,
    pub uid: String,
    pub action: AlarmAction,
    pub trigger: AlarmTrigger,
    pub description: Option<String>,
    pub acknowledged: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl Alarm {
    pub fn is_relative(&self) -> bool {
        matches!(self.trigger, AlarmTrigger::Relative { .. })
    }

    /// Field equality ignoring identity (id, uid) and per-copy state
    /// (timestamp, acknowledged). This is the correspondence test between a
    /// master alarm and an exception's copy of it.
    pub fn fields_match(&self, other: &Alarm) -> bool {
        self.action == other.action
            && self.trigger == other.trigger
            && self.description == other.description
    }
}

/// Propagate relative-reminder changes on a series master onto its change
/// exceptions.
///
/// Returns the new alarm list per exception id. Exceptions absent from the
/// map need no write: either the master's relative alarms did not change
/// for them, or their own alarms had already diverged from the master's
/// original set (count mismatch or any positional field mismatch) and are
/// deliberately left alone.
pub fn sync_alarms_to_exceptions(
    original_alarms: &[Alarm],
    updated_alarms: &[Alarm],
    exceptions: &[Event],
) -> BTreeMap<EventId, Vec<Alarm>> {
    let original_relative: Vec<&Alarm> =
        original_alarms.iter().filter(|a| a.is_relative()).collect();
    let updated_relative: Vec<&Alarm> = updated_alarms.iter().filter(|a| a.is_relative()).collect();

    let mut result = BTreeMap::new();

    for exception in exceptions {
        let exception_relative: Vec<&Alarm> =
            exception.alarms.iter().filter(|a| a.is_relative()).collect();

        // The exception participates only if its relative alarms are a 1:1
        // positional field-match of the master's original relative alarms.
        if exception_relative.len() != original_relative.len() {
            continue;
        }
        let corresponds = exception_relative
            .iter()
            .zip(original_relative.iter())
            .all(|(exc, orig)| exc.fields_match(orig));
        if !corresponds {
            continue;
        }

        let mut new_alarms: Vec<Alarm> = Vec::new();

        // Carry each still-present master alarm, applying field updates onto
        // the exception's own copy so its identity survives.
        for (exc_alarm, orig_alarm) in exception_relative.iter().zip(original_relative.iter()) {
            match updated_relative.iter().find(|u| u.id == orig_alarm.id) {
                // Master alarm removed: drop the exception's copy.
                None => {}
                Some(updated) => {
                    let mut carried = (*exc_alarm).clone();
                    if !updated.fields_match(orig_alarm) {
                        carried.action = updated.action;
                        carried.trigger = updated.trigger;
                        carried.description = updated.description.clone();
                    }
                    new_alarms.push(carried);
                }
            }
        }

        // Newly added master alarms are copied over in full.
        for added in updated_relative
            .iter()
            .filter(|u| !original_relative.iter().any(|o| o.id == u.id))
        {
            new_alarms.push((*added).clone());
        }

        // Absolute reminders pass through untouched.
        new_alarms.extend(
            exception
                .alarms
                .iter()
                .filter(|a| !a.is_relative())
                .cloned(),
        );

        result.insert(exception.id.clone(), new_alarms);
    }

    result
}
