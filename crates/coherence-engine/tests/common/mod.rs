//! Shared fixtures for the engine's integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use coherence_engine::attendee::{Attendee, ParticipationStatus};
use coherence_engine::conflict::{EventDirectory, FolderPermission};
use coherence_engine::error::Result;
use coherence_engine::model::{
    CalendarFolder, Classification, Event, EventInstant, EventRole, FolderKind, Organizer,
    Principal, RecurrenceId, Transparency,
};

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

/// A plain single event owned and organized by nobody in particular.
pub fn event(id: &str, start: DateTime<Utc>, minutes: i64) -> Event {
    Event {
        id: id.to_string(),
        uid: format!("{id}-uid"),
        role: EventRole::Single,
        folder_id: "cal-alice".to_string(),
        created_by: "alice".to_string(),
        calendar_user: "alice".to_string(),
        summary: Some("Team sync".to_string()),
        location: None,
        description: None,
        url: None,
        color: None,
        categories: Vec::new(),
        geo: None,
        status: None,
        classification: Classification::Public,
        transparency: Transparency::Opaque,
        start: EventInstant::zoned(start, chrono_tz::UTC),
        end: EventInstant::zoned(start + Duration::minutes(minutes), chrono_tz::UTC),
        rrule: None,
        recurrence_dates: BTreeSet::new(),
        change_exceptions: BTreeSet::new(),
        delete_exceptions: BTreeSet::new(),
        organizer: None,
        attendees: Vec::new(),
        attachments: Vec::new(),
        alarms: Vec::new(),
        sequence: 0,
        created: utc(2026, 1, 1, 0, 0),
        last_modified: utc(2026, 1, 1, 0, 0),
        related_to: None,
    }
}

/// A series master anchored at `start` with the given rule.
pub fn series(id: &str, rule: &str, start: DateTime<Utc>, minutes: i64) -> Event {
    let mut master = event(id, start, minutes);
    master.role = EventRole::SeriesMaster {
        series_id: id.to_string(),
    };
    master.rrule = Some(rule.to_string());
    master
}

/// A change exception overriding the occurrence at `occurrence_start`.
pub fn exception(master: &Event, occurrence_start: DateTime<Utc>) -> Event {
    let recurrence_id = RecurrenceId::new(occurrence_start);
    let mut exc = event(&format!("{}-exc-{}", master.id, occurrence_start.timestamp()), occurrence_start, (master.duration()).num_minutes());
    exc.uid = master.uid.clone();
    exc.role = EventRole::Exception {
        series_id: master.series_id().unwrap().to_string(),
        recurrence_id,
    };
    exc.change_exceptions = BTreeSet::from([recurrence_id]);
    exc.summary = master.summary.clone();
    exc.classification = master.classification;
    exc.attendees = master.attendees.clone();
    exc
}

/// Registers `occurrence_start` as a change exception on the master and
/// returns the matching exception event.
pub fn attach_exception(master: &mut Event, occurrence_start: DateTime<Utc>) -> Event {
    master
        .change_exceptions
        .insert(RecurrenceId::new(occurrence_start));
    exception(master, occurrence_start)
}

/// Makes `who` the organizer and an accepted attendee of the event.
pub fn organized_by(event: &mut Event, who: &str) {
    event.organizer = Some(Organizer {
        entity_id: Some(who.to_string()),
        uri: None,
        sent_by: None,
    });
    let mut attendee = Attendee::individual(who);
    attendee.status = ParticipationStatus::Accepted;
    event.attendees.push(attendee);
}

pub fn accepted(entity_id: &str) -> Attendee {
    let mut attendee = Attendee::individual(entity_id);
    attendee.status = ParticipationStatus::Accepted;
    attendee
}

pub fn folder() -> CalendarFolder {
    CalendarFolder {
        id: "cal-alice".to_string(),
        kind: FolderKind::Private,
        owner: "alice".to_string(),
    }
}

pub fn principal(entity_id: &str) -> Principal {
    Principal::new(entity_id)
}

/// In-memory stand-in for the storage collaborator. Attendee-based
/// filtering only — interval tests are the detector's job.
pub struct InMemoryDirectory {
    pub events: Vec<Event>,
    pub permission: FolderPermission,
}

impl InMemoryDirectory {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            permission: FolderPermission::None,
        }
    }
}

impl EventDirectory for InMemoryDirectory {
    fn load_overlapping_events(
        &self,
        attendees: &[Attendee],
        _from: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        Ok(self
            .events
            .iter()
            .filter(|event| {
                event
                    .attendees
                    .iter()
                    .any(|a| attendees.iter().any(|c| c.key() == a.key()))
            })
            .cloned()
            .collect())
    }

    fn folder_permission(
        &self,
        _folder_id: &str,
        _principal: &Principal,
    ) -> Result<FolderPermission> {
        Ok(self.permission)
    }
}
