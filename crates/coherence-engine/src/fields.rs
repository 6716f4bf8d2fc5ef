//! Field enumeration and the client-submitted patch representation.
//!
//! A client update names only the fields it touched. `EventPatch` makes that
//! explicit: every writable field is either kept, cleared, or set, and
//! `touched_fields` derives the set the delta computation starts from.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::alarm::Alarm;
use crate::attendee::Attendee;
use crate::model::{
    Attachment, Classification, EventInstant, EventStatus, Geo, Organizer, RecurrenceId,
    Transparency,
};

/// Every field of an event the engine can diff or patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventField {
    Uid,
    SeriesId,
    Folder,
    CalendarUser,
    CreatedBy,
    Summary,
    Location,
    Description,
    Url,
    Color,
    Categories,
    Geo,
    Status,
    Classification,
    Transparency,
    StartDate,
    EndDate,
    RecurrenceRule,
    RecurrenceDates,
    ChangeExceptions,
    DeleteExceptions,
    Organizer,
    Attendees,
    Attachments,
    Alarms,
    Sequence,
    Created,
    LastModified,
    RelatedTo,
}

impl EventField {
    /// Every field, in declaration order; drives exhaustive diffing.
    pub const ALL: [EventField; 29] = [
        EventField::Uid,
        EventField::SeriesId,
        EventField::Folder,
        EventField::CalendarUser,
        EventField::CreatedBy,
        EventField::Summary,
        EventField::Location,
        EventField::Description,
        EventField::Url,
        EventField::Color,
        EventField::Categories,
        EventField::Geo,
        EventField::Status,
        EventField::Classification,
        EventField::Transparency,
        EventField::StartDate,
        EventField::EndDate,
        EventField::RecurrenceRule,
        EventField::RecurrenceDates,
        EventField::ChangeExceptions,
        EventField::DeleteExceptions,
        EventField::Organizer,
        EventField::Attendees,
        EventField::Attachments,
        EventField::Alarms,
        EventField::Sequence,
        EventField::Created,
        EventField::LastModified,
        EventField::RelatedTo,
    ];
}

/// An ordered set of event fields.
pub type FieldSet = BTreeSet<EventField>;

/// Fields the server derives itself; client-submitted values are always
/// dropped from the touched set before anything else happens.
pub fn server_derived_fields() -> FieldSet {
    [
        EventField::Created,
        EventField::LastModified,
        EventField::Sequence,
        EventField::CreatedBy,
        EventField::Folder,
        EventField::Alarms,
    ]
    .into_iter()
    .collect()
}

/// The narrow edit surface of a non-organizer attendee.
pub fn attendee_writable_fields() -> FieldSet {
    [
        EventField::Alarms,
        EventField::Attendees,
        EventField::Transparency,
        EventField::DeleteExceptions,
    ]
    .into_iter()
    .collect()
}

/// Fields whose change bumps the sequence number (attendee add/remove is
/// handled separately by the delta).
pub fn sequence_relevant_fields() -> FieldSet {
    [
        EventField::Summary,
        EventField::Location,
        EventField::RecurrenceRule,
        EventField::StartDate,
        EventField::EndDate,
        EventField::RecurrenceDates,
        EventField::DeleteExceptions,
        EventField::Transparency,
    ]
    .into_iter()
    .collect()
}

/// One patched field: untouched, explicitly cleared, or set to a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldPatch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> FieldPatch<T> {
    pub fn is_touched(&self) -> bool {
        !matches!(self, FieldPatch::Keep)
    }

    /// Applies the patch onto an optional target field.
    pub fn apply(&self, target: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            FieldPatch::Keep => {}
            FieldPatch::Clear => *target = None,
            FieldPatch::Set(value) => *target = Some(value.clone()),
        }
    }
}

/// A client-submitted event update. Defaults to "touch nothing".
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub summary: FieldPatch<String>,
    pub location: FieldPatch<String>,
    pub description: FieldPatch<String>,
    pub url: FieldPatch<String>,
    pub color: FieldPatch<String>,
    pub categories: Option<Vec<String>>,
    pub geo: FieldPatch<Geo>,
    pub status: FieldPatch<EventStatus>,
    pub classification: Option<Classification>,
    pub transparency: Option<Transparency>,
    pub start: Option<EventInstant>,
    pub end: Option<EventInstant>,
    pub rrule: FieldPatch<String>,
    pub recurrence_dates: Option<BTreeSet<DateTime<Utc>>>,
    pub delete_exceptions: Option<BTreeSet<RecurrenceId>>,
    pub organizer: FieldPatch<Organizer>,
    pub attendees: Option<Vec<Attendee>>,
    pub attachments: Option<Vec<Attachment>>,
    pub alarms: Option<Vec<Alarm>>,
    // Immutable or server-derived; present here so attempted changes can be
    // detected and rejected rather than silently ignored.
    pub uid: Option<String>,
    pub series_id: Option<String>,
    pub calendar_user: Option<String>,
    pub folder_id: Option<String>,
    pub sequence: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl EventPatch {
    /// The set of fields the client actually touched.
    pub fn touched_fields(&self) -> FieldSet {
        let mut touched = FieldSet::new();
        let mut touch = |cond: bool, field: EventField| {
            if cond {
                touched.insert(field);
            }
        };

        touch(self.summary.is_touched(), EventField::Summary);
        touch(self.location.is_touched(), EventField::Location);
        touch(self.description.is_touched(), EventField::Description);
        touch(self.url.is_touched(), EventField::Url);
        touch(self.color.is_touched(), EventField::Color);
        touch(self.categories.is_some(), EventField::Categories);
        touch(self.geo.is_touched(), EventField::Geo);
        touch(self.status.is_touched(), EventField::Status);
        touch(self.classification.is_some(), EventField::Classification);
        touch(self.transparency.is_some(), EventField::Transparency);
        touch(self.start.is_some(), EventField::StartDate);
        touch(self.end.is_some(), EventField::EndDate);
        touch(self.rrule.is_touched(), EventField::RecurrenceRule);
        touch(self.recurrence_dates.is_some(), EventField::RecurrenceDates);
        touch(
            self.delete_exceptions.is_some(),
            EventField::DeleteExceptions,
        );
        touch(self.organizer.is_touched(), EventField::Organizer);
        touch(self.attendees.is_some(), EventField::Attendees);
        touch(self.attachments.is_some(), EventField::Attachments);
        touch(self.alarms.is_some(), EventField::Alarms);
        touch(self.uid.is_some(), EventField::Uid);
        touch(self.series_id.is_some(), EventField::SeriesId);
        touch(self.calendar_user.is_some(), EventField::CalendarUser);
        touch(self.folder_id.is_some(), EventField::Folder);
        touch(self.sequence.is_some(), EventField::Sequence);
        touch(self.created.is_some(), EventField::Created);
        touch(self.last_modified.is_some(), EventField::LastModified);

        touched
    }
}
