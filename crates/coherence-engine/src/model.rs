//! Core calendar data model — events, roles, recurrence identifiers.
//!
//! Everything here is a plain value. The engine never owns storage: callers
//! load full event graphs (event + attendees + exceptions), hand them in by
//! value, and adopt the values the engine returns. Cross-references between
//! events (master ↔ exception) are by identifier, never by live reference.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::alarm::Alarm;
use crate::attendee::Attendee;

/// Opaque event identifier, assigned by the storage collaborator.
pub type EventId = String;

/// Access classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Public,
    Confidential,
    Private,
}

impl Classification {
    /// Whether this classification is visible beyond the owner and attendees.
    pub fn is_public(self) -> bool {
        matches!(self, Classification::Public)
    }
}

/// Time transparency — only opaque events participate in conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    Opaque,
    Transparent,
}

/// Overall status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Geographic position attached to an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geo {
    pub latitude: f64,
    pub longitude: f64,
}

impl Geo {
    /// Whether the coordinates are within the legal WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// The organizer of a group-scheduled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organizer {
    /// Internal entity id, when the organizer is an internal calendar user.
    pub entity_id: Option<String>,
    /// External URI (e.g. `mailto:`), when the organizer is external.
    pub uri: Option<String>,
    /// Acting user when the organizer is represented (sent-by).
    pub sent_by: Option<String>,
}

/// A point in time carrying its rendering timezone.
///
/// `tz: None` marks a *floating* time — a wall-clock value interpreted in
/// each viewer's own timezone. Floating times still store a nominal UTC
/// instant so they remain comparable; conflict checks widen their search
/// window by a day in each direction to absorb the ambiguity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventInstant {
    pub instant: DateTime<Utc>,
    pub tz: Option<Tz>,
    pub all_day: bool,
}

impl EventInstant {
    /// A concrete zoned instant.
    pub fn zoned(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            instant,
            tz: Some(tz),
            all_day: false,
        }
    }

    /// A floating instant (no fixed timezone).
    pub fn floating(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            tz: None,
            all_day: false,
        }
    }

    /// An all-day date; the instant is midnight of that date.
    pub fn all_day(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            tz: None,
            all_day: true,
        }
    }

    /// Returns a copy shifted by the given offset, keeping tz and all-day.
    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            instant: self.instant + offset,
            ..*self
        }
    }
}

/// Range modifier on a recurrence identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceRange {
    /// The operation targets this occurrence and every later one.
    ThisAndFuture,
}

/// Identifies one occurrence of a series.
///
/// Equality, ordering and hashing consider the instant only: the range
/// marker modifies the *operation* an id is used in, not the identity of
/// the occurrence it names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecurrenceId {
    pub instant: DateTime<Utc>,
    pub range: Option<RecurrenceRange>,
}

impl RecurrenceId {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            range: None,
        }
    }

    pub fn this_and_future(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            range: Some(RecurrenceRange::ThisAndFuture),
        }
    }

    /// Returns a copy shifted by the given offset, keeping the range marker.
    pub fn shifted(&self, offset: Duration) -> Self {
        Self {
            instant: self.instant + offset,
            range: self.range,
        }
    }
}

impl PartialEq for RecurrenceId {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant
    }
}

impl Eq for RecurrenceId {}

impl PartialOrd for RecurrenceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecurrenceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.instant.cmp(&other.instant)
    }
}

impl std::hash::Hash for RecurrenceId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.instant.hash(state);
    }
}

/// What an event *is* within a series, matched exhaustively at entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRole {
    /// A standalone event — no series id, no recurrence id.
    Single,
    /// The event carrying the recurrence rule; anchors all occurrences.
    SeriesMaster { series_id: EventId },
    /// A persisted override of one occurrence.
    Exception {
        series_id: EventId,
        recurrence_id: RecurrenceId,
    },
}

/// A file or link attached to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub uri: String,
    pub name: Option<String>,
    pub size: Option<u64>,
}

/// An occurrence-bearing calendar event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub uid: String,
    pub role: EventRole,
    pub folder_id: String,
    pub created_by: String,
    /// The calendar user the event is booked for (may differ from creator
    /// in shared folders).
    pub calendar_user: String,

    pub summary: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<String>,
    pub categories: Vec<String>,
    pub geo: Option<Geo>,
    pub status: Option<EventStatus>,
    pub classification: Classification,
    pub transparency: Transparency,

    pub start: EventInstant,
    pub end: EventInstant,

    /// Recurrence rule; present only on a series master.
    pub rrule: Option<String>,
    /// Additional occurrence instants beyond the rule (RDATE).
    pub recurrence_dates: BTreeSet<DateTime<Utc>>,
    /// Occurrences overridden by a persisted exception event.
    pub change_exceptions: BTreeSet<RecurrenceId>,
    /// Occurrences removed from the series without an override.
    pub delete_exceptions: BTreeSet<RecurrenceId>,

    pub organizer: Option<Organizer>,
    pub attendees: Vec<Attendee>,
    pub attachments: Vec<Attachment>,
    pub alarms: Vec<Alarm>,

    /// Monotonically increasing change counter for scheduling messages.
    pub sequence: i64,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Correlation token linking the two halves of a split series.
    pub related_to: Option<String>,
}

impl Event {
    pub fn is_series_master(&self) -> bool {
        matches!(self.role, EventRole::SeriesMaster { .. })
    }

    pub fn series_id(&self) -> Option<&str> {
        match &self.role {
            EventRole::Single => None,
            EventRole::SeriesMaster { series_id } => Some(series_id),
            EventRole::Exception { series_id, .. } => Some(series_id),
        }
    }

    pub fn recurrence_id(&self) -> Option<RecurrenceId> {
        match &self.role {
            EventRole::Exception { recurrence_id, .. } => Some(*recurrence_id),
            _ => None,
        }
    }

    /// Fixed duration of the event (and of every occurrence, for a master).
    pub fn duration(&self) -> Duration {
        self.end.instant - self.start.instant
    }

    /// An event with attendees is group-scheduled and carries an organizer.
    pub fn is_group_scheduled(&self) -> bool {
        !self.attendees.is_empty()
    }

    /// Whether the given internal entity is the event's organizer.
    pub fn is_organized_by(&self, entity_id: &str) -> bool {
        self.organizer
            .as_ref()
            .and_then(|o| o.entity_id.as_deref())
            .is_some_and(|id| id == entity_id)
    }

    /// Looks up an internal attendee by entity id.
    pub fn find_attendee(&self, entity_id: &str) -> Option<&Attendee> {
        self.attendees
            .iter()
            .find(|a| a.entity_id() == Some(entity_id))
    }
}

/// Which calendar folder an event lives in; affects classification rules
/// and scheduling-field derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    /// A user's personal calendar.
    Private,
    /// A calendar shared by its owner with specific users.
    Shared,
    /// A public calendar visible to everyone.
    Public,
}

/// Folder context supplied by the caller alongside the event graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarFolder {
    pub id: String,
    pub kind: FolderKind,
    /// The calendar user the folder belongs to.
    pub owner: String,
}

/// The acting calendar user of an edit or conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub entity_id: String,
}

impl Principal {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
        }
    }
}

/// Added/updated/removed partition of a nested collection change.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionUpdate<T> {
    pub added: Vec<T>,
    pub updated: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> CollectionUpdate<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for CollectionUpdate<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}
