//! # coherence-engine
//!
//! Consistency and conflict-resolution engine for a multi-user calendar
//! service. It keeps a recurring event and its exceptions coherent as edits
//! are applied, detects double-booking conflicts across expanded
//! recurrences, and splits a recurring series into two independent series
//! at an arbitrary point in time.
//!
//! The engine is a pure library: it receives fully-loaded event graphs by
//! value, computes new values, and returns them for an external caller to
//! persist atomically. Storage, permissions and notification dispatch are
//! collaborators behind small traits; recurrence-rule evaluation goes
//! through a [`RecurrenceOracle`] backed by the `rrule` crate.
//!
//! ## Modules
//!
//! - [`delta`] — field-level difference between an event and a submitted update
//! - [`exceptions`] — change/delete-exception propagation on master updates
//! - [`conflict`] — double-booking search over expanded recurrences
//! - [`split`] — detaching the past portion of a series
//! - [`alarm`] — master→exception reminder propagation
//! - [`oracle`] — recurrence-rule evaluation
//! - [`model`], [`attendee`], [`fields`] — the calendar data model
//! - [`error`] — error taxonomy

pub mod alarm;
pub mod attendee;
pub mod conflict;
pub mod delta;
pub mod error;
pub mod exceptions;
pub mod fields;
pub mod model;
pub mod oracle;
pub mod rules;
pub mod split;

pub use alarm::{sync_alarms_to_exceptions, Alarm, AlarmAction, AlarmTrigger};
pub use attendee::{
    reconcile_attendees, Attendee, AttendeeRef, CuType, ParticipationStatus,
};
pub use conflict::{
    Conflict, ConflictConfig, ConflictDetector, ConflictEventView, EventDirectory,
    FolderPermission,
};
pub use delta::{needs_sequence_increment, DeltaComputer, EventUpdate};
pub use error::{CoherenceError, Result};
pub use exceptions::ExceptionPropagator;
pub use fields::{EventField, EventPatch, FieldPatch, FieldSet};
pub use model::{
    CalendarFolder, Classification, CollectionUpdate, Event, EventId, EventInstant, EventRole,
    FolderKind, Organizer, Principal, RecurrenceId, RecurrenceRange, Transparency,
};
pub use oracle::{occurrence_starts, RecurrenceOracle, RruleOracle};
pub use split::{SeriesSplitter, SplitOutcome, SplitResult};
