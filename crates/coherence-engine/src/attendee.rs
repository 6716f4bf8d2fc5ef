//! Attendee model and list reconciliation.
//!
//! Attendee-list updates are never a naive replacement: the submitted list
//! is matched against the stored one by the attendee's immutable identity
//! triple, yielding an added/updated/removed partition. Only the mutable
//! per-attendee fields (status, comment, folder, reply timestamp) can ever
//! change on a matched attendee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CollectionUpdate;

/// Who the attendee is — an internal entity or an external URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttendeeRef {
    /// Internal calendar user or booked resource.
    Internal { entity_id: String },
    /// External participant addressed by URI (e.g. `mailto:`).
    External { uri: String },
}

/// Calendar user type of an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CuType {
    Individual,
    Resource,
    Room,
    Group,
}

impl CuType {
    /// Rooms and resources produce *hard* conflicts when double-booked.
    pub fn is_bookable_unit(self) -> bool {
        matches!(self, CuType::Resource | CuType::Room)
    }
}

/// Participation status of an attendee (PARTSTAT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipationStatus {
    NeedsAction,
    Accepted,
    Declined,
    Tentative,
}

/// A participant of a group-scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub entity: AttendeeRef,
    pub cu_type: CuType,
    /// Group membership this attendee was resolved from, if any.
    pub member_of: Option<String>,
    pub status: ParticipationStatus,
    /// The attendee's personal folder holding their copy of the event.
    pub folder_id: Option<String>,
    pub comment: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
}

/// The immutable identity of an attendee within an event.
pub type AttendeeKey<'a> = (&'a AttendeeRef, CuType, Option<&'a str>);

impl Attendee {
    /// A plain internal individual in needs-action state.
    pub fn individual(entity_id: impl Into<String>) -> Self {
        Self {
            entity: AttendeeRef::Internal {
                entity_id: entity_id.into(),
            },
            cu_type: CuType::Individual,
            member_of: None,
            status: ParticipationStatus::NeedsAction,
            folder_id: None,
            comment: None,
            replied_at: None,
        }
    }

    /// An internal resource or room attendee.
    pub fn resource(entity_id: impl Into<String>, cu_type: CuType) -> Self {
        Self {
            cu_type,
            ..Self::individual(entity_id)
        }
    }

    /// The identifying triple; fixed for the lifetime of the attendee.
    pub fn key(&self) -> AttendeeKey<'_> {
        (&self.entity, self.cu_type, self.member_of.as_deref())
    }

    /// Internal entity id, when the attendee is internal.
    pub fn entity_id(&self) -> Option<&str> {
        match &self.entity {
            AttendeeRef::Internal { entity_id } => Some(entity_id),
            AttendeeRef::External { .. } => None,
        }
    }

    /// Whether the updatable fields differ from `other`.
    fn updatable_fields_differ(&self, other: &Attendee) -> bool {
        self.status != other.status
            || self.comment != other.comment
            || self.folder_id != other.folder_id
            || self.replied_at != other.replied_at
    }
}

/// Reconcile a submitted attendee list against the stored one.
///
/// Matching is by [`Attendee::key`]. A submitted attendee whose key is
/// unknown is an addition; a stored attendee missing from the submission is
/// a removal; a matched attendee whose mutable fields differ is an update
/// (carrying the submitted state). Identity fields of matched attendees are
/// taken from the stored copy, so an attempted rewrite of the triple
/// surfaces as a remove+add pair instead of a silent mutation.
pub fn reconcile_attendees(
    original: &[Attendee],
    submitted: &[Attendee],
) -> CollectionUpdate<Attendee> {
    let mut update = CollectionUpdate::default();

    for incoming in submitted {
        match original.iter().find(|a| a.key() == incoming.key()) {
            None => update.added.push(incoming.clone()),
            Some(stored) => {
                if stored.updatable_fields_differ(incoming) {
                    update.updated.push(incoming.clone());
                }
            }
        }
    }

    for stored in original {
        if !submitted.iter().any(|a| a.key() == stored.key()) {
            update.removed.push(stored.clone());
        }
    }

    update
}

/// Apply a reconciliation result to a stored attendee list, producing the
/// new list in stored-then-added order.
pub fn apply_attendee_update(
    original: &[Attendee],
    update: &CollectionUpdate<Attendee>,
) -> Vec<Attendee> {
    let mut result: Vec<Attendee> = original
        .iter()
        .filter(|a| !update.removed.iter().any(|r| r.key() == a.key()))
        .map(|a| {
            match update.updated.iter().find(|u| u.key() == a.key()) {
                Some(updated) => updated.clone(),
                None => a.clone(),
            }
        })
        .collect();
    result.extend(update.added.iter().cloned());
    result
}
