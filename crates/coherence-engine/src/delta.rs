//! Field-level delta computation for client-submitted event updates.
//!
//! The pipeline is fixed: derive the touched-field set, restrict it for
//! non-organizer attendees, apply the patch onto a copy of the original
//! (attendee lists go through reconciliation, never naive replacement), run
//! the per-field integrity checks, run the consistency derivations, then
//! diff original against the fully-consistent result. If any step fails the
//! whole operation aborts; no partial state ever leaves this module.

use chrono::{DateTime, Duration, Utc};

use crate::alarm::Alarm;
use crate::attendee::{apply_attendee_update, reconcile_attendees, Attendee, CuType};
use crate::error::{CoherenceError, Result};
use crate::exceptions::ExceptionPropagator;
use crate::fields::{
    attendee_writable_fields, sequence_relevant_fields, server_derived_fields, EventField,
    EventPatch, FieldSet,
};
use crate::model::{
    Attachment, CalendarFolder, CollectionUpdate, Event, EventInstant, EventRole, FolderKind,
    Organizer, Principal,
};
use crate::oracle::RecurrenceOracle;
use crate::rules;

/// The computed difference between an original event and its consistent
/// updated state. Consumed immediately by the storage-write step and by
/// notification dispatch; never persisted itself.
#[derive(Debug, Clone)]
pub struct EventUpdate {
    pub original: Event,
    pub updated: Event,
    pub changed_fields: FieldSet,
    pub attendee_changes: CollectionUpdate<Attendee>,
    pub attachment_changes: CollectionUpdate<Attachment>,
    pub alarm_changes: CollectionUpdate<Alarm>,
    /// For a series master: the adjusted change-exception events.
    pub exception_updates: Vec<Event>,
}

/// Computes [`EventUpdate`]s from client patches.
pub struct DeltaComputer<'a, O: RecurrenceOracle + ?Sized> {
    oracle: &'a O,
    now: DateTime<Utc>,
}

impl<'a, O: RecurrenceOracle + ?Sized> DeltaComputer<'a, O> {
    /// `now` is injected so the whole computation stays deterministic.
    pub fn new(oracle: &'a O, now: DateTime<Utc>) -> Self {
        Self { oracle, now }
    }

    /// Compute the delta for a submitted update.
    ///
    /// `original_exceptions` carries the master's change-exception events
    /// when `original` is a series master (empty otherwise); `folder` is the
    /// calendar folder the event lives in.
    pub fn compute(
        &self,
        original: &Event,
        original_exceptions: &[Event],
        patch: &EventPatch,
        ignored: &FieldSet,
        principal: &Principal,
        folder: &CalendarFolder,
    ) -> Result<EventUpdate> {
        // Step 1: what did the client actually touch?
        let mut touched = patch.touched_fields();
        for field in ignored.iter().chain(server_derived_fields().iter()) {
            touched.remove(field);
        }

        self.check_immutable_fields(original, patch, &touched)?;

        // Step 3: apply the touched fields onto a copy.
        let mut changed = original.clone();
        apply_patch(&mut changed, patch, &touched);
        if touched.contains(&EventField::Attendees) {
            if let Some(submitted) = &patch.attendees {
                let reconciled = reconcile_attendees(&original.attendees, submitted);
                changed.attendees = apply_attendee_update(&original.attendees, &reconciled);
            }
        }

        // Step 2: a non-organizer attendee gets a narrow edit surface.
        self.check_attendee_restriction(original, &changed, principal)?;

        // Step 4: integrity checks on every touched field.
        self.check_integrity(original, &changed, &touched, folder)?;

        // Step 5: consistency derivations.
        normalize_all_day(&mut changed);
        self.fold_equivalent_rule(original, &mut changed);
        self.check_delete_exceptions(original, &changed, &touched)?;
        apply_series_transition(original, &mut changed);
        derive_scheduling_fields(original, &mut changed, folder);
        self.reset_participation_status(original, &mut changed, principal);

        // Step 6: exception adjustment for series masters, then the diff.
        let exception_updates = if original.is_series_master() {
            let (master, exceptions) =
                ExceptionPropagator::new(self.oracle).adjust(original, &changed, original_exceptions)?;
            changed = master;
            exceptions
        } else {
            Vec::new()
        };

        let attendee_changes = reconcile_attendees(&original.attendees, &changed.attendees);
        let attachment_changes = diff_attachments(&original.attachments, &changed.attachments);
        let alarm_changes = match &patch.alarms {
            Some(submitted) => diff_alarms(&original.alarms, submitted),
            None => CollectionUpdate::default(),
        };

        let mut changed_fields = diff_fields(original, &changed);
        if needs_sequence_increment(&changed_fields, &attendee_changes) {
            changed.sequence = original.sequence + 1;
            changed_fields.insert(EventField::Sequence);
        }
        changed.last_modified = self.now;
        changed_fields.insert(EventField::LastModified);

        Ok(EventUpdate {
            original: original.clone(),
            updated: changed,
            changed_fields,
            attendee_changes,
            attachment_changes,
            alarm_changes,
            exception_updates,
        })
    }

    /// UID, series id and calendar user can never change.
    fn check_immutable_fields(
        &self,
        original: &Event,
        patch: &EventPatch,
        touched: &FieldSet,
    ) -> Result<()> {
        if touched.contains(&EventField::Uid)
            && patch.uid.as_deref().is_some_and(|uid| uid != original.uid)
        {
            return Err(forbidden(EventField::Uid, "the UID of an event is immutable"));
        }
        if touched.contains(&EventField::SeriesId)
            && patch.series_id.as_deref() != original.series_id()
        {
            return Err(forbidden(
                EventField::SeriesId,
                "the series id of an event is immutable",
            ));
        }
        if touched.contains(&EventField::CalendarUser)
            && patch
                .calendar_user
                .as_deref()
                .is_some_and(|cu| cu != original.calendar_user)
        {
            return Err(forbidden(
                EventField::CalendarUser,
                "the calendar user of an event is immutable",
            ));
        }
        Ok(())
    }

    /// A non-organizer attendee may only adjust alarms, the attendee list,
    /// transparency and delete exceptions. Any other field that actually
    /// differs is rejected; touched-but-equal fields are silently dropped.
    fn check_attendee_restriction(
        &self,
        original: &Event,
        changed: &Event,
        principal: &Principal,
    ) -> Result<()> {
        if !original.is_group_scheduled()
            || original.is_organized_by(&principal.entity_id)
            || original.find_attendee(&principal.entity_id).is_none()
        {
            return Ok(());
        }

        let allowed = attendee_writable_fields();
        for field in diff_fields(original, changed) {
            if !allowed.contains(&field) {
                return Err(forbidden(
                    field,
                    "only the organizer may change this field",
                ));
            }
        }
        Ok(())
    }

    /// The per-field integrity check table.
    fn check_integrity(
        &self,
        original: &Event,
        changed: &Event,
        touched: &FieldSet,
        folder: &CalendarFolder,
    ) -> Result<()> {
        if let Some(geo) = &changed.geo {
            if touched.contains(&EventField::Geo) && !geo.is_valid() {
                return Err(CoherenceError::Validation {
                    field: EventField::Geo,
                    message: format!(
                        "coordinates ({}, {}) are out of range",
                        geo.latitude, geo.longitude
                    ),
                });
            }
        }

        if changed.start.instant > changed.end.instant {
            return Err(CoherenceError::Validation {
                field: EventField::StartDate,
                message: "the start date must not be after the end date".into(),
            });
        }

        if touched.contains(&EventField::Classification) {
            check_classification(original, changed, folder)?;
        }

        if touched.contains(&EventField::RecurrenceRule) {
            self.check_rule(original, changed)?;
        }

        if (touched.contains(&EventField::Organizer) || touched.contains(&EventField::Attendees))
            && changed.is_group_scheduled()
        {
            check_organizer_is_attendee(changed)?;
        }

        Ok(())
    }

    /// A changed rule must parse; setting one on a change exception is
    /// forbidden (clearing is fine).
    fn check_rule(&self, original: &Event, changed: &Event) -> Result<()> {
        if changed.rrule == original.rrule {
            return Ok(());
        }
        let Some(rule) = changed.rrule.as_deref() else {
            return Ok(());
        };
        if matches!(changed.role, EventRole::Exception { .. }) {
            return Err(forbidden(
                EventField::RecurrenceRule,
                "a change exception cannot carry its own recurrence rule",
            ));
        }
        // Parsing through the oracle doubles as validation.
        self.oracle.first_occurrence(rule, &changed.start)?;
        Ok(())
    }

    /// A rule that is semantically identical to the original (formatting
    /// aside) is folded back to the original string and treated as unchanged.
    fn fold_equivalent_rule(&self, original: &Event, changed: &mut Event) {
        if let (Some(old), Some(new)) = (original.rrule.as_deref(), changed.rrule.as_deref()) {
            if old != new && rules::rules_equivalent(old, new) {
                changed.rrule = original.rrule.clone();
            }
        }
    }

    /// Newly added delete exceptions must denote legal occurrences.
    fn check_delete_exceptions(
        &self,
        original: &Event,
        changed: &Event,
        touched: &FieldSet,
    ) -> Result<()> {
        if !touched.contains(&EventField::DeleteExceptions) {
            return Ok(());
        }
        let Some(rule) = changed.rrule.as_deref() else {
            return Ok(());
        };
        for id in changed
            .delete_exceptions
            .difference(&original.delete_exceptions)
        {
            let legal = changed.recurrence_dates.contains(&id.instant)
                || self.oracle.is_occurrence(rule, &changed.start, id.instant)?;
            if !legal {
                return Err(CoherenceError::NotFound(format!(
                    "{} is not an occurrence of this series",
                    id.instant
                )));
            }
        }
        Ok(())
    }

    /// Organizer-only: reset individual attendees to needs-action when the
    /// update can surprise them with new or moved occurrences.
    fn reset_participation_status(
        &self,
        original: &Event,
        changed: &mut Event,
        principal: &Principal,
    ) {
        if !original.is_organized_by(&principal.entity_id) {
            return;
        }
        if !update_requires_reply_reset(original, changed) {
            return;
        }

        for attendee in &mut changed.attendees {
            if attendee.cu_type != CuType::Individual {
                continue;
            }
            if attendee.entity_id() == Some(principal.entity_id.as_str()) {
                continue;
            }
            attendee.status = crate::attendee::ParticipationStatus::NeedsAction;
            attendee.comment = None;
        }
    }
}

/// Whether an update widens the set of occurrences attendees committed to:
/// a rule change yielding further occurrences, a reinstated delete
/// exception, an added recurrence date, or a start/end expansion.
pub fn update_requires_reply_reset(original: &Event, changed: &Event) -> bool {
    let rule_adds_occurrences = match (original.rrule.as_deref(), changed.rrule.as_deref()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => old != new && rules::produces_further_occurrences(old, new),
    };
    if rule_adds_occurrences {
        return true;
    }

    // A delete exception that vanished reinstates an occurrence.
    if original
        .delete_exceptions
        .iter()
        .any(|id| !changed.delete_exceptions.contains(id))
    {
        return true;
    }

    if changed
        .recurrence_dates
        .iter()
        .any(|d| !original.recurrence_dates.contains(d))
    {
        return true;
    }

    changed.start.instant < original.start.instant
        || changed.end.instant > original.end.instant
}

/// Whether the change bumps the sequence number: a scheduling-relevant field
/// differs, or an attendee was added or removed (not merely status-changed).
pub fn needs_sequence_increment(
    changed_fields: &FieldSet,
    attendee_changes: &CollectionUpdate<Attendee>,
) -> bool {
    changed_fields
        .intersection(&sequence_relevant_fields())
        .next()
        .is_some()
        || !attendee_changes.added.is_empty()
        || !attendee_changes.removed.is_empty()
}

/// Compare two events field by field.
pub fn diff_fields(original: &Event, changed: &Event) -> FieldSet {
    EventField::ALL
        .into_iter()
        .filter(|field| field_differs(original, changed, *field))
        .collect()
}

fn field_differs(a: &Event, b: &Event, field: EventField) -> bool {
    match field {
        EventField::Uid => a.uid != b.uid,
        EventField::SeriesId => a.series_id() != b.series_id(),
        EventField::Folder => a.folder_id != b.folder_id,
        EventField::CalendarUser => a.calendar_user != b.calendar_user,
        EventField::CreatedBy => a.created_by != b.created_by,
        EventField::Summary => a.summary != b.summary,
        EventField::Location => a.location != b.location,
        EventField::Description => a.description != b.description,
        EventField::Url => a.url != b.url,
        EventField::Color => a.color != b.color,
        EventField::Categories => a.categories != b.categories,
        EventField::Geo => a.geo != b.geo,
        EventField::Status => a.status != b.status,
        EventField::Classification => a.classification != b.classification,
        EventField::Transparency => a.transparency != b.transparency,
        EventField::StartDate => a.start != b.start,
        EventField::EndDate => a.end != b.end,
        EventField::RecurrenceRule => a.rrule != b.rrule,
        EventField::RecurrenceDates => a.recurrence_dates != b.recurrence_dates,
        EventField::ChangeExceptions => a.change_exceptions != b.change_exceptions,
        EventField::DeleteExceptions => a.delete_exceptions != b.delete_exceptions,
        EventField::Organizer => a.organizer != b.organizer,
        EventField::Attendees => a.attendees != b.attendees,
        EventField::Attachments => a.attachments != b.attachments,
        EventField::Alarms => a.alarms != b.alarms,
        EventField::Sequence => a.sequence != b.sequence,
        EventField::Created => a.created != b.created,
        EventField::LastModified => a.last_modified != b.last_modified,
        EventField::RelatedTo => a.related_to != b.related_to,
    }
}

/// Apply every touched scalar field of the patch onto the copy. Attendees
/// are handled separately via reconciliation.
fn apply_patch(changed: &mut Event, patch: &EventPatch, touched: &FieldSet) {
    let on = |field: EventField| touched.contains(&field);

    if on(EventField::Summary) {
        patch.summary.apply(&mut changed.summary);
    }
    if on(EventField::Location) {
        patch.location.apply(&mut changed.location);
    }
    if on(EventField::Description) {
        patch.description.apply(&mut changed.description);
    }
    if on(EventField::Url) {
        patch.url.apply(&mut changed.url);
    }
    if on(EventField::Color) {
        patch.color.apply(&mut changed.color);
    }
    if on(EventField::Categories) {
        if let Some(categories) = &patch.categories {
            changed.categories = categories.clone();
        }
    }
    if on(EventField::Geo) {
        patch.geo.apply(&mut changed.geo);
    }
    if on(EventField::Status) {
        patch.status.apply(&mut changed.status);
    }
    if on(EventField::Classification) {
        if let Some(classification) = patch.classification {
            changed.classification = classification;
        }
    }
    if on(EventField::Transparency) {
        if let Some(transparency) = patch.transparency {
            changed.transparency = transparency;
        }
    }
    if on(EventField::StartDate) {
        if let Some(start) = patch.start {
            changed.start = start;
        }
    }
    if on(EventField::EndDate) {
        if let Some(end) = patch.end {
            changed.end = end;
        }
    }
    if on(EventField::RecurrenceRule) {
        patch.rrule.apply(&mut changed.rrule);
    }
    if on(EventField::RecurrenceDates) {
        if let Some(dates) = &patch.recurrence_dates {
            changed.recurrence_dates = dates.clone();
        }
    }
    if on(EventField::DeleteExceptions) {
        if let Some(ids) = &patch.delete_exceptions {
            changed.delete_exceptions = ids.clone();
        }
    }
    if on(EventField::Organizer) {
        patch.organizer.apply(&mut changed.organizer);
    }
    if on(EventField::Attachments) {
        if let Some(attachments) = &patch.attachments {
            changed.attachments = attachments.clone();
        }
    }
}

/// Classification rules: private events cannot live in public folders, and
/// once a series has change exceptions (or the event *is* one), its
/// visibility cannot cross the public/non-public boundary.
fn check_classification(original: &Event, changed: &Event, folder: &CalendarFolder) -> Result<()> {
    if folder.kind == FolderKind::Public && changed.classification == crate::model::Classification::Private
    {
        return Err(CoherenceError::Validation {
            field: EventField::Classification,
            message: "private events are not allowed in public folders".into(),
        });
    }

    let crosses_boundary =
        original.classification.is_public() != changed.classification.is_public();
    let boundary_locked = matches!(changed.role, EventRole::Exception { .. })
        || (original.is_series_master() && !original.change_exceptions.is_empty());
    if crosses_boundary && boundary_locked {
        return Err(forbidden(
            EventField::Classification,
            "cannot change visibility across an exception boundary",
        ));
    }
    Ok(())
}

fn check_organizer_is_attendee(changed: &Event) -> Result<()> {
    let Some(organizer) = &changed.organizer else {
        return Ok(());
    };
    let Some(entity_id) = organizer.entity_id.as_deref() else {
        // External organizers are not required to appear as attendees.
        return Ok(());
    };
    if changed.find_attendee(entity_id).is_none() {
        return Err(CoherenceError::Validation {
            field: EventField::Organizer,
            message: "the organizer must be an attendee of the event".into(),
        });
    }
    Ok(())
}

/// All-day events snap to date boundaries and lose their timezone.
fn normalize_all_day(changed: &mut Event) {
    if !changed.start.all_day {
        return;
    }
    let truncate = |instant: &mut EventInstant, round_up: bool| {
        let date = instant.instant.date_naive();
        let mut normalized = date.and_time(chrono::NaiveTime::MIN).and_utc();
        if round_up && normalized != instant.instant {
            normalized += Duration::days(1);
        }
        *instant = EventInstant {
            instant: normalized,
            tz: None,
            all_day: true,
        };
    };
    truncate(&mut changed.start, false);
    truncate(&mut changed.end, true);
}

/// Series membership transitions: gaining a rule turns a single event into
/// a self-anchored series master; the master→single direction is handled by
/// the exception propagator.
fn apply_series_transition(original: &Event, changed: &mut Event) {
    if original.role == EventRole::Single && changed.rrule.is_some() {
        changed.role = EventRole::SeriesMaster {
            series_id: changed.id.clone(),
        };
        changed.change_exceptions.clear();
        changed.delete_exceptions.clear();
    }
}

/// Scheduling-field derivation: a group-scheduled event needs an organizer
/// (defaulting to the folder owner in shared folders, the calendar user
/// otherwise); an event without attendees carries none. When an event
/// becomes group-scheduled, the organizer joins the attendee list.
fn derive_scheduling_fields(original: &Event, changed: &mut Event, folder: &CalendarFolder) {
    if !changed.is_group_scheduled() {
        changed.organizer = None;
        return;
    }

    if changed.organizer.is_none() {
        let entity = match folder.kind {
            FolderKind::Shared | FolderKind::Public => folder.owner.clone(),
            FolderKind::Private => changed.calendar_user.clone(),
        };
        changed.organizer = Some(Organizer {
            entity_id: Some(entity),
            uri: None,
            sent_by: None,
        });
    }

    // First transition to group-scheduled: the organizer becomes an
    // accepted attendee if not already listed.
    if !original.is_group_scheduled() {
        if let Some(entity_id) = changed
            .organizer
            .as_ref()
            .and_then(|o| o.entity_id.clone())
        {
            if changed.find_attendee(&entity_id).is_none() {
                let mut attendee = Attendee::individual(entity_id);
                attendee.status = crate::attendee::ParticipationStatus::Accepted;
                changed.attendees.push(attendee);
            }
        }
    }
}

/// Alarm collection diff, keyed by alarm id.
fn diff_alarms(original: &[Alarm], submitted: &[Alarm]) -> CollectionUpdate<Alarm> {
    let mut update = CollectionUpdate::default();
    for incoming in submitted {
        match original.iter().find(|a| a.id == incoming.id) {
            None => update.added.push(incoming.clone()),
            Some(stored) if stored != incoming => update.updated.push(incoming.clone()),
            Some(_) => {}
        }
    }
    for stored in original {
        if !submitted.iter().any(|a| a.id == stored.id) {
            update.removed.push(stored.clone());
        }
    }
    update
}

/// Attachment collection diff, keyed by URI.
fn diff_attachments(original: &[Attachment], changed: &[Attachment]) -> CollectionUpdate<Attachment> {
    let mut update = CollectionUpdate::default();
    for incoming in changed {
        match original.iter().find(|a| a.uri == incoming.uri) {
            None => update.added.push(incoming.clone()),
            Some(stored) if stored != incoming => update.updated.push(incoming.clone()),
            Some(_) => {}
        }
    }
    for stored in original {
        if !changed.iter().any(|a| a.uri == stored.uri) {
            update.removed.push(stored.clone());
        }
    }
    update
}

fn forbidden(field: EventField, message: &str) -> CoherenceError {
    CoherenceError::Forbidden {
        field,
        message: message.into(),
    }
}
