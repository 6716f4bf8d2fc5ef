//! Tests for field-level delta computation.

mod common;

use chrono::Duration;
use coherence_engine::attendee::{reconcile_attendees, Attendee, ParticipationStatus};
use coherence_engine::delta::DeltaComputer;
use coherence_engine::error::CoherenceError;
use coherence_engine::fields::{EventField, EventPatch, FieldPatch, FieldSet};
use coherence_engine::model::{Classification, EventInstant, EventRole, Geo, RecurrenceId};
use coherence_engine::oracle::RruleOracle;

use common::{
    accepted, attach_exception, event, folder, organized_by, principal, series, utc,
};

fn computer(oracle: &RruleOracle) -> DeltaComputer<'_, RruleOracle> {
    DeltaComputer::new(oracle, utc(2026, 1, 1, 12, 0))
}

#[test]
fn untouched_patch_changes_only_last_modified() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);

    let update = computer(&oracle)
        .compute(
            &original,
            &[],
            &EventPatch::default(),
            &FieldSet::new(),
            &principal("alice"),
            &folder(),
        )
        .expect("empty patch should succeed");

    assert_eq!(
        update.changed_fields.into_iter().collect::<Vec<_>>(),
        vec![EventField::LastModified]
    );
    assert_eq!(update.updated.sequence, original.sequence);
}

#[test]
fn summary_change_bumps_sequence() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        summary: FieldPatch::Set("Sprint review".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert!(update.changed_fields.contains(&EventField::Summary));
    assert_eq!(update.updated.sequence, original.sequence + 1);
}

#[test]
fn description_change_keeps_sequence() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        description: FieldPatch::Set("Agenda attached".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.updated.sequence, original.sequence);
}

#[test]
fn attendee_status_change_does_not_bump_sequence() {
    let oracle = RruleOracle::default();
    let mut original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let mut submitted = original.attendees.clone();
    submitted[1].status = ParticipationStatus::Tentative;
    let patch = EventPatch {
        attendees: Some(submitted),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.attendee_changes.updated.len(), 1);
    assert_eq!(update.updated.sequence, original.sequence);
}

#[test]
fn attendee_addition_bumps_sequence() {
    let oracle = RruleOracle::default();
    let mut original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    organized_by(&mut original, "alice");

    let mut submitted = original.attendees.clone();
    submitted.push(Attendee::individual("bob"));
    let patch = EventPatch {
        attendees: Some(submitted),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.attendee_changes.added.len(), 1);
    assert_eq!(update.updated.sequence, original.sequence + 1);
}

#[test]
fn uid_change_is_forbidden() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        uid: Some("other-uid".to_string()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Forbidden {
            field: EventField::Uid,
            ..
        })
    ));
}

#[test]
fn calendar_user_change_is_forbidden() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        calendar_user: Some("mallory".to_string()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Forbidden {
            field: EventField::CalendarUser,
            ..
        })
    ));
}

#[test]
fn out_of_range_geo_is_rejected() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        geo: FieldPatch::Set(Geo {
            latitude: 120.0,
            longitude: 8.5,
        }),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Validation {
            field: EventField::Geo,
            ..
        })
    ));
}

#[test]
fn start_after_end_is_rejected() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        start: Some(EventInstant::zoned(utc(2026, 3, 2, 11, 0), chrono_tz::UTC)),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Validation {
            field: EventField::StartDate,
            ..
        })
    ));
}

#[test]
fn equivalent_rule_is_folded_back_to_the_original() {
    let oracle = RruleOracle::default();
    let original = series("s1", "FREQ=WEEKLY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    // Same semantics, different formatting: explicit INTERVAL=1, swapped parts.
    let patch = EventPatch {
        rrule: FieldPatch::Set("COUNT=5;INTERVAL=1;FREQ=WEEKLY".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.updated.rrule.as_deref(), Some("FREQ=WEEKLY;COUNT=5"));
    assert!(!update.changed_fields.contains(&EventField::RecurrenceRule));
    assert_eq!(update.updated.sequence, original.sequence);
}

#[test]
fn an_empty_rule_string_is_rejected() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        rrule: FieldPatch::Set(String::new()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(result, Err(CoherenceError::InvalidRule(_))));
}

#[test]
fn an_unparseable_rule_is_rejected() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=SOMETIMES".to_string()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(result, Err(CoherenceError::InvalidRule(_))));
}

#[test]
fn rule_on_a_change_exception_is_forbidden() {
    let oracle = RruleOracle::default();
    let mut master = series("s1", "FREQ=DAILY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    let exc = attach_exception(&mut master, utc(2026, 3, 3, 10, 0));

    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=DAILY".to_string()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &exc,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Forbidden {
            field: EventField::RecurrenceRule,
            ..
        })
    ));
}

#[test]
fn non_organizer_attendee_cannot_rewrite_the_summary() {
    let oracle = RruleOracle::default();
    let mut original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let patch = EventPatch {
        summary: FieldPatch::Set("Bob's agenda".to_string()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &original,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("bob"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Forbidden {
            field: EventField::Summary,
            ..
        })
    ));
}

#[test]
fn non_organizer_attendee_may_change_transparency() {
    let oracle = RruleOracle::default();
    let mut original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let patch = EventPatch {
        transparency: Some(coherence_engine::model::Transparency::Transparent),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("bob"), &folder())
        .expect("transparency is attendee-writable");

    assert!(update.changed_fields.contains(&EventField::Transparency));
}

#[test]
fn count_increase_by_organizer_resets_individual_attendees() {
    let oracle = RruleOracle::default();
    let mut original = series("s1", "FREQ=WEEKLY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    organized_by(&mut original, "alice");
    let mut bob = accepted("bob");
    bob.comment = Some("looking forward to it".to_string());
    original.attendees.push(bob);

    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=WEEKLY;COUNT=8".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    let bob = update.updated.find_attendee("bob").unwrap();
    assert_eq!(bob.status, ParticipationStatus::NeedsAction);
    assert_eq!(bob.comment, None);
    // The acting organizer's own record is never reset.
    let alice = update.updated.find_attendee("alice").unwrap();
    assert_eq!(alice.status, ParticipationStatus::Accepted);
}

#[test]
fn count_increase_by_non_organizer_performs_no_reset() {
    let oracle = RruleOracle::default();
    let mut original = series("s1", "FREQ=WEEKLY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=WEEKLY;COUNT=8".to_string()),
        ..EventPatch::default()
    };

    // Carol edits through folder access; she is neither organizer nor attendee.
    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("carol"), &folder())
        .unwrap();

    let bob = update.updated.find_attendee("bob").unwrap();
    assert_eq!(bob.status, ParticipationStatus::Accepted);
}

#[test]
fn count_decrease_performs_no_reset() {
    let oracle = RruleOracle::default();
    let mut original = series("s1", "FREQ=WEEKLY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=WEEKLY;COUNT=3".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(
        update.updated.find_attendee("bob").unwrap().status,
        ParticipationStatus::Accepted
    );
}

#[test]
fn reinstated_delete_exception_resets_attendees() {
    let oracle = RruleOracle::default();
    let mut original = series("s1", "FREQ=DAILY;COUNT=10", utc(2026, 3, 2, 10, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));
    original
        .delete_exceptions
        .insert(RecurrenceId::new(utc(2026, 3, 4, 10, 0)));

    let patch = EventPatch {
        delete_exceptions: Some(Default::default()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(
        update.updated.find_attendee("bob").unwrap().status,
        ParticipationStatus::NeedsAction
    );
}

#[test]
fn earlier_start_resets_attendees() {
    let oracle = RruleOracle::default();
    let mut original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    organized_by(&mut original, "alice");
    original.attendees.push(accepted("bob"));

    let patch = EventPatch {
        start: Some(EventInstant::zoned(utc(2026, 3, 2, 8, 0), chrono_tz::UTC)),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(
        update.updated.find_attendee("bob").unwrap().status,
        ParticipationStatus::NeedsAction
    );
}

#[test]
fn classification_change_across_exception_boundary_is_forbidden() {
    let oracle = RruleOracle::default();
    let mut master = series("s1", "FREQ=DAILY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    master.classification = Classification::Confidential;
    let mut exc = attach_exception(&mut master, utc(2026, 3, 3, 10, 0));
    exc.classification = Classification::Confidential;

    let patch = EventPatch {
        classification: Some(Classification::Public),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &master,
        &[exc],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(
        result,
        Err(CoherenceError::Forbidden {
            field: EventField::Classification,
            ..
        })
    ));
}

#[test]
fn classification_change_without_exceptions_is_accepted() {
    let oracle = RruleOracle::default();
    let master = series("s1", "FREQ=DAILY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);
    assert_eq!(master.classification, Classification::Public);

    let patch = EventPatch {
        classification: Some(Classification::Confidential),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&master, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .expect("no exception diverges, so the boundary is not locked");

    assert_eq!(update.updated.classification, Classification::Confidential);
}

#[test]
fn adding_a_rule_turns_a_single_event_into_a_master() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);

    let patch = EventPatch {
        rrule: FieldPatch::Set("FREQ=DAILY;COUNT=3".to_string()),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(
        update.updated.role,
        EventRole::SeriesMaster {
            series_id: "e1".to_string()
        }
    );
}

#[test]
fn new_delete_exception_must_be_a_legal_occurrence() {
    let oracle = RruleOracle::default();
    let master = series("s1", "FREQ=DAILY;COUNT=5", utc(2026, 3, 2, 10, 0), 60);

    // 10:30 is not an occurrence of the daily-at-10:00 series.
    let bogus = RecurrenceId::new(utc(2026, 3, 3, 10, 30));
    let patch = EventPatch {
        delete_exceptions: Some([bogus].into_iter().collect()),
        ..EventPatch::default()
    };

    let result = computer(&oracle).compute(
        &master,
        &[],
        &patch,
        &FieldSet::new(),
        &principal("alice"),
        &folder(),
    );

    assert!(matches!(result, Err(CoherenceError::NotFound(_))));
}

#[test]
fn reconciliation_partitions_added_updated_removed() {
    let stored = vec![accepted("alice"), accepted("bob")];
    let mut submitted = vec![stored[0].clone(), Attendee::individual("carol")];
    submitted[0].status = ParticipationStatus::Tentative;

    let update = reconcile_attendees(&stored, &submitted);

    assert_eq!(update.added.len(), 1);
    assert_eq!(update.added[0].entity_id(), Some("carol"));
    assert_eq!(update.updated.len(), 1);
    assert_eq!(update.updated[0].status, ParticipationStatus::Tentative);
    assert_eq!(update.removed.len(), 1);
    assert_eq!(update.removed[0].entity_id(), Some("bob"));
}

#[test]
fn ignored_fields_are_dropped_from_the_touched_set() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);
    let patch = EventPatch {
        summary: FieldPatch::Set("ignored".to_string()),
        ..EventPatch::default()
    };
    let ignored: FieldSet = [EventField::Summary].into_iter().collect();

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &ignored, &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.updated.summary, original.summary);
    assert!(!update.changed_fields.contains(&EventField::Summary));
}

#[test]
fn all_day_events_snap_to_date_boundaries() {
    let oracle = RruleOracle::default();
    let original = event("e1", utc(2026, 3, 2, 9, 0), 60);

    let patch = EventPatch {
        start: Some(EventInstant::all_day(utc(2026, 3, 2, 0, 0))),
        end: Some(EventInstant {
            instant: utc(2026, 3, 2, 15, 30),
            tz: None,
            all_day: true,
        }),
        ..EventPatch::default()
    };

    let update = computer(&oracle)
        .compute(&original, &[], &patch, &FieldSet::new(), &principal("alice"), &folder())
        .unwrap();

    assert_eq!(update.updated.start.instant, utc(2026, 3, 2, 0, 0));
    // A partial final day rounds up to the next midnight.
    assert_eq!(update.updated.end.instant, utc(2026, 3, 3, 0, 0));
    assert_eq!(
        update.updated.end.instant - update.updated.start.instant,
        Duration::days(1)
    );
}
