//! Exception-set propagation for series-master updates.
//!
//! When a series master changes, its change exceptions must be carried
//! along: recurrence ids shift with the series start, ids orphaned by a
//! narrowed rule are pruned, deletes win over stale overrides, and
//! still-in-sync fields follow the master. The five adjustment steps are
//! strictly sequential — each reads the output of the previous one.

use std::collections::BTreeSet;

use crate::error::{CoherenceError, Result};
use crate::model::{Event, EventRole, RecurrenceId};
use crate::oracle::RecurrenceOracle;

/// Adjusts a master's change-exception events after a master update.
pub struct ExceptionPropagator<'a, O: RecurrenceOracle + ?Sized> {
    oracle: &'a O,
}

/// An exception event tracked through the adjustment pipeline together with
/// its pre-shift recurrence id (needed for the diverged-start test in the
/// field-propagation step).
struct TrackedException {
    event: Event,
    old_id: RecurrenceId,
    new_id: RecurrenceId,
}

impl<'a, O: RecurrenceOracle + ?Sized> ExceptionPropagator<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self { oracle }
    }

    /// Produce the adjusted master and exception set for a master update.
    ///
    /// `original_master` must be a series master; `changed_master` is the
    /// already-patched master the delta computed. Returns the master with
    /// its exception-date sets corrected, plus the surviving (adjusted)
    /// exception events.
    pub fn adjust(
        &self,
        original_master: &Event,
        changed_master: &Event,
        original_exceptions: &[Event],
    ) -> Result<(Event, Vec<Event>)> {
        if !original_master.is_series_master() || original_master.rrule.is_none() {
            return Err(CoherenceError::Internal(
                "exception propagation requires a series master".into(),
            ));
        }

        let mut master = changed_master.clone();

        // Step 1: no rule left — the series degrades to a single event.
        if master.rrule.is_none() {
            master.role = EventRole::Single;
            master.change_exceptions.clear();
            master.delete_exceptions.clear();
            master.recurrence_dates.clear();
            return Ok((master, Vec::new()));
        }

        let mut tracked = self.shift_recurrence_ids(original_master, &mut master, original_exceptions)?;
        self.prune_invalid_ids(&mut master, &mut tracked)?;
        reconcile_delete_exceptions(&mut master, &mut tracked);
        propagate_fields(original_master, &master, &mut tracked);
        propagate_attendees(original_master, &master, &mut tracked);

        Ok((master, tracked.into_iter().map(|t| t.event).collect()))
    }

    /// Step 2: if the series start moved, shift every recurrence id by the
    /// real first-occurrence offset of old vs. new rule.
    ///
    /// A naive start-date subtraction is wrong: rule semantics (BYDAY and
    /// friends) can change which instant is "first", so both firsts are
    /// materialized through the oracle.
    fn shift_recurrence_ids(
        &self,
        original: &Event,
        master: &mut Event,
        original_exceptions: &[Event],
    ) -> Result<Vec<TrackedException>> {
        let mut tracked: Vec<TrackedException> = original_exceptions
            .iter()
            .map(|event| {
                let id = event.recurrence_id().ok_or_else(|| {
                    CoherenceError::Internal(format!(
                        "exception {} carries no recurrence id",
                        event.id
                    ))
                })?;
                Ok(TrackedException {
                    event: event.clone(),
                    old_id: id,
                    new_id: id,
                })
            })
            .collect::<Result<_>>()?;

        if original.start.instant == master.start.instant {
            return Ok(tracked);
        }

        let original_rule = original.rrule.as_deref().unwrap_or_default();
        let changed_rule = master.rrule.as_deref().unwrap_or_default();

        let old_first = self
            .oracle
            .first_occurrence(original_rule, &original.start)?
            .ok_or_else(|| {
                CoherenceError::Internal("original rule yields no first occurrence".into())
            })?;
        let new_first = self
            .oracle
            .first_occurrence(changed_rule, &master.start)?
            .ok_or_else(|| {
                CoherenceError::Internal("changed rule yields no first occurrence".into())
            })?;

        let offset = new_first - old_first;
        if offset.is_zero() {
            return Ok(tracked);
        }

        master.change_exceptions = master
            .change_exceptions
            .iter()
            .map(|id| id.shifted(offset))
            .collect();
        master.delete_exceptions = master
            .delete_exceptions
            .iter()
            .map(|id| id.shifted(offset))
            .collect();

        for t in &mut tracked {
            t.new_id = t.old_id.shifted(offset);
            if let EventRole::Exception { recurrence_id, .. } = &mut t.event.role {
                *recurrence_id = t.new_id;
            }
            // The shifted id is also the exception's sole change-date entry.
            t.event.change_exceptions = BTreeSet::from([t.new_id]);
        }

        Ok(tracked)
    }

    /// Step 3: drop any exception date — and any exception event — that no
    /// longer denotes a legal occurrence of the changed rule. A narrowed
    /// rule orphans previously valid exceptions; they must not survive it.
    fn prune_invalid_ids(
        &self,
        master: &mut Event,
        tracked: &mut Vec<TrackedException>,
    ) -> Result<()> {
        let rule = master
            .rrule
            .clone()
            .ok_or_else(|| CoherenceError::Internal("pruning requires a rule".into()))?;

        let mut legal = |id: &RecurrenceId| -> Result<bool> {
            if master.recurrence_dates.contains(&id.instant) {
                return Ok(true);
            }
            self.oracle.is_occurrence(&rule, &master.start, id.instant)
        };

        let mut surviving_changes = BTreeSet::new();
        for id in std::mem::take(&mut master.change_exceptions) {
            if legal(&id)? {
                surviving_changes.insert(id);
            }
        }
        master.change_exceptions = surviving_changes;

        let mut surviving_deletes = BTreeSet::new();
        for id in std::mem::take(&mut master.delete_exceptions) {
            if legal(&id)? {
                surviving_deletes.insert(id);
            }
        }
        master.delete_exceptions = surviving_deletes;

        let mut surviving = Vec::with_capacity(tracked.len());
        for t in std::mem::take(tracked) {
            if legal(&t.new_id)? {
                surviving.push(t);
            }
        }
        *tracked = surviving;
        Ok(())
    }

}

/// Step 5: carry basic-field changes onto exceptions that still match the
/// *original* master value; diverged exceptions stay untouched. If the
/// master's start or end moved, exception times that still equal their
/// computed occurrence times are recalculated.
fn propagate_fields(original: &Event, master: &Event, tracked: &mut [TrackedException]) {
    for t in tracked.iter_mut() {
        let e = &mut t.event;

        macro_rules! follow {
            ($field:ident) => {
                if e.$field == original.$field {
                    e.$field = master.$field.clone();
                }
            };
        }
        follow!(classification);
        follow!(transparency);
        follow!(status);
        follow!(categories);
        follow!(summary);
        follow!(location);
        follow!(description);
        follow!(color);
        follow!(url);
        follow!(geo);

        let start_or_end_changed = original.start != master.start || original.end != master.end;
        if !start_or_end_changed {
            continue;
        }

        // The previously-computed occurrence interval for this exception,
        // against which divergence is judged.
        let old_occurrence_start = t.old_id.instant;
        let old_occurrence_end = old_occurrence_start + original.duration();

        if e.start.instant == old_occurrence_start {
            e.start = crate::model::EventInstant {
                instant: t.new_id.instant,
                ..master.start
            };
        }
        if e.end.instant == old_occurrence_end {
            e.end = crate::model::EventInstant {
                instant: t.new_id.instant + master.duration(),
                ..master.end
            };
        }
    }
}

/// Step 4: a delete exception wins over a stale change exception with the
/// same recurrence id.
fn reconcile_delete_exceptions(master: &mut Event, tracked: &mut Vec<TrackedException>) {
    let deleted: BTreeSet<RecurrenceId> = master.delete_exceptions.clone();
    master.change_exceptions.retain(|id| !deleted.contains(id));
    tracked.retain(|t| !deleted.contains(&t.new_id));
}

/// Step 6: attendees added to the master appear on every exception not
/// already listing them; attendees removed from the master disappear from
/// every exception listing them.
fn propagate_attendees(original: &Event, master: &Event, tracked: &mut [TrackedException]) {
    let added: Vec<_> = master
        .attendees
        .iter()
        .filter(|a| !original.attendees.iter().any(|o| o.key() == a.key()))
        .collect();
    let removed: Vec<_> = original
        .attendees
        .iter()
        .filter(|o| !master.attendees.iter().any(|a| a.key() == o.key()))
        .collect();

    if added.is_empty() && removed.is_empty() {
        return;
    }

    for t in tracked.iter_mut() {
        t.event
            .attendees
            .retain(|a| !removed.iter().any(|r| r.key() == a.key()));
        for new_attendee in &added {
            if !t
                .event
                .attendees
                .iter()
                .any(|a| a.key() == new_attendee.key())
            {
                t.event.attendees.push((*new_attendee).clone());
            }
        }
    }
}
