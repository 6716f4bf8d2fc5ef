//! Double-booking detection across expanded recurrences.
//!
//! The detector checks a candidate event against already-stored events for
//! the attendees it is asked about, expanding recurring candidates and
//! recurring stored events into concrete occurrence intervals. Conflicts
//! against resources and rooms are *hard* (always surfaced); conflicts
//! against individuals are *soft* and suppressed for privately classified
//! events. Two intervals overlap iff `a.start < b.end && b.start < a.end`;
//! adjacent events are never conflicts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::attendee::{Attendee, ParticipationStatus};
use crate::error::Result;
use crate::model::{
    Classification, Event, EventId, Principal, RecurrenceId, Transparency,
};
use crate::oracle::{occurrence_starts, RecurrenceOracle};

/// What the checking principal may see of a stored folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderPermission {
    /// No access to other users' events in the folder.
    None,
    /// May read own events only.
    ReadOwn,
    /// May read all events in the folder.
    ReadAll,
}

/// Storage-side collaborator of the conflict search.
pub trait EventDirectory {
    /// Stored events overlapping `[from, until)` that list any of the given
    /// attendees. Series masters are returned unexpanded.
    fn load_overlapping_events(
        &self,
        attendees: &[Attendee],
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// The principal's permission on a folder, for detail visibility.
    fn folder_permission(&self, folder_id: &str, principal: &Principal)
        -> Result<FolderPermission>;
}

/// Caps bounding the conflict search. They exist to bound worst-case cost
/// of a maliciously or accidentally long-running series — hitting one is a
/// truncation, never an error.
#[derive(Debug, Clone, Copy)]
pub struct ConflictConfig {
    /// Maximum number of conflicts returned per check.
    pub max_conflicts: usize,
    /// Maximum conflicting occurrences reported per stored series.
    pub max_conflicts_per_series: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            max_conflicts: 100,
            max_conflicts_per_series: 5,
        }
    }
}

/// The visible part of a conflicting event.
///
/// Summary, location and folder are only populated when the checking
/// principal is authorized to see them; identity, time and transparency are
/// always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEventView {
    pub id: EventId,
    pub series_id: Option<EventId>,
    /// Set when the conflict is one occurrence of a stored series.
    pub recurrence_id: Option<RecurrenceId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub transparency: Transparency,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub folder_id: Option<String>,
}

/// A detected double-booking. Created fresh per check; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub event: ConflictEventView,
    /// The subset of checked attendees actually implicated.
    pub attendees: Vec<Attendee>,
    /// Resource/room conflicts are hard — they block regardless of
    /// visibility.
    pub hard: bool,
}

/// Searches stored events for temporal overlaps with a candidate.
pub struct ConflictDetector<'a, O: RecurrenceOracle + ?Sized, D: EventDirectory + ?Sized> {
    oracle: &'a O,
    directory: &'a D,
    config: ConflictConfig,
    now: DateTime<Utc>,
}

impl<'a, O: RecurrenceOracle + ?Sized, D: EventDirectory + ?Sized> ConflictDetector<'a, O, D> {
    pub fn new(oracle: &'a O, directory: &'a D, config: ConflictConfig, now: DateTime<Utc>) -> Self {
        Self {
            oracle,
            directory,
            config,
            now,
        }
    }

    /// Check a candidate event for double-bookings of the given attendees.
    ///
    /// `check_individuals` controls whether plain individuals are checked at
    /// all; resources and rooms are always checked. Transparent candidates
    /// and checks whose whole window lies in the past return no conflicts.
    pub fn check(
        &self,
        candidate: &Event,
        attendees_to_check: &[Attendee],
        check_individuals: bool,
        principal: &Principal,
    ) -> Result<Vec<Conflict>> {
        if candidate.transparency != Transparency::Opaque {
            return Ok(Vec::new());
        }

        let checked: Vec<&Attendee> = attendees_to_check
            .iter()
            .filter(|a| a.entity_id().is_some())
            .filter(|a| a.cu_type.is_bookable_unit() || check_individuals)
            .filter(|a| !matches!(a.cu_type, crate::attendee::CuType::Group))
            .collect();
        if checked.is_empty() {
            return Ok(Vec::new());
        }

        // The candidate's concrete occurrence intervals and the window that
        // covers them. Past occurrences of a series are never checked.
        let candidate_intervals = self.candidate_intervals(candidate)?;
        let Some(window) = self.check_window(candidate, &candidate_intervals) else {
            return Ok(Vec::new());
        };
        if window.1 < self.now {
            return Ok(Vec::new());
        }

        let checked_owned: Vec<Attendee> = checked.iter().map(|a| (*a).clone()).collect();
        let stored_events =
            self.directory
                .load_overlapping_events(&checked_owned, window.0, window.1)?;

        let mut conflicts: Vec<Conflict> = Vec::new();
        for stored in &stored_events {
            if stored.id == candidate.id {
                continue;
            }
            if let (Some(a), Some(b)) = (stored.series_id(), candidate.series_id()) {
                if a == b {
                    continue;
                }
            }
            if stored.transparency != Transparency::Opaque {
                continue;
            }

            // Only attendees actually booked on the stored event — and who
            // have not declined it — are implicated.
            let implicated: Vec<Attendee> = stored
                .attendees
                .iter()
                .filter(|a| a.status != ParticipationStatus::Declined)
                .filter(|a| checked.iter().any(|c| c.key() == a.key()))
                .cloned()
                .collect();
            if implicated.is_empty() {
                continue;
            }

            let hard = implicated.iter().any(|a| a.cu_type.is_bookable_unit());
            if !hard
                && !matches!(
                    stored.classification,
                    Classification::Public | Classification::Confidential
                )
            {
                // Private events never surface as soft conflicts.
                continue;
            }

            // A stored booking can begin before the window and still cover a
            // candidate interval, so a plain event contributes its full
            // interval and a series expands from a lower bound widened by
            // its occurrence duration.
            let stored_duration = stored.duration();
            let stored_intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> =
                if stored.rrule.is_none() {
                    vec![(stored.start.instant, stored.end.instant)]
                } else {
                    occurrence_starts(self.oracle, stored, window.0 - stored_duration, window.1)?
                        .into_iter()
                        .map(|s| (s, s + stored_duration))
                        .collect()
                };

            let overlapping = overlapping_intervals(
                &candidate_intervals,
                &stored_intervals,
                self.config.max_conflicts_per_series,
            );

            for (occ_start, occ_end) in overlapping {
                let view = self.build_view(stored, occ_start, occ_end, principal)?;
                conflicts.push(Conflict {
                    event: view,
                    attendees: implicated.clone(),
                    hard,
                });
            }
        }

        conflicts.sort_by(|a, b| {
            b.hard
                .cmp(&a.hard)
                .then(a.event.start.cmp(&b.event.start))
        });
        conflicts.truncate(self.config.max_conflicts);
        Ok(conflicts)
    }

    /// Concrete `[start, end)` intervals of the candidate:
    /// every remaining occurrence for a series, the single interval
    /// otherwise. Duration is fixed per event.
    fn candidate_intervals(&self, candidate: &Event) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
        let duration = candidate.duration();
        if candidate.rrule.is_none() {
            return Ok(vec![(candidate.start.instant, candidate.end.instant)]);
        }
        let rule = candidate.rrule.as_deref().unwrap_or_default();
        let from = start_of_day(self.now);
        let mut starts = self
            .oracle
            .occurrences_after(rule, &candidate.start, from, u16::MAX)?;
        starts.extend(candidate.recurrence_dates.iter().copied().filter(|d| *d >= from));
        starts.sort_unstable();
        starts.dedup();
        starts.retain(|s| !candidate.delete_exceptions.iter().any(|ex| ex.instant == *s));
        Ok(starts.into_iter().map(|s| (s, s + duration)).collect())
    }

    /// The searched time window. Single events get a day of slack on both
    /// sides to tolerate floating-timezone ambiguity; a series spans its
    /// first remaining occurrence to its last occurrence end.
    fn check_window(
        &self,
        candidate: &Event,
        intervals: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if candidate.rrule.is_none() {
            return Some((
                candidate.start.instant - Duration::days(1),
                candidate.end.instant + Duration::days(1),
            ));
        }
        let first = intervals.first()?;
        let last = intervals.last()?;
        Some((first.0, last.1))
    }

    /// Builds the visibility-filtered view of a conflicting occurrence.
    fn build_view(
        &self,
        stored: &Event,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        principal: &Principal,
    ) -> Result<ConflictEventView> {
        let may_see_details = stored.created_by == principal.entity_id
            || stored.is_organized_by(&principal.entity_id)
            || stored.find_attendee(&principal.entity_id).is_some()
            || stored.classification.is_public()
            || self
                .directory
                .folder_permission(&stored.folder_id, principal)?
                == FolderPermission::ReadAll;

        let is_occurrence = stored.rrule.is_some();
        Ok(ConflictEventView {
            id: stored.id.clone(),
            series_id: stored.series_id().map(str::to_owned),
            recurrence_id: if is_occurrence {
                Some(RecurrenceId::new(start))
            } else {
                stored.recurrence_id()
            },
            start,
            end,
            transparency: stored.transparency,
            summary: may_see_details.then(|| stored.summary.clone()).flatten(),
            location: may_see_details.then(|| stored.location.clone()).flatten(),
            folder_id: may_see_details.then(|| stored.folder_id.clone()),
        })
    }
}

/// Two-pointer merge over two sorted interval sequences, collecting stored
/// intervals that overlap at least one candidate interval. Each pointer only
/// advances, and the walk stops as soon as either sequence can no longer
/// overlap the other's remainder — this bound keeps series-vs-series checks
/// sub-quadratic.
pub fn overlapping_intervals(
    candidate: &[(DateTime<Utc>, DateTime<Utc>)],
    stored: &[(DateTime<Utc>, DateTime<Utc>)],
    limit: usize,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut found = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);

    while i < candidate.len() && j < stored.len() && found.len() < limit {
        let a = candidate[i];
        let b = stored[j];
        if a.1 <= b.0 {
            i += 1;
        } else if b.1 <= a.0 {
            j += 1;
        } else {
            // A stored occurrence conflicts once, even if it overlaps
            // several candidate occurrences.
            found.push(b);
            j += 1;
        }
    }

    found
}

fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}
