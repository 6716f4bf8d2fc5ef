//! Splitting a recurring series into two independent series.
//!
//! A split detaches everything before the split instant into a new series
//! (fresh identity, fresh UID, rule truncated with UNTIL just before the
//! split) and truncates the original series to begin at or after it. Both
//! halves share a correlation token so clients can still relate them.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{CoherenceError, Result};
use crate::model::{Event, EventInstant, EventRole};
use crate::oracle::RecurrenceOracle;
use crate::rules;

/// Result of a split: either the two resulting masters, or an indicator
/// that the split would have been empty and nothing was touched.
#[derive(Debug, Clone)]
pub enum SplitResult {
    Split(SplitOutcome),
    /// The split point produced an empty detached or retained portion; no
    /// mutation was performed.
    Unchanged,
}

/// The two masters produced by a split plus the adjusted exception events.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// The new series covering occurrences before the split; persisted as a
    /// new creation.
    pub detached: Event,
    /// The original master, truncated to begin at or after the split.
    pub retained: Event,
    /// Every exception event, re-parented (before the split) or retagged
    /// (at or after it).
    pub exceptions: Vec<Event>,
    /// Correlation token shared by both halves.
    pub related_to: String,
}

/// Detaches the past portion of a series at a point in time.
pub struct SeriesSplitter<'a, O: RecurrenceOracle + ?Sized> {
    oracle: &'a O,
}

impl<'a, O: RecurrenceOracle + ?Sized> SeriesSplitter<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self { oracle }
    }

    /// Split `master` at `split_at`.
    ///
    /// Returns [`SplitResult::Unchanged`] when the split instant lies before
    /// the first occurrence or either half would end up with no occurrences.
    /// Fails with `NotFound` when no occurrence exists at or after the split
    /// instant (nothing to retain).
    pub fn split(
        &self,
        master: &Event,
        exceptions: &[Event],
        split_at: DateTime<Utc>,
        new_uid: Option<String>,
    ) -> Result<SplitResult> {
        let rule = match (&master.role, master.rrule.as_deref()) {
            (EventRole::SeriesMaster { .. }, Some(rule)) => rule,
            _ => {
                return Err(CoherenceError::Internal(
                    "only a series master can be split".into(),
                ))
            }
        };
        if split_at < master.start.instant {
            return Ok(SplitResult::Unchanged);
        }

        // The first retained occurrence anchors the truncated original.
        let first_retained = self
            .oracle
            .occurrences_after(rule, &master.start, split_at, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CoherenceError::NotFound(format!(
                    "no occurrence at or after the split instant {split_at}"
                ))
            })?;

        // Truncate the detached rule one unit before the split: a day for
        // all-day series, a second otherwise.
        let step = if master.start.all_day {
            Duration::days(1)
        } else {
            Duration::seconds(1)
        };
        let detached_rule = rules::with_until(rule, split_at - step, &master.start);

        let consumed = self
            .oracle
            .occurrences(&detached_rule, &master.start, master.start.instant, split_at)?
            .len() as u64;
        if consumed == 0 {
            return Ok(SplitResult::Unchanged);
        }

        let related_to = Uuid::new_v4().to_string();

        let mut detached = master.clone();
        detached.id = Uuid::new_v4().to_string();
        detached.uid = new_uid.unwrap_or_else(|| Uuid::new_v4().to_string());
        detached.role = EventRole::SeriesMaster {
            series_id: detached.id.clone(),
        };
        detached.rrule = Some(detached_rule);
        detached.related_to = Some(related_to.clone());

        let mut retained = master.clone();
        retained.related_to = Some(related_to.clone());

        // Partition the master's date sets around the split instant.
        detached.recurrence_dates = master
            .recurrence_dates
            .iter()
            .copied()
            .filter(|d| *d < split_at)
            .collect();
        retained.recurrence_dates = master
            .recurrence_dates
            .iter()
            .copied()
            .filter(|d| *d >= split_at)
            .collect();
        detached.delete_exceptions = master
            .delete_exceptions
            .iter()
            .filter(|id| id.instant < split_at)
            .copied()
            .collect();
        retained.delete_exceptions = master
            .delete_exceptions
            .iter()
            .filter(|id| id.instant >= split_at)
            .copied()
            .collect();
        detached.change_exceptions = master
            .change_exceptions
            .iter()
            .filter(|id| id.instant < split_at)
            .copied()
            .collect();
        retained.change_exceptions = master
            .change_exceptions
            .iter()
            .filter(|id| id.instant >= split_at)
            .copied()
            .collect();

        // A rule bounded by COUNT keeps counting across the split: the
        // retained half gives up the occurrences the detached half consumed.
        if let Some(count) = rules::rule_count(rule) {
            if count <= consumed {
                return Ok(SplitResult::Unchanged);
            }
            retained.rrule = Some(rules::with_count(rule, count - consumed));
        }

        // Re-anchor the retained master on its first remaining occurrence.
        let duration = master.duration();
        retained.start = EventInstant {
            instant: first_retained,
            ..master.start
        };
        retained.end = EventInstant {
            instant: first_retained + duration,
            ..master.end
        };

        if self
            .oracle
            .first_occurrence(retained.rrule.as_deref().unwrap_or_default(), &retained.start)?
            .is_none()
        {
            return Ok(SplitResult::Unchanged);
        }

        // Exceptions before the split move to the detached series; the rest
        // only pick up the correlation token.
        let adjusted_exceptions = exceptions
            .iter()
            .map(|exception| {
                let mut adjusted = exception.clone();
                adjusted.related_to = Some(related_to.clone());
                if let EventRole::Exception {
                    series_id,
                    recurrence_id,
                } = &mut adjusted.role
                {
                    if recurrence_id.instant < split_at {
                        *series_id = detached.id.clone();
                        adjusted.uid = detached.uid.clone();
                    }
                }
                adjusted
            })
            .collect();

        Ok(SplitResult::Split(SplitOutcome {
            detached,
            retained,
            exceptions: adjusted_exceptions,
            related_to,
        }))
    }
}
