//! Recurrence-rule evaluation — the oracle every other component consumes.
//!
//! The engine never interprets RRULE semantics itself; it asks an oracle for
//! occurrence instants within a window, for the first occurrence after an
//! anchor, and for legality of a single instant. The default implementation
//! wraps the `rrule` crate, assembling an iCalendar text block
//! (`DTSTART;TZID=…` + `RRULE:…`) and expanding with a hard `u16` cap so a
//! runaway rule can never make a call unbounded.

use chrono::{DateTime, Utc};
use rrule::RRuleSet;

use crate::error::{CoherenceError, Result};
use crate::model::{Event, EventInstant};

/// Evaluates recurrence rules against a series anchor.
///
/// All instants are UTC; the anchor carries the timezone the rule's
/// wall-clock arithmetic happens in (floating and all-day anchors evaluate
/// in UTC).
pub trait RecurrenceOracle {
    /// Ordered occurrence instants in `[from, until)`.
    fn occurrences(
        &self,
        rule: &str,
        anchor: &EventInstant,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Up to `limit` ordered occurrence instants at or after `from`.
    fn occurrences_after(
        &self,
        rule: &str,
        anchor: &EventInstant,
        from: DateTime<Utc>,
        limit: u16,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Whether `instant` is a legal occurrence of the rule.
    fn is_occurrence(
        &self,
        rule: &str,
        anchor: &EventInstant,
        instant: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .occurrences_after(rule, anchor, instant, 1)?
            .first()
            .is_some_and(|first| *first == instant))
    }

    /// The first occurrence instant of the rule, if any.
    ///
    /// This is *not* necessarily the anchor: a rule like `BYDAY=TU` with a
    /// Monday anchor materializes its first occurrence on the Tuesday.
    fn first_occurrence(&self, rule: &str, anchor: &EventInstant) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .occurrences_after(rule, anchor, anchor.instant, 1)?
            .into_iter()
            .next())
    }
}

/// [`RecurrenceOracle`] backed by the `rrule` crate.
#[derive(Debug, Clone)]
pub struct RruleOracle {
    /// Maximum number of raw instances any single expansion may produce.
    expansion_cap: u16,
}

impl Default for RruleOracle {
    fn default() -> Self {
        Self {
            expansion_cap: 1000,
        }
    }
}

impl RruleOracle {
    pub fn with_cap(expansion_cap: u16) -> Self {
        Self { expansion_cap }
    }

    /// Assemble and parse the iCalendar text block for a rule + anchor.
    fn build_set(&self, rule: &str, anchor: &EventInstant) -> Result<RRuleSet> {
        if rule.is_empty() {
            return Err(CoherenceError::InvalidRule("empty RRULE string".into()));
        }

        let tz = anchor.tz.unwrap_or(chrono_tz::UTC);
        let dtstart_local = anchor
            .instant
            .with_timezone(&tz)
            .format("%Y%m%dT%H%M%S")
            .to_string();

        let rrule_text = format!("DTSTART;TZID={}:{}\nRRULE:{}", tz.name(), dtstart_local, rule);

        rrule_text
            .parse()
            .map_err(|e| CoherenceError::InvalidRule(format!("{e}")))
    }
}

impl RecurrenceOracle for RruleOracle {
    fn occurrences(
        &self,
        rule: &str,
        anchor: &EventInstant,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        if from >= until {
            return Ok(Vec::new());
        }

        let set = self
            .build_set(rule, anchor)?
            .after(from.with_timezone(&rrule::Tz::UTC))
            .before(until.with_timezone(&rrule::Tz::UTC));

        let instances = set.all(self.expansion_cap);
        Ok(instances
            .dates
            .into_iter()
            .map(|dt| dt.with_timezone(&Utc))
            // `before` is inclusive; the contract is a half-open window.
            .filter(|dt| *dt < until)
            .collect())
    }

    fn occurrences_after(
        &self,
        rule: &str,
        anchor: &EventInstant,
        from: DateTime<Utc>,
        limit: u16,
    ) -> Result<Vec<DateTime<Utc>>> {
        let set = self
            .build_set(rule, anchor)?
            .after(from.with_timezone(&rrule::Tz::UTC));

        let capped = limit.min(self.expansion_cap);
        let instances = set.all(capped);
        Ok(instances
            .dates
            .into_iter()
            .map(|dt| dt.with_timezone(&Utc))
            .collect())
    }
}

/// Concrete occurrence start instants of an event within `[from, until)`.
///
/// For a series master this merges rule occurrences with extra recurrence
/// dates (RDATE) and removes delete-excluded occurrences. A single event or
/// exception contributes its own start when it falls inside the window.
pub fn occurrence_starts<O: RecurrenceOracle + ?Sized>(
    oracle: &O,
    event: &Event,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let Some(rule) = event.rrule.as_deref() else {
        let start = event.start.instant;
        return Ok(if start >= from && start < until {
            vec![start]
        } else {
            Vec::new()
        });
    };

    let mut starts = oracle.occurrences(rule, &event.start, from, until)?;
    starts.extend(
        event
            .recurrence_dates
            .iter()
            .copied()
            .filter(|d| *d >= from && *d < until),
    );
    starts.sort_unstable();
    starts.dedup();
    starts.retain(|s| {
        !event
            .delete_exceptions
            .iter()
            .any(|ex| ex.instant == *s)
    });
    Ok(starts)
}
