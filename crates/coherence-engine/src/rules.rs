//! RRULE string utilities — canonicalization, occurrence-superset heuristic,
//! UNTIL/COUNT rewriting.
//!
//! The engine treats rules as opaque strings and leaves their evaluation to
//! the [`crate::oracle`]; this module only performs part-level manipulation
//! (`FREQ=…;COUNT=…` segments), which is all the delta and split logic need.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::EventInstant;

/// Split a rule into its `KEY=VALUE` parts, uppercasing keys.
pub fn rule_parts(rule: &str) -> BTreeMap<String, String> {
    rule.split(';')
        .filter(|p| !p.is_empty())
        .filter_map(|part| {
            part.split_once('=')
                .map(|(k, v)| (k.trim().to_uppercase(), v.trim().to_string()))
        })
        .collect()
}

/// Reassemble parts into a rule string, FREQ first, the rest alphabetical.
pub fn assemble_rule(parts: &BTreeMap<String, String>) -> String {
    let mut segments: Vec<String> = Vec::with_capacity(parts.len());
    if let Some(freq) = parts.get("FREQ") {
        segments.push(format!("FREQ={freq}"));
    }
    for (key, value) in parts {
        if key != "FREQ" {
            segments.push(format!("{key}={value}"));
        }
    }
    segments.join(";")
}

/// Whether two rule strings are semantically identical ignoring formatting
/// (part order, case of keys, redundant INTERVAL=1).
pub fn rules_equivalent(a: &str, b: &str) -> bool {
    let normalize = |rule: &str| {
        let mut parts = rule_parts(rule);
        if parts.get("INTERVAL").map(String::as_str) == Some("1") {
            parts.remove("INTERVAL");
        }
        parts
    };
    normalize(a) == normalize(b)
}

/// Normalize an UNTIL value for comparison: strip the UTC marker and pad a
/// date-only value to midnight so lexical comparison of the digit strings
/// orders chronologically.
fn normalize_until(value: &str) -> String {
    let bare = value.trim_end_matches('Z');
    if bare.len() == 8 {
        format!("{bare}T000000")
    } else {
        bare.to_string()
    }
}

/// Conservative test for whether a changed rule can yield occurrences the
/// original did not.
///
/// Provably-fewer cases return `false`: UNTIL moved earlier or newly added,
/// COUNT decreased or newly added, or INTERVAL replaced by an integer
/// multiple (a pure thinning — the new occurrence set is a subset). Every
/// other delta, including any BYxxx change, counts as "more occurrences".
pub fn produces_further_occurrences(original: &str, updated: &str) -> bool {
    let before = rule_parts(original);
    let after = rule_parts(updated);

    let mut differing: Vec<&str> = Vec::new();
    for key in before.keys().chain(after.keys()) {
        if before.get(key) != after.get(key) && !differing.contains(&key.as_str()) {
            differing.push(key);
        }
    }

    match differing.as_slice() {
        [] => false,
        ["UNTIL"] => match (before.get("UNTIL"), after.get("UNTIL")) {
            (Some(old), Some(new)) => normalize_until(new) > normalize_until(old),
            // Adding an UNTIL only truncates; removing it extends.
            (None, Some(_)) => false,
            (Some(_), None) => true,
            (None, None) => unreachable!(),
        },
        ["COUNT"] => {
            let old = before.get("COUNT").and_then(|v| v.parse::<u64>().ok());
            let new = after.get("COUNT").and_then(|v| v.parse::<u64>().ok());
            match (old, new) {
                (Some(old), Some(new)) => new > old,
                (None, Some(_)) => false,
                _ => true,
            }
        }
        ["INTERVAL"] => {
            let old = interval_of(&before);
            let new = interval_of(&after);
            // A widened interval that is an exact multiple thins the series
            // without introducing new instants.
            !(new >= old && new % old == 0)
        }
        _ => true,
    }
}

fn interval_of(parts: &BTreeMap<String, String>) -> u64 {
    parts
        .get("INTERVAL")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|i| *i > 0)
        .unwrap_or(1)
}

/// The COUNT part of a rule, if present and numeric.
pub fn rule_count(rule: &str) -> Option<u64> {
    rule_parts(rule)
        .get("COUNT")
        .and_then(|v| v.parse::<u64>().ok())
}

/// Replace the COUNT part with a new value.
pub fn with_count(rule: &str, count: u64) -> String {
    let mut parts = rule_parts(rule);
    parts.insert("COUNT".into(), count.to_string());
    assemble_rule(&parts)
}

/// Replace any COUNT/UNTIL bound with a fixed UNTIL at the given instant.
///
/// The UNTIL value is rendered the way the rule evaluator expects it: bare
/// local time in the anchor's timezone, with a `Z` suffix for UTC, floating
/// and all-day anchors.
pub fn with_until(rule: &str, until: DateTime<Utc>, anchor: &EventInstant) -> String {
    let mut parts = rule_parts(rule);
    parts.remove("COUNT");
    parts.insert("UNTIL".into(), format_until(until, anchor));
    assemble_rule(&parts)
}

fn format_until(until: DateTime<Utc>, anchor: &EventInstant) -> String {
    match anchor.tz {
        Some(tz) if tz != chrono_tz::UTC => until
            .with_timezone(&tz)
            .format("%Y%m%dT%H%M%S")
            .to_string(),
        _ => until.format("%Y%m%dT%H%M%SZ").to_string(),
    }
}
