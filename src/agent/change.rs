//! change detection between consecutive payloads.
//!
//! only decides whether the node logs a reading. sending never depends on it.

use crate::domain::Payload;
use serde_json::Value;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// true if any field moved enough to be worth logging.
///
/// numbers: `|new - old| > threshold`. everything else: inequality.
/// a field that appears or disappears counts as a change.
pub fn has_significant_change(new: &Payload, old: &Payload, threshold: f64) -> bool {
    if new.len() != old.len() || new.keys().any(|k| !old.contains_key(k)) {
        return true;
    }

    new.iter().any(|(key, value)| {
        let previous = &old[key];
        match (value.as_f64(), previous.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() > threshold,
            _ => value != previous,
        }
    })
}

/// render a payload one field per line for the node log
pub fn describe(payload: &Payload) -> String {
    payload
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("  {}: {}", key, s),
            other => format!("  {}: {}", key, other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
