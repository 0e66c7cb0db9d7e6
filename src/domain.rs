//! shared types for the hub and the producer nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// sensor reading set, field name -> scalar.
/// ordered as the producer sent it (serde_json preserve_order).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// one stored observation from a producer
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Reading {
    /// store-assigned, strictly increasing
    pub id: i64,
    /// producer identifier (e.g., "group_3")
    pub producer_id: String,
    /// producer clock, seconds since epoch. not guaranteed monotonic.
    pub observed_at: f64,
    /// generic data payload
    /// examples:
    /// - {"temperature": 22.5, "humidity": 45.0}
    /// - {"cpu_temp": 55.0, "ram_used": 1024, "uptime": 3600}
    pub payload: Payload,
    /// hub clock at insert
    pub received_at: DateTime<Utc>,
}

/// what a producer node posts to `/api/data`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ReadingEnvelope {
    pub producer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<f64>,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

/// the fixed set of producer ids the hub accepts
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProducerSet(BTreeSet<String>);

impl ProducerSet {
    pub fn contains(&self, producer_id: &str) -> bool {
        self.0.contains(producer_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ProducerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).filter(|id: &String| !id.is_empty()).collect())
    }
}

/// row cap for history queries.
///
/// always positive: absent, zero, negative or unparsable requests
/// fall back to [`HistoryLimit::DEFAULT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimit(u32);

impl HistoryLimit {
    pub const DEFAULT: HistoryLimit = HistoryLimit(10);

    pub fn new(requested: Option<i64>) -> Self {
        match requested {
            Some(n) if n > 0 => Self(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => Self::DEFAULT,
        }
    }

    /// lenient parse of a `?limit=` query value
    pub fn parse(raw: Option<&str>) -> Self {
        Self::new(raw.and_then(|s| s.trim().parse::<i64>().ok()))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for HistoryLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// current wall clock as fractional seconds since epoch
pub fn epoch_seconds_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_falls_back_to_default() {
        assert_eq!(HistoryLimit::new(None), HistoryLimit::DEFAULT);
        assert_eq!(HistoryLimit::new(Some(0)), HistoryLimit::DEFAULT);
        assert_eq!(HistoryLimit::new(Some(-4)), HistoryLimit::DEFAULT);
        assert_eq!(HistoryLimit::new(Some(3)).get(), 3);
        assert_eq!(HistoryLimit::parse(Some("25")).get(), 25);
        assert_eq!(HistoryLimit::parse(Some("many")), HistoryLimit::DEFAULT);
        assert_eq!(HistoryLimit::parse(None).get(), 10);
    }

    #[test]
    fn producer_set_ignores_empty_ids() {
        let set: ProducerSet = ["group_1", "", "group_2"].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains("group_2"));
        assert!(!set.contains(""));
    }

    #[test]
    fn envelope_omits_absent_optionals() {
        let mut payload = Payload::new();
        payload.insert("temperature".into(), 21.5.into());
        let envelope = ReadingEnvelope {
            producer_id: "group_1".into(),
            observed_at: None,
            payload,
            device_type: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("observed_at").is_none());
        assert!(json.get("device_type").is_none());
        assert_eq!(json["payload"]["temperature"], 21.5);
    }
}
