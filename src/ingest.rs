//! ==============================================================================
//! ingest.rs - validation and storage of inbound reading envelopes
//! ==============================================================================
//!
//! purpose:
//!     turns the raw body of `POST /api/data` into a stored reading.
//!
//! validation order:
//!     1. body is a well-formed json object           -> malformed_request
//!     2. producer_id and payload are present          -> missing_required_fields
//!        (types checked right after)                  -> invalid_field
//!     3. producer_id is one of the configured ids     -> unknown_producer
//!
//! ```text
//!     nothing touches the store until all three pass. payload values are
//!     never inspected: a producer may send any mix of numbers and strings.
//! ```
//!
//! legacy firmware:
//!     older nodes send `group_id` / `sensor_data` / `timestamp`; these are
//!     accepted as aliases of `producer_id` / `payload` / `observed_at`.
//!     when both spellings are present the current name wins.
//!
//! ==============================================================================

use crate::domain::{epoch_seconds_now, Payload, ProducerSet};
use crate::error::{IngestError, ValidationError};
use crate::store::ReadingStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    producer_id: Option<Value>,
    #[serde(default)]
    group_id: Option<Value>,
    #[serde(default)]
    observed_at: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    sensor_data: Option<Value>,
    #[serde(default)]
    device_type: Option<Value>,
}

impl RawEnvelope {
    /// fold legacy spellings into the current field names
    fn canonical(self) -> Self {
        Self {
            producer_id: self.producer_id.or(self.group_id),
            group_id: None,
            observed_at: self.observed_at.or(self.timestamp),
            timestamp: None,
            payload: self.payload.or(self.sensor_data),
            sensor_data: None,
            device_type: self.device_type,
        }
    }
}

/// an envelope that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEnvelope {
    pub producer_id: String,
    /// None when the producer didn't send a timestamp
    pub observed_at: Option<f64>,
    pub payload: Payload,
    pub device_type: Option<String>,
}

/// acknowledgement returned to the producer
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestAck {
    pub id: i64,
    pub producer_id: String,
    pub observed_at: f64,
    pub received_at: DateTime<Utc>,
}

/// parse and check one request body against the configured producer set
pub fn validate(body: &[u8], producers: &ProducerSet) -> Result<ValidEnvelope, ValidationError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(ValidationError::Malformed("expected a JSON object".into()));
    }
    let raw = serde_json::from_value::<RawEnvelope>(value)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?
        .canonical();

    let mut missing = Vec::new();
    if raw.producer_id.is_none() {
        missing.push("producer_id");
    }
    if raw.payload.is_none() {
        missing.push("payload");
    }
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields(missing));
    }

    let producer_id = match raw.producer_id {
        Some(Value::String(id)) => id,
        _ => {
            return Err(ValidationError::InvalidField {
                field: "producer_id",
                reason: "expected a string".into(),
            })
        }
    };
    let payload = match raw.payload {
        Some(Value::Object(map)) => map,
        _ => {
            return Err(ValidationError::InvalidField {
                field: "payload",
                reason: "expected an object of named readings".into(),
            })
        }
    };
    let observed_at = match raw.observed_at {
        None => None,
        Some(v) => Some(v.as_f64().filter(|t| t.is_finite()).ok_or_else(|| {
            ValidationError::InvalidField {
                field: "observed_at",
                reason: "expected seconds since epoch".into(),
            }
        })?),
    };
    let device_type = raw.device_type.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    });

    if !producers.contains(&producer_id) {
        return Err(ValidationError::UnknownProducer(producer_id));
    }

    Ok(ValidEnvelope { producer_id, observed_at, payload, device_type })
}

/// validates envelopes and appends them to the store
pub struct Ingestor {
    store: Arc<ReadingStore>,
    producers: Arc<ProducerSet>,
    echo_payloads: bool,
}

impl Ingestor {
    pub fn new(store: Arc<ReadingStore>, producers: Arc<ProducerSet>) -> Self {
        Self { store, producers, echo_payloads: false }
    }

    /// also log each accepted payload (`logging.show_sensor_data`)
    pub fn with_payload_echo(mut self, on: bool) -> Self {
        self.echo_payloads = on;
        self
    }

    /// blocking: run on spawn_blocking from async code
    pub fn ingest(&self, body: &[u8]) -> Result<IngestAck, IngestError> {
        let envelope = validate(body, &self.producers)?;
        let observed_at = envelope.observed_at.unwrap_or_else(epoch_seconds_now);

        let reading = self.store.insert(&envelope.producer_id, observed_at, &envelope.payload)?;

        tracing::info!(
            "[INGEST] Data received from {} ({}) id={}",
            reading.producer_id,
            envelope.device_type.as_deref().unwrap_or("unknown device"),
            reading.id
        );
        if self.echo_payloads {
            let payload = serde_json::to_string(&reading.payload).unwrap_or_default();
            tracing::info!("[INGEST] {} payload: {}", reading.producer_id, payload);
        }
        Ok(IngestAck {
            id: reading.id,
            producer_id: reading.producer_id,
            observed_at: reading.observed_at,
            received_at: reading.received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HistoryLimit;
    use crate::error::StoreError;

    fn groups() -> ProducerSet {
        (1..=6).map(|n| format!("group_{}", n)).collect()
    }

    fn ingestor() -> (tempfile::TempDir, Arc<ReadingStore>, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReadingStore::open(dir.path().join("hub.db")).unwrap());
        let ingestor = Ingestor::new(store.clone(), Arc::new(groups()));
        (dir, store, ingestor)
    }

    #[test]
    fn rejects_garbage() {
        let err = validate(b"{not json", &groups()).unwrap_err();
        assert_eq!(err.code(), "malformed_request");
        let err = validate(b"[1, 2, 3]", &groups()).unwrap_err();
        assert_eq!(err.code(), "malformed_request");
    }

    #[test]
    fn reports_each_missing_field() {
        let err = validate(br#"{"payload": {"t": 1}}"#, &groups()).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields(vec!["producer_id"]));

        let err = validate(br#"{"producer_id": "group_1"}"#, &groups()).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields(vec!["payload"]));

        let err = validate(br#"{"producer_id": null, "payload": null}"#, &groups()).unwrap_err();
        assert_eq!(err, ValidationError::MissingFields(vec!["producer_id", "payload"]));
    }

    #[test]
    fn missing_fields_win_over_unknown_producer() {
        let err = validate(br#"{"producer_id": "group_99"}"#, &groups()).unwrap_err();
        assert_eq!(err.code(), "missing_required_fields");
    }

    #[test]
    fn rejects_unknown_producer() {
        let body = br#"{"producer_id": "group_99", "payload": {"temperature": 21.5}}"#;
        let err = validate(body, &groups()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownProducer("group_99".into()));
    }

    #[test]
    fn checks_field_types() {
        let err = validate(br#"{"producer_id": 3, "payload": {}}"#, &groups()).unwrap_err();
        assert_eq!(err.code(), "invalid_field");
        let err = validate(br#"{"producer_id": "group_1", "payload": 21.5}"#, &groups()).unwrap_err();
        assert_eq!(err.code(), "invalid_field");
        let body = br#"{"producer_id": "group_1", "payload": {}, "observed_at": "noon"}"#;
        let err = validate(body, &groups()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "observed_at", .. }));
    }

    #[test]
    fn accepts_legacy_field_names() {
        let body = br#"{
            "group_id": "group_2",
            "timestamp": 1700000000.5,
            "sensor_data": {"temperature": 19.0, "raw_value": 2048},
            "device_type": "esp32"
        }"#;
        let envelope = validate(body, &groups()).unwrap();
        assert_eq!(envelope.producer_id, "group_2");
        assert_eq!(envelope.observed_at, Some(1_700_000_000.5));
        assert_eq!(envelope.payload["raw_value"], 2048);
        assert_eq!(envelope.device_type.as_deref(), Some("esp32"));
    }

    #[test]
    fn current_field_names_win_over_legacy() {
        let body = br#"{
            "producer_id": "group_1",
            "group_id": "group_2",
            "observed_at": 10.0,
            "timestamp": 20.0,
            "payload": {"t": 1},
            "sensor_data": {"t": 2}
        }"#;
        let envelope = validate(body, &groups()).unwrap();
        assert_eq!(envelope.producer_id, "group_1");
        assert_eq!(envelope.observed_at, Some(10.0));
        assert_eq!(envelope.payload["t"], 1);
    }

    #[test]
    fn payload_values_are_not_inspected() {
        let body = br#"{"producer_id": "group_4", "payload": {"a": "text", "b": null, "c": [1]}}"#;
        assert!(validate(body, &groups()).is_ok());
    }

    #[test]
    fn invalid_requests_never_write() {
        let (_dir, store, ingestor) = ingestor();
        for body in [
            &b"nope"[..],
            br#"{"payload": {"temperature": 1}}"#,
            br#"{"producer_id": "group_1"}"#,
            br#"{"producer_id": "group_99", "payload": {"temperature": 1}}"#,
        ] {
            let err = ingestor.ingest(body).unwrap_err();
            assert!(matches!(err, IngestError::Validation(_)));
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn stores_valid_reading() {
        let (_dir, store, ingestor) = ingestor();
        let body = br#"{"producer_id": "group_3", "payload": {"temperature": 21.5}}"#;
        let ack = ingestor.ingest(body).unwrap();
        assert_eq!(ack.producer_id, "group_3");

        let history = store.history("group_3", HistoryLimit::new(Some(1))).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, ack.id);
        assert_eq!(history[0].payload["temperature"], 21.5);
        assert_eq!(history[0].received_at, ack.received_at);
    }

    #[test]
    fn assigns_observed_at_when_absent() {
        let (_dir, _store, ingestor) = ingestor();
        let before = epoch_seconds_now();
        let ack = ingestor
            .ingest(br#"{"producer_id": "group_1", "payload": {"v": 1}}"#)
            .unwrap();
        assert!(ack.observed_at >= before);

        let ack = ingestor
            .ingest(br#"{"producer_id": "group_1", "payload": {"v": 1}, "observed_at": 12.5}"#)
            .unwrap();
        assert_eq!(ack.observed_at, 12.5);
    }

    /// collects formatted log output for one closure
    fn captured_logs(f: impl FnOnce()) -> String {
        #[derive(Clone, Default)]
        struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn payload_echo_follows_setting() {
        let body = br#"{"producer_id": "group_2", "payload": {"humidity": 41.5}}"#;

        let (_dir, _store, quiet) = ingestor();
        let logs = captured_logs(|| {
            quiet.ingest(body).unwrap();
        });
        assert!(logs.contains("Data received from group_2"));
        assert!(!logs.contains("humidity"));

        let (_dir, store, _) = ingestor();
        let chatty = Ingestor::new(store, Arc::new(groups())).with_payload_echo(true);
        let logs = captured_logs(|| {
            chatty.ingest(body).unwrap();
        });
        assert!(logs.contains(r#"group_2 payload: {"humidity":41.5}"#));
    }

    #[test]
    fn storage_failure_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("hub.db");
        let store = Arc::new(ReadingStore::open(&db).unwrap());
        let ingestor = Ingestor::new(store, Arc::new(groups()));
        // pull the directory out from under the store
        drop(dir);

        let err = ingestor
            .ingest(br#"{"producer_id": "group_1", "payload": {"v": 1}}"#)
            .unwrap_err();
        assert!(matches!(err, IngestError::Storage(StoreError::Sqlite(_))));
    }
}
