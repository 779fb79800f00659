//! Bounded log of outbound telemetry records

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Default number of records kept
pub const DEFAULT_TRANSMISSION_CAPACITY: usize = 1024;

/// One telemetry record: the payload element stamped with its endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Transmission {
    record: Map<String, Value>,
}

impl Transmission {
    /// Build a record from one payload element
    ///
    /// Object fields are copied in. Any other non-null element is kept
    /// under `value`. The endpoint is stamped last and cannot be spoofed by
    /// the payload.
    #[must_use]
    pub fn new(endpoint: &str, element: Option<&Value>) -> Self {
        let mut record = Map::new();
        match element {
            Some(Value::Object(fields)) => {
                record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                record.insert("value".to_string(), other.clone());
            }
        }
        record.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
        Self { record }
    }

    /// Expand a payload into records: arrays give one per element
    #[must_use]
    pub fn expand(endpoint: &str, payload: Option<&Value>) -> Vec<Self> {
        match payload {
            Some(Value::Array(items)) => items.iter().map(|x| Self::new(endpoint, Some(x))).collect(),
            other => vec![Self::new(endpoint, other)],
        }
    }

    /// Endpoint the record was sent to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.record
            .get("endpoint")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Field of the record
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    /// The record as a JSON object
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.record
    }
}

/// Ring buffer of the most recent transmissions
#[derive(Debug, Clone)]
pub struct TransmissionLog {
    records: VecDeque<Transmission>,
    capacity: usize,
}

impl Default for TransmissionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRANSMISSION_CAPACITY)
    }
}

impl TransmissionLog {
    /// Create log with the default capacity
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create log keeping at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_TRANSMISSION_CAPACITY)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest past capacity
    pub fn record(&mut self, transmission: Transmission) {
        tracing::debug!("transmission to {}", transmission.endpoint());
        self.records.push_back(transmission);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// Number of records held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records held
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first copy of the records
    #[must_use]
    pub fn snapshot(&self) -> Vec<Transmission> {
        self.records.iter().cloned().collect()
    }
}
