//! Data passed from the weather source to the publisher.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One weather observation for one query at one instant.
///
/// The producer never interprets the fields; the map is forwarded as-is.
/// Equal snapshots always serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherSnapshot(Map<String, Value>);

impl WeatherSnapshot {
    /// Build a snapshot from an arbitrary JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical JSON text of the snapshot: compact, object keys sorted at every level.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&canonical(Value::Object(self.0.clone())))
    }
}

fn canonical(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let sorted: std::collections::BTreeMap<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, canonical(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
        other => other,
    }
}

impl std::fmt::Display for WeatherSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", canonical(Value::Object(self.0.clone())))
    }
}

/// A message handed to an `EventPublisher`. Ownership moves to the publisher on submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
}

impl PublishRequest {
    /// Serialize `snapshot` into a request keyed by the location query.
    pub fn from_snapshot(
        topic: &str,
        key: &str,
        snapshot: &WeatherSnapshot,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.to_string(),
            key: key.to_string(),
            value: snapshot.to_json()?.into_bytes(),
        })
    }
}
