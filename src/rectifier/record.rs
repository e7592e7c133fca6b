//! Records carried through the rectifier.

use crate::error::{Error, Result};
use crate::temporal::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the identifier of the stream a record came from.
pub const STREAM_ID_FIELD: &str = "__streamId__";

/// A JSON object record.
///
/// Records are opaque to the rectifier apart from two fields: the sort field
/// (configurable, `"ts"` by default), holding milliseconds since the epoch
/// as a number or an RFC 3339 string, and [`STREAM_ID_FIELD`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(Map<String, Value>);

impl EventRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record whose sort field `field` holds `ts`.
    pub fn at(field: &str, ts: Timestamp) -> Self {
        Self::new().with(field, ts.as_millis())
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Read the sort key from `field`.
    ///
    /// Floats are floored to whole milliseconds. Returns `None` when the field
    /// is missing or holds neither a number nor an RFC 3339 string.
    pub fn sort_key(&self, field: &str) -> Option<Timestamp> {
        match self.0.get(field)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.floor() as i64))
                .map(Timestamp::from_millis),
            Value::String(s) => Timestamp::parse_iso(s),
            _ => None,
        }
    }

    /// Stream identifier, if tagged.
    pub fn stream_id(&self) -> Option<&str> {
        self.0.get(STREAM_ID_FIELD).and_then(Value::as_str)
    }

    /// Tag the record with its stream identifier.
    pub fn set_stream_id(&mut self, id: &str) {
        self.0
            .insert(STREAM_ID_FIELD.to_string(), Value::String(id.to_string()));
    }

    /// Field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for EventRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<EventRecord> for Value {
    fn from(record: EventRecord) -> Self {
        Value::Object(record.0)
    }
}

impl TryFrom<Value> for EventRecord {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Ok(Self(serde_json::from_value(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_key_variants() {
        let record = EventRecord::try_from(json!({
            "ts": 1_500,
            "float": 1_500.9,
            "iso": "1970-01-01T00:00:01.500Z",
            "bad": true,
        }))
        .unwrap();

        assert_eq!(record.sort_key("ts"), Some(Timestamp::from_millis(1_500)));
        assert_eq!(record.sort_key("float"), Some(Timestamp::from_millis(1_500)));
        assert_eq!(record.sort_key("iso"), Some(Timestamp::from_millis(1_500)));
        assert_eq!(record.sort_key("bad"), None);
        assert_eq!(record.sort_key("missing"), None);
    }

    #[test]
    fn test_stream_id_tagging() {
        let mut record = EventRecord::at("ts", Timestamp::from_millis(1));
        assert_eq!(record.stream_id(), None);
        record.set_stream_id("trades");
        assert_eq!(record.stream_id(), Some("trades"));

        let value: Value = record.into();
        assert_eq!(value, json!({"ts": 1, "__streamId__": "trades"}));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(EventRecord::try_from(json!([1, 2])), Err(Error::Json(_))));
    }
}
