//! Encoded record payloads and references.

use crate::error::{ProtocolError, ProtocolResult};
use rowmirror_model::{Identity, PrimaryKey, Value, PK_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fmt;

/// A flat JSON object describing a record's state.
///
/// Keys are field names plus the reserved `pk`; values are scalars,
/// references, or arrays of references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Json>);

impl Payload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key.
    pub fn insert(&mut self, key: impl Into<String>, value: Json) {
        self.0.insert(key.into(), value);
    }

    /// Gets a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Json> {
        self.0.get(key)
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Json> {
        self.0.remove(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates over entries in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Json)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the record's own reference stored under `pk`.
    #[must_use]
    pub fn own_reference(&self) -> Option<Reference> {
        self.get(PK_FIELD).and_then(Reference::from_json)
    }

    /// Serializes to compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parses JSON text, which must hold an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON or not an object.
    pub fn from_json_str(text: &str) -> ProtocolResult<Self> {
        match serde_json::from_str::<Json>(text)? {
            Json::Object(map) => Ok(Self(map)),
            other => Err(ProtocolError::InvalidPayload(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Json::Object(self.0.clone()))
    }
}

impl From<Map<String, Json>> for Payload {
    fn from(map: Map<String, Json>) -> Self {
        Self(map)
    }
}

/// A reference to a record as it appears in a payload.
///
/// Natural keys travel as arrays and primary keys as integers. A primary
/// key standing in for an unpopulated natural key is flagged by wrapping it
/// as `{"pk": n}` so the receiving side can warn about it.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Natural-key values.
    Natural(Vec<Value>),
    /// Primary key of a primary-key-identified type.
    Primary(PrimaryKey),
    /// Primary key used because the natural key was unpopulated.
    Fallback(PrimaryKey),
}

impl Reference {
    /// Converts to the payload form.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Reference::Natural(values) => Json::Array(values.iter().map(Value::to_json).collect()),
            Reference::Primary(pk) => Json::from(pk.get()),
            Reference::Fallback(pk) => {
                let mut map = Map::new();
                map.insert(PK_FIELD.to_string(), Json::from(pk.get()));
                Json::Object(map)
            }
        }
    }

    /// Parses the payload form.
    ///
    /// Returns `None` for null and for anything that is not a reference.
    #[must_use]
    pub fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::Object(map) if map.len() == 1 => map
                .get(PK_FIELD)
                .and_then(Json::as_i64)
                .map(|pk| Reference::Fallback(PrimaryKey(pk))),
            other => Identity::from_json(other).map(Reference::from),
        }
    }

    /// Returns true for flagged fallbacks.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Reference::Fallback(_))
    }

    /// Returns the identity this reference resolves by.
    #[must_use]
    pub fn identity(&self) -> Identity {
        match self {
            Reference::Natural(values) => Identity::NaturalKey(values.clone()),
            Reference::Primary(pk) | Reference::Fallback(pk) => Identity::PrimaryKey(*pk),
        }
    }
}

impl From<Identity> for Reference {
    fn from(identity: Identity) -> Self {
        match identity {
            Identity::PrimaryKey(pk) => Reference::Primary(pk),
            Identity::NaturalKey(values) => Reference::Natural(values),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Fallback(pk) => write!(f, "pk={pk} (fallback)"),
            other => write!(f, "{}", other.identity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_wire_forms() {
        let cases = [
            (Reference::Natural(vec![Value::from("foo")]), json!(["foo"])),
            (Reference::Primary(PrimaryKey(4)), json!(4)),
            (Reference::Fallback(PrimaryKey(4)), json!({"pk": 4})),
        ];
        for (reference, wire) in cases {
            assert_eq!(reference.to_json(), wire);
            assert_eq!(Reference::from_json(&wire), Some(reference));
        }
    }

    #[test]
    fn non_references() {
        assert_eq!(Reference::from_json(&json!(null)), None);
        assert_eq!(Reference::from_json(&json!("foo")), None);
        assert_eq!(Reference::from_json(&json!({"pk": "x"})), None);
        assert_eq!(Reference::from_json(&json!({"pk": 1, "other": 2})), None);
    }

    #[test]
    fn fallback_resolves_as_primary_key() {
        let reference = Reference::Fallback(PrimaryKey(8));
        assert!(reference.is_fallback());
        assert_eq!(reference.identity(), Identity::PrimaryKey(PrimaryKey(8)));
        assert_eq!(reference.to_string(), "pk=8 (fallback)");
    }

    #[test]
    fn payload_text_round_trip() {
        let mut payload = Payload::new();
        payload.insert("pk", json!(["foo"]));
        payload.insert("int_field", json!(3));

        let text = payload.to_json_string().unwrap();
        assert_eq!(text, r#"{"int_field":3,"pk":["foo"]}"#);
        let back = Payload::from_json_str(&text).unwrap();
        assert_eq!(back, payload);
        assert_eq!(
            back.own_reference(),
            Some(Reference::Natural(vec![Value::from("foo")]))
        );
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["int_field", "pk"]);
    }

    #[test]
    fn payload_must_be_object() {
        assert!(matches!(
            Payload::from_json_str("[1, 2]"),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            Payload::from_json_str("{"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }
}
