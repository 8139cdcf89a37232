//! Records and primary keys.

use crate::entity::EntityKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A store-local, store-assigned row identifier.
///
/// Primary keys are only meaningful inside the store that assigned them.
/// Two stores may hold the same logical record under different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(pub i64);

impl PrimaryKey {
    /// Returns the raw integer.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<PrimaryKey> for Value {
    fn from(pk: PrimaryKey) -> Self {
        Value::Integer(pk.0)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single row of a watched entity type.
///
/// Fields are keyed by name. Foreign-key fields hold the related row's
/// local primary key; many-to-many associations are not stored on the
/// record but in the association entity's rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The entity type this row belongs to.
    pub entity: EntityKey,
    /// Local primary key, `None` until the store assigns one.
    #[serde(default)]
    pub pk: Option<PrimaryKey>,
    /// Field values by name.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record of the given type.
    pub fn new(entity: EntityKey) -> Self {
        Self {
            entity,
            pk: None,
            fields: BTreeMap::new(),
        }
    }

    /// Sets the primary key (builder style).
    #[must_use]
    pub fn with_pk(mut self, pk: impl Into<PrimaryKey>) -> Self {
        self.pk = Some(pk.into());
        self
    }

    /// Sets a field (builder style).
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Sets a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Gets a field value. Missing fields return `None`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns the primary key stored in a foreign-key field.
    ///
    /// Returns `None` when the field is missing, null, or not an integer.
    #[must_use]
    pub fn foreign_key(&self, field: &str) -> Option<PrimaryKey> {
        self.get(field)
            .and_then(Value::as_integer)
            .map(PrimaryKey)
    }

    /// Returns true if the field is present and not null.
    #[must_use]
    pub fn is_populated(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !v.is_null())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pk {
            Some(pk) => write!(f, "{}#{}", self.entity, pk),
            None => write!(f, "{}#new", self.entity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EntityKey {
        EntityKey::new("local", "testmodel")
    }

    #[test]
    fn builder_and_accessors() {
        let record = Record::new(key())
            .with_pk(3)
            .with("char_field", "foo")
            .with("fk_field", 12)
            .with("maybe", Value::Null);

        assert_eq!(record.pk, Some(PrimaryKey(3)));
        assert_eq!(record.get("char_field").and_then(Value::as_text), Some("foo"));
        assert_eq!(record.foreign_key("fk_field"), Some(PrimaryKey(12)));
        assert_eq!(record.foreign_key("char_field"), None);
        assert!(record.is_populated("char_field"));
        assert!(!record.is_populated("maybe"));
        assert!(!record.is_populated("absent"));
    }

    #[test]
    fn display() {
        let record = Record::new(key()).with_pk(5);
        assert_eq!(record.to_string(), "local.testmodel#5");
        assert_eq!(Record::new(key()).to_string(), "local.testmodel#new");
    }

    #[test]
    fn serde_shape() {
        let record = Record::new(key()).with_pk(1).with("int_field", 5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["pk"], serde_json::json!(1));
        assert_eq!(json["fields"]["int_field"], serde_json::json!(5));

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
