//! Record identities.

use crate::record::PrimaryKey;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// How a record is addressed across stores.
///
/// On the wire a natural key is a JSON array of scalars and a primary key
/// is a bare JSON integer.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    /// Store-local primary key. Not portable between stores.
    PrimaryKey(PrimaryKey),
    /// Ordered natural-key values. Portable between stores.
    NaturalKey(Vec<Value>),
}

impl Identity {
    /// Creates a natural-key identity.
    pub fn natural<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Identity::NaturalKey(values.into_iter().map(Into::into).collect())
    }

    /// Returns true for natural-key identities.
    #[must_use]
    pub fn is_natural(&self) -> bool {
        matches!(self, Identity::NaturalKey(_))
    }

    /// Returns the primary key if this is a primary-key identity.
    #[must_use]
    pub fn primary_key(&self) -> Option<PrimaryKey> {
        match self {
            Identity::PrimaryKey(pk) => Some(*pk),
            Identity::NaturalKey(_) => None,
        }
    }

    /// Returns the natural-key values if this is a natural-key identity.
    #[must_use]
    pub fn natural_key(&self) -> Option<&[Value]> {
        match self {
            Identity::PrimaryKey(_) => None,
            Identity::NaturalKey(values) => Some(values),
        }
    }

    /// Converts to the JSON wire form.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Identity::PrimaryKey(pk) => serde_json::Value::from(pk.get()),
            Identity::NaturalKey(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Parses the JSON wire form.
    ///
    /// Returns `None` for anything other than an integer or an array of
    /// scalars.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Number(n) => n.as_i64().map(|i| Identity::PrimaryKey(PrimaryKey(i))),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Identity::NaturalKey),
            _ => None,
        }
    }
}

impl From<PrimaryKey> for Identity {
    fn from(pk: PrimaryKey) -> Self {
        Identity::PrimaryKey(pk)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::PrimaryKey(pk) => write!(f, "pk={pk}"),
            Identity::NaturalKey(values) => {
                write!(f, "natural(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Identity::from_json(&json).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "expected an integer primary key or an array natural key, got {json}"
            ))
        })
    }
}
