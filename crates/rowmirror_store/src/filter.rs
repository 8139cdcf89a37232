//! Equality filters over records.

use rowmirror_model::{PrimaryKey, Record, Value, PK_FIELD};
use std::fmt;

/// A conjunction of field equality conditions.
///
/// The reserved field name `pk` matches the record's primary key.
/// A condition on `Value::Null` also matches records where the field is
/// absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Creates an empty filter, which matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter matching a single primary key.
    #[must_use]
    pub fn pk(pk: PrimaryKey) -> Self {
        Self::new().eq(PK_FIELD, pk)
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Returns true if there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Returns the conditions in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Returns true if the record satisfies every condition.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            if field == PK_FIELD {
                return record.pk.map(Value::from).as_ref() == Some(expected);
            }
            match record.get(field) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            }
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return write!(f, "<all>");
        }
        for (i, (field, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{field} = {value}")?;
        }
        Ok(())
    }
}
