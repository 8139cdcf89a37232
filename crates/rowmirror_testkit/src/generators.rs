//! Property-based test generators using proptest.

use crate::fixtures::key;
use proptest::prelude::*;
use rowmirror_model::{Identity, PrimaryKey, Record, Value};

/// Strategy for natural-key text: short, non-empty, printable.
pub fn natural_key_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,19}").expect("Invalid regex")
}

/// Strategy for store-assigned primary keys.
pub fn primary_key() -> impl Strategy<Value = PrimaryKey> {
    (1i64..1_000_000).prop_map(PrimaryKey)
}

/// Strategy for scalar values that survive a JSON round trip exactly.
pub fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        ".{0,32}".prop_map(Value::Text),
    ]
}

/// Strategy for identities of either kind.
pub fn identity() -> impl Strategy<Value = Identity> {
    prop_oneof![
        primary_key().prop_map(Identity::PrimaryKey),
        prop::collection::vec(natural_key_text().prop_map(Value::Text), 1..3)
            .prop_map(Identity::NaturalKey),
    ]
}

/// Strategy for the scalar columns of a `testmodel` row.
pub fn test_model_scalars() -> impl Strategy<Value = (String, i64, String)> {
    (
        ".{0,20}",
        any::<i64>(),
        (2000u32..2100, 1u32..13, 1u32..29)
            .prop_map(|(y, m, d)| format!("{y:04}-{m:02}-{d:02}T12:00:00Z")),
    )
}

/// Strategy for unsaved `relatedmodel` rows.
pub fn related_model_record() -> impl Strategy<Value = Record> {
    natural_key_text().prop_map(|text| Record::new(key("relatedmodel")).with("char_field", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn natural_key_text_is_non_empty(text in natural_key_text()) {
            prop_assert!(!text.is_empty());
            prop_assert!(text.len() <= 20);
        }

        #[test]
        fn primary_keys_are_positive(pk in primary_key()) {
            prop_assert!(pk.get() > 0);
        }
    }
}
