//! Fixture schemas and store helpers.
//!
//! The `local` model family: natural-keyed and primary-keyed related
//! types, a `testmodel` with foreign keys and many-to-many relations to
//! both kinds, and two reverse-relation types that are never registered.

use rowmirror_core::Registry;
use rowmirror_model::{EntityKey, FieldKind, WatchedEntityType};
use rowmirror_store::MemoryStore;
use std::sync::Arc;

/// Namespace of every fixture type.
pub const NAMESPACE: &str = "local";

/// Key of a fixture type.
pub fn key(name: &str) -> EntityKey {
    EntityKey::new(NAMESPACE, name)
}

/// Natural-keyed by `char_field`.
pub fn related_model() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "relatedmodel")
        .nullable_field("char_field", FieldKind::Text)
        .natural_key(["char_field"])
}

/// Primary-keyed, with a non-unique slug.
pub fn related_model_with_slug() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "relatedmodelwithslug")
        .field("slug_field", FieldKind::Text)
        .field("char_field", FieldKind::Text)
}

/// Primary-keyed many-to-many counterpart.
pub fn m2m_related_model() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "m2mrelatedmodel").field("char_field", FieldKind::Text)
}

/// Natural-keyed (by `slug_field`) many-to-many counterpart.
pub fn m2m_related_model_with_slug() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "m2mrelatedmodelwithslug")
        .field("slug_field", FieldKind::Text)
        .field("char_field", FieldKind::Text)
        .natural_key(["slug_field"])
}

/// The primary-keyed type under test.
pub fn test_model() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "testmodel")
        .field("char_field", FieldKind::Text)
        .field("int_field", FieldKind::Integer)
        .field("datetime_field", FieldKind::DateTime)
        .foreign_key("fk_field", key("relatedmodel"))
        .foreign_key("fk_slug_field", key("relatedmodelwithslug"))
        .many_to_many("m2m_field", key("m2mrelatedmodel"))
        .many_to_many("m2m_slug_field", key("m2mrelatedmodelwithslug"))
}

/// Holds a foreign key to `testmodel`; never registered.
pub fn reverse_relation_model() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "reverserelationmodel")
        .foreign_key("fk_field", key("testmodel"))
}

/// Holds a many-to-many relation to `testmodel`; never registered.
pub fn reverse_m2m_relation_model() -> WatchedEntityType {
    WatchedEntityType::new(NAMESPACE, "reversem2mrelationmodel")
        .many_to_many("m2m_field", key("testmodel"))
}

/// The registered fixture types.
pub fn registered_schemas() -> Vec<WatchedEntityType> {
    vec![
        related_model(),
        related_model_with_slug(),
        m2m_related_model(),
        m2m_related_model_with_slug(),
        test_model(),
    ]
}

/// Every fixture type, registered or not.
pub fn all_schemas() -> Vec<WatchedEntityType> {
    let mut all = registered_schemas();
    all.push(reverse_relation_model());
    all.push(reverse_m2m_relation_model());
    all
}

/// A registry of the registered fixture types.
///
/// # Panics
///
/// Panics if a fixture schema is invalid.
pub fn registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    for schema in registered_schemas() {
        registry
            .register_entity(schema)
            .expect("fixture schema must be valid");
    }
    Arc::new(registry)
}

/// A store enforcing the unique keys of every fixture type, including
/// the association types of every relation.
pub fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for schema in all_schemas() {
        store.register(&schema);
        for through in schema.through_types() {
            store.register(&through);
        }
    }
    Arc::new(store)
}
