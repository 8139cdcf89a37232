//! Identity resolution across independently-keyed stores.

use crate::error::{ResolveError, ResolveResult};
use crate::registry::Registry;
use rowmirror_model::{EntityKey, Identity, PrimaryKey, Record, Value, WatchedEntityType};
use rowmirror_protocol::Reference;
use rowmirror_store::{Filter, RecordStore};

/// Computes identities of records and locates records by identity.
///
/// On the source side it turns records and foreign keys into portable
/// references. On the target side it resolves shipped identities to
/// target-local rows.
///
/// A shipped primary key is a source key. It is matched against the
/// legacy primary-key field when one is configured and declared on the
/// entity type. Otherwise it is taken as the target's own key only if the
/// target keeps source keys for that type: never for natural-keyed types,
/// whose rows always get a target-assigned key, and never once creates
/// reassign keys.
#[derive(Clone, Copy)]
pub struct IdentityResolver<'a> {
    registry: &'a Registry,
    store: &'a dyn RecordStore,
    legacy_pk_field: Option<&'a str>,
    reassigned_pks: bool,
}

impl<'a> IdentityResolver<'a> {
    /// Creates a resolver reading from `store`.
    #[must_use]
    pub fn new(registry: &'a Registry, store: &'a dyn RecordStore) -> Self {
        Self {
            registry,
            store,
            legacy_pk_field: None,
            reassigned_pks: false,
        }
    }

    /// Matches primary-key identities against a legacy field.
    #[must_use]
    pub fn with_legacy_pk_field(mut self, field: Option<&'a str>) -> Self {
        self.legacy_pk_field = field;
        self
    }

    /// Declares that the store assigned its own keys on create, so no
    /// shipped primary key can be used as a store key.
    #[must_use]
    pub fn with_reassigned_pks(mut self, reassigned: bool) -> Self {
        self.reassigned_pks = reassigned;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Returns the store lookups go to.
    #[must_use]
    pub fn store(&self) -> &'a dyn RecordStore {
        self.store
    }

    /// Returns the natural-key values if the type declares a natural key
    /// and every natural-key field is populated.
    #[must_use]
    pub fn natural_key_of(schema: &WatchedEntityType, record: &Record) -> Option<Vec<Value>> {
        schema.natural_key_fields()?
            .iter()
            .map(|f| record.get(f).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// Computes the identity of a record.
    ///
    /// Natural-keyed types with every natural-key field populated get a
    /// natural-key identity; everything else falls back to the primary
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unidentifiable`] if the fallback is needed
    /// but the record has no primary key.
    pub fn identity_of(schema: &WatchedEntityType, record: &Record) -> ResolveResult<Identity> {
        if let Some(values) = Self::natural_key_of(schema, record) {
            return Ok(Identity::NaturalKey(values));
        }
        record
            .pk
            .map(Identity::PrimaryKey)
            .ok_or_else(|| ResolveError::Unidentifiable {
                entity: schema.key.to_string(),
                reason: "record has neither a populated natural key nor a primary key".into(),
            })
    }

    /// Computes the reference to a record, flagging primary keys that
    /// stand in for an unpopulated natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be identified at all.
    pub fn reference_of(schema: &WatchedEntityType, record: &Record) -> ResolveResult<Reference> {
        match Self::identity_of(schema, record)? {
            Identity::PrimaryKey(pk) if schema.uses_natural_key() => {
                tracing::warn!(
                    entity = %schema.key,
                    pk = pk.get(),
                    "natural key unpopulated, referencing by primary key"
                );
                Ok(Reference::Fallback(pk))
            }
            identity => Ok(Reference::from(identity)),
        }
    }

    /// Computes the reference to the record of type `target` with primary
    /// key `pk`, reading it from the store if needed.
    ///
    /// Types without a schema in the registry are referenced by raw
    /// primary key. A missing natural-keyed row is referenced by a flagged
    /// primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reference_to(&self, target: &EntityKey, pk: PrimaryKey) -> ResolveResult<Reference> {
        let Some(schema) = self.registry.schema(target) else {
            tracing::debug!(entity = %target, pk = pk.get(), "unregistered target, embedding raw pk");
            return Ok(Reference::Primary(pk));
        };
        if !schema.uses_natural_key() {
            return Ok(Reference::Primary(pk));
        }
        match self.store.get(target, pk)? {
            Some(record) => Self::reference_of(schema, &record),
            None => {
                tracing::warn!(entity = %target, pk = pk.get(), "referenced row missing, embedding pk");
                Ok(Reference::Fallback(pk))
            }
        }
    }

    /// Finds the single record with the given identity.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The type is unknown ([`ResolveError::UnknownEntity`])
    /// - No record matches ([`ResolveError::NotFound`], retryable)
    /// - Several records match ([`ResolveError::Ambiguous`])
    /// - A natural key is shipped for a type without one, or with a
    ///   different number of fields
    pub fn resolve(&self, entity: &EntityKey, identity: &Identity) -> ResolveResult<Record> {
        let schema = self.registry.require_schema(entity)?;
        let filter = self.filter_for(schema, identity)?;

        let mut matches: Vec<Record> = match (&filter, identity) {
            (None, Identity::PrimaryKey(pk)) => self.store.get(entity, *pk)?.into_iter().collect(),
            (Some(filter), _) => self.store.find(entity, filter)?,
            (None, Identity::NaturalKey(_)) => Vec::new(),
        };

        match matches.len() {
            0 => Err(ResolveError::NotFound {
                entity: entity.to_string(),
                identity: identity.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(ResolveError::Ambiguous {
                entity: entity.to_string(),
                identity: identity.to_string(),
                count,
            }),
        }
    }

    /// Finds the target-local primary key for an identity.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityResolver::resolve`].
    pub fn resolve_pk(&self, entity: &EntityKey, identity: &Identity) -> ResolveResult<PrimaryKey> {
        let record = self.resolve(entity, identity)?;
        record.pk.ok_or_else(|| ResolveError::Unidentifiable {
            entity: entity.to_string(),
            reason: "stored record has no primary key".into(),
        })
    }

    /// Resolves a payload reference to a target-local primary key.
    ///
    /// Flagged fallbacks are resolved as primary-key identities with a
    /// warning. References to types without a schema are taken as raw
    /// primary keys.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityResolver::resolve`].
    pub fn resolve_reference(
        &self,
        entity: &EntityKey,
        reference: &Reference,
    ) -> ResolveResult<PrimaryKey> {
        if self.registry.schema(entity).is_none() {
            if let Reference::Primary(pk) = reference {
                return Ok(*pk);
            }
        }
        if reference.is_fallback() {
            tracing::warn!(
                entity = %entity,
                reference = %reference,
                "resolving flagged primary-key fallback"
            );
        }
        self.resolve_pk(entity, &reference.identity())
    }

    /// Builds the lookup filter for an identity.
    ///
    /// `None` means "look up by the store's own primary key".
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unidentifiable`] if a natural key does not
    /// fit the type, or if a primary key has no usable counterpart in the
    /// store (see the type docs).
    pub fn filter_for(
        &self,
        schema: &WatchedEntityType,
        identity: &Identity,
    ) -> ResolveResult<Option<Filter>> {
        match identity {
            Identity::NaturalKey(values) => {
                let fields = schema.natural_key_fields().ok_or_else(|| {
                    ResolveError::Unidentifiable {
                        entity: schema.key.to_string(),
                        reason: "natural key shipped for a primary-key type".into(),
                    }
                })?;
                if fields.len() != values.len() {
                    return Err(ResolveError::Unidentifiable {
                        entity: schema.key.to_string(),
                        reason: format!(
                            "natural key has {} values, expected {}",
                            values.len(),
                            fields.len()
                        ),
                    });
                }
                let filter = fields
                    .iter()
                    .zip(values)
                    .fold(Filter::new(), |f, (field, value)| f.eq(field.clone(), value.clone()));
                Ok(Some(filter))
            }
            Identity::PrimaryKey(pk) => {
                if let Some(field) = self.legacy_field_of(schema) {
                    return Ok(Some(Filter::new().eq(field, *pk)));
                }
                if schema.uses_natural_key() || self.reassigned_pks {
                    return Err(ResolveError::Unidentifiable {
                        entity: schema.key.to_string(),
                        reason: format!(
                            "primary key {pk} is not a key of this store and no legacy field is declared"
                        ),
                    });
                }
                Ok(None)
            }
        }
    }

    fn legacy_field_of(&self, schema: &WatchedEntityType) -> Option<&'a str> {
        self.legacy_pk_field
            .filter(|field| schema.field_def(field).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::FieldKind;
    use rowmirror_store::MemoryStore;

    fn related() -> WatchedEntityType {
        WatchedEntityType::new("local", "relatedmodel")
            .nullable_field("char_field", FieldKind::Text)
            .natural_key(["char_field"])
    }

    fn slugged() -> WatchedEntityType {
        WatchedEntityType::new("local", "relatedmodelwithslug")
            .field("slug_field", FieldKind::Text)
            .nullable_field("legacy_pk", FieldKind::Integer)
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_entity(related()).unwrap();
        registry.register_entity(slugged()).unwrap();
        registry
    }

    #[test]
    fn identity_is_natural_and_pk_independent() {
        let schema = related();
        let a = Record::new(schema.key.clone()).with_pk(1).with("char_field", "foo");
        let b = Record::new(schema.key.clone()).with_pk(99).with("char_field", "foo");

        let id_a = IdentityResolver::identity_of(&schema, &a).unwrap();
        assert_eq!(id_a, Identity::natural(["foo"]));
        assert_eq!(id_a, IdentityResolver::identity_of(&schema, &a).unwrap());
        assert_eq!(id_a, IdentityResolver::identity_of(&schema, &b).unwrap());
    }

    #[test]
    fn unpopulated_natural_key_falls_back() {
        let schema = related();
        let record = Record::new(schema.key.clone()).with_pk(4).with("char_field", Value::Null);
        assert_eq!(
            IdentityResolver::identity_of(&schema, &record).unwrap(),
            Identity::PrimaryKey(PrimaryKey(4))
        );
        assert_eq!(
            IdentityResolver::reference_of(&schema, &record).unwrap(),
            Reference::Fallback(PrimaryKey(4))
        );

        let unsaved = Record::new(schema.key.clone());
        assert!(matches!(
            IdentityResolver::identity_of(&schema, &unsaved),
            Err(ResolveError::Unidentifiable { .. })
        ));
    }

    #[test]
    fn reference_to_reads_store() {
        let registry = registry();
        let store = MemoryStore::new();
        let pk = store
            .insert(Record::new(related().key).with("char_field", "foo"))
            .unwrap();
        let resolver = IdentityResolver::new(&registry, &store);

        assert_eq!(
            resolver.reference_to(&related().key, pk).unwrap(),
            Reference::Natural(vec![Value::from("foo")])
        );
        assert_eq!(
            resolver.reference_to(&slugged().key, PrimaryKey(3)).unwrap(),
            Reference::Primary(PrimaryKey(3))
        );
        assert_eq!(
            resolver
                .reference_to(&EntityKey::new("other", "thing"), PrimaryKey(5))
                .unwrap(),
            Reference::Primary(PrimaryKey(5))
        );
        assert_eq!(
            resolver.reference_to(&related().key, PrimaryKey(77)).unwrap(),
            Reference::Fallback(PrimaryKey(77))
        );
    }

    #[test]
    fn resolve_by_natural_key_and_pk() {
        let registry = registry();
        let store = MemoryStore::new();
        let pk = store
            .insert(Record::new(related().key).with("char_field", "foo"))
            .unwrap();
        let resolver = IdentityResolver::new(&registry, &store);

        let found = resolver.resolve(&related().key, &Identity::natural(["foo"])).unwrap();
        assert_eq!(found.pk, Some(pk));

        let slug_pk = store
            .insert(Record::new(slugged().key).with("slug_field", "s"))
            .unwrap();
        assert_eq!(
            resolver.resolve_pk(&slugged().key, &Identity::PrimaryKey(slug_pk)).unwrap(),
            slug_pk
        );

        let miss = resolver
            .resolve(&related().key, &Identity::natural(["bar"]))
            .unwrap_err();
        assert!(miss.is_retryable());

        let wrong_arity = resolver
            .resolve(&related().key, &Identity::natural(["a", "b"]))
            .unwrap_err();
        assert!(!wrong_arity.is_retryable());

        let natural_for_pk_type = resolver
            .resolve(&slugged().key, &Identity::natural(["x"]))
            .unwrap_err();
        assert!(matches!(natural_for_pk_type, ResolveError::Unidentifiable { .. }));
    }

    #[test]
    fn ambiguous_natural_key() {
        let registry = registry();
        let store = MemoryStore::new();
        store.insert(Record::new(related().key).with("char_field", "dup")).unwrap();
        store.insert(Record::new(related().key).with("char_field", "dup")).unwrap();
        let resolver = IdentityResolver::new(&registry, &store);

        assert!(matches!(
            resolver.resolve(&related().key, &Identity::natural(["dup"])),
            Err(ResolveError::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn legacy_field_lookup() {
        let registry = registry();
        let store = MemoryStore::new();
        let target_pk = store
            .insert(Record::new(slugged().key).with("slug_field", "s").with("legacy_pk", 40))
            .unwrap();
        let resolver = IdentityResolver::new(&registry, &store).with_legacy_pk_field(Some("legacy_pk"));

        let source_identity = Identity::PrimaryKey(PrimaryKey(40));
        assert_eq!(
            resolver.resolve_pk(&slugged().key, &source_identity).unwrap(),
            target_pk
        );

        // Types without the field keep primary-key lookups.
        let plain = IdentityResolver::new(&registry, &store).with_legacy_pk_field(Some("absent"));
        assert_eq!(
            plain
                .resolve_pk(&slugged().key, &Identity::PrimaryKey(target_pk))
                .unwrap(),
            target_pk
        );
    }

    #[test]
    fn natural_keyed_rows_are_never_found_by_raw_pk() {
        let registry = registry();
        let store = MemoryStore::new();
        let pk = store
            .insert(Record::new(related().key).with("char_field", "unrelated"))
            .unwrap();
        let resolver = IdentityResolver::new(&registry, &store);

        let err = resolver
            .resolve(&related().key, &Identity::PrimaryKey(pk))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unidentifiable { .. }));
        assert!(!err.is_retryable());
        assert!(matches!(
            resolver.resolve_reference(&related().key, &Reference::Fallback(pk)),
            Err(ResolveError::Unidentifiable { .. })
        ));
    }

    #[test]
    fn fallback_resolves_through_the_legacy_field() {
        let schema = related().nullable_field("legacy_pk", FieldKind::Integer);
        let mut registry = Registry::new();
        registry.register_entity(schema.clone()).unwrap();
        let store = MemoryStore::new();
        store
            .insert(Record::new(schema.key.clone()).with("char_field", "unrelated"))
            .unwrap();
        let target_pk = store
            .insert(
                Record::new(schema.key.clone())
                    .with("char_field", Value::Null)
                    .with("legacy_pk", 1),
            )
            .unwrap();
        let resolver = IdentityResolver::new(&registry, &store).with_legacy_pk_field(Some("legacy_pk"));

        assert_eq!(
            resolver
                .resolve_reference(&schema.key, &Reference::Fallback(PrimaryKey(1)))
                .unwrap(),
            target_pk
        );
    }

    #[test]
    fn reassigned_pks_need_the_legacy_field() {
        let registry = registry();
        let store = MemoryStore::new();
        let pk = store
            .insert(Record::new(slugged().key).with("slug_field", "other"))
            .unwrap();

        let reassigned = IdentityResolver::new(&registry, &store).with_reassigned_pks(true);
        assert!(matches!(
            reassigned.resolve_reference(&slugged().key, &Reference::Primary(pk)),
            Err(ResolveError::Unidentifiable { .. })
        ));

        let with_legacy = reassigned.with_legacy_pk_field(Some("legacy_pk"));
        assert!(matches!(
            with_legacy.resolve_reference(&slugged().key, &Reference::Primary(pk)),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn resolve_reference_rules() {
        let registry = registry();
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&registry, &store);
        assert_eq!(
            resolver
                .resolve_reference(&EntityKey::new("other", "thing"), &Reference::Primary(PrimaryKey(9)))
                .unwrap(),
            PrimaryKey(9)
        );
        assert!(matches!(
            resolver.resolve_reference(
                &EntityKey::new("other", "thing"),
                &Reference::Natural(vec![Value::from("x")])
            ),
            Err(ResolveError::UnknownEntity(_))
        ));
    }
}
