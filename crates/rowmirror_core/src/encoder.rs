//! Record payload encoding and decoding.

use crate::error::CodecResult;
use crate::identity::IdentityResolver;
use rowmirror_model::{
    FieldDef, FieldKind, ManyToManyDef, PrimaryKey, Record, Value, WatchedEntityType, PK_FIELD,
};
use rowmirror_protocol::{Payload, Reference};
use rowmirror_store::Filter;
use serde_json::Value as Json;
use std::fmt;

/// Encodes live records into store-agnostic payloads.
///
/// Foreign keys and many-to-many associations are embedded as references
/// (natural key where available, primary key otherwise), never as raw
/// object data.
#[derive(Clone, Copy)]
pub struct ChangeEncoder<'a> {
    resolver: IdentityResolver<'a>,
}

impl<'a> ChangeEncoder<'a> {
    /// Creates an encoder reading related records through `resolver`.
    #[must_use]
    pub fn new(resolver: IdentityResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Encodes the full state of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be identified or the source
    /// store cannot be read.
    pub fn encode(&self, schema: &WatchedEntityType, record: &Record) -> CodecResult<Payload> {
        let mut payload = Payload::new();

        let own = IdentityResolver::reference_of(schema, record)?;
        payload.insert(PK_FIELD, own.to_json());

        for field in &schema.fields {
            let value = record.get(&field.name).cloned().unwrap_or_default();
            let encoded = match (&field.kind, value) {
                (_, Value::Null) => Json::Null,
                (FieldKind::ForeignKey { target }, Value::Integer(pk)) => {
                    self.resolver.reference_to(target, PrimaryKey(pk))?.to_json()
                }
                (FieldKind::ForeignKey { .. }, other) => {
                    tracing::warn!(
                        entity = %schema.key,
                        field = %field.name,
                        kind = other.kind_name(),
                        "foreign key is not an integer, skipping"
                    );
                    continue;
                }
                (_, scalar) => scalar.to_json(),
            };
            payload.insert(field.name.clone(), encoded);
        }

        for relation in &schema.many_to_many {
            let references = match record.pk {
                Some(pk) => self.associated_references(relation, pk)?,
                None => Vec::new(),
            };
            payload.insert(
                relation.name.clone(),
                Json::Array(references.iter().map(Reference::to_json).collect()),
            );
        }

        Ok(payload)
    }

    /// References to every counterpart associated with `owner`, ordered by
    /// the counterpart's primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the source store cannot be read.
    pub fn associated_references(
        &self,
        relation: &ManyToManyDef,
        owner: PrimaryKey,
    ) -> CodecResult<Vec<Reference>> {
        let rows = self.resolver.store().find(
            &relation.through,
            &Filter::new().eq(relation.source_column.clone(), owner),
        )?;
        let mut others: Vec<PrimaryKey> = rows
            .iter()
            .filter_map(|row| row.foreign_key(&relation.target_column))
            .collect();
        others.sort();
        others.dedup();

        let mut references = Vec::with_capacity(others.len());
        for pk in others {
            references.push(self.resolver.reference_to(&relation.target, pk)?);
        }
        Ok(references)
    }
}

/// Why a payload entry was dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    /// Payload key.
    pub field: String,
    /// Reason it was dropped.
    pub reason: String,
}

impl fmt::Display for SkippedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Associations to apply once the parent row has a target pk.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAssociation {
    /// Relation name on the owner.
    pub relation: String,
    /// Counterpart references, not yet resolved.
    pub references: Vec<Reference>,
}

/// The result of decoding a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// The record with foreign keys resolved to target pks. Its pk is
    /// never set.
    pub record: Record,
    /// The record's own shipped reference (the payload's `pk`).
    pub shipped: Option<Reference>,
    /// Many-to-many relations to apply after the parent is persisted.
    pub associations: Vec<PendingAssociation>,
    /// Entries dropped during decoding.
    pub skipped: Vec<SkippedField>,
}

/// Decodes payloads into target-side records.
#[derive(Clone, Copy)]
pub struct ChangeDecoder<'a> {
    resolver: IdentityResolver<'a>,
}

impl<'a> ChangeDecoder<'a> {
    /// Creates a decoder resolving references through `resolver`, which
    /// must read the target store.
    #[must_use]
    pub fn new(resolver: IdentityResolver<'a>) -> Self {
        Self { resolver }
    }

    /// Decodes a payload.
    ///
    /// Unknown keys and values of the wrong shape are dropped and listed in
    /// [`DecodedRecord::skipped`]. A foreign key may also arrive under its
    /// `<field>_id` alias.
    ///
    /// # Errors
    ///
    /// Returns an error if a foreign-key reference cannot be resolved in the
    /// target store (retryable when the row is merely missing).
    pub fn decode(&self, schema: &WatchedEntityType, payload: &Payload) -> CodecResult<DecodedRecord> {
        let mut decoded = DecodedRecord {
            record: Record::new(schema.key.clone()),
            shipped: None,
            associations: Vec::new(),
            skipped: Vec::new(),
        };

        for (key, json) in payload.iter() {
            if key == PK_FIELD {
                match Reference::from_json(json) {
                    Some(reference) => decoded.shipped = Some(reference),
                    None if json.is_null() => {}
                    None => skip(schema, &mut decoded, key, "own identity is not a reference"),
                }
                continue;
            }

            if let Some(field) = field_for_key(schema, key) {
                match self.decode_field(field, json)? {
                    Ok(value) => decoded.record.set(field.name.clone(), value),
                    Err(reason) => skip(schema, &mut decoded, key, reason),
                }
                continue;
            }

            if let Some(relation) = schema.relation(key) {
                let Some(items) = json.as_array() else {
                    skip(schema, &mut decoded, key, "many-to-many value is not a list");
                    continue;
                };
                let mut references = Vec::with_capacity(items.len());
                for item in items {
                    match Reference::from_json(item) {
                        Some(reference) => references.push(reference),
                        None => skip(schema, &mut decoded, key, "list entry is not a reference"),
                    }
                }
                decoded.associations.push(PendingAssociation {
                    relation: relation.name.clone(),
                    references,
                });
                continue;
            }

            skip(schema, &mut decoded, key, "unknown field");
        }

        Ok(decoded)
    }

    /// Resolves the references of a pending association to target pks.
    ///
    /// # Errors
    ///
    /// Returns an error if any reference cannot be resolved.
    pub fn resolve_association(
        &self,
        relation: &ManyToManyDef,
        pending: &PendingAssociation,
    ) -> CodecResult<Vec<PrimaryKey>> {
        let mut pks = Vec::with_capacity(pending.references.len());
        for reference in &pending.references {
            pks.push(self.resolver.resolve_reference(&relation.target, reference)?);
        }
        Ok(pks)
    }

    fn decode_field(
        &self,
        field: &FieldDef,
        json: &Json,
    ) -> CodecResult<Result<Value, &'static str>> {
        if json.is_null() {
            return Ok(if field.nullable {
                Ok(Value::Null)
            } else {
                Err("null for a non-nullable field")
            });
        }

        if let Some(target) = field.foreign_target() {
            let Some(reference) = Reference::from_json(json) else {
                return Ok(Err("foreign key is not a reference"));
            };
            let pk = self.resolver.resolve_reference(target, &reference)?;
            return Ok(Ok(Value::from(pk)));
        }

        let Some(value) = Value::from_json(json) else {
            return Ok(Err("value is not a scalar"));
        };
        if !field.accepts(&value) {
            return Ok(Err("value has the wrong type"));
        }
        Ok(Ok(value))
    }
}

fn field_for_key<'s>(schema: &'s WatchedEntityType, key: &str) -> Option<&'s FieldDef> {
    if let Some(field) = schema.field_def(key) {
        return Some(field);
    }
    key.strip_suffix("_id")
        .and_then(|base| schema.field_def(base))
        .filter(|field| field.foreign_target().is_some())
}

fn skip(schema: &WatchedEntityType, decoded: &mut DecodedRecord, key: &str, reason: &str) {
    tracing::warn!(entity = %schema.key, field = key, reason, "dropping payload entry");
    decoded.skipped.push(SkippedField {
        field: key.to_string(),
        reason: reason.to_string(),
    });
}
