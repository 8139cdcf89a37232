//! Schema descriptors for watched entity types.

use crate::error::{ModelError, ModelResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Reserved payload key carrying a record's own identity.
pub const PK_FIELD: &str = "pk";

/// Fully-qualified name of an entity type: `namespace.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey {
    /// Application / namespace label.
    pub namespace: String,
    /// Type name within the namespace.
    pub name: String,
}

impl EntityKey {
    /// Creates an entity key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for EntityKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ModelError::InvalidEntityKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for EntityKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

/// Semantic type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Boolean.
    Boolean,
    /// Signed integer.
    Integer,
    /// Floating point (integers are accepted too).
    Float,
    /// Text.
    Text,
    /// Timestamp as RFC 3339 text.
    DateTime,
    /// Reference to a row of another entity type, stored as its local pk.
    ForeignKey {
        /// The referenced entity type.
        target: EntityKey,
    },
}

impl FieldKind {
    /// Returns true if a non-null value has an acceptable shape for this kind.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Integer, Value::Integer(_)) => true,
            (FieldKind::Float, Value::Integer(_) | Value::Float(_)) => true,
            (FieldKind::Text | FieldKind::DateTime, Value::Text(_)) => true,
            (FieldKind::ForeignKey { .. }, Value::Integer(_)) => true,
            _ => false,
        }
    }
}

/// A declared field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Semantic type.
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Whether null is a legal value.
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    /// Creates a non-nullable field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Returns the referenced entity type for foreign keys.
    #[must_use]
    pub fn foreign_target(&self) -> Option<&EntityKey> {
        match &self.kind {
            FieldKind::ForeignKey { target } => Some(target),
            _ => None,
        }
    }

    /// Returns true if the value may be stored in this field.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            self.nullable
        } else {
            self.kind.accepts(value)
        }
    }
}

/// How records of a type are identified across stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Store-local primary key only.
    PrimaryKey,
    /// Natural key made of the listed fields, in order.
    NaturalKey {
        /// Natural-key field names.
        fields: Vec<String>,
    },
}

impl Default for IdentityStrategy {
    fn default() -> Self {
        IdentityStrategy::PrimaryKey
    }
}

/// A many-to-many relation declared on its owner type.
///
/// Each association instance is a row of the `through` entity type, which
/// has two foreign-key columns: `source_column` pointing at the owner and
/// `target_column` pointing at the counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManyDef {
    /// Relation name on the owner.
    pub name: String,
    /// Counterpart entity type.
    pub target: EntityKey,
    /// Association ("through") entity type.
    pub through: EntityKey,
    /// Column of the through type referencing the owner.
    pub source_column: String,
    /// Column of the through type referencing the counterpart.
    pub target_column: String,
}

impl ManyToManyDef {
    /// Creates a relation with the conventional through type and column names.
    ///
    /// The through type is `<owner>_<relation>` in the owner's namespace;
    /// columns are named after the two entity types (`from_`/`to_` prefixed
    /// for self-relations).
    pub fn new(owner: &EntityKey, name: impl Into<String>, target: EntityKey) -> Self {
        let name = name.into();
        let through = EntityKey::new(owner.namespace.clone(), format!("{}_{}", owner.name, name));
        let (source_column, target_column) = if owner.name == target.name {
            (format!("from_{}", owner.name), format!("to_{}", target.name))
        } else {
            (owner.name.clone(), target.name.clone())
        };
        Self {
            name,
            target,
            through,
            source_column,
            target_column,
        }
    }

    /// Builds the schema of the association entity type.
    #[must_use]
    pub fn through_type(&self, owner: &EntityKey) -> WatchedEntityType {
        WatchedEntityType {
            key: self.through.clone(),
            identity: IdentityStrategy::PrimaryKey,
            fields: vec![
                FieldDef::new(
                    self.source_column.clone(),
                    FieldKind::ForeignKey {
                        target: owner.clone(),
                    },
                ),
                FieldDef::new(
                    self.target_column.clone(),
                    FieldKind::ForeignKey {
                        target: self.target.clone(),
                    },
                ),
            ],
            many_to_many: Vec::new(),
            association: true,
        }
    }
}

/// A record type enrolled for replication.
///
/// Built once at process start and shared immutably afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEntityType {
    /// Fully-qualified type name.
    pub key: EntityKey,
    /// Identity strategy.
    #[serde(default)]
    pub identity: IdentityStrategy,
    /// Declared fields (excluding the primary key).
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Declared many-to-many relations.
    #[serde(default)]
    pub many_to_many: Vec<ManyToManyDef>,
    /// True for association ("through") types.
    #[serde(default)]
    pub association: bool,
}

impl WatchedEntityType {
    /// Creates a primary-key-identified type with no fields.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(namespace, name),
            identity: IdentityStrategy::PrimaryKey,
            fields: Vec::new(),
            many_to_many: Vec::new(),
            association: false,
        }
    }

    /// Adds a non-nullable field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef::new(name, kind));
        self
    }

    /// Adds a nullable field.
    #[must_use]
    pub fn nullable_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let mut def = FieldDef::new(name, kind);
        def.nullable = true;
        self.fields.push(def);
        self
    }

    /// Adds a non-nullable foreign key to `target`.
    #[must_use]
    pub fn foreign_key(self, name: impl Into<String>, target: EntityKey) -> Self {
        self.field(name, FieldKind::ForeignKey { target })
    }

    /// Adds a many-to-many relation with conventional naming.
    #[must_use]
    pub fn many_to_many(mut self, name: impl Into<String>, target: EntityKey) -> Self {
        let def = ManyToManyDef::new(&self.key, name, target);
        self.many_to_many.push(def);
        self
    }

    /// Switches to a natural-key identity over the given fields.
    #[must_use]
    pub fn natural_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity = IdentityStrategy::NaturalKey {
            fields: fields.into_iter().map(Into::into).collect(),
        };
        self
    }

    /// Returns true if the type declares a natural key.
    #[must_use]
    pub fn uses_natural_key(&self) -> bool {
        matches!(self.identity, IdentityStrategy::NaturalKey { .. })
    }

    /// Returns the natural-key field names, if any.
    #[must_use]
    pub fn natural_key_fields(&self) -> Option<&[String]> {
        match &self.identity {
            IdentityStrategy::NaturalKey { fields } => Some(fields),
            IdentityStrategy::PrimaryKey => None,
        }
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a declared many-to-many relation.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&ManyToManyDef> {
        self.many_to_many.iter().find(|r| r.name == name)
    }

    /// Looks up a relation, failing with [`ModelError::UnknownRelation`].
    pub fn require_relation(&self, name: &str) -> ModelResult<&ManyToManyDef> {
        self.relation(name).ok_or_else(|| ModelError::UnknownRelation {
            entity: self.key.to_string(),
            relation: name.to_string(),
        })
    }

    /// Iterates over foreign-key fields and their targets.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&FieldDef, &EntityKey)> {
        self.fields
            .iter()
            .filter_map(|f| f.foreign_target().map(|target| (f, target)))
    }

    /// Builds the association types of every many-to-many relation.
    #[must_use]
    pub fn through_types(&self) -> Vec<WatchedEntityType> {
        self.many_to_many
            .iter()
            .map(|rel| rel.through_type(&self.key))
            .collect()
    }

    /// Checks the descriptor for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidSchema`] if:
    /// - a field or relation name is empty, duplicated, or the reserved `pk`
    /// - the natural key is empty or names an undeclared or foreign-key field
    /// - a relation uses the same column for both ends
    /// - an association type does not have exactly two foreign keys
    pub fn validate(&self) -> ModelResult<()> {
        let fail = |reason: String| Err(ModelError::invalid_schema(&self.key, reason));

        if self.key.namespace.is_empty() || self.key.name.is_empty() {
            return fail("entity key has an empty namespace or name".into());
        }

        let mut seen = HashSet::new();
        for name in self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.many_to_many.iter().map(|r| r.name.as_str()))
        {
            if name.is_empty() {
                return fail("empty field name".into());
            }
            if name == PK_FIELD {
                return fail(format!("'{PK_FIELD}' is reserved"));
            }
            if !seen.insert(name) {
                return fail(format!("duplicate field '{name}'"));
            }
        }

        if let Some(fields) = self.natural_key_fields() {
            if fields.is_empty() {
                return fail("natural key has no fields".into());
            }
            for name in fields {
                match self.field_def(name) {
                    None => return fail(format!("natural key field '{name}' is not declared")),
                    Some(def) if def.foreign_target().is_some() => {
                        return fail(format!("natural key field '{name}' is a foreign key"))
                    }
                    Some(_) => {}
                }
            }
        }

        for rel in &self.many_to_many {
            if rel.source_column == rel.target_column {
                return fail(format!(
                    "relation '{}' uses '{}' for both ends",
                    rel.name, rel.source_column
                ));
            }
        }

        if self.association && self.foreign_keys().count() != 2 {
            return fail("association types need exactly two foreign keys".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn related() -> WatchedEntityType {
        WatchedEntityType::new("local", "relatedmodel")
            .field("char_field", FieldKind::Text)
            .natural_key(["char_field"])
    }

    #[test]
    fn entity_key_parse_and_display() {
        let key: EntityKey = "local.testmodel".parse().unwrap();
        assert_eq!(key, EntityKey::new("local", "testmodel"));
        assert_eq!(key.to_string(), "local.testmodel");

        assert!("testmodel".parse::<EntityKey>().is_err());
        assert!(".x".parse::<EntityKey>().is_err());
        assert!("a.b.c".parse::<EntityKey>().is_err());
    }

    #[test]
    fn entity_key_serde_as_string() {
        let key = EntityKey::new("local", "testmodel");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""local.testmodel""#);
        let back: EntityKey = serde_json::from_str(r#""local.testmodel""#).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<EntityKey>(r#""nodot""#).is_err());
    }

    #[test]
    fn builder_and_lookups() {
        let related = related();
        let schema = WatchedEntityType::new("local", "testmodel")
            .field("char_field", FieldKind::Text)
            .nullable_field("note", FieldKind::Text)
            .foreign_key("fk_field", related.key.clone())
            .many_to_many("tags", EntityKey::new("local", "tag"));

        assert!(related.uses_natural_key());
        assert!(!schema.uses_natural_key());
        assert_eq!(related.natural_key_fields(), Some(&["char_field".to_string()][..]));
        assert!(schema.field_def("note").unwrap().nullable);
        assert_eq!(schema.foreign_keys().count(), 1);
        assert!(schema.relation("tags").is_some());
        assert!(schema.require_relation("nope").is_err());
        schema.validate().unwrap();
        related.validate().unwrap();
    }

    #[test]
    fn through_type_naming() {
        let owner = EntityKey::new("local", "testmodel");
        let rel = ManyToManyDef::new(&owner, "m2m_field", EntityKey::new("local", "m2mrelatedmodel"));
        assert_eq!(rel.through, EntityKey::new("local", "testmodel_m2m_field"));
        assert_eq!(rel.source_column, "testmodel");
        assert_eq!(rel.target_column, "m2mrelatedmodel");

        let through = rel.through_type(&owner);
        assert!(through.association);
        assert_eq!(
            through.field_def("testmodel").and_then(FieldDef::foreign_target),
            Some(&owner)
        );
        through.validate().unwrap();

        let selfrel = ManyToManyDef::new(&owner, "friends", owner.clone());
        assert_eq!(selfrel.source_column, "from_testmodel");
        assert_eq!(selfrel.target_column, "to_testmodel");
    }

    #[test]
    fn validation_failures() {
        let dup = WatchedEntityType::new("a", "b")
            .field("x", FieldKind::Text)
            .field("x", FieldKind::Integer);
        assert!(dup.validate().is_err());

        let reserved = WatchedEntityType::new("a", "b").field("pk", FieldKind::Integer);
        assert!(reserved.validate().is_err());

        let undeclared = WatchedEntityType::new("a", "b").natural_key(["slug"]);
        assert!(undeclared.validate().is_err());

        let fk_key = WatchedEntityType::new("a", "b")
            .foreign_key("parent", EntityKey::new("a", "c"))
            .natural_key(["parent"]);
        assert!(fk_key.validate().is_err());

        let empty_key = WatchedEntityType::new("a", "b").natural_key(Vec::<String>::new());
        assert!(empty_key.validate().is_err());
    }

    #[test]
    fn field_acceptance() {
        let text = FieldDef::new("t", FieldKind::Text);
        assert!(text.accepts(&Value::from("x")));
        assert!(!text.accepts(&Value::Integer(1)));
        assert!(!text.accepts(&Value::Null));

        let mut float = FieldDef::new("f", FieldKind::Float);
        float.nullable = true;
        assert!(float.accepts(&Value::Integer(1)));
        assert!(float.accepts(&Value::Float(0.5)));
        assert!(float.accepts(&Value::Null));
    }

    #[test]
    fn schema_json_shape() {
        let json = serde_json::json!({
            "key": "local.testmodel",
            "fields": [
                {"name": "char_field", "type": "text"},
                {"name": "fk_field", "type": "foreign_key", "target": "local.relatedmodel"}
            ],
            "identity": {"strategy": "natural_key", "fields": ["char_field"]}
        });
        let schema: WatchedEntityType = serde_json::from_value(json).unwrap();
        assert!(schema.uses_natural_key());
        assert_eq!(
            schema.field_def("fk_field").and_then(FieldDef::foreign_target),
            Some(&EntityKey::new("local", "relatedmodel"))
        );
        assert!(schema.many_to_many.is_empty());
        schema.validate().unwrap();
    }
}
