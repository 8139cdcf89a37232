//! In-memory record store.

use crate::backend::RecordStore;
use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use parking_lot::{Mutex, RwLock};
use rowmirror_model::{EntityKey, PrimaryKey, Record, Value, WatchedEntityType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// A failure the store can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with [`StoreError::Unavailable`].
    Unavailable,
    /// Fail with [`StoreError::LockConflict`].
    LockConflict,
}

impl Fault {
    fn to_error(self) -> StoreError {
        match self {
            Fault::Unavailable => StoreError::Unavailable("injected fault".into()),
            Fault::LockConflict => StoreError::LockConflict("injected fault".into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<PrimaryKey, Record>,
    next_pk: i64,
}

impl Table {
    fn allocate_pk(&mut self) -> PrimaryKey {
        self.next_pk = self.next_pk.max(1);
        let pk = PrimaryKey(self.next_pk);
        self.next_pk += 1;
        pk
    }
}

/// Serializable contents of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// The entity type.
    pub entity: EntityKey,
    /// Next primary key the table will assign.
    pub next_pk: i64,
    /// Rows ordered by primary key.
    pub rows: Vec<Record>,
}

/// Serializable contents of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// One entry per non-empty table, ordered by entity key.
    pub tables: Vec<TableSnapshot>,
}

impl StoreSnapshot {
    /// Total number of rows across all tables.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// An in-memory [`RecordStore`].
///
/// Tables are created on first insert. Unique keys are declared per entity
/// type with [`MemoryStore::register`] (natural keys and association
/// endpoint pairs) or [`MemoryStore::add_unique`].
///
/// # Thread Safety
///
/// The store is `Send + Sync`. Writes and transactions are serialized by
/// a single writer lock; a failed transaction restores the tables it saw
/// at its start.
///
/// # Example
///
/// ```rust
/// use rowmirror_model::{EntityKey, Record};
/// use rowmirror_store::{MemoryStore, RecordStore};
///
/// let store = MemoryStore::new();
/// let key = EntityKey::new("local", "tag");
/// store.add_unique(&key, ["name"]);
///
/// store.insert(Record::new(key.clone()).with("name", "rust")).unwrap();
/// assert!(store.insert(Record::new(key).with("name", "rust")).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<EntityKey, Table>>,
    unique: RwLock<HashMap<EntityKey, Vec<Vec<String>>>>,
    writer: Mutex<()>,
    faults: Mutex<Vec<Fault>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the snapshot's rows.
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        store.restore(snapshot);
        store
    }

    /// Declares the unique keys implied by an entity type.
    ///
    /// Natural-key types get a unique key over their natural-key fields;
    /// association types get one over their two endpoint columns.
    pub fn register(&self, schema: &WatchedEntityType) {
        if let Some(fields) = schema.natural_key_fields() {
            self.add_unique(&schema.key, fields.iter().cloned());
        }
        if schema.association {
            let columns: Vec<String> = schema.foreign_keys().map(|(f, _)| f.name.clone()).collect();
            self.add_unique(&schema.key, columns);
        }
    }

    /// Declares a unique key over the given fields.
    ///
    /// Rows with a null or missing value in any of the fields are exempt.
    pub fn add_unique<I, S>(&self, entity: &EntityKey, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return;
        }
        let mut unique = self.unique.write();
        let keys = unique.entry(entity.clone()).or_default();
        if !keys.contains(&fields) {
            keys.push(fields);
        }
    }

    /// Makes the next `times` operations fail with the given fault.
    ///
    /// A transaction counts as one operation.
    pub fn inject(&self, fault: Fault, times: usize) {
        let mut faults = self.faults.lock();
        faults.extend(std::iter::repeat(fault).take(times));
    }

    /// Returns the number of rows of the given type.
    #[must_use]
    pub fn len(&self, entity: &EntityKey) -> usize {
        self.tables.read().get(entity).map_or(0, |t| t.rows.len())
    }

    /// Returns true if the store holds no rows at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().values().all(|t| t.rows.is_empty())
    }

    /// Returns every row of the given type, ordered by pk.
    #[must_use]
    pub fn all(&self, entity: &EntityKey) -> Vec<Record> {
        self.tables
            .read()
            .get(entity)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Captures the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read();
        let mut out: Vec<TableSnapshot> = tables
            .iter()
            .filter(|(_, t)| !t.rows.is_empty() || t.next_pk > 1)
            .map(|(entity, t)| TableSnapshot {
                entity: entity.clone(),
                next_pk: t.next_pk,
                rows: t.rows.values().cloned().collect(),
            })
            .collect();
        out.sort_by(|a, b| a.entity.cmp(&b.entity));
        StoreSnapshot { tables: out }
    }

    /// Replaces the contents with the snapshot's rows.
    ///
    /// Rows without a pk are skipped. Declared unique keys are kept.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let _writer = self.writer.lock();
        let mut tables = self.tables.write();
        tables.clear();
        for table in snapshot.tables {
            let mut rows = BTreeMap::new();
            let mut highest = 0;
            for mut record in table.rows {
                let Some(pk) = record.pk else {
                    tracing::warn!(entity = %table.entity, "skipping snapshot row without pk");
                    continue;
                };
                record.entity = table.entity.clone();
                highest = highest.max(pk.get());
                rows.insert(pk, record);
            }
            tables.insert(
                table.entity,
                Table {
                    rows,
                    next_pk: table.next_pk.max(highest + 1),
                },
            );
        }
    }

    /// Loads a store from a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&text)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Writes the current contents to a JSON snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, text)?;
        Ok(())
    }

    fn check_fault(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        if faults.is_empty() {
            return Ok(());
        }
        Err(faults.remove(0).to_error())
    }

    fn check_unique(&self, table: &Table, record: &Record) -> StoreResult<()> {
        let unique = self.unique.read();
        let Some(keys) = unique.get(&record.entity) else {
            return Ok(());
        };
        for fields in keys {
            let values: Option<Vec<&Value>> = fields
                .iter()
                .map(|f| record.get(f).filter(|v| !v.is_null()))
                .collect();
            let Some(values) = values else {
                continue;
            };
            let clash = table.rows.values().any(|other| {
                other.pk != record.pk
                    && fields
                        .iter()
                        .zip(&values)
                        .all(|(f, v)| other.get(f) == Some(*v))
            });
            if clash {
                return Err(StoreError::Duplicate {
                    entity: record.entity.to_string(),
                    detail: format!("unique key ({})", fields.join(", ")),
                });
            }
        }
        Ok(())
    }

    fn get_unlocked(&self, entity: &EntityKey, pk: PrimaryKey) -> Option<Record> {
        self.tables
            .read()
            .get(entity)
            .and_then(|t| t.rows.get(&pk))
            .cloned()
    }

    fn find_unlocked(&self, entity: &EntityKey, filter: &Filter) -> Vec<Record> {
        self.tables
            .read()
            .get(entity)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_unlocked(&self, mut record: Record) -> StoreResult<PrimaryKey> {
        let mut tables = self.tables.write();
        let table = tables.entry(record.entity.clone()).or_default();
        let pk = match record.pk {
            Some(pk) if table.rows.contains_key(&pk) => {
                return Err(StoreError::Duplicate {
                    entity: record.entity.to_string(),
                    detail: format!("primary key {pk}"),
                });
            }
            Some(pk) => pk,
            None => table.allocate_pk(),
        };
        record.pk = Some(pk);
        self.check_unique(table, &record)?;
        table.next_pk = table.next_pk.max(pk.get() + 1);
        table.rows.insert(pk, record);
        Ok(pk)
    }

    fn update_unlocked(&self, record: &Record) -> StoreResult<()> {
        let Some(pk) = record.pk else {
            return Err(StoreError::InvalidRecord(format!(
                "cannot update {record} without a primary key"
            )));
        };
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&record.entity)
            .filter(|t| t.rows.contains_key(&pk))
            .ok_or_else(|| StoreError::NotFound {
                entity: record.entity.to_string(),
                pk: pk.get(),
            })?;
        self.check_unique(table, record)?;
        table.rows.insert(pk, record.clone());
        Ok(())
    }

    fn delete_unlocked(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<usize> {
        if filter.is_empty() {
            return Err(StoreError::InvalidFilter(format!(
                "refusing to delete every {entity} row"
            )));
        }
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(entity) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|_, r| !filter.matches(r));
        Ok(before - table.rows.len())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, entity: &EntityKey, pk: PrimaryKey) -> StoreResult<Option<Record>> {
        self.check_fault()?;
        Ok(self.get_unlocked(entity, pk))
    }

    fn find(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<Vec<Record>> {
        self.check_fault()?;
        Ok(self.find_unlocked(entity, filter))
    }

    fn insert(&self, record: Record) -> StoreResult<PrimaryKey> {
        self.check_fault()?;
        let _writer = self.writer.lock();
        self.insert_unlocked(record)
    }

    fn update(&self, record: &Record) -> StoreResult<()> {
        self.check_fault()?;
        let _writer = self.writer.lock();
        self.update_unlocked(record)
    }

    fn delete_where(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<usize> {
        self.check_fault()?;
        let _writer = self.writer.lock();
        self.delete_unlocked(entity, filter)
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn RecordStore) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.check_fault()?;
        let _writer = self.writer.lock();
        let saved = self.tables.read().clone();
        let result = work(&Transaction { store: self });
        if result.is_err() {
            *self.tables.write() = saved;
        }
        result
    }
}

/// The view handed to transaction bodies.
///
/// Holds no locks of its own: the enclosing transaction owns the writer
/// lock. Nested transactions run inline.
struct Transaction<'a> {
    store: &'a MemoryStore,
}

impl RecordStore for Transaction<'_> {
    fn get(&self, entity: &EntityKey, pk: PrimaryKey) -> StoreResult<Option<Record>> {
        Ok(self.store.get_unlocked(entity, pk))
    }

    fn find(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<Vec<Record>> {
        Ok(self.store.find_unlocked(entity, filter))
    }

    fn insert(&self, record: Record) -> StoreResult<PrimaryKey> {
        self.store.insert_unlocked(record)
    }

    fn update(&self, record: &Record) -> StoreResult<()> {
        self.store.update_unlocked(record)
    }

    fn delete_where(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<usize> {
        self.store.delete_unlocked(entity, filter)
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn RecordStore) -> StoreResult<()>,
    ) -> StoreResult<()> {
        work(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::FieldKind;

    fn key() -> EntityKey {
        EntityKey::new("local", "relatedmodel")
    }

    fn related_schema() -> WatchedEntityType {
        WatchedEntityType::new("local", "relatedmodel")
            .field("char_field", FieldKind::Text)
            .natural_key(["char_field"])
    }

    #[test]
    fn insert_assigns_sequential_pks() {
        let store = MemoryStore::new();
        let a = store.insert(Record::new(key()).with("char_field", "a")).unwrap();
        let b = store.insert(Record::new(key()).with("char_field", "b")).unwrap();
        assert_eq!(a, PrimaryKey(1));
        assert_eq!(b, PrimaryKey(2));
        assert_eq!(store.len(&key()), 2);
    }

    #[test]
    fn insert_with_explicit_pk_advances_sequence() {
        let store = MemoryStore::new();
        store.insert(Record::new(key()).with_pk(10)).unwrap();
        let next = store.insert(Record::new(key())).unwrap();
        assert_eq!(next, PrimaryKey(11));
    }

    #[test]
    fn insert_never_overwrites() {
        let store = MemoryStore::new();
        store.insert(Record::new(key()).with_pk(1).with("char_field", "a")).unwrap();
        let err = store
            .insert(Record::new(key()).with_pk(1).with("char_field", "b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        let row = store.get(&key(), PrimaryKey(1)).unwrap().unwrap();
        assert_eq!(row.get("char_field"), Some(&Value::from("a")));
    }

    #[test]
    fn natural_key_uniqueness() {
        let store = MemoryStore::new();
        store.register(&related_schema());
        store.insert(Record::new(key()).with("char_field", "foo")).unwrap();
        let err = store.insert(Record::new(key()).with("char_field", "foo")).unwrap_err();
        assert!(err.is_transient());

        // Null natural keys are exempt.
        store.insert(Record::new(key()).with("char_field", Value::Null)).unwrap();
        store.insert(Record::new(key()).with("char_field", Value::Null)).unwrap();
    }

    #[test]
    fn update_checks_existence_and_uniqueness() {
        let store = MemoryStore::new();
        store.register(&related_schema());
        let a = store.insert(Record::new(key()).with("char_field", "a")).unwrap();
        store.insert(Record::new(key()).with("char_field", "b")).unwrap();

        let clash = Record::new(key()).with_pk(a).with("char_field", "b");
        assert!(matches!(store.update(&clash), Err(StoreError::Duplicate { .. })));

        let ok = Record::new(key()).with_pk(a).with("char_field", "c");
        store.update(&ok).unwrap();
        assert_eq!(store.get(&key(), a).unwrap(), Some(ok));

        let missing = Record::new(key()).with_pk(99);
        assert!(matches!(store.update(&missing), Err(StoreError::NotFound { .. })));
        assert!(matches!(
            store.update(&Record::new(key())),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn delete_where_counts_and_refuses_empty_filter() {
        let store = MemoryStore::new();
        store.insert(Record::new(key()).with("char_field", "x")).unwrap();
        store.insert(Record::new(key()).with("char_field", "x")).unwrap();
        store.insert(Record::new(key()).with("char_field", "y")).unwrap();

        let gone = store
            .delete_where(&key(), &Filter::new().eq("char_field", "x"))
            .unwrap();
        assert_eq!(gone, 2);
        assert_eq!(
            store.delete_where(&key(), &Filter::new().eq("char_field", "x")).unwrap(),
            0
        );
        assert!(matches!(
            store.delete_where(&key(), &Filter::new()),
            Err(StoreError::InvalidFilter(_))
        ));
        assert_eq!(store.len(&key()), 1);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = MemoryStore::new();
        store.insert(Record::new(key()).with("char_field", "keep")).unwrap();

        let result = store.transaction(&mut |txn| {
            txn.insert(Record::new(key()).with("char_field", "new"))?;
            txn.delete_where(&key(), &Filter::new().eq("char_field", "keep"))?;
            Err(StoreError::Aborted("test".into()))
        });
        assert!(result.is_err());

        let rows = store.all(&key());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("char_field"), Some(&Value::from("keep")));
    }

    #[test]
    fn nested_transaction_runs_inline() {
        let store = MemoryStore::new();
        store
            .transaction(&mut |txn| {
                txn.transaction(&mut |inner| {
                    inner.insert(Record::new(key()))?;
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(store.len(&key()), 1);
    }

    #[test]
    fn injected_faults_are_consumed() {
        let store = MemoryStore::new();
        store.inject(Fault::LockConflict, 2);
        assert!(matches!(
            store.get(&key(), PrimaryKey(1)),
            Err(StoreError::LockConflict(_))
        ));
        assert!(store.insert(Record::new(key())).is_err());
        assert!(store.insert(Record::new(key())).is_ok());
    }

    #[test]
    fn snapshot_restore() {
        let store = MemoryStore::new();
        store.insert(Record::new(key()).with("char_field", "a")).unwrap();
        store.insert(Record::new(key()).with("char_field", "b")).unwrap();
        store.delete_where(&key(), &Filter::new().eq("char_field", "b")).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.row_count(), 1);

        let copy = MemoryStore::from_snapshot(snapshot);
        assert_eq!(copy.all(&key()), store.all(&key()));
        // Deleted pks are not reused.
        assert_eq!(copy.insert(Record::new(key())).unwrap(), PrimaryKey(3));
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::new();
        store.insert(Record::new(key()).with("char_field", "a")).unwrap();
        store.save(&path).unwrap();

        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.all(&key()), store.all(&key()));
        assert!(!loaded.is_empty());

        assert!(MemoryStore::load(dir.path().join("missing.json")).is_err());
    }
}
