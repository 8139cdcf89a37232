//! Record store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use rowmirror_model::{EntityKey, PrimaryKey, Record};

/// A row-oriented store of records grouped by entity type.
///
/// Stores assign primary keys; a pk is only meaningful inside the store
/// that assigned it.
///
/// # Invariants
///
/// - `insert` never overwrites an existing row
/// - `update` never reassigns a primary key
/// - `delete_where` refuses an empty filter
/// - Work run inside `transaction` is applied completely or not at all
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing and manual replay
pub trait RecordStore: Send + Sync {
    /// Fetches a record by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, entity: &EntityKey, pk: PrimaryKey) -> StoreResult<Option<Record>>;

    /// Returns every record of the type matching the filter, ordered by pk.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<Vec<Record>>;

    /// Inserts a brand-new row and returns its primary key.
    ///
    /// A record without a pk gets a freshly assigned one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if the pk or a unique key is
    /// already taken.
    fn insert(&self, record: Record) -> StoreResult<PrimaryKey>;

    /// Replaces the fields of the row with the record's pk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The record has no pk ([`StoreError::InvalidRecord`])
    /// - No row has that pk ([`StoreError::NotFound`])
    /// - The new values collide with a unique key
    fn update(&self, record: &Record) -> StoreResult<()>;

    /// Deletes every row matching the filter and returns how many went.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFilter`] for an empty filter.
    fn delete_where(&self, entity: &EntityKey, filter: &Filter) -> StoreResult<usize>;

    /// Runs `work` in a transaction.
    ///
    /// If `work` fails, everything it wrote is rolled back and the error is
    /// returned. Prefer the typed [`atomic`] helper.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or an error if the transaction cannot
    /// be started or committed.
    fn transaction(
        &self,
        work: &mut dyn FnMut(&dyn RecordStore) -> StoreResult<()>,
    ) -> StoreResult<()>;
}

/// Runs `f` inside a store transaction and returns its typed result.
///
/// The transaction is rolled back when `f` returns an error, and that error
/// is returned unchanged.
///
/// # Errors
///
/// Returns the error from `f`, or the store's error converted into `E` if
/// the transaction itself fails.
pub fn atomic<R, E, F>(store: &dyn RecordStore, f: F) -> Result<R, E>
where
    F: FnOnce(&dyn RecordStore) -> Result<R, E>,
    E: From<StoreError>,
{
    let mut body = Some(f);
    let mut outcome: Option<Result<R, E>> = None;

    let result = store.transaction(&mut |txn| {
        let Some(run) = body.take() else {
            return Err(StoreError::Aborted("transaction body invoked twice".into()));
        };
        match run(txn) {
            Ok(value) => {
                outcome = Some(Ok(value));
                Ok(())
            }
            Err(err) => {
                outcome = Some(Err(err));
                Err(StoreError::Aborted("transaction body failed".into()))
            }
        }
    });

    match (result, outcome) {
        (_, Some(Err(err))) => Err(err),
        (Err(err), _) => Err(E::from(err)),
        (Ok(()), Some(Ok(value))) => Ok(value),
        (Ok(()), None) => Err(E::from(StoreError::Aborted(
            "transaction committed without running its body".into(),
        ))),
    }
}
