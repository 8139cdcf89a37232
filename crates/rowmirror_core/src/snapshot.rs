//! Pre-mutation snapshots keyed by mutation id.

use parking_lot::Mutex;
use rowmirror_model::Identity;
use rowmirror_protocol::Reference;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Correlates a pre-write or pre-clear hook with its post hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One currently-associated pair, captured before a bulk clear.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationPair {
    /// Reference to the owner record.
    pub owner: Reference,
    /// Reference to the counterpart record.
    pub other: Reference,
}

/// State captured before a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Identity of a record before it was written.
    Identity(Identity),
    /// Associations of a relation before it was cleared.
    Associations {
        /// The relation name.
        relation: String,
        /// Every associated pair.
        pairs: Vec<AssociationPair>,
    },
}

/// Side-table of pending snapshots.
///
/// Entries are removed when the matching post hook takes them.
#[derive(Debug, Default)]
pub struct SnapshotTable {
    entries: Mutex<HashMap<MutationId, Snapshot>>,
}

impl SnapshotTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a snapshot, replacing any earlier one for the same mutation.
    pub fn stash(&self, mutation: MutationId, snapshot: Snapshot) {
        self.entries.lock().insert(mutation, snapshot);
    }

    /// Removes and returns the snapshot for a mutation.
    pub fn take(&self, mutation: MutationId) -> Option<Snapshot> {
        self.entries.lock().remove(&mutation)
    }

    /// Number of pending snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_entry() {
        let table = SnapshotTable::new();
        let id = MutationId::new();
        table.stash(id, Snapshot::Identity(Identity::natural(["foo"])));
        assert_eq!(table.len(), 1);

        assert_eq!(
            table.take(id),
            Some(Snapshot::Identity(Identity::natural(["foo"])))
        );
        assert_eq!(table.take(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn mutations_are_independent() {
        let table = SnapshotTable::new();
        let (a, b) = (MutationId::new(), MutationId::new());
        table.stash(a, Snapshot::Identity(Identity::natural(["a"])));
        table.stash(b, Snapshot::Identity(Identity::natural(["b"])));
        assert_eq!(
            table.take(b),
            Some(Snapshot::Identity(Identity::natural(["b"])))
        );
        assert_eq!(table.len(), 1);
    }
}
