//! # RowMirror Store
//!
//! Record store abstraction for RowMirror.
//!
//! Both ends of a replication pipeline talk to their database through the
//! [`RecordStore`] trait: lookup by primary key or by equality filter,
//! insert of a brand-new row, update by primary key, delete by filter, and
//! transactional scoping.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - In-memory tables with unique-key enforcement,
//!   JSON snapshots and fault injection for tests
//!
//! ## Example
//!
//! ```rust
//! use rowmirror_model::{EntityKey, Record};
//! use rowmirror_store::{Filter, MemoryStore, RecordStore};
//!
//! let store = MemoryStore::new();
//! let key = EntityKey::new("blog", "author");
//! let pk = store.insert(Record::new(key.clone()).with("slug", "ada")).unwrap();
//!
//! let found = store.find(&key, &Filter::new().eq("slug", "ada")).unwrap();
//! assert_eq!(found[0].pk, Some(pk));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod filter;
mod memory;

pub use backend::{atomic, RecordStore};
pub use error::{StoreError, StoreResult};
pub use filter::Filter;
pub use memory::{Fault, MemoryStore, StoreSnapshot, TableSnapshot};
