//! # RowMirror Model
//!
//! Schema descriptors, records and identities for RowMirror.
//!
//! This crate provides:
//! - [`WatchedEntityType`], the explicit schema of a record type enrolled
//!   for replication (fields, identity strategy, many-to-many relations)
//! - [`Record`], a store-agnostic row with an optional local primary key
//! - [`Identity`], either a store-local [`PrimaryKey`] or a portable
//!   natural key
//! - [`Value`], the scalar values a record field can hold
//!
//! This is a pure data crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use rowmirror_model::{FieldKind, Record, Value, WatchedEntityType};
//!
//! let author = WatchedEntityType::new("blog", "author")
//!     .field("slug", FieldKind::Text)
//!     .field("name", FieldKind::Text)
//!     .natural_key(["slug"]);
//!
//! let record = Record::new(author.key.clone())
//!     .with_pk(7)
//!     .with("slug", "ada")
//!     .with("name", "Ada");
//!
//! assert!(author.uses_natural_key());
//! assert_eq!(record.get("slug"), Some(&Value::from("ada")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod identity;
mod record;
mod value;

pub use entity::{
    EntityKey, FieldDef, FieldKind, IdentityStrategy, ManyToManyDef, WatchedEntityType, PK_FIELD,
};
pub use error::{ModelError, ModelResult};
pub use identity::Identity;
pub use record::{PrimaryKey, Record};
pub use value::Value;
