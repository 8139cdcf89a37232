//! # RowMirror Testkit
//!
//! Test utilities for RowMirror.
//!
//! This crate provides:
//! - The `local` fixture model family and a registry of it
//! - `SourceDb`, an emulated source layer that fires capture hooks
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowmirror_testkit::prelude::*;
//!
//! let db = SourceDb::new(registry());
//! db.create(Record::new(key("relatedmodel")).with("char_field", "foo"))?;
//! assert_eq!(db.drain_jobs().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod source;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::source::*;
}

pub use fixtures::*;
pub use generators::*;
pub use source::*;
