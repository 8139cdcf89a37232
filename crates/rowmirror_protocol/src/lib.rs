//! # RowMirror Protocol
//!
//! Change events and the durable job format for RowMirror.
//!
//! This crate provides:
//! - [`Operation`] for the three kinds of row change
//! - [`ChangeEvent`], a captured change with a decoded [`Payload`]
//! - [`Job`], the queued form of a change event, and its JSON wire format
//!   `[operation, namespace, entity_name, original_identity, payload_json]`
//! - [`Reference`], how identities of related records appear in payloads
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Example
//!
//! ```rust
//! use rowmirror_model::EntityKey;
//! use rowmirror_protocol::{ChangeEvent, Job, Payload};
//!
//! let mut payload = Payload::new();
//! payload.insert("pk", serde_json::json!(["foo"]));
//! payload.insert("char_field", serde_json::json!("foo"));
//!
//! let event = ChangeEvent::create(EntityKey::new("local", "relatedmodel"), payload);
//! let wire = event.to_job().to_wire().unwrap();
//! assert!(wire.starts_with(r#"["create","local","relatedmodel",null,"#));
//!
//! let job = Job::from_wire(&wire).unwrap();
//! assert_eq!(job.event().unwrap(), event);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod job;
mod operation;
mod payload;

pub use error::{ProtocolError, ProtocolResult};
pub use job::{ChangeEvent, Job, JobId};
pub use operation::Operation;
pub use payload::{Payload, Reference};
