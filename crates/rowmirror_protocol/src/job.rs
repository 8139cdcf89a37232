//! Change events and queued jobs.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use crate::payload::Payload;
use rowmirror_model::{EntityKey, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Queue-assigned identifier of an accepted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A captured row change.
///
/// `original_identity` is the identity the record had before the mutation
/// (set for updates). For deletes the payload carries only what is needed
/// to locate the target rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Kind of change.
    pub operation: Operation,
    /// Entity type of the changed record.
    pub entity: EntityKey,
    /// Identity before the mutation.
    pub original_identity: Option<Identity>,
    /// Encoded new state.
    pub payload: Payload,
}

impl ChangeEvent {
    /// Creates a create event.
    pub fn create(entity: EntityKey, payload: Payload) -> Self {
        Self {
            operation: Operation::Create,
            entity,
            original_identity: None,
            payload,
        }
    }

    /// Creates an update event located by `original_identity`.
    pub fn update(entity: EntityKey, original_identity: Identity, payload: Payload) -> Self {
        Self {
            operation: Operation::Update,
            entity,
            original_identity: Some(original_identity),
            payload,
        }
    }

    /// Creates a delete event.
    pub fn delete(entity: EntityKey, payload: Payload) -> Self {
        Self {
            operation: Operation::Delete,
            entity,
            original_identity: None,
            payload,
        }
    }

    /// Converts into the durable job form.
    #[must_use]
    pub fn to_job(&self) -> Job {
        Job {
            operation: self.operation,
            entity: self.entity.clone(),
            original_identity: self.original_identity.clone(),
            payload: self.payload.to_string(),
        }
    }
}

/// The durable queued form of a [`ChangeEvent`].
///
/// The payload stays serialized so a job can be logged and replayed
/// exactly as it was captured, even if it no longer decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Kind of change.
    pub operation: Operation,
    /// Entity type of the changed record.
    pub entity: EntityKey,
    /// Identity before the mutation.
    pub original_identity: Option<Identity>,
    /// JSON object text.
    pub payload: String,
}

type WireJob = (Operation, String, String, Option<Identity>, String);

impl Job {
    /// Parses the payload text.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object.
    pub fn payload(&self) -> ProtocolResult<Payload> {
        Payload::from_json_str(&self.payload)
    }

    /// Decodes into a change event.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object.
    pub fn event(&self) -> ProtocolResult<ChangeEvent> {
        Ok(ChangeEvent {
            operation: self.operation,
            entity: self.entity.clone(),
            original_identity: self.original_identity.clone(),
            payload: self.payload()?,
        })
    }

    /// Encodes as the wire array
    /// `[operation, namespace, entity_name, original_identity, payload]`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_wire(&self) -> ProtocolResult<String> {
        let wire: WireJob = (
            self.operation,
            self.entity.namespace.clone(),
            self.entity.name.clone(),
            self.original_identity.clone(),
            self.payload.clone(),
        );
        Ok(serde_json::to_string(&wire)?)
    }

    /// Decodes the wire array.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a five-element array of the
    /// expected types or the entity names are empty.
    pub fn from_wire(text: &str) -> ProtocolResult<Self> {
        let (operation, namespace, name, original_identity, payload): WireJob =
            serde_json::from_str(text)?;
        if namespace.is_empty() || name.is_empty() {
            return Err(ProtocolError::InvalidJob(format!(
                "empty entity name '{namespace}.{name}'"
            )));
        }
        Ok(Self {
            operation,
            entity: EntityKey::new(namespace, name),
            original_identity,
            payload,
        })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.entity)?;
        if let Some(identity) = &self.original_identity {
            write!(f, " [{identity}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::PrimaryKey;
    use serde_json::json;

    fn key() -> EntityKey {
        EntityKey::new("local", "testmodel")
    }

    fn payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("pk", json!(5));
        payload.insert("char_field", json!("bar"));
        payload
    }

    #[test]
    fn wire_shape() {
        let event = ChangeEvent::update(key(), Identity::PrimaryKey(PrimaryKey(5)), payload());
        let wire = event.to_job().to_wire().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed[0], json!("update"));
        assert_eq!(parsed[1], json!("local"));
        assert_eq!(parsed[2], json!("testmodel"));
        assert_eq!(parsed[3], json!(5));
        assert_eq!(parsed[4], json!(r#"{"char_field":"bar","pk":5}"#));
    }

    #[test]
    fn wire_decodes_back_to_event() {
        let event = ChangeEvent::update(key(), Identity::natural(["foo"]), payload());
        let job = Job::from_wire(&event.to_job().to_wire().unwrap()).unwrap();
        assert_eq!(job.event().unwrap(), event);
    }

    #[test]
    fn malformed_wire_is_rejected() {
        assert!(Job::from_wire(r#"["create","local","testmodel",null]"#).is_err());
        assert!(Job::from_wire(r#"["upsert","local","testmodel",null,"{}"]"#).is_err());
        assert!(Job::from_wire(r#"["create","local","testmodel","x","{}"]"#).is_err());
        assert!(matches!(
            Job::from_wire(r#"["create","","testmodel",null,"{}"]"#),
            Err(ProtocolError::InvalidJob(_))
        ));
    }

    #[test]
    fn undecodable_payload_survives_in_job() {
        let job = Job::from_wire(r#"["delete","local","testmodel",null,"not json"]"#).unwrap();
        assert_eq!(job.payload, "not json");
        assert!(job.event().is_err());
    }

    #[test]
    fn job_ids_are_unique_and_parse() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
    }

    #[test]
    fn display() {
        let job = ChangeEvent::delete(key(), payload()).to_job();
        assert_eq!(job.to_string(), "delete local.testmodel");
    }
}
