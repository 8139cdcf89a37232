//! CLI command implementations.

pub mod inspect;
pub mod replay;
pub mod schema;

use rowmirror_core::Registry;
use rowmirror_model::WatchedEntityType;
use std::fs;
use std::path::Path;

/// Reads a JSON array of entity types.
pub fn load_schemas(path: &Path) -> Result<Vec<WatchedEntityType>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read schema file {}: {e}", path.display()))?;
    let schemas: Vec<WatchedEntityType> = serde_json::from_str(&text)
        .map_err(|e| format!("invalid schema file {}: {e}", path.display()))?;
    Ok(schemas)
}

/// Registers every schema. Association types are derived, not listed.
pub fn registry_of(schemas: &[WatchedEntityType]) -> Result<Registry, Box<dyn std::error::Error>> {
    let mut registry = Registry::new();
    for schema in schemas {
        registry.register_entity(schema.clone())?;
    }
    Ok(registry)
}
