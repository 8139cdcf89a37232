//! Schema command implementation.

use rowmirror_model::WatchedEntityType;
use serde::Serialize;
use std::path::Path;

/// Description of one entity type.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Entity type.
    pub entity: String,
    /// Identity strategy.
    pub identity: String,
    /// Declared fields.
    pub fields: Vec<String>,
    /// Derived association types.
    pub associations: Vec<String>,
}

/// Runs the schema command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entities = describe(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        _ => {
            println!("Schema file: {}", path.display());
            println!("Entity types: {}", entities.len());
            for entity in &entities {
                println!();
                println!("  {} [{}]", entity.entity, entity.identity);
                println!("    fields: {}", entity.fields.join(", "));
                for association in &entity.associations {
                    println!("    association: {association}");
                }
            }
        }
    }

    Ok(())
}

/// Validates the schema file and describes each entity type.
pub fn describe(path: &Path) -> Result<Vec<EntitySummary>, Box<dyn std::error::Error>> {
    let schemas = super::load_schemas(path)?;
    // Registration validates each type and its derived association types.
    super::registry_of(&schemas)?;
    Ok(schemas.iter().map(summarize).collect())
}

fn summarize(schema: &WatchedEntityType) -> EntitySummary {
    let identity = match schema.natural_key_fields() {
        Some(fields) => format!("natural key ({})", fields.join(", ")),
        None => "primary key".to_string(),
    };
    let fields = schema
        .fields
        .iter()
        .map(|field| match field.foreign_target() {
            Some(target) => format!("{} -> {target}", field.name),
            None => field.name.clone(),
        })
        .collect();
    let associations = schema
        .many_to_many
        .iter()
        .map(|relation| format!("{} ({} -> {})", relation.through, relation.name, relation.target))
        .collect();

    EntitySummary {
        entity: schema.key.to_string(),
        identity,
        fields,
        associations,
    }
}
