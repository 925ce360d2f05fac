//! Read path of the serialization engine: stored [`Entity`] to the external
//! representation described by the kind's read shape.

use anyhow::anyhow;
use serde_json::{json, Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::model::{Entity, Registry, Related, Relation, RelationshipDescriptor, Serializer};

pub fn serialize_entity(registry: &Registry, entity: &Entity) -> ApiResult<Map<String, Value>> {
    let def = registry.resource(&entity.kind).ok_or_else(|| {
        ApiError::Unexpected(anyhow!("stored entity of unregistered kind '{}'", entity.kind))
    })?;

    let mut out = Map::new();
    if let Some(identifier) = entity.identifier {
        out.insert("identifier".to_string(), json!(identifier));
    }
    if def.is_shared() {
        out.insert("platform".to_string(), json!(entity.platform));
        out.insert("platform_identifier".to_string(), json!(entity.platform_identifier));
        out.insert(
            "aiod_entry".to_string(),
            json!({
                "date_created": entity.date_created.map(|d| d.to_rfc3339()),
                "date_modified": entity.date_modified.map(|d| d.to_rfc3339()),
            }),
        );
    }

    for property in &def.properties {
        if let Some(value) = entity.fields.get(property.name).filter(|v| !v.is_null()) {
            out.insert(property.name.to_string(), value.clone());
        }
    }

    for (field, descriptor) in def.relationships.iter() {
        if let Some(value) = serialize_field(registry, entity, field, descriptor)? {
            out.insert(field.to_string(), value);
        }
    }
    Ok(out)
}

/// External value of one relationship field, `None` when it is empty.
fn serialize_field(
    registry: &Registry,
    entity: &Entity,
    field: &str,
    descriptor: &RelationshipDescriptor,
) -> ApiResult<Option<Value>> {
    if descriptor.deserializer().is_none() {
        // Verbatim fields are stored as written.
        return Ok(entity
            .fields
            .get(field)
            .filter(|v| !is_empty_value(v))
            .cloned());
    }

    let serializer = descriptor.serializer().unwrap_or(Serializer::Identifier);
    match entity.relations.get(field) {
        None => Ok(None),
        Some(relation) if relation.is_empty() => Ok(None),
        Some(Relation::One(related)) => project(registry, serializer, related).map(Some),
        Some(Relation::Many(items)) => items
            .iter()
            .map(|related| project(registry, serializer, related))
            .collect::<ApiResult<Vec<_>>>()
            .map(|values| Some(Value::Array(values))),
    }
}

fn project(registry: &Registry, serializer: Serializer, related: &Related) -> ApiResult<Value> {
    match (serializer, related) {
        (Serializer::Name, Related::Named(named)) => Ok(json!(named.name)),
        (Serializer::Nested, Related::Owned(child)) => {
            serialize_entity(registry, child).map(Value::Object)
        }
        (Serializer::Identifier, related) => related
            .identifier()
            .map(|id| json!(id))
            .ok_or_else(|| ApiError::Unexpected(anyhow!("related row without identity"))),
        (serializer, related) => Err(ApiError::Unexpected(anyhow!(
            "serializer {:?} cannot project {:?}",
            serializer,
            related
        ))),
    }
}

/// `null`, `""`, `[]` and `{}` count as "no value".
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
