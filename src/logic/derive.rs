//! Schema variant deriver.
//!
//! Produces the create and read shapes of a resource kind from its single
//! [`ResourceDef`]. Only the types of relationship fields differ between
//! variants; scalar properties are carried over unchanged.

use crate::error::{ApiError, ApiResult};
use crate::model::{
    Cardinality, DataType, Deserializer, FieldSpec, FieldType, RelationshipDescriptor,
    ResourceDef, Serializer, Shape, Variant,
};

/// Owned kinds nest (dataset -> distribution -> checksum); anything deeper
/// than this is a cycle in the declarations.
const MAX_OWNED_NESTING: usize = 16;

pub fn derive<'a, F>(def: &ResourceDef, lookup: &F, variant: Variant) -> ApiResult<Shape>
where
    F: Fn(&str) -> Option<&'a ResourceDef>,
{
    derive_at(def, lookup, variant, 0)
}

fn derive_at<'a, F>(def: &ResourceDef, lookup: &F, variant: Variant, depth: usize) -> ApiResult<Shape>
where
    F: Fn(&str) -> Option<&'a ResourceDef>,
{
    if depth > MAX_OWNED_NESTING {
        return Err(ApiError::Configuration(format!(
            "owned kinds nest cyclically below '{}'",
            def.kind
        )));
    }

    let mut fields = Vec::new();

    if variant == Variant::Read {
        fields.push(FieldSpec {
            required: true,
            description: "Identifier assigned by this catalog",
            ..FieldSpec::new("identifier", FieldType::Identifier)
        });
    }
    if def.is_shared() {
        fields.push(FieldSpec {
            max_length: Some(64),
            description: "The platform this resource originates from",
            example: Some(serde_json::json!("openml")),
            ..FieldSpec::new("platform", FieldType::Scalar(DataType::String))
        });
        fields.push(FieldSpec {
            max_length: Some(256),
            description: "Identifier of the resource on its platform",
            example: Some(serde_json::json!("42")),
            ..FieldSpec::new("platform_identifier", FieldType::Scalar(DataType::String))
        });
        if variant == Variant::Read {
            fields.push(FieldSpec {
                description: "Creation and modification timestamps",
                ..FieldSpec::new("aiod_entry", FieldType::Scalar(DataType::Object))
            });
        }
    }

    for property in &def.properties {
        fields.push(FieldSpec {
            name: property.name,
            field_type: FieldType::Scalar(property.data_type),
            required: property.required,
            max_length: property.max_length,
            description: property.description,
            example: property.example.clone(),
        });
    }

    for (name, descriptor) in def.relationships.iter() {
        let element = match variant {
            Variant::Create => create_type(def, name, descriptor, lookup, depth)?,
            Variant::Read => read_type(def, name, descriptor, lookup, depth)?,
        };
        let field_type = match (descriptor.cardinality(), descriptor.deserializer()) {
            // Verbatim fields take whatever the caller sends.
            (_, None) => element,
            (Cardinality::Single, Some(_)) => element,
            (Cardinality::List, Some(_)) => FieldType::List(Box::new(element)),
        };
        fields.push(FieldSpec {
            name,
            field_type,
            required: descriptor.is_required(),
            max_length: None,
            description: descriptor.description(),
            example: descriptor.example().cloned(),
        });
    }

    Ok(Shape {
        kind: def.kind,
        variant,
        fields,
        platform_pair: def.is_shared() && variant == Variant::Create,
    })
}

/// Narrow input type of one element of a relationship field.
fn create_type<'a, F>(
    def: &ResourceDef,
    name: &str,
    descriptor: &RelationshipDescriptor,
    lookup: &F,
    depth: usize,
) -> ApiResult<FieldType>
where
    F: Fn(&str) -> Option<&'a ResourceDef>,
{
    Ok(match descriptor.deserializer() {
        None => FieldType::Any,
        Some(Deserializer::FindByName { .. }) => FieldType::Name,
        Some(Deserializer::FindByIdentifier { .. }) => FieldType::Reference,
        Some(Deserializer::Cast { kind }) => {
            let child = owned_def(def, name, kind, lookup)?;
            FieldType::Object(Box::new(derive_at(child, lookup, Variant::Create, depth + 1)?))
        }
    })
}

/// Output type of one element, i.e. whatever the serializer produces.
fn read_type<'a, F>(
    def: &ResourceDef,
    name: &str,
    descriptor: &RelationshipDescriptor,
    lookup: &F,
    depth: usize,
) -> ApiResult<FieldType>
where
    F: Fn(&str) -> Option<&'a ResourceDef>,
{
    Ok(match (descriptor.serializer(), descriptor.deserializer()) {
        (_, None) => FieldType::Any,
        (Some(Serializer::Name), _) => FieldType::Scalar(DataType::String),
        (Some(Serializer::Nested), Some(Deserializer::Cast { kind })) => {
            let child = owned_def(def, name, kind, lookup)?;
            FieldType::Object(Box::new(derive_at(child, lookup, Variant::Read, depth + 1)?))
        }
        _ => FieldType::Identifier,
    })
}

fn owned_def<'a, F>(def: &ResourceDef, name: &str, kind: &str, lookup: &F) -> ApiResult<&'a ResourceDef>
where
    F: Fn(&str) -> Option<&'a ResourceDef>,
{
    lookup(kind).ok_or_else(|| {
        ApiError::Configuration(format!("{}.{}: unknown owned kind '{}'", def.kind, name, kind))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PropertyDef, RelationshipConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn defs() -> BTreeMap<&'static str, ResourceDef> {
        let checksum = ResourceDef::owned("checksum", "")
            .property(PropertyDef::string("value", 64).required());
        let distribution = ResourceDef::owned("distribution", "")
            .property(PropertyDef::string("content_url", 256).required())
            .relationships(
                RelationshipConfig::new()
                    .with("checksums", RelationshipDescriptor::owned_many("checksum")),
            );
        let dataset = ResourceDef::shared("dataset", "datasets", "")
            .property(PropertyDef::string("name", 256).required())
            .relationships(
                RelationshipConfig::new()
                    .with("keywords", RelationshipDescriptor::named_many("keyword"))
                    .with("license", RelationshipDescriptor::named_one("license", "license_identifier"))
                    .with("citations", RelationshipDescriptor::resource_many(&["publication"]))
                    .with("distributions", RelationshipDescriptor::owned_many("distribution"))
                    .with("media", RelationshipDescriptor::to_many()),
            );
        [checksum, distribution, dataset]
            .into_iter()
            .map(|d| (d.kind, d))
            .collect()
    }

    fn shape(kind: &str, variant: Variant) -> Shape {
        let defs = defs();
        let lookup = |k: &str| defs.get(k);
        derive(&defs[kind], &lookup, variant).unwrap()
    }

    #[test]
    fn test_create_narrows_relationship_types() {
        let create = shape("dataset", Variant::Create);
        assert!(create.field("identifier").is_none());
        assert_eq!(
            create.field("keywords").unwrap().field_type,
            FieldType::List(Box::new(FieldType::Name))
        );
        assert_eq!(create.field("license").unwrap().field_type, FieldType::Name);
        assert_eq!(
            create.field("citations").unwrap().field_type,
            FieldType::List(Box::new(FieldType::Reference))
        );
        assert_eq!(create.field("media").unwrap().field_type, FieldType::Any);

        let payload = json!({
            "name": "iris",
            "keywords": ["flowers"],
            "distributions": [{"content_url": "https://x", "checksums": [{"value": "abc"}]}]
        });
        assert!(create.validate(&payload).is_ok());
    }

    #[test]
    fn test_read_adds_identity_and_serializer_types() {
        let read = shape("dataset", Variant::Read);
        assert!(read.field("identifier").unwrap().required);
        assert_eq!(
            read.field("keywords").unwrap().field_type,
            FieldType::List(Box::new(FieldType::Scalar(DataType::String)))
        );
        assert_eq!(
            read.field("citations").unwrap().field_type,
            FieldType::List(Box::new(FieldType::Identifier))
        );
        match &read.field("distributions").unwrap().field_type {
            FieldType::List(inner) => match inner.as_ref() {
                FieldType::Object(child) => {
                    assert_eq!(child.kind, "distribution");
                    assert!(child.field("identifier").is_some());
                    assert!(child.field("checksums").is_some());
                }
                other => panic!("unexpected element type {other:?}"),
            },
            other => panic!("unexpected type {other:?}"),
        }
    }

    #[test]
    fn test_scalar_fields_untouched_between_variants() {
        let create = shape("dataset", Variant::Create);
        let read = shape("dataset", Variant::Read);
        assert_eq!(create.field("name"), read.field("name"));
    }

    #[test]
    fn test_kind_without_relationships_yields_base_shape() {
        let create = shape("checksum", Variant::Create);
        let names: Vec<_> = create.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["value"]);
    }
}
