//! Statically registered table of resource kinds and vocabularies.
//!
//! Built once at startup. Every descriptor is checked here, so a mismatch
//! between a relationship declaration and the kinds it points at surfaces as
//! [`ApiError::Configuration`] before the first request is served.

use std::collections::{BTreeMap, HashMap};

use crate::error::{ApiError, ApiResult};
use crate::logic::derive::derive;
use crate::model::{
    Deserializer, Ownership, RelationshipDescriptor, ResourceDef, Serializer, Shape, Variant,
    Vocabulary,
};

/// Field names every shared kind carries implicitly.
pub const RESERVED_FIELDS: &[&str] = &["identifier", "platform", "platform_identifier", "aiod_entry"];

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: Vec<ResourceDef>,
    vocabularies: Vec<Vocabulary>,
}

impl RegistryBuilder {
    pub fn vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabularies.push(vocabulary);
        self
    }

    pub fn resource(mut self, resource: ResourceDef) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn build(self) -> ApiResult<Registry> {
        let mut vocabularies = BTreeMap::new();
        for vocabulary in self.vocabularies {
            if vocabularies.insert(vocabulary.name, vocabulary.clone()).is_some() {
                return Err(config_error(format!(
                    "vocabulary '{}' registered twice",
                    vocabulary.name
                )));
            }
        }

        let mut resources: BTreeMap<&'static str, ResourceDef> = BTreeMap::new();
        let mut order = Vec::new();
        for resource in self.resources {
            if resources.values().any(|r| r.plural == resource.plural) {
                return Err(config_error(format!(
                    "collection path '{}' registered twice",
                    resource.plural
                )));
            }
            order.push(resource.kind);
            if resources.insert(resource.kind, resource.clone()).is_some() {
                return Err(config_error(format!("kind '{}' registered twice", resource.kind)));
            }
        }

        for resource in resources.values() {
            check_resource(resource, &resources, &vocabularies)?;
        }

        let lookup = |kind: &str| resources.get(kind);
        let mut shapes = HashMap::new();
        for resource in resources.values() {
            for variant in [Variant::Create, Variant::Read] {
                shapes.insert((resource.kind, variant), derive(resource, &lookup, variant)?);
            }
        }

        Ok(Registry {
            resources,
            order,
            vocabularies,
            shapes,
        })
    }
}

#[derive(Debug)]
pub struct Registry {
    resources: BTreeMap<&'static str, ResourceDef>,
    /// Registration order, used for routing and documentation.
    order: Vec<&'static str>,
    vocabularies: BTreeMap<&'static str, Vocabulary>,
    shapes: HashMap<(&'static str, Variant), Shape>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn resource(&self, kind: &str) -> Option<&ResourceDef> {
        self.resources.get(kind)
    }

    /// Definition of a routed (shared) kind, or a configuration error.
    pub fn shared(&self, kind: &str) -> ApiResult<&ResourceDef> {
        self.resources
            .get(kind)
            .filter(|r| r.is_shared())
            .ok_or_else(|| config_error(format!("'{kind}' is not a registered resource kind")))
    }

    /// Every kind, owned ones included, in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDef> {
        self.order.iter().filter_map(|kind| self.resources.get(kind))
    }

    /// Shared kinds in registration order.
    pub fn routed(&self) -> impl Iterator<Item = &ResourceDef> {
        self.resources().filter(|r| r.is_shared())
    }

    pub fn vocabulary(&self, name: &str) -> Option<&Vocabulary> {
        self.vocabularies.get(name)
    }

    pub fn shape(&self, kind: &str, variant: Variant) -> ApiResult<&Shape> {
        self.resources
            .get_key_value(kind)
            .and_then(|(kind, _)| self.shapes.get(&(*kind, variant)))
            .ok_or_else(|| config_error(format!("no {variant:?} shape for '{kind}'")))
    }
}

fn config_error(message: String) -> ApiError {
    ApiError::Configuration(message)
}

fn check_resource(
    resource: &ResourceDef,
    resources: &BTreeMap<&'static str, ResourceDef>,
    vocabularies: &BTreeMap<&'static str, Vocabulary>,
) -> ApiResult<()> {
    let kind = resource.kind;
    let mut names: Vec<&str> = Vec::new();

    for property in &resource.properties {
        if RESERVED_FIELDS.contains(&property.name) || names.contains(&property.name) {
            return Err(config_error(format!(
                "{kind}.{}: field name reserved or declared twice",
                property.name
            )));
        }
        names.push(property.name);
    }

    for (field, descriptor) in resource.relationships.iter() {
        if RESERVED_FIELDS.contains(&field) || names.contains(&field) {
            return Err(config_error(format!(
                "{kind}.{field}: field name reserved or declared twice"
            )));
        }
        names.push(field);
        check_descriptor(kind, field, descriptor, resources, vocabularies)?;
    }

    // Backing columns must not shadow a declared field.
    for (field, descriptor) in resource.relationships.iter() {
        if let Some(identifier_name) = descriptor.identifier_name() {
            if names.contains(&identifier_name) || RESERVED_FIELDS.contains(&identifier_name) {
                return Err(config_error(format!(
                    "{kind}.{field}: identifier_name '{identifier_name}' collides with a field"
                )));
            }
        }
    }
    Ok(())
}

fn check_descriptor(
    kind: &str,
    field: &str,
    descriptor: &RelationshipDescriptor,
    resources: &BTreeMap<&'static str, ResourceDef>,
    vocabularies: &BTreeMap<&'static str, Vocabulary>,
) -> ApiResult<()> {
    let at = |message: String| config_error(format!("{kind}.{field}: {message}"));

    if let RelationshipDescriptor::ToOne(one) = descriptor {
        if one.deserializer.is_some() && one.identifier_name.is_none() {
            return Err(at("ToOne with a deserializer needs an identifier_name".to_string()));
        }
    }

    match descriptor.deserializer() {
        None => {
            if descriptor.serializer().is_some() {
                return Err(at("serializer configured for a verbatim field".to_string()));
            }
        }
        Some(Deserializer::FindByName { vocabulary }) => {
            if !vocabularies.contains_key(vocabulary) {
                return Err(at(format!("unknown vocabulary '{vocabulary}'")));
            }
        }
        Some(Deserializer::FindByIdentifier { targets }) => {
            if targets.is_empty() {
                return Err(at("reference without target kinds".to_string()));
            }
            for target in targets {
                match resources.get(target) {
                    Some(def) if def.ownership == Ownership::Shared => {}
                    Some(_) => return Err(at(format!("'{target}' is an owned kind"))),
                    None => return Err(at(format!("unknown target kind '{target}'"))),
                }
            }
        }
        Some(Deserializer::Cast { kind: child }) => {
            if matches!(descriptor, RelationshipDescriptor::ToOne(_)) {
                return Err(at("owned children must be declared ToMany".to_string()));
            }
            match resources.get(child) {
                Some(def) if def.ownership == Ownership::Owned => {}
                Some(_) => return Err(at(format!("'{child}' is not an owned kind"))),
                None => return Err(at(format!("unknown owned kind '{child}'"))),
            }
        }
    }

    match (descriptor.serializer(), descriptor.deserializer()) {
        (Some(Serializer::Name), Some(d)) if !matches!(d, Deserializer::FindByName { .. }) => {
            Err(at("Name serializer needs a by-name deserializer".to_string()))
        }
        (Some(Serializer::Nested), Some(d)) if !matches!(d, Deserializer::Cast { .. }) => {
            Err(at("Nested serializer needs a cast deserializer".to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, PropertyDef, RelationshipConfig};

    fn organisation() -> ResourceDef {
        ResourceDef::shared("organisation", "organisations", "")
            .property(PropertyDef::string("name", 256).required())
    }

    fn expect_config_error(builder: RegistryBuilder, needle: &str) {
        match builder.build() {
            Err(ApiError::Configuration(message)) => {
                assert!(message.contains(needle), "'{message}' should mention '{needle}'")
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_to_one_deserializer_without_identifier_name_is_rejected() {
        let broken = organisation().relationships(RelationshipConfig::new().with(
            "parent",
            RelationshipDescriptor::to_one().deserialize(Deserializer::FindByIdentifier {
                targets: vec!["organisation"],
            }),
        ));
        expect_config_error(Registry::builder().resource(broken), "identifier_name");
    }

    #[test]
    fn test_unknown_vocabulary_is_rejected() {
        let broken = organisation().relationships(
            RelationshipConfig::new().with("keywords", RelationshipDescriptor::named_many("keyword")),
        );
        expect_config_error(Registry::builder().resource(broken), "unknown vocabulary");
    }

    #[test]
    fn test_cast_must_target_owned_kind() {
        let broken = organisation().relationships(
            RelationshipConfig::new()
                .with("children", RelationshipDescriptor::owned_many("organisation")),
        );
        expect_config_error(Registry::builder().resource(broken), "not an owned kind");
    }

    #[test]
    fn test_field_collision_is_rejected() {
        let broken = organisation().relationships(RelationshipConfig::new().with(
            "name",
            RelationshipDescriptor::to_many(),
        ));
        expect_config_error(Registry::builder().resource(broken), "declared twice");

        let reserved = organisation().property(PropertyDef::new("platform", DataType::String));
        expect_config_error(Registry::builder().resource(reserved), "reserved");
    }

    #[test]
    fn test_valid_registry_exposes_shapes_in_order() {
        let registry = Registry::builder()
            .vocabulary(Vocabulary::new("keyword", "free keywords"))
            .resource(organisation().relationships(
                RelationshipConfig::new()
                    .with("keywords", RelationshipDescriptor::named_many("keyword"))
                    .with(
                        "parent_organisation",
                        RelationshipDescriptor::resource_one(
                            &["organisation"],
                            "parent_organisation_identifier",
                        ),
                    ),
            ))
            .resource(ResourceDef::owned("checksum", "").property(PropertyDef::string("value", 64)))
            .build()
            .unwrap();

        let routed: Vec<_> = registry.routed().map(|r| r.kind).collect();
        assert_eq!(routed, vec!["organisation"]);
        assert!(registry.shape("organisation", Variant::Create).is_ok());
        assert!(registry.shape("checksum", Variant::Read).is_ok());
        assert!(registry.shared("checksum").is_err());
    }
}
