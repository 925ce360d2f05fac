//! Declarative per-field relationship metadata.
//!
//! Every relationship-bearing field of a resource kind carries one
//! [`RelationshipDescriptor`]. The descriptors have no behaviour of their own;
//! the deriver, the serialization engine and the linking pass all dispatch on
//! them.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    List,
}

/// How a stored relation is projected into the external representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    /// The related named entity's `name`.
    Name,
    /// The related row's identity.
    Identifier,
    /// The owned child rendered through its own read shape.
    Nested,
}

/// How an incoming value becomes a stored relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deserializer {
    /// One name or a list of names, found or created in a shared vocabulary.
    FindByName { vocabulary: &'static str },
    /// Identities of resources that must already exist as one of `targets`.
    FindByIdentifier { targets: Vec<&'static str> },
    /// Nested create payloads of an exclusively owned child kind.
    Cast { kind: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToOne {
    /// Backing column that holds the related identity.
    pub identifier_name: Option<&'static str>,
    pub serializer: Option<Serializer>,
    pub deserializer: Option<Deserializer>,
    pub required: bool,
    pub description: &'static str,
    pub example: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToMany {
    pub serializer: Option<Serializer>,
    pub deserializer: Option<Deserializer>,
    pub description: &'static str,
    pub example: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipDescriptor {
    ToOne(ToOne),
    ToMany(ToMany),
}

impl RelationshipDescriptor {
    pub fn to_one() -> Self {
        RelationshipDescriptor::ToOne(ToOne {
            identifier_name: None,
            serializer: None,
            deserializer: None,
            required: false,
            description: "",
            example: None,
        })
    }

    pub fn to_many() -> Self {
        RelationshipDescriptor::ToMany(ToMany {
            serializer: None,
            deserializer: None,
            description: "",
            example: None,
        })
    }

    /// Single shared vocabulary entry, e.g. a license.
    pub fn named_one(vocabulary: &'static str, identifier_name: &'static str) -> Self {
        Self::to_one()
            .identified_by(identifier_name)
            .deserialize(Deserializer::FindByName { vocabulary })
            .serialize(Serializer::Name)
    }

    /// Set of shared vocabulary entries, e.g. keywords.
    pub fn named_many(vocabulary: &'static str) -> Self {
        Self::to_many()
            .deserialize(Deserializer::FindByName { vocabulary })
            .serialize(Serializer::Name)
    }

    /// Reference to an existing resource, e.g. a parent organisation.
    pub fn resource_one(targets: &[&'static str], identifier_name: &'static str) -> Self {
        Self::to_one()
            .identified_by(identifier_name)
            .deserialize(Deserializer::FindByIdentifier {
                targets: targets.to_vec(),
            })
            .serialize(Serializer::Identifier)
    }

    /// References to existing resources, e.g. citations.
    pub fn resource_many(targets: &[&'static str]) -> Self {
        Self::to_many()
            .deserialize(Deserializer::FindByIdentifier {
                targets: targets.to_vec(),
            })
            .serialize(Serializer::Identifier)
    }

    /// Exclusively owned children, e.g. distributions.
    pub fn owned_many(kind: &'static str) -> Self {
        Self::to_many()
            .deserialize(Deserializer::Cast { kind })
            .serialize(Serializer::Nested)
    }

    pub fn identified_by(mut self, identifier_name: &'static str) -> Self {
        if let RelationshipDescriptor::ToOne(one) = &mut self {
            one.identifier_name = Some(identifier_name);
        }
        self
    }

    pub fn required(mut self) -> Self {
        if let RelationshipDescriptor::ToOne(one) = &mut self {
            one.required = true;
        }
        self
    }

    pub fn serialize(mut self, serializer: Serializer) -> Self {
        match &mut self {
            RelationshipDescriptor::ToOne(one) => one.serializer = Some(serializer),
            RelationshipDescriptor::ToMany(many) => many.serializer = Some(serializer),
        }
        self
    }

    pub fn deserialize(mut self, deserializer: Deserializer) -> Self {
        match &mut self {
            RelationshipDescriptor::ToOne(one) => one.deserializer = Some(deserializer),
            RelationshipDescriptor::ToMany(many) => many.deserializer = Some(deserializer),
        }
        self
    }

    pub fn describe(mut self, description: &'static str, example: Value) -> Self {
        match &mut self {
            RelationshipDescriptor::ToOne(one) => {
                one.description = description;
                one.example = Some(example);
            }
            RelationshipDescriptor::ToMany(many) => {
                many.description = description;
                many.example = Some(example);
            }
        }
        self
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            RelationshipDescriptor::ToOne(_) => Cardinality::Single,
            RelationshipDescriptor::ToMany(_) => Cardinality::List,
        }
    }

    pub fn serializer(&self) -> Option<Serializer> {
        match self {
            RelationshipDescriptor::ToOne(one) => one.serializer,
            RelationshipDescriptor::ToMany(many) => many.serializer,
        }
    }

    pub fn deserializer(&self) -> Option<&Deserializer> {
        match self {
            RelationshipDescriptor::ToOne(one) => one.deserializer.as_ref(),
            RelationshipDescriptor::ToMany(many) => many.deserializer.as_ref(),
        }
    }

    pub fn identifier_name(&self) -> Option<&'static str> {
        match self {
            RelationshipDescriptor::ToOne(one) => one.identifier_name,
            RelationshipDescriptor::ToMany(_) => None,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, RelationshipDescriptor::ToOne(one) if one.required)
    }

    pub fn description(&self) -> &'static str {
        match self {
            RelationshipDescriptor::ToOne(one) => one.description,
            RelationshipDescriptor::ToMany(many) => many.description,
        }
    }

    pub fn example(&self) -> Option<&Value> {
        match self {
            RelationshipDescriptor::ToOne(one) => one.example.as_ref(),
            RelationshipDescriptor::ToMany(many) => many.example.as_ref(),
        }
    }

    /// Whether the field writes exclusively owned children.
    pub fn is_cast(&self) -> bool {
        matches!(self.deserializer(), Some(Deserializer::Cast { .. }))
    }
}

/// Ordered `field -> descriptor` table of one resource kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipConfig {
    fields: Vec<(&'static str, RelationshipDescriptor)>,
}

impl RelationshipConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &'static str, descriptor: RelationshipDescriptor) -> Self {
        self.fields.push((field, descriptor));
        self
    }

    pub fn get(&self, field: &str) -> Option<&RelationshipDescriptor> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RelationshipDescriptor)> {
        self.fields.iter().map(|(name, descriptor)| (*name, descriptor))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}
