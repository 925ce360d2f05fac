use crate::model::{PropertyDef, RelationshipConfig};

/// Whether a kind is a top-level resource or a child owned by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Routed resource carrying `platform` / `platform_identifier`.
    Shared,
    /// Exclusively owned child (distribution, checksum); deleted with its parent.
    Owned,
}

/// Single declaration of a resource kind from which every shape is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDef {
    pub kind: &'static str,
    /// Collection path segment, e.g. `datasets`.
    pub plural: &'static str,
    pub ownership: Ownership,
    pub description: &'static str,
    pub properties: Vec<PropertyDef>,
    pub relationships: RelationshipConfig,
}

impl ResourceDef {
    pub fn shared(kind: &'static str, plural: &'static str, description: &'static str) -> Self {
        Self {
            kind,
            plural,
            ownership: Ownership::Shared,
            description,
            properties: Vec::new(),
            relationships: RelationshipConfig::new(),
        }
    }

    pub fn owned(kind: &'static str, description: &'static str) -> Self {
        Self {
            kind,
            plural: kind,
            ownership: Ownership::Owned,
            description,
            properties: Vec::new(),
            relationships: RelationshipConfig::new(),
        }
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn relationships(mut self, relationships: RelationshipConfig) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn is_shared(&self) -> bool {
        self.ownership == Ownership::Shared
    }

    pub fn property_def(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A shared vocabulary of named entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    pub name: &'static str,
    pub description: &'static str,
    pub max_length: usize,
}

impl Vocabulary {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            max_length: 256,
        }
    }
}
