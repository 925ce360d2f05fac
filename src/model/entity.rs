use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::{EntityId, NamedEntity, ResourceRef};

/// Stored counterpart of a resource.
///
/// `fields` holds scalar columns, including the backing identifier column of
/// every single-valued relationship (`license_identifier`, ...). `relations`
/// holds the loaded relationship values keyed by relationship field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// `None` until the store has persisted the entity.
    pub identifier: Option<EntityId>,
    pub kind: String,
    pub platform: Option<String>,
    pub platform_identifier: Option<String>,
    pub fields: Map<String, Value>,
    pub relations: BTreeMap<String, Relation>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
}

/// Value of one relationship field.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    One(Related),
    Many(Vec<Related>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Shared vocabulary row.
    Named(NamedEntity),
    /// Another resource in the shared reference space.
    Resource(ResourceRef),
    /// Child row exclusively owned by the parent (distribution, checksum).
    Owned(Entity),
}

impl Entity {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            identifier: None,
            kind: kind.into(),
            platform: None,
            platform_identifier: None,
            fields: Map::new(),
            relations: BTreeMap::new(),
            date_created: None,
            date_modified: None,
        }
    }

    pub fn reference(&self) -> Option<ResourceRef> {
        self.identifier
            .map(|identifier| ResourceRef::new(self.kind.clone(), identifier))
    }

    /// Owned children of every relationship field, in field order.
    pub fn owned_children(&self) -> impl Iterator<Item = (&str, &Entity)> {
        self.relations.iter().flat_map(|(field, relation)| {
            relation.items().filter_map(move |related| match related {
                Related::Owned(child) => Some((field.as_str(), child)),
                _ => None,
            })
        })
    }

    pub fn owned_children_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.relations
            .values_mut()
            .flat_map(|relation| relation.items_mut())
            .filter_map(|related| match related {
                Related::Owned(child) => Some(child),
                _ => None,
            })
    }

    /// Whether this entity or any of its owned descendants carries `identifier`.
    pub fn contains_identifier(&self, identifier: EntityId) -> bool {
        self.identifier == Some(identifier)
            || self
                .owned_children()
                .any(|(_, child)| child.contains_identifier(identifier))
    }

    /// Depth-first search through owned descendants (self included).
    pub fn find_descendant(&self, identifier: EntityId) -> Option<&Entity> {
        if self.identifier == Some(identifier) {
            return Some(self);
        }
        self.owned_children()
            .find_map(|(_, child)| child.find_descendant(identifier))
    }
}

impl Relation {
    pub fn items(&self) -> Box<dyn Iterator<Item = &Related> + '_> {
        match self {
            Relation::One(related) => Box::new(std::iter::once(related)),
            Relation::Many(items) => Box::new(items.iter()),
        }
    }

    pub fn items_mut(&mut self) -> Box<dyn Iterator<Item = &mut Related> + '_> {
        match self {
            Relation::One(related) => Box::new(std::iter::once(related)),
            Relation::Many(items) => Box::new(items.iter_mut()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Relation::Many(items) if items.is_empty())
    }
}

impl Related {
    /// Identity of the related row, if it has been assigned one.
    pub fn identifier(&self) -> Option<EntityId> {
        match self {
            Related::Named(named) => Some(named.identifier),
            Related::Resource(reference) => Some(reference.identifier),
            Related::Owned(entity) => entity.identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(kind: &str, identifier: EntityId) -> Related {
        let mut child = Entity::new(kind);
        child.identifier = Some(identifier);
        Related::Owned(child)
    }

    #[test]
    fn test_find_descendant_walks_owned_children() {
        let mut distribution = Entity::new("distribution");
        distribution.identifier = Some(2);
        distribution
            .relations
            .insert("checksums".to_string(), Relation::Many(vec![owned("checksum", 3)]));

        let mut dataset = Entity::new("dataset");
        dataset.identifier = Some(1);
        dataset.relations.insert(
            "distributions".to_string(),
            Relation::Many(vec![Related::Owned(distribution)]),
        );
        dataset.relations.insert(
            "citations".to_string(),
            Relation::Many(vec![Related::Resource(ResourceRef::new("publication", 9))]),
        );

        assert_eq!(dataset.find_descendant(3).map(|e| e.kind.as_str()), Some("checksum"));
        assert!(dataset.contains_identifier(2));
        // Referenced resources are not descendants.
        assert!(!dataset.contains_identifier(9));
        assert_eq!(dataset.owned_children().count(), 1);
    }

    #[test]
    fn test_empty_relation() {
        assert!(Relation::Many(vec![]).is_empty());
        assert!(!Relation::One(Related::Resource(ResourceRef::new("organisation", 1))).is_empty());
    }
}
