//! In-memory catalog store.
//!
//! Transactions are serialized by an owned async mutex: `begin` takes the lock
//! and works on a copy of the state, `commit` swaps the copy in, `rollback`
//! (or dropping the transaction) discards it. The constraint checks mirror the
//! PostgreSQL schema so both stores report the same [`StoreError`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    Entity, EntityId, NamedEntity, Page, PlatformScope, Related, Relation, ResourceRef,
};
use crate::store::traits::{CatalogStore, StoreError, StoreResult, Transaction};

const PLATFORM_UNIQUE: &str = "entities_kind_platform_platform_identifier_key";
const NAMED_UNIQUE: &str = "named_entities_vocabulary_name_key";
const REF_TARGET_FKEY: &str = "resource_refs_target_fkey";
const LINK_TARGET_FKEY: &str = "resource_links_target_fkey";
const NAMED_FKEY: &str = "named_links_named_fkey";

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_entity: EntityId,
    next_named: EntityId,
    /// Top-level entities; identities grow monotonically, so key order is
    /// insertion order.
    entities: BTreeMap<EntityId, Entity>,
    named: BTreeMap<EntityId, NamedEntity>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryState {
    fn find(&self, identifier: EntityId) -> Option<&Entity> {
        self.entities
            .get(&identifier)
            .or_else(|| {
                self.entities
                    .values()
                    .find_map(|root| root.find_descendant(identifier))
            })
    }

    fn check_platform_unique(&self, entity: &Entity) -> StoreResult<()> {
        let (Some(platform), Some(platform_identifier)) =
            (&entity.platform, &entity.platform_identifier)
        else {
            return Ok(());
        };
        let taken = self.entities.values().any(|other| {
            other.identifier != entity.identifier
                && other.kind == entity.kind
                && other.platform.as_ref() == Some(platform)
                && other.platform_identifier.as_ref() == Some(platform_identifier)
        });
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: PLATFORM_UNIQUE.to_string(),
            });
        }
        Ok(())
    }

    fn check_targets(&self, entity: &Entity) -> StoreResult<()> {
        for relation in entity.relations.values() {
            for related in relation.items() {
                match related {
                    Related::Named(named) if !self.named.contains_key(&named.identifier) => {
                        return Err(StoreError::ForeignKeyViolation {
                            constraint: NAMED_FKEY.to_string(),
                        });
                    }
                    Related::Resource(reference) if self.find(reference.identifier).is_none() => {
                        return Err(StoreError::ForeignKeyViolation {
                            constraint: LINK_TARGET_FKEY.to_string(),
                        });
                    }
                    Related::Owned(child) => self.check_targets(child)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn assign_identities(&mut self, entity: &mut Entity) {
        if entity.identifier.is_none() {
            self.next_entity += 1;
            entity.identifier = Some(self.next_entity);
        }
        for child in entity.owned_children_mut() {
            self.assign_identities(child);
        }
    }

    /// Whether some entity outside `excluded` holds a single-valued reference
    /// to one of `targets`.
    fn has_blocking_reference(&self, targets: &Entity, excluded: EntityId) -> bool {
        fn blocks(entity: &Entity, targets: &Entity) -> bool {
            entity.relations.values().any(|relation| match relation {
                Relation::One(Related::Resource(reference)) => {
                    targets.contains_identifier(reference.identifier)
                }
                Relation::One(Related::Owned(child)) => blocks(child, targets),
                Relation::Many(items) => items.iter().any(|related| match related {
                    Related::Owned(child) => blocks(child, targets),
                    _ => false,
                }),
                _ => false,
            })
        }
        self.entities
            .values()
            .filter(|root| root.identifier != Some(excluded))
            .any(|root| blocks(root, targets))
    }

    /// Drop multi-valued links pointing into a deleted entity tree.
    fn unlink(&mut self, deleted: &Entity) {
        fn prune(entity: &mut Entity, deleted: &Entity) {
            for relation in entity.relations.values_mut() {
                if let Relation::Many(items) = relation {
                    items.retain(|related| match related {
                        Related::Resource(reference) => {
                            !deleted.contains_identifier(reference.identifier)
                        }
                        _ => true,
                    });
                }
            }
            for child in entity.owned_children_mut() {
                prune(child, deleted);
            }
        }
        for root in self.entities.values_mut() {
            prune(root, deleted);
        }
    }
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn get_entity(&mut self, identifier: EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.working.find(identifier).cloned())
    }

    async fn resolve_refs(&mut self, identifiers: &[EntityId]) -> StoreResult<Vec<ResourceRef>> {
        Ok(identifiers
            .iter()
            .filter_map(|id| self.working.find(*id))
            .filter_map(Entity::reference)
            .collect())
    }

    async fn find_by_platform(
        &mut self,
        kind: &str,
        platform: &str,
        platform_identifier: &str,
    ) -> StoreResult<Option<Entity>> {
        Ok(self
            .working
            .entities
            .values()
            .find(|e| {
                e.kind == kind
                    && e.platform.as_deref() == Some(platform)
                    && e.platform_identifier.as_deref() == Some(platform_identifier)
            })
            .cloned())
    }

    async fn list_entities(
        &mut self,
        kind: &str,
        scope: Option<PlatformScope<'_>>,
        page: Page,
    ) -> StoreResult<Vec<Entity>> {
        Ok(self
            .working
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .filter(|e| scope.map_or(true, |s| s.matches(e.platform.as_deref())))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count_entities(&mut self, kind: &str) -> StoreResult<BTreeMap<Option<String>, u64>> {
        let mut counts = BTreeMap::new();
        for entity in self.working.entities.values().filter(|e| e.kind == kind) {
            *counts.entry(entity.platform.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_entity(&mut self, mut entity: Entity) -> StoreResult<Entity> {
        if entity.identifier.is_some() {
            return Err(anyhow!("entity of kind {} is already persisted", entity.kind).into());
        }
        self.working.check_platform_unique(&entity)?;
        self.working.check_targets(&entity)?;
        self.working.assign_identities(&mut entity);
        if let Some(identifier) = entity.identifier {
            self.working.entities.insert(identifier, entity.clone());
        }
        Ok(entity)
    }

    async fn update_entity(&mut self, mut entity: Entity) -> StoreResult<Entity> {
        let identifier = entity
            .identifier
            .filter(|id| self.working.entities.contains_key(id))
            .ok_or_else(|| anyhow!("cannot update unknown {} entity", entity.kind))?;
        self.working.check_platform_unique(&entity)?;
        self.working.check_targets(&entity)?;
        self.working.assign_identities(&mut entity);
        self.working.entities.insert(identifier, entity.clone());
        Ok(entity)
    }

    async fn delete_entity(&mut self, identifier: EntityId) -> StoreResult<bool> {
        let Some(target) = self.working.entities.get(&identifier).cloned() else {
            return Ok(false);
        };
        if self.working.has_blocking_reference(&target, identifier) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: REF_TARGET_FKEY.to_string(),
            });
        }
        self.working.entities.remove(&identifier);
        self.working.unlink(&target);
        Ok(true)
    }

    async fn find_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<Option<NamedEntity>> {
        Ok(self
            .working
            .named
            .values()
            .find(|n| n.vocabulary == vocabulary && n.name == name)
            .cloned())
    }

    async fn insert_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<NamedEntity> {
        if self.find_named(vocabulary, name).await?.is_some() {
            return Err(StoreError::UniqueViolation {
                constraint: NAMED_UNIQUE.to_string(),
            });
        }
        self.working.next_named += 1;
        let named = NamedEntity {
            identifier: self.working.next_named,
            vocabulary: vocabulary.to_string(),
            name: name.to_string(),
        };
        self.working.named.insert(named.identifier, named.clone());
        Ok(named)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn organisation(platform_identifier: &str) -> Entity {
        let mut entity = Entity::new("organisation");
        entity.platform = Some("zenodo".to_string());
        entity.platform_identifier = Some(platform_identifier.to_string());
        entity
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_entity(organisation("a")).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let listed = tx
            .list_entities("organisation", None, Page::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_scoped_listing_pages_after_filtering() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for name in ["a", "b", "c"] {
            tx.insert_entity(organisation(name)).await.unwrap();
            tx.insert_entity(Entity::new("organisation")).await.unwrap();
        }

        let zenodo = PlatformScope::new("zenodo", "aiod");
        let page = Page { offset: 1, limit: 5 };
        let listed = tx.list_entities("organisation", Some(zenodo), page).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|e| e.platform_identifier.clone()).collect();
        assert_eq!(ids, vec![Some("b".to_string()), Some("c".to_string())]);

        let local = PlatformScope::new("aiod", "aiod");
        let listed = tx.list_entities("organisation", Some(local), Page::default()).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|e| e.platform.is_none()));
    }

    #[tokio::test]
    async fn test_platform_pair_is_unique_per_kind() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_entity(organisation("a")).await.unwrap();
        let err = tx.insert_entity(organisation("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        let mut dataset = Entity::new("dataset");
        dataset.platform = Some("zenodo".to_string());
        dataset.platform_identifier = Some("a".to_string());
        assert!(tx.insert_entity(dataset).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_reference_blocks_delete_and_links_cascade() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let parent = tx.insert_entity(organisation("parent")).await.unwrap();
        let parent_ref = parent.reference().unwrap();

        let mut child = organisation("child");
        child
            .relations
            .insert("parent_organisation".to_string(), Relation::One(Related::Resource(parent_ref.clone())));
        let child = tx.insert_entity(child).await.unwrap();

        let mut citing = Entity::new("dataset");
        citing
            .relations
            .insert("citations".to_string(), Relation::Many(vec![Related::Resource(parent_ref)]));
        let citing = tx.insert_entity(citing).await.unwrap();

        let err = tx.delete_entity(parent.identifier.unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));

        assert!(tx.delete_entity(child.identifier.unwrap()).await.unwrap());
        assert!(tx.delete_entity(parent.identifier.unwrap()).await.unwrap());

        let citing = tx.get_entity(citing.identifier.unwrap()).await.unwrap().unwrap();
        assert_eq!(citing.relations["citations"], Relation::Many(vec![]));
    }

    #[tokio::test]
    async fn test_unknown_reference_target_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut dataset = Entity::new("dataset");
        dataset.relations.insert(
            "citations".to_string(),
            Relation::Many(vec![Related::Resource(ResourceRef::new("publication", 99))]),
        );
        let err = tx.insert_entity(dataset).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_owned_children_get_identities_and_are_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut dataset = Entity::new("dataset");
        dataset.relations.insert(
            "distributions".to_string(),
            Relation::Many(vec![Related::Owned(Entity::new("distribution"))]),
        );
        let dataset = tx.insert_entity(dataset).await.unwrap();
        let (_, child) = dataset.owned_children().next().unwrap();
        let child_id = child.identifier.unwrap();
        assert_ne!(Some(child_id), dataset.identifier);

        let refs = tx.resolve_refs(&[child_id, 1000]).await.unwrap();
        assert_eq!(refs, vec![ResourceRef::new("distribution", child_id)]);

        assert!(tx.delete_entity(dataset.identifier.unwrap()).await.unwrap());
        assert!(tx.get_entity(child_id).await.unwrap().is_none());
    }
}
