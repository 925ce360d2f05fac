use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Entity, EntityId, NamedEntity, Page, PlatformScope, ResourceRef};

/// Failures reported by a store; constraint violations stay distinguishable
/// from every other backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint '{constraint}' violated")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint '{constraint}' violated")]
    ForeignKeyViolation { constraint: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One store transaction. Every request runs inside exactly one.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Look up any entity of the shared reference space, owned children included.
    async fn get_entity(&mut self, identifier: EntityId) -> StoreResult<Option<Entity>>;

    /// Resolve the kinds of the given identities; absent identities are left out.
    async fn resolve_refs(&mut self, identifiers: &[EntityId]) -> StoreResult<Vec<ResourceRef>>;

    async fn find_by_platform(
        &mut self,
        kind: &str,
        platform: &str,
        platform_identifier: &str,
    ) -> StoreResult<Option<Entity>>;

    /// Top-level entities of `kind` in insertion order, filtered then paged.
    async fn list_entities(
        &mut self,
        kind: &str,
        scope: Option<PlatformScope<'_>>,
        page: Page,
    ) -> StoreResult<Vec<Entity>>;

    /// Number of entities of `kind` per platform (`None` for platform-less rows).
    async fn count_entities(&mut self, kind: &str) -> StoreResult<BTreeMap<Option<String>, u64>>;

    /// Persist a new entity tree and return it with identities assigned.
    async fn insert_entity(&mut self, entity: Entity) -> StoreResult<Entity>;

    /// Replace an existing entity's fields and relations wholesale.
    async fn update_entity(&mut self, entity: Entity) -> StoreResult<Entity>;

    /// Delete an entity and its owned children. Returns `false` if absent.
    async fn delete_entity(&mut self, identifier: EntityId) -> StoreResult<bool>;

    async fn find_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<Option<NamedEntity>>;

    /// Insert a named entity; `UniqueViolation` if a concurrent writer got there first.
    async fn insert_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<NamedEntity>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}
