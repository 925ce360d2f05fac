//! Generic CRUD operations shared by every routed resource kind.
//!
//! Every operation runs in exactly one store transaction. Writes commit on
//! success and roll back on any error, so no partial write is ever visible.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::config::CatalogConfig;
use crate::error::{ApiError, ApiResult};
use crate::formats::{render, FormatRegistry};
use crate::logic::deserialize::{WriteContext, WriteEngine};
use crate::logic::linking::write_error;
use crate::logic::serialize::serialize_entity;
use crate::model::{Entity, EntityId, Page, PlatformScope, Principal, Registry};
use crate::store::{CatalogStore, StoreError, Transaction};

pub struct CatalogService<S: CatalogStore> {
    store: Arc<S>,
    registry: Arc<Registry>,
    formats: Arc<FormatRegistry>,
    settings: CatalogConfig,
}

impl<S: CatalogStore> CatalogService<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<Registry>,
        formats: Arc<FormatRegistry>,
        settings: CatalogConfig,
    ) -> Self {
        Self {
            store,
            registry,
            formats,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn settings(&self) -> &CatalogConfig {
        &self.settings
    }

    pub fn page(&self, offset: Option<usize>, limit: Option<usize>) -> Page {
        Page::new(offset, limit, self.settings.default_limit)
    }

    fn engine(&self) -> WriteEngine<'_> {
        WriteEngine::new(&self.registry, &self.settings)
    }

    async fn begin(&self) -> ApiResult<Box<dyn Transaction>> {
        Ok(self.store.begin().await?)
    }

    pub async fn list(
        &self,
        kind: &str,
        platform: Option<&str>,
        page: Page,
        schema: Option<&str>,
    ) -> ApiResult<Vec<Value>> {
        self.registry.shared(kind)?;
        let converter = self.formats.resolve(kind, schema)?;

        let scope = platform.map(|p| PlatformScope::new(p, &self.settings.local_platform));
        let mut tx = self.begin().await?;
        let entities = tx.list_entities(kind, scope, page).await;
        close_read(tx).await;

        entities?
            .iter()
            .map(|entity| self.present(entity).map(|n| render(converter, n)))
            .collect()
    }

    /// Look up by identity, or by `(platform, platform_identifier)` when a
    /// platform is given.
    pub async fn get(
        &self,
        kind: &str,
        identifier: &str,
        platform: Option<&str>,
        schema: Option<&str>,
    ) -> ApiResult<Value> {
        self.registry.shared(kind)?;
        let converter = self.formats.resolve(kind, schema)?;

        let mut tx = self.begin().await?;
        let found = self.lookup(tx.as_mut(), kind, identifier, platform).await;
        close_read(tx).await;

        let entity = found?
            .filter(|e| e.kind == kind)
            .ok_or_else(|| ApiError::not_found(kind, identifier, platform))?;
        Ok(render(converter, self.present(&entity)?))
    }

    /// Native resources have no platform identifier of their own; on the
    /// local platform their identity stands in for it.
    async fn lookup(
        &self,
        tx: &mut dyn Transaction,
        kind: &str,
        identifier: &str,
        platform: Option<&str>,
    ) -> ApiResult<Option<Entity>> {
        if let Some(platform) = platform {
            if let Some(found) = tx.find_by_platform(kind, platform, identifier).await? {
                return Ok(Some(found));
            }
            if platform != self.settings.local_platform {
                return Ok(None);
            }
        }
        let Ok(id) = identifier.parse::<EntityId>() else {
            return Ok(None);
        };
        let scope = platform.map(|p| PlatformScope::new(p, &self.settings.local_platform));
        Ok(tx
            .get_entity(id)
            .await?
            .filter(|e| scope.map_or(true, |s| s.matches(e.platform.as_deref()))))
    }

    /// Read shape of `entity`; a resource stored without a platform belongs
    /// to the local one.
    fn present(&self, entity: &Entity) -> ApiResult<Map<String, Value>> {
        let mut out = serialize_entity(&self.registry, entity)?;
        if let Some(platform) = out.get_mut("platform").filter(|p| p.is_null()) {
            *platform = Value::String(self.settings.local_platform.clone());
        }
        Ok(out)
    }

    pub async fn create(&self, kind: &str, payload: Value, principal: &Principal) -> ApiResult<Value> {
        principal.require_role(self.settings.write_role.as_deref())?;
        self.registry.shared(kind)?;

        let mut ctx = WriteContext::new(self.begin().await?);
        let result = self.create_in(&mut ctx, kind, payload).await;
        let output = self.finish(ctx, result).await?;
        log::info!(
            "{} created {} {}",
            principal.user_id,
            kind,
            output["identifier"]
        );
        Ok(output)
    }

    async fn create_in(&self, ctx: &mut WriteContext, kind: &str, payload: Value) -> ApiResult<Value> {
        let entity = self
            .engine()
            .create_within(ctx, kind, payload, 0, String::new())
            .await?;
        Ok(Value::Object(self.present(&entity)?))
    }

    /// Replace an entity's fields and relationships wholesale.
    pub async fn update(
        &self,
        kind: &str,
        identifier: &str,
        payload: Value,
        principal: &Principal,
    ) -> ApiResult<Value> {
        principal.require_role(self.settings.write_role.as_deref())?;
        self.registry.shared(kind)?;
        let id = parse_identifier(kind, identifier)?;

        let mut ctx = WriteContext::new(self.begin().await?);
        let result = self.update_in(&mut ctx, kind, id, payload).await;
        let output = self.finish(ctx, result).await?;
        log::info!("{} updated {} {}", principal.user_id, kind, id);
        Ok(output)
    }

    async fn update_in(
        &self,
        ctx: &mut WriteContext,
        kind: &str,
        id: EntityId,
        payload: Value,
    ) -> ApiResult<Value> {
        let def = self.registry.shared(kind)?;
        let existing = ctx
            .tx
            .get_entity(id)
            .await?
            .filter(|e| e.kind == kind)
            .ok_or_else(|| ApiError::not_found(kind, id, None))?;

        let mut entity = Entity::new(def.kind);
        entity.identifier = existing.identifier;
        entity.date_created = existing.date_created;
        self.engine()
            .build(ctx, def, payload, &mut entity, 0, "")
            .await?;

        if let (Some(platform), Some(platform_identifier)) =
            (&entity.platform, &entity.platform_identifier)
        {
            if let Some(other) = ctx
                .tx
                .find_by_platform(kind, platform, platform_identifier)
                .await?
                .filter(|other| other.identifier != Some(id))
            {
                return Err(ApiError::Conflict {
                    kind: kind.to_string(),
                    platform: platform.clone(),
                    platform_identifier: platform_identifier.clone(),
                    existing: other.identifier,
                });
            }
        }

        entity.date_modified = Some(Utc::now());
        let updated = ctx
            .tx
            .update_entity(entity.clone())
            .await
            .map_err(|e| write_error(&entity, e))?;
        Ok(Value::Object(self.present(&updated)?))
    }

    pub async fn delete(&self, kind: &str, identifier: &str, principal: &Principal) -> ApiResult<Value> {
        principal.require_role(self.settings.write_role.as_deref())?;
        self.registry.shared(kind)?;
        let id = parse_identifier(kind, identifier)?;

        let mut ctx = WriteContext::new(self.begin().await?);
        let result = self.delete_in(&mut ctx, kind, id).await;
        let output = self.finish(ctx, result).await?;
        log::info!("{} deleted {} {}", principal.user_id, kind, id);
        Ok(output)
    }

    async fn delete_in(&self, ctx: &mut WriteContext, kind: &str, id: EntityId) -> ApiResult<Value> {
        let exists = ctx
            .tx
            .get_entity(id)
            .await?
            .is_some_and(|e| e.kind == kind);
        if !exists {
            return Err(ApiError::not_found(kind, id, None));
        }
        match ctx.tx.delete_entity(id).await {
            Ok(true) => Ok(json!({ "identifier": id, "deleted": true })),
            Ok(false) => Err(ApiError::not_found(kind, id, None)),
            Err(StoreError::ForeignKeyViolation { constraint }) => {
                log::warn!("delete of {} {} blocked by {}", kind, id, constraint);
                Err(ApiError::DependentExists {
                    kind: kind.to_string(),
                    identifier: id,
                    reason: "it is still referenced by another resource".to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Number of entities of `kind`; per platform when `detailed`.
    pub async fn count(&self, kind: &str, detailed: bool) -> ApiResult<Value> {
        self.registry.shared(kind)?;
        let mut tx = self.begin().await?;
        let counts = tx.count_entities(kind).await;
        close_read(tx).await;
        let counts = counts?;

        if !detailed {
            return Ok(json!(counts.values().sum::<u64>()));
        }
        let mut per_platform: BTreeMap<String, u64> = BTreeMap::new();
        for (platform, n) in counts {
            let platform = platform.unwrap_or_else(|| self.settings.local_platform.clone());
            *per_platform.entry(platform).or_insert(0) += n;
        }
        Ok(json!(per_platform))
    }

    pub fn platforms(&self) -> Vec<String> {
        self.settings.platforms.clone()
    }

    /// Commit on success, roll back on failure. A conflict found while
    /// writing is completed with the identity that holds the natural key.
    async fn finish<T>(&self, ctx: WriteContext, result: ApiResult<T>) -> ApiResult<T> {
        let error = match result {
            Ok(value) => match ctx.tx.commit().await {
                Ok(()) => return Ok(value),
                Err(StoreError::UniqueViolation { constraint }) => {
                    return Err(ApiError::Unexpected(anyhow::anyhow!(
                        "commit hit unique constraint {constraint}"
                    )))
                }
                Err(e) => return Err(e.into()),
            },
            Err(error) => error,
        };
        if let Err(e) = ctx.tx.rollback().await {
            log::warn!("rollback failed: {}", e);
        }
        Err(self.with_existing(error).await)
    }

    async fn with_existing(&self, error: ApiError) -> ApiError {
        match error {
            ApiError::Conflict {
                kind,
                platform,
                platform_identifier,
                existing: None,
            } => {
                let existing = self
                    .lookup_existing(&kind, &platform, &platform_identifier)
                    .await;
                log::warn!(
                    "conflict on {} ({}, {}) with {:?}",
                    kind,
                    platform,
                    platform_identifier,
                    existing
                );
                ApiError::Conflict {
                    kind,
                    platform,
                    platform_identifier,
                    existing,
                }
            }
            ApiError::Conflict { ref kind, existing, .. } => {
                log::warn!("conflict on {} with {:?}", kind, existing);
                error
            }
            other => other,
        }
    }

    async fn lookup_existing(
        &self,
        kind: &str,
        platform: &str,
        platform_identifier: &str,
    ) -> Option<EntityId> {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("could not look up conflicting {}: {}", kind, e);
                return None;
            }
        };
        let found = tx
            .find_by_platform(kind, platform, platform_identifier)
            .await;
        close_read(tx).await;
        match found {
            Ok(entity) => entity.and_then(|e| e.identifier),
            Err(e) => {
                log::warn!("could not look up conflicting {}: {}", kind, e);
                None
            }
        }
    }
}

async fn close_read(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        log::warn!("closing read transaction failed: {}", e);
    }
}

/// Path identities that are not integers cannot exist.
fn parse_identifier(kind: &str, raw: &str) -> ApiResult<EntityId> {
    raw.parse()
        .map_err(|_| ApiError::not_found(kind, raw, None))
}
