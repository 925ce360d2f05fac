//! Related-object resolution across resource kinds.
//!
//! By-identifier fields may carry nested objects in place of identities.
//! Before the engine runs, every such object is replaced by an identity:
//! objects of the local platform must name an existing `identifier`, objects
//! of another platform are looked up by `(platform, platform_identifier)` in
//! the target kind and created through that kind's own create path if absent.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::logic::deserialize::{join, BoxFuture, WriteContext, WriteEngine};
use crate::model::{Deserializer, Entity, ResourceDef, Variant};
use crate::store::StoreError;

impl<'r> WriteEngine<'r> {
    /// Validate, link and deserialize a create payload of `kind`, then insert
    /// it inside the context's transaction.
    pub fn create_within<'a>(
        &'a self,
        ctx: &'a mut WriteContext,
        kind: &'a str,
        payload: Value,
        depth: usize,
        path: String,
    ) -> BoxFuture<'a, ApiResult<Entity>> {
        Box::pin(async move {
            let def = self.registry.shared(kind)?;
            let mut entity = Entity::new(def.kind);
            self.build(ctx, def, payload, &mut entity, depth, &path).await?;

            if let (Some(platform), Some(platform_identifier)) =
                (&entity.platform, &entity.platform_identifier)
            {
                if let Some(existing) = ctx
                    .tx
                    .find_by_platform(def.kind, platform, platform_identifier)
                    .await?
                {
                    return Err(conflict(&entity, existing.identifier));
                }
            }

            let now = Utc::now();
            entity.date_created = Some(now);
            entity.date_modified = Some(now);
            let entity = ctx
                .tx
                .insert_entity(entity.clone())
                .await
                .map_err(|e| write_error(&entity, e))?;
            log::debug!(
                "inserted {} {:?} at depth {}",
                entity.kind,
                entity.identifier,
                depth
            );
            Ok(entity)
        })
    }

    /// Shape validation, platform check, linking and deserialization of one
    /// payload onto `entity`.
    pub async fn build(
        &self,
        ctx: &mut WriteContext,
        def: &ResourceDef,
        payload: Value,
        entity: &mut Entity,
        depth: usize,
        path: &str,
    ) -> ApiResult<()> {
        self.check_depth(depth, path)?;
        self.registry
            .shape(def.kind, Variant::Create)?
            .validate_nested(&payload, path)?;
        let Value::Object(mut payload) = payload else {
            return Err(ApiError::validation(path, "expected an object"));
        };
        self.check_platform(&payload, path)?;
        self.link(ctx, def, &mut payload, depth, path).await?;
        self.deserialize_into(ctx, def, &payload, entity, depth, path)
            .await
    }

    /// Foreign platforms must be configured and need a platform identifier;
    /// the local platform may omit it.
    fn check_platform(&self, payload: &Map<String, Value>, path: &str) -> ApiResult<()> {
        let has_identifier = payload
            .get("platform_identifier")
            .is_some_and(|v| !v.is_null());
        match payload.get("platform").and_then(Value::as_str) {
            Some(platform) if !self.settings.accepts_platform(platform) => {
                Err(ApiError::validation(
                    join(path, "platform"),
                    format!("platform '{platform}' is not configured"),
                ))
            }
            Some(platform) if !has_identifier && platform != self.settings.local_platform => {
                Err(ApiError::validation(
                    join(path, "platform_identifier"),
                    format!("field required for platform '{platform}'"),
                ))
            }
            None if has_identifier => Err(ApiError::validation(
                join(path, "platform"),
                "field required with a platform_identifier",
            )),
            _ => Ok(()),
        }
    }

    /// Pass 1: replace nested resource objects by identities, recursing into
    /// owned children.
    pub fn link<'a>(
        &'a self,
        ctx: &'a mut WriteContext,
        def: &'a ResourceDef,
        payload: &'a mut Map<String, Value>,
        depth: usize,
        path: &'a str,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            for (field, descriptor) in def.relationships.iter() {
                let field_path = join(path, field);
                match descriptor.deserializer() {
                    Some(Deserializer::FindByIdentifier { targets }) => {
                        let Some(value) = payload.get_mut(field) else {
                            continue;
                        };
                        match value {
                            Value::Array(items) => {
                                for (index, item) in items.iter_mut().enumerate() {
                                    let item_path = format!("{field_path}[{index}]");
                                    self.link_item(ctx, targets, item, depth, item_path).await?;
                                }
                            }
                            item => self.link_item(ctx, targets, item, depth, field_path).await?,
                        }
                    }
                    Some(Deserializer::Cast { kind }) => {
                        let Some(child_def) = self.registry.resource(kind) else {
                            continue;
                        };
                        let Some(Value::Array(items)) = payload.get_mut(field) else {
                            continue;
                        };
                        for (index, item) in items.iter_mut().enumerate() {
                            let item_path = format!("{field_path}[{index}]");
                            if let Value::Object(child) = item {
                                self.check_depth(depth + 1, &item_path)?;
                                self.link(ctx, child_def, child, depth + 1, &item_path)
                                    .await?;
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })
    }

    async fn link_item(
        &self,
        ctx: &mut WriteContext,
        targets: &[&'static str],
        item: &mut Value,
        depth: usize,
        path: String,
    ) -> ApiResult<()> {
        let Value::Object(object) = item else {
            return Ok(());
        };
        self.check_depth(depth + 1, &path)?;

        let platform = object
            .get("platform")
            .and_then(Value::as_str)
            .map(str::to_string);
        let local = platform
            .as_deref()
            .map_or(true, |p| p == self.settings.local_platform);
        if local {
            let identifier = object.get("identifier").and_then(Value::as_i64).ok_or_else(|| {
                ApiError::validation(
                    path.clone(),
                    "resources of this platform must be referenced by an existing identifier",
                )
            })?;
            *item = Value::from(identifier);
            return Ok(());
        }

        let mut object = object.clone();
        let kind = target_kind(targets, &mut object, &path)?;
        let platform = platform.unwrap_or_default();
        let platform_identifier = object
            .get("platform_identifier")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::validation(join(&path, "platform_identifier"), "field required")
            })?;
        // Identities are assigned here, never taken from another platform.
        object.remove("identifier");

        let existing = ctx
            .tx
            .find_by_platform(kind, &platform, &platform_identifier)
            .await?;
        let identifier = match existing {
            Some(found) => found.identifier,
            None => {
                log::info!(
                    "creating linked {} '{}' of platform '{}'",
                    kind,
                    platform_identifier,
                    platform
                );
                self.create_within(ctx, kind, Value::Object(object), depth + 1, path.clone())
                    .await?
                    .identifier
            }
        };
        let identifier = identifier.ok_or_else(|| {
            ApiError::Unexpected(anyhow::anyhow!("linked {kind} was stored without identity"))
        })?;
        *item = Value::from(identifier);
        Ok(())
    }
}

/// Kind a nested object stands in for. Fields with several target kinds need
/// an explicit `kind` tag, which is removed from the payload.
fn target_kind(
    targets: &[&'static str],
    object: &mut Map<String, Value>,
    path: &str,
) -> ApiResult<&'static str> {
    let tagged = object.remove("kind");
    match (targets, tagged) {
        ([only], None) => Ok(*only),
        (_, Some(Value::String(tag))) => targets
            .iter()
            .copied()
            .find(|t| *t == tag)
            .ok_or_else(|| {
                ApiError::validation(
                    join(path, "kind"),
                    format!("expected one of: {}", targets.join(", ")),
                )
            }),
        _ => Err(ApiError::validation(
            join(path, "kind"),
            format!("field required, one of: {}", targets.join(", ")),
        )),
    }
}

fn conflict(entity: &Entity, existing: Option<i64>) -> ApiError {
    ApiError::Conflict {
        kind: entity.kind.clone(),
        platform: entity.platform.clone().unwrap_or_default(),
        platform_identifier: entity.platform_identifier.clone().unwrap_or_default(),
        existing,
    }
}

/// Map a store failure of writing `entity` onto the error taxonomy.
pub fn write_error(entity: &Entity, error: StoreError) -> ApiError {
    match error {
        StoreError::UniqueViolation { constraint } => {
            log::warn!("{} write hit unique constraint {}", entity.kind, constraint);
            conflict(entity, None)
        }
        other => other.into(),
    }
}
