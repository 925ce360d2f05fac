//! Write path of the serialization engine.
//!
//! Turns a validated create-shaped payload into an [`Entity`]. Plain
//! relationship fields (by-name, by-identifier, verbatim) of a payload are all
//! resolved before any owned child is deserialized, so an invalid reference
//! anywhere aborts the write before children are built.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::config::CatalogConfig;
use crate::error::{ApiError, ApiResult, MissingRelated};
use crate::logic::identity_cache::IdentityCache;
use crate::logic::serialize::is_empty_value;
use crate::model::{
    Cardinality, Deserializer, Entity, EntityId, Registry, Related, Relation,
    RelationshipDescriptor, ResourceDef,
};
use crate::store::Transaction;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// State of one write call chain: the request transaction and its identity
/// cache. Both are dropped together.
pub struct WriteContext {
    pub tx: Box<dyn Transaction>,
    pub cache: IdentityCache,
}

impl WriteContext {
    pub fn new(tx: Box<dyn Transaction>) -> Self {
        Self {
            tx,
            cache: IdentityCache::new(),
        }
    }
}

/// Registry-driven write operations shared by every resource kind.
#[derive(Clone, Copy)]
pub struct WriteEngine<'r> {
    pub registry: &'r Registry,
    pub settings: &'r CatalogConfig,
}

impl<'r> WriteEngine<'r> {
    pub fn new(registry: &'r Registry, settings: &'r CatalogConfig) -> Self {
        Self { registry, settings }
    }

    /// Fail with a validation error when `depth` exceeds the configured limit.
    pub fn check_depth(&self, depth: usize, path: &str) -> ApiResult<()> {
        if depth > self.settings.max_nesting_depth {
            return Err(ApiError::validation(
                display(path),
                format!(
                    "payload nests deeper than {} levels",
                    self.settings.max_nesting_depth
                ),
            ));
        }
        Ok(())
    }

    /// Copy the payload onto `entity`, resolving every relationship field.
    pub fn deserialize_into<'a>(
        &'a self,
        ctx: &'a mut WriteContext,
        def: &'a ResourceDef,
        payload: &'a Map<String, Value>,
        entity: &'a mut Entity,
        depth: usize,
        path: &'a str,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            self.check_depth(depth, path)?;

            if def.is_shared() {
                let platform_identifier = string_field(payload, "platform_identifier");
                // Native resources without a platform identifier are stored
                // without a platform.
                entity.platform = string_field(payload, "platform").filter(|platform| {
                    platform_identifier.is_some() || *platform != self.settings.local_platform
                });
                entity.platform_identifier = platform_identifier;
            }
            for property in &def.properties {
                if let Some(value) = payload.get(property.name).filter(|v| !v.is_null()) {
                    entity.fields.insert(property.name.to_string(), value.clone());
                }
            }

            let mut missing = Vec::new();
            for (field, descriptor) in def.relationships.iter() {
                let Some(value) = payload.get(field).filter(|v| !is_empty_value(v)) else {
                    continue;
                };
                let field_path = join(path, field);
                match descriptor.deserializer() {
                    None => {
                        entity.fields.insert(field.to_string(), value.clone());
                    }
                    Some(Deserializer::FindByName { vocabulary }) => {
                        self.by_name(ctx, entity, field, descriptor, vocabulary, value, &field_path)
                            .await?;
                    }
                    Some(Deserializer::FindByIdentifier { targets }) => {
                        if let Some(absent) = self
                            .by_identifier(ctx, entity, field, descriptor, targets, value, &field_path)
                            .await?
                        {
                            missing.push(absent);
                        }
                    }
                    Some(Deserializer::Cast { .. }) => {}
                }
            }
            if !missing.is_empty() {
                return Err(ApiError::RelatedNotFound(missing));
            }

            for (field, descriptor) in def.relationships.iter() {
                let Some(Deserializer::Cast { kind }) = descriptor.deserializer() else {
                    continue;
                };
                let Some(value) = payload.get(field).filter(|v| !is_empty_value(v)) else {
                    continue;
                };
                let child_def = self.registry.resource(kind).ok_or_else(|| {
                    ApiError::Unexpected(anyhow!("owned kind '{kind}' is not registered"))
                })?;
                let mut children = Vec::new();
                for (index, item) in as_items(value).into_iter().enumerate() {
                    let item_path = format!("{}[{}]", join(path, field), index);
                    let object = item.as_object().ok_or_else(|| {
                        ApiError::validation(item_path.clone(), "expected an object")
                    })?;
                    let mut child = Entity::new(*kind);
                    self.deserialize_into(ctx, child_def, object, &mut child, depth + 1, &item_path)
                        .await?;
                    children.push(Related::Owned(child));
                }
                entity
                    .relations
                    .insert(field.to_string(), Relation::Many(children));
            }
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn by_name(
        &self,
        ctx: &mut WriteContext,
        entity: &mut Entity,
        field: &str,
        descriptor: &RelationshipDescriptor,
        vocabulary: &str,
        value: &Value,
        path: &str,
    ) -> ApiResult<()> {
        let max_length = self
            .registry
            .vocabulary(vocabulary)
            .map(|v| v.max_length)
            .unwrap_or(usize::MAX);

        let mut resolved = Vec::new();
        for (index, item) in as_items(value).into_iter().enumerate() {
            let item_path = match descriptor.cardinality() {
                Cardinality::Single => path.to_string(),
                Cardinality::List => format!("{path}[{index}]"),
            };
            let name = item
                .as_str()
                .ok_or_else(|| ApiError::validation(item_path.clone(), "expected a name"))?;
            if name.chars().count() > max_length {
                return Err(ApiError::validation(
                    item_path,
                    format!("ensure this value has at most {max_length} characters"),
                ));
            }
            let named = ctx
                .cache
                .resolve_unique(ctx.tx.as_mut(), vocabulary, name, &item_path)
                .await?;
            resolved.push(named);
        }

        match descriptor {
            RelationshipDescriptor::ToOne(one) => {
                let named = resolved
                    .into_iter()
                    .next()
                    .ok_or_else(|| ApiError::validation(path, "expected a name"))?;
                if let Some(identifier_name) = one.identifier_name {
                    entity
                        .fields
                        .insert(identifier_name.to_string(), Value::from(named.identifier));
                }
                entity
                    .relations
                    .insert(field.to_string(), Relation::One(Related::Named(named)));
            }
            RelationshipDescriptor::ToMany(_) => {
                resolved.sort_by_key(|n| n.identifier);
                resolved.dedup_by_key(|n| n.identifier);
                entity.relations.insert(
                    field.to_string(),
                    Relation::Many(resolved.into_iter().map(Related::Named).collect()),
                );
            }
        }
        Ok(())
    }

    /// Attach existing resources. Returns the identities that do not exist as
    /// one of `targets` instead of failing, so the caller can report every
    /// field at once.
    #[allow(clippy::too_many_arguments)]
    async fn by_identifier(
        &self,
        ctx: &mut WriteContext,
        entity: &mut Entity,
        field: &str,
        descriptor: &RelationshipDescriptor,
        targets: &[&'static str],
        value: &Value,
        path: &str,
    ) -> ApiResult<Option<MissingRelated>> {
        let mut identifiers = Vec::new();
        for (index, item) in as_items(value).into_iter().enumerate() {
            let identifier = item.as_i64().ok_or_else(|| {
                ApiError::validation(format!("{path}[{index}]"), "expected an integer identifier")
            })?;
            identifiers.push(identifier);
        }

        let found = ctx.tx.resolve_refs(&identifiers).await?;
        let found: Vec<_> = found
            .into_iter()
            .filter(|r| targets.contains(&r.kind.as_str()))
            .collect();

        let absent: BTreeSet<EntityId> = identifiers
            .iter()
            .copied()
            .filter(|id| !found.iter().any(|r| r.identifier == *id))
            .collect();
        if !absent.is_empty() {
            return Ok(Some(MissingRelated {
                field: path.to_string(),
                kinds: targets.iter().map(|t| t.to_string()).collect(),
                identifiers: absent.into_iter().collect(),
            }));
        }

        match descriptor {
            RelationshipDescriptor::ToOne(one) => {
                let reference = found
                    .into_iter()
                    .next()
                    .ok_or_else(|| ApiError::validation(path, "expected an identifier"))?;
                if let Some(identifier_name) = one.identifier_name {
                    entity
                        .fields
                        .insert(identifier_name.to_string(), Value::from(reference.identifier));
                }
                entity
                    .relations
                    .insert(field.to_string(), Relation::One(Related::Resource(reference)));
            }
            RelationshipDescriptor::ToMany(_) => {
                let mut references = found;
                references.sort_by_key(|r| r.identifier);
                references.dedup_by_key(|r| r.identifier);
                entity.relations.insert(
                    field.to_string(),
                    Relation::Many(references.into_iter().map(Related::Resource).collect()),
                );
            }
        }
        Ok(None)
    }
}

/// A single value or the elements of a list.
pub fn as_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn string_field(payload: &Map<String, Value>, name: &str) -> Option<String> {
    payload.get(name).and_then(Value::as_str).map(str::to_string)
}

pub fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "body"
    } else {
        path
    }
}
