//! Per-transaction identity cache for named entities.
//!
//! A cache value lives exactly as long as one write call chain: it is created
//! next to the transaction, passed down by `&mut`, and dropped with it. It is
//! never stored anywhere shared, so "new but uncommitted" rows cannot leak
//! into another request.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};
use crate::model::NamedEntity;
use crate::store::{StoreError, Transaction};

/// Attempts before a repeatedly lost insert race is reported as unexpected.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<(String, String), NamedEntity>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find or create the named entity of `vocabulary` whose natural key is `name`.
    ///
    /// Within one transaction equal keys always yield the same row. A lost
    /// insert race against another transaction is retried as a lookup.
    pub async fn resolve_unique(
        &mut self,
        tx: &mut dyn Transaction,
        vocabulary: &str,
        name: &str,
        field: &str,
    ) -> ApiResult<NamedEntity> {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidKey {
                vocabulary: vocabulary.to_string(),
                field: field.to_string(),
            });
        }

        let key = (vocabulary.to_string(), natural_key_hash(&[name]));
        if let Some(cached) = self.entries.get(&key) {
            return Ok(cached.clone());
        }

        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(existing) = tx.find_named(vocabulary, name).await? {
                self.entries.insert(key, existing.clone());
                return Ok(existing);
            }
            match tx.insert_named(vocabulary, name).await {
                Ok(created) => {
                    log::debug!("created {} '{}' ({})", vocabulary, name, created.identifier);
                    self.entries.insert(key, created.clone());
                    return Ok(created);
                }
                Err(StoreError::UniqueViolation { constraint }) => {
                    log::debug!(
                        "lost insert race for {} '{}' on {} (attempt {})",
                        vocabulary,
                        name,
                        constraint,
                        attempt
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ApiError::Unexpected(anyhow::anyhow!(
            "could not resolve {} '{}' after {} attempts",
            vocabulary,
            name,
            MAX_ATTEMPTS
        )))
    }
}

/// Hex SHA-256 over the natural-key fields, separated by a unit separator.
pub fn natural_key_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityId, Page, PlatformScope, ResourceRef};
    use crate::store::{CatalogStore, MemoryStore, StoreResult};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_equal_keys_converge_within_transaction() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut cache = IdentityCache::new();

        let first = cache
            .resolve_unique(tx.as_mut(), "keyword", "x", "keywords[0]")
            .await
            .unwrap();
        let second = cache
            .resolve_unique(tx.as_mut(), "keyword", "x", "keywords[1]")
            .await
            .unwrap();
        let other = cache
            .resolve_unique(tx.as_mut(), "license", "x", "license")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first.identifier, other.identifier);
        assert_eq!(cache.len(), 2);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_key_rejected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut cache = IdentityCache::new();
        let err = cache
            .resolve_unique(tx.as_mut(), "keyword", "  ", "keywords[2]")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidKey { ref field, .. } if field == "keywords[2]"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_separates_fields() {
        assert_ne!(natural_key_hash(&["ab", "c"]), natural_key_hash(&["a", "bc"]));
        assert_eq!(natural_key_hash(&["x"]).len(), 64);
    }

    /// Transaction whose first insert loses a race: another writer commits
    /// the same name just before.
    struct RacingTx {
        committed_by_other: Option<NamedEntity>,
        lookups: usize,
    }

    #[async_trait::async_trait]
    impl Transaction for RacingTx {
        async fn get_entity(&mut self, _: EntityId) -> StoreResult<Option<Entity>> {
            Ok(None)
        }
        async fn resolve_refs(&mut self, _: &[EntityId]) -> StoreResult<Vec<ResourceRef>> {
            Ok(vec![])
        }
        async fn find_by_platform(&mut self, _: &str, _: &str, _: &str) -> StoreResult<Option<Entity>> {
            Ok(None)
        }
        async fn list_entities(&mut self, _: &str, _: Option<PlatformScope<'_>>, _: Page) -> StoreResult<Vec<Entity>> {
            Ok(vec![])
        }
        async fn count_entities(&mut self, _: &str) -> StoreResult<BTreeMap<Option<String>, u64>> {
            Ok(BTreeMap::new())
        }
        async fn insert_entity(&mut self, entity: Entity) -> StoreResult<Entity> {
            Ok(entity)
        }
        async fn update_entity(&mut self, entity: Entity) -> StoreResult<Entity> {
            Ok(entity)
        }
        async fn delete_entity(&mut self, _: EntityId) -> StoreResult<bool> {
            Ok(false)
        }
        async fn find_named(&mut self, _: &str, _: &str) -> StoreResult<Option<NamedEntity>> {
            self.lookups += 1;
            // Invisible on the first lookup, visible once the other writer committed.
            Ok(if self.lookups > 1 {
                self.committed_by_other.clone()
            } else {
                None
            })
        }
        async fn insert_named(&mut self, _: &str, _: &str) -> StoreResult<NamedEntity> {
            Err(StoreError::UniqueViolation {
                constraint: "named_entities_vocabulary_name_key".to_string(),
            })
        }
        async fn commit(self: Box<Self>) -> StoreResult<()> {
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lost_race_retried_as_lookup() {
        let winner = NamedEntity {
            identifier: 7,
            vocabulary: "keyword".to_string(),
            name: "x".to_string(),
        };
        let mut tx = RacingTx {
            committed_by_other: Some(winner.clone()),
            lookups: 0,
        };
        let mut cache = IdentityCache::new();
        let resolved = cache
            .resolve_unique(&mut tx, "keyword", "x", "keywords[0]")
            .await
            .unwrap();
        assert_eq!(resolved, winner);
        assert_eq!(tx.lookups, 2);
    }

    #[tokio::test]
    async fn test_persistent_race_is_unexpected() {
        let mut tx = RacingTx {
            committed_by_other: None,
            lookups: 0,
        };
        let mut cache = IdentityCache::new();
        let err = cache
            .resolve_unique(&mut tx, "keyword", "x", "keywords[0]")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unexpected(_)));
        assert_eq!(tx.lookups, MAX_ATTEMPTS);
    }
}
