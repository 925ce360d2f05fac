use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgConnection, PgPool, Postgres, Row,
};

use crate::model::{
    Entity, EntityId, NamedEntity, Page, PlatformScope, Related, Relation, ResourceRef,
};
use crate::store::traits::{CatalogStore, StoreError, StoreResult, Transaction};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const ENTITY_COLUMNS: &str =
    "identifier, kind, platform, platform_identifier, fields, date_created, date_modified";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error(e, "Failed to begin transaction"))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

/// Constraint violations keep their constraint name; everything else is a
/// backend failure with context.
fn store_error(error: sqlx::Error, context: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        let constraint = db.constraint().unwrap_or_default().to_string();
        match db.code().as_deref() {
            Some("23505") => return StoreError::UniqueViolation { constraint },
            Some("23503") => return StoreError::ForeignKeyViolation { constraint },
            _ => {}
        }
    }
    StoreError::Backend(anyhow::Error::new(error).context(context))
}

fn entity_from_row(row: &PgRow) -> StoreResult<Entity> {
    let decode = |e| store_error(e, "Failed to decode entity row");
    let fields: Value = row.try_get("fields").map_err(decode)?;
    Ok(Entity {
        identifier: Some(row.try_get("identifier").map_err(decode)?),
        kind: row.try_get("kind").map_err(decode)?,
        platform: row.try_get("platform").map_err(decode)?,
        platform_identifier: row.try_get("platform_identifier").map_err(decode)?,
        fields: match fields {
            Value::Object(map) => map,
            _ => Default::default(),
        },
        relations: BTreeMap::new(),
        date_created: row.try_get("date_created").map_err(decode)?,
        date_modified: row.try_get("date_modified").map_err(decode)?,
    })
}

fn push(relations: &mut BTreeMap<String, Relation>, field: String, related: Related) {
    match relations
        .entry(field)
        .or_insert_with(|| Relation::Many(Vec::new()))
    {
        Relation::Many(items) => items.push(related),
        one => *one = Relation::Many(vec![related]),
    }
}

/// Rebuild an entity and its owned descendants from its row.
fn load_entity(conn: &mut PgConnection, row: PgRow) -> BoxFuture<'_, StoreResult<Entity>> {
    Box::pin(async move {
        let mut entity = entity_from_row(&row)?;
        let Some(identifier) = entity.identifier else {
            return Ok(entity);
        };

        let named = sqlx::query(
            "SELECT l.field, l.single, n.identifier, n.vocabulary, n.name
             FROM named_links l JOIN named_entities n ON n.identifier = l.named_identifier
             WHERE l.entity_identifier = $1 ORDER BY l.field, n.identifier",
        )
        .bind(identifier)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| store_error(e, "Failed to load named links"))?;
        for row in named {
            let decode = |e| store_error(e, "Failed to decode named link");
            let field: String = row.try_get("field").map_err(decode)?;
            let single: bool = row.try_get("single").map_err(decode)?;
            let related = Related::Named(NamedEntity {
                identifier: row.try_get("identifier").map_err(decode)?,
                vocabulary: row.try_get("vocabulary").map_err(decode)?,
                name: row.try_get("name").map_err(decode)?,
            });
            if single {
                entity.relations.insert(field, Relation::One(related));
            } else {
                push(&mut entity.relations, field, related);
            }
        }

        let refs = sqlx::query(
            "SELECT r.field, e.kind, e.identifier
             FROM resource_refs r JOIN entities e ON e.identifier = r.target_identifier
             WHERE r.entity_identifier = $1",
        )
        .bind(identifier)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| store_error(e, "Failed to load resource references"))?;
        for row in refs {
            let (field, reference) = reference_from_row(&row)?;
            entity
                .relations
                .insert(field, Relation::One(Related::Resource(reference)));
        }

        let links = sqlx::query(
            "SELECT l.field, e.kind, e.identifier
             FROM resource_links l JOIN entities e ON e.identifier = l.target_identifier
             WHERE l.entity_identifier = $1 ORDER BY l.field, l.position",
        )
        .bind(identifier)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| store_error(e, "Failed to load resource links"))?;
        for row in links {
            let (field, reference) = reference_from_row(&row)?;
            push(&mut entity.relations, field, Related::Resource(reference));
        }

        let children = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS}, owner_field FROM entities
             WHERE owner_identifier = $1 ORDER BY owner_field, position"
        ))
        .bind(identifier)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| store_error(e, "Failed to load owned children"))?;
        for row in children {
            let field: String = row
                .try_get("owner_field")
                .map_err(|e| store_error(e, "Failed to decode owned child"))?;
            let child = load_entity(&mut *conn, row).await?;
            push(&mut entity.relations, field, Related::Owned(child));
        }

        Ok(entity)
    })
}

fn reference_from_row(row: &PgRow) -> StoreResult<(String, ResourceRef)> {
    let decode = |e| store_error(e, "Failed to decode resource reference");
    let field: String = row.try_get("field").map_err(decode)?;
    let kind: String = row.try_get("kind").map_err(decode)?;
    let identifier: i64 = row.try_get("identifier").map_err(decode)?;
    Ok((field, ResourceRef::new(kind, identifier)))
}

/// Insert an entity row and everything hanging off it, assigning identities.
fn insert_tree<'a>(
    conn: &'a mut PgConnection,
    entity: &'a mut Entity,
    owner: Option<(EntityId, &'a str, i32)>,
) -> BoxFuture<'a, StoreResult<()>> {
    Box::pin(async move {
        let identifier: i64 = sqlx::query_scalar(
            "INSERT INTO entities
               (kind, owner_identifier, owner_field, position, platform, platform_identifier,
                fields, date_created, date_modified)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING identifier",
        )
        .bind(&entity.kind)
        .bind(owner.map(|(id, _, _)| id))
        .bind(owner.map(|(_, field, _)| field))
        .bind(owner.map(|(_, _, position)| position).unwrap_or(0))
        .bind(&entity.platform)
        .bind(&entity.platform_identifier)
        .bind(Value::Object(entity.fields.clone()))
        .bind(entity.date_created)
        .bind(entity.date_modified)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| store_error(e, "Failed to insert entity"))?;
        entity.identifier = Some(identifier);

        write_links(&mut *conn, identifier, &entity.relations).await?;
        insert_children(&mut *conn, identifier, entity).await
    })
}

async fn insert_children(
    conn: &mut PgConnection,
    identifier: EntityId,
    entity: &mut Entity,
) -> StoreResult<()> {
    for (field, relation) in entity.relations.iter_mut() {
        let items: Vec<&mut Related> = relation.items_mut().collect();
        for (position, related) in items.into_iter().enumerate() {
            if let Related::Owned(child) = related {
                child.identifier = None;
                let position = i32::try_from(position).unwrap_or(i32::MAX);
                insert_tree(&mut *conn, child, Some((identifier, field.as_str(), position))).await?;
            }
        }
    }
    Ok(())
}

async fn write_links(
    conn: &mut PgConnection,
    identifier: EntityId,
    relations: &BTreeMap<String, Relation>,
) -> StoreResult<()> {
    for (field, relation) in relations {
        let single = matches!(relation, Relation::One(_));
        let items: Vec<&Related> = relation.items().collect();
        for (position, related) in items.into_iter().enumerate() {
            let result = match related {
                Related::Named(named) => {
                    sqlx::query(
                        "INSERT INTO named_links (entity_identifier, field, named_identifier, single)
                         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
                    )
                    .bind(identifier)
                    .bind(field)
                    .bind(named.identifier)
                    .bind(single)
                    .execute(&mut *conn)
                    .await
                }
                Related::Resource(reference) if single => {
                    sqlx::query(
                        "INSERT INTO resource_refs (entity_identifier, field, target_identifier)
                         VALUES ($1, $2, $3)",
                    )
                    .bind(identifier)
                    .bind(field)
                    .bind(reference.identifier)
                    .execute(&mut *conn)
                    .await
                }
                Related::Resource(reference) => {
                    sqlx::query(
                        "INSERT INTO resource_links (entity_identifier, field, target_identifier, position)
                         VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
                    )
                    .bind(identifier)
                    .bind(field)
                    .bind(reference.identifier)
                    .bind(i32::try_from(position).unwrap_or(i32::MAX))
                    .execute(&mut *conn)
                    .await
                }
                Related::Owned(_) => continue,
            };
            result.map_err(|e| store_error(e, "Failed to write relation"))?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Transaction for PostgresTransaction {
    async fn get_entity(&mut self, identifier: EntityId) -> StoreResult<Option<Entity>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch entity"))?;

        match row {
            Some(row) => Ok(Some(load_entity(&mut self.tx, row).await?)),
            None => Ok(None),
        }
    }

    async fn resolve_refs(&mut self, identifiers: &[EntityId]) -> StoreResult<Vec<ResourceRef>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT identifier, kind FROM entities WHERE identifier = ANY($1)")
            .bind(identifiers.to_vec())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| store_error(e, "Failed to resolve references"))?;

        rows.iter()
            .map(|row| {
                let decode = |e| store_error(e, "Failed to decode reference");
                Ok(ResourceRef::new(
                    row.try_get::<String, _>("kind").map_err(decode)?,
                    row.try_get::<i64, _>("identifier").map_err(decode)?,
                ))
            })
            .collect()
    }

    async fn find_by_platform(
        &mut self,
        kind: &str,
        platform: &str,
        platform_identifier: &str,
    ) -> StoreResult<Option<Entity>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE kind = $1 AND platform = $2 AND platform_identifier = $3
               AND owner_identifier IS NULL"
        ))
        .bind(kind)
        .bind(platform)
        .bind(platform_identifier)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch entity by platform"))?;

        match row {
            Some(row) => Ok(Some(load_entity(&mut self.tx, row).await?)),
            None => Ok(None),
        }
    }

    async fn list_entities(
        &mut self,
        kind: &str,
        scope: Option<PlatformScope<'_>>,
        page: Page,
    ) -> StoreResult<Vec<Entity>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE kind = $1 AND owner_identifier IS NULL
               AND ($2::text IS NULL OR platform = $2 OR ($3 AND platform IS NULL))
             ORDER BY identifier OFFSET $4 LIMIT $5"
        ))
        .bind(kind)
        .bind(scope.map(|s| s.platform))
        .bind(scope.is_some_and(|s| s.includes_unset))
        .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to list entities"))?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            entities.push(load_entity(&mut self.tx, row).await?);
        }
        Ok(entities)
    }

    async fn count_entities(&mut self, kind: &str) -> StoreResult<BTreeMap<Option<String>, u64>> {
        let rows = sqlx::query(
            "SELECT platform, COUNT(*) AS n FROM entities
             WHERE kind = $1 AND owner_identifier IS NULL GROUP BY platform",
        )
        .bind(kind)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to count entities"))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let decode = |e| store_error(e, "Failed to decode count");
            let platform: Option<String> = row.try_get("platform").map_err(decode)?;
            let n: i64 = row.try_get("n").map_err(decode)?;
            counts.insert(platform, u64::try_from(n).unwrap_or_default());
        }
        Ok(counts)
    }

    async fn insert_entity(&mut self, mut entity: Entity) -> StoreResult<Entity> {
        insert_tree(&mut self.tx, &mut entity, None).await?;
        Ok(entity)
    }

    async fn update_entity(&mut self, mut entity: Entity) -> StoreResult<Entity> {
        let identifier = entity
            .identifier
            .ok_or_else(|| anyhow::anyhow!("cannot update an unsaved {}", entity.kind))?;

        let updated = sqlx::query(
            "UPDATE entities
             SET platform = $2, platform_identifier = $3, fields = $4, date_modified = $5
             WHERE identifier = $1 AND owner_identifier IS NULL",
        )
        .bind(identifier)
        .bind(&entity.platform)
        .bind(&entity.platform_identifier)
        .bind(Value::Object(entity.fields.clone()))
        .bind(entity.date_modified)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to update entity"))?;
        if updated.rows_affected() == 0 {
            return Err(anyhow::anyhow!("cannot update unknown {} {}", entity.kind, identifier).into());
        }

        // Relationships are replaced wholesale.
        for statement in [
            "DELETE FROM named_links WHERE entity_identifier = $1",
            "DELETE FROM resource_links WHERE entity_identifier = $1",
            "DELETE FROM resource_refs WHERE entity_identifier = $1",
            "DELETE FROM entities WHERE owner_identifier = $1",
        ] {
            sqlx::query(statement)
                .bind(identifier)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| store_error(e, "Failed to clear relations"))?;
        }
        write_links(&mut self.tx, identifier, &entity.relations).await?;
        insert_children(&mut self.tx, identifier, &mut entity).await?;
        Ok(entity)
    }

    async fn delete_entity(&mut self, identifier: EntityId) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM entities WHERE identifier = $1 AND owner_identifier IS NULL",
        )
        .bind(identifier)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to delete entity"))?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn find_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<Option<NamedEntity>> {
        let identifier: Option<i64> = sqlx::query_scalar(
            "SELECT identifier FROM named_entities WHERE vocabulary = $1 AND name = $2",
        )
        .bind(vocabulary)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to fetch named entity"))?;

        Ok(identifier.map(|identifier| NamedEntity {
            identifier,
            vocabulary: vocabulary.to_string(),
            name: name.to_string(),
        }))
    }

    async fn insert_named(&mut self, vocabulary: &str, name: &str) -> StoreResult<NamedEntity> {
        // DO NOTHING keeps the transaction usable when another writer won.
        let identifier: Option<i64> = sqlx::query_scalar(
            "INSERT INTO named_entities (vocabulary, name) VALUES ($1, $2)
             ON CONFLICT (vocabulary, name) DO NOTHING RETURNING identifier",
        )
        .bind(vocabulary)
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error(e, "Failed to insert named entity"))?;

        match identifier {
            Some(identifier) => Ok(NamedEntity {
                identifier,
                vocabulary: vocabulary.to_string(),
                name: name.to_string(),
            }),
            None => Err(StoreError::UniqueViolation {
                constraint: "named_entities_vocabulary_name_key".to_string(),
            }),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| store_error(e, "Failed to commit transaction"))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| store_error(e, "Failed to roll back transaction"))
    }
}
