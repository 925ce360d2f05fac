//! Load a JSON-lines export into the catalog.
//!
//! Usage: `catalog-ingest <file.jsonl> [kind]`
//!
//! Without `kind`, every line must be `{"kind": ..., "payload": {...}}`.

use anyhow::{bail, Context, Result};
use catalog_db::config::{AppConfig, StoreKind};
use catalog_db::ingest::{self, JsonLinesFetcher};
use catalog_db::logic::CatalogService;
use catalog_db::model::Principal;
use catalog_db::store::{CatalogStore, MemoryStore, PostgresStore};
use env_logger::Builder;
use log::LevelFilter;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: catalog-ingest <file.jsonl> [kind]");
    };
    let kind = args.next();

    let config = AppConfig::load()?;
    match config.catalog.store {
        StoreKind::Postgres => {
            let database_url = config.database_url()?;
            let store = PostgresStore::new(
                &database_url,
                config.database.max_connections.unwrap_or(5),
            )
            .await?;
            store.migrate().await?;
            ingest_file(store, &config, &path, kind).await
        }
        // Only useful as a dry run: the data is gone when the process exits.
        StoreKind::Memory => ingest_file(MemoryStore::new(), &config, &path, kind).await,
    }
}

async fn ingest_file<S: CatalogStore>(
    store: S,
    config: &AppConfig,
    path: &str,
    kind: Option<String>,
) -> Result<()> {
    let service = CatalogService::new(
        Arc::new(store),
        Arc::new(catalog_db::catalog::registry()?),
        Arc::new(catalog_db::catalog::formats()),
        config.catalog.clone(),
    );
    let principal = Principal::new(
        "catalog-ingest",
        config.catalog.write_role.iter().cloned().collect(),
    );

    let mut fetcher = JsonLinesFetcher::open(path, kind).await?;
    let report = ingest::run(&service, &mut fetcher, &principal)
        .await
        .with_context(|| format!("Ingesting {path} failed"))?;

    println!(
        "{}: {} created, {} skipped, {} failed",
        path, report.created, report.skipped, report.failed
    );
    Ok(())
}
