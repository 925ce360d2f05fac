pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod formats;
pub mod ingest;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{ApiError, ApiResult};
pub use logic::CatalogService;
pub use model::*;
pub use store::{CatalogStore, MemoryStore, PostgresStore};

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::{AppConfig, StoreKind};

/// Router for the catalog's kinds over `store`, with state attached.
pub fn build_app<S: CatalogStore>(store: S, config: &AppConfig) -> anyhow::Result<Router> {
    let registry = Arc::new(catalog::registry()?);
    let service = CatalogService::new(
        Arc::new(store),
        registry.clone(),
        Arc::new(catalog::formats()),
        config.catalog.clone(),
    );
    Ok(api::routes::create_router::<S>(&registry).with_state(Arc::new(service)))
}

pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

/// Start the server described by `config`, connecting and migrating the
/// PostgreSQL store when it is selected.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let app = match config.catalog.store {
        StoreKind::Postgres => {
            let database_url = config.database_url()?;
            let store = PostgresStore::new(
                &database_url,
                config.database.max_connections.unwrap_or(20),
            )
            .await?;
            log::info!("Running database migrations...");
            store.migrate().await?;
            build_app(store, &config)?
        }
        StoreKind::Memory => {
            log::warn!("Using the in-memory store; nothing is persisted");
            build_app(MemoryStore::new(), &config)?
        }
    };

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Catalog server running on http://{}", bind_address);
    log::info!("API documentation available at http://{}/docs", bind_address);

    serve(listener, app).await
}
