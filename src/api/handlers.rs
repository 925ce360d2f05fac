use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::{Html, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::api::docs;
use crate::error::{ApiError, ApiResult};
use crate::logic::CatalogService;
use crate::model::Principal;
use crate::store::CatalogStore;

pub type AppState<S> = Arc<CatalogService<S>>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    /// Output format selector, `native` when absent.
    pub schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CountQuery {
    pub detailed: Option<bool>,
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query
        .map(|Query(q)| q)
        .map_err(|rejection| ApiError::validation("query", rejection.body_text()))
}

fn body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::validation("body", rejection.body_text()))
}

pub async fn list_resources<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    platform: Option<String>,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Value>>> {
    let params = query(params)?;
    let page = service.page(params.offset, params.limit);
    let items = service
        .list(kind, platform.as_deref(), page, params.schema.as_deref())
        .await?;
    Ok(Json(items))
}

pub async fn get_resource<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    platform: Option<String>,
    identifier: String,
    params: Result<Query<ItemQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let params = query(params)?;
    let item = service
        .get(kind, &identifier, platform.as_deref(), params.schema.as_deref())
        .await?;
    Ok(Json(item))
}

pub async fn create_resource<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    principal: Principal,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let payload = body(payload)?;
    Ok(Json(service.create(kind, payload, &principal).await?))
}

pub async fn update_resource<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    identifier: String,
    principal: Principal,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let payload = body(payload)?;
    Ok(Json(
        service.update(kind, &identifier, payload, &principal).await?,
    ))
}

pub async fn delete_resource<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    identifier: String,
    principal: Principal,
) -> ApiResult<Json<Value>> {
    Ok(Json(service.delete(kind, &identifier, &principal).await?))
}

pub async fn count_resources<S: CatalogStore>(
    service: AppState<S>,
    kind: &'static str,
    params: Result<Query<CountQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let params = query(params)?;
    Ok(Json(
        service
            .count(kind, params.detailed.unwrap_or(false))
            .await?,
    ))
}

pub async fn list_platforms<S: CatalogStore>(
    State(service): State<AppState<S>>,
) -> Json<Vec<String>> {
    Json(service.platforms())
}

pub async fn get_openapi_spec<S: CatalogStore>(
    State(service): State<AppState<S>>,
) -> ApiResult<Json<Value>> {
    Ok(Json(docs::openapi(service.registry(), service.formats())?))
}

pub async fn get_api_docs() -> Html<String> {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Catalog API Documentation</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui.css" />
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({
                url: '/docs/openapi.json',
                dom_id: '#swagger-ui',
                deepLinking: true,
            });
        };
    </script>
</body>
</html>
"#;
    Html(html.to_string())
}
