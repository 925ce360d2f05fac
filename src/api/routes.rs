use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::Value;
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::handlers::{self, AppState, CountQuery, ItemQuery, ListQuery};
use crate::error::ErrorResponse;
use crate::model::{Principal, Registry};
use crate::store::CatalogStore;

/// Routes of every routed kind in `registry`, plus the service endpoints.
pub fn create_router<S: CatalogStore>(registry: &Registry) -> Router<AppState<S>> {
    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // API Documentation
        .route("/docs", get(handlers::get_api_docs))
        .route("/docs/openapi.json", get(handlers::get_openapi_spec::<S>))
        .route("/platforms/", get(handlers::list_platforms::<S>));

    for def in registry.routed() {
        router = resource_routes::<S>(router, def.kind, def.plural);
    }

    router.layer(CatchPanicLayer::custom(handle_panic))
}

fn resource_routes<S: CatalogStore>(
    router: Router<AppState<S>>,
    kind: &'static str,
    plural: &'static str,
) -> Router<AppState<S>> {
    router
        .route(
            &format!("/{plural}/"),
            get(
                move |State(service): State<AppState<S>>,
                      params: Result<Query<ListQuery>, QueryRejection>| async move {
                    handlers::list_resources(service, kind, None, params).await
                },
            )
            .post(
                move |State(service): State<AppState<S>>,
                      principal: Principal,
                      payload: Result<Json<Value>, JsonRejection>| async move {
                    handlers::create_resource(service, kind, principal, payload).await
                },
            ),
        )
        .route(
            &format!("/{plural}/:identifier"),
            get(
                move |State(service): State<AppState<S>>,
                      Path(identifier): Path<String>,
                      params: Result<Query<ItemQuery>, QueryRejection>| async move {
                    handlers::get_resource(service, kind, None, identifier, params).await
                },
            )
            .put(
                move |State(service): State<AppState<S>>,
                      Path(identifier): Path<String>,
                      principal: Principal,
                      payload: Result<Json<Value>, JsonRejection>| async move {
                    handlers::update_resource(service, kind, identifier, principal, payload).await
                },
            )
            .delete(
                move |State(service): State<AppState<S>>,
                      Path(identifier): Path<String>,
                      principal: Principal| async move {
                    handlers::delete_resource(service, kind, identifier, principal).await
                },
            ),
        )
        // Platform-scoped lookups by platform_identifier
        .route(
            &format!("/platforms/:platform/{plural}/"),
            get(
                move |State(service): State<AppState<S>>,
                      Path(platform): Path<String>,
                      params: Result<Query<ListQuery>, QueryRejection>| async move {
                    handlers::list_resources(service, kind, Some(platform), params).await
                },
            ),
        )
        .route(
            &format!("/platforms/:platform/{plural}/:identifier"),
            get(
                move |State(service): State<AppState<S>>,
                      Path((platform, identifier)): Path<(String, String)>,
                      params: Result<Query<ItemQuery>, QueryRejection>| async move {
                    handlers::get_resource(service, kind, Some(platform), identifier, params).await
                },
            ),
        )
        .route(
            &format!("/counts/{plural}/"),
            get(
                move |State(service): State<AppState<S>>,
                      params: Result<Query<CountQuery>, QueryRejection>| async move {
                    handlers::count_resources(service, kind, params).await
                },
            ),
        )
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    log::error!("handler panicked: {}", detail);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Unexpected error while processing the request")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::store::MemoryStore;

    const WRITER: (&str, &str) = ("alice", "edit_aiod_resources");

    fn app() -> Router {
        crate::build_app(MemoryStore::new(), &AppConfig::default()).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        user: Option<(&str, &str)>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some((id, roles)) = user {
            request = request.header("x-user-id", id).header("x-user-roles", roles);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, plural: &str, body: Value) -> Value {
        let (status, created) = send(app, "POST", &format!("/{plural}/"), Some(body), Some(WRITER)).await;
        assert_eq!(status, StatusCode::OK, "create failed: {created}");
        created
    }

    #[tokio::test]
    async fn test_keywords_are_shared_and_survive_deletes() {
        let app = app();
        let first = create(
            &app,
            "datasets",
            json!({"name": "iris", "keywords": ["tabular", "botany", "tabular"]}),
        )
        .await;
        assert_eq!(first["keywords"], json!(["tabular", "botany"]));

        let second = create(&app, "datasets", json!({"name": "wine", "keywords": ["botany"]})).await;

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/datasets/{}", first["identifier"]),
            None,
            Some(WRITER),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, fetched) =
            send(&app, "GET", &format!("/datasets/{}", second["identifier"]), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["keywords"], json!(["botany"]));

        let third = create(&app, "datasets", json!({"name": "digits", "keywords": ["tabular"]})).await;
        assert_eq!(third["keywords"], json!(["tabular"]));
    }

    #[tokio::test]
    async fn test_created_resource_reads_back_unchanged() {
        let app = app();
        let created = create(
            &app,
            "datasets",
            json!({
                "name": "iris",
                "platform": "openml",
                "platform_identifier": "61",
                "license": "CC-BY-4.0",
                "distributions": [{
                    "content_url": "https://www.openml.org/data/download/61/iris.arff",
                    "checksums": [{"algorithm": "md5", "value": "ad484452702105cbf3d30f8deaba39a9"}]
                }]
            }),
        )
        .await;
        assert_eq!(created["license"], json!("CC-BY-4.0"));
        assert_eq!(created["platform"], json!("openml"));

        let (status, fetched) =
            send(&app, "GET", &format!("/datasets/{}", created["identifier"]), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, by_platform) =
            send(&app, "GET", "/platforms/openml/datasets/61", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(by_platform["identifier"], created["identifier"]);
    }

    #[tokio::test]
    async fn test_missing_references_are_reported_together() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/datasets/",
            Some(json!({"name": "iris", "citations": [103, 102, 103]})),
            Some(WRITER),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["details"]["missing"][0]["field"], json!("citations"));
        assert_eq!(body["details"]["missing"][0]["identifiers"], json!([102, 103]));

        let (_, listed) = send(&app, "GET", "/datasets/", None, None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_duplicate_platform_identifier_conflicts() {
        let app = app();
        let payload = json!({"name": "iris", "platform": "openml", "platform_identifier": "61"});
        let first = create(&app, "datasets", payload.clone()).await;

        let (status, body) = send(&app, "POST", "/datasets/", Some(payload), Some(WRITER)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["details"]["identifier"], first["identifier"]);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains(&format!("with identifier {}", first["identifier"])));
    }

    #[tokio::test]
    async fn test_pagination_past_the_end() {
        let app = app();
        for n in 0..5 {
            create(&app, "datasets", json!({"name": format!("set {n}")})).await;
        }

        let (_, page) = send(&app, "GET", "/datasets/?offset=3", None, None).await;
        let names: Vec<_> = page.as_array().unwrap().iter().map(|d| d["name"].clone()).collect();
        assert_eq!(names, vec![json!("set 3"), json!("set 4")]);

        let (status, page) = send(&app, "GET", "/datasets/?offset=10&limit=5", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page, json!([]));

        let (status, _) = send(&app, "GET", "/datasets/?offset=-1", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_schema_selector() {
        let app = app();
        let created = create(&app, "datasets", json!({"name": "iris"})).await;

        let (status, body) = send(&app, "GET", "/datasets/?schema=croissant", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"]["supported"], json!(["native", "dcat-ap"]));

        let (status, body) = send(
            &app,
            "GET",
            &format!("/datasets/{}?schema=dcat-ap", created["identifier"]),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["@graph"].is_array());

        let (status, _) = send(&app, "GET", "/organisations/?schema=dcat-ap", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_referenced_resource_cannot_be_deleted() {
        let app = app();
        let parent = create(&app, "organisations", json!({"name": "University"})).await;
        let child = create(
            &app,
            "organisations",
            json!({"name": "Faculty", "parent_organisation": parent["identifier"]}),
        )
        .await;
        assert_eq!(child["parent_organisation"], parent["identifier"]);

        let parent_uri = format!("/organisations/{}", parent["identifier"]);
        let (status, _) = send(&app, "DELETE", &parent_uri, None, Some(WRITER)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/organisations/{}", child["identifier"]),
            Some(json!({"name": "Faculty"})),
            Some(WRITER),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(updated.get("parent_organisation").is_none());
        assert_eq!(updated["identifier"], child["identifier"]);

        let (status, body) = send(&app, "DELETE", &parent_uri, None, Some(WRITER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"identifier": parent["identifier"], "deleted": true}));

        let (status, _) = send(&app, "GET", &parent_uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_writes_require_principal_and_role() {
        let app = app();
        let payload = json!({"name": "iris"});

        let (status, _) = send(&app, "POST", "/datasets/", Some(payload.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            send(&app, "POST", "/datasets/", Some(payload), Some(("bob", "viewer"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, "DELETE", "/datasets/1", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_counts_and_lookups() {
        let app = app();
        create(&app, "datasets", json!({"name": "iris", "platform": "openml", "platform_identifier": "61"})).await;
        create(&app, "datasets", json!({"name": "local"})).await;

        let (_, total) = send(&app, "GET", "/counts/datasets/", None, None).await;
        assert_eq!(total, json!(2));
        let (_, detailed) = send(&app, "GET", "/counts/datasets/?detailed=true", None, None).await;
        assert_eq!(detailed, json!({"aiod": 1, "openml": 1}));

        let (status, _) = send(&app, "GET", "/datasets/not-a-number", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, platforms) = send(&app, "GET", "/platforms/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(platforms.as_array().unwrap().contains(&json!("openml")));
    }

    #[tokio::test]
    async fn test_platform_listing_filters_before_paging() {
        let app = app();
        let mut local = Vec::new();
        for (name, platform) in [
            ("d1", Some("openml")),
            ("z1", Some("zenodo")),
            ("l1", None),
            ("d2", Some("openml")),
            ("l2", None),
            ("d3", Some("openml")),
        ] {
            let mut payload = json!({"name": name});
            if let Some(platform) = platform {
                payload["platform"] = json!(platform);
                payload["platform_identifier"] = json!(name);
            }
            let created = create(&app, "datasets", payload).await;
            if platform.is_none() {
                assert_eq!(created["platform"], json!("aiod"));
                local.push(created);
            }
        }
        let names = |page: &Value| -> Vec<Value> {
            page.as_array().unwrap().iter().map(|d| d["name"].clone()).collect()
        };

        let (status, page) = send(&app, "GET", "/platforms/openml/datasets/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&page), vec![json!("d1"), json!("d2"), json!("d3")]);

        let (_, page) =
            send(&app, "GET", "/platforms/openml/datasets/?offset=1&limit=1", None, None).await;
        assert_eq!(names(&page), vec![json!("d2")]);

        let (_, page) = send(&app, "GET", "/platforms/openml/datasets/?offset=3", None, None).await;
        assert_eq!(page, json!([]));

        // Resources created without a platform belong to the local one.
        let (_, page) = send(&app, "GET", "/platforms/aiod/datasets/", None, None).await;
        assert_eq!(names(&page), vec![json!("l1"), json!("l2")]);
        assert!(page.as_array().unwrap().iter().all(|d| d["platform"] == json!("aiod")));

        let (_, detailed) = send(&app, "GET", "/counts/datasets/?detailed=true", None, None).await;
        assert_eq!(detailed, json!({"aiod": 2, "openml": 3, "zenodo": 1}));

        let l1 = &local[0]["identifier"];
        let (status, fetched) =
            send(&app, "GET", &format!("/platforms/aiod/datasets/{l1}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, local[0]);

        let (status, _) =
            send(&app, "GET", &format!("/platforms/zenodo/datasets/{l1}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
