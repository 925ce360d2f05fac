use catalog_db::config::AppConfig;
use catalog_db::store::MemoryStore;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn writer(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-user-id", "curator")
            .header("x-user-roles", "edit_aiod_resources")
    }

    async fn post(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.writer(self.client.post(format!("{}{}", self.base_url, path)))
            .json(&json)
            .send()
            .await
    }

    async fn put(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.writer(self.client.put(format!("{}{}", self.base_url, path)))
            .json(&json)
            .send()
            .await
    }

    async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.writer(self.client.delete(format!("{}{}", self.base_url, path)))
            .send()
            .await
    }
}

/// Serve a fresh in-memory catalog on an ephemeral port.
async fn spawn_server() -> TestClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = catalog_db::build_app(MemoryStore::new(), &AppConfig::default()).unwrap();
    tokio::spawn(catalog_db::serve(listener, app));
    TestClient::new(format!("http://{address}"))
}

#[tokio::test]
async fn test_catalog_complete_workflow() {
    let client = spawn_server().await;

    // Service endpoints
    let health = client.get("/health").await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let document: Value = client.get("/docs/openapi.json").await.unwrap().json().await.unwrap();
    assert!(document["paths"]["/datasets/"].is_object());

    // A dataset citing a publication from another platform creates it on the fly
    let response = client
        .post(
            "/datasets/",
            json!({
                "name": "iris",
                "platform": "openml",
                "platform_identifier": "61",
                "keywords": ["botany"],
                "citations": [{
                    "platform": "zenodo",
                    "platform_identifier": "zenodo.1234",
                    "title": "The use of multiple measurements in taxonomic problems",
                    "keywords": ["botany", "statistics"]
                }]
            }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let iris: Value = response.json().await.unwrap();
    let citation = iris["citations"][0].clone();
    assert!(citation.is_i64());

    let publication: Value = client
        .get("/platforms/zenodo/publications/zenodo.1234")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(publication["identifier"], citation);
    assert_eq!(publication["keywords"], json!(["botany", "statistics"]));

    // The second reference to the same foreign publication reuses it
    let wine: Value = client
        .post(
            "/datasets/",
            json!({
                "name": "wine",
                "citations": [{"platform": "zenodo", "platform_identifier": "zenodo.1234", "title": "ignored"}]
            }),
        )
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(wine["citations"], json!([citation]));
    let count: Value = client.get("/counts/publications/").await.unwrap().json().await.unwrap();
    assert_eq!(count, json!(1));

    // Local references must name an existing identity
    let response = client
        .post("/datasets/", json!({"name": "bad", "citations": [{"platform": "aiod"}]}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Replacing a dataset keeps its identity and creation date
    let iris_path = format!("/datasets/{}", iris["identifier"]);
    let replaced: Value = client
        .put(
            &iris_path,
            json!({
                "name": "iris (revised)",
                "platform": "openml",
                "platform_identifier": "61",
                "keywords": ["botany"],
                "citations": [citation]
            }),
        )
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(replaced["identifier"], iris["identifier"]);
    assert_eq!(replaced["name"], json!("iris (revised)"));
    assert_eq!(replaced["aiod_entry"]["date_created"], iris["aiod_entry"]["date_created"]);

    // Deleting the publication drops it from citation lists
    let response = client
        .delete(&format!("/publications/{citation}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let iris_after: Value = client.get(&iris_path).await.unwrap().json().await.unwrap();
    assert!(iris_after.get("citations").is_none());

    let response = client.get(&format!("/publications/{citation}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
