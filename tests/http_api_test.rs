// The operational HTTP surface: delta intake, index management, health.

use std::sync::Arc;
use std::time::Duration;

use semsearch::testing::{bindings_of, terms, MemorySearchBackend, ScriptedTriplestore};
use semsearch::{
    create_app, AppState, DeltaProcessor, DocumentBuilder, IndexManager, SearchConfig,
    UpdateHandler,
};

const CONFIG: &str = r#"{
    "eager_indexing_groups": [[{"group": "public"}]],
    "types": [{
        "type": "document",
        "on_path": "documents",
        "rdf_type": "http://example.org/Foo",
        "properties": {
            "title": "http://purl.org/dc/terms/title"
        }
    }]
}"#;

async fn spawn_server() -> (String, ScriptedTriplestore, MemorySearchBackend) {
    let store = ScriptedTriplestore::new();
    store.respond(
        "COUNT(DISTINCT ?doc",
        bindings_of(vec![vec![("count", terms::integer(0))]]),
    );
    let backend = MemorySearchBackend::new();
    let config = Arc::new(SearchConfig::from_json_str(CONFIG).unwrap());
    let documents = Arc::new(DocumentBuilder::new(
        Arc::new(store.clone()),
        semsearch::testing::unused_attachments(),
    ));
    let manager = IndexManager::new(
        config.clone(),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        documents.clone(),
    );
    manager.initialize().await.unwrap();
    let updates = UpdateHandler::start(
        manager.clone(),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        documents,
        Duration::ZERO,
    );
    let deltas = DeltaProcessor::start(config, Arc::new(store.clone()), manager.clone(), updates.clone());
    let state = AppState {
        manager,
        deltas,
        updates,
    };

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_app(state)).await.unwrap();
    });
    (format!("http://{address}"), store, backend)
}

#[tokio::test]
async fn health_reports_up() {
    let (base, _store, _backend) = spawn_server().await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "up");
}

#[tokio::test]
async fn delta_intake_accepts_changesets() {
    let (base, _store, _backend) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/update"))
        .json(&serde_json::json!([{
            "inserts": [],
            "deletes": []
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn invalidation_reports_the_affected_indexes() {
    let (base, _store, _backend) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/indexes/invalidate?type=document"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["type"], "document");
    assert_eq!(list[0]["status"], "invalid");
}

#[tokio::test]
async fn malformed_group_headers_are_rejected() {
    let (base, _store, _backend) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/indexes/invalidate"))
        .header("mu-auth-allowed-groups", "not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn removal_empties_the_backend() {
    let (base, _store, backend) = spawn_server().await;
    assert_eq!(backend.index_count(), 1);
    let client = reqwest::Client::new();
    let response = client
        .delete(format!("{base}/indexes?type=document"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(backend.index_count(), 0);
}
