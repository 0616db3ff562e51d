// Keyed update queue behaviour: coalescing of repeated work on one subject
// and independent progress on distinct subjects.

use std::sync::Arc;
use std::time::Duration;

use semsearch::testing::{bindings_of, terms, MemorySearchBackend, ScriptedTriplestore};
use semsearch::{AllowedGroups, DocumentBuilder, IndexManager, SearchConfig, UpdateHandler};

const CONFIG: &str = r#"{
    "types": [{
        "type": "document",
        "on_path": "documents",
        "rdf_type": "http://example.org/Foo",
        "properties": {
            "title": "http://purl.org/dc/terms/title"
        }
    }]
}"#;

async fn setup(debounce: Duration) -> (ScriptedTriplestore, MemorySearchBackend, Arc<UpdateHandler>, String) {
    let store = ScriptedTriplestore::new();
    let backend = MemorySearchBackend::new();
    let config = Arc::new(SearchConfig::from_json_str(CONFIG).unwrap());
    let documents = Arc::new(DocumentBuilder::new(
        Arc::new(store.clone()),
        semsearch::testing::unused_attachments(),
    ));
    let manager = IndexManager::new(
        config,
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        documents.clone(),
    );
    let public = AllowedGroups::empty();
    let index = manager
        .ensure_index("document", &public, &public, false)
        .await
        .unwrap();
    let updates = UpdateHandler::start(
        manager,
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        documents,
        debounce,
    );
    (store, backend, updates, index.name.clone())
}

fn script_subject(store: &ScriptedTriplestore, uri: &str, uuid: &str, title: &str) {
    store.respond(
        &format!("<{uri}>"),
        bindings_of(vec![
            vec![
                ("s", terms::uri("http://mu.semte.ch/vocabularies/ext/uuid")),
                ("o", terms::literal(uuid)),
            ],
            vec![
                ("s", terms::uri("http://mu.semte.ch/vocabularies/ext/title")),
                ("o", terms::literal(title)),
            ],
        ]),
    );
    store.respond_ask(&format!("<{uri}>"), true);
}

#[tokio::test]
async fn repeated_enqueues_coalesce_into_one_round_trip() {
    let (store, backend, updates, index_name) = setup(Duration::from_millis(100)).await;
    script_subject(&store, "http://example.org/a", "uuid-a", "hello");

    for _ in 0..5 {
        updates.enqueue("http://example.org/a", "document");
    }
    updates.drain().await;

    assert_eq!(backend.documents_of(&index_name).len(), 1);
    // One ASK and one projection query: the five deltas collapsed into one task
    let projection_queries = store
        .queries()
        .iter()
        .filter(|q| q.sparql.starts_with("SELECT ?s ?o"))
        .count();
    assert_eq!(projection_queries, 1);
}

#[tokio::test]
async fn distinct_subjects_are_processed_independently() {
    let (store, backend, updates, index_name) = setup(Duration::ZERO).await;
    script_subject(&store, "http://example.org/a", "uuid-a", "first");
    script_subject(&store, "http://example.org/b", "uuid-b", "second");

    updates.enqueue("http://example.org/a", "document");
    updates.enqueue("http://example.org/b", "document");
    updates.drain().await;

    let documents = backend.documents_of(&index_name);
    assert_eq!(documents.len(), 2);
    assert_eq!(
        backend.document(&index_name, "uuid-a").unwrap()["title"],
        "first"
    );
    assert_eq!(
        backend.document(&index_name, "uuid-b").unwrap()["title"],
        "second"
    );
}

#[tokio::test]
async fn absent_subjects_are_removed_instead_of_rebuilt() {
    let (store, backend, updates, index_name) = setup(Duration::ZERO).await;
    script_subject(&store, "http://example.org/a", "uuid-a", "hello");

    updates.enqueue("http://example.org/a", "document");
    updates.drain().await;
    assert_eq!(backend.documents_of(&index_name).len(), 1);

    // Subject loses its type; the next task deletes the document
    store.respond_ask("<http://example.org/a>", false);
    updates.enqueue("http://example.org/a", "document");
    updates.drain().await;

    assert!(backend.documents_of(&index_name).is_empty());
}

#[tokio::test]
async fn unconfigured_types_are_dropped_quietly() {
    let (_store, backend, updates, index_name) = setup(Duration::ZERO).await;
    updates.enqueue("http://example.org/a", "nonexistent");
    updates.drain().await;
    assert!(backend.documents_of(&index_name).is_empty());
}
