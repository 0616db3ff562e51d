// End-to-end delta flow: change notifications through root resolution and
// the update queue, down to the documents in the search backend.

use std::sync::Arc;
use std::time::Duration;

use semsearch::testing::{bindings_of, terms, MemorySearchBackend, ScriptedTriplestore};
use semsearch::{
    AllowedGroups, Delta, DeltaProcessor, DocumentBuilder, IndexManager, SearchConfig,
    UpdateHandler,
};

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

struct Harness {
    store: ScriptedTriplestore,
    backend: MemorySearchBackend,
    deltas: Arc<DeltaProcessor>,
    updates: Arc<UpdateHandler>,
    index_name: String,
}

impl Harness {
    async fn drain(&self) {
        self.deltas.drain().await;
        self.updates.drain().await;
    }
}

async fn setup() -> Harness {
    let store = ScriptedTriplestore::new();
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

    let public = AllowedGroups::empty();
    let index = manager
        .ensure_index("document", &public, &public, false)
        .await
        .unwrap();

    let updates = UpdateHandler::start(
        manager.clone(),
        Arc::new(store.clone()),
        Arc::new(backend.clone()),
        documents,
        Duration::ZERO,
    );
    let deltas = DeltaProcessor::start(
        config,
        Arc::new(store.clone()),
        manager,
        updates.clone(),
    );

    Harness {
        store,
        backend,
        deltas,
        updates,
        index_name: index.name.clone(),
    }
}

fn delta(json: serde_json::Value) -> Delta {
    serde_json::from_value(json).unwrap()
}

fn script_resource(store: &ScriptedTriplestore, with_title: bool) {
    // Projection of ex:a. Registered first: root resolution queries also
    // mention the subject IRI and must win through their later, more
    // specific registration.
    let mut rows = vec![vec![
        ("s", terms::uri("http://mu.semte.ch/vocabularies/ext/uuid")),
        ("o", terms::literal("uuid-a")),
    ]];
    if with_title {
        rows.push(vec![
            ("s", terms::uri("http://mu.semte.ch/vocabularies/ext/title")),
            ("o", terms::literal("hello")),
        ]);
    }
    store.respond("<http://example.org/a>", bindings_of(rows));
    // The subject still carries the configured type
    store.respond_ask("ASK", true);
    // Root resolution under sudo finds ex:a
    store.respond(
        "SELECT DISTINCT ?s",
        bindings_of(vec![vec![("s", terms::uri("http://example.org/a"))]]),
    );
}

#[tokio::test]
async fn inserted_resources_become_searchable_documents() {
    let harness = setup().await;
    script_resource(&harness.store, true);

    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [
            {
                "subject": {"value": "http://example.org/a", "type": "uri"},
                "predicate": {"value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type", "type": "uri"},
                "object": {"value": "http://example.org/Foo", "type": "uri"}
            },
            {
                "subject": {"value": "http://example.org/a", "type": "uri"},
                "predicate": {"value": "http://purl.org/dc/terms/title", "type": "uri"},
                "object": {"value": "hello", "type": "literal"}
            }
        ],
        "deletes": []
    }])));
    harness.drain().await;

    let documents = harness.backend.documents_of(&harness.index_name);
    assert_eq!(documents.len(), 1);
    let (id, source) = &documents[0];
    assert_eq!(id, "uuid-a");
    assert_eq!(source["title"], "hello");
    assert_eq!(source["uri"], "http://example.org/a");
}

#[tokio::test]
async fn deleted_properties_are_rebuilt_away() {
    let harness = setup().await;
    script_resource(&harness.store, true);

    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [{
            "subject": {"value": "http://example.org/a", "type": "uri"},
            "predicate": {"value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type", "type": "uri"},
            "object": {"value": "http://example.org/Foo", "type": "uri"}
        }],
        "deletes": []
    }])));
    harness.drain().await;
    assert_eq!(
        harness.backend.document(&harness.index_name, "uuid-a").unwrap()["title"],
        "hello"
    );

    // The title triple disappears; the rebuilt document carries null
    script_resource(&harness.store, false);
    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [],
        "deletes": [{
            "subject": {"value": "http://example.org/a", "type": "uri"},
            "predicate": {"value": "http://purl.org/dc/terms/title", "type": "uri"},
            "object": {"value": "hello", "type": "literal"}
        }]
    }])));
    harness.drain().await;

    let source = harness
        .backend
        .document(&harness.index_name, "uuid-a")
        .unwrap();
    assert_eq!(source["title"], serde_json::Value::Null);
}

#[tokio::test]
async fn vanished_subjects_are_deleted_from_the_index() {
    let harness = setup().await;
    script_resource(&harness.store, true);

    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [{
            "subject": {"value": "http://example.org/a", "type": "uri"},
            "predicate": {"value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type", "type": "uri"},
            "object": {"value": "http://example.org/Foo", "type": "uri"}
        }],
        "deletes": []
    }])));
    harness.drain().await;
    assert_eq!(harness.backend.documents_of(&harness.index_name).len(), 1);

    // The resource loses its type; the ASK now fails
    harness.store.respond_ask("ASK", false);
    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [],
        "deletes": [{
            "subject": {"value": "http://example.org/a", "type": "uri"},
            "predicate": {"value": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type", "type": "uri"},
            "object": {"value": "http://example.org/Foo", "type": "uri"}
        }]
    }])));
    harness.drain().await;

    assert!(harness.backend.documents_of(&harness.index_name).is_empty());
}

#[tokio::test]
async fn unrelated_triples_produce_no_update_tasks() {
    let harness = setup().await;
    let queries_before = harness.store.queries().len();

    harness.deltas.submit(delta(serde_json::json!([{
        "inserts": [{
            "subject": {"value": "http://example.org/a", "type": "uri"},
            "predicate": {"value": "http://example.org/unrelated", "type": "uri"},
            "object": {"value": "noise", "type": "literal"}
        }],
        "deletes": []
    }])));
    harness.drain().await;

    assert_eq!(harness.updates.pending(), 0);
    assert!(harness.backend.documents_of(&harness.index_name).is_empty());
    // No root resolution was attempted
    assert_eq!(harness.store.queries().len(), queries_before);
}
