// Test Doubles
// Scripted in-memory implementations of the collaborator seams, used by the
// integration tests (and usable by downstream consumers for theirs). The
// triplestore fake answers queries by substring matching against registered
// responses; the search backend fake is a real in-memory document store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::attachments::{AttachmentPipeline, TextExtractor};
use crate::authorization::AllowedGroups;
use crate::search_backend::{BulkOp, SearchBackend};
use crate::sparql::{RdfTerm, SparqlBindings, SparqlConnection, Triplestore};

/// Term construction shorthands for scripted responses.
pub mod terms {
    use super::RdfTerm;

    pub fn uri(value: &str) -> RdfTerm {
        RdfTerm::Uri(value.to_string())
    }

    pub fn literal(value: &str) -> RdfTerm {
        RdfTerm::Literal {
            value: value.to_string(),
            lang: None,
        }
    }

    pub fn lang_literal(value: &str, lang: &str) -> RdfTerm {
        RdfTerm::Literal {
            value: value.to_string(),
            lang: Some(lang.to_string()),
        }
    }

    pub fn typed_literal(value: &str, datatype: &str) -> RdfTerm {
        RdfTerm::TypedLiteral {
            value: value.to_string(),
            datatype: datatype.to_string(),
        }
    }

    pub fn integer(value: i64) -> RdfTerm {
        typed_literal(
            &value.to_string(),
            "http://www.w3.org/2001/XMLSchema#integer",
        )
    }
}

/// Build a bindings set from rows of (variable, term) pairs.
pub fn bindings_of(rows: Vec<Vec<(&str, RdfTerm)>>) -> SparqlBindings {
    SparqlBindings {
        rows: rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(var, term)| (var.to_string(), term))
                    .collect::<HashMap<String, RdfTerm>>()
            })
            .collect(),
    }
}

/// A query the scripted triplestore received.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub sparql: String,
    /// `None` for sudo requests.
    pub groups: Option<AllowedGroups>,
}

/// Scripted triplestore: queries are answered by the most recently
/// registered response whose needle is a substring of the query text.
/// Unmatched queries return empty bindings; unmatched ASKs return false.
#[derive(Clone, Default)]
pub struct ScriptedTriplestore {
    responders: Arc<Mutex<Vec<(String, SparqlBindings)>>>,
    ask_responders: Arc<Mutex<Vec<(String, bool)>>>,
    queries: Arc<Mutex<Vec<RecordedQuery>>>,
    updates: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTriplestore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response; later registrations win over earlier ones.
    pub fn respond(&self, needle: &str, bindings: SparqlBindings) {
        self.responders.lock().insert(0, (needle.to_string(), bindings));
    }

    pub fn respond_ask(&self, needle: &str, answer: bool) {
        self.ask_responders
            .lock()
            .insert(0, (needle.to_string(), answer));
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().clone()
    }

    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().clone()
    }

    fn answer(&self, sparql: &str, groups: Option<&AllowedGroups>) -> SparqlBindings {
        self.queries.lock().push(RecordedQuery {
            sparql: sparql.to_string(),
            groups: groups.cloned(),
        });
        self.responders
            .lock()
            .iter()
            .find(|(needle, _)| sparql.contains(needle))
            .map(|(_, bindings)| bindings.clone())
            .unwrap_or_default()
    }

    fn answer_ask(&self, sparql: &str, groups: Option<&AllowedGroups>) -> bool {
        self.queries.lock().push(RecordedQuery {
            sparql: sparql.to_string(),
            groups: groups.cloned(),
        });
        self.ask_responders
            .lock()
            .iter()
            .find(|(needle, _)| sparql.contains(needle))
            .map(|(_, answer)| *answer)
            .unwrap_or(false)
    }
}

struct ScriptedConnection {
    store: ScriptedTriplestore,
    groups: AllowedGroups,
}

#[async_trait]
impl SparqlConnection for ScriptedConnection {
    async fn query(&self, sparql: &str) -> Result<SparqlBindings> {
        Ok(self.store.answer(sparql, Some(&self.groups)))
    }

    async fn ask(&self, sparql: &str) -> Result<bool> {
        Ok(self.store.answer_ask(sparql, Some(&self.groups)))
    }

    fn allowed_groups(&self) -> &AllowedGroups {
        &self.groups
    }
}

#[async_trait]
impl Triplestore for ScriptedTriplestore {
    async fn checkout(&self, groups: &AllowedGroups) -> Result<Box<dyn SparqlConnection>> {
        Ok(Box::new(ScriptedConnection {
            store: self.clone(),
            groups: groups.clone(),
        }))
    }

    async fn sudo_query(&self, sparql: &str) -> Result<SparqlBindings> {
        Ok(self.answer(sparql, None))
    }

    async fn sudo_update(&self, sparql: &str) -> Result<()> {
        self.updates.lock().push(sparql.to_string());
        Ok(())
    }

    async fn sudo_ask(&self, sparql: &str) -> Result<bool> {
        Ok(self.answer_ask(sparql, None))
    }
}

#[derive(Default, Clone)]
struct MemoryIndex {
    mappings: Option<Value>,
    settings: Option<Value>,
    documents: HashMap<String, Value>,
}

/// In-memory search backend.
#[derive(Clone, Default)]
pub struct MemorySearchBackend {
    indexes: Arc<DashMap<String, MemoryIndex>>,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn document(&self, name: &str, id: &str) -> Option<Value> {
        self.indexes
            .get(name)
            .and_then(|index| index.documents.get(id).cloned())
    }

    pub fn documents_of(&self, name: &str) -> Vec<(String, Value)> {
        self.indexes
            .get(name)
            .map(|index| {
                index
                    .documents
                    .iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mappings_of(&self, name: &str) -> Option<Value> {
        self.indexes.get(name).and_then(|index| index.mappings.clone())
    }
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn create_index(
        &self,
        name: &str,
        mappings: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<()> {
        self.indexes.insert(
            name.to_string(),
            MemoryIndex {
                mappings: mappings.cloned(),
                settings: settings.cloned(),
                documents: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.indexes.contains_key(name))
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.indexes.remove(name);
        Ok(())
    }

    async fn clear_index(&self, name: &str) -> Result<()> {
        if let Some(mut index) = self.indexes.get_mut(name) {
            index.documents.clear();
        }
        Ok(())
    }

    async fn refresh_index(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn upsert_document(&self, name: &str, id: &str, document: &Value) -> Result<()> {
        let mut index = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| anyhow!("no such index {name}"))?;
        index.documents.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn delete_document_by_uri(&self, name: &str, uri: &str) -> Result<()> {
        if let Some(mut index) = self.indexes.get_mut(name) {
            index
                .documents
                .retain(|_, doc| doc.get("uri").and_then(Value::as_str) != Some(uri));
        }
        Ok(())
    }

    async fn bulk(&self, name: &str, ops: Vec<BulkOp>) -> Result<()> {
        let mut index = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| anyhow!("no such index {name}"))?;
        for op in ops {
            match op {
                BulkOp::Index { id, document } => {
                    index.documents.insert(id, document);
                }
                BulkOp::Delete { id } => {
                    index.documents.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn search(&self, name: &str, _query: &Value) -> Result<Value> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| anyhow!("no such index {name}"))?;
        let hits: Vec<Value> = index
            .documents
            .iter()
            .map(|(id, doc)| json!({"_id": id, "_source": doc}))
            .collect();
        Ok(json!({
            "hits": {"total": {"value": hits.len()}, "hits": hits}
        }))
    }

    async fn count(&self, name: &str, _query: Option<&Value>) -> Result<u64> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| anyhow!("no such index {name}"))?;
        Ok(index.documents.len() as u64)
    }
}

/// Extractor returning a fixed text for every blob.
pub struct StaticExtractor {
    pub text: String,
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract_text(&self, _path: &Path, blob: &[u8]) -> Result<Option<String>> {
        if blob.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.text.clone()))
        }
    }
}

/// An attachment pipeline rooted in the system temp directory, for tests
/// that never touch attachment properties.
pub fn unused_attachments() -> Arc<AttachmentPipeline> {
    let base = std::env::temp_dir().join("semsearch-test-attachments");
    Arc::new(AttachmentPipeline::new(
        base.clone(),
        1024 * 1024,
        base.join("cache"),
        Arc::new(StaticExtractor {
            text: String::new(),
        }),
    ))
}
