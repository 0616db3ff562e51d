// Search Index Registry
// In-memory map of live indexes keyed by (type, canonical allowed groups),
// paired with their persisted form in the reserved metadata graph. The
// triplestore metadata is the source of truth for which indexes exist;
// the in-memory map is rebuilt from it on startup when persistence is on.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::authorization::{AllowedGroups, AuthorizationGroup};
use crate::index::SearchIndex;
use crate::sparql::{escape_string, Triplestore};

pub const METADATA_GRAPH: &str = "http://mu.semte.ch/authorization";
pub const SEARCH_NS: &str = "http://mu.semte.ch/vocabularies/authorization/";
pub const MU_CORE_NS: &str = "http://mu.semte.ch/vocabularies/core/";
pub const INDEX_URI_BASE: &str = "http://mu.semte.ch/authorization/elasticsearch-indexes/";

/// Mint the metadata IRI of a new index.
pub fn new_index_uri() -> (String, String) {
    let id = Uuid::new_v4().to_string();
    (format!("{INDEX_URI_BASE}{id}"), id)
}

/// Two-level map `type name → canonical allowed groups → index`.
/// Mutation happens under the Index Manager's master mutex.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: HashMap<String, HashMap<String, Arc<SearchIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: Arc<SearchIndex>) {
        self.indexes
            .entry(index.type_name.clone())
            .or_default()
            .insert(index.allowed_groups.cache_key(), index);
    }

    pub fn get(&self, type_name: &str, groups: &AllowedGroups) -> Option<Arc<SearchIndex>> {
        self.indexes
            .get(type_name)
            .and_then(|per_group| per_group.get(&groups.cache_key()))
            .cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<SearchIndex>> {
        self.indexes
            .values()
            .flat_map(HashMap::values)
            .find(|index| index.name == name)
            .cloned()
    }

    pub fn find_for_type(&self, type_name: &str) -> Vec<Arc<SearchIndex>> {
        self.indexes
            .get(type_name)
            .map(|per_group| per_group.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<SearchIndex>> {
        self.indexes
            .values()
            .flat_map(HashMap::values)
            .cloned()
            .collect()
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<SearchIndex>> {
        for per_group in self.indexes.values_mut() {
            if let Some(key) = per_group
                .iter()
                .find(|(_, index)| index.name == name)
                .map(|(key, _)| key.clone())
            {
                return per_group.remove(&key);
            }
        }
        None
    }

    pub fn remove(&mut self, type_name: &str, groups: &AllowedGroups) -> Option<Arc<SearchIndex>> {
        self.indexes
            .get_mut(type_name)
            .and_then(|per_group| per_group.remove(&groups.cache_key()))
    }
}

/// An index row loaded back from the metadata graph.
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub uri: String,
    pub name: String,
    pub type_name: String,
    pub allowed_groups: AllowedGroups,
    pub used_groups: AllowedGroups,
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", escape_string(value))
}

/// INSERT DATA statement persisting one index into the metadata graph.
pub fn metadata_insert_query(index: &SearchIndex, uuid: &str) -> String {
    let mut triples = vec![
        format!("a <{SEARCH_NS}ElasticsearchIndex>"),
        format!("<{MU_CORE_NS}uuid> {}", quoted(uuid)),
        format!("<{SEARCH_NS}objectType> {}", quoted(&index.type_name)),
        format!("<{SEARCH_NS}indexName> {}", quoted(&index.name)),
    ];
    for group in index.allowed_groups.iter() {
        triples.push(format!(
            "<{SEARCH_NS}hasAllowedGroup> {}",
            quoted(&group.to_json())
        ));
    }
    for group in index.used_groups.iter() {
        triples.push(format!(
            "<{SEARCH_NS}hasUsedGroup> {}",
            quoted(&group.to_json())
        ));
    }
    format!(
        "INSERT DATA {{ GRAPH <{METADATA_GRAPH}> {{ <{}> {} . }} }}",
        index.uri,
        triples.join(" ;\n      ")
    )
}

/// DELETE statement dropping every triple of one index entry.
pub fn metadata_delete_query(uri: &str) -> String {
    format!("DELETE WHERE {{ GRAPH <{METADATA_GRAPH}> {{ <{uri}> ?p ?o . }} }}")
}

/// DELETE statement dropping the entry carrying an index name, whatever its
/// IRI; used for the upsert path before re-inserting.
pub fn metadata_delete_by_name_query(name: &str) -> String {
    format!(
        "DELETE {{ GRAPH <{METADATA_GRAPH}> {{ ?index ?p ?o . }} }} \
         WHERE {{ GRAPH <{METADATA_GRAPH}> {{ \
         ?index <{SEARCH_NS}indexName> {} ; ?p ?o . }} }}",
        quoted(name)
    )
}

/// Replace the metadata entry of `index`.
pub async fn upsert_index_metadata(store: &dyn Triplestore, index: &SearchIndex) -> Result<()> {
    store
        .sudo_update(&metadata_delete_by_name_query(&index.name))
        .await?;
    let uuid = index
        .uri
        .strip_prefix(INDEX_URI_BASE)
        .unwrap_or(&index.name)
        .to_string();
    store
        .sudo_update(&metadata_insert_query(index, &uuid))
        .await?;
    Ok(())
}

/// Drop the metadata entry of one index IRI.
pub async fn remove_index_metadata(store: &dyn Triplestore, uri: &str) -> Result<()> {
    store.sudo_update(&metadata_delete_query(uri)).await
}

async fn load_groups(
    store: &dyn Triplestore,
    uri: &str,
    predicate: &str,
) -> Result<AllowedGroups> {
    let query =
        format!("SELECT ?group WHERE {{ GRAPH <{METADATA_GRAPH}> {{ <{uri}> <{predicate}> ?group . }} }}");
    let bindings = store.sudo_query(&query).await?;
    let mut groups = Vec::new();
    for term in bindings.values_of("group") {
        if let Ok(group) = serde_json::from_str::<AuthorizationGroup>(term.value()) {
            groups.push(group);
        }
    }
    Ok(AllowedGroups::new(groups))
}

/// Load every persisted index of one configured type.
pub async fn load_indexes_for_type(
    store: &dyn Triplestore,
    type_name: &str,
) -> Result<Vec<PersistedIndex>> {
    let query = format!(
        "SELECT ?index ?name WHERE {{ GRAPH <{METADATA_GRAPH}> {{ \
         ?index a <{SEARCH_NS}ElasticsearchIndex> ; \
         <{SEARCH_NS}objectType> {} ; \
         <{SEARCH_NS}indexName> ?name . }} }}",
        quoted(type_name)
    );
    let bindings = store.sudo_query(&query).await?;
    let mut loaded = Vec::new();
    for row in &bindings.rows {
        let (Some(index), Some(name)) = (row.get("index"), row.get("name")) else {
            continue;
        };
        let uri = index.value().to_string();
        let allowed_groups =
            load_groups(store, &uri, &format!("{SEARCH_NS}hasAllowedGroup")).await?;
        let used_groups = load_groups(store, &uri, &format!("{SEARCH_NS}hasUsedGroup")).await?;
        loaded.push(PersistedIndex {
            uri,
            name: name.value().to_string(),
            type_name: type_name.to_string(),
            allowed_groups,
            used_groups,
        });
    }
    Ok(loaded)
}

/// Every persisted index entry, for the non-persistent startup sweep.
pub async fn load_all_indexes(store: &dyn Triplestore) -> Result<Vec<(String, String)>> {
    let query = format!(
        "SELECT ?index ?name WHERE {{ GRAPH <{METADATA_GRAPH}> {{ \
         ?index a <{SEARCH_NS}ElasticsearchIndex> ; \
         <{SEARCH_NS}indexName> ?name . }} }}"
    );
    let bindings = store.sudo_query(&query).await?;
    Ok(bindings
        .rows
        .iter()
        .filter_map(|row| {
            Some((
                row.get("index")?.value().to_string(),
                row.get("name")?.value().to_string(),
            ))
        })
        .collect())
}
