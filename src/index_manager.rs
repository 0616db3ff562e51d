// Index Manager
// The coordination point of the indexing control plane. Owns the registry
// behind the master mutex, drives index lifecycle (ensure, update,
// invalidate, remove), and synthesises the additive index combinations that
// cover a caller's allowed groups. Public operations never propagate
// per-index failures; a failed index is returned with status `Invalid`.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::authorization::{index_name, AllowedGroups};
use crate::config::{IndexDefinition, SearchConfig};
use crate::document_builder::DocumentBuilder;
use crate::index::{IndexStatus, SearchIndex};
use crate::index_builder::IndexBuilder;
use crate::observability::component;
use crate::registry::{self, IndexRegistry};
use crate::search_backend::SearchBackend;
use crate::sparql::Triplestore;

/// The configured index mapping merged with the forced `uuid` and `uri`
/// keyword fields every document carries.
pub fn index_mappings(definition: &IndexDefinition) -> Value {
    let mut mappings = match &definition.mappings {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    let mut properties = match mappings.remove("properties") {
        Some(Value::Object(p)) => p,
        _ => Map::new(),
    };
    properties.insert("uuid".to_string(), json!({"type": "keyword"}));
    properties.insert("uri".to_string(), json!({"type": "keyword"}));
    mappings.insert("properties".to_string(), Value::Object(properties));
    Value::Object(mappings)
}

pub struct IndexManager {
    config: Arc<SearchConfig>,
    store: Arc<dyn Triplestore>,
    backend: Arc<dyn SearchBackend>,
    builder: IndexBuilder,
    /// Master mutex: serialises every mutation of the registry map.
    registry: Mutex<IndexRegistry>,
}

impl IndexManager {
    pub fn new(
        config: Arc<SearchConfig>,
        store: Arc<dyn Triplestore>,
        backend: Arc<dyn SearchBackend>,
        documents: Arc<DocumentBuilder>,
    ) -> Arc<Self> {
        let builder = IndexBuilder::new(
            config.clone(),
            store.clone(),
            backend.clone(),
            documents,
        );
        Arc::new(Self {
            config,
            store,
            backend,
            builder,
            registry: Mutex::new(IndexRegistry::new()),
        })
    }

    pub fn config(&self) -> &Arc<SearchConfig> {
        &self.config
    }

    /// Startup reconciliation: restore or purge persisted indexes, then
    /// pre-create every eager (group tuple × type) index. The eager phase
    /// deliberately runs serially before any traffic is accepted.
    pub async fn initialize(&self) -> Result<()> {
        if self.config.persist_indexes {
            for type_name in self.config.type_names() {
                let loaded =
                    registry::load_indexes_for_type(self.store.as_ref(), type_name).await?;
                let mut registry = self.registry.lock().await;
                for persisted in loaded {
                    let is_eager = self
                        .config
                        .eager_indexing_groups
                        .contains(&persisted.allowed_groups);
                    // Tentatively valid; the backend existence check in
                    // ensure corrects indexes whose backing store vanished.
                    registry.insert(Arc::new(SearchIndex::new(
                        persisted.uri,
                        persisted.name,
                        persisted.type_name,
                        persisted.allowed_groups,
                        persisted.used_groups,
                        is_eager,
                        IndexStatus::Valid,
                    )));
                }
            }
            info!(
                component = component::INDEX_MGMT,
                count = self.registry.lock().await.all().len(),
                "restored persisted indexes"
            );
        } else {
            let persisted = registry::load_all_indexes(self.store.as_ref()).await?;
            for (uri, name) in persisted {
                if let Err(e) = self.backend.delete_index(&name).await {
                    warn!(
                        component = component::INDEX_MGMT,
                        index = %name,
                        error = %e,
                        "failed to delete stale backend index"
                    );
                }
                registry::remove_index_metadata(self.store.as_ref(), &uri).await?;
            }
        }

        for groups in self.config.eager_indexing_groups.clone() {
            for type_name in self.config.type_names() {
                match self.ensure_index(type_name, &groups, &groups, true).await {
                    Ok(index) => {
                        if index.status() == IndexStatus::Invalid {
                            if let Err(e) = self.update_index(&index).await {
                                warn!(
                                    component = component::INDEX_MGMT,
                                    index = %index.name,
                                    error = %e,
                                    "eager index build failed"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            component = component::INDEX_MGMT,
                            type_name,
                            error = %e,
                            "eager index setup failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Ensure the index of `(type_name, allowed)` exists in the registry,
    /// the metadata graph, and the search backend. Metadata is written
    /// before backend creation.
    pub async fn ensure_index(
        &self,
        type_name: &str,
        allowed: &AllowedGroups,
        used: &AllowedGroups,
        is_eager: bool,
    ) -> Result<Arc<SearchIndex>> {
        let definition = self
            .config
            .get_type(type_name)
            .with_context(|| format!("unknown index type \"{type_name}\""))?
            .clone();
        let name = index_name(type_name, allowed);

        let index = {
            let mut registry = self.registry.lock().await;
            match registry.get(type_name, allowed) {
                Some(existing) => existing,
                None => {
                    let (uri, _) = registry::new_index_uri();
                    let index = Arc::new(SearchIndex::new(
                        uri,
                        name.clone(),
                        type_name.to_string(),
                        allowed.clone(),
                        used.clone(),
                        is_eager,
                        IndexStatus::Invalid,
                    ));
                    registry.insert(index.clone());
                    index
                }
            }
        };

        registry::upsert_index_metadata(self.store.as_ref(), &index).await?;

        if !self.backend.index_exists(&name).await? {
            let settings = definition
                .settings
                .as_ref()
                .or(self.config.default_settings.as_ref());
            self.backend
                .create_index(&name, Some(&index_mappings(&definition)), settings)
                .await?;
            index.transition(IndexStatus::Invalid);
            info!(
                component = component::INDEX_MGMT,
                index = %name,
                type_name,
                "created backend index"
            );
        }

        Ok(index)
    }

    /// The index set answering one caller. Eager indexes whose groups are a
    /// subset of the caller's are reduced to a minimal cover; when they do
    /// not cover the caller, a single exact-match index is synthesised.
    async fn indexes_for_caller(
        &self,
        type_name: &str,
        groups: &AllowedGroups,
    ) -> Vec<Arc<SearchIndex>> {
        let eligible: Vec<Arc<SearchIndex>> = {
            let registry = self.registry.lock().await;
            registry
                .find_for_type(type_name)
                .into_iter()
                .filter(|index| {
                    index.is_eager
                        && index.status() != IndexStatus::Deleted
                        && index.allowed_groups.is_subset_of(groups)
                })
                .collect()
        };

        // Minimal cover: drop any index strictly contained in another
        // retained index.
        let minimal: Vec<Arc<SearchIndex>> = eligible
            .iter()
            .filter(|index| {
                !eligible.iter().any(|other| {
                    !Arc::ptr_eq(index, other)
                        && index
                            .allowed_groups
                            .is_strict_subset_of(&other.allowed_groups)
                })
            })
            .cloned()
            .collect();

        let covered = !minimal.is_empty()
            && groups.covered_by(minimal.iter().map(|index| &index.allowed_groups));
        if covered {
            return minimal;
        }

        match self.ensure_index(type_name, groups, groups, false).await {
            Ok(index) => vec![index],
            Err(e) => {
                error!(
                    component = component::INDEX_MGMT,
                    type_name,
                    error = %e,
                    "failed to ensure exact-match index"
                );
                Vec::new()
            }
        }
    }

    /// Select or synthesise the indexes serving a request, updating invalid
    /// ones along the way. Never fails: stale indexes are returned with a
    /// warning so searches proceed on old data.
    pub async fn fetch_indexes(
        &self,
        type_name: Option<&str>,
        allowed: Option<&AllowedGroups>,
        force_update: bool,
    ) -> Vec<Arc<SearchIndex>> {
        let selected: Vec<String> = match type_name {
            Some(t) => vec![t.to_string()],
            None => self.config.type_names().map(str::to_string).collect(),
        };

        let mut result: Vec<Arc<SearchIndex>> = Vec::new();
        match allowed {
            None => {
                // Privileged management path: every authorization variant.
                let registry = self.registry.lock().await;
                for t in &selected {
                    result.extend(registry.find_for_type(t));
                }
            }
            Some(groups) => {
                let groups = groups.without(&self.config.ignored_allowed_groups);
                for t in &selected {
                    result.extend(self.indexes_for_caller(t, &groups).await);
                }
            }
        }

        if force_update {
            for index in &result {
                index.transition(IndexStatus::Invalid);
            }
        }

        for index in &result {
            if index.status() == IndexStatus::Invalid {
                if let Err(e) = self.update_index(index).await {
                    warn!(
                        component = component::INDEX_MGMT,
                        index = %index.name,
                        error = %e,
                        "index update failed"
                    );
                }
            }
        }

        if result
            .iter()
            .any(|index| index.status() == IndexStatus::Invalid)
        {
            warn!(
                component = component::INDEX_MGMT,
                "returning indexes that are still invalid; searches will see stale data"
            );
        }

        result
    }

    /// Rebuild one index under its write lock:
    /// `→ updating → {valid, invalid}`.
    pub async fn update_index(&self, index: &Arc<SearchIndex>) -> Result<()> {
        let definition = self
            .config
            .get_type(&index.type_name)
            .with_context(|| format!("unknown index type \"{}\"", index.type_name))?
            .clone();

        let _guard = index.write_lock().lock().await;
        if index.status() == IndexStatus::Deleted {
            return Ok(());
        }
        index.transition(IndexStatus::Updating);

        let rebuild = async {
            self.backend.clear_index(&index.name).await?;
            let written = self.builder.build_index(index, &definition).await?;
            self.backend.refresh_index(&index.name).await?;
            Ok::<usize, anyhow::Error>(written)
        };

        match rebuild.await {
            Ok(written) => {
                index.transition(IndexStatus::Valid);
                info!(
                    component = component::INDEX_MGMT,
                    index = %index.name,
                    documents = written,
                    "index updated"
                );
                Ok(())
            }
            Err(e) => {
                index.transition(IndexStatus::Invalid);
                warn!(
                    component = component::INDEX_MGMT,
                    index = %index.name,
                    error = %e,
                    "index update failed"
                );
                Err(e)
            }
        }
    }

    async fn select_indexes(
        &self,
        type_name: Option<&str>,
        allowed: Option<&AllowedGroups>,
    ) -> Vec<Arc<SearchIndex>> {
        let registry = self.registry.lock().await;
        let of_type: Vec<Arc<SearchIndex>> = match type_name {
            Some(t) => registry.find_for_type(t),
            None => registry.all(),
        };
        match allowed {
            None => of_type,
            Some(groups) => of_type
                .into_iter()
                .filter(|index| &index.allowed_groups == groups)
                .collect(),
        }
    }

    /// Transition matching indexes to `Invalid`; the next fetch rebuilds.
    pub async fn invalidate_indexes(
        &self,
        type_name: Option<&str>,
        allowed: Option<&AllowedGroups>,
    ) -> Vec<Arc<SearchIndex>> {
        let targets = self.select_indexes(type_name, allowed).await;
        for index in &targets {
            let _guard = index.write_lock().lock().await;
            index.transition(IndexStatus::Invalid);
        }
        info!(
            component = component::INDEX_MGMT,
            count = targets.len(),
            "invalidated indexes"
        );
        targets
    }

    /// Remove matching indexes: backend index first, then metadata, then
    /// the in-memory entry.
    pub async fn remove_indexes(
        &self,
        type_name: Option<&str>,
        allowed: Option<&AllowedGroups>,
    ) -> Vec<Arc<SearchIndex>> {
        let targets = self.select_indexes(type_name, allowed).await;
        for index in &targets {
            let _guard = index.write_lock().lock().await;
            if let Err(e) = self.backend.delete_index(&index.name).await {
                warn!(
                    component = component::INDEX_MGMT,
                    index = %index.name,
                    error = %e,
                    "backend index deletion failed"
                );
            }
            if let Err(e) =
                registry::remove_index_metadata(self.store.as_ref(), &index.uri).await
            {
                warn!(
                    component = component::INDEX_MGMT,
                    index = %index.name,
                    error = %e,
                    "metadata removal failed"
                );
            }
            index.transition(IndexStatus::Deleted);
            self.registry.lock().await.remove_by_name(&index.name);
        }
        targets
    }

    /// Every live index of one type, for the update handler.
    pub async fn indexes_of_type(&self, type_name: &str) -> Vec<Arc<SearchIndex>> {
        self.registry.lock().await.find_for_type(type_name)
    }

    pub async fn find_index_by_name(&self, name: &str) -> Option<Arc<SearchIndex>> {
        self.registry.lock().await.find_by_name(name)
    }
}
