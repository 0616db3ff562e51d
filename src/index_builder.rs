// Index Builder
// Bulk-indexes one search index by paging every resource of the configured
// RDF types under the index's authorization context. Batches run with
// bounded parallelism; one pooled SPARQL connection serves a whole batch.
// A document that fails to build is skipped, the batch continues.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authorization::AllowedGroups;
use crate::config::{IndexDefinition, SearchConfig};
use crate::document_builder::{document_id, DocumentBuilder};
use crate::index::SearchIndex;
use crate::observability::component;
use crate::search_backend::{BulkOp, SearchBackend};
use crate::sparql::Triplestore;

/// One page of the resource enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub offset: usize,
    pub limit: usize,
}

/// Partition `count` resources into batches. `max_batches` (when nonzero)
/// caps the number of full batches; the final remainder page is always
/// included.
pub fn partition_batches(count: usize, batch_size: usize, max_batches: usize) -> Vec<Batch> {
    let mut full = count / batch_size;
    if max_batches > 0 {
        full = full.min(max_batches);
    }
    let mut batches: Vec<Batch> = (0..full)
        .map(|i| Batch {
            offset: i * batch_size,
            limit: batch_size,
        })
        .collect();
    let remainder = count % batch_size;
    if remainder > 0 {
        batches.push(Batch {
            offset: full * batch_size,
            limit: remainder,
        });
    }
    batches
}

fn type_filter(rdf_types: &[&str]) -> String {
    let list: Vec<String> = rdf_types.iter().map(|t| format!("<{t}>")).collect();
    format!("FILTER(?type IN ({}))", list.join(", "))
}

/// Count query for the resources feeding an index.
pub fn count_query(rdf_types: &[&str]) -> String {
    format!(
        "SELECT (COUNT(DISTINCT ?doc) AS ?count) WHERE {{ ?doc a ?type . {} }}",
        type_filter(rdf_types)
    )
}

/// Page query enumerating the resources of one batch.
pub fn page_query(rdf_types: &[&str], batch: Batch) -> String {
    format!(
        "SELECT DISTINCT ?doc WHERE {{ ?doc a ?type . {} }} ORDER BY ?doc LIMIT {} OFFSET {}",
        type_filter(rdf_types),
        batch.limit,
        batch.offset
    )
}

pub struct IndexBuilder {
    config: Arc<SearchConfig>,
    store: Arc<dyn Triplestore>,
    backend: Arc<dyn SearchBackend>,
    documents: Arc<DocumentBuilder>,
}

impl IndexBuilder {
    pub fn new(
        config: Arc<SearchConfig>,
        store: Arc<dyn Triplestore>,
        backend: Arc<dyn SearchBackend>,
        documents: Arc<DocumentBuilder>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            documents,
        }
    }

    async fn count_resources(&self, groups: &AllowedGroups, rdf_types: &[&str]) -> Result<usize> {
        let connection = self.store.checkout(groups).await?;
        let bindings = connection.query(&count_query(rdf_types)).await?;
        let count = bindings
            .values_of("count")
            .first()
            .and_then(|term| term.value().parse::<usize>().ok())
            .context("count query returned no usable count")?;
        Ok(count)
    }

    /// Rebuild the contents of `index` from the triplestore. Returns the
    /// number of documents written.
    pub async fn build_index(
        &self,
        index: &SearchIndex,
        definition: &IndexDefinition,
    ) -> Result<usize> {
        let rdf_types = definition.related_rdf_types();
        let count = self
            .count_resources(&index.allowed_groups, &rdf_types)
            .await?;
        let batches = partition_batches(count, self.config.batch_size, self.config.max_batches);
        info!(
            component = component::INDEXING,
            index = %index.name,
            resources = count,
            batches = batches.len(),
            "bulk indexing"
        );

        let indexed = AtomicUsize::new(0);
        futures::stream::iter(batches)
            .for_each_concurrent(self.config.number_of_threads, |batch| {
                let indexed = &indexed;
                let rdf_types = &rdf_types;
                async move {
                    match self.process_batch(index, definition, rdf_types, batch).await {
                        Ok(written) => {
                            indexed.fetch_add(written, Ordering::SeqCst);
                        }
                        Err(e) => {
                            warn!(
                                component = component::INDEXING,
                                index = %index.name,
                                offset = batch.offset,
                                error = %e,
                                "batch failed"
                            );
                        }
                    }
                }
            })
            .await;

        Ok(indexed.load(Ordering::SeqCst))
    }

    async fn process_batch(
        &self,
        index: &SearchIndex,
        definition: &IndexDefinition,
        rdf_types: &[&str],
        batch: Batch,
    ) -> Result<usize> {
        // One authorized connection serves the whole batch; the pool slot
        // is released when it drops, failure paths included.
        let connection = self.store.checkout(&index.allowed_groups).await?;
        let bindings = connection.query(&page_query(rdf_types, batch)).await?;

        let mut ops = Vec::with_capacity(bindings.len());
        for term in bindings.values_of("doc") {
            let uri = term.value();
            match self
                .documents
                .build_with(connection.as_ref(), uri, definition)
                .await
            {
                Ok(document) => match document_id(&document) {
                    Some(id) => ops.push(BulkOp::Index {
                        id: id.to_string(),
                        document,
                    }),
                    None => {
                        debug!(
                            component = component::INDEXING,
                            uri, "resource without uuid skipped"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        component = component::INDEXING,
                        uri,
                        error = %e,
                        "document build failed, skipping"
                    );
                }
            }
        }

        let written = ops.len();
        self.backend.bulk(&index.name, ops).await?;
        Ok(written)
    }
}
