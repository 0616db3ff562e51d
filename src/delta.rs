// Delta Processor
// Consumes triple-level change notifications from the triplestore, decides
// which configured index types each triple touches, resolves the root
// subjects whose projected documents depend on it by walking the configured
// property paths backwards, and feeds (subject, type) tasks to the update
// handler. A single consumer task drains the delta FIFO in arrival order.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{path_to_sparql, PathOccurrence, SearchConfig, RDF_TYPE};
use crate::index_manager::IndexManager;
use crate::observability::component;
use crate::sparql::{term_to_sparql, RdfTerm, Triplestore};
use crate::update_handler::UpdateHandler;

/// One RDF term of the delta wire format v0.0.1.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaTerm {
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(rename = "xml:lang", default)]
    pub lang: Option<String>,
}

impl DeltaTerm {
    /// The term as an `RdfTerm`; unknown term types are reported `None`.
    pub fn to_term(&self) -> Option<RdfTerm> {
        match self.kind.as_deref() {
            Some("uri") => Some(RdfTerm::Uri(self.value.clone())),
            Some("bnode") => Some(RdfTerm::BlankNode(self.value.clone())),
            Some("literal") | Some("typed-literal") | None => match &self.datatype {
                Some(datatype) => Some(RdfTerm::TypedLiteral {
                    value: self.value.clone(),
                    datatype: datatype.clone(),
                }),
                None => Some(RdfTerm::Literal {
                    value: self.value.clone(),
                    lang: self.lang.clone(),
                }),
            },
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaTriple {
    pub subject: DeltaTerm,
    pub predicate: DeltaTerm,
    pub object: DeltaTerm,
}

/// One changeset of the delta format: `{inserts: [T], deletes: [T]}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Changeset {
    #[serde(default)]
    pub inserts: Vec<DeltaTriple>,
    #[serde(default)]
    pub deletes: Vec<DeltaTriple>,
}

pub type Delta = Vec<Changeset>;

/// Build the root-subject resolution query for one path occurrence of the
/// changed predicate. Returns `None` when the occurrence cannot produce a
/// root (literal object continuing a forward path, or an unanchorable
/// start node).
pub fn root_subject_query(
    rdf_types: &[&str],
    occurrence: &PathOccurrence,
    triple: &DeltaTriple,
    is_addition: bool,
) -> Option<String> {
    let element = &occurrence.path[occurrence.position];
    let prefix = &occurrence.path[..occurrence.position];
    let suffix = &occurrence.path[occurrence.position + 1..];

    let object = triple.object.to_term()?;
    // A literal object cannot continue a forward path; such occurrences
    // produce no roots.
    if object.is_literal() && !suffix.is_empty() && !element.inverse {
        return None;
    }

    let subject_sparql = format!("<{}>", triple.subject.value);
    let object_sparql = term_to_sparql(&object);

    // Traversal direction: the prefix reaches the start side of the triple,
    // the suffix continues from the end side.
    let (start, end) = if element.inverse {
        (object_sparql.clone(), subject_sparql.clone())
    } else {
        (subject_sparql.clone(), object_sparql.clone())
    };

    let type_list: Vec<String> = rdf_types.iter().map(|t| format!("<{t}>")).collect();
    let mut lines = vec![
        "?s a ?type .".to_string(),
        format!("FILTER(?type IN ({})) .", type_list.join(", ")),
    ];

    if prefix.is_empty() {
        // The start node is itself the candidate root.
        if !start.starts_with('<') {
            return None;
        }
        lines.insert(0, format!("VALUES ?s {{ {start} }}"));
    } else {
        lines.push(format!("?s {} {start} .", path_to_sparql(prefix)));
    }

    if is_addition {
        lines.push(format!(
            "{subject_sparql} <{}> {object_sparql} .",
            triple.predicate.value
        ));
        // For deletions the triple is gone and the suffix cannot be
        // checked; the over-approximated root set is accepted.
        if !suffix.is_empty() {
            lines.push(format!("{end} {} ?end .", path_to_sparql(suffix)));
        }
    }

    Some(format!(
        "SELECT DISTINCT ?s WHERE {{\n  {}\n}}",
        lines.join("\n  ")
    ))
}

pub struct DeltaProcessor {
    config: Arc<SearchConfig>,
    store: Arc<dyn Triplestore>,
    manager: Arc<IndexManager>,
    updates: Arc<UpdateHandler>,
    sender: mpsc::UnboundedSender<Delta>,
    pending: Arc<AtomicUsize>,
}

impl DeltaProcessor {
    /// Start the processor and its single consumer task.
    pub fn start(
        config: Arc<SearchConfig>,
        store: Arc<dyn Triplestore>,
        manager: Arc<IndexManager>,
        updates: Arc<UpdateHandler>,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delta>();
        let processor = Arc::new(Self {
            config,
            store,
            manager,
            updates,
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
        });
        let consumer = processor.clone();
        tokio::spawn(async move {
            while let Some(delta) = receiver.recv().await {
                if let Err(e) = consumer.process_delta(&delta).await {
                    warn!(
                        component = component::DELTA,
                        error = %e,
                        "delta processing failed, continuing"
                    );
                }
                consumer.pending.fetch_sub(1, Ordering::SeqCst);
            }
        });
        processor
    }

    /// Append one delta to the FIFO.
    pub fn submit(&self, delta: Delta) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(delta).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(component = component::DELTA, "delta queue closed, event dropped");
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until the FIFO is drained.
    pub async fn drain(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }

    async fn process_delta(&self, delta: &Delta) -> Result<()> {
        for changeset in delta {
            for triple in &changeset.deletes {
                self.process_triple(triple, false).await;
            }
            for triple in &changeset.inserts {
                self.process_triple(triple, true).await;
            }
        }
        Ok(())
    }

    async fn process_triple(&self, triple: &DeltaTriple, is_addition: bool) {
        if triple.object.to_term().is_none() {
            warn!(
                component = component::DELTA,
                kind = triple.object.kind.as_deref().unwrap_or(""),
                "triple with unknown object term type skipped"
            );
            return;
        }

        if triple.predicate.value == RDF_TYPE {
            // The subject itself is the root of every affected type.
            for definition in self.config.types_for_rdf_class(&triple.object.value) {
                let type_name = definition.name.clone();
                if self.config.automatic_index_updates {
                    self.updates.enqueue(&triple.subject.value, &type_name);
                } else {
                    self.manager
                        .invalidate_indexes(Some(&type_name), None)
                        .await;
                }
            }
            return;
        }

        for definition in self.config.types_for_predicate(&triple.predicate.value) {
            let type_name = definition.name.clone();
            if !self.config.automatic_index_updates {
                self.manager
                    .invalidate_indexes(Some(&type_name), None)
                    .await;
                continue;
            }
            match self.resolve_roots(definition, triple, is_addition).await {
                Ok(roots) => {
                    for root in roots {
                        self.updates.enqueue(&root, &type_name);
                    }
                }
                Err(e) => {
                    warn!(
                        component = component::DELTA,
                        type_name = %type_name,
                        predicate = %triple.predicate.value,
                        error = %e,
                        "root subject resolution failed"
                    );
                }
            }
        }
    }

    /// The set of resource subjects whose document depends on `triple`
    /// through any configured path of `definition`. Runs under sudo: root
    /// discovery must see the whole graph, authorization applies when the
    /// documents are rebuilt.
    async fn resolve_roots(
        &self,
        definition: &Arc<crate::config::IndexDefinition>,
        triple: &DeltaTriple,
        is_addition: bool,
    ) -> Result<HashSet<String>> {
        let rdf_types = definition.related_rdf_types();
        let mut roots = HashSet::new();
        for occurrence in definition.path_cache().occurrences(&triple.predicate.value) {
            let Some(query) = root_subject_query(&rdf_types, occurrence, triple, is_addition)
            else {
                continue;
            };
            let bindings = self.store.sudo_query(&query).await?;
            for term in bindings.values_of("s") {
                if term.is_uri() {
                    roots.insert(term.value().to_string());
                }
            }
        }
        debug!(
            component = component::DELTA,
            type_name = %definition.name,
            roots = roots.len(),
            "resolved root subjects"
        );
        Ok(roots)
    }
}
