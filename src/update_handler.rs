// Update Handler
// Keyed async queue applying per-resource index updates. At most one task
// per (subject, type) key is in flight; deltas arriving for a key that is
// queued or running coalesce into a single triplestore + backend round-trip.
// For every index of the affected type the subject either still exists
// under that index's authorization (rebuild + upsert) or it does not
// (delete by uri; a missing document is not an error).

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::document_builder::{document_id, DocumentBuilder};
use crate::index::IndexStatus;
use crate::index_manager::IndexManager;
use crate::observability::component;
use crate::search_backend::SearchBackend;
use crate::sparql::{authorized_ask, Triplestore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateKey {
    pub subject: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Queued,
    Running,
    /// Re-enqueued while running; the task re-runs once after finishing.
    RunningDirty,
}

/// ASK whether `subject` still carries one of the related RDF types.
pub fn exists_query(subject: &str, rdf_types: &[&str]) -> String {
    let list: Vec<String> = rdf_types.iter().map(|t| format!("<{t}>")).collect();
    format!(
        "ASK {{ <{subject}> a ?type . FILTER(?type IN ({})) }}",
        list.join(", ")
    )
}

pub struct UpdateHandler {
    manager: Arc<IndexManager>,
    store: Arc<dyn Triplestore>,
    backend: Arc<dyn SearchBackend>,
    documents: Arc<DocumentBuilder>,
    states: DashMap<UpdateKey, KeyState>,
    sender: mpsc::UnboundedSender<UpdateKey>,
    debounce: Duration,
}

impl UpdateHandler {
    /// Start the handler and its worker pool. Worker count follows the
    /// configured `number_of_threads`; per-key ordering is preserved by the
    /// key state machine, distinct keys run in parallel.
    pub fn start(
        manager: Arc<IndexManager>,
        store: Arc<dyn Triplestore>,
        backend: Arc<dyn SearchBackend>,
        documents: Arc<DocumentBuilder>,
        debounce: Duration,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let workers = manager.config().number_of_threads;
        let handler = Arc::new(Self {
            manager,
            store,
            backend,
            documents,
            states: DashMap::new(),
            sender,
            debounce,
        });
        let receiver = Arc::new(Mutex::new(receiver));
        for _ in 0..workers {
            let handler = handler.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                handler.worker_loop(receiver).await;
            });
        }
        handler
    }

    /// Queue one (subject, type) update. Coalesces with pending work.
    pub fn enqueue(&self, subject: &str, type_name: &str) {
        let key = UpdateKey {
            subject: subject.to_string(),
            type_name: type_name.to_string(),
        };
        match self.states.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if *entry.get() == KeyState::Running {
                    entry.insert(KeyState::RunningDirty);
                }
                // Queued and RunningDirty already cover this delta
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(KeyState::Queued);
                if self.sender.send(key).is_err() {
                    warn!(
                        component = component::UPDATE_HANDLER,
                        "update queue closed, dropping task"
                    );
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.states.len()
    }

    /// Wait until every queued and running task has settled.
    pub async fn drain(&self) {
        while !self.states.is_empty() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn worker_loop(self: Arc<Self>, receiver: Arc<Mutex<mpsc::UnboundedReceiver<UpdateKey>>>) {
        loop {
            let key = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(key) = key else {
                break;
            };

            // The debounce window: the key stays Queued while we wait, so
            // further deltas for it coalesce into this run.
            if !self.debounce.is_zero() {
                tokio::time::sleep(self.debounce).await;
            }
            self.states.insert(key.clone(), KeyState::Running);

            if let Err(e) = self.process(&key).await {
                warn!(
                    component = component::UPDATE_HANDLER,
                    subject = %key.subject,
                    type_name = %key.type_name,
                    error = %e,
                    "update task failed"
                );
            }

            // Done unless a delta dirtied the key while it ran.
            let finished = self
                .states
                .remove_if(&key, |_, state| *state == KeyState::Running)
                .is_some();
            if !finished {
                self.states.insert(key.clone(), KeyState::Queued);
                if self.sender.send(key).is_err() {
                    break;
                }
            }
        }
    }

    async fn process(&self, key: &UpdateKey) -> Result<()> {
        let Some(definition) = self.manager.config().get_type(&key.type_name).cloned() else {
            debug!(
                component = component::UPDATE_HANDLER,
                type_name = %key.type_name,
                "update for unconfigured type dropped"
            );
            return Ok(());
        };
        let rdf_types = definition.related_rdf_types();

        for index in self.manager.indexes_of_type(&key.type_name).await {
            if index.status() == IndexStatus::Deleted {
                continue;
            }
            let result = self
                .apply_to_index(&index, &key.subject, &definition, &rdf_types)
                .await;
            if let Err(e) = result {
                // Backend or triplestore trouble: the index goes invalid so
                // the next fetch rebuilds it from scratch.
                index.transition(IndexStatus::Invalid);
                warn!(
                    component = component::UPDATE_HANDLER,
                    index = %index.name,
                    subject = %key.subject,
                    error = %e,
                    "per-index update failed, index invalidated"
                );
            }
        }
        Ok(())
    }

    async fn apply_to_index(
        &self,
        index: &Arc<crate::index::SearchIndex>,
        subject: &str,
        definition: &Arc<crate::config::IndexDefinition>,
        rdf_types: &[&str],
    ) -> Result<()> {
        let exists = authorized_ask(
            self.store.as_ref(),
            &index.allowed_groups,
            &exists_query(subject, rdf_types),
        )
        .await?;

        let _guard = index.write_lock().lock().await;
        // A parallel remove may have won the lock first; re-read the status.
        if index.status() == IndexStatus::Deleted {
            return Ok(());
        }

        if exists {
            match self
                .documents
                .build(subject, definition, &index.allowed_groups)
                .await
            {
                Ok(document) => {
                    if let Some(id) = document_id(&document) {
                        self.backend
                            .upsert_document(&index.name, id, &document)
                            .await?;
                    } else {
                        debug!(
                            component = component::UPDATE_HANDLER,
                            subject, "document without uuid skipped"
                        );
                    }
                }
                Err(e) => {
                    // Per-document failure: log and leave the index intact.
                    warn!(
                        component = component::UPDATE_HANDLER,
                        subject,
                        index = %index.name,
                        error = %e,
                        "document build failed"
                    );
                }
            }
        } else {
            self.backend
                .delete_document_by_uri(&index.name, subject)
                .await?;
        }
        Ok(())
    }
}
