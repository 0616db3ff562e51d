// semsearch - Authorization-aware search indexing bridge
// Root library module

pub mod attachments;
pub mod authorization;
pub mod config;
pub mod delta;
pub mod document_builder;
pub mod http_server;
pub mod index;
pub mod index_builder;
pub mod index_manager;
pub mod observability;
pub mod registry;
pub mod search_backend;
pub mod sparql;
pub mod update_handler;

// In-memory collaborator fakes for integration tests
pub mod testing;

// Re-export observability setup
pub use observability::{component, init_logging, init_logging_with_level};

// Re-export the authorization model
pub use authorization::{index_name, AllowedGroups, AuthorizationGroup};

// Re-export the configuration model
pub use config::{
    IndexDefinition, IndexKind, PathElement, PropertyDefinition, PropertyKind, SearchConfig,
};

// Re-export the collaborator seams
pub use attachments::{AttachmentPipeline, TextExtractor, TikaClient};
pub use search_backend::{BulkOp, ElasticClient, SearchBackend};
pub use sparql::{RdfTerm, SparqlBindings, SparqlConnection, SparqlPool, Triplestore};

// Re-export the indexing core
pub use delta::{Delta, DeltaProcessor};
pub use document_builder::{smart_merge, DocumentBuilder};
pub use index::{IndexStatus, SearchIndex};
pub use index_builder::IndexBuilder;
pub use index_manager::IndexManager;
pub use update_handler::UpdateHandler;

// Re-export the HTTP surface
pub use http_server::{create_app, start_server, AppState};
