// semsearch service entry point
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use semsearch::{
    init_logging_with_level, AppState, AttachmentPipeline, DeltaProcessor, DocumentBuilder,
    ElasticClient, IndexManager, SearchConfig, SparqlPool, TikaClient, UpdateHandler,
};

#[derive(Parser, Debug)]
#[command(
    name = "semsearch",
    about = "Authorization-aware search indexing bridge between an RDF triplestore and Elasticsearch"
)]
struct Args {
    /// Path of the JSON configuration document
    #[arg(long, env = "CONFIG_FILE", default_value = "/config/search.json")]
    config: PathBuf,

    /// Port of the HTTP surface
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// SPARQL endpoint of the triplestore
    #[arg(long, env = "SPARQL_ENDPOINT", default_value = "http://database:8890/sparql")]
    sparql_endpoint: Url,

    /// Base URL of the Elasticsearch-compatible backend
    #[arg(long, env = "ELASTICSEARCH_ENDPOINT", default_value = "http://elasticsearch:9200")]
    elastic_endpoint: Url,

    /// Base URL of the Tika text-extraction service
    #[arg(long, env = "TIKA_ENDPOINT", default_value = "http://tika:9998")]
    tika_endpoint: Url,

    /// Directory of the extracted-text cache
    #[arg(long, env = "ATTACHMENT_CACHE", default_value = "/cache")]
    attachment_cache: PathBuf,

    /// Grace period for draining queues on shutdown, in seconds
    #[arg(long, default_value_t = 30)]
    shutdown_grace: u64,

    #[arg(long, short)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_level(args.verbose, args.quiet)?;

    let config = Arc::new(
        SearchConfig::from_file(&args.config)
            .with_context(|| format!("cannot load {}", args.config.display()))?,
    );
    info!(
        types = config.type_names().count(),
        eager_groups = config.eager_indexing_groups.len(),
        "configuration loaded"
    );

    let store: Arc<dyn semsearch::Triplestore> = Arc::new(SparqlPool::new(
        args.sparql_endpoint,
        config.number_of_threads,
    ));
    let backend: Arc<dyn semsearch::SearchBackend> =
        Arc::new(ElasticClient::new(args.elastic_endpoint));
    let attachments = Arc::new(AttachmentPipeline::new(
        config.attachment_path_base.clone(),
        config.maximum_file_size,
        args.attachment_cache,
        Arc::new(TikaClient::new(args.tika_endpoint)),
    ));
    let documents = Arc::new(DocumentBuilder::new(store.clone(), attachments));

    let manager = IndexManager::new(config.clone(), store.clone(), backend.clone(), documents.clone());
    manager
        .initialize()
        .await
        .context("index manager initialisation failed")?;

    let updates = UpdateHandler::start(
        manager.clone(),
        store.clone(),
        backend.clone(),
        documents,
        Duration::from_secs(config.update_wait_interval_minutes * 60),
    );
    let deltas = DeltaProcessor::start(
        config.clone(),
        store.clone(),
        manager.clone(),
        updates.clone(),
    );

    let state = AppState {
        manager,
        deltas: deltas.clone(),
        updates: updates.clone(),
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    semsearch::start_server(state, args.port, shutdown).await?;

    // Cooperative shutdown: stop intake, then drain both queues within the
    // grace period.
    let drain = async {
        deltas.drain().await;
        updates.drain().await;
    };
    if tokio::time::timeout(Duration::from_secs(args.shutdown_grace), drain)
        .await
        .is_err()
    {
        warn!("shutdown grace period elapsed with work still queued");
    }
    info!("semsearch stopped");
    Ok(())
}
