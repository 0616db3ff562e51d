// HTTP Surface
// Operational endpoints of the service: delta intake, index management,
// and liveness. The public search query DSL is served elsewhere; this
// surface only drives the indexing control plane.

use anyhow::Result;
use axum::{
    extract::{Query as AxumQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::authorization::AllowedGroups;
use crate::delta::{Delta, DeltaProcessor};
use crate::index::SearchIndex;
use crate::index_manager::IndexManager;
use crate::update_handler::UpdateHandler;

// Global server start time for uptime tracking
static SERVER_START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<IndexManager>,
    pub deltas: Arc<DeltaProcessor>,
    pub updates: Arc<UpdateHandler>,
}

#[derive(Debug, Deserialize)]
pub struct IndexSelector {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub status: String,
}

impl From<&Arc<SearchIndex>> for IndexSummary {
    fn from(index: &Arc<SearchIndex>) -> Self {
        Self {
            name: index.name.clone(),
            type_name: index.type_name.clone(),
            status: index.status().to_string(),
        }
    }
}

fn allowed_groups_header(headers: &HeaderMap) -> Result<Option<AllowedGroups>, (StatusCode, String)> {
    let Some(raw) = headers.get("mu-auth-allowed-groups") else {
        return Ok(None);
    };
    let raw = raw.to_str().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "mu-auth-allowed-groups is not valid UTF-8".to_string(),
        )
    })?;
    AllowedGroups::from_json(raw).map(Some).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("malformed mu-auth-allowed-groups header: {e}"),
        )
    })
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "uptime_seconds": SERVER_START_TIME.elapsed().as_secs()
    }))
}

/// Delta intake: v0.0.1 changesets from the triplestore.
async fn accept_delta(State(state): State<AppState>, Json(delta): Json<Delta>) -> StatusCode {
    state.deltas.submit(delta);
    StatusCode::NO_CONTENT
}

/// Force an update of the selected indexes (all authorization variants
/// unless the caller scopes with its allowed-groups header).
async fn update_indexes(
    State(state): State<AppState>,
    AxumQuery(selector): AxumQuery<IndexSelector>,
    headers: HeaderMap,
) -> Result<Json<Vec<IndexSummary>>, (StatusCode, String)> {
    let groups = allowed_groups_header(&headers)?;
    let indexes = state
        .manager
        .fetch_indexes(selector.type_name.as_deref(), groups.as_ref(), true)
        .await;
    Ok(Json(indexes.iter().map(IndexSummary::from).collect()))
}

async fn invalidate_indexes(
    State(state): State<AppState>,
    AxumQuery(selector): AxumQuery<IndexSelector>,
    headers: HeaderMap,
) -> Result<Json<Vec<IndexSummary>>, (StatusCode, String)> {
    let groups = allowed_groups_header(&headers)?;
    let indexes = state
        .manager
        .invalidate_indexes(selector.type_name.as_deref(), groups.as_ref())
        .await;
    Ok(Json(indexes.iter().map(IndexSummary::from).collect()))
}

async fn remove_indexes(
    State(state): State<AppState>,
    AxumQuery(selector): AxumQuery<IndexSelector>,
    headers: HeaderMap,
) -> Result<Json<Vec<IndexSummary>>, (StatusCode, String)> {
    let groups = allowed_groups_header(&headers)?;
    let indexes = state
        .manager
        .remove_indexes(selector.type_name.as_deref(), groups.as_ref())
        .await;
    Ok(Json(indexes.iter().map(IndexSummary::from).collect()))
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/update", post(accept_delta))
        .route("/indexes/update", post(update_indexes))
        .route("/indexes/invalidate", post(invalidate_indexes))
        .route("/indexes", delete(remove_indexes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "semsearch listening");
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
