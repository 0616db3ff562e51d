// Search Backend Collaborator
// Elasticsearch-compatible HTTP client behind the SearchBackend trait. The
// trait is the seam the manager, builder and update handler talk to; the
// in-memory fake in `testing` implements it for the test suite.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

/// Failures talking to the search backend. Transport errors and 5xx
/// responses are retriable: the owning index transitions to `Invalid` and
/// the next fetch rebuilds it.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("search backend transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl BackendError {
    pub fn is_retriable(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status >= 500,
        }
    }
}

/// One entry of a bulk request.
#[derive(Debug, Clone)]
pub enum BulkOp {
    Index { id: String, document: Value },
    Delete { id: String },
}

/// Render bulk operations into the NDJSON body Elasticsearch expects.
pub fn render_bulk_body(ops: &[BulkOp]) -> String {
    let mut body = String::new();
    for op in ops {
        match op {
            BulkOp::Index { id, document } => {
                body.push_str(&json!({"index": {"_id": id}}).to_string());
                body.push('\n');
                body.push_str(&document.to_string());
                body.push('\n');
            }
            BulkOp::Delete { id } => {
                body.push_str(&json!({"delete": {"_id": id}}).to_string());
                body.push('\n');
            }
        }
    }
    body
}

/// The Elasticsearch-compatible surface the indexing core consumes.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn create_index(
        &self,
        name: &str,
        mappings: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<()>;
    async fn index_exists(&self, name: &str) -> Result<bool>;
    async fn delete_index(&self, name: &str) -> Result<()>;
    /// Remove every document while keeping the index and its mapping.
    async fn clear_index(&self, name: &str) -> Result<()>;
    async fn refresh_index(&self, name: &str) -> Result<()>;
    async fn upsert_document(&self, name: &str, id: &str, document: &Value) -> Result<()>;
    /// Delete by the forced `uri` keyword field; the caller does not know
    /// the document id of a resource that vanished from the triplestore.
    /// Deleting a missing document is not an error.
    async fn delete_document_by_uri(&self, name: &str, uri: &str) -> Result<()>;
    async fn bulk(&self, name: &str, ops: Vec<BulkOp>) -> Result<()>;
    async fn search(&self, name: &str, query: &Value) -> Result<Value>;
    async fn count(&self, name: &str, query: Option<&Value>) -> Result<u64>;
}

/// Reqwest-backed Elasticsearch client.
pub struct ElasticClient {
    base: Url,
    http: reqwest::Client,
}

impl ElasticClient {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid backend path {path}"))
    }

    async fn check(response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        if status.is_success() {
            // Some endpoints (HEAD, some deletes) return no body
            let body = response.text().await.unwrap_or_default();
            if body.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).or(Ok(Value::Null))
        } else {
            Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl SearchBackend for ElasticClient {
    async fn create_index(
        &self,
        name: &str,
        mappings: Option<&Value>,
        settings: Option<&Value>,
    ) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(settings) = settings {
            body.insert("settings".to_string(), settings.clone());
        }
        if let Some(mappings) = mappings {
            body.insert("mappings".to_string(), mappings.clone());
        }
        let response = self
            .http
            .put(self.url(name)?)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(BackendError::from)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .http
            .head(self.url(name)?)
            .send()
            .await
            .map_err(BackendError::from)?;
        Ok(response.status().is_success())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(name)?)
            .send()
            .await
            .map_err(BackendError::from)?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn clear_index(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("{name}/_delete_by_query?conflicts=proceed"))?)
            .json(&json!({"query": {"match_all": {}}}))
            .send()
            .await
            .map_err(BackendError::from)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn refresh_index(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("{name}/_refresh"))?)
            .send()
            .await
            .map_err(BackendError::from)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert_document(&self, name: &str, id: &str, document: &Value) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!("{name}/_doc/{id}"))?)
            .json(document)
            .send()
            .await
            .map_err(BackendError::from)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_document_by_uri(&self, name: &str, uri: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("{name}/_delete_by_query?conflicts=proceed"))?)
            .json(&json!({"query": {"term": {"uri": uri}}}))
            .send()
            .await
            .map_err(BackendError::from)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn bulk(&self, name: &str, ops: Vec<BulkOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let body = render_bulk_body(&ops);
        let response = self
            .http
            .post(self.url(&format!("{name}/_bulk"))?)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(BackendError::from)?;
        let result = Self::check(response).await?;
        if result.get("errors").and_then(Value::as_bool) == Some(true) {
            anyhow::bail!("bulk request to index {name} reported item failures");
        }
        Ok(())
    }

    async fn search(&self, name: &str, query: &Value) -> Result<Value> {
        let response = self
            .http
            .post(self.url(&format!("{name}/_search"))?)
            .json(query)
            .send()
            .await
            .map_err(BackendError::from)?;
        Ok(Self::check(response).await?)
    }

    async fn count(&self, name: &str, query: Option<&Value>) -> Result<u64> {
        let mut request = self.http.post(self.url(&format!("{name}/_count"))?);
        if let Some(query) = query {
            request = request.json(query);
        }
        let response = request.send().await.map_err(BackendError::from)?;
        let body = Self::check(response).await?;
        body.get("count")
            .and_then(Value::as_u64)
            .context("count response without a count field")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_body_is_ndjson() {
        let ops = vec![
            BulkOp::Index {
                id: "1".into(),
                document: json!({"title": "hello"}),
            },
            BulkOp::Delete { id: "2".into() },
        ];
        let body = render_bulk_body(&ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], r#"{"index":{"_id":"1"}}"#);
        assert_eq!(lines[1], r#"{"title":"hello"}"#);
        assert_eq!(lines[2], r#"{"delete":{"_id":"2"}}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn retriability_follows_the_status_class() {
        let server = BackendError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(server.is_retriable());

        let client = BackendError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(!client.is_retriable());
    }
}
