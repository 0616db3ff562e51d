// SPARQL Collaborator
// RDF term model, SPARQL 1.1 JSON results parsing, literal escaping, and the
// authorized client pool. Authorized requests carry the caller's allowed
// groups as the `mu-auth-allowed-groups` header so the endpoint applies
// row-level filtering; sudo requests bypass it with `mu-auth-sudo`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;
use url::Url;

use crate::authorization::AllowedGroups;

const RETRY_ATTEMPTS: usize = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// An RDF term as returned by a SPARQL endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum RdfTerm {
    Uri(String),
    BlankNode(String),
    Literal {
        value: String,
        lang: Option<String>,
    },
    TypedLiteral {
        value: String,
        datatype: String,
    },
    /// RDF-star embedded triple, carried opaque.
    Triple(Value),
}

impl RdfTerm {
    /// Parse one binding object of the SPARQL JSON results format.
    pub fn from_binding(binding: &Value) -> Result<Self> {
        let kind = binding
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("binding without a type: {binding}"))?;
        let value = || {
            binding
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("binding without a value: {binding}"))
        };
        match kind {
            "uri" => Ok(RdfTerm::Uri(value()?)),
            "bnode" => Ok(RdfTerm::BlankNode(value()?)),
            "literal" | "typed-literal" => {
                if let Some(datatype) = binding.get("datatype").and_then(Value::as_str) {
                    Ok(RdfTerm::TypedLiteral {
                        value: value()?,
                        datatype: datatype.to_string(),
                    })
                } else {
                    let lang = binding
                        .get("xml:lang")
                        .or_else(|| binding.get("lang"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Ok(RdfTerm::Literal {
                        value: value()?,
                        lang,
                    })
                }
            }
            "triple" => Ok(RdfTerm::Triple(
                binding.get("value").cloned().unwrap_or(Value::Null),
            )),
            other => bail!("unknown RDF term type \"{other}\""),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            RdfTerm::Uri(v) | RdfTerm::BlankNode(v) => v,
            RdfTerm::Literal { value, .. } | RdfTerm::TypedLiteral { value, .. } => value,
            RdfTerm::Triple(_) => "",
        }
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, RdfTerm::Uri(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            RdfTerm::Literal { .. } | RdfTerm::TypedLiteral { .. }
        )
    }

    pub fn lang(&self) -> Option<&str> {
        match self {
            RdfTerm::Literal { lang, .. } => lang.as_deref(),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        match self {
            RdfTerm::TypedLiteral { datatype, .. } => Some(datatype),
            _ => None,
        }
    }
}

/// Escape the characters SPARQL string literals cannot carry verbatim.
pub fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render a term into SPARQL syntax, preserving language tag and datatype.
pub fn term_to_sparql(term: &RdfTerm) -> String {
    match term {
        RdfTerm::Uri(iri) => format!("<{iri}>"),
        RdfTerm::BlankNode(id) => format!("_:{id}"),
        RdfTerm::Literal { value, lang: None } => format!("\"{}\"", escape_string(value)),
        RdfTerm::Literal {
            value,
            lang: Some(lang),
        } => format!("\"{}\"@{lang}", escape_string(value)),
        RdfTerm::TypedLiteral { value, datatype } => {
            format!("\"{}\"^^<{datatype}>", escape_string(value))
        }
        RdfTerm::Triple(value) => format!("<<{value}>>"),
    }
}

/// Rows of a SELECT response, keyed by variable name.
#[derive(Debug, Clone, Default)]
pub struct SparqlBindings {
    pub rows: Vec<HashMap<String, RdfTerm>>,
}

impl SparqlBindings {
    pub fn from_json(body: &Value) -> Result<Self> {
        let bindings = body
            .pointer("/results/bindings")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("response is not a SPARQL result document"))?;
        let mut rows = Vec::with_capacity(bindings.len());
        for row in bindings {
            let Some(object) = row.as_object() else {
                bail!("malformed SPARQL result row");
            };
            let mut parsed = HashMap::with_capacity(object.len());
            for (var, binding) in object {
                parsed.insert(var.clone(), RdfTerm::from_binding(binding)?);
            }
            rows.push(parsed);
        }
        Ok(Self { rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// All bindings of one variable, in row order.
    pub fn values_of<'a>(&'a self, var: &str) -> Vec<&'a RdfTerm> {
        self.rows.iter().filter_map(|row| row.get(var)).collect()
    }
}

/// An authorized SPARQL client checked out of the pool. Dropping the
/// connection returns the pool slot on every exit path.
#[async_trait]
pub trait SparqlConnection: Send + Sync {
    async fn query(&self, sparql: &str) -> Result<SparqlBindings>;
    async fn ask(&self, sparql: &str) -> Result<bool>;
    fn allowed_groups(&self) -> &AllowedGroups;
}

/// The triplestore seam. Authorized reads go through `checkout`; metadata
/// management and delta resolution use the privileged sudo operations.
#[async_trait]
pub trait Triplestore: Send + Sync {
    async fn checkout(&self, groups: &AllowedGroups) -> Result<Box<dyn SparqlConnection>>;
    async fn sudo_query(&self, sparql: &str) -> Result<SparqlBindings>;
    async fn sudo_update(&self, sparql: &str) -> Result<()>;
    async fn sudo_ask(&self, sparql: &str) -> Result<bool>;
}

/// One-shot authorized query without holding the connection.
pub async fn authorized_query(
    store: &dyn Triplestore,
    groups: &AllowedGroups,
    sparql: &str,
) -> Result<SparqlBindings> {
    let connection = store.checkout(groups).await?;
    connection.query(sparql).await
}

/// One-shot authorized ASK.
pub async fn authorized_ask(
    store: &dyn Triplestore,
    groups: &AllowedGroups,
    sparql: &str,
) -> Result<bool> {
    let connection = store.checkout(groups).await?;
    connection.ask(sparql).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Authorization {
    Sudo,
    Groups,
}

/// Connection pool against a SPARQL HTTP endpoint.
///
/// The pool is a semaphore sized by `number_of_threads`; each checked-out
/// connection owns one permit, so slots are reclaimed on drop even when a
/// query fails mid-flight.
pub struct SparqlPool {
    endpoint: Url,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl SparqlPool {
    pub fn new(endpoint: Url, pool_size: usize) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    async fn execute(
        &self,
        sparql: &str,
        authorization: Authorization,
        groups: Option<&AllowedGroups>,
        is_update: bool,
    ) -> Result<Value> {
        execute_request(
            &self.http,
            &self.endpoint,
            sparql,
            authorization,
            groups,
            is_update,
        )
        .await
    }
}

/// Send one SPARQL protocol request, retrying transport and 5xx failures.
async fn execute_request(
    http: &reqwest::Client,
    endpoint: &Url,
    sparql: &str,
    authorization: Authorization,
    groups: Option<&AllowedGroups>,
    is_update: bool,
) -> Result<Value> {
    let field = if is_update { "update" } else { "query" };
    let mut last_error = None;
    for attempt in 0..RETRY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt as u32 - 1)).await;
            warn!(
                component = crate::observability::component::INDEXING,
                attempt = attempt + 1,
                "retrying SPARQL request"
            );
        }
        let mut request = http
            .post(endpoint.clone())
            .header("Accept", "application/sparql-results+json")
            .form(&[(field, sparql)]);
        request = match authorization {
            Authorization::Sudo => request.header("mu-auth-sudo", "true"),
            Authorization::Groups => {
                let groups = groups.ok_or_else(|| anyhow!("missing allowed groups"))?;
                request.header("mu-auth-allowed-groups", groups.cache_key())
            }
        };
        match request.send().await {
            Ok(response) if response.status().is_server_error() => {
                last_error = Some(anyhow!("SPARQL endpoint returned {}", response.status()));
            }
            Ok(response) if !response.status().is_success() => {
                // Client errors are not retriable
                bail!("SPARQL endpoint rejected the request: {}", response.status());
            }
            Ok(response) => {
                if is_update {
                    return Ok(Value::Null);
                }
                return response
                    .json::<Value>()
                    .await
                    .context("SPARQL response is not valid JSON");
            }
            Err(e) => {
                last_error = Some(anyhow!(e).context("SPARQL request failed"));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow!("SPARQL request failed")))
}

struct PooledConnection {
    endpoint: Url,
    http: reqwest::Client,
    groups: AllowedGroups,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    async fn execute(&self, sparql: &str) -> Result<Value> {
        execute_request(
            &self.http,
            &self.endpoint,
            sparql,
            Authorization::Groups,
            Some(&self.groups),
            false,
        )
        .await
    }
}

#[async_trait]
impl SparqlConnection for PooledConnection {
    async fn query(&self, sparql: &str) -> Result<SparqlBindings> {
        let body = self.execute(sparql).await?;
        SparqlBindings::from_json(&body)
    }

    async fn ask(&self, sparql: &str) -> Result<bool> {
        let body = self.execute(sparql).await?;
        body.get("boolean")
            .and_then(Value::as_bool)
            .ok_or_else(|| anyhow!("response is not an ASK result document"))
    }

    fn allowed_groups(&self) -> &AllowedGroups {
        &self.groups
    }
}

#[async_trait]
impl Triplestore for SparqlPool {
    async fn checkout(&self, groups: &AllowedGroups) -> Result<Box<dyn SparqlConnection>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("SPARQL pool closed")?;
        Ok(Box::new(PooledConnection {
            endpoint: self.endpoint.clone(),
            http: self.http.clone(),
            groups: groups.clone(),
            _permit: permit,
        }))
    }

    async fn sudo_query(&self, sparql: &str) -> Result<SparqlBindings> {
        let body = self
            .execute(sparql, Authorization::Sudo, None, false)
            .await?;
        SparqlBindings::from_json(&body)
    }

    async fn sudo_update(&self, sparql: &str) -> Result<()> {
        self.execute(sparql, Authorization::Sudo, None, true)
            .await?;
        Ok(())
    }

    async fn sudo_ask(&self, sparql: &str) -> Result<bool> {
        let body = self
            .execute(sparql, Authorization::Sudo, None, false)
            .await?;
        body.get("boolean")
            .and_then(Value::as_bool)
            .ok_or_else(|| anyhow!("response is not an ASK result document"))
    }
}
