// Document Builder
// Materialises the projected search document of one RDF resource. All
// property paths of an index definition are gathered in a single SELECT
// round-trip whose rows pair a property marker IRI with a value; composite
// definitions build one sub-document per matching sub-index and smart-merge
// the projections.

use anyhow::{anyhow, bail, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::attachments::AttachmentPipeline;
use crate::authorization::AllowedGroups;
use crate::config::{
    path_to_sparql, IndexDefinition, IndexKind, PropertyDefinition, PropertyKind,
};
use crate::sparql::{RdfTerm, SparqlConnection, Triplestore};

/// Namespace of the marker IRIs the projection query binds to carry
/// property names through the result rows.
pub const EXT_NS: &str = "http://mu.semte.ch/vocabularies/ext/";

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Builds search documents from SPARQL results under a caller-supplied
/// authorization context.
pub struct DocumentBuilder {
    store: Arc<dyn Triplestore>,
    attachments: Arc<AttachmentPipeline>,
}

impl DocumentBuilder {
    pub fn new(store: Arc<dyn Triplestore>, attachments: Arc<AttachmentPipeline>) -> Self {
        Self { store, attachments }
    }

    /// Build the document of `uri` under `groups`, checking out one pooled
    /// connection for the whole traversal.
    pub async fn build(
        &self,
        uri: &str,
        definition: &IndexDefinition,
        groups: &AllowedGroups,
    ) -> Result<Value> {
        let connection = self.store.checkout(groups).await?;
        self.build_with(connection.as_ref(), uri, definition).await
    }

    /// Build the document of `uri` over an already-authorized connection.
    pub async fn build_with(
        &self,
        connection: &dyn SparqlConnection,
        uri: &str,
        definition: &IndexDefinition,
    ) -> Result<Value> {
        match &definition.kind {
            IndexKind::Regular { .. } => {
                let map = self
                    .build_properties(connection, uri, &definition.properties)
                    .await?;
                Ok(Value::Object(map))
            }
            IndexKind::Composite { sub_indexes } => {
                let actual_types = self.resource_types(connection, uri).await?;
                let mut merged = Value::Null;
                let mut matched = false;
                for sub in sub_indexes {
                    if !sub.rdf_types.iter().any(|t| actual_types.contains(t)) {
                        continue;
                    }
                    matched = true;
                    let map = self
                        .build_properties(connection, uri, &sub.properties)
                        .await?;
                    merged = smart_merge(merged, Value::Object(map)).with_context(|| {
                        format!("conflicting sub-index projections for {uri}")
                    })?;
                }
                if !matched {
                    bail!("resource {uri} matches no sub-index of {}", definition.name);
                }
                Ok(merged)
            }
        }
    }

    async fn resource_types(
        &self,
        connection: &dyn SparqlConnection,
        uri: &str,
    ) -> Result<Vec<String>> {
        let query = format!("SELECT DISTINCT ?type WHERE {{ <{uri}> a ?type }}");
        let bindings = connection.query(&query).await?;
        Ok(bindings
            .values_of("type")
            .into_iter()
            .map(|t| t.value().to_string())
            .collect())
    }

    /// One SELECT round-trip gathering every property of `uri`, then
    /// per-kind materialisation and denumeration. Boxed because nested
    /// properties recurse through `materialise_property`.
    fn build_properties<'a>(
        &'a self,
        connection: &'a dyn SparqlConnection,
        uri: &'a str,
        properties: &'a indexmap::IndexMap<String, PropertyDefinition>,
    ) -> BoxFuture<'a, Result<Map<String, Value>>> {
        async move {
            let query = projection_query(uri, properties);
            let bindings = connection.query(&query).await?;

            // Group the marker rows back per property name.
            let mut grouped: HashMap<&str, Vec<&RdfTerm>> = HashMap::new();
            for row in &bindings.rows {
                let (Some(subject), Some(object)) = (row.get("s"), row.get("o")) else {
                    continue;
                };
                if let Some(name) = subject.value().strip_prefix(EXT_NS) {
                    if let Some((name, _)) = properties.get_key_value(name) {
                        grouped.entry(name.as_str()).or_default().push(object);
                    }
                }
            }

            let mut document = Map::new();
            document.insert("uri".to_string(), Value::String(uri.to_string()));
            for (name, property) in properties {
                let terms = grouped.remove(name.as_str()).unwrap_or_default();
                let value = self
                    .materialise_property(connection, property, &terms)
                    .await?;
                document.insert(name.clone(), value);
            }
            Ok(document)
        }
        .boxed()
    }

    async fn materialise_property(
        &self,
        connection: &dyn SparqlConnection,
        property: &PropertyDefinition,
        terms: &[&RdfTerm],
    ) -> Result<Value> {
        match &property.kind {
            PropertyKind::Simple => Ok(denumerate(terms.iter().copied().map(map_term).collect())),
            PropertyKind::LanguageString => Ok(language_object(terms)),
            PropertyKind::Lambert72 => Ok(denumerate(
                terms
                    .iter()
                    .filter_map(|t| lambert72_value(t.value()))
                    .collect(),
            )),
            PropertyKind::Attachment => {
                let mut values = Vec::with_capacity(terms.len());
                for term in terms {
                    if !term.is_uri() {
                        continue;
                    }
                    let content = self.attachments.content_for(term.value()).await;
                    values.push(json!({
                        "content": content.map(Value::String).unwrap_or(Value::Null)
                    }));
                }
                Ok(Value::Array(values))
            }
            PropertyKind::Nested { sub_properties, .. } => {
                let mut values = Vec::with_capacity(terms.len());
                for term in terms {
                    if !term.is_uri() {
                        continue;
                    }
                    let nested = self
                        .build_properties(connection, term.value(), sub_properties)
                        .await?;
                    values.push(Value::Object(nested));
                }
                Ok(Value::Array(values))
            }
        }
    }
}

/// Render the single-round-trip projection query: one UNION alternative per
/// property, each binding the marker `ext:<name>` to `?s` next to the
/// property's value `?o`. A plain SELECT keeps the response in the SPARQL
/// JSON results format the client parses.
pub fn projection_query(
    uri: &str,
    properties: &indexmap::IndexMap<String, PropertyDefinition>,
) -> String {
    let alternatives: Vec<String> = properties
        .values()
        .map(|property| {
            format!(
                "  {{ BIND(<{EXT_NS}{}> AS ?s) <{uri}> {} ?o . }}",
                property.name,
                path_to_sparql(&property.path)
            )
        })
        .collect();
    format!(
        "SELECT ?s ?o WHERE {{\n{}\n}}",
        alternatives.join("\n  UNION\n")
    )
}

/// Map one RDF term to its JSON representation, by literal datatype.
pub fn map_term(term: &RdfTerm) -> Value {
    match term {
        RdfTerm::Uri(v) | RdfTerm::BlankNode(v) => Value::String(v.clone()),
        RdfTerm::Literal { value, .. } => Value::String(value.clone()),
        RdfTerm::TypedLiteral { value, datatype } => {
            match datatype.strip_prefix(XSD_NS).unwrap_or(datatype.as_str()) {
                "integer" | "long" | "int" | "short" | "byte" => value
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(value.clone())),
                "decimal" | "double" | "float" => value
                    .parse::<f64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(value.clone())),
                "boolean" => match value.as_str() {
                    "true" | "1" => Value::Bool(true),
                    "false" | "0" => Value::Bool(false),
                    _ => Value::String(value.clone()),
                },
                "dateTime" => chrono::DateTime::parse_from_rfc3339(value)
                    .map(|dt| Value::String(dt.to_rfc3339()))
                    .unwrap_or_else(|_| Value::String(value.clone())),
                "date" => Value::String(value.clone()),
                _ => Value::String(value.clone()),
            }
        }
        RdfTerm::Triple(_) => Value::Null,
    }
}

/// Group language-tagged literals into `{<lang>: [...], "default": [...]}`.
fn language_object(terms: &[&RdfTerm]) -> Value {
    let mut by_lang: Map<String, Value> = Map::new();
    for term in terms {
        if !term.is_literal() {
            continue;
        }
        let lang = term.lang().unwrap_or("default").to_string();
        match by_lang.entry(lang).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(values) => values.push(Value::String(term.value().to_string())),
            _ => unreachable!("language buckets are arrays"),
        }
    }
    Value::Object(by_lang)
}

/// Collapse a materialised value list: absent → null, single → scalar,
/// multiple → array.
pub fn denumerate(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.remove(0),
        _ => Value::Array(values),
    }
}

/// Parse a planar `"x - y"` (or `"x, y"`) Lambert 72 coordinate pair into a
/// WGS84 geo point.
fn lambert72_value(raw: &str) -> Option<Value> {
    let parts: Vec<&str> = raw
        .split(|c| c == '-' || c == ',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 2 {
        return None;
    }
    let x = parts[0].parse::<f64>().ok()?;
    let y = parts[1].parse::<f64>().ok()?;
    let (lat, lon) = lambert72_to_wgs84(x, y);
    Some(json!({"lat": lat, "lon": lon}))
}

/// Belgian NGI Lambert 72 → WGS84 single-zone conversion.
pub fn lambert72_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    use std::f64::consts::PI;

    let n = 0.771_642_19_f64;
    let f = 1.813_297_63_f64;
    let theta_fudge = 0.000_142_04_f64;
    let e = 0.081_991_89_f64;
    let a = 6_378_388.0_f64;
    let x_offset = 149_910.0_f64;
    let y_offset = 5_400_150.0_f64;
    let theta0 = 0.076_042_94_f64;

    let x_real = x_offset - x;
    let y_real = y_offset - y;

    let rho = (x_real * x_real + y_real * y_real).sqrt();
    let theta = (x_real / -y_real).atan();

    let lon = (theta0 + (theta + theta_fudge) / n).to_degrees();

    let mut lat = 0.0_f64;
    for _ in 0..5 {
        lat = 2.0
            * (((f * a / rho).powf(1.0 / n)
                * ((1.0 + e * lat.sin()) / (1.0 - e * lat.sin())).powf(e / 2.0))
            .atan())
            - PI / 2.0;
    }
    (lat.to_degrees(), lon)
}

/// Merge two sub-index projections of one resource.
///
/// Null absorbs; arrays concatenate and dedup; maps merge recursively;
/// differing scalars combine into an array. A map meeting a non-map is a
/// per-document build failure.
pub fn smart_merge(a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::Null, b) => Ok(b),
        (a, Value::Null) => Ok(a),
        (Value::Object(mut a), Value::Object(b)) => {
            for (key, b_value) in b {
                let merged = match a.remove(&key) {
                    Some(a_value) => smart_merge(a_value, b_value)
                        .with_context(|| format!("while merging key \"{key}\""))?,
                    None => b_value,
                };
                a.insert(key, merged);
            }
            Ok(Value::Object(a))
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut merged = a;
            for value in b {
                if !merged.contains(&value) {
                    merged.push(value);
                }
            }
            Ok(Value::Array(merged))
        }
        (Value::Array(mut a), b) => {
            if !a.contains(&b) {
                a.push(b);
            }
            Ok(Value::Array(a))
        }
        (a, Value::Array(mut b)) => {
            if !b.contains(&a) {
                b.insert(0, a);
            }
            Ok(Value::Array(b))
        }
        (Value::Object(_), b) => Err(anyhow!("cannot merge object with scalar {b}")),
        (a, Value::Object(_)) => Err(anyhow!("cannot merge scalar {a} with object")),
        (a, b) => {
            if a == b {
                Ok(a)
            } else {
                Ok(Value::Array(vec![a, b]))
            }
        }
    }
}

/// The backend document id of a built document: its `uuid` field.
pub fn document_id(document: &Value) -> Option<&str> {
    match document.get("uuid") {
        Some(Value::String(uuid)) => Some(uuid),
        // A resource with several uuid triples still has one usable id
        Some(Value::Array(values)) => values.first().and_then(Value::as_str),
        _ => None,
    }
}
