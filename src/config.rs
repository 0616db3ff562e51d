// Configuration Model
// Parses the JSON configuration document into typed index definitions,
// expands composite definitions into sub-indexes, and precomputes the
// property-path dependency cache the delta processor dispatches on.
// Validation is fatal and aggregated: startup reports every problem at once.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::authorization::{AllowedGroups, AuthorizationGroup};

/// Well-known vocabulary IRIs.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const MU_UUID: &str = "http://mu.semte.ch/vocabularies/core/uuid";

/// One step of a property path. `^iri` in the configuration marks an
/// inverse step (object-to-subject traversal).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathElement {
    pub iri: String,
    pub inverse: bool,
}

impl PathElement {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('^') {
            Some(iri) => Self {
                iri: iri.to_string(),
                inverse: true,
            },
            None => Self {
                iri: raw.to_string(),
                inverse: false,
            },
        }
    }

    /// Render as a SPARQL path step.
    pub fn to_sparql(&self) -> String {
        if self.inverse {
            format!("^<{}>", self.iri)
        } else {
            format!("<{}>", self.iri)
        }
    }
}

/// Render a property path as a SPARQL path expression.
pub fn path_to_sparql(path: &[PathElement]) -> String {
    path.iter()
        .map(PathElement::to_sparql)
        .collect::<Vec<_>>()
        .join("/")
}

/// The closed set of property projections.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    Simple,
    LanguageString,
    Attachment,
    Lambert72,
    Nested {
        rdf_type: String,
        sub_properties: IndexMap<String, PropertyDefinition>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub name: String,
    pub path: Vec<PathElement>,
    pub kind: PropertyKind,
}

impl PropertyDefinition {
    fn simple(name: &str, path: Vec<PathElement>) -> Self {
        Self {
            name: name.to_string(),
            path,
            kind: PropertyKind::Simple,
        }
    }

    /// The synthetic uuid property injected into every property set.
    fn uuid() -> Self {
        Self::simple("uuid", vec![PathElement::parse(MU_UUID)])
    }
}

/// A sub-index of a composite definition: one referenced type's projection
/// with the composite's property names resolved through the remapping table.
#[derive(Debug, Clone)]
pub struct SubIndex {
    pub name: String,
    pub rdf_types: Vec<String>,
    pub properties: IndexMap<String, PropertyDefinition>,
}

/// Regular indexes project one set of RDF types; composite indexes
/// aggregate the projections of previously-defined regular types.
#[derive(Debug, Clone)]
pub enum IndexKind {
    Regular { rdf_types: Vec<String> },
    Composite { sub_indexes: Vec<SubIndex> },
}

/// Where a predicate occurs inside a configured dependency path.
#[derive(Debug, Clone)]
pub struct PathOccurrence {
    /// The full path, flattened through nested sub-properties.
    pub path: Vec<PathElement>,
    /// Index of the matching element within `path`.
    pub position: usize,
}

/// Bidirectional predicate → path index for one index definition.
#[derive(Debug, Default)]
pub struct PathCache {
    occurrences: HashMap<String, Vec<PathOccurrence>>,
}

impl PathCache {
    fn insert(&mut self, path: &[PathElement]) {
        for (position, element) in path.iter().enumerate() {
            self.occurrences
                .entry(element.iri.clone())
                .or_default()
                .push(PathOccurrence {
                    path: path.to_vec(),
                    position,
                });
        }
    }

    pub fn contains_predicate(&self, iri: &str) -> bool {
        self.occurrences.contains_key(iri)
    }

    pub fn occurrences(&self, iri: &str) -> &[PathOccurrence] {
        self.occurrences.get(iri).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predicates(&self) -> impl Iterator<Item = &str> {
        self.occurrences.keys().map(String::as_str)
    }
}

/// A named projection from RDF resources to search documents.
#[derive(Debug)]
pub struct IndexDefinition {
    pub name: String,
    pub on_path: String,
    pub kind: IndexKind,
    /// Regular indexes: the projected properties (uuid included).
    /// Composite indexes: empty; the sub-indexes carry the properties.
    pub properties: IndexMap<String, PropertyDefinition>,
    pub mappings: Option<Value>,
    pub settings: Option<Value>,
    path_cache: PathCache,
}

impl IndexDefinition {
    /// The RDF types whose instances feed this index.
    pub fn related_rdf_types(&self) -> Vec<&str> {
        match &self.kind {
            IndexKind::Regular { rdf_types } => rdf_types.iter().map(String::as_str).collect(),
            IndexKind::Composite { sub_indexes } => {
                let mut types: Vec<&str> = sub_indexes
                    .iter()
                    .flat_map(|s| s.rdf_types.iter().map(String::as_str))
                    .collect();
                // Sub-indexes may share RDF types; duplicates are not
                // necessarily adjacent
                types.sort_unstable();
                types.dedup();
                types
            }
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, IndexKind::Composite { .. })
    }

    pub fn sub_indexes(&self) -> &[SubIndex] {
        match &self.kind {
            IndexKind::Composite { sub_indexes } => sub_indexes,
            IndexKind::Regular { .. } => &[],
        }
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.path_cache
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_automatic_updates() -> bool {
    true
}

fn default_attachment_path_base() -> String {
    "/share/".to_string()
}

fn default_maximum_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_number_of_threads() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default)]
    max_batches: usize,
    #[serde(default)]
    persist_indexes: bool,
    #[serde(default = "default_automatic_updates")]
    automatic_index_updates: bool,
    #[serde(default)]
    enable_raw_dsl_endpoint: bool,
    #[serde(default = "default_attachment_path_base")]
    attachment_path_base: String,
    #[serde(default = "default_maximum_file_size")]
    maximum_file_size: u64,
    #[serde(default)]
    common_terms_cutoff_frequency: Option<f64>,
    #[serde(default)]
    update_wait_interval_minutes: u64,
    #[serde(default = "default_number_of_threads")]
    number_of_threads: usize,
    #[serde(default)]
    eager_indexing_groups: Vec<Vec<AuthorizationGroup>>,
    #[serde(default)]
    ignored_allowed_groups: Vec<AuthorizationGroup>,
    #[serde(default)]
    default_settings: Option<Value>,
    #[serde(default)]
    types: Vec<RawIndexDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawIndexDefinition {
    #[serde(rename = "type")]
    type_name: String,
    on_path: String,
    #[serde(default)]
    rdf_type: Option<Value>,
    #[serde(default)]
    composite_types: Option<Vec<String>>,
    #[serde(default)]
    properties: Option<Value>,
    #[serde(default)]
    mappings: Option<Value>,
    #[serde(default)]
    settings: Option<Value>,
}

/// Fully validated service configuration.
#[derive(Debug)]
pub struct SearchConfig {
    pub batch_size: usize,
    pub max_batches: usize,
    pub persist_indexes: bool,
    pub automatic_index_updates: bool,
    pub enable_raw_dsl_endpoint: bool,
    pub attachment_path_base: PathBuf,
    pub maximum_file_size: u64,
    pub common_terms_cutoff_frequency: Option<f64>,
    pub update_wait_interval_minutes: u64,
    pub number_of_threads: usize,
    pub eager_indexing_groups: Vec<AllowedGroups>,
    pub ignored_allowed_groups: Vec<AuthorizationGroup>,
    pub default_settings: Option<Value>,
    types: IndexMap<String, Arc<IndexDefinition>>,
}

impl SearchConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(json).context("configuration is not valid JSON")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut errors: Vec<String> = Vec::new();

        // First pass: structural validation and regular definitions, which
        // composite expansion resolves against.
        let mut seen_paths: HashSet<&str> = HashSet::new();
        let mut regular: IndexMap<String, Arc<IndexDefinition>> = IndexMap::new();
        let mut composites: Vec<&RawIndexDefinition> = Vec::new();

        for def in &raw.types {
            if !seen_paths.insert(def.on_path.as_str()) {
                errors.push(format!("duplicate on_path \"{}\"", def.on_path));
            }
            match (&def.rdf_type, &def.composite_types) {
                (Some(_), Some(_)) => errors.push(format!(
                    "type \"{}\" declares both rdf_type and composite_types",
                    def.type_name
                )),
                (None, None) => errors.push(format!(
                    "type \"{}\" declares neither rdf_type nor composite_types",
                    def.type_name
                )),
                (Some(rdf_type), None) => {
                    match build_regular(def, rdf_type, &mut errors) {
                        Some(built) => {
                            if regular
                                .insert(def.type_name.clone(), Arc::new(built))
                                .is_some()
                            {
                                errors.push(format!("duplicate type \"{}\"", def.type_name));
                            }
                        }
                        None => {}
                    }
                }
                (None, Some(_)) => composites.push(def),
            }
        }

        // Second pass: composite expansion against the regular definitions.
        let mut types = regular.clone();
        for def in composites {
            if types.contains_key(&def.type_name) {
                errors.push(format!("duplicate type \"{}\"", def.type_name));
                continue;
            }
            if let Some(built) = build_composite(def, &regular, &mut errors) {
                types.insert(def.type_name.clone(), Arc::new(built));
            }
        }

        for tuple in &raw.eager_indexing_groups {
            let has_wildcard = tuple.iter().any(|g| g.group == "*");
            if has_wildcard && tuple.len() > 1 {
                errors.push(
                    "eager indexing group combines the wildcard \"*\" with other access rights"
                        .to_string(),
                );
            }
        }

        if raw.number_of_threads == 0 {
            errors.push("number_of_threads must be at least 1".to_string());
        }
        if raw.batch_size == 0 {
            errors.push("batch_size must be at least 1".to_string());
        }

        if !errors.is_empty() {
            tracing::error!(
                component = crate::observability::component::CONFIG_PARSER,
                count = errors.len(),
                "configuration rejected"
            );
            bail!(
                "invalid search configuration:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(Self {
            batch_size: raw.batch_size,
            max_batches: raw.max_batches,
            persist_indexes: raw.persist_indexes,
            automatic_index_updates: raw.automatic_index_updates,
            enable_raw_dsl_endpoint: raw.enable_raw_dsl_endpoint,
            attachment_path_base: PathBuf::from(raw.attachment_path_base),
            maximum_file_size: raw.maximum_file_size,
            common_terms_cutoff_frequency: raw.common_terms_cutoff_frequency,
            update_wait_interval_minutes: raw.update_wait_interval_minutes,
            number_of_threads: raw.number_of_threads,
            eager_indexing_groups: raw
                .eager_indexing_groups
                .into_iter()
                .map(AllowedGroups::new)
                .collect(),
            ignored_allowed_groups: raw.ignored_allowed_groups,
            default_settings: raw.default_settings,
            types,
        })
    }

    pub fn get_type(&self, type_name: &str) -> Option<&Arc<IndexDefinition>> {
        self.types.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<IndexDefinition>> {
        self.types.values()
    }

    /// Index definitions whose related RDF types include `rdf_type`.
    pub fn types_for_rdf_class(&self, rdf_type: &str) -> Vec<&Arc<IndexDefinition>> {
        self.types
            .values()
            .filter(|def| def.related_rdf_types().contains(&rdf_type))
            .collect()
    }

    /// Index definitions whose dependency paths contain `predicate`,
    /// in forward or inverse form.
    pub fn types_for_predicate(&self, predicate: &str) -> Vec<&Arc<IndexDefinition>> {
        self.types
            .values()
            .filter(|def| def.path_cache().contains_predicate(predicate))
            .collect()
    }
}

fn parse_path(value: &Value) -> Option<Vec<PathElement>> {
    match value {
        Value::String(s) if !s.is_empty() => Some(vec![PathElement::parse(s)]),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_str().map(PathElement::parse))
            .collect(),
        _ => None,
    }
}

fn parse_property(
    index_name: &str,
    name: &str,
    value: &Value,
    errors: &mut Vec<String>,
) -> Option<PropertyDefinition> {
    match value {
        Value::String(_) | Value::Array(_) => {
            let path = parse_path(value)?;
            Some(PropertyDefinition::simple(name, path))
        }
        Value::Object(spec) => {
            let via = spec.get("via").and_then(parse_path);
            let Some(path) = via else {
                errors.push(format!(
                    "type \"{index_name}\": property \"{name}\" has no usable path"
                ));
                return None;
            };
            if let (Some(rdf_type), Some(Value::Object(sub))) =
                (spec.get("rdf_type").and_then(Value::as_str), spec.get("properties"))
            {
                let mut sub_properties = IndexMap::new();
                for (sub_name, sub_value) in sub {
                    if let Some(p) = parse_property(index_name, sub_name, sub_value, errors) {
                        sub_properties.insert(sub_name.clone(), p);
                    }
                }
                return Some(PropertyDefinition {
                    name: name.to_string(),
                    path,
                    kind: PropertyKind::Nested {
                        rdf_type: rdf_type.to_string(),
                        sub_properties,
                    },
                });
            }
            let kind = match spec.get("type").and_then(Value::as_str) {
                Some("language-string") => PropertyKind::LanguageString,
                Some("attachment") => PropertyKind::Attachment,
                Some("lambert-72") => PropertyKind::Lambert72,
                Some("simple") | None => PropertyKind::Simple,
                Some(other) => {
                    errors.push(format!(
                        "type \"{index_name}\": property \"{name}\" has unknown type \"{other}\""
                    ));
                    return None;
                }
            };
            Some(PropertyDefinition {
                name: name.to_string(),
                path,
                kind,
            })
        }
        _ => {
            errors.push(format!(
                "type \"{index_name}\": property \"{name}\" has no usable path"
            ));
            None
        }
    }
}

fn parse_rdf_types(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

/// Flatten every dependency path of a property set into a cache, expanding
/// nested sub-properties into root-relative paths.
fn cache_properties(
    cache: &mut PathCache,
    prefix: &[PathElement],
    properties: &IndexMap<String, PropertyDefinition>,
) {
    for property in properties.values() {
        let mut full: Vec<PathElement> = prefix.to_vec();
        full.extend(property.path.iter().cloned());
        cache.insert(&full);
        if let PropertyKind::Nested { sub_properties, .. } = &property.kind {
            cache_properties(cache, &full, sub_properties);
        }
    }
}

fn build_regular(
    def: &RawIndexDefinition,
    rdf_type: &Value,
    errors: &mut Vec<String>,
) -> Option<IndexDefinition> {
    let Some(rdf_types) = parse_rdf_types(rdf_type) else {
        errors.push(format!(
            "type \"{}\": rdf_type must be an IRI or a list of IRIs",
            def.type_name
        ));
        return None;
    };

    let mut properties: IndexMap<String, PropertyDefinition> = IndexMap::new();
    match &def.properties {
        Some(Value::Object(map)) => {
            for (name, value) in map {
                if let Some(p) = parse_property(&def.type_name, name, value, errors) {
                    properties.insert(name.clone(), p);
                }
            }
        }
        Some(_) => {
            errors.push(format!(
                "type \"{}\": properties must be an object",
                def.type_name
            ));
            return None;
        }
        None => {}
    }
    properties.insert("uuid".to_string(), PropertyDefinition::uuid());

    let mut path_cache = PathCache::default();
    cache_properties(&mut path_cache, &[], &properties);

    Some(IndexDefinition {
        name: def.type_name.clone(),
        on_path: def.on_path.clone(),
        kind: IndexKind::Regular { rdf_types },
        properties,
        mappings: def.mappings.clone(),
        settings: def.settings.clone(),
        path_cache,
    })
}

fn build_composite(
    def: &RawIndexDefinition,
    regular: &IndexMap<String, Arc<IndexDefinition>>,
    errors: &mut Vec<String>,
) -> Option<IndexDefinition> {
    let Some(composite_types) = &def.composite_types else {
        return None;
    };

    // Composite properties are a list of {name, mappings?} objects.
    let mut property_specs: Vec<(String, Option<&serde_json::Map<String, Value>>)> = Vec::new();
    match &def.properties {
        Some(Value::Array(items)) => {
            for item in items {
                let spec = item.as_object().and_then(|o| {
                    o.get("name")
                        .and_then(Value::as_str)
                        .map(|name| (name.to_string(), o.get("mappings").and_then(Value::as_object)))
                });
                match spec {
                    Some(parsed) => property_specs.push(parsed),
                    None => errors.push(format!(
                        "type \"{}\": composite properties must be {{name, mappings?}} objects",
                        def.type_name
                    )),
                }
            }
        }
        _ => {
            errors.push(format!(
                "type \"{}\": composite properties must be a list of {{name, mappings?}} objects",
                def.type_name
            ));
            return None;
        }
    }

    let mut sub_indexes = Vec::new();
    for sub_type in composite_types {
        let Some(source) = regular.get(sub_type) else {
            errors.push(format!(
                "type \"{}\": composite references unknown type \"{}\"",
                def.type_name, sub_type
            ));
            continue;
        };
        let IndexKind::Regular { rdf_types } = &source.kind else {
            errors.push(format!(
                "type \"{}\": composite references non-regular type \"{}\"",
                def.type_name, sub_type
            ));
            continue;
        };

        let mut properties: IndexMap<String, PropertyDefinition> = IndexMap::new();
        for (name, mappings) in &property_specs {
            // A mapping entry of null omits the property for this sub-type;
            // an absent entry falls back to the composite property name.
            let source_name = match mappings.and_then(|m| m.get(sub_type)) {
                Some(Value::Null) => continue,
                Some(Value::String(mapped)) => mapped.as_str(),
                Some(_) => {
                    errors.push(format!(
                        "type \"{}\": mapping of \"{}\" for \"{}\" must be a string or null",
                        def.type_name, name, sub_type
                    ));
                    continue;
                }
                None => name.as_str(),
            };
            if let Some(source_property) = source.properties.get(source_name) {
                let mut remapped = source_property.clone();
                remapped.name = name.clone();
                properties.insert(name.clone(), remapped);
            }
        }
        properties.insert("uuid".to_string(), PropertyDefinition::uuid());

        sub_indexes.push(SubIndex {
            name: sub_type.clone(),
            rdf_types: rdf_types.clone(),
            properties,
        });
    }

    if sub_indexes.is_empty() {
        errors.push(format!(
            "type \"{}\": composite expansion produced no sub-indexes",
            def.type_name
        ));
        return None;
    }

    let mut path_cache = PathCache::default();
    for sub in &sub_indexes {
        cache_properties(&mut path_cache, &[], &sub.properties);
    }

    Some(IndexDefinition {
        name: def.type_name.clone(),
        on_path: def.on_path.clone(),
        kind: IndexKind::Composite { sub_indexes },
        properties: IndexMap::new(),
        mappings: def.mappings.clone(),
        settings: def.settings.clone(),
        path_cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> &'static str {
        r#"{
            "types": [
                {
                    "type": "document",
                    "on_path": "documents",
                    "rdf_type": "http://example.org/Document",
                    "properties": {
                        "title": "http://purl.org/dc/terms/title",
                        "author_name": [
                            "http://purl.org/dc/terms/creator",
                            "http://xmlns.com/foaf/0.1/name"
                        ]
                    }
                }
            ]
        }"#
    }

    #[test]
    fn parses_minimal_configuration() {
        let config = SearchConfig::from_json_str(minimal_config()).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.number_of_threads, 1);
        let def = config.get_type("document").unwrap();
        assert_eq!(def.on_path, "documents");
        assert_eq!(def.related_rdf_types(), vec!["http://example.org/Document"]);
        // uuid is injected alongside the two configured properties
        assert_eq!(def.properties.len(), 3);
        assert!(def.properties.contains_key("uuid"));
    }

    #[test]
    fn path_cache_covers_every_position() {
        let config = SearchConfig::from_json_str(minimal_config()).unwrap();
        let def = config.get_type("document").unwrap();
        let cache = def.path_cache();
        assert!(cache.contains_predicate("http://purl.org/dc/terms/title"));
        assert!(cache.contains_predicate(MU_UUID));
        let occ = cache.occurrences("http://xmlns.com/foaf/0.1/name");
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].position, 1);
        assert_eq!(occ[0].path.len(), 2);
    }

    #[test]
    fn nested_properties_flatten_into_the_cache() {
        let config = SearchConfig::from_json_str(
            r#"{
                "types": [{
                    "type": "case",
                    "on_path": "cases",
                    "rdf_type": "http://example.org/Case",
                    "properties": {
                        "holder": {
                            "via": "http://example.org/heldBy",
                            "rdf_type": "http://example.org/Agent",
                            "properties": {
                                "name": "http://xmlns.com/foaf/0.1/name"
                            }
                        }
                    }
                }]
            }"#,
        )
        .unwrap();
        let cache = config.get_type("case").unwrap().path_cache();
        let occ = cache.occurrences("http://xmlns.com/foaf/0.1/name");
        assert_eq!(occ.len(), 1);
        // Flattened through the nested property: heldBy/name
        assert_eq!(occ[0].position, 1);
        assert_eq!(occ[0].path[0].iri, "http://example.org/heldBy");
    }

    #[test]
    fn inverse_paths_are_recognised() {
        let config = SearchConfig::from_json_str(
            r#"{
                "types": [{
                    "type": "author",
                    "on_path": "authors",
                    "rdf_type": "http://example.org/Person",
                    "properties": {
                        "works": "^http://purl.org/dc/terms/creator"
                    }
                }]
            }"#,
        )
        .unwrap();
        let def = config.get_type("author").unwrap();
        let property = def.properties.get("works").unwrap();
        assert!(property.path[0].inverse);
        assert_eq!(property.path[0].iri, "http://purl.org/dc/terms/creator");
        assert!(def
            .path_cache()
            .contains_predicate("http://purl.org/dc/terms/creator"));
        assert_eq!(
            path_to_sparql(&property.path),
            "^<http://purl.org/dc/terms/creator>"
        );
    }

    #[test]
    fn composite_expansion_remaps_properties() {
        let config = SearchConfig::from_json_str(
            r#"{
                "types": [
                    {
                        "type": "agent",
                        "on_path": "agents",
                        "rdf_type": "http://example.org/Agent",
                        "properties": {
                            "first_name_used": "http://example.org/gebruikteVoornaam"
                        }
                    },
                    {
                        "type": "mandatary",
                        "on_path": "mandataries",
                        "rdf_type": "http://example.org/Mandatary",
                        "properties": {
                            "given_name": "http://xmlns.com/foaf/0.1/givenName"
                        }
                    },
                    {
                        "type": "person",
                        "on_path": "people",
                        "composite_types": ["agent", "mandatary"],
                        "properties": [
                            {"name": "given_name", "mappings": {"agent": "first_name_used"}}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let person = config.get_type("person").unwrap();
        assert!(person.is_composite());
        let subs = person.sub_indexes();
        assert_eq!(subs.len(), 2);

        let agent = subs.iter().find(|s| s.name == "agent").unwrap();
        let via_agent = agent.properties.get("given_name").unwrap();
        assert_eq!(via_agent.path[0].iri, "http://example.org/gebruikteVoornaam");

        let mandatary = subs.iter().find(|s| s.name == "mandatary").unwrap();
        let via_mandatary = mandatary.properties.get("given_name").unwrap();
        assert_eq!(via_mandatary.path[0].iri, "http://xmlns.com/foaf/0.1/givenName");

        // Both sub-index property sets carry the synthetic uuid
        assert!(agent.properties.contains_key("uuid"));
        assert!(mandatary.properties.contains_key("uuid"));

        // Delta dispatch reaches the composite through either source path
        assert!(config
            .types_for_predicate("http://xmlns.com/foaf/0.1/givenName")
            .iter()
            .any(|d| d.name == "person"));
    }

    #[test]
    fn validation_errors_are_aggregated() {
        let err = SearchConfig::from_json_str(
            r#"{
                "eager_indexing_groups": [[{"group": "*"}, {"group": "reader"}]],
                "types": [
                    {"type": "a", "on_path": "things", "rdf_type": "http://example.org/A"},
                    {"type": "a", "on_path": "things", "rdf_type": "http://example.org/B"},
                    {"type": "c", "on_path": "cs"},
                    {"type": "d", "on_path": "ds", "composite_types": ["nope"]}
                ]
            }"#,
        )
        .unwrap_err();
        let report = err.to_string();
        assert!(report.contains("duplicate type \"a\""));
        assert!(report.contains("duplicate on_path \"things\""));
        assert!(report.contains("neither rdf_type nor composite_types"));
        assert!(report.contains("unknown type \"nope\""));
        assert!(report.contains("wildcard"));
    }

    #[test]
    fn composite_related_types_drop_non_adjacent_duplicates() {
        let config = SearchConfig::from_json_str(
            r#"{
                "types": [
                    {
                        "type": "agent",
                        "on_path": "agents",
                        "rdf_type": ["http://example.org/Agent", "http://example.org/Person"],
                        "properties": {"name": "http://xmlns.com/foaf/0.1/name"}
                    },
                    {
                        "type": "mandatary",
                        "on_path": "mandataries",
                        "rdf_type": "http://example.org/Agent",
                        "properties": {"name": "http://xmlns.com/foaf/0.1/name"}
                    },
                    {
                        "type": "person",
                        "on_path": "people",
                        "composite_types": ["agent", "mandatary"],
                        "properties": [{"name": "name"}]
                    }
                ]
            }"#,
        )
        .unwrap();
        let mut types = config.get_type("person").unwrap().related_rdf_types();
        types.sort_unstable();
        assert_eq!(
            types,
            vec!["http://example.org/Agent", "http://example.org/Person"]
        );
    }

    #[test]
    fn rdf_class_lookup_spans_composites() {
        let config = SearchConfig::from_json_str(
            r#"{
                "types": [
                    {
                        "type": "agent",
                        "on_path": "agents",
                        "rdf_type": "http://example.org/Agent",
                        "properties": {"name": "http://xmlns.com/foaf/0.1/name"}
                    },
                    {
                        "type": "person",
                        "on_path": "people",
                        "composite_types": ["agent"],
                        "properties": [{"name": "name"}]
                    }
                ]
            }"#,
        )
        .unwrap();
        let hits = config.types_for_rdf_class("http://example.org/Agent");
        let names: Vec<&str> = hits.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"agent"));
        assert!(names.contains(&"person"));
    }
}
