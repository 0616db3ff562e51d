// Authorization Contexts
// Canonical representation of the allowed-groups set a SPARQL query executes
// under. The canonical form doubles as registry cache key and as the
// `mu-auth-allowed-groups` header payload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single access group, e.g. `{"group": "editor", "variables": ["org-42"]}`.
///
/// Field order is alphabetical so the derived serialization is the
/// sorted-keys JSON form the canonicalization rules require.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorizationGroup {
    pub group: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl AuthorizationGroup {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variables(group: impl Into<String>, variables: Vec<String>) -> Self {
        Self {
            group: group.into(),
            variables,
        }
    }

    /// Sorted-keys JSON serialization of this group.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("authorization group serialization is infallible")
    }
}

/// A canonicalised, ordered set of authorization groups.
///
/// # Invariants
/// - The list is sorted by the serialized form of each group
/// - The list contains no structural duplicates
///
/// Structural equality, hashing, and `cache_key()` all operate on this
/// canonical form, so two sets built from differently-ordered input
/// compare and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<AuthorizationGroup>", into = "Vec<AuthorizationGroup>")]
pub struct AllowedGroups {
    groups: Vec<AuthorizationGroup>,
}

impl AllowedGroups {
    pub fn new(mut groups: Vec<AuthorizationGroup>) -> Self {
        groups.sort_by(|a, b| a.to_json().cmp(&b.to_json()));
        groups.dedup();
        Self { groups }
    }

    pub fn empty() -> Self {
        Self { groups: Vec::new() }
    }

    /// Parse a `mu-auth-allowed-groups` header payload.
    pub fn from_json(json: &str) -> Result<Self> {
        let groups: Vec<AuthorizationGroup> =
            serde_json::from_str(json).context("malformed allowed-groups JSON")?;
        Ok(Self::new(groups))
    }

    /// JSON of the canonical list; used as registry key and SPARQL header.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(&self.groups).expect("authorization group serialization is infallible")
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthorizationGroup> {
        self.groups.iter()
    }

    pub fn contains(&self, group: &AuthorizationGroup) -> bool {
        // Canonical order admits a binary search
        self.groups
            .binary_search_by(|g| g.to_json().cmp(&group.to_json()))
            .is_ok()
    }

    /// `self ⊆ other`: every group of `self` is structurally in `other`.
    pub fn is_subset_of(&self, other: &AllowedGroups) -> bool {
        self.groups.iter().all(|g| other.contains(g))
    }

    /// `self ⊂ other`
    pub fn is_strict_subset_of(&self, other: &AllowedGroups) -> bool {
        self != other && self.is_subset_of(other)
    }

    /// Cover test: every group of `self` appears in at least one of `sets`.
    pub fn covered_by<'a, I>(&self, sets: I) -> bool
    where
        I: IntoIterator<Item = &'a AllowedGroups> + Clone,
    {
        self.groups
            .iter()
            .all(|g| sets.clone().into_iter().any(|s| s.contains(g)))
    }

    /// Canonical set with the configured ignored groups filtered out.
    pub fn without(&self, ignored: &[AuthorizationGroup]) -> Self {
        Self::new(
            self.groups
                .iter()
                .filter(|g| !ignored.contains(g))
                .cloned()
                .collect(),
        )
    }
}

impl From<Vec<AuthorizationGroup>> for AllowedGroups {
    fn from(groups: Vec<AuthorizationGroup>) -> Self {
        Self::new(groups)
    }
}

impl From<AllowedGroups> for Vec<AuthorizationGroup> {
    fn from(value: AllowedGroups) -> Self {
        value.groups
    }
}

impl fmt::Display for AllowedGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// Stable name of the backend index serving `type_name` under `groups`.
///
/// The name is a pure function of the identity tuple: recomputing it for the
/// same type and a canonical-equal group set yields the same value.
pub fn index_name(type_name: &str, groups: &AllowedGroups) -> String {
    let serialized: Vec<String> = groups.iter().map(AuthorizationGroup::to_json).collect();
    let seed = format!("{}-{}", type_name, serialized.join("-"));
    format!("{:x}", md5::compute(seed.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(name: &str) -> AuthorizationGroup {
        AuthorizationGroup::new(name)
    }

    #[test]
    fn canonical_form_is_order_insensitive() {
        let a = AllowedGroups::new(vec![g("editor"), g("reader")]);
        let b = AllowedGroups::new(vec![g("reader"), g("editor")]);
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn canonical_form_drops_duplicates() {
        let a = AllowedGroups::new(vec![g("reader"), g("reader")]);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn subset_and_cover() {
        let reader = AllowedGroups::new(vec![g("reader")]);
        let editor = AllowedGroups::new(vec![g("editor")]);
        let both = AllowedGroups::new(vec![g("reader"), g("editor")]);

        assert!(reader.is_subset_of(&both));
        assert!(reader.is_strict_subset_of(&both));
        assert!(!both.is_subset_of(&reader));
        assert!(both.is_subset_of(&both));
        assert!(!both.is_strict_subset_of(&both));

        assert!(both.covered_by([&reader, &editor]));
        assert!(!both.covered_by([&reader]));
    }

    #[test]
    fn variables_distinguish_groups() {
        let plain = AllowedGroups::new(vec![g("org")]);
        let scoped = AllowedGroups::new(vec![AuthorizationGroup::with_variables(
            "org",
            vec!["42".into()],
        )]);
        assert_ne!(plain, scoped);
        assert!(!scoped.is_subset_of(&plain));
    }

    #[test]
    fn index_name_is_deterministic() {
        let a = AllowedGroups::new(vec![g("editor"), g("reader")]);
        let b = AllowedGroups::new(vec![g("reader"), g("editor")]);
        assert_eq!(index_name("documents", &a), index_name("documents", &b));
        assert_ne!(index_name("documents", &a), index_name("cases", &a));
    }

    #[test]
    fn ignored_groups_are_filtered() {
        let groups = AllowedGroups::new(vec![g("clean"), g("noise")]);
        let filtered = groups.without(&[g("noise")]);
        assert_eq!(filtered, AllowedGroups::new(vec![g("clean")]));
    }
}
