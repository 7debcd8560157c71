//! Data types for items, taxonomy nodes, and classification results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of an item (article) in the relational store.
pub type ItemId = i64;

/// Persisted processing status of an item.
///
/// Stored as a lowercase string; no other values are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// The unit being classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

/// Opaque identifier of a taxonomy node, as used for diffing assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum NodeId {
    Category(i64),
    Subcategory(i64),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(id) => write!(f, "cat:{}", id),
            Self::Subcategory(id) => write!(f, "sub:{}", id),
        }
    }
}

/// A set of assignment edges for one item, keyed by taxonomy node.
pub type NodeSet = BTreeSet<NodeId>;

/// Split a node set into (category ids, subcategory ids).
pub fn split_nodes(nodes: &NodeSet) -> (Vec<i64>, Vec<i64>) {
    let mut categories = Vec::new();
    let mut subcategories = Vec::new();
    for node in nodes {
        match node {
            NodeId::Category(id) => categories.push(*id),
            NodeId::Subcategory(id) => subcategories.push(*id),
        }
    }
    (categories, subcategories)
}

/// Structured oracle output: Category name → chosen Subcategory names.
///
/// Serializes as the bare `{ "Category": ["Sub", ...] }` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationResult {
    groups: BTreeMap<String, Vec<String>>,
}

impl ClassificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subcategories chosen for a category, replacing any previous entry.
    pub fn insert(&mut self, category: impl Into<String>, subcategories: Vec<String>) {
        self.groups.insert(category.into(), subcategories);
    }

    /// Append one subcategory to a category group, creating the group if needed.
    pub fn push(&mut self, category: &str, subcategory: impl Into<String>) {
        self.groups
            .entry(category.to_string())
            .or_default()
            .push(subcategory.into());
    }

    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.groups.get(category).map(|v| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Per-category comparison: same categories, and for each one the same
    /// set of subcategory names regardless of order or repetition.
    pub fn agrees_with(&self, other: &ClassificationResult) -> bool {
        if self.groups.len() != other.groups.len() {
            return false;
        }
        self.groups.iter().all(|(category, subs)| match other.groups.get(category) {
            Some(other_subs) => {
                let a: BTreeSet<&str> = subs.iter().map(String::as_str).collect();
                let b: BTreeSet<&str> = other_subs.iter().map(String::as_str).collect();
                a == b
            }
            None => false,
        })
    }

    /// Pretty JSON for embedding in prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.groups).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, Vec<String>)> for ClassificationResult {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

/// Taxonomy nodes the oracle may choose from for one item:
/// Category name → eligible Subcategory names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CandidateSet {
    groups: BTreeMap<String, Vec<String>>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: impl Into<String>, subcategories: Vec<String>) {
        let mut subcategories = subcategories;
        subcategories.sort();
        subcategories.dedup();
        self.groups.insert(category.into(), subcategories);
    }

    pub fn contains_category(&self, category: &str) -> bool {
        self.groups.contains_key(category)
    }

    /// Whether `subcategory` is an eligible choice under `category`.
    pub fn allows(&self, category: &str, subcategory: &str) -> bool {
        self.groups
            .get(category)
            .map(|subs| subs.iter().any(|s| s == subcategory))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.groups).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(pairs: &[(&str, &[&str])]) -> ClassificationResult {
        pairs
            .iter()
            .map(|(c, subs)| (c.to_string(), subs.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::Processing,
            ItemStatus::Done,
            ItemStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!(matches!(
            "finished".parse::<ItemStatus>(),
            Err(Error::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_agreement_ignores_order_and_repeats() {
        let a = result(&[("Cardio", &["HTA", "Arythmie"])]);
        let b = result(&[("Cardio", &["Arythmie", "HTA", "HTA"])]);
        assert!(a.agrees_with(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_agreement_detects_group_differences() {
        let a = result(&[("Cardio", &["HTA"])]);
        let b = result(&[("Cardio", &["Arythmie"])]);
        assert!(!a.agrees_with(&b));

        // An empty group is not the same as a missing category.
        let c = result(&[("Cardio", &[])]);
        let d = ClassificationResult::new();
        assert!(!c.agrees_with(&d));

        let e = result(&[("Cardio", &["HTA"]), ("Pneumo", &[])]);
        assert!(!a.agrees_with(&e));
    }

    #[test]
    fn test_result_serializes_as_bare_object() {
        let r = result(&[("Cardio", &["HTA"])]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"Cardio": ["HTA"]}));
    }

    #[test]
    fn test_split_nodes() {
        let nodes: NodeSet = [
            NodeId::Category(1),
            NodeId::Subcategory(10),
            NodeId::Category(2),
        ]
        .into_iter()
        .collect();
        let (cats, subs) = split_nodes(&nodes);
        assert_eq!(cats, vec![1, 2]);
        assert_eq!(subs, vec![10]);
    }

    #[test]
    fn test_candidates_allow() {
        let mut candidates = CandidateSet::new();
        candidates.insert("Cardio", vec!["HTA".into(), "Arythmie".into()]);
        assert!(candidates.allows("Cardio", "HTA"));
        assert!(!candidates.allows("Cardio", "Asthme"));
        assert!(!candidates.allows("Pneumo", "HTA"));
        assert!(candidates.contains_category("Cardio"));
    }
}
