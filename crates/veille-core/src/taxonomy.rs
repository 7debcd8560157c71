//! Run-scoped taxonomy context: Category / Subcategory name ↔ id lookups.
//!
//! Built once at startup from the store and shared read-only (behind an
//! `Arc`) by every item task, so it needs no locking. A taxonomy edit during
//! a run is not picked up; restart the run to reload.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CandidateScope;
use crate::types::{CandidateSet, ClassificationResult, NodeId, NodeSet};

/// A `categories` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
}

/// A `subcategories` row. Every subcategory has exactly one parent category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryRow {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
}

/// Immutable name → id lookup for the whole taxonomy.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    category_ids: BTreeMap<String, i64>,
    category_names: HashMap<i64, String>,
    /// Per category id: subcategory name → id.
    subcategory_ids: HashMap<i64, BTreeMap<String, i64>>,
    /// Subcategory id → (parent category id, name).
    subcategory_index: HashMap<i64, (i64, String)>,
    fallback: Option<String>,
}

impl Taxonomy {
    /// Build the lookup from raw rows. Names are trimmed; blank names and
    /// subcategories pointing at an unknown category are skipped.
    pub fn from_rows(categories: Vec<CategoryRow>, subcategories: Vec<SubcategoryRow>) -> Self {
        let mut taxonomy = Self::default();

        for row in categories {
            let name = row.name.trim();
            if name.is_empty() {
                continue;
            }
            taxonomy.category_ids.insert(name.to_string(), row.id);
            taxonomy.category_names.insert(row.id, name.to_string());
        }

        for row in subcategories {
            let name = row.name.trim();
            if name.is_empty() {
                continue;
            }
            if !taxonomy.category_names.contains_key(&row.category_id) {
                warn!(
                    "Subcategory '{}' (id {}) references unknown category {}, skipping",
                    name, row.id, row.category_id
                );
                continue;
            }
            taxonomy
                .subcategory_ids
                .entry(row.category_id)
                .or_default()
                .insert(name.to_string(), row.id);
            taxonomy
                .subcategory_index
                .insert(row.id, (row.category_id, name.to_string()));
        }

        taxonomy
    }

    /// Name of the catch-all subcategory assigned to a category that ends up
    /// with no specific subcategory. It is never offered as a candidate.
    pub fn with_fallback(mut self, fallback: Option<String>) -> Self {
        self.fallback = fallback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        self
    }

    pub fn category_count(&self) -> usize {
        self.category_ids.len()
    }

    pub fn subcategory_count(&self) -> usize {
        self.subcategory_index.len()
    }

    pub fn category_id(&self, name: &str) -> Option<i64> {
        self.category_ids.get(name.trim()).copied()
    }

    pub fn subcategory_id(&self, category: &str, subcategory: &str) -> Option<i64> {
        let category_id = self.category_id(category)?;
        self.subcategory_ids
            .get(&category_id)?
            .get(subcategory.trim())
            .copied()
    }

    fn is_fallback(&self, name: &str) -> bool {
        self.fallback.as_deref() == Some(name)
    }

    fn eligible_subcategories(&self, category_id: i64) -> Vec<String> {
        self.subcategory_ids
            .get(&category_id)
            .map(|subs| {
                subs.keys()
                    .filter(|name| !self.is_fallback(name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Render a persisted assignment set as a name map (for prompts and logs).
    ///
    /// A subcategory whose parent category is not itself assigned is still
    /// listed under that parent.
    pub fn describe(&self, nodes: &NodeSet) -> ClassificationResult {
        let mut described = ClassificationResult::new();
        for node in nodes {
            match node {
                NodeId::Category(id) => match self.category_names.get(id) {
                    Some(name) => {
                        if described.get(name).is_none() {
                            described.insert(name.clone(), Vec::new());
                        }
                    }
                    None => warn!("Assigned category id {} is not in the taxonomy", id),
                },
                NodeId::Subcategory(id) => match self.subcategory_index.get(id) {
                    Some((parent, name)) => {
                        if let Some(parent_name) = self.category_names.get(parent) {
                            if !nodes.contains(&NodeId::Category(*parent)) {
                                warn!(
                                    "Subcategory '{}' is assigned without its category '{}'",
                                    name, parent_name
                                );
                            }
                            described.push(parent_name, name.clone());
                        }
                    }
                    None => warn!("Assigned subcategory id {} is not in the taxonomy", id),
                },
            }
        }
        described
    }

    /// Candidate set for an item given its currently assigned nodes.
    pub fn candidates(&self, current: &NodeSet, scope: CandidateScope) -> CandidateSet {
        let mut candidates = CandidateSet::new();
        match scope {
            CandidateScope::All => {
                for (name, id) in &self.category_ids {
                    candidates.insert(name.clone(), self.eligible_subcategories(*id));
                }
            }
            CandidateScope::Assigned => {
                for node in current {
                    let category_id = match node {
                        NodeId::Category(id) => Some(*id),
                        NodeId::Subcategory(id) => {
                            self.subcategory_index.get(id).map(|(parent, _)| *parent)
                        }
                    };
                    let Some(category_id) = category_id else {
                        continue;
                    };
                    if let Some(name) = self.category_names.get(&category_id) {
                        if !candidates.contains_category(name) {
                            candidates
                                .insert(name.clone(), self.eligible_subcategories(category_id));
                        }
                    }
                }
            }
        }
        candidates
    }

    /// Map a resolved classification onto taxonomy node ids.
    ///
    /// Unknown names are dropped with a warning. A category left with no
    /// subcategory receives the fallback subcategory when one exists under it.
    pub fn resolve(&self, result: &ClassificationResult) -> NodeSet {
        let mut nodes = NodeSet::new();
        for (category, subcategories) in result.iter() {
            let Some(category_id) = self.category_id(category) else {
                warn!("Unknown category '{}' in classification, dropping", category);
                continue;
            };
            nodes.insert(NodeId::Category(category_id));

            let mut assigned = 0usize;
            for subcategory in subcategories {
                match self.subcategory_id(category, subcategory) {
                    Some(id) => {
                        if nodes.insert(NodeId::Subcategory(id)) {
                            assigned += 1;
                        }
                    }
                    None => warn!(
                        "Unknown subcategory '{}' under '{}' in classification, dropping",
                        subcategory, category
                    ),
                }
            }

            if assigned == 0 {
                if let Some(fallback) = self.fallback.as_deref() {
                    if let Some(id) = self.subcategory_id(category, fallback) {
                        nodes.insert(NodeId::Subcategory(id));
                    }
                }
            }
        }
        nodes
    }
}
