//! Reconciliation differ: pure set algebra over taxonomy nodes.

use serde::Serialize;

use veille_core::{NodeId, NodeSet};

/// Edges to add and remove to turn the current assignment set into the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub to_add: NodeSet,
    pub to_remove: NodeSet,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// `current ∪ to_add − to_remove`.
    pub fn apply_to(&self, current: &NodeSet) -> NodeSet {
        current
            .union(&self.to_add)
            .filter(|node| !self.to_remove.contains(node))
            .copied()
            .collect()
    }

    /// (categories added, subcategories added, categories removed, subcategories removed).
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let count = |set: &NodeSet, category: bool| {
            set.iter()
                .filter(|n| matches!(n, NodeId::Category(_)) == category)
                .count()
        };
        (
            count(&self.to_add, true),
            count(&self.to_add, false),
            count(&self.to_remove, true),
            count(&self.to_remove, false),
        )
    }
}

/// `to_add = target − current`, `to_remove = current − target`.
///
/// Categories and subcategories are diffed in the same sets so the
/// coordinator commits them together.
pub fn diff(current: &NodeSet, target: &NodeSet) -> Diff {
    Diff {
        to_add: target.difference(current).copied().collect(),
        to_remove: current.difference(target).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(nodes: &[NodeId]) -> NodeSet {
        nodes.iter().copied().collect()
    }

    /// Every subset of a small mixed universe.
    fn all_subsets() -> Vec<NodeSet> {
        let universe = [
            NodeId::Category(1),
            NodeId::Category(2),
            NodeId::Subcategory(1),
            NodeId::Subcategory(10),
            NodeId::Subcategory(20),
        ];
        (0u32..(1 << universe.len()))
            .map(|mask| {
                universe
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, n)| *n)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_diff_properties_hold_for_all_pairs() {
        let subsets = all_subsets();
        for current in &subsets {
            for target in &subsets {
                let d = diff(current, target);
                assert_eq!(&d.apply_to(current), target);
                assert!(d.to_add.is_disjoint(&d.to_remove));
                // Applying the same diff again changes nothing.
                assert_eq!(&d.apply_to(&d.apply_to(current)), target);
                assert_eq!(d.is_empty(), current == target);
            }
        }
    }

    #[test]
    fn test_empty_sets() {
        let d = diff(&NodeSet::new(), &NodeSet::new());
        assert!(d.is_empty());
        let d = diff(&NodeSet::new(), &set(&[NodeId::Category(3)]));
        assert_eq!(d.to_add, set(&[NodeId::Category(3)]));
        assert!(d.to_remove.is_empty());
    }

    #[test]
    fn test_same_id_in_both_kinds_is_distinct() {
        let current = set(&[NodeId::Category(1)]);
        let target = set(&[NodeId::Category(1), NodeId::Subcategory(1)]);
        let d = diff(&current, &target);
        assert_eq!(d.to_add, set(&[NodeId::Subcategory(1)]));
        assert_eq!(d.counts(), (0, 1, 0, 0));
    }

    #[test]
    fn test_scenario_b_swap() {
        let current = set(&[NodeId::Category(1), NodeId::Subcategory(10)]);
        let target = set(&[NodeId::Category(1), NodeId::Subcategory(11)]);
        let d = diff(&current, &target);
        assert_eq!(d.to_add, set(&[NodeId::Subcategory(11)]));
        assert_eq!(d.to_remove, set(&[NodeId::Subcategory(10)]));
    }
}
