//! The relational store contract used by the reconciliation engine.

use std::time::Duration;

use veille_core::{CategoryRow, Item, ItemId, ItemStatus, NodeSet, Result, SubcategoryRow};

/// Storage operations required by the engine.
///
/// Calls are blocking; async callers run them on the blocking pool.
pub trait Store: Send + Sync + 'static {
    /// Read the whole taxonomy (categories, subcategories).
    fn load_taxonomy(&self) -> Result<(Vec<CategoryRow>, Vec<SubcategoryRow>)>;

    /// Atomically select up to `limit` `pending`/`error` items and flip them
    /// to `processing` under `claimant`. Returns the claimed ids.
    ///
    /// An item that reached `error` under `claimant` is not taken again by
    /// the same claimant; it waits for another run.
    fn claim_items(&self, limit: usize, claimant: &str) -> Result<Vec<ItemId>>;

    /// Return `processing` items claimed longer than `older_than` ago to
    /// `pending`. Returns how many were released.
    fn release_stale_claims(&self, older_than: Duration) -> Result<usize>;

    /// Refresh `claimed_at` of an item still `processing` under `claimant`.
    /// Returns `false` when the claim was lost.
    fn renew_claim(&self, id: ItemId, claimant: &str) -> Result<bool>;

    /// Write `status` only if the item is still `processing` under
    /// `claimant`. Returns `false` (and writes nothing) when the claim was lost.
    /// `reason` is kept only for `error`, which also keeps the last claimant.
    fn finish_claim(
        &self,
        id: ItemId,
        claimant: &str,
        status: ItemStatus,
        reason: Option<&str>,
    ) -> Result<bool>;

    fn get_item(&self, id: ItemId) -> Result<Option<Item>>;

    /// Current assignment edges of an item (categories and subcategories).
    fn get_assignments(&self, id: ItemId) -> Result<NodeSet>;

    /// Bulk-delete the given edges in one operation.
    fn delete_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize>;

    /// Bulk-insert the given edges; edges already present are ignored.
    fn insert_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize>;

    /// Up to `limit` items never graded (no grade and no grading error), oldest id first.
    fn ungraded_items(&self, limit: usize) -> Result<Vec<ItemId>>;

    /// Record an evidence grade (`A`, `B` or `C`) and mark the item graded.
    fn set_grade(&self, id: ItemId, grade: &str) -> Result<()>;

    /// Mark grading of an item as failed; the grade itself is left alone.
    fn set_grade_error(&self, id: ItemId, reason: &str) -> Result<()>;
}
