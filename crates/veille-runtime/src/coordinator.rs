//! Persistence coordinator: applies a diff to one item's assignment edges.
//!
//! Deletions go first, then insertions, each as one bulk store call. Both
//! run inside a single blocking task, so once started the sequence is never
//! interrupted by cancellation of the caller. A failed insertion after a
//! successful deletion leaves the item partially modified; the caller marks
//! it `error` and a later run recomputes the diff from the stored state.
//!
//! With a claimant set, the claim is renewed first and nothing is written
//! if another run has taken the item over.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use veille_core::ItemId;
use veille_store::Store;

use crate::diff::Diff;
use crate::types::Applied;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("delete failed: {0}")]
    Delete(veille_core::Error),

    #[error("insert failed after {removed} deletions: {source}")]
    Insert {
        removed: usize,
        source: veille_core::Error,
    },

    #[error("apply task aborted: {0}")]
    Aborted(String),

    #[error("claim on item {0} lost before apply")]
    ClaimLost(ItemId),

    #[error("claim check failed: {0}")]
    Claim(veille_core::Error),
}

pub struct PersistenceCoordinator<S> {
    store: Arc<S>,
    claimant: Option<String>,
}

impl<S: Store> PersistenceCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            claimant: None,
        }
    }

    /// Only write while `claimant` still holds the item.
    pub fn with_claimant(mut self, claimant: impl Into<String>) -> Self {
        self.claimant = Some(claimant.into());
        self
    }

    pub async fn apply(&self, item_id: ItemId, diff: &Diff) -> Result<Applied, ApplyError> {
        if diff.is_empty() {
            debug!("Item {}: nothing to apply", item_id);
            return Ok(Applied::default());
        }

        let store = self.store.clone();
        let to_remove = diff.to_remove.clone();
        let to_add = diff.to_add.clone();
        let claimant = self.claimant.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(claimant) = claimant {
                let held = store
                    .renew_claim(item_id, &claimant)
                    .map_err(ApplyError::Claim)?;
                if !held {
                    return Err(ApplyError::ClaimLost(item_id));
                }
            }
            let removed = if to_remove.is_empty() {
                0
            } else {
                store
                    .delete_assignments(item_id, &to_remove)
                    .map_err(ApplyError::Delete)?
            };
            let added = if to_add.is_empty() {
                0
            } else {
                store
                    .insert_assignments(item_id, &to_add)
                    .map_err(|source| {
                        warn!(
                            "Item {}: insert failed after deleting {} edges",
                            item_id, removed
                        );
                        ApplyError::Insert { removed, source }
                    })?
            };
            Ok(Applied { removed, added })
        })
        .await
        .map_err(|e| ApplyError::Aborted(e.to_string()))?
    }
}
