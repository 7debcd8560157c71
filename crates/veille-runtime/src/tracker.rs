//! Job selector and status tracker: the only writers of item status.
//!
//! The selector moves items into `processing` (and back to `pending` for
//! expired leases or unstarted claims). The tracker is the only place an
//! item reaches `done` or `error`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use veille_core::{ItemId, ItemStatus, Result};
use veille_store::Store;

use crate::blocking::run_blocking;
use crate::types::{ItemReport, ProcessError};

/// Claims batches of `pending`/`error` items for one run.
pub struct JobSelector<S> {
    store: Arc<S>,
    claimant: String,
    batch_size: usize,
    lease_timeout: Duration,
}

impl<S: Store> JobSelector<S> {
    /// A selector with a fresh run id as claimant.
    pub fn new(store: Arc<S>, batch_size: usize, lease_timeout: Duration) -> Self {
        Self {
            store,
            claimant: Uuid::new_v4().to_string(),
            batch_size,
            lease_timeout,
        }
    }

    /// Run id recorded in `claimed_by`.
    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Push back the lease of an in-flight item. `false` means another run
    /// owns it now.
    pub async fn renew(&self, id: ItemId) -> Result<bool> {
        let claimant = self.claimant.clone();
        run_blocking(&self.store, move |s| s.renew_claim(id, &claimant)).await
    }

    /// Return `processing` items whose lease expired to `pending`.
    pub async fn sweep(&self) -> Result<usize> {
        let lease = self.lease_timeout;
        let released = run_blocking(&self.store, move |s| s.release_stale_claims(lease)).await?;
        if released > 0 {
            warn!("Released {} items with expired leases", released);
        }
        Ok(released)
    }

    /// Sweep expired leases, then atomically claim up to one batch.
    pub async fn claim(&self) -> Result<Vec<ItemId>> {
        self.sweep().await?;
        let limit = self.batch_size;
        let claimant = self.claimant.clone();
        let ids = run_blocking(&self.store, move |s| s.claim_items(limit, &claimant)).await?;
        if !ids.is_empty() {
            info!("Claimed {} items", ids.len());
        }
        Ok(ids)
    }

    /// Give back claimed items that were never started.
    pub async fn release(&self, ids: Vec<ItemId>) -> Result<usize> {
        let claimant = self.claimant.clone();
        let count = run_blocking(&self.store, move |s| {
            let mut released = 0;
            for id in ids {
                if s.finish_claim(id, &claimant, ItemStatus::Pending, None)? {
                    released += 1;
                }
            }
            Ok(released)
        })
        .await?;
        if count > 0 {
            info!("Released {} unstarted items", count);
        }
        Ok(count)
    }
}

/// Records the terminal status of items claimed by one run.
///
/// Writes only land while the item is still claimed by `claimant`; an item
/// whose lease was taken over by another run is left to that run.
pub struct StatusTracker<S> {
    store: Arc<S>,
    claimant: String,
}

impl<S: Store> StatusTracker<S> {
    pub fn new(store: Arc<S>, claimant: impl Into<String>) -> Self {
        Self {
            store,
            claimant: claimant.into(),
        }
    }

    /// Returns `false` when the claim was lost and nothing was written.
    pub async fn mark_done(&self, id: ItemId) -> Result<bool> {
        self.write(id, ItemStatus::Done, None).await
    }

    pub async fn mark_error(&self, id: ItemId, reason: String) -> Result<bool> {
        self.write(id, ItemStatus::Error, Some(reason)).await
    }

    async fn write(&self, id: ItemId, status: ItemStatus, reason: Option<String>) -> Result<bool> {
        let claimant = self.claimant.clone();
        let written = run_blocking(&self.store, move |s| {
            s.finish_claim(id, &claimant, status, reason.as_deref())
        })
        .await?;
        if !written {
            warn!("Item {}: claim lost, {} not recorded", id, status);
        }
        Ok(written)
    }

    /// `done` for a reconciled item, `error` with a short reason otherwise.
    pub async fn finish(
        &self,
        id: ItemId,
        outcome: &std::result::Result<ItemReport, ProcessError>,
    ) -> Result<bool> {
        match outcome {
            Ok(_) => self.mark_done(id).await,
            Err(e) => {
                error!("Item {} failed: {}", id, e);
                self.mark_error(id, e.reason()).await
            }
        }
    }
}
