//! Runtime types: per-item outcomes and run reports.

use serde::Serialize;
use thiserror::Error;

use veille_consensus::ConsensusError;
use veille_core::ItemId;

use crate::coordinator::ApplyError;
use crate::diff::Diff;

/// Longest reason stored with an `error` status.
pub const MAX_REASON_CHARS: usize = 200;

/// Why one item could not be reconciled.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("item {0} not found")]
    NotFound(ItemId),

    #[error("store: {0}")]
    Store(#[from] veille_core::Error),

    #[error("consensus: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("apply: {0}")]
    Apply(#[from] ApplyError),

    #[error("claim on item {0} lost to another run")]
    ClaimLost(ItemId),

    #[error("item task aborted: {0}")]
    Aborted(String),
}

impl ProcessError {
    /// Short diagnostic kept in the item's `status_reason`.
    pub fn reason(&self) -> String {
        let full = self.to_string();
        match full.char_indices().nth(MAX_REASON_CHARS) {
            Some((cut, _)) => format!("{}...", &full[..cut]),
            None => full,
        }
    }
}

/// Edge writes performed by the persistence coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub removed: usize,
    pub added: usize,
}

/// Successful reconciliation of one item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item_id: ItemId,
    pub diff: Diff,
    pub applied: Applied,
    pub arbitrated: bool,
    /// No candidates: the oracle was not called and nothing changed.
    pub oracle_skipped: bool,
}

/// Counters for one batch or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub claimed: usize,
    pub done: usize,
    pub failed: usize,
    pub arbitrated: usize,
    /// Claimed but never started (shutdown), returned to `pending`.
    pub released: usize,
}

impl RunReport {
    pub fn record(&mut self, outcome: &Result<ItemReport, ProcessError>) {
        match outcome {
            Ok(report) => {
                self.done += 1;
                if report.arbitrated {
                    self.arbitrated += 1;
                }
            }
            Err(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &RunReport) {
        self.claimed += other.claimed;
        self.done += other.done;
        self.failed += other.failed;
        self.arbitrated += other.arbitrated;
        self.released += other.released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_is_bounded() {
        let err = ProcessError::Store(veille_core::Error::Database("x".repeat(500)));
        let reason = err.reason();
        assert_eq!(reason.chars().count(), MAX_REASON_CHARS + 3);
        assert!(reason.starts_with("store: Database error: xxx"));
        assert_eq!(ProcessError::NotFound(3).reason(), "item 3 not found");
    }

    #[test]
    fn test_report_counts() {
        let mut report = RunReport::default();
        report.record(&Ok(ItemReport {
            item_id: 1,
            diff: Diff::default(),
            applied: Applied::default(),
            arbitrated: true,
            oracle_skipped: false,
        }));
        report.record(&Err(ProcessError::NotFound(2)));
        assert_eq!((report.done, report.failed, report.arbitrated), (1, 1, 1));

        let mut total = RunReport { claimed: 2, ..Default::default() };
        total.merge(&report);
        assert_eq!(total.done, 1);
        assert_eq!(total.claimed, 2);
    }
}
