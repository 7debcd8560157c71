//! Row-level types returned by the store.

use serde::{Deserialize, Serialize};
use veille_core::ItemStatus;

/// Options for adding an item.
#[derive(Debug, Clone, Default)]
pub struct AddItemOptions {
    pub title: Option<String>,
    pub status: Option<ItemStatus>,
    pub created_at: Option<i64>,
}

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.done + self.error
    }
}
