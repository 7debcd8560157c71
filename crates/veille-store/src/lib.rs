//! Veille Store — SQLite persistence for items, taxonomy and assignment edges.

pub mod schema;
pub mod sqlite;
pub mod store;
pub mod types;

pub use sqlite::SqliteStore;
pub use store::Store;
pub use types::*;
