//! Veille Core — shared types, the run-scoped taxonomy context, configuration.

pub mod config;
pub mod error;
pub mod taxonomy;
pub mod types;

pub use config::{CandidateScope, EngineConfig};
pub use error::{Error, Result};
pub use taxonomy::{CategoryRow, SubcategoryRow, Taxonomy};
pub use types::*;
