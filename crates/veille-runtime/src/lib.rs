//! Veille Runtime — turns resolved classifications into persisted state.
//!
//! Job selector claims items, the item pipeline resolves and diffs them,
//! the persistence coordinator applies the diff, and the status tracker
//! records the terminal status. [`Engine`] drives the loop.

mod blocking;
pub mod coordinator;
pub mod diagnostics;
pub mod diff;
pub mod engine;
pub mod grading;
pub mod pipeline;
pub mod tracker;
pub mod types;

pub use coordinator::{ApplyError, PersistenceCoordinator};
pub use diagnostics::DiagnosticsSink;
pub use diff::{diff, Diff};
pub use engine::Engine;
pub use grading::{GradePipeline, GradeReport};
pub use pipeline::{ItemPipeline, PipelineSettings};
pub use tracker::{JobSelector, StatusTracker};
pub use types::*;
