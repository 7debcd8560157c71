//! Consensus resolution: two independent oracle calls per item, and a third
//! arbitration call when they disagree.
//!
//! The resolver is generic over a [`ConsensusTask`], which supplies prompts,
//! the decoder and the agreement predicate. Two tasks are provided: taxonomy
//! classification (per-category set equality) and evidence grading (scalar
//! equality).

pub mod classify;
pub mod grading;
pub mod prompt;
pub mod resolver;
pub mod task;

pub use classify::ClassifyTask;
pub use grading::{parse_grade, Grade, GradeTask};
pub use prompt::{render, truncate_content, PromptTemplates, PromptVariant};
pub use resolver::{ConsensusError, ConsensusResolver, Resolution};
pub use task::{ConsensusTask, Exchange, ExchangeSink, Stage};
