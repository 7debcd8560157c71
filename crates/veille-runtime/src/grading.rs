//! Evidence grading through the consensus resolver, one item or every
//! ungraded item in batches.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use veille_consensus::{ConsensusResolver, Grade, GradeTask, PromptTemplates};
use veille_core::{ItemId, Result};
use veille_oracle::Oracle;
use veille_store::Store;

use crate::blocking::run_blocking;
use crate::types::ProcessError;

/// Counters of one grading pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeReport {
    pub graded: usize,
    pub failed: usize,
}

pub struct GradePipeline<S, O> {
    store: Arc<S>,
    templates: Arc<PromptTemplates>,
    resolver: Arc<ConsensusResolver<O>>,
    max_content_chars: usize,
}

impl<S: Store, O: Oracle> GradePipeline<S, O> {
    pub fn new(
        store: Arc<S>,
        templates: Arc<PromptTemplates>,
        resolver: Arc<ConsensusResolver<O>>,
        max_content_chars: usize,
    ) -> Self {
        Self {
            store,
            templates,
            resolver,
            max_content_chars,
        }
    }

    /// Resolve and store the grade of one item. Item status is left alone.
    pub async fn grade(&self, item_id: ItemId) -> std::result::Result<Grade, ProcessError> {
        let item = run_blocking(&self.store, move |s| s.get_item(item_id))
            .await?
            .ok_or(ProcessError::NotFound(item_id))?;

        let task = GradeTask {
            item: &item,
            templates: &self.templates,
            max_content_chars: self.max_content_chars,
        };
        let resolution = self.resolver.resolve(&task).await?;
        let grade = resolution.output;

        let stored = grade.as_stored();
        run_blocking(&self.store, move |s| s.set_grade(item_id, stored)).await?;
        info!("Item {}: graded {} (stored as {})", item_id, grade, stored);
        Ok(grade)
    }

    /// Grade every item without a grade, `batch_size` at a time. A failed
    /// item is marked as a grading error and not retried by later passes.
    pub async fn grade_pending(&self, batch_size: usize) -> Result<GradeReport> {
        let limit = batch_size.max(1);
        let mut report = GradeReport::default();
        loop {
            let ids = run_blocking(&self.store, move |s| s.ungraded_items(limit)).await?;
            if ids.is_empty() {
                break;
            }
            for id in ids {
                match self.grade(id).await {
                    Ok(_) => report.graded += 1,
                    Err(e) => {
                        error!("Item {}: grading failed: {}", id, e);
                        let reason = e.reason();
                        run_blocking(&self.store, move |s| s.set_grade_error(id, &reason)).await?;
                        report.failed += 1;
                    }
                }
            }
        }
        info!(
            "Grading finished: {} graded, {} failed",
            report.graded, report.failed
        );
        Ok(report)
    }
}
