//! Per-item reconciliation: fetch, resolve, diff, apply.
//!
//! Status is not written here; the engine hands the outcome to the
//! [`crate::StatusTracker`].

use std::sync::Arc;

use tracing::{debug, info};

use veille_consensus::{ClassifyTask, ConsensusResolver, PromptTemplates};
use veille_core::{CandidateScope, EngineConfig, ItemId, Taxonomy};
use veille_oracle::Oracle;
use veille_store::Store;

use crate::blocking::run_blocking;
use crate::coordinator::PersistenceCoordinator;
use crate::diff::diff;
use crate::types::{Applied, ItemReport, ProcessError};

/// Knobs of the item pipeline, taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub candidate_scope: CandidateScope,
    pub max_content_chars: usize,
    pub max_subcategories: usize,
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            candidate_scope: config.candidate_scope,
            max_content_chars: config.max_content_chars,
            max_subcategories: config.max_subcategories,
        }
    }
}

pub struct ItemPipeline<S, O> {
    store: Arc<S>,
    taxonomy: Arc<Taxonomy>,
    templates: Arc<PromptTemplates>,
    resolver: Arc<ConsensusResolver<O>>,
    coordinator: PersistenceCoordinator<S>,
    settings: PipelineSettings,
}

impl<S: Store, O: Oracle> ItemPipeline<S, O> {
    pub fn new(
        store: Arc<S>,
        taxonomy: Arc<Taxonomy>,
        templates: Arc<PromptTemplates>,
        resolver: Arc<ConsensusResolver<O>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            coordinator: PersistenceCoordinator::new(store.clone()),
            store,
            taxonomy,
            templates,
            resolver,
            settings,
        }
    }

    /// Apply diffs only while `claimant` still holds the item.
    pub fn with_claimant(mut self, claimant: impl Into<String>) -> Self {
        self.coordinator = self.coordinator.with_claimant(claimant);
        self
    }

    /// Reconcile one claimed item against a fresh read of its assignments.
    pub async fn process(&self, item_id: ItemId) -> Result<ItemReport, ProcessError> {
        let (item, current) = run_blocking(&self.store, move |s| {
            let item = s.get_item(item_id)?;
            let current = s.get_assignments(item_id)?;
            Ok((item, current))
        })
        .await?;
        let item = item.ok_or(ProcessError::NotFound(item_id))?;

        let candidates = self
            .taxonomy
            .candidates(&current, self.settings.candidate_scope);
        if candidates.is_empty() {
            info!("Item {}: no candidate categories, skipping oracle", item_id);
            return Ok(ItemReport {
                item_id,
                diff: Default::default(),
                applied: Applied::default(),
                arbitrated: false,
                oracle_skipped: true,
            });
        }

        let described = self.taxonomy.describe(&current);
        let task = ClassifyTask {
            item: &item,
            current: &described,
            candidates: &candidates,
            templates: &self.templates,
            max_content_chars: self.settings.max_content_chars,
            max_subcategories: self.settings.max_subcategories,
        };
        let resolution = self.resolver.resolve(&task).await?;

        let target = self.taxonomy.resolve(&resolution.output);
        let diff = diff(&current, &target);
        debug!(
            "Item {}: current {:?}, target {:?}",
            item_id, current, target
        );

        let applied = self.coordinator.apply(item_id, &diff).await?;
        let (cats_added, subs_added, cats_removed, subs_removed) = diff.counts();
        info!(
            "Item {}: +{} categories +{} subcategories, -{} categories -{} subcategories{}",
            item_id,
            cats_added,
            subs_added,
            cats_removed,
            subs_removed,
            if resolution.arbitrated { " (arbitrated)" } else { "" }
        );

        Ok(ItemReport {
            item_id,
            diff,
            applied,
            arbitrated: resolution.arbitrated,
            oracle_skipped: false,
        })
    }
}
