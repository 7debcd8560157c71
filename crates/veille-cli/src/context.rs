//! Wiring: store, taxonomy, templates and the consensus resolver for one run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use veille_consensus::{ConsensusResolver, PromptTemplates};
use veille_core::{EngineConfig, Taxonomy};
use veille_oracle::{HttpOracle, OracleClient, OracleConfig};
use veille_runtime::{DiagnosticsSink, Engine, GradePipeline};
use veille_store::{SqliteStore, Store};

/// Engine config file: `VEILLE_CONFIG`, else `veille.json` when present.
pub fn engine_config_path() -> Option<PathBuf> {
    config_path("VEILLE_CONFIG", "veille.json")
}

/// Oracle config file: `VEILLE_ORACLE_CONFIG`, else `oracle.json` when present.
pub fn oracle_config_path() -> Option<PathBuf> {
    config_path("VEILLE_ORACLE_CONFIG", "oracle.json")
}

fn config_path(var: &str, default: &str) -> Option<PathBuf> {
    match std::env::var(var) {
        Ok(path) => Some(PathBuf::from(path)),
        Err(_) => {
            let path = PathBuf::from(default);
            path.exists().then_some(path)
        }
    }
}

pub fn open_store(config: &EngineConfig) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .map_err(|e| anyhow!("Failed to open store {}: {}", config.db_path.display(), e))
}

pub struct Context {
    config: EngineConfig,
    store: Arc<SqliteStore>,
    taxonomy: Arc<Taxonomy>,
    templates: Arc<PromptTemplates>,
    resolver: Arc<ConsensusResolver<HttpOracle>>,
}

impl Context {
    pub fn build(config: EngineConfig, oracle_config: &OracleConfig) -> anyhow::Result<Self> {
        let store = open_store(&config)?;
        info!("Database: {}", config.db_path.display());

        let (categories, subcategories) = store.load_taxonomy()?;
        let taxonomy = Taxonomy::from_rows(categories, subcategories)
            .with_fallback(config.fallback_subcategory.clone());
        info!(
            "Taxonomy loaded: {} categories, {} subcategories",
            taxonomy.category_count(),
            taxonomy.subcategory_count()
        );

        let templates = PromptTemplates::load(config.prompt_dir.as_deref())?;

        let oracle = HttpOracle::new(oracle_config)?;
        info!(
            "Oracle: {} / {} ({} permits, {} attempts per call)",
            oracle.provider(),
            oracle.model(),
            oracle_config.permits,
            oracle_config.max_attempts
        );
        let client = Arc::new(OracleClient::new(
            oracle,
            oracle_config.permits,
            oracle_config.retry_policy(),
        ));

        let mut resolver = ConsensusResolver::new(client, config.stagger());
        if let Some(dir) = &config.diagnostics_dir {
            let sink = DiagnosticsSink::new(dir)?;
            info!("Writing oracle diagnostics to {}", sink.dir().display());
            resolver = resolver.with_sink(Arc::new(sink));
        }

        Ok(Self {
            config,
            store: Arc::new(store),
            taxonomy: Arc::new(taxonomy),
            templates: Arc::new(templates),
            resolver: Arc::new(resolver),
        })
    }

    pub fn engine(&self) -> Engine<SqliteStore, HttpOracle> {
        Engine::from_config(
            self.store.clone(),
            self.taxonomy.clone(),
            self.templates.clone(),
            self.resolver.clone(),
            &self.config,
        )
    }

    pub fn grader(&self) -> GradePipeline<SqliteStore, HttpOracle> {
        GradePipeline::new(
            self.store.clone(),
            self.templates.clone(),
            self.resolver.clone(),
            self.config.max_content_chars,
        )
    }
}
