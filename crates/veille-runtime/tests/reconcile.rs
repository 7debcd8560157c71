//! End-to-end reconciliation against a real SQLite store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{watch, Semaphore};

use veille_consensus::{ConsensusResolver, PromptTemplates};
use veille_core::{
    CategoryRow, EngineConfig, Error, Item, ItemId, ItemStatus, NodeId, NodeSet, Result,
    SubcategoryRow, Taxonomy,
};
use veille_oracle::{Oracle, OracleClient, OracleError, RetryPolicy, ScriptedOracle};
use veille_runtime::{Engine, ItemPipeline, JobSelector, PipelineSettings, ProcessError};
use veille_store::{AddItemOptions, SqliteStore, Store};

/// Store whose insertions can be made to fail on demand.
struct FailingInsertStore {
    inner: SqliteStore,
    fail_inserts: AtomicBool,
}

impl Store for FailingInsertStore {
    fn load_taxonomy(&self) -> Result<(Vec<CategoryRow>, Vec<SubcategoryRow>)> {
        self.inner.load_taxonomy()
    }
    fn claim_items(&self, limit: usize, claimant: &str) -> Result<Vec<ItemId>> {
        self.inner.claim_items(limit, claimant)
    }
    fn release_stale_claims(&self, older_than: Duration) -> Result<usize> {
        self.inner.release_stale_claims(older_than)
    }
    fn renew_claim(&self, id: ItemId, claimant: &str) -> Result<bool> {
        self.inner.renew_claim(id, claimant)
    }
    fn finish_claim(
        &self,
        id: ItemId,
        claimant: &str,
        status: ItemStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        self.inner.finish_claim(id, claimant, status, reason)
    }
    fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        self.inner.get_item(id)
    }
    fn get_assignments(&self, id: ItemId) -> Result<NodeSet> {
        self.inner.get_assignments(id)
    }
    fn delete_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize> {
        self.inner.delete_assignments(id, nodes)
    }
    fn insert_assignments(&self, id: ItemId, nodes: &NodeSet) -> Result<usize> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Database("disk I/O error".into()));
        }
        self.inner.insert_assignments(id, nodes)
    }
    fn ungraded_items(&self, limit: usize) -> Result<Vec<ItemId>> {
        self.inner.ungraded_items(limit)
    }
    fn set_grade(&self, id: ItemId, grade: &str) -> Result<()> {
        self.inner.set_grade(id, grade)
    }
    fn set_grade_error(&self, id: ItemId, reason: &str) -> Result<()> {
        self.inner.set_grade_error(id, reason)
    }
}

/// Answers nothing until permits are added to `gate`.
struct GatedOracle {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedOracle {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    async fn wait_for_call(&self) {
        while self.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Oracle for GatedOracle {
    async fn complete(&self, _prompt: &str) -> std::result::Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _pass = self
            .gate
            .acquire()
            .await
            .map_err(|_| OracleError::Transient("gate closed".into()))?;
        Ok(r#"{"CatX": ["SubA"]}"#.into())
    }
}

struct PanickingOracle;

impl Oracle for PanickingOracle {
    async fn complete(&self, _prompt: &str) -> std::result::Result<String, OracleError> {
        panic!("connection pool poisoned")
    }
}

struct Fixture {
    store: SqliteStore,
    cat_x: i64,
    sub_a: i64,
    sub_b: i64,
    other: i64,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("veille.db")).unwrap();
    let cat_x = store.add_category("CatX").unwrap();
    let sub_a = store.add_subcategory(cat_x, "SubA").unwrap();
    let sub_b = store.add_subcategory(cat_x, "SubB").unwrap();
    let other = store.add_subcategory(cat_x, "Autres").unwrap();
    Fixture {
        store,
        cat_x,
        sub_a,
        sub_b,
        other,
        _dir: dir,
    }
}

fn nodes(list: &[NodeId]) -> NodeSet {
    list.iter().copied().collect()
}

fn config() -> EngineConfig {
    EngineConfig {
        stagger_ms: 0,
        poll_interval_ms: 10,
        workers: 2,
        ..Default::default()
    }
}

struct Harness<S, O> {
    store: Arc<S>,
    client: Arc<OracleClient<O>>,
    taxonomy: Arc<Taxonomy>,
    resolver: Arc<ConsensusResolver<O>>,
}

impl<S: Store, O: Oracle> Harness<S, O> {
    fn new(store: Arc<S>, oracle: O) -> Self {
        let (categories, subcategories) = store.load_taxonomy().unwrap();
        let taxonomy = Arc::new(
            Taxonomy::from_rows(categories, subcategories)
                .with_fallback(config().fallback_subcategory),
        );
        let client = Arc::new(OracleClient::new(oracle, 3, RetryPolicy::immediate(3)));
        let resolver = Arc::new(ConsensusResolver::new(client.clone(), Duration::ZERO));
        Self {
            store,
            client,
            taxonomy,
            resolver,
        }
    }

    fn pipeline(&self) -> ItemPipeline<S, O> {
        ItemPipeline::new(
            self.store.clone(),
            self.taxonomy.clone(),
            Arc::new(PromptTemplates::default()),
            self.resolver.clone(),
            PipelineSettings::from(&config()),
        )
    }

    fn engine(&self) -> Engine<S, O> {
        self.engine_with(&config())
    }

    fn engine_with(&self, config: &EngineConfig) -> Engine<S, O> {
        Engine::from_config(
            self.store.clone(),
            self.taxonomy.clone(),
            Arc::new(PromptTemplates::default()),
            self.resolver.clone(),
            config,
        )
    }
}

#[tokio::test]
async fn consensus_adds_missing_subcategory() {
    let f = fixture();
    let id = f.store.add_item("Article", AddItemOptions::default()).unwrap();
    f.store
        .insert_assignments(id, &nodes(&[NodeId::Category(f.cat_x)]))
        .unwrap();

    let oracle = ScriptedOracle::new();
    oracle.push(r#"{"CatX": ["SubA"]}"#).push(r#"{"CatX": ["SubA"]}"#);
    let (cat_x, sub_a) = (f.cat_x, f.sub_a);
    let harness = Harness::new(Arc::new(f.store), oracle);

    let report = harness.pipeline().process(id).await.unwrap();
    assert!(!report.arbitrated);
    assert_eq!(report.diff.to_add, nodes(&[NodeId::Subcategory(sub_a)]));
    assert!(report.diff.to_remove.is_empty());
    assert_eq!(harness.client.oracle().calls(), 2);
    assert_eq!(
        harness.store.get_assignments(id).unwrap(),
        nodes(&[NodeId::Category(cat_x), NodeId::Subcategory(sub_a)])
    );
}

#[tokio::test]
async fn disagreement_is_arbitrated_and_swaps_subcategory() {
    let f = fixture();
    let id = f.store.add_item("Article", AddItemOptions::default()).unwrap();
    f.store
        .insert_assignments(
            id,
            &nodes(&[NodeId::Category(f.cat_x), NodeId::Subcategory(f.sub_a)]),
        )
        .unwrap();

    let oracle = ScriptedOracle::new();
    oracle
        .push(r#"{"CatX": ["SubA"]}"#)
        .push(r#"{"CatX": ["SubB"]}"#)
        .push(r#"{"CatX": ["SubB"]}"#);
    let (cat_x, sub_a, sub_b) = (f.cat_x, f.sub_a, f.sub_b);
    let harness = Harness::new(Arc::new(f.store), oracle);

    let report = harness.pipeline().process(id).await.unwrap();
    assert!(report.arbitrated);
    assert_eq!(report.diff.to_add, nodes(&[NodeId::Subcategory(sub_b)]));
    assert_eq!(report.diff.to_remove, nodes(&[NodeId::Subcategory(sub_a)]));

    let prompts = harness.client.oracle().prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[2].contains("Reviewer 1"));
    assert_eq!(
        harness.store.get_assignments(id).unwrap(),
        nodes(&[NodeId::Category(cat_x), NodeId::Subcategory(sub_b)])
    );
}

#[tokio::test]
async fn exhausted_retries_leave_item_in_error_and_untouched() {
    let f = fixture();
    let id = f.store.add_item("Article", AddItemOptions::default()).unwrap();
    let before = nodes(&[NodeId::Category(f.cat_x), NodeId::Subcategory(f.sub_a)]);
    f.store.insert_assignments(id, &before).unwrap();

    let oracle = ScriptedOracle::new();
    oracle.fallback(Err(OracleError::Transient("503 Service Unavailable".into())));
    let harness = Harness::new(Arc::new(f.store), oracle);

    let report = harness.engine().drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.done, 0);
    // Two calls, three attempts each.
    assert_eq!(harness.client.oracle().calls(), 6);

    let item = harness.store.get_item(id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Error);
    assert!(item.status_reason.unwrap().contains("call failed"));
    assert_eq!(harness.store.get_assignments(id).unwrap(), before);
}

#[tokio::test]
async fn failed_insert_marks_error_and_rerun_restores_consistency() {
    let f = fixture();
    let id = f.store.add_item("Article", AddItemOptions::default()).unwrap();
    f.store
        .insert_assignments(
            id,
            &nodes(&[NodeId::Category(f.cat_x), NodeId::Subcategory(f.sub_a)]),
        )
        .unwrap();
    let (cat_x, sub_b) = (f.cat_x, f.sub_b);
    let store = Arc::new(FailingInsertStore {
        inner: f.store,
        fail_inserts: AtomicBool::new(true),
    });

    let oracle = ScriptedOracle::new();
    oracle.fallback(Ok(r#"{"CatX": ["SubB"]}"#.into()));
    let harness = Harness::new(store.clone(), oracle);

    let first_run = harness.engine().drain().await.unwrap();
    assert_eq!(first_run.failed, 1);
    let item = store.get_item(id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Error);
    assert!(item.status_reason.unwrap().contains("insert failed"));
    // Deletion went through before the insertion failed.
    assert_eq!(
        store.get_assignments(id).unwrap(),
        nodes(&[NodeId::Category(cat_x)])
    );

    store.fail_inserts.store(false, Ordering::SeqCst);
    let second_run = harness.engine().drain().await.unwrap();
    assert_eq!(second_run.done, 1);
    assert_eq!(store.get_item(id).unwrap().unwrap().status, ItemStatus::Done);
    assert_eq!(
        store.get_assignments(id).unwrap(),
        nodes(&[NodeId::Category(cat_x), NodeId::Subcategory(sub_b)])
    );
}

#[tokio::test]
async fn unknown_names_are_dropped_and_empty_group_gets_fallback() {
    let f = fixture();
    let alpha = f.store.add_item("alpha-article", AddItemOptions::default()).unwrap();
    let beta = f.store.add_item("beta-article", AddItemOptions::default()).unwrap();
    for id in [alpha, beta] {
        f.store
            .insert_assignments(id, &nodes(&[NodeId::Category(f.cat_x)]))
            .unwrap();
    }

    let oracle = ScriptedOracle::new();
    oracle
        .rule("alpha-article", Ok(r#"{"CatX": ["SubA", "Ghost"], "CatZ": ["SubA"]}"#.into()))
        .rule("beta-article", Ok(r#"{"CatX": ["Autres"]}"#.into()));
    let (cat_x, sub_a, other) = (f.cat_x, f.sub_a, f.other);
    let harness = Harness::new(Arc::new(f.store), oracle);

    let report = harness.engine().drain().await.unwrap();
    assert_eq!(report.done, 2);
    assert_eq!(
        harness.store.get_assignments(alpha).unwrap(),
        nodes(&[NodeId::Category(cat_x), NodeId::Subcategory(sub_a)])
    );
    // The fallback is never a candidate, so it is dropped, then assigned
    // because the category was left empty.
    assert_eq!(
        harness.store.get_assignments(beta).unwrap(),
        nodes(&[NodeId::Category(cat_x), NodeId::Subcategory(other)])
    );
}

#[tokio::test]
async fn item_without_candidates_skips_oracle() {
    let f = fixture();
    let id = f.store.add_item("Orphan", AddItemOptions::default()).unwrap();
    let harness = Harness::new(Arc::new(f.store), ScriptedOracle::new());

    let report = harness.pipeline().process(id).await.unwrap();
    assert!(report.oracle_skipped);
    assert_eq!(harness.client.oracle().calls(), 0);
}

#[tokio::test]
async fn missing_item_is_an_error() {
    let f = fixture();
    let harness = Harness::new(Arc::new(f.store), ScriptedOracle::new());
    let err = harness.pipeline().process(4242).await.unwrap_err();
    assert!(matches!(err, ProcessError::NotFound(4242)));
}

#[tokio::test]
async fn run_stops_on_shutdown_after_work_is_done() {
    let f = fixture();
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = f
            .store
            .add_item(&format!("Article {}", i), AddItemOptions::default())
            .unwrap();
        f.store
            .insert_assignments(id, &nodes(&[NodeId::Category(f.cat_x)]))
            .unwrap();
        ids.push(id);
    }
    let oracle = ScriptedOracle::new();
    oracle.fallback(Ok(r#"{"CatX": ["SubB"]}"#.into()));
    let harness = Harness::new(Arc::new(f.store), oracle);
    let engine = harness.engine();

    let (tx, rx) = watch::channel(false);
    let store = harness.store.clone();
    let stopper = async move {
        loop {
            if store.status_counts().unwrap().done == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
    };
    let (report, ()) = tokio::join!(engine.run(rx), stopper);
    let report = report.unwrap();
    assert_eq!(report.done, 5);
    assert_eq!(report.arbitrated, 0);
    for id in ids {
        assert_eq!(harness.store.get_status(id).unwrap(), Some(ItemStatus::Done));
    }
}

#[tokio::test]
async fn shutdown_before_start_claims_nothing() {
    let f = fixture();
    let id = f.store.add_item("Article", AddItemOptions::default()).unwrap();
    let harness = Harness::new(Arc::new(f.store), ScriptedOracle::new());
    let (_tx, rx) = watch::channel(true);

    let report = harness.engine().run(rx).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(harness.store.get_status(id).unwrap(), Some(ItemStatus::Pending));
}

fn add_assigned_items(f: &Fixture, count: usize) -> Vec<ItemId> {
    (0..count)
        .map(|i| {
            let id = f
                .store
                .add_item(&format!("Article {}", i), AddItemOptions::default())
                .unwrap();
            f.store
                .insert_assignments(id, &nodes(&[NodeId::Category(f.cat_x)]))
                .unwrap();
            id
        })
        .collect()
}

#[tokio::test]
async fn panicking_item_is_recorded_as_error() {
    let f = fixture();
    let id = add_assigned_items(&f, 1)[0];
    let harness = Harness::new(Arc::new(f.store), PanickingOracle);

    let report = harness.engine().drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.done, 0);

    let item = harness.store.get_item(id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Error);
    assert!(item.status_reason.unwrap().contains("aborted"));
}

#[tokio::test]
async fn shutdown_mid_batch_finishes_started_item_and_releases_the_rest() {
    let f = fixture();
    let ids = add_assigned_items(&f, 3);
    let sub_a = f.sub_a;
    let harness = Harness::new(Arc::new(f.store), GatedOracle::new());
    let engine = harness.engine_with(&EngineConfig {
        workers: 1,
        batch_size: 3,
        ..config()
    });

    let (tx, rx) = watch::channel(false);
    let oracle = harness.client.oracle();
    let controller = async {
        oracle.wait_for_call().await;
        tx.send(true).unwrap();
        oracle.gate.add_permits(10);
    };
    let (report, ()) = tokio::join!(engine.run_batch(&rx), controller);
    let report = report.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.done, 1);
    assert_eq!(report.released, 2);
    assert_eq!(harness.store.get_status(ids[0]).unwrap(), Some(ItemStatus::Done));
    assert!(harness
        .store
        .get_assignments(ids[0])
        .unwrap()
        .contains(&NodeId::Subcategory(sub_a)));
    for &id in &ids[1..] {
        assert_eq!(harness.store.get_status(id).unwrap(), Some(ItemStatus::Pending));
        assert_eq!(harness.store.get_assignments(id).unwrap().len(), 1);
    }
}

#[tokio::test]
async fn slow_item_keeps_its_claim_past_the_lease() {
    let f = fixture();
    let id = add_assigned_items(&f, 1)[0];
    let harness = Harness::new(Arc::new(f.store), GatedOracle::new());
    let engine = harness.engine_with(&EngineConfig {
        workers: 1,
        lease_timeout_secs: 1,
        ..config()
    });

    let (_tx, rx) = watch::channel(false);
    let oracle = harness.client.oracle();
    let store = harness.store.clone();
    let controller = async {
        oracle.wait_for_call().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // Another run with the same lease finds nothing expired.
        let rival = JobSelector::new(store, 10, Duration::from_secs(1));
        let taken = rival.claim().await.unwrap();
        oracle.gate.add_permits(10);
        taken
    };
    let (report, taken) = tokio::join!(engine.run_batch(&rx), controller);

    assert!(taken.is_empty());
    assert_eq!(report.unwrap().done, 1);
    assert_eq!(harness.store.get_status(id).unwrap(), Some(ItemStatus::Done));
}
