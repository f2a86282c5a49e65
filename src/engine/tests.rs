//! Tests for engine module

use super::*;
use crate::config::{Channel, EngineConfig, Node, RouterDefinition};
use crate::cursor::ChangeRow;
use crate::error::{Error, Result};
use crate::gap::DataGap;
use crate::query::QuerySpec;
use crate::store::{ChangeLogStore, InMemoryStore, RoutingStore, RowStream};
use crate::types::{BatchAlgorithm, DataId, EventType, JsonObject, Timestamp};
use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixtures
// ============================================================================

fn config() -> EngineConfig {
    let mut config = EngineConfig::new("corp", "000");
    config.node_group_id = "corp".to_string();
    config.channels = vec![
        Channel::new("default"),
        Channel::new("sale"),
        {
            let mut off = Channel::new("off");
            off.enabled = false;
            off
        },
    ];
    config.nodes = vec![
        Node::new("000", "corp"),
        Node::new("001", "store"),
        Node::new("002", "store"),
    ];
    config.routers = vec![
        RouterDefinition::new("corp_2_store", "default", "store").with_source_table("item"),
        RouterDefinition::new("sale_2_store", "sale", "store"),
    ];
    config
}

fn item(channel: &str) -> ChangeRow {
    let mut values = JsonObject::new();
    values.insert("ITEM_ID".to_string(), json!("11000001"));
    ChangeRow::new(0, channel, "item", EventType::Insert, Utc::now())
        .with_row_data(&values)
        .with_pk_data(&values)
}

fn spans(gaps: &[DataGap]) -> Vec<(DataId, DataId)> {
    gaps.iter().map(|g| (g.start_id, g.end_id)).collect()
}

fn coordinator(config: &EngineConfig, store: &Arc<InMemoryStore>) -> RoutingCoordinator {
    RoutingCoordinator::new(config, store.clone(), store.clone()).unwrap()
}

async fn append_items(store: &InMemoryStore, channel: &str, count: usize) {
    for _ in 0..count {
        store.append(item(channel)).await;
    }
}

// ============================================================================
// Scripted Change Log
// ============================================================================

#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

/// Change log over an in-memory store that can fail, block or race a pass
struct ScriptedLog {
    inner: Arc<InMemoryStore>,
    failures: AtomicU32,
    executions: AtomicU32,
    gate: Option<Arc<Gate>>,
    backlog_gate: Option<Arc<Gate>>,
    interfere: AtomicBool,
}

impl ScriptedLog {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(0),
            executions: AtomicU32::new(0),
            gate: None,
            backlog_gate: None,
            interfere: AtomicBool::new(false),
        }
    }

    fn failing(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn gated_backlog(mut self, gate: Arc<Gate>) -> Self {
        self.backlog_gate = Some(gate);
        self
    }

    fn interfering(self) -> Self {
        self.interfere.store(true, Ordering::SeqCst);
        self
    }

    fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeLogStore for ScriptedLog {
    async fn execute_range_query(&self, query: &QuerySpec) -> Result<Box<dyn RowStream>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.interfere.swap(false, Ordering::SeqCst) {
            // another node rewrites the gaps while this pass is reading
            let snapshot = self.inner.load_gaps(&query.channel_id).await?;
            self.inner
                .replace_gaps(&query.channel_id, snapshot.gaps)
                .await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::query("connection reset by peer"));
        }
        self.inner.execute_range_query(query).await
    }

    async fn count_data_in_range(
        &self,
        channel_id: &str,
        start: DataId,
        end: DataId,
    ) -> Result<u64> {
        self.inner.count_data_in_range(channel_id, start, end).await
    }

    async fn count_unrouted(&self, channel_id: &str, after: DataId) -> Result<u64> {
        if let Some(gate) = &self.backlog_gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.inner.count_unrouted(channel_id, after).await
    }

    async fn earliest_transaction_start(&self) -> Result<Option<Timestamp>> {
        self.inner.earliest_transaction_start().await
    }
}

fn scripted(
    config: &EngineConfig,
    store: &Arc<InMemoryStore>,
    log: ScriptedLog,
) -> (Arc<RoutingCoordinator>, Arc<ScriptedLog>) {
    let log = Arc::new(log);
    let coordinator = RoutingCoordinator::new(config, log.clone(), store.clone()).unwrap();
    (Arc::new(coordinator), log)
}

// ============================================================================
// Routing Pass Tests
// ============================================================================

#[tokio::test]
async fn test_first_pass_routes_to_every_store_node() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 3).await;
    let coordinator = coordinator(&config(), &store);

    let report = coordinator
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_routed, 3);
    assert_eq!(report.batches_created, 2);
    assert!(report.all_data_read);
    assert_eq!(report.last_data_id, Some(3));
    assert_eq!(report.backlog, Some(0));
    assert_eq!(report.gap_version, 1);

    let batches = store.batches("default").await.unwrap();
    let targets: Vec<(&str, Vec<DataId>)> = batches
        .iter()
        .map(|b| (b.node_id.as_str(), b.data_ids.clone()))
        .collect();
    assert_eq!(targets, vec![("001", vec![1, 2, 3]), ("002", vec![1, 2, 3])]);

    let gaps = store.load_gaps("default").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(0, 0), (4, 50_000_003)]);
    assert_eq!(coordinator.pass_state("default").await, Some(PassState::Idle));
}

#[tokio::test]
async fn test_observed_id_splits_tail_gap() {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store
        .replace_gaps(
            "default",
            [DataGap::new(3, 3, now), DataGap::new(4, 50_000_004, now)],
        )
        .await;
    let mut row = item("default");
    row.data_id = 100;
    store.insert_row(row).await.unwrap();

    let report = coordinator(&config(), &store)
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.all_data_read);
    assert_eq!(report.gaps_deleted, 1);
    assert_eq!(report.gaps_inserted, 2);
    assert_eq!(report.gap_version, 2);

    let gaps = store.load_gaps("default").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(3, 3), (4, 99), (101, 50_000_100)]);

    let batches = store.batches("default").await.unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.data_ids == vec![100]));
}

#[tokio::test]
async fn test_empty_pass_still_commits() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 3).await;
    let coordinator = coordinator(&config(), &store);
    let cancel = CancellationToken::new();
    coordinator.route_channel("default", &cancel).await.unwrap();

    let report = coordinator.route_channel("default", &cancel).await.unwrap();

    assert_eq!(report.rows_read, 0);
    assert_eq!(report.batches_created, 0);
    assert_eq!(report.gaps_deleted + report.gaps_inserted, 0);
    assert_eq!(report.gap_version, 2);
    assert_eq!(report.backlog, Some(0));
    assert_eq!(store.batches("default").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_ids_continue_across_passes() {
    let store = Arc::new(InMemoryStore::new());
    let coordinator = coordinator(&config(), &store);
    let cancel = CancellationToken::new();

    append_items(&store, "default", 1).await;
    coordinator.route_channel("default", &cancel).await.unwrap();
    append_items(&store, "default", 1).await;
    coordinator.route_channel("default", &cancel).await.unwrap();

    let ids: Vec<i64> = store
        .batches("default")
        .await
        .unwrap()
        .iter()
        .map(|b| b.batch_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_rows_are_not_routed_back_or_to_unmatched_tables() {
    let store = Arc::new(InMemoryStore::new());
    store.append(item("default").with_source_node("001")).await;
    let mut audit = item("default");
    audit.table_name = "audit".to_string();
    store.append(audit).await;

    let report = coordinator(&config(), &store)
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows_read, 2);
    assert_eq!(report.rows_routed, 1);
    assert_eq!(report.rows_unrouted, 1);
    let batches = store.batches("default").await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].node_id, "002");
    assert_eq!(batches[0].data_ids, vec![1]);

    // unrouted rows are still consumed
    let gaps = store.load_gaps("default").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(0, 0), (3, 50_000_002)]);
}

#[tokio::test]
async fn test_row_limit_leaves_backlog() {
    let mut config = config();
    config.channels[0] = Channel::new("default")
        .with_max_data_to_route(2)
        .with_batch_algorithm(BatchAlgorithm::Nontransactional);
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 5).await;
    let coordinator = coordinator(&config, &store);
    let cancel = CancellationToken::new();

    let first = coordinator.route_channel("default", &cancel).await.unwrap();
    assert_eq!(first.rows_read, 2);
    assert!(!first.all_data_read);
    assert_eq!(first.backlog, Some(3));

    let second = coordinator.route_channel("default", &cancel).await.unwrap();
    assert_eq!(second.rows_read, 2);
    assert_eq!(second.last_data_id, Some(4));
    assert_eq!(second.backlog, Some(1));
}

#[tokio::test]
async fn test_unknown_channel() {
    let store = Arc::new(InMemoryStore::new());
    let err = coordinator(&config(), &store)
        .route_channel("missing", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelNotFound { channel_id } if channel_id == "missing"));
}

#[tokio::test]
async fn test_busy_timer_survives_new_coordinator() {
    let mut config = config();
    config.routing.stale_gap_busy_expire_ms = 0;
    config.channels[0] = Channel::new("default")
        .with_max_data_to_route(1)
        .with_batch_algorithm(BatchAlgorithm::Nontransactional);
    let store = Arc::new(InMemoryStore::new());
    let stale = Utc::now() - chrono::Duration::hours(2);
    store
        .replace_gaps(
            "default",
            [
                DataGap::new(5, 5, stale),
                DataGap::new(10, 50_000_010, Utc::now()),
            ],
        )
        .await;
    for data_id in 11..=13 {
        let mut row = item("default");
        row.data_id = data_id;
        store.insert_row(row).await.unwrap();
    }
    let cancel = CancellationToken::new();

    // each pass hits the row limit and runs on a fresh coordinator
    let first = coordinator(&config, &store)
        .route_channel("default", &cancel)
        .await
        .unwrap();
    assert!(!first.all_data_read);
    assert_eq!(first.gaps_deleted, 1);
    assert!(store.load_gaps("default").await.unwrap().last_busy_expire.is_some());

    let second = coordinator(&config, &store)
        .route_channel("default", &cancel)
        .await
        .unwrap();
    assert!(!second.all_data_read);
    assert_eq!(second.last_data_id, Some(12));

    let snapshot = store.load_gaps("default").await.unwrap();
    assert_eq!(spans(&snapshot.gaps), vec![(10, 10), (13, 50_000_012)]);
    assert!(snapshot.last_busy_expire.is_some());
}

#[tokio::test]
async fn test_transaction_view_expires_gaps_without_open_transactions() {
    let mut config = config();
    config.platform.supports_transaction_view = true;
    let store = Arc::new(InMemoryStore::new());
    store
        .replace_gaps(
            "default",
            [
                DataGap::new(5, 5, Utc::now()),
                DataGap::new(10, 50_000_010, Utc::now()),
            ],
        )
        .await;

    let report = coordinator(&config, &store)
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.all_data_read);
    assert_eq!(report.gaps_deleted, 1);
    let gaps = store.load_gaps("default").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(10, 50_000_010)]);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried_once() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 2).await;
    let (coordinator, log) = scripted(&config(), &store, ScriptedLog::new(store.clone()).failing(1));

    let report = coordinator
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(log.executions(), 2);
    assert_eq!(report.queries_executed, 2);
    assert_eq!(report.rows_routed, 2);
}

#[tokio::test]
async fn test_second_failure_fails_pass_without_commit() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 2).await;
    let (coordinator, log) = scripted(&config(), &store, ScriptedLog::new(store.clone()).failing(2));

    let err = coordinator
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(log.executions(), 2);
    match err {
        Error::PassFailed {
            channel_id,
            last_data_id,
            source,
        } => {
            assert_eq!(channel_id, "default");
            assert_eq!(last_data_id, None);
            assert!(matches!(*source, Error::QueryRetriesExhausted { attempts: 2, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.batches("default").await.unwrap().is_empty());
    assert_eq!(store.load_gaps("default").await.unwrap().version, 0);
    assert_eq!(coordinator.pass_state("default").await, Some(PassState::Failed));

    // the failure stays visible until the next pass
    let report = coordinator
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rows_routed, 2);
    assert_eq!(coordinator.pass_state("default").await, Some(PassState::Idle));
}

#[tokio::test]
async fn test_gap_conflict_rolls_back_and_next_pass_recovers() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 3).await;
    let (coordinator, _log) =
        scripted(&config(), &store, ScriptedLog::new(store.clone()).interfering());
    let cancel = CancellationToken::new();

    let err = coordinator.route_channel("default", &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        Error::PassFailed { ref source, .. } if matches!(**source, Error::GapConflict { .. })
    ));
    assert!(store.batches("default").await.unwrap().is_empty());

    let report = coordinator.route_channel("default", &cancel).await.unwrap();
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.batches_created, 2);
    let gaps = store.load_gaps("default").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(0, 0), (4, 50_000_003)]);
}

#[tokio::test]
async fn test_concurrent_pass_on_same_channel_is_busy() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 1).await;
    let gate = Arc::new(Gate::default());
    let (coordinator, _log) =
        scripted(&config(), &store, ScriptedLog::new(store.clone()).gated(gate.clone()));
    let cancel = CancellationToken::new();

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        async move { coordinator.route_channel("default", &cancel).await }
    });
    gate.entered.notified().await;

    assert_eq!(
        coordinator.pass_state("default").await,
        Some(PassState::Routing)
    );
    let err = coordinator.route_channel("default", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::ChannelBusy { .. }));

    gate.release.notify_one();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.rows_routed, 1);
}

#[tokio::test]
async fn test_cancellation_rolls_back() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 1).await;
    let gate = Arc::new(Gate::default());
    let (coordinator, _log) =
        scripted(&config(), &store, ScriptedLog::new(store.clone()).gated(gate.clone()));
    let cancel = CancellationToken::new();

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        async move { coordinator.route_channel("default", &cancel).await }
    });
    gate.entered.notified().await;
    cancel.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::PassFailed { ref source, .. } if matches!(**source, Error::Cancelled { .. })
    ));
    assert!(store.batches("default").await.unwrap().is_empty());
    assert_eq!(store.load_gaps("default").await.unwrap().version, 0);
}

#[tokio::test]
async fn test_timeout_rolls_back() {
    let mut config = config();
    config.routing.pass_timeout_ms = 50;
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 1).await;
    let gate = Arc::new(Gate::default());
    let (coordinator, _log) =
        scripted(&config, &store, ScriptedLog::new(store.clone()).gated(gate));

    let err = coordinator
        .route_channel("default", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::PassFailed { ref source, .. } if matches!(**source, Error::Timeout { timeout_ms: 50 })
    ));
    assert!(store.batches("default").await.unwrap().is_empty());
    assert_eq!(coordinator.pass_state("default").await, Some(PassState::Failed));
}

#[tokio::test]
async fn test_cancel_while_counting_backlog_keeps_commit() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 2).await;
    let gate = Arc::new(Gate::default());
    let (coordinator, _log) = scripted(
        &config(),
        &store,
        ScriptedLog::new(store.clone()).gated_backlog(gate.clone()),
    );
    let cancel = CancellationToken::new();

    let running = tokio::spawn({
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        async move { coordinator.route_channel("default", &cancel).await }
    });
    gate.entered.notified().await;
    cancel.cancel();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.batches_created, 2);
    assert_eq!(report.gap_version, 1);
    assert_eq!(report.last_data_id, Some(2));
    assert_eq!(report.backlog, None);
    assert_eq!(store.batches("default").await.unwrap().len(), 2);
    assert_eq!(store.load_gaps("default").await.unwrap().version, 1);
    assert_eq!(coordinator.pass_state("default").await, Some(PassState::Idle));
}

// ============================================================================
// Round Tests
// ============================================================================

#[tokio::test]
async fn test_route_all_enabled_channels() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 2).await;
    append_items(&store, "sale", 1).await;
    append_items(&store, "off", 4).await;
    let coordinator = Arc::new(coordinator(&config(), &store));

    let round = coordinator.route_all(&CancellationToken::new()).await;

    let channels: Vec<&str> = round.reports.iter().map(|r| r.channel_id.as_str()).collect();
    assert_eq!(channels, vec!["default", "sale"]);
    assert!(round.failures.is_empty());
    assert_eq!(round.stats.channels_routed, 2);
    assert_eq!(round.stats.channels_failed, 0);
    assert_eq!(round.stats.rows_read, 3);
    assert_eq!(round.stats.batches_created, 4);
    assert!(store.batches("off").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_route_all_collects_failures() {
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "default", 1).await;
    let (coordinator, _log) = scripted(&config(), &store, ScriptedLog::new(store.clone()).failing(4));

    let round = coordinator.route_all(&CancellationToken::new()).await;

    assert_eq!(round.stats.channels_failed, 2);
    assert_eq!(round.failures.len(), 2);
    assert!(round.reports.is_empty());
}

// ============================================================================
// Registry Tests
// ============================================================================

#[test]
fn test_registry_lookup() {
    let store = Arc::new(InMemoryStore::new());
    let mut registry = EngineRegistry::new();
    assert!(registry.is_empty());

    let mut other = config();
    other.engine_name = "branch".to_string();
    registry
        .register(Arc::new(coordinator(&config(), &store)))
        .unwrap();
    registry
        .register(Arc::new(coordinator(&other, &store)))
        .unwrap();

    assert_eq!(registry.names(), vec!["branch", "corp"]);
    assert_eq!(registry.get("corp").unwrap().engine_name(), "corp");
    assert!(matches!(
        registry.get("nope").unwrap_err(),
        Error::EngineNotFound { .. }
    ));

    let duplicate = registry.register(Arc::new(coordinator(&config(), &store)));
    assert!(duplicate.is_err());
    assert_eq!(registry.len(), 2);

    assert!(registry.remove("branch").is_some());
    assert_eq!(registry.names(), vec!["corp"]);
}

// ============================================================================
// Topology Tests
// ============================================================================

fn counting_loader(calls: Arc<AtomicUsize>) -> TopologyLoader {
    Arc::new(move || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let mut config = config();
        match call {
            0 => Ok(config),
            1 => {
                config.channels.push(Channel::new("late"));
                Ok(config)
            }
            _ => Err(Error::config("definition unavailable")),
        }
    })
}

#[test]
fn test_topology_refreshes_after_ttl() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = TopologyCache::reloading(counting_loader(calls.clone()), Duration::ZERO).unwrap();
    assert!(cache.peek().channel("late").is_none());

    assert!(cache.snapshot().channel("late").is_some());
    // failed reload keeps the previous snapshot
    assert!(cache.snapshot().channel("late").is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_topology_within_ttl_is_not_reloaded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache =
        TopologyCache::reloading(counting_loader(calls.clone()), Duration::from_secs(3600))
            .unwrap();

    let first = cache.snapshot();
    let second = cache.snapshot();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.channels().len(), 3);
    assert_eq!(first.router().router_count(), 2);
}

#[tokio::test]
async fn test_coordinator_sees_refreshed_channels() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = TopologyCache::reloading(counting_loader(calls), Duration::ZERO).unwrap();
    let store = Arc::new(InMemoryStore::new());
    append_items(&store, "late", 1).await;
    let coordinator = RoutingCoordinator::with_topology(&config(), cache, store.clone(), store.clone());

    let report = coordinator
        .route_channel("late", &CancellationToken::new())
        .await
        .unwrap();

    // no router serves the new channel yet
    assert_eq!(report.rows_read, 1);
    assert_eq!(report.rows_unrouted, 1);
}
