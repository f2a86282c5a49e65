//! Integration tests against the DuckDB store
//!
//! Routing passes run the rendered SQL against real DuckDB tables and commit
//! gaps and batches in DuckDB transactions.

use chrono::Utc;
use datagap_router::config::{Channel, EngineConfig, Node, RouterDefinition};
use datagap_router::cursor::ChangeRow;
use datagap_router::engine::RoutingCoordinator;
use datagap_router::gap::DataGap;
use datagap_router::query::{PlannerThresholds, RangeQueryPlanner};
use datagap_router::store::{DuckDbStore, RoutingStore};
use datagap_router::{DataId, EventType, JsonObject};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn engine() -> EngineConfig {
    let mut config = EngineConfig::new("corp", "000");
    config.channels = vec![Channel::new("item")];
    config.nodes = vec![Node::new("000", "corp"), Node::new("001", "store")];
    config.routers = vec![RouterDefinition::new("item_to_store", "item", "store")];
    config
}

fn item(price: &str) -> ChangeRow {
    let mut values = JsonObject::new();
    values.insert("ITEM_ID".to_string(), json!("110000055"));
    values.insert("PRICE".to_string(), json!(price));
    ChangeRow::new(0, "item", "item_selling_price", EventType::Update, Utc::now())
        .with_row_data(&values)
        .with_pk_data(&values)
}

fn spans(gaps: &[DataGap]) -> Vec<(DataId, DataId)> {
    gaps.iter().map(|g| (g.start_id, g.end_id)).collect()
}

async fn routed_ids(store: &DuckDbStore) -> Vec<Vec<DataId>> {
    store
        .batches("item")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.data_ids)
        .collect()
}

// ============================================================================
// DuckDB Routing Tests
// ============================================================================

#[tokio::test]
async fn test_duckdb_pass_routes_and_persists_gaps() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    store.append(&item("0.10")).unwrap();
    store.append(&item("0.20")).unwrap();
    let coordinator = RoutingCoordinator::new(&engine(), store.clone(), store.clone()).unwrap();

    let report = coordinator
        .route_channel("item", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows_read, 2);
    assert_eq!(report.batches_created, 1);
    assert_eq!(report.backlog, Some(0));
    assert_eq!(routed_ids(&store).await, vec![vec![1, 2]]);
    let gaps = store.load_gaps("item").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(0, 0), (3, 50_000_002)]);
}

#[tokio::test]
async fn test_duckdb_late_commits_fill_gaps_with_multiple_queries() {
    let mut config = engine();
    config.routing.max_gaps_to_qualify_in_sql = 2;
    config.routing.use_multiple_queries = true;
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let coordinator = RoutingCoordinator::new(&config, store.clone(), store.clone()).unwrap();
    let cancel = CancellationToken::new();

    let mut late = Vec::new();
    for _ in 0..3 {
        late.push(store.reserve_data_id().unwrap());
        store.append(&item("1.00")).unwrap();
    }
    coordinator.route_channel("item", &cancel).await.unwrap();
    let gaps = store.load_gaps("item").await.unwrap().gaps;
    assert_eq!(
        spans(&gaps),
        vec![(0, 1), (3, 3), (5, 5), (7, 50_000_006)]
    );

    for id in late {
        let mut row = item("2.00");
        row.data_id = id;
        store.insert_row(&row).unwrap();
    }
    let report = coordinator.route_channel("item", &cancel).await.unwrap();

    assert_eq!(report.queries_executed, 2);
    assert_eq!(report.rows_read, 3);
    assert!(report.all_data_read);
    assert_eq!(routed_ids(&store).await, vec![vec![2, 4, 6], vec![1, 3, 5]]);
    let gaps = store.load_gaps("item").await.unwrap().gaps;
    assert_eq!(spans(&gaps), vec![(0, 0), (7, 50_000_006)]);
}

#[tokio::test]
async fn test_duckdb_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routing.duckdb");

    {
        let store = Arc::new(DuckDbStore::open(&path).unwrap());
        store.append(&item("0.10")).unwrap();
        store.append(&item("0.20")).unwrap();
        RoutingCoordinator::new(&engine(), store.clone(), store.clone())
            .unwrap()
            .route_channel("item", &CancellationToken::new())
            .await
            .unwrap();
    }

    let store = Arc::new(DuckDbStore::open(&path).unwrap());
    assert_eq!(store.last_routed_data_id("item").await.unwrap(), Some(2));
    store.append(&item("0.30")).unwrap();

    let report = RoutingCoordinator::new(&engine(), store.clone(), store.clone())
        .unwrap()
        .route_channel("item", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.rows_read, 1);
    assert_eq!(report.last_data_id, Some(3));
    let batches = store.batches("item").await.unwrap();
    let ids: Vec<i64> = batches.iter().map(|b| b.batch_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(batches[1].data_ids, vec![3]);
}

#[test]
fn test_duckdb_plan_omits_disabled_column_groups() {
    let store = DuckDbStore::open_in_memory().unwrap();
    let config = engine();
    let channel = Channel::new("item").with_columns(false, true, true);
    let planner = RangeQueryPlanner::new(PlannerThresholds::from_config(
        &config.routing,
        &config.platform,
    ));
    let gaps = vec![
        DataGap::new(3, 3, Utc::now()),
        DataGap::new(7, i64::MAX, Utc::now()),
    ];

    let plan = planner.plan(&channel, &gaps);
    let rendered = store.render(&plan.queries[0]).unwrap();

    assert!(!rendered.sql.contains("pk_data"));
    assert!(rendered.sql.contains("row_data"));
    assert!(rendered.sql.contains("old_data"));
}
