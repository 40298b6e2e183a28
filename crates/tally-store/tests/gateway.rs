//! The registry running against a real SQLite store.

use tally_core::{PushEvent, RegistryOptions, SeriesRegistry};
use tally_store::{RowQuery, Store};
use tempfile::TempDir;
use time::OffsetDateTime;

fn db_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("nested").join("data.db")
}

#[tokio::test]
async fn test_cycle_writes_aggregated_rows() {
    let store = Store::open_in_memory().unwrap();
    let registry = SeriesRegistry::load(store, RegistryOptions::default())
        .await
        .unwrap();

    registry.push(PushEvent::new("cpu", 3.0)).await.unwrap();
    registry.push(PushEvent::new("cpu", 4.0)).await.unwrap();
    registry
        .push(PushEvent::new("cpu", 1.0).object_id(2).meta("host=a").comment("deploy"))
        .await
        .unwrap();

    let report = registry.synchronize().await.unwrap();
    assert_eq!(report.flushed_series, 1);
    assert_eq!(report.rows, 2);

    let store = registry.gateway().lock().await;
    assert!(!store.in_transaction());

    let series = store.find_series("cpu").unwrap().unwrap();
    let totals = store.sum_rows(series.id).unwrap();
    assert_eq!(totals.rows, 2);
    assert_eq!(totals.value, 8.0);
    assert_eq!(totals.amount, 3);
    assert_eq!(store.count_meta(Some(series.id)).unwrap(), 1);
    assert_eq!(store.count_comments(Some(series.id)).unwrap(), 1);

    let rows = store
        .query_rows(&RowQuery::new().series(series.id).object(0))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, 2);
    assert!(series.updated_at >= series.added_at);
}

#[tokio::test]
async fn test_non_finite_push_does_not_block_sync() {
    let store = Store::open_in_memory().unwrap();
    let registry = SeriesRegistry::new(store, RegistryOptions::default());

    assert!(registry.push(PushEvent::new("bad", f64::NAN)).await.is_err());
    assert!(registry.push(PushEvent::new("bad", f64::INFINITY)).await.is_err());
    registry.push(PushEvent::new("good", 5.0)).await.unwrap();

    for _ in 0..3 {
        registry.synchronize().await.unwrap();
    }

    let info = registry.info("good").await.unwrap();
    assert!(!info.dirty);
    assert_eq!(info.unflushed, 0);
    let store = registry.gateway().lock().await;
    assert_eq!(store.count_rows(None).unwrap(), 1);
    assert!(store.find_series("bad").unwrap().is_none());
}

#[tokio::test]
async fn test_second_cycle_writes_nothing_new() {
    let store = Store::open_in_memory().unwrap();
    let registry = SeriesRegistry::new(store, RegistryOptions::default());

    registry.push(PushEvent::new("cpu", 1.0)).await.unwrap();
    registry.synchronize().await.unwrap();
    let report = registry.synchronize().await.unwrap();

    assert_eq!(report.flushed_series, 0);
    assert_eq!(registry.gateway().lock().await.count_rows(None).unwrap(), 1);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let id = {
        let store = Store::open(&path).unwrap();
        let registry = SeriesRegistry::new(store, RegistryOptions::default());
        registry.push(PushEvent::new("orders", 2.0)).await.unwrap();
        registry.synchronize().await.unwrap();
        registry.info("orders").await.unwrap().id
    };

    let store = Store::open(&path).unwrap();
    let registry = SeriesRegistry::load(store, RegistryOptions::default())
        .await
        .unwrap();

    let info = registry.info("orders").await.unwrap();
    assert_eq!(info.id, id);
    assert!(!info.dirty);

    // New events go to the existing store row.
    registry.push(PushEvent::new("orders", 1.0)).await.unwrap();
    registry.synchronize().await.unwrap();
    let store = registry.gateway().lock().await;
    assert_eq!(store.count_series().unwrap(), 1);
    assert_eq!(store.sum_rows(id).unwrap().value, 3.0);
}

#[tokio::test]
async fn test_create_adopts_row_written_by_another_process() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let store = Store::open(&path).unwrap();
    let registry = SeriesRegistry::new(store, RegistryOptions::default());

    let mut other = Store::open(&path).unwrap();
    let external_id = other.add_series("cpu", OffsetDateTime::now_utc()).unwrap();

    let series = registry.create("cpu").await.unwrap();
    assert_eq!(series.lock().await.id(), external_id);
    assert_eq!(other.count_series().unwrap(), 1);
}

#[tokio::test]
async fn test_reload_picks_up_external_series() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let store = Store::open(&path).unwrap();
    let registry = SeriesRegistry::new(store, RegistryOptions::default());

    let mut other = Store::open(&path).unwrap();
    other.add_series("mem", OffsetDateTime::now_utc()).unwrap();

    let report = registry.synchronize().await.unwrap();
    assert_eq!(report.discovered, 1);
    assert_eq!(registry.titles().await, vec!["mem".to_string()]);
}
