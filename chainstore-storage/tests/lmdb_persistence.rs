//! Embedded store persistence and cache hydration across store instances.

use chainstore_core::{EntityKind, Keyed};
use chainstore_storage::{ChainStore, DurableBackend, LmdbBackend};
use chainstore_test_utils::fixtures::{embedded_config, price, scenario_token};
use chainstore_test_utils::*;
use tempfile::TempDir;

#[tokio::test]
async fn facts_survive_restart_via_hydration() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let token = scenario_token();
    let vault = vault_record(1, 0x11);

    {
        // One worker keeps same-key writes in call order.
        let mut config = embedded_config(temp_dir.path());
        config.writer.workers = 1;
        let store = ChainStore::open(config).expect("open store");
        store.store_block_time(1, 100, 1_700_000_000);
        store.store_block_time(1, 100, 1_700_000_500);
        store.store_historical_price(1, 50, token, price("2000000"));
        store.store_registry_vault_event(registry_vault_event(1, 10));
        store.store_vault_record(vault.clone());
        store.store_block_time(2, 7, 1_600_000_000);
        store.shutdown().await;
    }

    let store = ChainStore::open(embedded_config(temp_dir.path())).expect("reopen store");
    assert_eq!(store.block_time(1, 100), None);

    let report = store.hydrate(1).await.expect("hydrate");
    assert_eq!(report.block_times, 1);
    assert_eq!(report.historical_prices, 1);
    assert_eq!(report.vault_records, 1);
    assert_eq!(report.registry_vault_events, 0);
    assert_eq!(report.skipped, 0);

    assert_eq!(store.block_time(1, 100), Some(1_700_000_500));
    assert_eq!(store.historical_price(1, 50, &token), Some(price("2000000")));
    assert_eq!(store.vault_record(1, &vault.address), Some(vault));
    assert!(store.registry_vault_events(1).is_empty());

    // Chain 2 is only loaded on request.
    assert_eq!(store.block_time(2, 7), None);
    store.hydrate(2).await.expect("hydrate chain 2");
    assert_eq!(store.block_time(2, 7), Some(1_600_000_000));

    store.shutdown().await;
}

#[tokio::test]
async fn hydration_keeps_values_stored_since_open() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");

    {
        let store = ChainStore::open(embedded_config(temp_dir.path())).expect("open store");
        store.store_block_time(1, 100, 1_700_000_000);
        store.store_block_time(1, 101, 1_700_000_012);
        store.shutdown().await;
    }

    let store = ChainStore::open(embedded_config(temp_dir.path())).expect("reopen store");
    store.store_block_time(1, 100, 1_700_000_500);

    let report = store.hydrate(1).await.expect("hydrate");
    assert_eq!(report.block_times, 1);
    assert_eq!(report.superseded, 1);
    assert_eq!(store.block_time(1, 100), Some(1_700_000_500));
    assert_eq!(store.block_time(1, 101), Some(1_700_000_012));

    store.shutdown().await;
}

#[tokio::test]
async fn hydration_skips_undecodable_entries() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let config = embedded_config(temp_dir.path());

    {
        let backend = LmdbBackend::open(&config.embedded).expect("open backend");
        backend
            .put(1, EntityKind::BlockTime, "5", b"not json")
            .expect("put");
        let good = BlockTime::new(1, 6, 600);
        backend
            .upsert(&chainstore_storage::DurableWrite::new(good))
            .await
            .expect("upsert");
    }

    let store = ChainStore::open(config).expect("open store");
    let report = store.hydrate(1).await.expect("hydrate");
    assert_eq!(report.block_times, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.block_time(1, 6), Some(600));
    assert_eq!(store.block_time(1, 5), None);
    store.shutdown().await;
}

#[tokio::test]
async fn embedded_tables_are_scoped_by_chain_and_kind() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let config = embedded_config(temp_dir.path());

    {
        let store = ChainStore::open(config.clone()).expect("open store");
        for result in store.store_block_time(1, 100, 1).settle().await {
            result.1.expect("write");
        }
        for result in store.store_block_time(2, 100, 2).settle().await {
            result.1.expect("write");
        }
        store.shutdown().await;
    }

    let backend = LmdbBackend::open(&config.embedded).expect("open backend");
    let chain1 = backend.entries(1, EntityKind::BlockTime).expect("entries");
    let chain2 = backend.entries(2, EntityKind::BlockTime).expect("entries");
    assert_eq!(chain1.len(), 1);
    assert_eq!(chain2.len(), 1);
    assert_eq!(chain1[0].0, BlockTime::new(1, 100, 0).composite_key());
    assert!(backend
        .entries(1, EntityKind::HistoricalPrice)
        .expect("entries")
        .is_empty());
}
