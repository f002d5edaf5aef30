//! The store facade: cache first, durable write in the background.

use std::sync::Arc;

use chainstore_core::{
    block_time_key, historical_price_key, Address, BackendMode, BlockNumber, BlockTime, ChainId,
    Entity, EntityKind, HistoricalPrice, Keyed, RegistryVaultEvent, StoreConfig, StoreResult,
    VaultRecord, I256,
};
use tracing::{debug, info, warn};

use crate::backend::{DurableBackend, LmdbBackend, NoOpBackend, PostgresBackend};
use crate::cache::EntityCaches;
use crate::dispatcher::{BackendDispatcher, Submission};
use crate::metrics::{WriteMetrics, WriteMetricsSnapshot};
use crate::rate_governor::RateGovernor;
use crate::writer::WriterPool;

/// Counts of entries loaded by [`ChainStore::hydrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HydrationReport {
    pub chain_id: ChainId,
    pub block_times: usize,
    pub historical_prices: usize,
    pub registry_vault_events: usize,
    pub vault_records: usize,
    /// Entries that could not be decoded.
    pub skipped: usize,
    /// Entries left alone because the cache already held a value for the key.
    pub superseded: usize,
}

impl HydrationReport {
    pub fn loaded(&self) -> usize {
        self.block_times + self.historical_prices + self.registry_vault_events + self.vault_records
    }
}

/// Per-chain cache of chain facts with best-effort durable persistence.
///
/// Every `store_*` call updates the cache before returning, so the value is
/// visible to the next read on any thread. The durable write is queued for
/// the background worker pool and never reported as an error here; the
/// returned [`Submission`] carries a receipt per target for callers that
/// want to observe it.
///
/// # Example
///
/// ```ignore
/// use chainstore_core::StoreConfig;
/// use chainstore_storage::ChainStore;
///
/// let store = ChainStore::open(StoreConfig::from_env()?)?;
/// store.store_block_time(1, 100, 1_700_000_000);
/// assert_eq!(store.block_time(1, 100), Some(1_700_000_000));
/// store.shutdown().await;
/// ```
pub struct ChainStore {
    config: StoreConfig,
    caches: EntityCaches,
    dispatcher: BackendDispatcher,
    metrics: Arc<WriteMetrics>,
}

impl ChainStore {
    /// Open the backends selected by `config` and start the write pool.
    ///
    /// The relational mode also opens the embedded store, which mirrors
    /// vault records. Except in `none` mode this must be called from within
    /// a Tokio runtime.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let embedded: Arc<dyn DurableBackend> = match config.backend {
            BackendMode::None => Arc::new(NoOpBackend),
            BackendMode::EmbeddedKv | BackendMode::Relational => {
                Arc::new(LmdbBackend::open(&config.embedded)?)
            }
        };
        let relational: Arc<dyn DurableBackend> = match config.backend {
            BackendMode::Relational => Arc::new(PostgresBackend::connect(&config.relational)?),
            _ => Arc::new(NoOpBackend),
        };

        info!(
            backend = %config.backend,
            "Opening chain store"
        );
        Ok(Self::with_backends(config, embedded, relational))
    }

    /// Build a store around already constructed backends.
    ///
    /// Pass [`NoOpBackend`] for a slot that should stay empty.
    pub fn with_backends(
        config: StoreConfig,
        embedded: Arc<dyn DurableBackend>,
        relational: Arc<dyn DurableBackend>,
    ) -> Self {
        let metrics = Arc::new(WriteMetrics::new());
        let writer = match config.backend {
            BackendMode::None => WriterPool::disabled(),
            BackendMode::EmbeddedKv | BackendMode::Relational => WriterPool::spawn(
                config.writer,
                Arc::new(RateGovernor::new(config.governor)),
                Arc::clone(&metrics),
            ),
        };
        let dispatcher = BackendDispatcher::new(
            config.backend,
            embedded,
            relational,
            writer,
            Arc::clone(&metrics),
        );

        Self {
            config,
            caches: EntityCaches::new(),
            dispatcher,
            metrics,
        }
    }

    /// Cache-only store. Needs no runtime.
    pub fn in_memory() -> Self {
        Self::with_backends(
            StoreConfig::in_memory(),
            Arc::new(NoOpBackend),
            Arc::new(NoOpBackend),
        )
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_mode(&self) -> BackendMode {
        self.config.backend
    }

    // ========================================================================
    // STORE OPERATIONS
    // ========================================================================

    /// Record the timestamp at which `block_number` was mined.
    pub fn store_block_time(
        &self,
        chain_id: ChainId,
        block_number: BlockNumber,
        timestamp: u64,
    ) -> Submission {
        let entity = BlockTime::new(chain_id, block_number, timestamp);
        self.caches.block_times.put(entity);
        self.submit(entity)
    }

    /// Record the price of `token` at `block_number`.
    pub fn store_historical_price(
        &self,
        chain_id: ChainId,
        block_number: BlockNumber,
        token: Address,
        price: I256,
    ) -> Submission {
        let entity = HistoricalPrice::new(chain_id, block_number, token, price);
        self.caches.historical_prices.put(entity.clone());
        self.submit(entity)
    }

    /// Record a vault discovered through a registry event.
    pub fn store_registry_vault_event(&self, event: RegistryVaultEvent) -> Submission {
        self.caches.registry_vault_events.put(event.clone());
        self.submit(event)
    }

    /// Record the current definition of a vault.
    pub fn store_vault_record(&self, vault: VaultRecord) -> Submission {
        self.caches.vault_records.put(vault.clone());
        self.submit(vault)
    }

    fn submit<E: Keyed + Into<Entity>>(&self, entity: E) -> Submission {
        debug!(
            chain_id = entity.chain_id(),
            kind = %E::kind(),
            key = %entity.composite_key(),
            "Stored in cache"
        );
        self.dispatcher.dispatch(entity)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Timestamp of `block_number`, if known.
    pub fn block_time(&self, chain_id: ChainId, block_number: BlockNumber) -> Option<u64> {
        self.caches
            .block_times
            .load(chain_id, block_time_key(block_number).as_str())
            .map(|bt| bt.timestamp)
    }

    /// Price of `token` at `block_number`, if known.
    pub fn historical_price(
        &self,
        chain_id: ChainId,
        block_number: BlockNumber,
        token: &Address,
    ) -> Option<I256> {
        self.caches
            .historical_prices
            .load(chain_id, historical_price_key(block_number, token).as_str())
            .map(|hp| hp.price)
    }

    /// Every registry event cached for `chain_id`, ordered by block then log.
    pub fn registry_vault_events(&self, chain_id: ChainId) -> Vec<RegistryVaultEvent> {
        let mut events = self.caches.registry_vault_events.values(chain_id);
        events.sort_by_key(|e| (e.block_number, e.tx_index, e.log_index));
        events
    }

    /// Latest record for the vault at `address`.
    ///
    /// Scans the chain's vaults; when several records share the address the
    /// one with the highest activation wins.
    pub fn vault_record(&self, chain_id: ChainId, address: &Address) -> Option<VaultRecord> {
        self.caches
            .vault_records
            .values(chain_id)
            .into_iter()
            .filter(|v| v.address == *address)
            .max_by_key(|v| v.activation)
    }

    /// Every vault record cached for `chain_id`, ordered by address.
    pub fn vault_records(&self, chain_id: ChainId) -> Vec<VaultRecord> {
        let mut vaults = self.caches.vault_records.values(chain_id);
        vaults.sort_by(|a, b| (a.address, a.activation).cmp(&(b.address, b.activation)));
        vaults
    }

    /// Direct access to the per-kind caches, for loads by raw key.
    pub fn caches(&self) -> &EntityCaches {
        &self.caches
    }

    pub fn metrics(&self) -> WriteMetricsSnapshot {
        self.metrics.snapshot()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Load what the embedded store holds for `chain_id` into the cache.
    ///
    /// Only kinds the embedded store persists are read. Keys the cache
    /// already holds keep their cached value. Entries that fail to decode
    /// are skipped and counted. Without an embedded backend this is
    /// a no-op.
    pub async fn hydrate(&self, chain_id: ChainId) -> StoreResult<HydrationReport> {
        let mut report = HydrationReport {
            chain_id,
            ..HydrationReport::default()
        };
        let Some(backend) = self.dispatcher.backend(BackendMode::EmbeddedKv) else {
            return Ok(report);
        };

        for kind in EntityKind::ALL {
            if !kind.supports(BackendMode::EmbeddedKv) {
                continue;
            }

            for (key, bytes) in backend.scan(chain_id, kind).await? {
                let entity = match Entity::from_json(kind, &bytes) {
                    Ok(entity) => entity,
                    Err(e) => {
                        warn!(
                            chain_id,
                            kind = %kind,
                            key = %key,
                            error = %e,
                            "Skipping undecodable entry"
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                match entity {
                    Entity::BlockTime(e) => {
                        if self.caches.block_times.store_if_absent(chain_id, key, e) {
                            report.block_times += 1;
                        } else {
                            report.superseded += 1;
                        }
                    }
                    Entity::HistoricalPrice(e) => {
                        if self.caches.historical_prices.store_if_absent(chain_id, key, e) {
                            report.historical_prices += 1;
                        } else {
                            report.superseded += 1;
                        }
                    }
                    Entity::RegistryVaultEvent(e) => {
                        if self.caches.registry_vault_events.store_if_absent(chain_id, key, e) {
                            report.registry_vault_events += 1;
                        } else {
                            report.superseded += 1;
                        }
                    }
                    Entity::VaultRecord(e) => {
                        if self.caches.vault_records.store_if_absent(chain_id, key, e) {
                            report.vault_records += 1;
                        } else {
                            report.superseded += 1;
                        }
                    }
                }
            }
        }

        info!(
            chain_id,
            loaded = report.loaded(),
            skipped = report.skipped,
            superseded = report.superseded,
            "Hydrated cache from embedded store"
        );
        Ok(report)
    }

    /// Stop accepting durable writes and wait for queued ones to finish.
    /// Later `store_*` calls still update the cache; their durable writes
    /// are rejected.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        let snapshot = self.metrics.snapshot();
        info!(
            written = snapshot.written,
            failed = snapshot.failed,
            rejected = snapshot.rejected,
            "Chain store shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::dispatcher::{Dispatch, SkipReason};

    fn price(value: &str) -> I256 {
        I256::from_dec_str(value).expect("valid decimal")
    }

    #[test]
    fn test_block_time_scenario() {
        let store = ChainStore::in_memory();
        store.store_block_time(1, 100, 1_700_000_000);
        assert_eq!(store.block_time(1, 100), Some(1_700_000_000));

        store.store_block_time(1, 100, 1_700_000_500);
        assert_eq!(store.block_time(1, 100), Some(1_700_000_500));
        assert_eq!(store.block_time(2, 100), None);
    }

    #[test]
    fn test_none_mode_reports_disabled() {
        let store = ChainStore::in_memory();
        let submission = store.store_block_time(1, 1, 1);
        assert!(matches!(
            submission.dispatches.as_slice(),
            [Dispatch::Skipped {
                reason: SkipReason::Disabled,
                ..
            }]
        ));
        assert_eq!(store.metrics().submitted, 0);
    }

    #[test]
    fn test_historical_price_latest_wins() {
        let store = ChainStore::in_memory();
        let token = Address::repeat_byte(0xAA);
        store.store_historical_price(1, 50, token, price("1000000"));
        store.store_historical_price(1, 50, token, price("2000000"));

        assert_eq!(store.historical_price(1, 50, &token), Some(price("2000000")));
        let key = historical_price_key(50, &token);
        assert!(store.caches().historical_prices.contains(1, key.as_str()));
    }

    #[tokio::test]
    async fn test_embedded_mode_with_recording_backend() {
        let embedded = Arc::new(RecordingBackend::new(BackendMode::EmbeddedKv));
        let store = ChainStore::with_backends(
            StoreConfig {
                backend: BackendMode::EmbeddedKv,
                ..StoreConfig::default()
            },
            embedded.clone(),
            Arc::new(NoOpBackend),
        );

        let results = store.store_block_time(1, 100, 7).settle().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
        assert_eq!(embedded.writes().len(), 1);

        store.shutdown().await;
        assert_eq!(store.metrics().written, 1);
    }

    #[tokio::test]
    async fn test_hydrate_without_embedded_backend() {
        let store = ChainStore::in_memory();
        let report = store.hydrate(1).await.expect("hydrate");
        assert_eq!(report.loaded(), 0);
    }
}
