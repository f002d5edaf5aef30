//! Routes durable writes to the configured backends.

use std::sync::Arc;

use chainstore_core::{BackendError, BackendMode, ChainId, CompositeKey, Entity, EntityKind};
use tracing::{debug, warn};

use crate::backend::{DurableBackend, DurableWrite};
use crate::metrics::WriteMetrics;
use crate::writer::{QueueError, WriteReceipt, WriterPool};

/// Why a target received no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Persistence is turned off.
    Disabled,
    /// The kind is not persisted by the selected backend.
    Unsupported,
    /// The target backend was not provided to the store.
    NotConfigured,
}

/// Outcome of routing one write to one target.
#[derive(Debug)]
pub enum Dispatch {
    Queued(WriteReceipt),
    Skipped {
        target: BackendMode,
        reason: SkipReason,
    },
    /// Dropped because the write queue was full or closed.
    Rejected { target: BackendMode },
}

/// What happened to the durable side of one `store_*` call.
#[derive(Debug)]
pub struct Submission {
    pub chain_id: ChainId,
    pub kind: EntityKind,
    pub key: CompositeKey,
    pub dispatches: Vec<Dispatch>,
}

impl Submission {
    /// Whether any target dropped the write under backpressure.
    pub fn is_rejected(&self) -> bool {
        self.dispatches
            .iter()
            .any(|d| matches!(d, Dispatch::Rejected { .. }))
    }

    /// Number of writes handed to the worker pool.
    pub fn queued(&self) -> usize {
        self.dispatches
            .iter()
            .filter(|d| matches!(d, Dispatch::Queued(_)))
            .count()
    }

    /// Wait for every queued write and collect the per-target results.
    /// Skipped and rejected targets are not included.
    pub async fn settle(self) -> Vec<(BackendMode, Result<(), BackendError>)> {
        let mut results = Vec::with_capacity(self.dispatches.len());
        for dispatch in self.dispatches {
            if let Dispatch::Queued(receipt) = dispatch {
                let target = receipt.target;
                results.push((target, receipt.wait().await));
            }
        }
        results
    }
}

/// Selects the durable targets for each write and queues them.
pub struct BackendDispatcher {
    mode: BackendMode,
    embedded: Arc<dyn DurableBackend>,
    relational: Arc<dyn DurableBackend>,
    writer: WriterPool,
    metrics: Arc<WriteMetrics>,
}

impl BackendDispatcher {
    /// Backends whose `mode()` does not match their slot are treated as
    /// not configured.
    pub fn new(
        mode: BackendMode,
        embedded: Arc<dyn DurableBackend>,
        relational: Arc<dyn DurableBackend>,
        writer: WriterPool,
        metrics: Arc<WriteMetrics>,
    ) -> Self {
        Self {
            mode,
            embedded,
            relational,
            writer,
            metrics,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Backend occupying the slot for `target`.
    pub fn backend(&self, target: BackendMode) -> Option<&Arc<dyn DurableBackend>> {
        let backend = match target {
            BackendMode::None => return None,
            BackendMode::EmbeddedKv => &self.embedded,
            BackendMode::Relational => &self.relational,
        };
        (backend.mode() == target).then_some(backend)
    }

    /// Route `entity` to every target its kind declares for the current mode.
    pub fn dispatch(&self, entity: impl Into<Entity>) -> Submission {
        let write = DurableWrite::new(entity);
        let mut submission = Submission {
            chain_id: write.chain_id,
            kind: write.kind,
            key: write.key.clone(),
            dispatches: Vec::new(),
        };

        if self.mode == BackendMode::None {
            self.skip(&mut submission, BackendMode::None, SkipReason::Disabled);
            return submission;
        }

        if !write.kind.supports(self.mode) {
            debug!(
                chain_id = write.chain_id,
                kind = %write.kind,
                backend = %self.mode,
                "Kind not persisted by backend, skipping"
            );
            self.skip(&mut submission, self.mode, SkipReason::Unsupported);
            return submission;
        }

        for &target in write.kind.durable_targets(self.mode) {
            let Some(backend) = self.backend(target) else {
                warn!(
                    chain_id = write.chain_id,
                    kind = %write.kind,
                    backend = %target,
                    "Durable target not configured, skipping"
                );
                self.skip(&mut submission, target, SkipReason::NotConfigured);
                continue;
            };

            match self.writer.submit(write.clone(), Arc::clone(backend)) {
                Ok(receipt) => {
                    WriteMetrics::incr(&self.metrics.submitted);
                    submission.dispatches.push(Dispatch::Queued(receipt));
                }
                Err(e) => {
                    WriteMetrics::incr(&self.metrics.rejected);
                    let reason = match e {
                        QueueError::Full(_) => "queue full",
                        QueueError::Closed(_) => "queue closed",
                    };
                    warn!(
                        chain_id = write.chain_id,
                        kind = %write.kind,
                        key = %write.key,
                        backend = %target,
                        reason,
                        "Durable write dropped"
                    );
                    submission
                        .dispatches
                        .push(Dispatch::Rejected { target });
                }
            }
        }

        submission
    }

    fn skip(&self, submission: &mut Submission, target: BackendMode, reason: SkipReason) {
        WriteMetrics::incr(&self.metrics.skipped);
        submission
            .dispatches
            .push(Dispatch::Skipped { target, reason });
    }

    /// Stop accepting writes and drain the queue.
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NoOpBackend, RecordingBackend};
    use crate::rate_governor::RateGovernor;
    use chainstore_core::{
        Address, BlockTime, GovernorConfig, RegistryVaultEvent, VaultRecord, WriterConfig, B256,
    };

    fn dispatcher(
        mode: BackendMode,
        embedded: Arc<dyn DurableBackend>,
        relational: Arc<dyn DurableBackend>,
    ) -> (BackendDispatcher, Arc<WriteMetrics>) {
        let metrics = Arc::new(WriteMetrics::new());
        let writer = WriterPool::spawn(
            WriterConfig::default(),
            Arc::new(RateGovernor::new(GovernorConfig {
                per_second: 1000,
                burst: 1000,
            })),
            Arc::clone(&metrics),
        );
        let dispatcher =
            BackendDispatcher::new(mode, embedded, relational, writer, Arc::clone(&metrics));
        (dispatcher, metrics)
    }

    fn registry_event() -> RegistryVaultEvent {
        RegistryVaultEvent {
            chain_id: 1,
            registry_address: Address::repeat_byte(0x01),
            vault_address: Address::repeat_byte(0x02),
            token_address: Address::repeat_byte(0x03),
            block_number: 10,
            block_hash: B256::repeat_byte(0x04),
            api_version: "0.4.6".to_string(),
            activation: 1_700_000_000,
            management_fee: 200,
            tx_index: 1,
            log_index: 2,
            vault_type: "standard".to_string(),
        }
    }

    fn vault() -> VaultRecord {
        VaultRecord {
            chain_id: 1,
            address: Address::repeat_byte(0x11),
            token_address: Address::repeat_byte(0x22),
            activation: 1_700_000_000,
            management: Address::repeat_byte(0x33),
            governance: Address::repeat_byte(0x44),
            guardian: Address::repeat_byte(0x55),
            rewards: Address::repeat_byte(0x66),
            vault_type: "standard".to_string(),
            symbol: "yvUSDC".to_string(),
            display_symbol: "yvUSDC".to_string(),
            formatted_symbol: "yvUSDC".to_string(),
            name: "USDC yVault".to_string(),
            display_name: "USDC".to_string(),
            formatted_name: "USDC yVault".to_string(),
            icon: String::new(),
            version: "0.4.6".to_string(),
            decimals: 6,
            performance_fee: 2000,
            management_fee: 0,
            endorsed: true,
            inception: 16_000_000,
        }
    }

    #[tokio::test]
    async fn test_none_mode_skips() {
        let (dispatcher, metrics) =
            dispatcher(BackendMode::None, Arc::new(NoOpBackend), Arc::new(NoOpBackend));
        let submission = dispatcher.dispatch(BlockTime::new(1, 100, 1));

        assert_eq!(submission.queued(), 0);
        assert!(!submission.is_rejected());
        assert!(matches!(
            submission.dispatches.as_slice(),
            [Dispatch::Skipped {
                reason: SkipReason::Disabled,
                ..
            }]
        ));
        assert_eq!(metrics.snapshot().skipped, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_event_unsupported_in_embedded_mode() {
        let embedded = Arc::new(RecordingBackend::new(BackendMode::EmbeddedKv));
        let (dispatcher, _metrics) =
            dispatcher(BackendMode::EmbeddedKv, embedded.clone(), Arc::new(NoOpBackend));

        let submission = dispatcher.dispatch(registry_event());
        assert!(matches!(
            submission.dispatches.as_slice(),
            [Dispatch::Skipped {
                target: BackendMode::EmbeddedKv,
                reason: SkipReason::Unsupported,
            }]
        ));
        dispatcher.shutdown().await;
        assert!(embedded.writes().is_empty());
    }

    #[tokio::test]
    async fn test_registry_event_written_in_relational_mode() {
        let relational = Arc::new(RecordingBackend::new(BackendMode::Relational));
        let (dispatcher, _metrics) =
            dispatcher(BackendMode::Relational, Arc::new(NoOpBackend), relational.clone());

        let results = dispatcher.dispatch(registry_event()).settle().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());
        assert_eq!(relational.row_count(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_vault_record_mirrors_in_relational_mode() {
        let embedded = Arc::new(RecordingBackend::new(BackendMode::EmbeddedKv));
        let relational = Arc::new(RecordingBackend::new(BackendMode::Relational));
        let (dispatcher, _metrics) =
            dispatcher(BackendMode::Relational, embedded.clone(), relational.clone());

        let submission = dispatcher.dispatch(vault());
        assert_eq!(submission.queued(), 2);

        let results = submission.settle().await;
        let targets: Vec<BackendMode> = results.iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, vec![BackendMode::EmbeddedKv, BackendMode::Relational]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(embedded.writes().len(), 1);
        assert_eq!(relational.writes().len(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_mirror_is_not_configured() {
        let relational = Arc::new(RecordingBackend::new(BackendMode::Relational));
        let (dispatcher, _metrics) =
            dispatcher(BackendMode::Relational, Arc::new(NoOpBackend), relational.clone());
        assert!(dispatcher.backend(BackendMode::EmbeddedKv).is_none());

        let submission = dispatcher.dispatch(vault());
        assert_eq!(submission.queued(), 1);
        assert!(submission.dispatches.iter().any(|d| matches!(
            d,
            Dispatch::Skipped {
                target: BackendMode::EmbeddedKv,
                reason: SkipReason::NotConfigured,
            }
        )));
        submission.settle().await;
        assert_eq!(relational.writes().len(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_reaches_receipt() {
        let embedded = Arc::new(RecordingBackend::new(BackendMode::EmbeddedKv).failing());
        let (dispatcher, metrics) =
            dispatcher(BackendMode::EmbeddedKv, embedded, Arc::new(NoOpBackend));

        let results = dispatcher.dispatch(BlockTime::new(1, 1, 1)).settle().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].1,
            Err(BackendError::TransactionFailed { .. })
        ));
        assert_eq!(metrics.snapshot().failed, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_after_shutdown() {
        let embedded = Arc::new(RecordingBackend::new(BackendMode::EmbeddedKv));
        let (dispatcher, metrics) =
            dispatcher(BackendMode::EmbeddedKv, embedded, Arc::new(NoOpBackend));
        dispatcher.shutdown().await;

        let submission = dispatcher.dispatch(BlockTime::new(1, 1, 1));
        assert!(submission.is_rejected());
        assert_eq!(metrics.snapshot().rejected, 1);
    }
}
