//! In-memory backend that records every write, for tests.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chainstore_core::{BackendError, BackendMode, ChainId, CompositeKey, Entity, EntityKind, Identity};
use dashmap::DashMap;

use super::{DurableBackend, DurableWrite};

/// Backend double that keeps rows in memory.
///
/// Rows are keyed by identity, so repeated writes of one key collapse into
/// one row the way a relational upsert does. Every accepted write is also
/// appended to a log together with the instant it was admitted.
#[derive(Debug)]
pub struct RecordingBackend {
    mode: BackendMode,
    latency: Option<Duration>,
    fail: bool,
    rows: DashMap<Identity, DurableWrite>,
    log: Mutex<Vec<(Instant, DurableWrite)>>,
}

impl RecordingBackend {
    pub fn new(mode: BackendMode) -> Self {
        Self {
            mode,
            latency: None,
            fail: false,
            rows: DashMap::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every upsert fails with a transaction error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sleep for `latency` inside every upsert.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Accepted writes, in completion order.
    pub fn writes(&self) -> Vec<DurableWrite> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, write)| write.clone())
            .collect()
    }

    /// Instants at which writes were admitted, in completion order.
    pub fn admissions(&self) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    /// Current row for `identity`.
    pub fn row(&self, identity: &Identity) -> Option<Entity> {
        self.rows.get(identity).map(|row| row.entity.clone())
    }

    /// Number of distinct rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl DurableBackend for RecordingBackend {
    fn mode(&self) -> BackendMode {
        self.mode
    }

    async fn upsert(&self, write: &DurableWrite) -> Result<(), BackendError> {
        let admitted = Instant::now();
        if !write.kind.supports(self.mode) {
            return Err(BackendError::Unsupported {
                kind: write.kind,
                backend: self.mode,
            });
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail {
            return Err(BackendError::TransactionFailed {
                table: write.kind.relational_table().to_string(),
                reason: "injected failure".to_string(),
            });
        }

        self.rows.insert(write.identity, write.clone());
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((admitted, write.clone()));
        Ok(())
    }

    async fn scan(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
    ) -> Result<Vec<(CompositeKey, Vec<u8>)>, BackendError> {
        let mut entries = Vec::new();
        for row in self.rows.iter() {
            let write = row.value();
            if write.chain_id == chain_id && write.kind == kind {
                entries.push((write.key.clone(), write.encode()?));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstore_core::BlockTime;

    #[tokio::test]
    async fn test_rows_collapse_by_identity() {
        let backend = RecordingBackend::new(BackendMode::Relational);
        backend
            .upsert(&DurableWrite::new(BlockTime::new(1, 100, 1)))
            .await
            .expect("upsert");
        backend
            .upsert(&DurableWrite::new(BlockTime::new(1, 100, 2)))
            .await
            .expect("upsert");

        assert_eq!(backend.writes().len(), 2);
        assert_eq!(backend.row_count(), 1);
        let identity = DurableWrite::new(BlockTime::new(1, 100, 0)).identity;
        assert_eq!(
            backend.row(&identity),
            Some(Entity::BlockTime(BlockTime::new(1, 100, 2)))
        );
    }

    #[tokio::test]
    async fn test_failing_records_nothing() {
        let backend = RecordingBackend::new(BackendMode::EmbeddedKv).failing();
        let err = backend
            .upsert(&DurableWrite::new(BlockTime::new(1, 1, 1)))
            .await
            .expect_err("injected failure");
        assert!(matches!(err, BackendError::TransactionFailed { .. }));
        assert!(backend.writes().is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_by_chain_and_kind() {
        let backend = RecordingBackend::new(BackendMode::EmbeddedKv);
        for chain in [1, 2] {
            backend
                .upsert(&DurableWrite::new(BlockTime::new(chain, 7, 70)))
                .await
                .expect("upsert");
        }

        let entries = backend.scan(2, EntityKind::BlockTime).await.expect("scan");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_str(), "7");
        assert!(backend
            .scan(2, EntityKind::VaultRecord)
            .await
            .expect("scan")
            .is_empty());
    }
}
