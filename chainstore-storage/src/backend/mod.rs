//! Durable backends.
//!
//! Every backend exposes one capability: durably upsert an entity under its
//! composite key and identity. Which backend a given kind is routed to is
//! declared by [`EntityKind::durable_targets`].

pub mod lmdb;
pub mod noop;
pub mod postgres;
pub mod recording;

pub use lmdb::LmdbBackend;
pub use noop::NoOpBackend;
pub use postgres::{PostgresBackend, RelationalRow, SqlValue, SCHEMA};
pub use recording::RecordingBackend;

use async_trait::async_trait;
use chainstore_core::{
    BackendError, BackendMode, ChainId, CompositeKey, Entity, EntityKind, Identity,
};

/// A single durable write, fully keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct DurableWrite {
    pub chain_id: ChainId,
    pub kind: EntityKind,
    pub key: CompositeKey,
    pub identity: Identity,
    pub entity: Entity,
}

impl DurableWrite {
    pub fn new(entity: impl Into<Entity>) -> Self {
        let entity = entity.into();
        Self {
            chain_id: entity.chain_id(),
            kind: entity.kind(),
            key: entity.composite_key(),
            identity: entity.identity(),
            entity,
        }
    }

    /// JSON bytes of the entity.
    pub fn encode(&self) -> Result<Vec<u8>, BackendError> {
        self.entity
            .to_json()
            .map_err(|e| BackendError::Serialization {
                kind: self.kind,
                reason: e.to_string(),
            })
    }
}

/// Durable persistence target.
///
/// Implementations must be safe to call from many workers at once.
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// The mode this backend implements.
    fn mode(&self) -> BackendMode;

    /// Insert the entity, or replace what is stored under the same key.
    async fn upsert(&self, write: &DurableWrite) -> Result<(), BackendError>;

    /// Every entry recorded for (chain, kind) as raw key/value pairs.
    ///
    /// Only backends that can serve as a hydration source implement this.
    async fn scan(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
    ) -> Result<Vec<(CompositeKey, Vec<u8>)>, BackendError> {
        let _ = chain_id;
        Err(BackendError::Unsupported {
            kind,
            backend: self.mode(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstore_core::{BlockTime, Keyed};

    #[test]
    fn test_durable_write_carries_entity_keys() {
        let bt = BlockTime::new(1, 100, 1_700_000_000);
        let write = DurableWrite::new(bt);

        assert_eq!(write.chain_id, 1);
        assert_eq!(write.kind, EntityKind::BlockTime);
        assert_eq!(write.key.as_str(), "100");
        assert_eq!(write.identity, bt.identity());
    }

    #[test]
    fn test_encode_is_entity_json() {
        let write = DurableWrite::new(BlockTime::new(1, 100, 7));
        let bytes = write.encode().expect("encode");
        let decoded: BlockTime = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, BlockTime::new(1, 100, 7));
    }
}
