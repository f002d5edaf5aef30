//! Backend that persists nothing.

use async_trait::async_trait;
use chainstore_core::{BackendError, BackendMode};

use super::{DurableBackend, DurableWrite};

/// Stand-in for a backend that is not configured. The dispatcher never
/// queues work for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpBackend;

#[async_trait]
impl DurableBackend for NoOpBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::None
    }

    async fn upsert(&self, _write: &DurableWrite) -> Result<(), BackendError> {
        Ok(())
    }
}
