//! chainstore storage - per-chain fact cache and durable write path
//!
//! The [`ChainStore`] facade keeps every stored fact in a per-chain
//! in-memory cache and hands a copy to a bounded pool of background
//! workers, which persist it to LMDB or PostgreSQL. Relational writes are
//! paced by a shared token bucket.

pub mod backend;
pub mod cache;
pub mod dispatcher;
pub mod facade;
pub mod metrics;
pub mod rate_governor;
pub mod writer;

pub use backend::{
    DurableBackend, DurableWrite, LmdbBackend, NoOpBackend, PostgresBackend, RecordingBackend,
    RelationalRow, SqlValue,
};
pub use cache::{ChainKeyedCache, EntityCaches};
pub use dispatcher::{BackendDispatcher, Dispatch, SkipReason, Submission};
pub use facade::{ChainStore, HydrationReport};
pub use metrics::{WriteMetrics, WriteMetricsSnapshot};
pub use rate_governor::RateGovernor;
pub use writer::{QueueError, WriteReceipt, WriterPool};
