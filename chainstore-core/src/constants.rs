//! Default values for chainstore configuration.

// ============================================================================
// WRITE GOVERNOR
// ============================================================================

/// Sustained relational writes admitted per second.
pub const DEFAULT_WRITE_RATE_PER_SEC: u32 = 2;

/// Relational writes admitted immediately before the rate applies.
pub const DEFAULT_WRITE_BURST: u32 = 4;

// ============================================================================
// WRITE QUEUE
// ============================================================================

/// Number of background workers draining the write queue.
pub const DEFAULT_WRITE_WORKERS: usize = 8;

/// Pending writes held before new writes are rejected.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 1024;

// ============================================================================
// EMBEDDED STORE
// ============================================================================

/// Default directory of the LMDB environment.
pub const DEFAULT_LMDB_PATH: &str = "./data/chainstore";

/// LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 1024;

/// Named tables the environment may hold. One per (chain, kind).
pub const DEFAULT_LMDB_MAX_TABLES: u32 = 256;

// ============================================================================
// RELATIONAL STORE
// ============================================================================

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "chainstore";
pub const DEFAULT_DB_USER: &str = "postgres";
pub const DEFAULT_DB_POOL_SIZE: usize = 16;
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;
