//! LMDB-backed embedded store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each (chain, kind) pair
//! gets its own named database, `<chain_id>_<kind table>`, opened lazily and
//! reused afterwards. Values are the JSON encoding of the entity, keyed by
//! its composite key.
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions; every upsert is one atomic write
//! transaction. Table handles are cached in a concurrent map, and creating
//! the same table twice is harmless.

use std::path::Path;

use async_trait::async_trait;
use chainstore_core::{
    BackendError, BackendMode, ChainId, CompositeKey, EmbeddedConfig, EntityKind,
};
use dashmap::DashMap;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use super::{DurableBackend, DurableWrite};

type Table = Database<Str, Bytes>;

/// Embedded key-value backend.
///
/// # Example
///
/// ```ignore
/// use chainstore_core::EmbeddedConfig;
/// use chainstore_storage::backend::LmdbBackend;
///
/// let backend = LmdbBackend::open(&EmbeddedConfig::default())?;
/// backend.put(1, EntityKind::BlockTime, "100", b"{...}")?;
/// ```
pub struct LmdbBackend {
    env: Env,
    tables: DashMap<(ChainId, EntityKind), Table>,
}

impl LmdbBackend {
    /// Open (or create) the environment described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment cannot be opened.
    pub fn open(config: &EmbeddedConfig) -> Result<Self, BackendError> {
        Self::open_at(&config.path, config.max_size_mb, config.max_tables)
    }

    pub fn open_at<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        max_tables: u32,
    ) -> Result<Self, BackendError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| connection_error(format!("map size of {} MB overflows", max_size_mb)))?;
        std::fs::create_dir_all(&path).map_err(|e| connection_error(e.to_string()))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_tables)
                .open(path.as_ref())
        }
        .map_err(|e| connection_error(e.to_string()))?;

        Ok(Self {
            env,
            tables: DashMap::new(),
        })
    }

    /// Name of the table holding `kind` for `chain_id`.
    pub fn table_name(chain_id: ChainId, kind: EntityKind) -> String {
        format!("{}_{}", chain_id, kind.embedded_table())
    }

    /// Handle for (chain, kind), creating the table on first use.
    fn table(&self, chain_id: ChainId, kind: EntityKind) -> Result<Table, BackendError> {
        if let Some(table) = self.tables.get(&(chain_id, kind)) {
            return Ok(*table);
        }

        let name = Self::table_name(chain_id, kind);
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| transaction_error(&name, e))?;
        let table: Table = self
            .env
            .create_database(&mut wtxn, Some(name.as_str()))
            .map_err(|e| transaction_error(&name, e))?;
        wtxn.commit().map_err(|e| transaction_error(&name, e))?;

        self.tables.insert((chain_id, kind), table);
        Ok(table)
    }

    /// Handle for (chain, kind) if the table already exists.
    fn existing_table(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
    ) -> Result<Option<Table>, BackendError> {
        if let Some(table) = self.tables.get(&(chain_id, kind)) {
            return Ok(Some(*table));
        }

        let name = Self::table_name(chain_id, kind);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| transaction_error(&name, e))?;
        let table: Option<Table> = self
            .env
            .open_database(&rtxn, Some(name.as_str()))
            .map_err(|e| transaction_error(&name, e))?;
        rtxn.commit().map_err(|e| transaction_error(&name, e))?;

        if let Some(table) = table {
            self.tables.insert((chain_id, kind), table);
        }
        Ok(table)
    }

    /// Write `key -> value` in one transaction.
    pub fn put(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
        key: &str,
        value: &[u8],
    ) -> Result<(), BackendError> {
        let table = self.table(chain_id, kind)?;
        let name = Self::table_name(chain_id, kind);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| transaction_error(&name, e))?;
        table
            .put(&mut wtxn, key, value)
            .map_err(|e| transaction_error(&name, e))?;
        wtxn.commit().map_err(|e| transaction_error(&name, e))
    }

    /// Raw value stored under `key`, if any.
    pub fn get(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let Some(table) = self.existing_table(chain_id, kind)? else {
            return Ok(None);
        };
        let name = Self::table_name(chain_id, kind);

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| transaction_error(&name, e))?;
        let value = table
            .get(&rtxn, key)
            .map_err(|e| transaction_error(&name, e))?
            .map(|bytes| bytes.to_vec());
        Ok(value)
    }

    /// Every entry of (chain, kind). Missing tables read as empty.
    pub fn entries(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
    ) -> Result<Vec<(CompositeKey, Vec<u8>)>, BackendError> {
        let Some(table) = self.existing_table(chain_id, kind)? else {
            return Ok(Vec::new());
        };
        let name = Self::table_name(chain_id, kind);

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| transaction_error(&name, e))?;
        let iter = table
            .iter(&rtxn)
            .map_err(|e| transaction_error(&name, e))?;

        let mut entries = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| transaction_error(&name, e))?;
            entries.push((CompositeKey::from(key), value.to_vec()));
        }
        Ok(entries)
    }
}

#[async_trait]
impl DurableBackend for LmdbBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::EmbeddedKv
    }

    async fn upsert(&self, write: &DurableWrite) -> Result<(), BackendError> {
        if !write.kind.supports(BackendMode::EmbeddedKv) {
            return Err(BackendError::Unsupported {
                kind: write.kind,
                backend: BackendMode::EmbeddedKv,
            });
        }
        let bytes = write.encode()?;
        self.put(write.chain_id, write.kind, write.key.as_str(), &bytes)
    }

    async fn scan(
        &self,
        chain_id: ChainId,
        kind: EntityKind,
    ) -> Result<Vec<(CompositeKey, Vec<u8>)>, BackendError> {
        self.entries(chain_id, kind)
    }
}

fn connection_error(reason: String) -> BackendError {
    BackendError::Connection {
        backend: BackendMode::EmbeddedKv,
        reason,
    }
}

fn transaction_error(table: &str, e: heed::Error) -> BackendError {
    BackendError::TransactionFailed {
        table: table.to_string(),
        reason: e.to_string(),
    }
}
