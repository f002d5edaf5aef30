//! PostgreSQL backend.
//!
//! One table per entity kind, every row keyed by the entity identity in a
//! `uuid` primary key column. Writes are `INSERT ... ON CONFLICT ("uuid")
//! DO UPDATE`, so re-storing a key replaces the row.

use async_trait::async_trait;
use chainstore_core::{
    address_part, BackendError, BackendMode, Entity, RelationalConfig, PRICE_DECIMALS,
};
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use uuid::Uuid;

use super::{DurableBackend, DurableWrite};

// ============================================================================
// ROW MAPPING
// ============================================================================

/// A column value, typed the way the relational schema stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Uuid(Uuid),
    BigInt(i64),
    Text(String),
    Double(f64),
    Bool(bool),
}

impl SqlValue {
    pub fn as_param(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlValue::Uuid(v) => v,
            SqlValue::BigInt(v) => v,
            SqlValue::Text(v) => v,
            SqlValue::Double(v) => v,
            SqlValue::Bool(v) => v,
        }
    }
}

/// One row ready to be upserted.
///
/// The first column is always `uuid`, the conflict target.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalRow {
    pub table: &'static str,
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl RelationalRow {
    /// Map a durable write onto its table's columns.
    ///
    /// Unsigned values are stored as BIGINT; anything above `i64::MAX` is
    /// rejected rather than wrapped.
    pub fn from_write(write: &DurableWrite) -> Result<Self, BackendError> {
        let mut columns = vec![
            ("uuid", SqlValue::Uuid(write.identity.as_uuid())),
            ("chain_id", bigint("chain_id", write.chain_id)?),
        ];

        match &write.entity {
            Entity::BlockTime(bt) => {
                columns.push(("block", bigint("block", bt.block_number)?));
                columns.push(("timestamp", bigint("timestamp", bt.timestamp)?));
            }
            Entity::HistoricalPrice(hp) => {
                columns.push(("block", bigint("block", hp.block_number)?));
                columns.push(("token", text(address_part(&hp.token_address))));
                columns.push(("price", text(hp.price.to_string())));
                columns.push((
                    "humanized_price",
                    SqlValue::Double(hp.humanized(PRICE_DECIMALS)),
                ));
            }
            Entity::RegistryVaultEvent(ev) => {
                columns.push(("block", bigint("block", ev.block_number)?));
                columns.push(("registry_address", text(address_part(&ev.registry_address))));
                columns.push(("vault_address", text(address_part(&ev.vault_address))));
                columns.push(("token_address", text(address_part(&ev.token_address))));
                columns.push(("block_hash", text(ev.block_hash.to_string())));
                columns.push(("type", text(ev.vault_type.clone())));
                columns.push(("api_version", text(ev.api_version.clone())));
                columns.push(("activation", bigint("activation", ev.activation)?));
                columns.push(("management_fee", bigint("management_fee", ev.management_fee)?));
                columns.push(("tx_index", bigint("tx_index", ev.tx_index)?));
                columns.push(("log_index", bigint("log_index", ev.log_index)?));
            }
            Entity::VaultRecord(v) => {
                // Vault rows carry their inception block in the shared block column.
                columns.push(("block", bigint("block", v.inception)?));
                columns.push(("address", text(address_part(&v.address))));
                columns.push(("token", text(address_part(&v.token_address))));
                columns.push(("management", text(address_part(&v.management))));
                columns.push(("governance", text(address_part(&v.governance))));
                columns.push(("guardian", text(address_part(&v.guardian))));
                columns.push(("rewards", text(address_part(&v.rewards))));
                columns.push(("type", text(v.vault_type.clone())));
                columns.push(("symbol", text(v.symbol.clone())));
                columns.push(("display_symbol", text(v.display_symbol.clone())));
                columns.push(("formatted_symbol", text(v.formatted_symbol.clone())));
                columns.push(("name", text(v.name.clone())));
                columns.push(("display_name", text(v.display_name.clone())));
                columns.push(("formatted_name", text(v.formatted_name.clone())));
                columns.push(("icon", text(v.icon.clone())));
                columns.push(("version", text(v.version.clone())));
                columns.push(("inception", bigint("inception", v.inception)?));
                columns.push(("activation", bigint("activation", v.activation)?));
                columns.push(("decimals", bigint("decimals", v.decimals)?));
                columns.push(("performance_fee", bigint("performance_fee", v.performance_fee)?));
                columns.push(("management_fee", bigint("management_fee", v.management_fee)?));
                columns.push(("endorsed", SqlValue::Bool(v.endorsed)));
            }
        }

        Ok(Self {
            table: write.kind.relational_table(),
            columns,
        })
    }

    /// Parameterized upsert statement for this row.
    pub fn upsert_sql(&self) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|(name, _)| format!("\"{}\"", name))
            .collect();
        let placeholders: Vec<String> = (1..=self.columns.len())
            .map(|i| format!("${}", i))
            .collect();
        let updates: Vec<String> = self
            .columns
            .iter()
            .skip(1)
            .map(|(name, _)| format!("\"{0}\" = EXCLUDED.\"{0}\"", name))
            .collect();

        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT (\"uuid\") DO UPDATE SET {}",
            self.table,
            names.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    }

    /// Parameters in column order.
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.columns.iter().map(|(_, value)| value.as_param()).collect()
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

fn bigint(field: &str, value: u64) -> Result<SqlValue, BackendError> {
    i64::try_from(value)
        .map(SqlValue::BigInt)
        .map_err(|_| BackendError::OutOfRange {
            backend: BackendMode::Relational,
            field: field.to_string(),
            value: value.to_string(),
        })
}

fn text(value: String) -> SqlValue {
    SqlValue::Text(value)
}

// ============================================================================
// BACKEND
// ============================================================================

/// Pooled PostgreSQL backend.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: Pool,
}

impl PostgresBackend {
    /// Build a connection pool from `config`. Connections are established
    /// lazily, so this succeeds even when the server is unreachable.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: &RelationalConfig) -> Result<Self, BackendError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(config.max_size);
        pool_config.timeouts = Timeouts {
            wait: Some(config.timeout),
            create: Some(config.timeout),
            recycle: Some(config.timeout),
        };
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| BackendError::Connection {
                backend: BackendMode::Relational,
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

#[async_trait]
impl DurableBackend for PostgresBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Relational
    }

    async fn upsert(&self, write: &DurableWrite) -> Result<(), BackendError> {
        let row = RelationalRow::from_write(write)?;
        let sql = row.upsert_sql();

        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| BackendError::Connection {
                backend: BackendMode::Relational,
                reason: e.to_string(),
            })?;

        conn.execute(sql.as_str(), &row.params())
            .await
            .map_err(|e| BackendError::TransactionFailed {
                table: row.table.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

/// DDL for every table the backend writes to.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "db_block_times" (
    "uuid" UUID PRIMARY KEY,
    "chain_id" BIGINT NOT NULL,
    "block" BIGINT NOT NULL,
    "timestamp" BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS "db_historical_prices" (
    "uuid" UUID PRIMARY KEY,
    "chain_id" BIGINT NOT NULL,
    "block" BIGINT NOT NULL,
    "token" TEXT NOT NULL,
    "price" TEXT NOT NULL,
    "humanized_price" DOUBLE PRECISION NOT NULL
);
CREATE TABLE IF NOT EXISTS "db_new_vaults_from_registries" (
    "uuid" UUID PRIMARY KEY,
    "chain_id" BIGINT NOT NULL,
    "block" BIGINT NOT NULL,
    "registry_address" TEXT NOT NULL,
    "vault_address" TEXT NOT NULL,
    "token_address" TEXT NOT NULL,
    "block_hash" TEXT NOT NULL,
    "type" TEXT NOT NULL,
    "api_version" TEXT NOT NULL,
    "activation" BIGINT NOT NULL,
    "management_fee" BIGINT NOT NULL,
    "tx_index" BIGINT NOT NULL,
    "log_index" BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS "db_vaults" (
    "uuid" UUID PRIMARY KEY,
    "chain_id" BIGINT NOT NULL,
    "block" BIGINT NOT NULL,
    "address" TEXT NOT NULL,
    "token" TEXT NOT NULL,
    "management" TEXT NOT NULL,
    "governance" TEXT NOT NULL,
    "guardian" TEXT NOT NULL,
    "rewards" TEXT NOT NULL,
    "type" TEXT NOT NULL,
    "symbol" TEXT NOT NULL,
    "display_symbol" TEXT NOT NULL,
    "formatted_symbol" TEXT NOT NULL,
    "name" TEXT NOT NULL,
    "display_name" TEXT NOT NULL,
    "formatted_name" TEXT NOT NULL,
    "icon" TEXT NOT NULL,
    "version" TEXT NOT NULL,
    "inception" BIGINT NOT NULL,
    "activation" BIGINT NOT NULL,
    "decimals" BIGINT NOT NULL,
    "performance_fee" BIGINT NOT NULL,
    "management_fee" BIGINT NOT NULL,
    "endorsed" BOOLEAN NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chainstore_core::{Address, BlockTime, EntityKind, HistoricalPrice, Keyed, I256};

    #[test]
    fn test_block_time_row() {
        let bt = BlockTime::new(1, 100, 1_700_000_000);
        let row = RelationalRow::from_write(&DurableWrite::new(bt)).expect("row");

        assert_eq!(row.table, "db_block_times");
        assert_eq!(row.get("uuid"), Some(&SqlValue::Uuid(bt.identity().as_uuid())));
        assert_eq!(row.get("block"), Some(&SqlValue::BigInt(100)));
        assert_eq!(row.get("timestamp"), Some(&SqlValue::BigInt(1_700_000_000)));
        assert_eq!(row.params().len(), row.columns.len());
    }

    #[test]
    fn test_historical_price_row() {
        let token = Address::repeat_byte(0xAA);
        let hp = HistoricalPrice::new(
            1,
            50,
            token,
            I256::from_dec_str("2500000").expect("valid decimal"),
        );
        let row = RelationalRow::from_write(&DurableWrite::new(hp)).expect("row");

        assert_eq!(row.get("price"), Some(&SqlValue::Text("2500000".to_string())));
        assert_eq!(row.get("token"), Some(&SqlValue::Text(token.to_checksum(None))));
        match row.get("humanized_price") {
            Some(SqlValue::Double(v)) => assert!((v - 2.5).abs() < 1e-9),
            other => panic!("unexpected humanized price: {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        let bt = BlockTime::new(1, u64::MAX, 0);
        let err = RelationalRow::from_write(&DurableWrite::new(bt)).expect_err("overflow");
        assert!(matches!(
            err,
            BackendError::OutOfRange { ref field, .. } if field == "block"
        ));
    }

    #[test]
    fn test_upsert_sql_shape() {
        let row = RelationalRow::from_write(&DurableWrite::new(BlockTime::new(1, 2, 3))).expect("row");
        assert_eq!(
            row.upsert_sql(),
            "INSERT INTO \"db_block_times\" (\"uuid\", \"chain_id\", \"block\", \"timestamp\") \
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"uuid\") DO UPDATE SET \
             \"chain_id\" = EXCLUDED.\"chain_id\", \"block\" = EXCLUDED.\"block\", \
             \"timestamp\" = EXCLUDED.\"timestamp\""
        );
    }

    #[test]
    fn test_schema_covers_every_table() {
        for kind in EntityKind::ALL {
            assert!(SCHEMA.contains(kind.relational_table()), "missing {}", kind);
        }
    }
}
