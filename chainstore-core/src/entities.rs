//! Chain facts held by the store.
//!
//! Every entity is an immutable snapshot: the store replaces values
//! wholesale and never mutates them in place.

use crate::config::BackendMode;
use crate::keys::{
    block_time_key, historical_price_key, registry_vault_event_key, vault_record_key,
    CompositeKey, Identity, Keyed,
};
use alloy_primitives::{Address, B256, I256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EVM chain identifier.
pub type ChainId = u64;

/// Block height on a chain.
pub type BlockNumber = u64;

/// Decimals used when converting a raw price to its human-scaled float.
pub const PRICE_DECIMALS: u32 = 6;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Discriminator for the kinds of facts the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    BlockTime,
    HistoricalPrice,
    RegistryVaultEvent,
    VaultRecord,
}

impl EntityKind {
    /// All kinds, in declaration order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::BlockTime,
        EntityKind::HistoricalPrice,
        EntityKind::RegistryVaultEvent,
        EntityKind::VaultRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::BlockTime => "block_time",
            EntityKind::HistoricalPrice => "historical_price",
            EntityKind::RegistryVaultEvent => "registry_vault_event",
            EntityKind::VaultRecord => "vault_record",
        }
    }

    /// Table name inside the embedded store. The backend prefixes it with
    /// the chain id so that each (chain, kind) pair gets its own table.
    pub fn embedded_table(&self) -> &'static str {
        match self {
            EntityKind::BlockTime => "block_time",
            EntityKind::HistoricalPrice => "historical_prices",
            EntityKind::RegistryVaultEvent => "new_vaults_from_registry",
            EntityKind::VaultRecord => "vaults",
        }
    }

    /// Table name in the relational store.
    pub fn relational_table(&self) -> &'static str {
        match self {
            EntityKind::BlockTime => "db_block_times",
            EntityKind::HistoricalPrice => "db_historical_prices",
            EntityKind::RegistryVaultEvent => "db_new_vaults_from_registries",
            EntityKind::VaultRecord => "db_vaults",
        }
    }

    /// Whether a durable write of this kind is implemented for `mode`.
    ///
    /// Registry events are never written to the embedded store. The
    /// scanner replays them from chain logs on every run, so only the
    /// relational backend records them.
    pub fn supports(&self, mode: BackendMode) -> bool {
        !matches!(
            (self, mode),
            (EntityKind::RegistryVaultEvent, BackendMode::EmbeddedKv)
        )
    }

    /// Backends a write of this kind is routed to under `mode`.
    ///
    /// Vault records are additionally mirrored into the embedded store when
    /// the relational backend is selected, so that the next run can hydrate
    /// vaults without a database round-trip.
    pub fn durable_targets(&self, mode: BackendMode) -> &'static [BackendMode] {
        match (self, mode) {
            (_, BackendMode::None) => &[],
            (EntityKind::RegistryVaultEvent, BackendMode::EmbeddedKv) => &[],
            (_, BackendMode::EmbeddedKv) => &[BackendMode::EmbeddedKv],
            (EntityKind::VaultRecord, BackendMode::Relational) => {
                &[BackendMode::EmbeddedKv, BackendMode::Relational]
            }
            (_, BackendMode::Relational) => &[BackendMode::Relational],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Wall-clock time at which a block was mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTime {
    pub chain_id: ChainId,
    pub block_number: BlockNumber,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

impl BlockTime {
    pub fn new(chain_id: ChainId, block_number: BlockNumber, timestamp: u64) -> Self {
        Self {
            chain_id,
            block_number,
            timestamp,
        }
    }

    /// The timestamp as a UTC datetime, if it is representable.
    pub fn mined_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Price of a token at a given block, in the token's base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalPrice {
    pub chain_id: ChainId,
    pub block_number: BlockNumber,
    pub token_address: Address,
    #[serde(with = "decimal_i256")]
    pub price: I256,
}

impl HistoricalPrice {
    pub fn new(
        chain_id: ChainId,
        block_number: BlockNumber,
        token_address: Address,
        price: I256,
    ) -> Self {
        Self {
            chain_id,
            block_number,
            token_address,
            price,
        }
    }

    /// Best-effort float approximation of `price / 10^decimals`.
    ///
    /// Precision is lost for large values; the exact value is always
    /// available through `price`.
    pub fn humanized(&self, decimals: u32) -> f64 {
        let raw: f64 = self.price.to_string().parse().unwrap_or(0.0);
        raw / 10f64.powi(decimals as i32)
    }
}

/// A vault discovered through a registry `NewVault` style event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryVaultEvent {
    pub chain_id: ChainId,
    pub registry_address: Address,
    pub vault_address: Address,
    pub token_address: Address,
    pub block_number: BlockNumber,
    pub block_hash: B256,
    pub api_version: String,
    pub activation: u64,
    pub management_fee: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub vault_type: String,
}

/// Current known definition of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub chain_id: ChainId,
    pub address: Address,
    pub token_address: Address,
    pub activation: u64,
    pub management: Address,
    pub governance: Address,
    pub guardian: Address,
    pub rewards: Address,
    pub vault_type: String,
    pub symbol: String,
    pub display_symbol: String,
    pub formatted_symbol: String,
    pub name: String,
    pub display_name: String,
    pub formatted_name: String,
    pub icon: String,
    pub version: String,
    pub decimals: u64,
    pub performance_fee: u64,
    pub management_fee: u64,
    pub endorsed: bool,
    pub inception: u64,
}

impl Keyed for BlockTime {
    fn kind() -> EntityKind {
        EntityKind::BlockTime
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn composite_key(&self) -> CompositeKey {
        block_time_key(self.block_number)
    }
}

impl Keyed for HistoricalPrice {
    fn kind() -> EntityKind {
        EntityKind::HistoricalPrice
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn composite_key(&self) -> CompositeKey {
        historical_price_key(self.block_number, &self.token_address)
    }
}

impl Keyed for RegistryVaultEvent {
    fn kind() -> EntityKind {
        EntityKind::RegistryVaultEvent
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn composite_key(&self) -> CompositeKey {
        registry_vault_event_key(
            self.block_number,
            &self.registry_address,
            &self.vault_address,
            &self.token_address,
            &self.api_version,
        )
    }
}

impl Keyed for VaultRecord {
    fn kind() -> EntityKind {
        EntityKind::VaultRecord
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn composite_key(&self) -> CompositeKey {
        vault_record_key(
            &self.address,
            &self.token_address,
            self.activation,
            self.chain_id,
        )
    }
}

// ============================================================================
// TYPE-ERASED ENTITY
// ============================================================================

/// Any storable entity, used on the durable write path where backends
/// handle every kind through one capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    BlockTime(BlockTime),
    HistoricalPrice(HistoricalPrice),
    RegistryVaultEvent(RegistryVaultEvent),
    VaultRecord(VaultRecord),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::BlockTime(_) => EntityKind::BlockTime,
            Entity::HistoricalPrice(_) => EntityKind::HistoricalPrice,
            Entity::RegistryVaultEvent(_) => EntityKind::RegistryVaultEvent,
            Entity::VaultRecord(_) => EntityKind::VaultRecord,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            Entity::BlockTime(e) => e.chain_id,
            Entity::HistoricalPrice(e) => e.chain_id,
            Entity::RegistryVaultEvent(e) => e.chain_id,
            Entity::VaultRecord(e) => e.chain_id,
        }
    }

    pub fn composite_key(&self) -> CompositeKey {
        match self {
            Entity::BlockTime(e) => e.composite_key(),
            Entity::HistoricalPrice(e) => e.composite_key(),
            Entity::RegistryVaultEvent(e) => e.composite_key(),
            Entity::VaultRecord(e) => e.composite_key(),
        }
    }

    pub fn identity(&self) -> Identity {
        match self {
            Entity::BlockTime(e) => e.identity(),
            Entity::HistoricalPrice(e) => e.identity(),
            Entity::RegistryVaultEvent(e) => e.identity(),
            Entity::VaultRecord(e) => e.identity(),
        }
    }

    /// JSON encoding of the inner entity, without an enum tag.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Entity::BlockTime(e) => serde_json::to_vec(e),
            Entity::HistoricalPrice(e) => serde_json::to_vec(e),
            Entity::RegistryVaultEvent(e) => serde_json::to_vec(e),
            Entity::VaultRecord(e) => serde_json::to_vec(e),
        }
    }

    /// Decode bytes produced by [`Entity::to_json`] for a known kind.
    pub fn from_json(kind: EntityKind, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::BlockTime => Entity::BlockTime(serde_json::from_slice(bytes)?),
            EntityKind::HistoricalPrice => Entity::HistoricalPrice(serde_json::from_slice(bytes)?),
            EntityKind::RegistryVaultEvent => {
                Entity::RegistryVaultEvent(serde_json::from_slice(bytes)?)
            }
            EntityKind::VaultRecord => Entity::VaultRecord(serde_json::from_slice(bytes)?),
        })
    }
}

impl From<BlockTime> for Entity {
    fn from(e: BlockTime) -> Self {
        Entity::BlockTime(e)
    }
}

impl From<HistoricalPrice> for Entity {
    fn from(e: HistoricalPrice) -> Self {
        Entity::HistoricalPrice(e)
    }
}

impl From<RegistryVaultEvent> for Entity {
    fn from(e: RegistryVaultEvent) -> Self {
        Entity::RegistryVaultEvent(e)
    }
}

impl From<VaultRecord> for Entity {
    fn from(e: VaultRecord) -> Self {
        Entity::VaultRecord(e)
    }
}

/// Prices travel as decimal strings so that JSON consumers never see a
/// lossy number.
mod decimal_i256 {
    use alloy_primitives::I256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        I256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}
