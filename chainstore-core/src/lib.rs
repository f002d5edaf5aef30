//! chainstore core - entity types, key derivation and configuration
//!
//! Pure data structures shared by every chainstore crate. No I/O lives here.

pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod keys;

pub use config::{
    BackendMode, EmbeddedConfig, GovernorConfig, RelationalConfig, StoreConfig, WriterConfig,
};
pub use entities::{
    BlockNumber, BlockTime, ChainId, Entity, EntityKind, HistoricalPrice, RegistryVaultEvent,
    VaultRecord, PRICE_DECIMALS,
};
pub use error::{BackendError, ConfigError, StoreError, StoreResult};
pub use keys::{
    address_part, block_time_key, historical_price_key, registry_vault_event_key,
    vault_record_key, CompositeKey, Identity, Keyed, IDENTITY_NAMESPACE, KEY_SEPARATOR,
};

// Chain primitives used throughout the public API.
pub use alloy_primitives::{Address, B256, I256};
