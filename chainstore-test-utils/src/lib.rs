//! chainstore Test Utilities
//!
//! Shared test infrastructure for the chainstore workspace:
//! - Proptest generators for every entity type
//! - Fixtures for common scenarios
//! - Re-export of the recording backend double

pub use chainstore_storage::RecordingBackend;

pub use chainstore_core::{
    Address, BackendMode, BlockNumber, BlockTime, ChainId, HistoricalPrice, RegistryVaultEvent,
    StoreConfig, VaultRecord, B256, I256,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for chainstore entities.

    use super::*;
    use proptest::prelude::*;

    /// A handful of real chain ids plus arbitrary ones.
    pub fn arb_chain_id() -> impl Strategy<Value = ChainId> {
        prop_oneof![
            Just(1u64),
            Just(10u64),
            Just(137u64),
            Just(250u64),
            Just(42161u64),
            any::<u64>(),
        ]
    }

    pub fn arb_block_number() -> impl Strategy<Value = BlockNumber> {
        0u64..50_000_000
    }

    pub fn arb_address() -> impl Strategy<Value = Address> {
        any::<[u8; 20]>().prop_map(Address::from)
    }

    pub fn arb_b256() -> impl Strategy<Value = B256> {
        any::<[u8; 32]>().prop_map(B256::from)
    }

    /// Signed prices spanning well beyond 64 bits.
    pub fn arb_price() -> impl Strategy<Value = I256> {
        (any::<i64>(), any::<u64>()).prop_map(|(high, low)| {
            I256::from_dec_str(&format!("{}{:020}", high, low)).unwrap_or(I256::ZERO)
        })
    }

    pub fn arb_api_version() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("0.3.0".to_string()),
            Just("0.4.6".to_string()),
            Just("3.0.2".to_string()),
            "[0-9]\\.[0-9]\\.[0-9]{1,2}",
        ]
    }

    pub fn arb_block_time() -> impl Strategy<Value = BlockTime> {
        (arb_chain_id(), arb_block_number(), 1_438_269_973u64..2_000_000_000)
            .prop_map(|(chain_id, block, ts)| BlockTime::new(chain_id, block, ts))
    }

    pub fn arb_historical_price() -> impl Strategy<Value = HistoricalPrice> {
        (arb_chain_id(), arb_block_number(), arb_address(), arb_price()).prop_map(
            |(chain_id, block, token, price)| HistoricalPrice::new(chain_id, block, token, price),
        )
    }

    pub fn arb_registry_vault_event() -> impl Strategy<Value = RegistryVaultEvent> {
        (
            arb_chain_id(),
            (arb_address(), arb_address(), arb_address()),
            arb_block_number(),
            arb_b256(),
            arb_api_version(),
            (any::<u32>(), 0u64..10_000, 0u64..500, 0u64..1_000),
            prop_oneof![Just("standard".to_string()), Just("experimental".to_string())],
        )
            .prop_map(
                |(
                    chain_id,
                    (registry_address, vault_address, token_address),
                    block_number,
                    block_hash,
                    api_version,
                    (activation, management_fee, tx_index, log_index),
                    vault_type,
                )| RegistryVaultEvent {
                    chain_id,
                    registry_address,
                    vault_address,
                    token_address,
                    block_number,
                    block_hash,
                    api_version,
                    activation: u64::from(activation),
                    management_fee,
                    tx_index,
                    log_index,
                    vault_type,
                },
            )
    }

    pub fn arb_vault_record() -> impl Strategy<Value = VaultRecord> {
        (
            arb_chain_id(),
            (arb_address(), arb_address()),
            any::<u32>(),
            (arb_address(), arb_address(), arb_address(), arb_address()),
            "[A-Za-z]{2,8}",
            arb_api_version(),
            (0u64..=18, 0u64..10_000, 0u64..10_000, any::<bool>()),
            arb_block_number(),
        )
            .prop_map(
                |(
                    chain_id,
                    (address, token_address),
                    activation,
                    (management, governance, guardian, rewards),
                    symbol,
                    version,
                    (decimals, performance_fee, management_fee, endorsed),
                    inception,
                )| VaultRecord {
                    chain_id,
                    address,
                    token_address,
                    activation: u64::from(activation),
                    management,
                    governance,
                    guardian,
                    rewards,
                    vault_type: "standard".to_string(),
                    display_symbol: format!("yv{}", symbol),
                    formatted_symbol: format!("yv{}", symbol),
                    name: format!("{} yVault", symbol),
                    display_name: symbol.clone(),
                    formatted_name: format!("{} yVault", symbol),
                    symbol,
                    icon: String::new(),
                    version,
                    decimals,
                    performance_fee,
                    management_fee,
                    endorsed,
                    inception,
                },
            )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made entities and configurations.

    use super::*;
    use std::path::Path;

    /// Token used by the price scenarios.
    pub fn scenario_token() -> Address {
        Address::repeat_byte(0xAA)
    }

    /// Price from a decimal literal.
    pub fn price(value: &str) -> I256 {
        I256::from_dec_str(value).unwrap_or(I256::ZERO)
    }

    /// Registry event for `block_number` on `chain_id`.
    pub fn registry_vault_event(chain_id: ChainId, block_number: BlockNumber) -> RegistryVaultEvent {
        RegistryVaultEvent {
            chain_id,
            registry_address: Address::repeat_byte(0x01),
            vault_address: Address::repeat_byte(0x02),
            token_address: Address::repeat_byte(0x03),
            block_number,
            block_hash: B256::repeat_byte(0x04),
            api_version: "0.4.6".to_string(),
            activation: 1_700_000_000,
            management_fee: 200,
            tx_index: 1,
            log_index: 2,
            vault_type: "standard".to_string(),
        }
    }

    /// Vault record whose address bytes are all `address_byte`.
    pub fn vault_record(chain_id: ChainId, address_byte: u8) -> VaultRecord {
        VaultRecord {
            chain_id,
            address: Address::repeat_byte(address_byte),
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

    /// Embedded-store configuration rooted at `path`, sized for tests.
    pub fn embedded_config(path: &Path) -> StoreConfig {
        let mut config = StoreConfig::embedded(path);
        config.embedded.max_size_mb = 16;
        config.embedded.max_tables = 64;
        config
    }

    /// Configuration selecting `backend` with a fast governor.
    pub fn config_with(backend: BackendMode) -> StoreConfig {
        let mut config = StoreConfig {
            backend,
            ..StoreConfig::default()
        };
        config.governor.per_second = 1_000;
        config.governor.burst = 1_000;
        config
    }
}

pub use fixtures::{registry_vault_event, vault_record};
