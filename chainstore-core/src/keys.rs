//! Composite keys and durable identities.
//!
//! A [`CompositeKey`] joins an entity's identifying fields with `_` in a
//! fixed order. It addresses the cache and the embedded store. An
//! [`Identity`] is a UUIDv5 of the chain-scoped composite key and serves as
//! the relational primary key, which turns every durable write into an
//! idempotent upsert.

use crate::entities::{BlockNumber, ChainId, EntityKind};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{self, Write};
use uuid::Uuid;

/// Separator between key fields.
pub const KEY_SEPARATOR: char = '_';

/// Namespace for identity UUIDs. Fixed so that identities are the same in
/// every process that ever derives them.
pub const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_0c2e_8d4b_5e37_9b21_4c6d_e0f8_a357);

/// Canonical string key for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(String);

impl CompositeKey {
    /// Join already-stringifiable parts in order.
    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: fmt::Display,
    {
        let mut key = String::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            // Writing into a String cannot fail.
            let _ = write!(key, "{}", part);
        }
        Self(key)
    }

    /// Wrap a key string read back from a backend.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// This key prefixed with a chain id. Keys of most kinds are only
    /// unique within a chain; identities must be unique across all chains
    /// sharing a relational table.
    pub fn scoped(&self, chain_id: ChainId) -> CompositeKey {
        CompositeKey::from_parts([chain_id.to_string().as_str(), self.as_str()])
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CompositeKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CompositeKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for CompositeKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Deterministic durable primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    /// Derive the identity of a composite key. Pure: the same key always
    /// yields the same identity.
    pub fn derive(key: &CompositeKey) -> Self {
        Self(Uuid::new_v5(&IDENTITY_NAMESPACE, key.as_str().as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Entities that can be addressed by a composite key.
pub trait Keyed {
    /// The kind this type is stored as. Must be the same for all instances.
    fn kind() -> EntityKind;

    /// Chain the entity belongs to.
    fn chain_id(&self) -> ChainId;

    /// Cache and embedded-store key.
    fn composite_key(&self) -> CompositeKey;

    /// Relational primary key.
    fn identity(&self) -> Identity {
        Identity::derive(&self.composite_key().scoped(self.chain_id()))
    }
}

/// Addresses are keyed in EIP-55 checksummed form.
pub fn address_part(address: &Address) -> String {
    address.to_checksum(None)
}

pub fn block_time_key(block_number: BlockNumber) -> CompositeKey {
    CompositeKey::from_parts([block_number])
}

pub fn historical_price_key(block_number: BlockNumber, token: &Address) -> CompositeKey {
    CompositeKey::from_parts([block_number.to_string(), address_part(token)])
}

pub fn registry_vault_event_key(
    block_number: BlockNumber,
    registry: &Address,
    vault: &Address,
    token: &Address,
    api_version: &str,
) -> CompositeKey {
    CompositeKey::from_parts([
        block_number.to_string(),
        address_part(registry),
        address_part(vault),
        address_part(token),
        api_version.to_string(),
    ])
}

pub fn vault_record_key(
    vault: &Address,
    token: &Address,
    activation: u64,
    chain_id: ChainId,
) -> CompositeKey {
    CompositeKey::from_parts([
        address_part(vault),
        address_part(token),
        activation.to_string(),
        chain_id.to_string(),
    ])
}
