//! Attribution of mint/burn activity to off-chain actors.
//!
//! A transaction submitted by the central relay is matched against the
//! off-chain mint request recorded for its hash; any other caller is mapped
//! through the wallet-to-actor table. Missing records are a valid terminal
//! state, never an error: some relay mints predate off-chain tracking or
//! come from manual intervention.

use alloy::primitives::{Address, B256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMethod {
    CentralRelay,
    DirectActor,
}

impl ExecutionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMethod::CentralRelay => "central_relay",
            ExecutionMethod::DirectActor => "direct_actor",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "central_relay" => Some(Self::CentralRelay),
            "direct_actor" => Some(Self::DirectActor),
            _ => None,
        }
    }
}

/// Read-only lookups backing attribution. The ledger store implements this
/// over its `mint_requests` and `actor_wallets` tables.
pub trait AttributionSource {
    fn mint_request_actor(&self, tx_hash: B256) -> anyhow::Result<Option<i64>>;
    fn actor_for_wallet(&self, wallet: Address) -> anyhow::Result<Option<i64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribution {
    pub method: ExecutionMethod,
    pub actor_id: Option<i64>,
}

/// Resolve the responsible actor for a mint/burn transaction.
///
/// `Address` equality is over raw bytes, so the relay comparison is
/// case-insensitive by construction regardless of how the configured value
/// was checksummed.
pub fn resolve_attribution(
    source: &impl AttributionSource,
    central_relay: Address,
    caller: Address,
    tx_hash: B256,
) -> anyhow::Result<Attribution> {
    if caller == central_relay {
        Ok(Attribution {
            method: ExecutionMethod::CentralRelay,
            actor_id: source.mint_request_actor(tx_hash)?,
        })
    } else {
        Ok(Attribution {
            method: ExecutionMethod::DirectActor,
            actor_id: source.actor_for_wallet(caller)?,
        })
    }
}
