//! Read-only view over a remote node.
//!
//! `ChainReader` is the seam between the indexing cycle and the RPC
//! provider: one concrete JSON-RPC implementation, and in-memory fakes on
//! the test side. All calls are side-effect-free.

use crate::error::ChainError;
use alloy::primitives::{keccak256, Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter};
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;

pub type HttpProvider = RootProvider<Http<Client>>;

/// Signature topic of `Transfer(address,address,uint256)`.
pub fn transfer_topic() -> B256 {
    keccak256("Transfer(address,address,uint256)")
}

/// A raw log entry as returned by the node. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    /// Externally-owned account that submitted the transaction.
    pub from: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block timestamp in seconds since the epoch.
    pub timestamp: u64,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn latest_height(&self) -> std::result::Result<u64, ChainError>;

    /// Fetch transfer logs for the watched contract over an inclusive block
    /// range. Fails with `RangeTooLarge` when the provider rejects the span;
    /// the caller shrinks and retries.
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> std::result::Result<Vec<RawLogEntry>, ChainError>;

    /// `None` when the receipt is not yet available (the node may serve logs
    /// for a block whose receipts still lag).
    async fn get_receipt(
        &self,
        tx_hash: B256,
    ) -> std::result::Result<Option<ReceiptInfo>, ChainError>;

    async fn get_block(
        &self,
        number: u64,
    ) -> std::result::Result<Option<BlockInfo>, ChainError>;
}

/// JSON-RPC implementation over an HTTP provider.
pub struct RpcChainReader {
    provider: HttpProvider,
    contract: Address,
    topic: B256,
}

impl RpcChainReader {
    pub fn connect(rpc_url: &str, contract: Address) -> anyhow::Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid rpc url `{rpc_url}`: {e}"))?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self {
            provider,
            contract,
            topic: transfer_topic(),
        })
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn latest_height(&self) -> std::result::Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(classify_provider_error)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> std::result::Result<Vec<RawLogEntry>, ChainError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(self.topic)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(classify_provider_error)?;

        let mut entries = Vec::with_capacity(logs.len());
        for log in logs {
            // Logs without block/tx anchors (pending blocks) cannot be
            // checkpointed; they will reappear once anchored.
            let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number)
            else {
                tracing::debug!("[RPC] Skipping unanchored log from provider");
                continue;
            };
            entries.push(RawLogEntry {
                tx_hash,
                block_number,
                log_index: log.log_index.unwrap_or(0),
                topics: log.topics().to_vec(),
                data: log.inner.data.data.to_vec(),
            });
        }
        Ok(entries)
    }

    async fn get_receipt(
        &self,
        tx_hash: B256,
    ) -> std::result::Result<Option<ReceiptInfo>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(classify_provider_error)?;
        Ok(receipt.map(|r| ReceiptInfo { from: r.from }))
    }

    async fn get_block(
        &self,
        number: u64,
    ) -> std::result::Result<Option<BlockInfo>, ChainError> {
        let block = self
            .provider
            .get_block_by_number(number.into(), BlockTransactionsKind::Hashes.into())
            .await
            .map_err(classify_provider_error)?;
        Ok(block.map(|b| BlockInfo {
            timestamp: b.header.timestamp,
        }))
    }
}

/// Providers phrase range-cap rejections inconsistently, so classification
/// is by message substring. Anything unrecognized is treated as transient.
fn classify_provider_error(err: impl std::fmt::Display) -> ChainError {
    const RANGE_MARKERS: &[&str] = &[
        "block range",
        "range too large",
        "query returned more than",
        "response size exceeded",
        "too many logs",
    ];
    let msg = err.to_string();
    let lowered = msg.to_ascii_lowercase();
    if RANGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ChainError::RangeTooLarge(msg)
    } else {
        ChainError::Transient(msg)
    }
}
