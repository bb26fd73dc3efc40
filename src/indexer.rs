//! The indexing cycle: one invocation catches the store up to the chain
//! head.
//!
//! Reads the checkpoint, partitions the gap into bounded batches, and
//! drives each batch through classify -> attribute -> persist before
//! advancing the checkpoint. Batches commit strictly in increasing block
//! order, so a crash replays at most one batch width.

use crate::attribution::resolve_attribution;
use crate::chain::{ChainReader, RawLogEntry};
use crate::classify::{classify_transfer, format_token_amount};
use crate::config::IndexerConfig;
use crate::error::{ChainError, IndexerError, Result};
use crate::storage::{AttributedTransaction, LedgerDb};
use alloy::primitives::B256;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Cursor name for the single contract this deployment watches.
pub const SCAN_CURSOR: &str = "token_events";

/// Depth cap for splitting a provider-rejected span; 1000 blocks halved
/// six times is a 15-block request, far below any provider limit.
const MAX_RANGE_SPLIT_DEPTH: u32 = 6;

/// Per-batch outcome. Failed logs are surfaced for manual follow-up; the
/// checkpoint still advances past them (explicit policy, see `run_cycle`).
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub from_block: u64,
    pub to_block: u64,
    pub events_written: u64,
    pub logs_discarded: u64,
    pub failed: Vec<FailedLog>,
}

#[derive(Debug, Serialize)]
pub struct FailedLog {
    pub tx_hash: B256,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub enum CycleOutcome {
    /// The checkpoint already covers the chain head; no log queries were
    /// issued.
    NoWork {
        checkpoint: Option<u64>,
        latest: u64,
    },
    Completed {
        from_block: u64,
        to_block: u64,
        batches: Vec<BatchReport>,
    },
}

impl CycleOutcome {
    pub fn events_written(&self) -> u64 {
        match self {
            CycleOutcome::NoWork { .. } => 0,
            CycleOutcome::Completed { batches, .. } => {
                batches.iter().map(|b| b.events_written).sum()
            }
        }
    }

    pub fn failed_logs(&self) -> usize {
        match self {
            CycleOutcome::NoWork { .. } => 0,
            CycleOutcome::Completed { batches, .. } => {
                batches.iter().map(|b| b.failed.len()).sum()
            }
        }
    }
}

enum LogFailure {
    /// Per-log problem (decode error, receipt/timestamp fetch): recorded
    /// in the batch report, processing continues.
    Skipped(String),
    /// Storage failure: partial batch commit risks inconsistency, abort
    /// the cycle without advancing the checkpoint.
    Fatal(IndexerError),
}

/// Run one full catch-up pass. The caller guarantees at most one cycle is
/// active at a time; this function holds no internal lock.
///
/// Known policy: the checkpoint advances at batch end even when individual
/// logs in the batch failed, so a persistently malformed entry is scanned
/// past rather than stalling the indexer. Failed hashes are logged and
/// reported for operator replay.
pub async fn run_cycle<R>(
    config: &IndexerConfig,
    reader: &R,
    db: &LedgerDb,
) -> Result<CycleOutcome>
where
    R: ChainReader + ?Sized,
{
    let checkpoint = db.get_checkpoint(SCAN_CURSOR).map_err(IndexerError::Storage)?;
    // Never scan from genesis: the contract cannot have logs before its
    // deployment block.
    let from_block = match checkpoint {
        Some(last) => last.saturating_add(1),
        None => config.deployment_block,
    };
    let latest = reader.latest_height().await?;
    if from_block > latest {
        tracing::debug!(
            "[CYCLE] Up to date (checkpoint {:?}, head {latest})",
            checkpoint
        );
        return Ok(CycleOutcome::NoWork { checkpoint, latest });
    }

    tracing::info!(
        "[CYCLE] Scanning [{from_block}..={latest}] in batches of {}",
        config.max_batch_span
    );

    let span = config.max_batch_span.max(1);
    // Block timestamps repeat across events in a block; memoize per cycle.
    let mut timestamps: HashMap<u64, u64> = HashMap::new();
    let mut batches = Vec::new();
    let mut batch_from = from_block;
    while batch_from <= latest {
        let batch_to = batch_upper_bound(batch_from, span, latest);
        let report =
            process_batch(config, reader, db, batch_from, batch_to, &mut timestamps).await?;
        if !report.failed.is_empty() {
            tracing::warn!(
                "[BATCH] [{batch_from}..={batch_to}]: {} logs not indexed, advancing anyway: {}",
                report.failed.len(),
                serde_json::to_string(&report.failed).unwrap_or_default()
            );
        }
        db.record_checkpoint(SCAN_CURSOR, batch_to)
            .map_err(IndexerError::Storage)?;
        tracing::debug!(
            "[BATCH] Committed [{batch_from}..={batch_to}]: {} events, {} discarded",
            report.events_written,
            report.logs_discarded
        );
        batches.push(report);
        batch_from = batch_to.saturating_add(1);
    }

    Ok(CycleOutcome::Completed {
        from_block,
        to_block: latest,
        batches,
    })
}

fn batch_upper_bound(from: u64, span: u64, latest: u64) -> u64 {
    from.saturating_add(span - 1).min(latest)
}

async fn process_batch<R>(
    config: &IndexerConfig,
    reader: &R,
    db: &LedgerDb,
    from_block: u64,
    to_block: u64,
    timestamps: &mut HashMap<u64, u64>,
) -> Result<BatchReport>
where
    R: ChainReader + ?Sized,
{
    let mut logs = fetch_logs_split(reader, from_block, to_block, 0).await?;
    // Providers are not required to return ordered logs; keep receipt and
    // timestamp lookups deterministic.
    logs.sort_by_key(|log| (log.block_number, log.log_index));

    let mut report = BatchReport {
        from_block,
        to_block,
        ..Default::default()
    };
    for log in &logs {
        match process_log(config, reader, db, log, timestamps).await {
            Ok(true) => report.events_written += 1,
            Ok(false) => report.logs_discarded += 1,
            Err(LogFailure::Skipped(reason)) => {
                tracing::warn!(
                    "[BATCH] Log {:#x} in [{from_block}..={to_block}] not indexed: {reason}",
                    log.tx_hash
                );
                report.failed.push(FailedLog {
                    tx_hash: log.tx_hash,
                    reason,
                });
            }
            Err(LogFailure::Fatal(err)) => return Err(err),
        }
    }
    Ok(report)
}

/// Returns `Ok(true)` when a row was written, `Ok(false)` for a discarded
/// plain transfer.
async fn process_log<R>(
    config: &IndexerConfig,
    reader: &R,
    db: &LedgerDb,
    log: &RawLogEntry,
    timestamps: &mut HashMap<u64, u64>,
) -> std::result::Result<bool, LogFailure>
where
    R: ChainReader + ?Sized,
{
    let event = classify_transfer(log).map_err(|e| LogFailure::Skipped(e.to_string()))?;
    let Some(event) = event else {
        return Ok(false);
    };

    let receipt = reader
        .get_receipt(log.tx_hash)
        .await
        .map_err(|e| LogFailure::Skipped(format!("receipt fetch failed: {e}")))?
        .ok_or_else(|| LogFailure::Skipped("receipt not yet available".to_string()))?;

    let timestamp_ms = match timestamps.get(&log.block_number) {
        Some(ts) => *ts,
        None => {
            let block = reader
                .get_block(log.block_number)
                .await
                .map_err(|e| LogFailure::Skipped(format!("block fetch failed: {e}")))?
                .ok_or_else(|| {
                    LogFailure::Skipped(format!("block {} not available", log.block_number))
                })?;
            let ts = block.timestamp.saturating_mul(1_000);
            timestamps.insert(log.block_number, ts);
            ts
        }
    };

    let attribution = resolve_attribution(
        db,
        config.central_relay_address,
        receipt.from,
        log.tx_hash,
    )
    .map_err(|e| LogFailure::Fatal(IndexerError::Storage(e)))?;

    let row = AttributedTransaction {
        tx_hash: event.tx_hash,
        block_number: event.block_number,
        timestamp_ms,
        kind: event.kind,
        amount: format_token_amount(event.amount, config.token_decimals),
        caller_address: receipt.from,
        execution_method: attribution.method,
        actor_id: attribution.actor_id,
        from_address: event.from,
        to_address: event.to,
    };
    db.upsert_transaction(&row)
        .map_err(|e| LogFailure::Fatal(IndexerError::Storage(e)))?;
    Ok(true)
}

/// Fetch logs for an inclusive range, recursively halving the span when
/// the provider rejects it. The batch boundary (and thus the checkpoint
/// target) is unchanged by splitting.
fn fetch_logs_split<'a, R>(
    reader: &'a R,
    from_block: u64,
    to_block: u64,
    depth: u32,
) -> Pin<Box<dyn Future<Output = std::result::Result<Vec<RawLogEntry>, ChainError>> + Send + 'a>>
where
    R: ChainReader + ?Sized,
{
    Box::pin(async move {
        match reader.get_logs(from_block, to_block).await {
            Ok(logs) => Ok(logs),
            Err(ChainError::RangeTooLarge(reason))
                if from_block < to_block && depth < MAX_RANGE_SPLIT_DEPTH =>
            {
                tracing::debug!(
                    "[BATCH] Provider rejected span [{from_block}..={to_block}], splitting: {reason}"
                );
                let mid = from_block + (to_block - from_block) / 2;
                let mut left = fetch_logs_split(reader, from_block, mid, depth + 1).await?;
                let right = fetch_logs_split(reader, mid + 1, to_block, depth + 1).await?;
                left.extend(right);
                Ok(left)
            }
            Err(err) => Err(err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::batch_upper_bound;

    #[test]
    fn batch_bounds_respect_span_and_head() {
        assert_eq!(batch_upper_bound(100, 100, 250), 199);
        assert_eq!(batch_upper_bound(200, 100, 250), 250);
        assert_eq!(batch_upper_bound(250, 100, 250), 250);
        assert_eq!(batch_upper_bound(0, 1, 10), 0);
        assert_eq!(batch_upper_bound(u64::MAX - 1, 1_000, u64::MAX), u64::MAX);
    }
}
