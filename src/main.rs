//! Binary entrypoint: wires configuration, logging, and the fixed-interval
//! scheduler around the indexing cycle.

use mintscan::chain::{ChainReader, RpcChainReader};
use mintscan::config::{self, IndexerConfig};
use mintscan::error::IndexerError;
use mintscan::indexer::{run_cycle, CycleOutcome};
use mintscan::storage::LedgerDb;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_env();

    // Default to `info` when `RUST_LOG` is unset or invalid to avoid a
    // silent startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Configuration errors are fatal here; the service refuses to cycle on
    // a bad address or missing RPC endpoint.
    let config = IndexerConfig::from_env()?;
    tracing::info!(
        "[STARTUP] Watching {:#x} (relay {:#x}) from block {}, batch span {}, every {}s",
        config.contract_address,
        config.central_relay_address,
        config.deployment_block,
        config.max_batch_span,
        config.poll_interval.as_secs()
    );

    let db = LedgerDb::open(&config.db_path)?;
    let reader = RpcChainReader::connect(&config.rpc_url, config.contract_address)?;

    // Probe connectivity early so a bad endpoint is visible immediately
    // instead of surfacing as the first cycle's failure.
    match reader.latest_height().await {
        Ok(head) => tracing::info!("[STARTUP] Connectivity OK. Latest block: {head}"),
        Err(err) => tracing::warn!("[STARTUP] Connectivity check failed: {err}"),
    }

    run_scheduler(&config, &reader, &db).await
}

/// One cycle at a time: each tick awaits full cycle completion before the
/// next fires, so overlapping invocations cannot happen. The fixed interval
/// doubles as backoff after a transient failure.
async fn run_scheduler(
    config: &IndexerConfig,
    reader: &(dyn ChainReader),
    db: &LedgerDb,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match run_cycle(config, reader, db).await {
            Ok(CycleOutcome::NoWork { latest, .. }) => {
                tracing::debug!("[CYCLE] Up to date at block {latest}");
            }
            Ok(CycleOutcome::Completed {
                from_block,
                to_block,
                batches,
            }) => {
                let events: u64 = batches.iter().map(|b| b.events_written).sum();
                let failed: usize = batches.iter().map(|b| b.failed.len()).sum();
                tracing::info!(
                    "[CYCLE] Indexed [{from_block}..={to_block}]: {events} events written, {failed} failed logs"
                );
            }
            Err(err @ IndexerError::Chain(_)) => {
                // Checkpoint has not advanced past the last committed
                // batch; the next tick resumes from the same point.
                tracing::warn!("[CYCLE] Aborted on rpc failure, retrying next tick: {err}");
            }
            Err(err) => {
                tracing::error!("[CYCLE] Aborted: {err}");
            }
        }
    }
}
