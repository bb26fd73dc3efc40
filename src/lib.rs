//! Mintscan: incremental, checkpointed indexer for one token contract.
//!
//! The indexer scans the chain's `Transfer` log for a single contract,
//! classifies each entry as a mint or burn (plain transfers are discarded),
//! attributes mint/burn activity to an off-chain actor, and persists the
//! result exactly once. A durable per-cursor checkpoint bounds replay after
//! a crash to at most one batch width.

pub mod attribution;
pub mod chain;
pub mod classify;
pub mod config;
pub mod error;
pub mod indexer;
pub mod storage;
