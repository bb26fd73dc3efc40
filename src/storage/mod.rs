pub mod ledger_db;

pub use ledger_db::{AttributedTransaction, LedgerDb};
