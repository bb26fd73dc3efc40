//! Durable store for attributed transactions and scan checkpoints.
//!
//! SQLite with WAL. Writes happen on the caller's thread: the indexing
//! cycle advances its checkpoint only after the covering batch is durably
//! committed, so there is no write queue to race against.

use crate::attribution::{AttributionSource, ExecutionMethod};
use crate::classify::EventKind;
use alloy::primitives::{Address, B256};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

/// The durable record for one mint/burn transaction. `tx_hash` is the
/// natural key; re-processing the same transaction overwrites in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributedTransaction {
    pub tx_hash: B256,
    pub block_number: u64,
    pub timestamp_ms: u64,
    pub kind: EventKind,
    /// Decimal string already scaled by the token's decimal count.
    pub amount: String,
    pub caller_address: Address,
    pub execution_method: ExecutionMethod,
    pub actor_id: Option<i64>,
    pub from_address: Address,
    pub to_address: Address,
}

#[derive(Debug, Clone)]
pub struct LedgerDb {
    path: PathBuf,
}

impl LedgerDb {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS checkpoints (
                    cursor TEXT PRIMARY KEY NOT NULL,
                    last_block INTEGER NOT NULL,
                    updated_at_ms INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS token_transactions (
                    tx_hash TEXT PRIMARY KEY NOT NULL,
                    block_number INTEGER NOT NULL,
                    timestamp_ms INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    amount TEXT NOT NULL,
                    caller_address TEXT NOT NULL,
                    execution_method TEXT NOT NULL,
                    actor_id INTEGER,
                    from_address TEXT NOT NULL,
                    to_address TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_token_tx_block ON token_transactions(block_number);
                CREATE INDEX IF NOT EXISTS idx_token_tx_actor ON token_transactions(actor_id);

                CREATE TABLE IF NOT EXISTS mint_requests (
                    tx_hash TEXT PRIMARY KEY NOT NULL,
                    actor_id INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS actor_wallets (
                    wallet_address TEXT PRIMARY KEY NOT NULL,
                    actor_id INTEGER NOT NULL
                );
                "#,
            )?;
            // WAL keeps operator reads from blocking the indexing cycle.
            let _ = conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            );
            Ok(())
        })
        .map(|_| ())
    }

    fn with_connection<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> anyhow::Result<T> {
        let conn = Connection::open(&self.path).with_context(|| {
            format!("open ledger db at {} for {}", self.path.display(), op)
        })?;
        conn.busy_timeout(Duration::from_millis(5_000))
            .with_context(|| format!("set busy timeout for {op}"))?;
        f(&conn).with_context(|| format!("ledger db operation failed: {op}"))
    }

    /// Idempotent by hash: a replayed transaction overwrites its row rather
    /// than duplicating it.
    pub fn upsert_transaction(&self, tx: &AttributedTransaction) -> anyhow::Result<()> {
        self.with_connection("upsert_transaction", |conn| {
            conn.execute(
                r#"
                INSERT INTO token_transactions (
                    tx_hash, block_number, timestamp_ms, kind, amount,
                    caller_address, execution_method, actor_id, from_address, to_address
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(tx_hash) DO UPDATE SET
                    block_number = excluded.block_number,
                    timestamp_ms = excluded.timestamp_ms,
                    kind = excluded.kind,
                    amount = excluded.amount,
                    caller_address = excluded.caller_address,
                    execution_method = excluded.execution_method,
                    actor_id = excluded.actor_id,
                    from_address = excluded.from_address,
                    to_address = excluded.to_address
                "#,
                params![
                    format!("{:#x}", tx.tx_hash),
                    to_i64(tx.block_number),
                    to_i64(tx.timestamp_ms),
                    tx.kind.as_str(),
                    tx.amount,
                    format!("{:#x}", tx.caller_address),
                    tx.execution_method.as_str(),
                    tx.actor_id,
                    format!("{:#x}", tx.from_address),
                    format!("{:#x}", tx.to_address),
                ],
            )
        })
        .map(|_| ())
    }

    pub fn get_transaction(
        &self,
        tx_hash: B256,
    ) -> anyhow::Result<Option<AttributedTransaction>> {
        self.with_connection("get_transaction", |conn| {
            conn.query_row(
                r#"
                SELECT tx_hash, block_number, timestamp_ms, kind, amount,
                       caller_address, execution_method, actor_id, from_address, to_address
                FROM token_transactions WHERE tx_hash = ?1
                "#,
                params![format!("{:#x}", tx_hash)],
                row_to_transaction,
            )
            .optional()
        })
    }

    pub fn transaction_count(&self) -> anyhow::Result<u64> {
        self.with_connection("transaction_count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM token_transactions", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .map(|n| n.max(0) as u64)
    }

    pub fn get_checkpoint(&self, cursor: &str) -> anyhow::Result<Option<u64>> {
        self.with_connection("get_checkpoint", |conn| {
            conn.query_row(
                "SELECT last_block FROM checkpoints WHERE cursor = ?1",
                params![cursor],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })
        .map(|opt| opt.map(|v| v.max(0) as u64))
    }

    /// Only called after every event in the covered range has been durably
    /// written; the cursor is how a restart knows where to resume.
    pub fn record_checkpoint(&self, cursor: &str, last_block: u64) -> anyhow::Result<()> {
        let now = now_ms();
        self.with_connection("record_checkpoint", |conn| {
            conn.execute(
                r#"
                INSERT INTO checkpoints (cursor, last_block, updated_at_ms)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(cursor) DO UPDATE SET
                    last_block = excluded.last_block,
                    updated_at_ms = excluded.updated_at_ms
                "#,
                params![cursor, to_i64(last_block), to_i64(now)],
            )
        })
        .map(|_| ())
    }

    /// Written by the off-chain request tracker; the indexing core only
    /// reads this table.
    pub fn insert_mint_request(&self, tx_hash: B256, actor_id: i64) -> anyhow::Result<()> {
        self.with_connection("insert_mint_request", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO mint_requests (tx_hash, actor_id) VALUES (?1, ?2)",
                params![format!("{:#x}", tx_hash), actor_id],
            )
        })
        .map(|_| ())
    }

    /// Written by account management; the indexing core only reads this
    /// table.
    pub fn insert_actor_wallet(&self, wallet: Address, actor_id: i64) -> anyhow::Result<()> {
        self.with_connection("insert_actor_wallet", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO actor_wallets (wallet_address, actor_id) VALUES (?1, ?2)",
                params![format!("{:#x}", wallet), actor_id],
            )
        })
        .map(|_| ())
    }
}

impl AttributionSource for LedgerDb {
    fn mint_request_actor(&self, tx_hash: B256) -> anyhow::Result<Option<i64>> {
        self.with_connection("mint_request_actor", |conn| {
            conn.query_row(
                "SELECT actor_id FROM mint_requests WHERE tx_hash = ?1",
                params![format!("{:#x}", tx_hash)],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn actor_for_wallet(&self, wallet: Address) -> anyhow::Result<Option<i64>> {
        self.with_connection("actor_for_wallet", |conn| {
            conn.query_row(
                "SELECT actor_id FROM actor_wallets WHERE wallet_address = ?1",
                params![format!("{:#x}", wallet)],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttributedTransaction> {
    let hash_str: String = row.get(0)?;
    let kind_str: String = row.get(3)?;
    let caller_str: String = row.get(5)?;
    let method_str: String = row.get(6)?;
    let from_str: String = row.get(8)?;
    let to_str: String = row.get(9)?;
    Ok(AttributedTransaction {
        tx_hash: B256::from_str(&hash_str)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?,
        block_number: row.get::<_, i64>(1)?.max(0) as u64,
        timestamp_ms: row.get::<_, i64>(2)?.max(0) as u64,
        kind: EventKind::from_db(&kind_str).ok_or_else(|| {
            rusqlite::Error::ToSqlConversionFailure(
                format!("unknown event kind `{kind_str}`").into(),
            )
        })?,
        amount: row.get(4)?,
        caller_address: Address::from_str(&caller_str)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?,
        execution_method: ExecutionMethod::from_db(&method_str).ok_or_else(|| {
            rusqlite::Error::ToSqlConversionFailure(
                format!("unknown execution method `{method_str}`").into(),
            )
        })?,
        actor_id: row.get(7)?,
        from_address: Address::from_str(&from_str)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?,
        to_address: Address::from_str(&to_str)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(e.into()))?,
    })
}

fn to_i64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{AttributedTransaction, LedgerDb};
    use crate::attribution::{AttributionSource, ExecutionMethod};
    use crate::classify::EventKind;
    use alloy::primitives::{Address, B256};
    use std::path::PathBuf;

    fn temp_db_path(label: &str) -> PathBuf {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time moves forward")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "mintscan-{label}-{now}-{}.db",
            std::process::id()
        ))
    }

    fn sample_tx(hash_byte: u8) -> AttributedTransaction {
        AttributedTransaction {
            tx_hash: B256::from([hash_byte; 32]),
            block_number: 120,
            timestamp_ms: 1_700_000_000_000,
            kind: EventKind::Mint,
            amount: "12.5".to_string(),
            caller_address: Address::from([0x01; 20]),
            execution_method: ExecutionMethod::CentralRelay,
            actor_id: Some(7),
            from_address: Address::ZERO,
            to_address: Address::from([0x02; 20]),
        }
    }

    #[test]
    fn upsert_is_idempotent_by_hash() {
        let db = LedgerDb::open(temp_db_path("upsert")).expect("open");
        let tx = sample_tx(0xaa);

        db.upsert_transaction(&tx).expect("first write");
        db.upsert_transaction(&tx).expect("replay write");
        assert_eq!(db.transaction_count().expect("count"), 1);

        let stored = db
            .get_transaction(tx.tx_hash)
            .expect("read")
            .expect("row exists");
        assert_eq!(stored, tx);
    }

    #[test]
    fn upsert_overwrites_changed_fields() {
        let db = LedgerDb::open(temp_db_path("overwrite")).expect("open");
        let mut tx = sample_tx(0xbb);
        db.upsert_transaction(&tx).expect("first write");

        tx.actor_id = Some(9);
        tx.amount = "100".to_string();
        db.upsert_transaction(&tx).expect("second write");

        let stored = db
            .get_transaction(tx.tx_hash)
            .expect("read")
            .expect("row exists");
        assert_eq!(stored.actor_id, Some(9));
        assert_eq!(stored.amount, "100");
        assert_eq!(db.transaction_count().expect("count"), 1);
    }

    #[test]
    fn checkpoint_roundtrip_and_overwrite() {
        let db = LedgerDb::open(temp_db_path("checkpoint")).expect("open");
        assert_eq!(db.get_checkpoint("token_events").expect("read"), None);

        db.record_checkpoint("token_events", 199).expect("write");
        assert_eq!(
            db.get_checkpoint("token_events").expect("read"),
            Some(199)
        );

        db.record_checkpoint("token_events", 250).expect("write");
        assert_eq!(
            db.get_checkpoint("token_events").expect("read"),
            Some(250)
        );
    }

    #[test]
    fn attribution_lookups_read_seeded_rows() {
        let db = LedgerDb::open(temp_db_path("attribution")).expect("open");
        let tx_hash = B256::from([0xcc; 32]);
        let wallet = Address::from([0x05; 20]);

        assert_eq!(db.mint_request_actor(tx_hash).expect("lookup"), None);
        assert_eq!(db.actor_for_wallet(wallet).expect("lookup"), None);

        db.insert_mint_request(tx_hash, 7).expect("seed request");
        db.insert_actor_wallet(wallet, 12).expect("seed wallet");

        assert_eq!(db.mint_request_actor(tx_hash).expect("lookup"), Some(7));
        assert_eq!(db.actor_for_wallet(wallet).expect("lookup"), Some(12));
    }

    #[test]
    fn none_actor_id_survives_roundtrip() {
        let db = LedgerDb::open(temp_db_path("noneactor")).expect("open");
        let mut tx = sample_tx(0xdd);
        tx.actor_id = None;
        db.upsert_transaction(&tx).expect("write");
        let stored = db
            .get_transaction(tx.tx_hash)
            .expect("read")
            .expect("row exists");
        assert_eq!(stored.actor_id, None);
    }
}
