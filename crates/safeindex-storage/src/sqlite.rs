//! SQLite storage backend for SafeIndex.
//!
//! Persists blocks, transactions, indexer output and derived entities to a
//! single SQLite file through `sqlx`, with WAL mode for concurrent readers.
//!
//! # Usage
//! ```rust,no_run
//! use safeindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./safeindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use safeindex_core::derived::{
    AddressScope, InternalTx, InternalTxDecoded, InternalTxKey, ModuleTransaction,
    MultisigConfirmation, MultisigTransaction, SafeStatus,
};
use safeindex_core::error::IndexingError;
use safeindex_core::store::{DerivedCounts, DerivedStateTx, DerivedStore, IndexStore};
use safeindex_core::types::{
    EthereumBlock, EthereumTx, RawBlock, RawLog, RawTransaction, TransactionReceipt,
};

/// SQLite limits bound parameters per statement; stay well below it.
const MAX_IN_PARAMS: usize = 500;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        block_hash   TEXT    PRIMARY KEY,
        number       INTEGER NOT NULL,
        parent_hash  TEXT    NOT NULL,
        timestamp    INTEGER NOT NULL,
        confirmed    INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks (number);",
    "CREATE TABLE IF NOT EXISTS ethereum_txs (
        tx_hash           TEXT    PRIMARY KEY,
        block_hash        TEXT    REFERENCES blocks (block_hash),
        block_number      INTEGER,
        transaction_index INTEGER,
        from_address      TEXT    NOT NULL,
        to_address        TEXT,
        value             TEXT    NOT NULL,
        gas               INTEGER NOT NULL,
        gas_price         TEXT,
        nonce             INTEGER NOT NULL,
        data              TEXT    NOT NULL,
        gas_used          INTEGER,
        status            INTEGER,
        logs_json         TEXT    NOT NULL DEFAULT '[]',
        created_at        INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS internal_txs (
        tx_hash       TEXT    NOT NULL,
        trace_address TEXT    NOT NULL,
        block_number  INTEGER NOT NULL,
        from_address  TEXT    NOT NULL,
        to_address    TEXT,
        value         TEXT    NOT NULL,
        call_type     TEXT,
        data          TEXT    NOT NULL,
        PRIMARY KEY (tx_hash, trace_address)
    );",
    "CREATE INDEX IF NOT EXISTS idx_internal_txs_from ON internal_txs (LOWER(from_address));",
    "CREATE TABLE IF NOT EXISTS internal_txs_decoded (
        tx_hash       TEXT    NOT NULL,
        trace_address TEXT    NOT NULL,
        selector      TEXT    NOT NULL,
        processed     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tx_hash, trace_address)
    );",
    "CREATE TABLE IF NOT EXISTS multisig_txs (
        safe_tx_hash TEXT    PRIMARY KEY,
        safe         TEXT    NOT NULL,
        ethereum_tx  TEXT,
        nonce        INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS multisig_confirmations (
        multisig_transaction_hash TEXT NOT NULL,
        owner                     TEXT NOT NULL,
        ethereum_tx               TEXT,
        signature                 TEXT,
        PRIMARY KEY (multisig_transaction_hash, owner)
    );",
    "CREATE TABLE IF NOT EXISTS module_txs (
        tx_hash       TEXT NOT NULL,
        trace_address TEXT NOT NULL,
        safe          TEXT NOT NULL,
        module        TEXT NOT NULL,
        to_address    TEXT NOT NULL,
        value         TEXT NOT NULL,
        data          TEXT NOT NULL,
        PRIMARY KEY (tx_hash, trace_address)
    );",
    "CREATE TABLE IF NOT EXISTS safe_statuses (
        tx_hash       TEXT    NOT NULL,
        trace_address TEXT    NOT NULL,
        address       TEXT    NOT NULL,
        nonce         INTEGER NOT NULL,
        owners_json   TEXT    NOT NULL,
        threshold     INTEGER NOT NULL,
        master_copy   TEXT    NOT NULL,
        PRIMARY KEY (tx_hash, trace_address)
    );",
    "CREATE TABLE IF NOT EXISTS master_copies (address TEXT PRIMARY KEY);",
    "CREATE TABLE IF NOT EXISTS safe_contracts (address TEXT PRIMARY KEY);",
];

fn storage_err(e: sqlx::Error) -> IndexingError {
    IndexingError::Storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `?, ?, ?` with `n` placeholders.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn block_from_row(row: &SqliteRow) -> EthereumBlock {
    EthereumBlock {
        number: row.get::<i64, _>("number") as u64,
        block_hash: row.get("block_hash"),
        parent_hash: row.get("parent_hash"),
        timestamp: row.get("timestamp"),
        confirmed: row.get::<i64, _>("confirmed") != 0,
    }
}

fn tx_from_row(row: &SqliteRow) -> Result<EthereumTx, IndexingError> {
    let logs_json: String = row.get("logs_json");
    let logs: Vec<RawLog> = serde_json::from_str(&logs_json)
        .map_err(|e| IndexingError::Storage(format!("decode logs_json: {e}")))?;
    Ok(EthereumTx {
        tx_hash: row.get("tx_hash"),
        block_hash: row.get("block_hash"),
        block_number: row.get::<Option<i64>, _>("block_number").map(|n| n as u64),
        transaction_index: row
            .get::<Option<i64>, _>("transaction_index")
            .map(|n| n as u32),
        from: row.get("from_address"),
        to: row.get("to_address"),
        value: row.get("value"),
        gas: row.get::<i64, _>("gas") as u64,
        gas_price: row.get("gas_price"),
        nonce: row.get::<i64, _>("nonce") as u64,
        data: row.get("data"),
        gas_used: row.get::<Option<i64>, _>("gas_used").map(|n| n as u64),
        status: row.get::<Option<i64>, _>("status").map(|n| n as u64),
        logs,
    })
}

/// SQLite-backed index store.
///
/// Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./safeindex.db"`) or a full
    /// SQLite URL (`"sqlite:./safeindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexingError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection to `sqlite::memory:` is a separate database, so
    /// the pool is pinned to one connection that never expires.
    pub async fn in_memory() -> Result<Self, IndexingError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexingError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn count(&self, sql: &str) -> Result<u64, IndexingError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> Result<Option<EthereumTx>, IndexingError> {
        let row = sqlx::query("SELECT * FROM ethereum_txs WHERE tx_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn insert_tx_row(&self, row: &EthereumTx) -> Result<(), IndexingError> {
        let logs_json = serde_json::to_string(&row.logs)
            .map_err(|e| IndexingError::Storage(format!("encode logs: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO ethereum_txs
                (tx_hash, block_hash, block_number, transaction_index, from_address, to_address,
                 value, gas, gas_price, nonce, data, gas_used, status, logs_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.tx_hash)
        .bind(&row.block_hash)
        .bind(row.block_number.map(|n| n as i64))
        .bind(row.transaction_index.map(|n| n as i64))
        .bind(&row.from)
        .bind(&row.to)
        .bind(&row.value)
        .bind(row.gas as i64)
        .bind(&row.gas_price)
        .bind(row.nonce as i64)
        .bind(&row.data)
        .bind(row.gas_used.map(|n| n as i64))
        .bind(row.status.map(|n| n as i64))
        .bind(&logs_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(IndexingError::DuplicateTransaction {
                tx_hash: row.tx_hash.clone(),
            }),
            Err(e) => Err(storage_err(e)),
        }
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn get_block(&self, block_hash: &str) -> Result<Option<EthereumBlock>, IndexingError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE block_hash = ?")
            .bind(block_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(block_from_row))
    }

    async fn get_or_create_block(
        &self,
        block: &RawBlock,
        confirmed: bool,
    ) -> Result<EthereumBlock, IndexingError> {
        // Concurrent creators collapse onto one row; confirmation only moves forward.
        sqlx::query(
            "INSERT INTO blocks (block_hash, number, parent_hash, timestamp, confirmed)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (block_hash) DO UPDATE SET confirmed = MAX(confirmed, excluded.confirmed)",
        )
        .bind(&block.hash)
        .bind(block.number as i64)
        .bind(&block.parent_hash)
        .bind(block.timestamp)
        .bind(confirmed as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        self.get_block(&block.hash)
            .await?
            .ok_or_else(|| IndexingError::BlockNotFound {
                block_hash: block.hash.clone(),
            })
    }

    async fn confirm_blocks(&self, up_to_number: u64) -> Result<u64, IndexingError> {
        let result = sqlx::query("UPDATE blocks SET confirmed = 1 WHERE confirmed = 0 AND number <= ?")
            .bind(up_to_number as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<EthereumTx>, IndexingError> {
        self.fetch_transaction(tx_hash).await
    }

    async fn get_mined_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<EthereumTx>, IndexingError> {
        let mut out = Vec::with_capacity(tx_hashes.len());
        for chunk in tx_hashes.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT * FROM ethereum_txs WHERE block_hash IS NOT NULL AND tx_hash IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for hash in chunk {
                query = query.bind(hash);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
            for row in &rows {
                out.push(tx_from_row(row)?);
            }
        }
        Ok(out)
    }

    async fn create_transaction(
        &self,
        tx: &RawTransaction,
        receipt: &TransactionReceipt,
        block: &EthereumBlock,
    ) -> Result<EthereumTx, IndexingError> {
        let row = EthereumTx::from_parts(tx, receipt, block);
        self.insert_tx_row(&row).await?;
        debug!(tx_hash = %row.tx_hash, block = block.number, "transaction stored");
        Ok(row)
    }

    async fn create_pending_transaction(
        &self,
        tx: &RawTransaction,
    ) -> Result<EthereumTx, IndexingError> {
        let row = EthereumTx::pending(tx);
        self.insert_tx_row(&row).await?;
        Ok(row)
    }

    async fn update_transaction_block_and_receipt(
        &self,
        tx_hash: &str,
        block: &EthereumBlock,
        receipt: &TransactionReceipt,
    ) -> Result<EthereumTx, IndexingError> {
        let mut row = self
            .fetch_transaction(tx_hash)
            .await?
            .ok_or_else(|| IndexingError::TransactionNotFound {
                tx_hash: tx_hash.to_string(),
            })?;
        row.apply_block_and_receipt(block, receipt);

        let logs_json = serde_json::to_string(&row.logs)
            .map_err(|e| IndexingError::Storage(format!("encode logs: {e}")))?;

        sqlx::query(
            "UPDATE ethereum_txs
             SET block_hash = ?, block_number = ?, gas_used = ?, status = ?, gas_price = ?, logs_json = ?
             WHERE tx_hash = ?",
        )
        .bind(&row.block_hash)
        .bind(row.block_number.map(|n| n as i64))
        .bind(row.gas_used.map(|n| n as i64))
        .bind(row.status.map(|n| n as i64))
        .bind(&row.gas_price)
        .bind(&logs_json)
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(tx_hash, block = block.number, "pending transaction linked to block");
        Ok(row)
    }

    async fn begin_derived(&self) -> Result<Box<dyn DerivedStateTx>, IndexingError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteDerivedTx { tx }))
    }

    async fn insert_internal_txs(
        &self,
        txs: &[InternalTx],
        decoded: &[InternalTxDecoded],
    ) -> Result<usize, IndexingError> {
        if txs.is_empty() && decoded.is_empty() {
            return Ok(0);
        }

        let mut db_tx = self.pool.begin().await.map_err(storage_err)?;
        let mut inserted = 0usize;

        for itx in txs {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO internal_txs
                    (tx_hash, trace_address, block_number, from_address, to_address, value, call_type, data)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&itx.key.tx_hash)
            .bind(&itx.key.trace_address)
            .bind(itx.block_number as i64)
            .bind(&itx.from)
            .bind(&itx.to)
            .bind(&itx.value)
            .bind(&itx.call_type)
            .bind(&itx.data)
            .execute(&mut *db_tx)
            .await
            .map_err(storage_err)?;
            inserted += result.rows_affected() as usize;
        }

        for marker in decoded {
            sqlx::query(
                "INSERT OR IGNORE INTO internal_txs_decoded (tx_hash, trace_address, selector, processed)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&marker.key.tx_hash)
            .bind(&marker.key.trace_address)
            .bind(&marker.selector)
            .bind(marker.processed as i64)
            .execute(&mut *db_tx)
            .await
            .map_err(storage_err)?;
        }

        db_tx
            .commit()
            .await
            .map_err(|e| IndexingError::Storage(format!("commit internal txs: {e}")))?;

        debug!(inserted, markers = decoded.len(), "internal txs stored");
        Ok(inserted)
    }

    async fn list_master_copies(&self) -> Result<Vec<String>, IndexingError> {
        let rows = sqlx::query("SELECT address FROM master_copies ORDER BY address")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows.iter().map(|r| r.get("address")).collect())
    }

    async fn list_safe_contracts(&self) -> Result<Vec<String>, IndexingError> {
        let rows = sqlx::query("SELECT address FROM safe_contracts ORDER BY address")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows.iter().map(|r| r.get("address")).collect())
    }
}

// ─── DerivedStore impl ───────────────────────────────────────────────────────

#[async_trait]
impl DerivedStore for SqliteStore {
    async fn add_master_copy(&self, address: &str) -> Result<(), IndexingError> {
        sqlx::query("INSERT OR IGNORE INTO master_copies (address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn add_safe_contract(&self, address: &str) -> Result<(), IndexingError> {
        sqlx::query("INSERT OR IGNORE INTO safe_contracts (address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_multisig_transaction(
        &self,
        tx: &MultisigTransaction,
    ) -> Result<(), IndexingError> {
        sqlx::query(
            "INSERT OR REPLACE INTO multisig_txs (safe_tx_hash, safe, ethereum_tx, nonce)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&tx.safe_tx_hash)
        .bind(&tx.safe)
        .bind(&tx.ethereum_tx)
        .bind(tx.nonce as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_multisig_confirmation(
        &self,
        confirmation: &MultisigConfirmation,
    ) -> Result<(), IndexingError> {
        sqlx::query(
            "INSERT OR REPLACE INTO multisig_confirmations
                (multisig_transaction_hash, owner, ethereum_tx, signature)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&confirmation.multisig_transaction_hash)
        .bind(&confirmation.owner)
        .bind(&confirmation.ethereum_tx)
        .bind(&confirmation.signature)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_module_transaction(&self, tx: &ModuleTransaction) -> Result<(), IndexingError> {
        sqlx::query(
            "INSERT OR REPLACE INTO module_txs
                (tx_hash, trace_address, safe, module, to_address, value, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.internal_tx.tx_hash)
        .bind(&tx.internal_tx.trace_address)
        .bind(&tx.safe)
        .bind(&tx.module)
        .bind(&tx.to)
        .bind(&tx.value)
        .bind(&tx.data)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_safe_status(&self, status: &SafeStatus) -> Result<(), IndexingError> {
        let owners_json = serde_json::to_string(&status.owners)
            .map_err(|e| IndexingError::Storage(format!("encode owners: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO safe_statuses
                (tx_hash, trace_address, address, nonce, owners_json, threshold, master_copy)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&status.internal_tx.tx_hash)
        .bind(&status.internal_tx.trace_address)
        .bind(&status.address)
        .bind(status.nonce as i64)
        .bind(&owners_json)
        .bind(status.threshold as i64)
        .bind(&status.master_copy)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn pending_decoded_txs(&self) -> Result<Vec<InternalTxDecoded>, IndexingError> {
        let rows = sqlx::query(
            "SELECT tx_hash, trace_address, selector, processed FROM internal_txs_decoded
             WHERE processed = 0 ORDER BY tx_hash, trace_address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .iter()
            .map(|r| InternalTxDecoded {
                key: InternalTxKey::new(
                    r.get::<String, _>("tx_hash"),
                    r.get::<String, _>("trace_address"),
                ),
                selector: r.get("selector"),
                processed: r.get::<i64, _>("processed") != 0,
            })
            .collect())
    }

    async fn set_decoded_processed(&self, key: &InternalTxKey) -> Result<(), IndexingError> {
        sqlx::query(
            "UPDATE internal_txs_decoded SET processed = 1 WHERE tx_hash = ? AND trace_address = ?",
        )
        .bind(&key.tx_hash)
        .bind(&key.trace_address)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn derived_counts(&self) -> Result<DerivedCounts, IndexingError> {
        Ok(DerivedCounts {
            blocks: self.count("SELECT COUNT(*) FROM blocks").await?,
            transactions: self.count("SELECT COUNT(*) FROM ethereum_txs").await?,
            internal_txs: self.count("SELECT COUNT(*) FROM internal_txs").await?,
            decoded_pending: self
                .count("SELECT COUNT(*) FROM internal_txs_decoded WHERE processed = 0")
                .await?,
            decoded_processed: self
                .count("SELECT COUNT(*) FROM internal_txs_decoded WHERE processed = 1")
                .await?,
            multisig_txs: self.count("SELECT COUNT(*) FROM multisig_txs").await?,
            confirmations: self.count("SELECT COUNT(*) FROM multisig_confirmations").await?,
            module_txs: self.count("SELECT COUNT(*) FROM module_txs").await?,
            safe_statuses: self.count("SELECT COUNT(*) FROM safe_statuses").await?,
        })
    }
}

// ─── Derived-state unit of work ──────────────────────────────────────────────

struct SqliteDerivedTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteDerivedTx {
    /// Run `unscoped` for the global scope, or `scoped` with its
    /// `{addresses}` marker expanded to one placeholder per address.
    ///
    /// Large scopes run as several statements of at most `MAX_IN_PARAMS`
    /// addresses, all inside this transaction.
    async fn run(
        &mut self,
        unscoped: &str,
        scoped: &str,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        let Some(addresses) = scope.addresses() else {
            let result = sqlx::query(unscoped)
                .execute(&mut *self.tx)
                .await
                .map_err(storage_err)?;
            return Ok(result.rows_affected());
        };

        let mut affected = 0;
        for chunk in addresses.chunks(MAX_IN_PARAMS) {
            let sql = scoped.replace("{addresses}", &placeholders(chunk.len()));
            let mut query = sqlx::query(&sql);
            for address in chunk {
                query = query.bind(address);
            }
            affected += query
                .execute(&mut *self.tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
        }
        Ok(affected)
    }
}

#[async_trait]
impl DerivedStateTx for SqliteDerivedTx {
    async fn delete_onchain_confirmations(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        self.run(
            "DELETE FROM multisig_confirmations WHERE signature IS NULL",
            "DELETE FROM multisig_confirmations
             WHERE signature IS NULL AND multisig_transaction_hash IN (
                SELECT safe_tx_hash FROM multisig_txs WHERE LOWER(safe) IN ({addresses})
             )",
            scope,
        )
        .await
    }

    async fn delete_indexed_multisig_txs(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        self.run(
            "DELETE FROM multisig_txs WHERE ethereum_tx IS NOT NULL",
            "DELETE FROM multisig_txs WHERE ethereum_tx IS NOT NULL AND LOWER(safe) IN ({addresses})",
            scope,
        )
        .await
    }

    async fn delete_module_txs(&mut self, scope: &AddressScope) -> Result<u64, IndexingError> {
        self.run(
            "DELETE FROM module_txs",
            "DELETE FROM module_txs WHERE LOWER(safe) IN ({addresses})",
            scope,
        )
        .await
    }

    async fn delete_safe_statuses(&mut self, scope: &AddressScope) -> Result<u64, IndexingError> {
        self.run(
            "DELETE FROM safe_statuses",
            "DELETE FROM safe_statuses WHERE LOWER(address) IN ({addresses})",
            scope,
        )
        .await
    }

    async fn mark_internal_txs_unprocessed(
        &mut self,
        scope: &AddressScope,
    ) -> Result<u64, IndexingError> {
        self.run(
            "UPDATE internal_txs_decoded SET processed = 0",
            "UPDATE internal_txs_decoded SET processed = 0
             WHERE EXISTS (
                SELECT 1 FROM internal_txs i
                WHERE i.tx_hash = internal_txs_decoded.tx_hash
                  AND i.trace_address = internal_txs_decoded.trace_address
                  AND LOWER(i.from_address) IN ({addresses})
             )",
            scope,
        )
        .await
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexingError> {
        self.tx
            .commit()
            .await
            .map_err(|e| IndexingError::Storage(format!("commit reprocess: {e}")))
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexingError> {
        self.tx.rollback().await.map_err(storage_err)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_block(number: u64, hash: &str) -> RawBlock {
        RawBlock {
            number,
            hash: hash.into(),
            parent_hash: "0x0".into(),
            timestamp: 1_700_000_000,
        }
    }

    fn raw_tx(hash: &str) -> RawTransaction {
        RawTransaction {
            hash: hash.into(),
            block_hash: Some("0xb1".into()),
            block_number: Some(1),
            transaction_index: Some(2),
            from: "0x1111111111111111111111111111111111111111".into(),
            to: None,
            value: "1000000000000000000".into(),
            gas: 100_000,
            gas_price: Some("7".into()),
            nonce: 9,
            input: "0x6a761202".into(),
        }
    }

    fn receipt(hash: &str, block: &EthereumBlock) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash.into(),
            block_hash: Some(block.block_hash.clone()),
            block_number: Some(block.number),
            gas_used: 55_000,
            effective_gas_price: None,
            status: Some(1),
            logs: vec![RawLog {
                address: "0xsafe".into(),
                topics: vec!["0x442e715f".into()],
                data: "0x".into(),
                block_number: block.number,
                block_hash: block.block_hash.clone(),
                tx_hash: hash.into(),
                log_index: 0,
                removed: false,
            }],
        }
    }

    fn key(tx: &str) -> InternalTxKey {
        InternalTxKey::new(tx, "0")
    }

    async fn seed_derived(store: &SqliteStore, safe: &str, n: u32) {
        let tx_hash = format!("0xi{safe}{n}");
        store
            .insert_internal_txs(
                &[InternalTx {
                    key: key(&tx_hash),
                    block_number: 1,
                    from: safe.into(),
                    to: Some("0xmaster".into()),
                    value: "0".into(),
                    call_type: Some("delegatecall".into()),
                    data: "0x6a761202".into(),
                }],
                &[InternalTxDecoded {
                    key: key(&tx_hash),
                    selector: "0x6a761202".into(),
                    processed: true,
                }],
            )
            .await
            .unwrap();
        store
            .insert_safe_status(&SafeStatus {
                internal_tx: key(&tx_hash),
                address: safe.into(),
                nonce: n as u64,
                owners: vec!["0xowner".into()],
                threshold: 1,
                master_copy: "0xmaster".into(),
            })
            .await
            .unwrap();
        let safe_tx_hash = format!("0xsafe-tx-{safe}{n}");
        store
            .insert_multisig_transaction(&MultisigTransaction {
                safe_tx_hash: safe_tx_hash.clone(),
                safe: safe.into(),
                ethereum_tx: Some(tx_hash.clone()),
                nonce: n as u64,
            })
            .await
            .unwrap();
        store
            .insert_multisig_confirmation(&MultisigConfirmation {
                multisig_transaction_hash: safe_tx_hash,
                owner: "0xowner".into(),
                ethereum_tx: Some(tx_hash),
                signature: None,
            })
            .await
            .unwrap();
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_get_or_create() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get_block("0xb1").await.unwrap().is_none());

        let created = store.get_or_create_block(&raw_block(1, "0xb1"), false).await.unwrap();
        assert!(!created.confirmed);
        let again = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        assert!(again.confirmed);
        let not_downgraded = store.get_or_create_block(&raw_block(1, "0xb1"), false).await.unwrap();
        assert!(not_downgraded.confirmed);

        assert_eq!(store.derived_counts().await.unwrap().blocks, 1);
    }

    #[tokio::test]
    async fn confirm_blocks_up_to() {
        let store = SqliteStore::in_memory().await.unwrap();
        for i in 1..=5u64 {
            store.get_or_create_block(&raw_block(i, &format!("0xb{i}")), false).await.unwrap();
        }
        assert_eq!(store.confirm_blocks(3).await.unwrap(), 3);
        assert_eq!(store.confirm_blocks(3).await.unwrap(), 0);
        assert!(!store.get_block("0xb4").await.unwrap().unwrap().confirmed);
    }

    // ── Transactions ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transaction_roundtrip_and_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();

        let created = store
            .create_transaction(&raw_tx("0xt1"), &receipt("0xt1", &block), &block)
            .await
            .unwrap();
        let loaded = store.get_transaction("0xt1").await.unwrap().unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.logs.len(), 1);
        assert_eq!(loaded.to, None);

        let err = store
            .create_transaction(&raw_tx("0xt1"), &receipt("0xt1", &block), &block)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn pending_transaction_gets_linked() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create_pending_transaction(&raw_tx("0xp")).await.unwrap();
        assert!(store.get_mined_transactions(&["0xp".into()]).await.unwrap().is_empty());

        let block = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        let updated = store
            .update_transaction_block_and_receipt("0xp", &block, &receipt("0xp", &block))
            .await
            .unwrap();
        assert!(updated.is_mined());
        assert_eq!(updated.gas_used, Some(55_000));

        let mined = store.get_mined_transactions(&["0xp".into()]).await.unwrap();
        assert_eq!(mined, vec![updated]);
    }

    #[tokio::test]
    async fn update_missing_transaction_fails() {
        let store = SqliteStore::in_memory().await.unwrap();
        let block = store.get_or_create_block(&raw_block(1, "0xb1"), true).await.unwrap();
        let err = store
            .update_transaction_block_and_receipt("0xnope", &block, &receipt("0xnope", &block))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexingError::TransactionNotFound { .. }));
    }

    // ── Derived state ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn scoped_invalidation_touches_only_scope() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed_derived(&store, "0xAAAA", 1).await;
        seed_derived(&store, "0xbbbb", 1).await;

        let scope = AddressScope::only(["0xaaaa"]);
        let mut tx = store.begin_derived().await.unwrap();
        assert_eq!(tx.delete_onchain_confirmations(&scope).await.unwrap(), 1);
        assert_eq!(tx.delete_indexed_multisig_txs(&scope).await.unwrap(), 1);
        assert_eq!(tx.delete_module_txs(&scope).await.unwrap(), 0);
        assert_eq!(tx.delete_safe_statuses(&scope).await.unwrap(), 1);
        assert_eq!(tx.mark_internal_txs_unprocessed(&scope).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let counts = store.derived_counts().await.unwrap();
        assert_eq!(counts.safe_statuses, 1);
        assert_eq!(counts.multisig_txs, 1);
        assert_eq!(counts.confirmations, 1);
        assert_eq!(counts.decoded_pending, 1);
        assert_eq!(counts.decoded_processed, 1);
    }

    #[tokio::test]
    async fn large_scope_spans_several_statements() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed_derived(&store, "0xaaaa", 1).await;
        seed_derived(&store, "0xzzzz", 1).await;
        seed_derived(&store, "0xoutside", 1).await;

        // sorted scope: "0xaaaa" lands in the first chunk, "0xzzzz" in the second
        let mut addresses = vec!["0xzzzz".to_string(), "0xaaaa".to_string()];
        addresses.extend((0..MAX_IN_PARAMS).map(|i| format!("0xf{i:04}")));
        let scope = AddressScope::only(&addresses);
        assert!(scope.addresses().unwrap().len() > MAX_IN_PARAMS);

        let mut tx = store.begin_derived().await.unwrap();
        assert_eq!(tx.delete_onchain_confirmations(&scope).await.unwrap(), 2);
        assert_eq!(tx.delete_indexed_multisig_txs(&scope).await.unwrap(), 2);
        assert_eq!(tx.delete_safe_statuses(&scope).await.unwrap(), 2);
        assert_eq!(tx.mark_internal_txs_unprocessed(&scope).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let counts = store.derived_counts().await.unwrap();
        assert_eq!(counts.safe_statuses, 1);
        assert_eq!(counts.decoded_processed, 1);
    }

    #[tokio::test]
    async fn rollback_discards_changes() {
        let store = SqliteStore::in_memory().await.unwrap();
        seed_derived(&store, "0xaaaa", 1).await;

        let mut tx = store.begin_derived().await.unwrap();
        tx.delete_safe_statuses(&AddressScope::All).await.unwrap();
        tx.delete_indexed_multisig_txs(&AddressScope::All).await.unwrap();
        tx.rollback().await.unwrap();

        let counts = store.derived_counts().await.unwrap();
        assert_eq!(counts.safe_statuses, 1);
        assert_eq!(counts.multisig_txs, 1);
    }

    #[tokio::test]
    async fn tracked_addresses() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.add_master_copy("0xmaster").await.unwrap();
        store.add_master_copy("0xmaster").await.unwrap();
        store.add_safe_contract("0xsafe").await.unwrap();
        assert_eq!(store.list_master_copies().await.unwrap(), vec!["0xmaster".to_string()]);
        assert_eq!(store.list_safe_contracts().await.unwrap(), vec!["0xsafe".to_string()]);
    }
}
