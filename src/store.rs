//! SQLite persistence
//!
//! Durable state for the indexer and analyzer: the block cursor, LP
//! positions, and the raw event rows. Every event insert is idempotent on
//! tx_hash (`INSERT OR IGNORE` against a UNIQUE index) and each event's
//! row plus its position fold commit in one transaction, so re-scanning a
//! window after a partial failure re-applies nothing and loses nothing.
//!
//! Big on-chain integers (liquidity, raw amounts) are stored as decimal
//! TEXT; analyzer-derived amounts are REAL.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS indexed_block (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    latest_block INTEGER NOT NULL,
    synced       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS positions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    token_id          INTEGER NOT NULL UNIQUE,
    liquidity         TEXT NOT NULL,
    deposited_amount0 TEXT NOT NULL,
    deposited_amount1 TEXT NOT NULL,
    current_amount0   REAL NOT NULL DEFAULT 0,
    current_amount1   REAL NOT NULL DEFAULT 0,
    tick_lower        INTEGER NOT NULL,
    tick_upper        INTEGER NOT NULL,
    entry_price       REAL NOT NULL,
    is_active         INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS mint_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash      TEXT NOT NULL UNIQUE,
    token_id     INTEGER NOT NULL,
    liquidity    TEXT NOT NULL,
    amount0      TEXT NOT NULL,
    amount1      TEXT NOT NULL,
    tick_lower   INTEGER NOT NULL,
    tick_upper   INTEGER NOT NULL,
    block_number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS decrease_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash      TEXT NOT NULL UNIQUE,
    token_id     INTEGER NOT NULL,
    liquidity    TEXT NOT NULL,
    amount0      TEXT NOT NULL,
    amount1      TEXT NOT NULL,
    block_number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS collect_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_hash     TEXT NOT NULL UNIQUE,
    token_id    INTEGER NOT NULL,
    amount0     TEXT NOT NULL,
    amount1     TEXT NOT NULL,
    position_id INTEGER NOT NULL REFERENCES positions(id)
);
";

/// Both pool tokens carry six decimals.
const TOKEN_SCALE: f64 = 1e6;

/// Durable cursor: how far the indexer has scanned, and whether it has
/// caught up to the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub latest_block: u64,
    pub synced: bool,
}

/// An LP position folded from indexed events.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: i64,
    pub token_id: u64,
    pub liquidity: u128,
    pub deposited_amount0: String,
    pub deposited_amount1: String,
    pub current_amount0: f64,
    pub current_amount1: f64,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub entry_price: f64,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous pragma")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to create schema")?;

        info!("Database ready at {:?}", path.as_ref());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to create schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── Cursor ───────────────────────────────────────────────────────

    /// Current cursor, creating the row on first access.
    pub fn cursor(&self) -> Result<Cursor> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT latest_block, synced FROM indexed_block WHERE id = 1",
                [],
                |r| {
                    Ok(Cursor {
                        latest_block: r.get::<_, i64>(0)? as u64,
                        synced: r.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()
            .context("Failed to read cursor")?;

        match row {
            Some(c) => Ok(c),
            None => {
                conn.execute(
                    "INSERT INTO indexed_block (id, latest_block, synced) VALUES (1, 0, 0)",
                    [],
                )
                .context("Failed to initialize cursor")?;
                Ok(Cursor {
                    latest_block: 0,
                    synced: false,
                })
            }
        }
    }

    pub fn set_latest_block(&self, block: u64) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO indexed_block (id, latest_block, synced) VALUES (1, ?1, 0)
                 ON CONFLICT(id) DO UPDATE SET latest_block = ?1",
                params![block as i64],
            )
            .context("Failed to set cursor")?;
        Ok(())
    }

    pub fn set_synced(&self, synced: bool) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "UPDATE indexed_block SET synced = ?1 WHERE id = 1",
                params![synced as i64],
            )
            .context("Failed to set synced flag")?;
        Ok(())
    }

    // ── Event folds ──────────────────────────────────────────────────

    /// Apply one increase-liquidity event: record the mint row and fold it
    /// into its position (creating the position on first sight), all in
    /// one transaction. Returns false when the tx_hash was already
    /// indexed, in which case nothing changes.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_increase(
        &self,
        tx_hash: &str,
        token_id: u64,
        liquidity: u128,
        amount0: &str,
        amount1: &str,
        tick_lower: i32,
        tick_upper: i32,
        block_number: u64,
        entry_price: f64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("Failed to begin increase transaction")?;

        let changed = tx
            .execute(
                "INSERT OR IGNORE INTO mint_events
                 (tx_hash, token_id, liquidity, amount0, amount1, tick_lower, tick_upper, block_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tx_hash,
                    token_id as i64,
                    liquidity.to_string(),
                    amount0,
                    amount1,
                    tick_lower,
                    tick_upper,
                    block_number as i64
                ],
            )
            .context("Failed to insert mint event")?;
        if changed == 0 {
            return Ok(false);
        }

        let existing = tx
            .query_row(
                "SELECT liquidity, deposited_amount0, deposited_amount1
                 FROM positions WHERE token_id = ?1",
                params![token_id as i64],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read position for fold")?;

        let now = Utc::now().to_rfc3339();
        match existing {
            Some((liq, dep0, dep1)) => {
                let new_liq = liq
                    .parse::<u128>()
                    .unwrap_or(0)
                    .saturating_add(liquidity);
                let a0 = dep0
                    .parse::<u128>()
                    .unwrap_or(0)
                    .saturating_add(amount0.parse().unwrap_or(0));
                let a1 = dep1
                    .parse::<u128>()
                    .unwrap_or(0)
                    .saturating_add(amount1.parse().unwrap_or(0));
                tx.execute(
                    "UPDATE positions
                     SET liquidity = ?2, deposited_amount0 = ?3, deposited_amount1 = ?4,
                         is_active = 1, updated_at = ?5
                     WHERE token_id = ?1",
                    params![
                        token_id as i64,
                        new_liq.to_string(),
                        a0.to_string(),
                        a1.to_string(),
                        now
                    ],
                )
                .context("Failed to fold increase into position")?;
            }
            None => {
                // Current amounts start at the deposit; the analyzer
                // refines them once the pool price moves.
                let seed0 = amount0.parse::<u128>().unwrap_or(0) as f64 / TOKEN_SCALE;
                let seed1 = amount1.parse::<u128>().unwrap_or(0) as f64 / TOKEN_SCALE;
                tx.execute(
                    "INSERT INTO positions
                     (token_id, liquidity, deposited_amount0, deposited_amount1,
                      current_amount0, current_amount1, tick_lower, tick_upper,
                      entry_price, is_active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
                    params![
                        token_id as i64,
                        liquidity.to_string(),
                        amount0,
                        amount1,
                        seed0,
                        seed1,
                        tick_lower,
                        tick_upper,
                        entry_price,
                        now
                    ],
                )
                .context("Failed to create position")?;
            }
        }

        tx.commit().context("Failed to commit increase")?;
        Ok(true)
    }

    /// Apply one decrease-liquidity event: record the decrease row and
    /// subtract from the position's liquidity in one transaction. Returns
    /// the remaining liquidity, or `None` when the tx_hash was already
    /// indexed (nothing changes on replay).
    pub fn apply_decrease(
        &self,
        tx_hash: &str,
        token_id: u64,
        liquidity: u128,
        amount0: &str,
        amount1: &str,
        block_number: u64,
    ) -> Result<Option<u128>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("Failed to begin decrease transaction")?;

        let changed = tx
            .execute(
                "INSERT OR IGNORE INTO decrease_events
                 (tx_hash, token_id, liquidity, amount0, amount1, block_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tx_hash,
                    token_id as i64,
                    liquidity.to_string(),
                    amount0,
                    amount1,
                    block_number as i64
                ],
            )
            .context("Failed to insert decrease event")?;
        if changed == 0 {
            return Ok(None);
        }

        let current: String = tx
            .query_row(
                "SELECT liquidity FROM positions WHERE token_id = ?1",
                params![token_id as i64],
                |r| r.get(0),
            )
            .optional()
            .context("Failed to read position for fold")?
            .with_context(|| format!("No position for token id {}", token_id))?;

        let remaining = current.parse::<u128>().unwrap_or(0).saturating_sub(liquidity);
        tx.execute(
            "UPDATE positions SET liquidity = ?2, is_active = ?3, updated_at = ?4
             WHERE token_id = ?1",
            params![
                token_id as i64,
                remaining.to_string(),
                (remaining > 0) as i64,
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to fold decrease into position")?;

        tx.commit().context("Failed to commit decrease")?;
        Ok(Some(remaining))
    }

    /// Record a collect event against a known position. Returns false when
    /// the tx_hash was already indexed.
    pub fn insert_collect_event(
        &self,
        tx_hash: &str,
        token_id: u64,
        amount0: &str,
        amount1: &str,
        position_id: i64,
    ) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO collect_events
                 (tx_hash, token_id, amount0, amount1, position_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tx_hash, token_id as i64, amount0, amount1, position_id],
            )
            .context("Failed to insert collect event")?;
        Ok(changed > 0)
    }

    // ── Positions ────────────────────────────────────────────────────

    pub fn position_by_token_id(&self, token_id: u64) -> Result<Option<Position>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, token_id, liquidity, deposited_amount0, deposited_amount1,
                        current_amount0, current_amount1, tick_lower, tick_upper,
                        entry_price, is_active
                 FROM positions WHERE token_id = ?1",
                params![token_id as i64],
                Self::row_to_position,
            )
            .optional()
            .context("Failed to read position")
    }

    pub fn active_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, token_id, liquidity, deposited_amount0, deposited_amount1,
                        current_amount0, current_amount1, tick_lower, tick_upper,
                        entry_price, is_active
                 FROM positions WHERE is_active = 1 ORDER BY token_id",
            )
            .context("Failed to prepare active positions query")?;
        let rows = stmt
            .query_map([], Self::row_to_position)
            .context("Failed to query active positions")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read active positions")
    }

    /// Analyzer write-back of current token amounts.
    pub fn set_current_amounts(&self, token_id: u64, amount0: f64, amount1: f64) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "UPDATE positions SET current_amount0 = ?2, current_amount1 = ?3,
                        updated_at = ?4
                 WHERE token_id = ?1",
                params![
                    token_id as i64,
                    amount0,
                    amount1,
                    Utc::now().to_rfc3339()
                ],
            )
            .context("Failed to update current amounts")?;
        Ok(())
    }

    fn row_to_position(r: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
        Ok(Position {
            id: r.get(0)?,
            token_id: r.get::<_, i64>(1)? as u64,
            liquidity: r.get::<_, String>(2)?.parse().unwrap_or(0),
            deposited_amount0: r.get(3)?,
            deposited_amount1: r.get(4)?,
            current_amount0: r.get(5)?,
            current_amount1: r.get(6)?,
            tick_lower: r.get(7)?,
            tick_upper: r.get(8)?,
            entry_price: r.get(9)?,
            is_active: r.get::<_, i64>(10)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(store: &SqliteStore, tx: &str, token_id: u64, liq: u128, a0: &str, a1: &str) -> bool {
        store
            .apply_increase(tx, token_id, liq, a0, a1, -100, 100, 24_454_100, 1.002)
            .unwrap()
    }

    #[test]
    fn test_cursor_initializes_and_advances() {
        let store = SqliteStore::open_in_memory().unwrap();

        let c = store.cursor().unwrap();
        assert_eq!(c.latest_block, 0);
        assert!(!c.synced);

        store.set_latest_block(24_456_082).unwrap();
        store.set_synced(true).unwrap();
        let c = store.cursor().unwrap();
        assert_eq!(c.latest_block, 24_456_082);
        assert!(c.synced);
    }

    #[test]
    fn test_increase_creates_position_atomically() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(mint(&store, "0xabc", 42, 1_000_000, "500", "500"));
        // The mint row and the position commit together: the row existing
        // implies the position exists.
        let p = store.position_by_token_id(42).unwrap().unwrap();
        assert_eq!(p.liquidity, 1_000_000);
        assert_eq!(p.deposited_amount0, "500");
        assert!(p.is_active);
    }

    #[test]
    fn test_increase_replay_is_a_no_op() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(mint(&store, "0xabc", 42, 1_000, "500", "500"));
        assert!(!mint(&store, "0xabc", 42, 1_000, "500", "500"));

        let p = store.position_by_token_id(42).unwrap().unwrap();
        assert_eq!(p.liquidity, 1_000);
        assert_eq!(p.deposited_amount0, "500");
    }

    #[test]
    fn test_increase_folds_onto_existing_position() {
        let store = SqliteStore::open_in_memory().unwrap();

        mint(&store, "0xaaa", 7, 1_000, "100", "100");
        mint(&store, "0xbbb", 7, 1_500, "150", "150");

        let p = store.position_by_token_id(7).unwrap().unwrap();
        assert_eq!(p.liquidity, 2_500);
        assert_eq!(p.deposited_amount0, "250");
        assert_eq!(p.deposited_amount1, "250");
    }

    #[test]
    fn test_decrease_replay_applies_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 7, 100, "100", "100");

        let remaining = store
            .apply_decrease("0xdec", 7, 40, "40", "40", 24_454_200)
            .unwrap();
        assert_eq!(remaining, Some(60));

        // Re-scanning the same window must not subtract again.
        let replay = store
            .apply_decrease("0xdec", 7, 40, "40", "40", 24_454_200)
            .unwrap();
        assert_eq!(replay, None);
        let p = store.position_by_token_id(7).unwrap().unwrap();
        assert_eq!(p.liquidity, 60);
        assert!(p.is_active);
    }

    #[test]
    fn test_full_decrease_closes_position() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 7, 2_500, "250", "250");

        let remaining = store
            .apply_decrease("0xdec", 7, 2_500, "250", "250", 24_454_200)
            .unwrap();
        assert_eq!(remaining, Some(0));

        let p = store.position_by_token_id(7).unwrap().unwrap();
        assert!(!p.is_active);
        assert!(store.active_positions().unwrap().is_empty());
    }

    #[test]
    fn test_decrease_unknown_position_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store
            .apply_decrease("0xdec", 99, 10, "10", "10", 24_454_200)
            .is_err());
    }

    #[test]
    fn test_collect_event_idempotent_on_tx_hash() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 42, 1_000_000, "500", "500");
        let pos_id = store.position_by_token_id(42).unwrap().unwrap().id;

        assert!(store
            .insert_collect_event("0xdef", 42, "10", "12", pos_id)
            .unwrap());
        assert!(!store
            .insert_collect_event("0xdef", 42, "10", "12", pos_id)
            .unwrap());
    }

    #[test]
    fn test_active_positions_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 1, 100, "1", "1");
        mint(&store, "0xbbb", 2, 200, "2", "2");
        store
            .apply_decrease("0xccc", 1, 100, "1", "1", 24_454_200)
            .unwrap();

        let active = store.active_positions().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_id, 2);
    }

    #[test]
    fn test_new_position_seeds_current_amounts() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 9, 5_000, "3000250000", "2999750000");

        let p = store.position_by_token_id(9).unwrap().unwrap();
        assert!((p.current_amount0 - 3000.25).abs() < 1e-9);
        assert!((p.current_amount1 - 2999.75).abs() < 1e-9);
    }

    #[test]
    fn test_current_amounts_write_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        mint(&store, "0xaaa", 9, 5_000, "3000", "3000");
        store.set_current_amounts(9, 2950.5, 3050.25).unwrap();

        let p = store.position_by_token_id(9).unwrap().unwrap();
        assert!((p.current_amount0 - 2950.5).abs() < 1e-9);
        assert!((p.current_amount1 - 3050.25).abs() < 1e-9);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = SqliteStore::open(&path).unwrap();
        store.set_latest_block(5).unwrap();
        drop(store);

        // Cursor survives reopen.
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.cursor().unwrap().latest_block, 5);
    }
}
