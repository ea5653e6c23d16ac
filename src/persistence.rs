//! Persistence interface (C5): trades, daily volume, flip cycles, synth
//! signals, key/value bot state. Schema DDL shape is fixed here (out of
//! scope for the wire/schema-ownership boundary, but needed for a running
//! crate); `rusqlite` with WAL mode, following the teacher's
//! `Arc<Mutex<Connection>>` pattern.

use crate::types::{OrderResult, StrategyTag};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::sync::Arc;

#[derive(Clone)]
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(SqlitePersistence { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(SqlitePersistence { conn: Arc::new(Mutex::new(conn)) })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy TEXT NOT NULL,
                token_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                fee REAL NOT NULL,
                success INTEGER NOT NULL,
                order_id TEXT,
                is_dry_run INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS daily_volume (
                day TEXT NOT NULL,
                strategy TEXT NOT NULL,
                volume REAL NOT NULL DEFAULT 0,
                pnl REAL NOT NULL DEFAULT 0,
                PRIMARY KEY (day, strategy)
            );
            CREATE TABLE IF NOT EXISTS flip_cycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                condition_id TEXT NOT NULL,
                market_question TEXT NOT NULL,
                entry_side TEXT NOT NULL,
                entry_token_id TEXT NOT NULL,
                entry_price REAL NOT NULL,
                entry_shares REAL NOT NULL,
                entry_order_id TEXT NOT NULL,
                entry_filled_at TEXT,
                exit_side TEXT,
                exit_token_id TEXT,
                exit_price REAL,
                exit_shares REAL,
                exit_order_id TEXT,
                exit_filled_at TEXT,
                profit REAL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS synth_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset TEXT NOT NULL,
                edge REAL NOT NULL,
                acted INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    pub fn record_trade(&self, result: &OrderResult) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades
                (strategy, token_id, condition_id, side, price, size, fee, success, order_id, is_dry_run, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                result.signal.strategy.as_str(),
                result.signal.token_id,
                result.signal.condition_id,
                result.signal.side.as_str(),
                result.fill_price,
                result.fill_size,
                result.fee,
                result.success as i64,
                result.order_id,
                result.is_dry_run as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_daily_volume(&self, strategy: StrategyTag, volume: f64, pnl: f64) -> anyhow::Result<()> {
        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO daily_volume (day, strategy, volume, pnl) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(day, strategy) DO UPDATE SET
                volume = volume + excluded.volume,
                pnl = pnl + excluded.pnl",
            params![day, strategy.as_str(), volume, pnl],
        )?;
        Ok(())
    }

    pub fn get_daily_volume(&self, strategy: Option<StrategyTag>) -> anyhow::Result<f64> {
        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let conn = self.conn.lock();
        let total: f64 = match strategy {
            Some(s) => conn
                .query_row(
                    "SELECT COALESCE(SUM(volume),0) FROM daily_volume WHERE day = ?1 AND strategy = ?2",
                    params![day, s.as_str()],
                    |r| r.get(0),
                )
                .unwrap_or(0.0),
            None => conn
                .query_row(
                    "SELECT COALESCE(SUM(volume),0) FROM daily_volume WHERE day = ?1",
                    params![day],
                    |r| r.get(0),
                )
                .unwrap_or(0.0),
        };
        Ok(total)
    }

    pub fn insert_flip_cycle(&self, cycle: &crate::types::FlipCycle) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO flip_cycles
                (condition_id, market_question, entry_side, entry_token_id, entry_price,
                 entry_shares, entry_order_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8)",
            params![
                cycle.condition_id,
                cycle.market_question,
                cycle.entry_side,
                cycle.entry_token_id,
                cycle.entry_price,
                cycle.entry_shares,
                cycle.entry_order_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn mark_flip_entry_filled(&self, db_id: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE flip_cycles SET entry_filled_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), db_id],
        )?;
        Ok(())
    }

    pub fn update_flip_exit(
        &self,
        db_id: i64,
        exit_side: &str,
        exit_token_id: &str,
        exit_price: f64,
        exit_shares: f64,
        exit_order_id: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE flip_cycles SET exit_side=?1, exit_token_id=?2, exit_price=?3,
                exit_shares=?4, exit_order_id=?5, updated_at=?6 WHERE id=?7",
            params![
                exit_side,
                exit_token_id,
                exit_price,
                exit_shares,
                exit_order_id,
                chrono::Utc::now().to_rfc3339(),
                db_id
            ],
        )?;
        Ok(())
    }

    pub fn complete_flip_cycle(&self, db_id: i64, profit: f64, status: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE flip_cycles SET exit_filled_at=?1, profit=?2, status=?3, updated_at=?1 WHERE id=?4",
            params![chrono::Utc::now().to_rfc3339(), profit, status, db_id],
        )?;
        Ok(())
    }

    pub fn update_flip_status(&self, db_id: i64, status: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE flip_cycles SET status=?1, updated_at=?2 WHERE id=?3",
            params![status, chrono::Utc::now().to_rfc3339(), db_id],
        )?;
        Ok(())
    }

    pub fn record_synth_signal(&self, asset: &str, edge: f64, acted: bool) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO synth_signals (asset, edge, acted, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![asset, edge, acted as i64, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM bot_state WHERE key = ?1", params![key], |r| r.get(0))
            .ok();
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bot_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, Side, Signal, StrategyTag};

    fn sample_signal() -> Signal {
        Signal {
            strategy: StrategyTag::Arbitrage,
            token_id: "tok1".into(),
            condition_id: "cond1".into(),
            side: Side::Buy,
            price: 0.5,
            size: 10.0,
            order_type: OrderType::Fok,
            edge: Some(0.03),
            confidence: None,
            reason: "test".into(),
            market_question: "will it resolve yes?".into(),
            outcome_side: None,
        }
    }

    #[test]
    fn record_and_read_trade() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        let result = OrderResult {
            signal: sample_signal(),
            success: true,
            order_id: Some("abc".into()),
            fill_price: 0.5,
            fill_size: 10.0,
            fee: 0.0,
            error: None,
            is_dry_run: true,
            is_resting: false,
        };
        db.record_trade(&result).unwrap();
    }

    #[test]
    fn daily_volume_upsert_accumulates() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.update_daily_volume(StrategyTag::Arbitrage, 10.0, 1.0).unwrap();
        db.update_daily_volume(StrategyTag::Arbitrage, 5.0, -0.5).unwrap();
        let total = db.get_daily_volume(Some(StrategyTag::Arbitrage)).unwrap();
        assert_eq!(total, 15.0);
    }

    #[test]
    fn flip_cycle_lifecycle() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        let cycle = crate::types::FlipCycle {
            db_id: None,
            condition_id: "cond1".into(),
            market_question: "q".into(),
            entry_side: "yes".into(),
            entry_token_id: "tok1".into(),
            entry_price: 0.48,
            entry_shares: 50.0,
            entry_order_id: "order1".into(),
            entry_placed_at: std::time::Instant::now(),
            exit_side: None,
            exit_token_id: None,
            exit_price: None,
            exit_shares: None,
            exit_order_id: None,
            status: crate::types::FlipStatus::Open,
        };
        let id = db.insert_flip_cycle(&cycle).unwrap();
        db.mark_flip_entry_filled(id).unwrap();
        db.update_flip_exit(id, "no", "tok2", 0.46, 50.0, "order2").unwrap();
        db.complete_flip_cycle(id, 3.0, "completed").unwrap();
    }

    #[test]
    fn kv_state_roundtrip() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        assert_eq!(db.get_state("copy_snapshot_0xabc").unwrap(), None);
        db.set_state("copy_snapshot_0xabc", "{\"tok1\":100}").unwrap();
        db.set_state("copy_snapshot_0xabc", "{\"tok1\":150}").unwrap();
        assert_eq!(db.get_state("copy_snapshot_0xabc").unwrap().unwrap(), "{\"tok1\":150}");
    }
}
