//! SQLite-backed Result Store
//!
//! Append-only time-series of measurement records plus the small config
//! tables (groups, hosts, per-group thresholds).
//!
//! Key properties:
//! - WAL mode for concurrent reads during writes
//! - Prepared statement caching
//! - Every result write is a single atomic insert; no cross-record
//!   coordination is needed between concurrent runs
//! - `results` rows are never updated or deleted

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{AlertThresholds, Host, HostGroup, MeasurementRecord};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS host_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS hosts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    group_id INTEGER REFERENCES host_groups(id)
);

-- One threshold row per group; absent rows fall back to defaults.
CREATE TABLE IF NOT EXISTS alert_thresholds (
    group_id INTEGER PRIMARY KEY REFERENCES host_groups(id),
    max_latency REAL NOT NULL,
    max_packet_loss REAL NOT NULL,
    max_jitter REAL NOT NULL
) WITHOUT ROWID;

-- Append-only measurement time-series. Timestamps are UTC second-precision
-- "YYYY-MM-DD HH:MM:SS" strings, compared lexically for range queries.
CREATE TABLE IF NOT EXISTS results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    group_id INTEGER,
    timestamp TEXT NOT NULL,
    avg_latency REAL,
    packet_loss REAL NOT NULL,
    jitter REAL,
    min_latency REAL,
    max_latency REAL,
    dns_time REAL,
    traceroute TEXT NOT NULL,
    tcp_retrans_rate REAL,
    alerts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_timestamp
    ON results(timestamp, group_id);

CREATE INDEX IF NOT EXISTS idx_results_host
    ON results(host, timestamp);
"#;

/// Shared handle to the measurement database.
#[derive(Clone)]
pub struct ResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl ResultStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX; // We handle our own locking

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if db_path != ":memory:" && journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))
            .unwrap_or(0);
        info!("Result store ready at {} ({} existing records)", db_path, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests and one-shot runs that do not need
    /// persistence across restarts.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    // ---- results ----

    /// Append one immutable measurement record. Returns the new rowid.
    pub fn save(&self, record: &MeasurementRecord) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO results
             (host, group_id, timestamp, avg_latency, packet_loss, jitter,
              min_latency, max_latency, dns_time, traceroute, tcp_retrans_rate, alerts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.host,
                record.group_id,
                record.timestamp,
                record.avg_latency_ms,
                record.packet_loss_pct,
                record.jitter_ms,
                record.min_latency_ms,
                record.max_latency_ms,
                record.dns_time_ms,
                record.traceroute_text,
                record.tcp_retrans_rate_pct,
                record.alerts_text,
            ],
        )
        .with_context(|| format!("Failed to insert result for {}", record.host))?;
        Ok(conn.last_insert_rowid())
    }

    /// Query records with `start <= timestamp <= end` (when given) and
    /// `group_id IN group_ids` (when given), ascending by timestamp.
    pub fn query(
        &self,
        start_ts: Option<&str>,
        end_ts: Option<&str>,
        group_ids: Option<&[i64]>,
    ) -> Result<Vec<MeasurementRecord>> {
        let mut sql = String::from(
            "SELECT id, host, group_id, timestamp, avg_latency, packet_loss, jitter,
                    min_latency, max_latency, dns_time, traceroute, tcp_retrans_rate, alerts
             FROM results WHERE 1=1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(start) = start_ts {
            sql.push_str(" AND timestamp >= ?");
            values.push(Value::from(start.to_string()));
        }
        if let Some(end) = end_ts {
            sql.push_str(" AND timestamp <= ?");
            values.push(Value::from(end.to_string()));
        }
        if let Some(gids) = group_ids {
            if !gids.is_empty() {
                let placeholders = vec!["?"; gids.len()].join(",");
                sql.push_str(&format!(" AND group_id IN ({})", placeholders));
                values.extend(gids.iter().map(|g| Value::from(*g)));
            }
        }
        // id tie-breaks records sharing one second.
        sql.push_str(" ORDER BY timestamp ASC, id ASC");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MeasurementRecord> {
        Ok(MeasurementRecord {
            id: row.get(0)?,
            host: row.get(1)?,
            group_id: row.get(2)?,
            timestamp: row.get(3)?,
            avg_latency_ms: row.get(4)?,
            packet_loss_pct: row.get(5)?,
            jitter_ms: row.get(6)?,
            min_latency_ms: row.get(7)?,
            max_latency_ms: row.get(8)?,
            dns_time_ms: row.get(9)?,
            traceroute_text: row.get(10)?,
            tcp_retrans_rate_pct: row.get(11)?,
            alerts_text: row.get(12)?,
        })
    }

    // ---- thresholds ----

    /// Stored thresholds for a group, or the fixed defaults when no row
    /// exists.
    pub fn get_thresholds(&self, group_id: i64) -> Result<AlertThresholds> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT max_latency, max_packet_loss, max_jitter
             FROM alert_thresholds WHERE group_id = ?1",
        )?;
        let row = stmt
            .query_row([group_id], |row| {
                Ok(AlertThresholds {
                    max_latency_ms: row.get(0)?,
                    max_packet_loss_pct: row.get(1)?,
                    max_jitter_ms: row.get(2)?,
                })
            })
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    /// Upsert the threshold row for a group. Any number of writes leaves
    /// exactly one row.
    pub fn set_thresholds(&self, group_id: i64, thresholds: &AlertThresholds) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alert_thresholds (group_id, max_latency, max_packet_loss, max_jitter)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(group_id) DO UPDATE SET
                max_latency=excluded.max_latency,
                max_packet_loss=excluded.max_packet_loss,
                max_jitter=excluded.max_jitter",
            params![
                group_id,
                thresholds.max_latency_ms,
                thresholds.max_packet_loss_pct,
                thresholds.max_jitter_ms,
            ],
        )
        .with_context(|| format!("Failed to upsert thresholds for group {}", group_id))?;
        Ok(())
    }

    // ---- groups & hosts (management surface) ----

    /// Create a group, idempotent on name. Returns its id.
    pub fn add_group(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO host_groups (group_name) VALUES (?1)",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM host_groups WHERE group_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn list_groups(&self) -> Result<Vec<HostGroup>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, group_name FROM host_groups ORDER BY group_name")?;
        let groups = stmt
            .query_map([], |row| {
                Ok(HostGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Delete a group. Member hosts are detached (group_id cleared), never
    /// deleted; the group's threshold row goes with it.
    pub fn delete_group(&self, group_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;
        conn.execute("DELETE FROM host_groups WHERE id = ?1", params![group_id])?;
        conn.execute(
            "UPDATE hosts SET group_id = NULL WHERE group_id = ?1",
            params![group_id],
        )?;
        conn.execute(
            "DELETE FROM alert_thresholds WHERE group_id = ?1",
            params![group_id],
        )?;
        conn.execute("COMMIT", [])?;
        Ok(())
    }

    pub fn add_host(&self, address: &str, group_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hosts (host, group_id) VALUES (?1, ?2)",
            params![address, group_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All hosts joined with their group name, grouped then by address.
    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT hosts.id, hosts.host, hosts.group_id, host_groups.group_name
             FROM hosts LEFT JOIN host_groups ON hosts.group_id = host_groups.id
             ORDER BY host_groups.group_name IS NULL, host_groups.group_name, hosts.host",
        )?;
        let hosts = stmt
            .query_map([], Self::row_to_host)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    /// Hosts belonging to one group, in address order.
    pub fn list_hosts_in_group(&self, group_id: i64) -> Result<Vec<Host>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT hosts.id, hosts.host, hosts.group_id, host_groups.group_name
             FROM hosts LEFT JOIN host_groups ON hosts.group_id = host_groups.id
             WHERE hosts.group_id = ?1
             ORDER BY hosts.host",
        )?;
        let hosts = stmt
            .query_map([group_id], Self::row_to_host)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hosts)
    }

    pub fn delete_host(&self, host_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM hosts WHERE id = ?1", params![host_id])?;
        Ok(())
    }

    fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<Host> {
        Ok(Host {
            id: row.get(0)?,
            address: row.get(1)?,
            group_id: row.get(2)?,
            group_name: row.get(3)?,
        })
    }
}
