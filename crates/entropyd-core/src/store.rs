//! Bounded persistent queues with consume-once semantics.
//!
//! Two FIFO queues (TRNG hashes, Fortuna chunks) plus a metadata table live
//! in one SQLite file:
//!
//! ```text
//! append --> [insert + TTL purge + evict-to-capacity]   one transaction
//! fetch  --> [select unconsumed + mark consumed]        one transaction
//! ```
//!
//! Every operation serializes on a single mutex around the connection, so a
//! record is observed by at most one `fetch(consume=true)` caller and a
//! reader never sees a queue above its capacity.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};

/// Provenance of a TRNG record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Drawn from the secure element's on-die TRNG.
    Hardware,
    /// Drawn from the operating system's entropy source.
    Software,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Hardware => "hardware",
            Source::Software => "software",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "hardware" => Some(Source::Hardware),
            "software" => Some(Source::Software),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored TRNG hash.
#[derive(Debug, Clone)]
pub struct TrngRecord {
    pub id: i64,
    pub hash: Vec<u8>,
    pub hash_hex: String,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub consumed: bool,
    pub source: Source,
    pub chunk_size: u32,
}

/// One stored Fortuna output chunk.
#[derive(Debug, Clone)]
pub struct FortunaRecord {
    pub id: i64,
    pub data: Vec<u8>,
    /// Microseconds since the Unix epoch.
    pub timestamp_us: i64,
    pub consumed: bool,
    pub chunk_size: u32,
    pub amplification_factor: u32,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub trng_total: u64,
    pub trng_unconsumed: u64,
    pub trng_queue_full: bool,
    pub trng_hardware_count: u64,
    pub trng_software_count: u64,
    pub trng_hardware_percent: f64,
    pub fortuna_total: u64,
    pub fortuna_unconsumed: u64,
    pub fortuna_queue_full: bool,
    pub database_size_bytes: u64,
}

/// Per-day provenance split for the TRNG queue.
#[derive(Debug, Clone, Serialize)]
pub struct DailySourceCounts {
    pub day: String,
    pub hardware: u64,
    pub software: u64,
    pub hardware_percent: f64,
}

struct Inner {
    conn: Connection,
    trng_capacity: u64,
    fortuna_capacity: u64,
    retention_days: Option<u32>,
}

/// SQLite-backed queue store.
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// Open (or create) the store at `config.db_path` and run the schema.
    pub fn open(config: &ServiceConfig) -> Result<Self> {
        Self::open_at(
            &config.db_path,
            config.trng_queue_size,
            config.fortuna_queue_size,
            config.db_memory_limit,
            config.retention_days,
        )
    }

    pub fn open_at(
        path: &Path,
        trng_capacity: u64,
        fortuna_capacity: u64,
        memory_limit_bytes: u64,
        retention_days: Option<u32>,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // SQLite takes the cache cap as negative KiB.
        let cache_kib = -((memory_limit_bytes / 1024).max(1024) as i64);
        conn.pragma_update(None, "cache_size", cache_kib)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trng_data (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 hash BLOB NOT NULL,
                 hash_hex TEXT NOT NULL,
                 timestamp INTEGER NOT NULL,
                 consumed BOOLEAN NOT NULL DEFAULT 0,
                 source TEXT NOT NULL DEFAULT 'hardware',
                 chunk_size INTEGER NOT NULL DEFAULT 32
             );
             CREATE TABLE IF NOT EXISTS fortuna_data (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 data BLOB NOT NULL,
                 timestamp INTEGER NOT NULL,
                 consumed BOOLEAN NOT NULL DEFAULT 0,
                 chunk_size INTEGER NOT NULL DEFAULT 32,
                 amplification_factor INTEGER NOT NULL DEFAULT 4
             );
             CREATE TABLE IF NOT EXISTS metadata (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 updated_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_trng_timestamp ON trng_data(timestamp);
             CREATE INDEX IF NOT EXISTS idx_fortuna_timestamp ON fortuna_data(timestamp);",
        )?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                trng_capacity,
                fortuna_capacity,
                retention_days,
            }),
        })
    }

    /// Append one TRNG hash, then purge expired and evict oldest entries so
    /// the queue never ends a transaction above capacity.
    pub fn append_trng(&self, hash: &[u8; 32], source: Source) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let capacity = inner.trng_capacity;
        let retention = inner.retention_days;
        let tx = inner.conn.transaction()?;
        let now = next_timestamp(&tx, "trng_data")?;
        tx.execute(
            "INSERT INTO trng_data (hash, hash_hex, timestamp, consumed, source, chunk_size)
             VALUES (?1, ?2, ?3, 0, ?4, 32)",
            params![hash.as_slice(), hex::encode(hash), now, source.as_str()],
        )?;
        let id = tx.last_insert_rowid();
        purge_expired(&tx, "trng_data", now, retention)?;
        evict_to_capacity(&tx, "trng_data", capacity)?;
        tx.commit()?;
        Ok(id)
    }

    /// Append one Fortuna output chunk with the same eviction discipline.
    pub fn append_fortuna(
        &self,
        data: &[u8],
        chunk_size: u32,
        amplification_factor: u32,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let capacity = inner.fortuna_capacity;
        let retention = inner.retention_days;
        let tx = inner.conn.transaction()?;
        let now = next_timestamp(&tx, "fortuna_data")?;
        tx.execute(
            "INSERT INTO fortuna_data (data, timestamp, consumed, chunk_size, amplification_factor)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![data, now, chunk_size, amplification_factor],
        )?;
        let id = tx.last_insert_rowid();
        purge_expired(&tx, "fortuna_data", now, retention)?;
        evict_to_capacity(&tx, "fortuna_data", capacity)?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch up to `limit` of the oldest unconsumed TRNG records, skipping
    /// `offset`. With `consume`, the returned records are marked consumed in
    /// the same transaction; a concurrent consumer that loses the race for a
    /// record sees no row for it.
    pub fn fetch_trng(&self, limit: usize, offset: usize, consume: bool) -> Result<Vec<TrngRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        let mut records = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, hash, hash_hex, timestamp, source, chunk_size
                 FROM trng_data
                 WHERE consumed = 0
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })?;
            for row in rows {
                let (id, hash, hash_hex, timestamp_us, source, chunk_size) = row?;
                match validate_trng_row(id, hash, hash_hex, timestamp_us, &source, chunk_size) {
                    Ok(mut record) => {
                        record.consumed = consume;
                        records.push(record);
                    }
                    Err(err) => {
                        tracing::warn!(id, error = %err, "skipping corrupt TRNG record");
                    }
                }
            }
        }
        if consume {
            for record in &records {
                tx.execute(
                    "UPDATE trng_data SET consumed = 1 WHERE id = ?1",
                    params![record.id],
                )?;
            }
        }
        tx.commit()?;
        Ok(records)
    }

    /// Fetch up to `limit` of the oldest unconsumed Fortuna records; same
    /// contract as [`Store::fetch_trng`].
    pub fn fetch_fortuna(
        &self,
        limit: usize,
        offset: usize,
        consume: bool,
    ) -> Result<Vec<FortunaRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        let mut records = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, data, timestamp, chunk_size, amplification_factor
                 FROM fortuna_data
                 WHERE consumed = 0
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
                Ok(FortunaRecord {
                    id: row.get(0)?,
                    data: row.get(1)?,
                    timestamp_us: row.get(2)?,
                    consumed: false,
                    chunk_size: row.get(3)?,
                    amplification_factor: row.get(4)?,
                })
            })?;
            for row in rows {
                let mut record = row?;
                let expected = record.chunk_size as usize * record.amplification_factor as usize;
                if record.data.len() != expected {
                    tracing::warn!(
                        id = record.id,
                        len = record.data.len(),
                        expected,
                        "skipping corrupt Fortuna record"
                    );
                    continue;
                }
                record.consumed = consume;
                records.push(record);
            }
        }
        if consume {
            for record in &records {
                tx.execute(
                    "UPDATE fortuna_data SET consumed = 1 WHERE id = ?1",
                    params![record.id],
                )?;
            }
        }
        tx.commit()?;
        Ok(records)
    }

    /// Queue totals, unconsumed counts, provenance split and a size estimate.
    pub fn stats(&self) -> Result<StatsSnapshot> {
        let inner = self.inner.lock().unwrap();
        let conn = &inner.conn;
        let trng_total = count(conn, "SELECT COUNT(*) FROM trng_data")?;
        let trng_unconsumed = count(conn, "SELECT COUNT(*) FROM trng_data WHERE consumed = 0")?;
        let trng_hardware_count = count(
            conn,
            "SELECT COUNT(*) FROM trng_data WHERE source = 'hardware'",
        )?;
        let trng_software_count = count(
            conn,
            "SELECT COUNT(*) FROM trng_data WHERE source = 'software'",
        )?;
        let fortuna_total = count(conn, "SELECT COUNT(*) FROM fortuna_data")?;
        let fortuna_unconsumed =
            count(conn, "SELECT COUNT(*) FROM fortuna_data WHERE consumed = 0")?;
        let database_size_bytes: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(StatsSnapshot {
            trng_total,
            trng_unconsumed,
            trng_queue_full: trng_total >= inner.trng_capacity,
            trng_hardware_count,
            trng_software_count,
            trng_hardware_percent: trng_hardware_count as f64 / (trng_total.max(1)) as f64 * 100.0,
            fortuna_total,
            fortuna_unconsumed,
            fortuna_queue_full: fortuna_total >= inner.fortuna_capacity,
            database_size_bytes: database_size_bytes.max(0) as u64,
        })
    }

    /// Per-day hardware/software counts over the last 30 days, newest first.
    pub fn source_stats(&self) -> Result<Vec<DailySourceCounts>> {
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner.conn.prepare(
            "SELECT strftime('%Y-%m-%d', timestamp / 1000000, 'unixepoch') AS day,
                    SUM(source = 'hardware'),
                    SUM(source = 'software')
             FROM trng_data
             GROUP BY day
             ORDER BY day DESC
             LIMIT 30",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;
        let mut days = Vec::new();
        for row in rows {
            let (day, hardware, software) = row?;
            let total = hardware + software;
            days.push(DailySourceCounts {
                day,
                hardware,
                software,
                hardware_percent: hardware as f64 / (total.max(1)) as f64 * 100.0,
            });
        }
        Ok(days)
    }

    /// Update both queue capacities, trimming oldest entries where the new
    /// capacity is below the current length. A resize to a capacity at or
    /// above the current length changes nothing.
    pub fn resize(&self, trng_capacity: u64, fortuna_capacity: u64) -> Result<()> {
        if trng_capacity == 0 || fortuna_capacity == 0 {
            return Err(Error::Overflow("queue capacity must be at least 1".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        evict_to_capacity(&tx, "trng_data", trng_capacity)?;
        evict_to_capacity(&tx, "fortuna_data", fortuna_capacity)?;
        tx.commit()?;
        inner.trng_capacity = trng_capacity;
        inner.fortuna_capacity = fortuna_capacity;
        Ok(())
    }

    /// Upsert one metadata key.
    pub fn metadata_put(&self, key: &str, value: &str) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        inner.conn.execute(
            "INSERT INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            params![key, value, now_micros()],
        )?;
        Ok(())
    }

    pub fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner
            .conn
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// True when the backing store answers a trivial query.
    pub fn health_check(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Insertion timestamp for `table`. Never regresses below the newest stored
/// timestamp, so ids and timestamps order the same way even across a clock
/// step.
fn next_timestamp(tx: &Transaction<'_>, table: &str) -> Result<i64> {
    let last: i64 = tx.query_row(
        &format!("SELECT COALESCE(MAX(timestamp), 0) FROM {table}"),
        [],
        |row| row.get(0),
    )?;
    Ok(now_micros().max(last))
}

/// Delete oldest rows (timestamp, then id) until the table holds at most
/// `capacity` rows. Runs inside the caller's transaction.
fn evict_to_capacity(tx: &Transaction<'_>, table: &str, capacity: u64) -> Result<usize> {
    let total: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    let excess = total - capacity as i64;
    if excess <= 0 {
        return Ok(0);
    }
    let evicted = tx.execute(
        &format!(
            "DELETE FROM {table} WHERE id IN (
                 SELECT id FROM {table} ORDER BY timestamp ASC, id ASC LIMIT ?1)"
        ),
        params![excess],
    )?;
    Ok(evicted)
}

/// Hard TTL purge. Runs inside the caller's transaction; a no-op without a
/// configured retention.
fn purge_expired(
    tx: &Transaction<'_>,
    table: &str,
    now_us: i64,
    retention_days: Option<u32>,
) -> Result<usize> {
    let Some(days) = retention_days else {
        return Ok(0);
    };
    let cutoff = now_us - i64::from(days) * 86_400 * 1_000_000;
    let purged = tx.execute(
        &format!("DELETE FROM {table} WHERE timestamp < ?1"),
        params![cutoff],
    )?;
    if purged > 0 {
        tracing::debug!(table, purged, "purged expired records");
    }
    Ok(purged)
}

fn validate_trng_row(
    id: i64,
    hash: Vec<u8>,
    hash_hex: String,
    timestamp_us: i64,
    source: &str,
    chunk_size: u32,
) -> Result<TrngRecord> {
    if hash.len() != chunk_size as usize {
        return Err(Error::Corrupt(format!(
            "record {id}: hash is {} bytes, expected {chunk_size}",
            hash.len()
        )));
    }
    if hash_hex != hex::encode(&hash) {
        return Err(Error::Corrupt(format!("record {id}: hex cache mismatch")));
    }
    let source = Source::parse(source)
        .ok_or_else(|| Error::Corrupt(format!("record {id}: unknown source {source:?}")))?;
    Ok(TrngRecord {
        id,
        hash,
        hash_hex,
        timestamp_us,
        consumed: false,
        source,
        chunk_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store(trng_capacity: u64, fortuna_capacity: u64) -> Store {
        Store::open_at(
            Path::new(":memory:"),
            trng_capacity,
            fortuna_capacity,
            16 * 1024 * 1024,
            None,
        )
        .unwrap()
    }

    fn hash_of(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn append_assigns_increasing_ids_and_timestamps() {
        let store = mem_store(10, 10);
        let a = store.append_trng(&hash_of(1), Source::Software).unwrap();
        let b = store.append_trng(&hash_of(2), Source::Software).unwrap();
        assert!(b > a);

        let records = store.fetch_trng(10, 0, false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].timestamp_us <= records[1].timestamp_us);
        assert_eq!(records[0].hash_hex, hex::encode(hash_of(1)));
    }

    #[test]
    fn eviction_keeps_newest_at_capacity() {
        let store = mem_store(3, 10);
        for i in 1..=4u8 {
            store.append_trng(&hash_of(i), Source::Hardware).unwrap();
        }
        let records = store.fetch_trng(10, 0, false).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].hash, hash_of(2).to_vec());
        assert_eq!(records[2].hash, hash_of(4).to_vec());

        let stats = store.stats().unwrap();
        assert_eq!(stats.trng_total, 3);
        assert!(stats.trng_queue_full);
    }

    #[test]
    fn append_at_capacity_evicts_exactly_one() {
        let store = mem_store(2, 10);
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        store.append_trng(&hash_of(2), Source::Software).unwrap();
        store.append_trng(&hash_of(3), Source::Software).unwrap();
        let records = store.fetch_trng(10, 0, false).unwrap();
        let hashes: Vec<_> = records.iter().map(|r| r.hash[0]).collect();
        assert_eq!(hashes, vec![2, 3]);
    }

    #[test]
    fn fetch_limit_zero_returns_empty_and_marks_nothing() {
        let store = mem_store(10, 10);
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        assert!(store.fetch_trng(0, 0, true).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().trng_unconsumed, 1);
    }

    #[test]
    fn fetch_respects_offset() {
        let store = mem_store(10, 10);
        for i in 1..=5u8 {
            store.append_trng(&hash_of(i), Source::Software).unwrap();
        }
        let records = store.fetch_trng(2, 2, false).unwrap();
        let hashes: Vec<_> = records.iter().map(|r| r.hash[0]).collect();
        assert_eq!(hashes, vec![3, 4]);
    }

    #[test]
    fn consume_marks_records_exactly_once() {
        let store = mem_store(10, 10);
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        store.append_trng(&hash_of(2), Source::Software).unwrap();

        let first = store.fetch_trng(10, 0, true).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.consumed));

        let second = store.fetch_trng(10, 0, true).unwrap();
        assert!(second.is_empty());

        let stats = store.stats().unwrap();
        assert_eq!(stats.trng_total, 2);
        assert_eq!(stats.trng_unconsumed, 0);
    }

    #[test]
    fn plain_fetch_does_not_consume() {
        let store = mem_store(10, 10);
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        assert_eq!(store.fetch_trng(10, 0, false).unwrap().len(), 1);
        assert_eq!(store.fetch_trng(10, 0, false).unwrap().len(), 1);
    }

    #[test]
    fn fortuna_queue_round_trip() {
        let store = mem_store(10, 10);
        let chunk = vec![7u8; 128];
        store.append_fortuna(&chunk, 32, 4).unwrap();
        let records = store.fetch_fortuna(10, 0, true).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, chunk);
        assert_eq!(records[0].chunk_size, 32);
        assert_eq!(records[0].amplification_factor, 4);
        assert!(store.fetch_fortuna(10, 0, true).unwrap().is_empty());
    }

    #[test]
    fn resize_trims_and_is_idempotent_within_bounds() {
        let store = mem_store(10, 10);
        for i in 1..=6u8 {
            store.append_trng(&hash_of(i), Source::Software).unwrap();
        }
        // Shrinking below the current length trims oldest-first.
        store.resize(4, 10).unwrap();
        let records = store.fetch_trng(10, 0, false).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].hash[0], 3);

        // Resizing to a capacity at or above the length is a no-op.
        store.resize(4, 10).unwrap();
        assert_eq!(store.fetch_trng(10, 0, false).unwrap().len(), 4);
        store.resize(100, 10).unwrap();
        assert_eq!(store.fetch_trng(10, 0, false).unwrap().len(), 4);
    }

    #[test]
    fn resize_rejects_zero() {
        let store = mem_store(10, 10);
        assert!(matches!(store.resize(0, 10), Err(Error::Overflow(_))));
    }

    #[test]
    fn corrupt_records_are_skipped_not_returned() {
        let store = mem_store(10, 10);
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        {
            let inner = store.inner.lock().unwrap();
            inner
                .conn
                .execute(
                    "INSERT INTO trng_data (hash, hash_hex, timestamp, consumed, source, chunk_size)
                     VALUES (x'0badc0de', '0badc0de', ?1, 0, 'software', 32)",
                    params![now_micros()],
                )
                .unwrap();
        }
        store.append_trng(&hash_of(3), Source::Software).unwrap();

        let records = store.fetch_trng(10, 0, false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.hash.len() == 32));
    }

    #[test]
    fn hex_cache_matches_hash() {
        let store = mem_store(10, 10);
        let hash: [u8; 32] = core::array::from_fn(|i| i as u8);
        store.append_trng(&hash, Source::Hardware).unwrap();
        let record = &store.fetch_trng(1, 0, false).unwrap()[0];
        assert_eq!(record.hash_hex, hex::encode(hash));
        assert_eq!(hex::decode(&record.hash_hex).unwrap(), record.hash);
    }

    #[test]
    fn stats_split_by_source() {
        let store = mem_store(10, 10);
        store.append_trng(&hash_of(1), Source::Hardware).unwrap();
        store.append_trng(&hash_of(2), Source::Hardware).unwrap();
        store.append_trng(&hash_of(3), Source::Software).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.trng_hardware_count, 2);
        assert_eq!(stats.trng_software_count, 1);
        assert!(!stats.trng_queue_full);
        assert!((stats.trng_hardware_percent - 200.0 / 3.0).abs() < 1e-9);

        let days = store.source_stats().unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].hardware, 2);
        assert_eq!(days[0].software, 1);
    }

    #[test]
    fn metadata_round_trip_and_overwrite() {
        let store = mem_store(10, 10);
        assert_eq!(store.metadata_get("reseed_count").unwrap(), None);
        store.metadata_put("reseed_count", "1").unwrap();
        store.metadata_put("reseed_count", "2").unwrap();
        assert_eq!(
            store.metadata_get("reseed_count").unwrap().as_deref(),
            Some("2")
        );
    }

    #[test]
    fn retention_purges_old_records() {
        let store = Store::open_at(Path::new(":memory:"), 100, 100, 16 * 1024 * 1024, Some(7))
            .unwrap();
        {
            let inner = store.inner.lock().unwrap();
            let stale = now_micros() - 8 * 86_400 * 1_000_000;
            inner
                .conn
                .execute(
                    "INSERT INTO trng_data (hash, hash_hex, timestamp, consumed, source, chunk_size)
                     VALUES (?1, ?2, ?3, 0, 'software', 32)",
                    params![vec![9u8; 32], hex::encode([9u8; 32]), stale],
                )
                .unwrap();
        }
        store.append_trng(&hash_of(1), Source::Software).unwrap();
        let records = store.fetch_trng(10, 0, false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash[0], 1);
    }
}
