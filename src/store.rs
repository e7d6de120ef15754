//! Append-only observation log with SQLite backend
//!
//! The log never updates or deletes rows; the one interesting query is
//! "latest observation per currency pair", answered in a single window-function
//! pass over the indexed log rather than a correlated subquery per pair.

use crate::error::{RateWatchError, Result};
use crate::types::{CurrencyCode, RateObservation};
use chrono::{DateTime, FixedOffset, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Observation log with SQLite backend
pub struct RateStore {
    conn: Connection,
}

impl RateStore {
    /// Create or open the log at path, creating parent directories as needed
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| {
            RateWatchError::StoreUnavailable(format!("failed to open database: {}", e))
        })?;

        // WAL lets the ingestion writer and snapshot readers proceed without
        // blocking each other; immutable rows make read-committed sufficient.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| {
                RateWatchError::StoreUnavailable(format!("failed to set journal mode: {}", e))
            })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    /// Create an in-memory log (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RateWatchError::StoreUnavailable(format!("failed to create in-memory database: {}", e))
        })?;

        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS observations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    base TEXT NOT NULL,
                    target TEXT NOT NULL,
                    rate REAL NOT NULL,
                    observed_at TEXT NOT NULL,
                    observed_unix INTEGER NOT NULL,
                    source_hour TEXT,
                    recorded_at TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| {
                RateWatchError::StoreUnavailable(format!(
                    "failed to create observations table: {}",
                    e
                ))
            })?;

        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_pair_observed
                 ON observations(base, target, observed_unix)",
                [],
            )
            .map_err(|e| {
                RateWatchError::StoreUnavailable(format!("failed to create pair index: {}", e))
            })?;

        Ok(())
    }

    /// Append one observation. Validates before any write; the log is never
    /// mutated on rejection. Returns the new row id.
    pub fn append(&mut self, obs: &RateObservation) -> Result<i64> {
        obs.validate()?;
        self.insert(obs)
    }

    /// Append a batch of observations (one provider fetch cycle) in a single
    /// transaction. All rows are validated up front; any invalid observation
    /// rejects the whole batch before a write happens.
    pub fn append_batch(&mut self, batch: &[RateObservation]) -> Result<usize> {
        for obs in batch {
            obs.validate()?;
        }

        let tx = self.conn.transaction()?;
        for obs in batch {
            Self::insert_with(&tx, obs)?;
        }
        tx.commit()?;

        debug!("appended batch of {} observations", batch.len());
        Ok(batch.len())
    }

    fn insert(&mut self, obs: &RateObservation) -> Result<i64> {
        Self::insert_with(&self.conn, obs)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_with(conn: &Connection, obs: &RateObservation) -> Result<()> {
        conn.execute(
            "INSERT INTO observations
                 (base, target, rate, observed_at, observed_unix, source_hour, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                obs.base.as_str(),
                obs.target.as_str(),
                obs.rate,
                obs.observed_at.to_rfc3339(),
                obs.observed_at.timestamp_millis(),
                obs.source_hour.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| {
            RateWatchError::StoreUnavailable(format!("failed to insert observation: {}", e))
        })?;
        Ok(())
    }

    /// Latest observation per (base, target) pair, ordered by target code
    /// ascending.
    ///
    /// One window-function pass: rank rows within each pair by observation
    /// time, ties broken by insertion order (highest row id wins), keep rank 1.
    /// With the (base, target, observed_unix) index this stays near-linear in
    /// the log size and never scans once per pair.
    pub fn latest_per_key(&self) -> Result<Vec<RateObservation>> {
        let mut stmt = self.conn.prepare(
            "SELECT base, target, rate, observed_at, source_hour
             FROM (
                 SELECT base, target, rate, observed_at, source_hour,
                        ROW_NUMBER() OVER (
                            PARTITION BY base, target
                            ORDER BY observed_unix DESC, id DESC
                        ) AS rn
                 FROM observations
             )
             WHERE rn = 1
             ORDER BY target ASC, base ASC",
        )?;

        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                RateWatchError::StoreUnavailable(format!("failed to read observations: {}", e))
            })?;

        rows.into_iter().map(row_to_observation).collect()
    }

    /// Timestamp of the most recent observation in the whole log, or None when
    /// the log is empty.
    pub fn last_update_time(&self) -> Result<Option<DateTime<FixedOffset>>> {
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT observed_at FROM observations
                 ORDER BY observed_unix DESC, id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        latest
            .map(|s| parse_stored_timestamp(&s))
            .transpose()
    }

    /// Total observation count
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // query_map wants rusqlite's own error type, so rows come out as raw
    // tuples and get promoted to domain types afterwards.
    fn map_row(row: &Row) -> rusqlite::Result<StoredRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }
}

type StoredRow = (String, String, f64, String, Option<String>);

fn row_to_observation((base, target, rate, observed_at, source_hour): StoredRow) -> Result<RateObservation> {
    Ok(RateObservation {
        base: CurrencyCode::parse(&base)?,
        target: CurrencyCode::parse(&target)?,
        rate,
        observed_at: parse_stored_timestamp(&observed_at)?,
        source_hour: source_hour
            .map(|s| parse_stored_timestamp(&s))
            .transpose()?,
    })
}

fn parse_stored_timestamp(s: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).map_err(|e| {
        RateWatchError::ParseError(format!("bad timestamp {:?} in store: {}", s, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn utc(h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 27, h, m, 0)
            .unwrap()
    }

    fn obs(base: &str, target: &str, rate: f64, at: DateTime<FixedOffset>) -> RateObservation {
        RateObservation::new(
            CurrencyCode::parse(base).unwrap(),
            CurrencyCode::parse(target).unwrap(),
            rate,
            at,
            None,
        )
    }

    #[test]
    fn test_store_creation() {
        let store = RateStore::open_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_empty_store_latest_is_empty() {
        let store = RateStore::open_in_memory().unwrap();
        assert!(store.latest_per_key().unwrap().is_empty());
        assert!(store.last_update_time().unwrap().is_none());
    }

    #[test]
    fn test_latest_per_key_picks_max_timestamp() {
        let mut store = RateStore::open_in_memory().unwrap();
        store.append(&obs("USD", "EUR", 0.90, utc(1, 0))).unwrap();
        store.append(&obs("USD", "EUR", 0.92, utc(2, 0))).unwrap();
        store.append(&obs("USD", "JPY", 145.0, utc(3, 0))).unwrap();

        let latest = store.latest_per_key().unwrap();
        assert_eq!(latest.len(), 2);
        // Ordered by target code ascending
        assert_eq!(latest[0].target.as_str(), "EUR");
        assert_eq!(latest[0].rate, 0.92);
        assert_eq!(latest[1].target.as_str(), "JPY");
        assert_eq!(latest[1].rate, 145.0);
    }

    #[test]
    fn test_identical_timestamp_tie_goes_to_last_appended() {
        let mut store = RateStore::open_in_memory().unwrap();
        let at = utc(12, 0);
        store.append(&obs("USD", "EUR", 0.90, at)).unwrap();
        store.append(&obs("USD", "EUR", 0.91, at)).unwrap();
        store.append(&obs("USD", "EUR", 0.92, at)).unwrap();

        let latest = store.latest_per_key().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].rate, 0.92);
    }

    #[test]
    fn test_later_append_with_earlier_timestamp_does_not_win() {
        let mut store = RateStore::open_in_memory().unwrap();
        store.append(&obs("USD", "EUR", 0.92, utc(5, 0))).unwrap();
        store.append(&obs("USD", "EUR", 0.80, utc(1, 0))).unwrap();

        let latest = store.latest_per_key().unwrap();
        assert_eq!(latest[0].rate, 0.92);
    }

    #[test]
    fn test_invalid_observation_leaves_store_unchanged() {
        let mut store = RateStore::open_in_memory().unwrap();
        store.append(&obs("USD", "EUR", 0.92, utc(1, 0))).unwrap();

        let err = store.append(&obs("USD", "EUR", 0.0, utc(2, 0)));
        assert!(matches!(err, Err(RateWatchError::InvalidObservation(_))));
        assert_eq!(store.count().unwrap(), 1);

        let err = store.append(&obs("USD", "EUR", -3.0, utc(2, 0)));
        assert!(err.is_err());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_batch_rejected_atomically() {
        let mut store = RateStore::open_in_memory().unwrap();
        let batch = vec![
            obs("USD", "EUR", 0.92, utc(1, 0)),
            obs("USD", "JPY", -1.0, utc(1, 0)),
        ];
        assert!(store.append_batch(&batch).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_append_batch() {
        let mut store = RateStore::open_in_memory().unwrap();
        let batch = vec![
            obs("USD", "EUR", 0.92, utc(1, 0)),
            obs("USD", "JPY", 145.0, utc(1, 0)),
            obs("USD", "XAU", 0.0003, utc(1, 0)),
        ];
        assert_eq!(store.append_batch(&batch).unwrap(), 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.latest_per_key().unwrap().len(), 3);
    }

    #[test]
    fn test_last_update_time() {
        let mut store = RateStore::open_in_memory().unwrap();
        store.append(&obs("USD", "EUR", 0.90, utc(1, 0))).unwrap();
        store.append(&obs("USD", "JPY", 145.0, utc(3, 30))).unwrap();
        store.append(&obs("USD", "EUR", 0.92, utc(2, 0))).unwrap();

        assert_eq!(store.last_update_time().unwrap(), Some(utc(3, 30)));
    }

    #[test]
    fn test_offset_preserved_round_trip() {
        let mut store = RateStore::open_in_memory().unwrap();
        let at = FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 27, 8, 0, 0)
            .unwrap();
        let source_hour = FixedOffset::west_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 5, 26, 16, 0, 0)
            .unwrap();
        store
            .append(&RateObservation::new(
                CurrencyCode::parse("USD").unwrap(),
                CurrencyCode::parse("CNY").unwrap(),
                7.21,
                at,
                Some(source_hour),
            ))
            .unwrap();

        let latest = store.latest_per_key().unwrap();
        assert_eq!(latest[0].observed_at, at);
        assert_eq!(latest[0].observed_at.offset().local_minus_utc(), 8 * 3600);
        assert_eq!(latest[0].source_hour, Some(source_hour));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.db");
        {
            let mut store = RateStore::open(&path).unwrap();
            store.append(&obs("USD", "EUR", 0.92, utc(1, 0))).unwrap();
        }
        let store = RateStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.latest_per_key().unwrap()[0].rate, 0.92);
    }

    proptest! {
        // The SQL window query must agree with a direct single-pass
        // reduction over the same records: last write wins within a key's
        // maximum timestamp, every key present appears exactly once.
        #[test]
        fn prop_latest_matches_hashmap_reduction(
            records in proptest::collection::vec(
                (0u8..2, 0u8..4, 1u64..1_000_000, 0i64..100_000),
                0..60,
            )
        ) {
            let bases = ["EUR", "USD"];
            let targets = ["CNY", "EUR", "GBP", "JPY"];
            let mut store = RateStore::open_in_memory().unwrap();
            let mut expected: HashMap<(String, String), (i64, usize, f64)> = HashMap::new();

            for (seq, (b, t, rate_micros, at_secs)) in records.iter().enumerate() {
                let base = bases[*b as usize];
                let target = targets[*t as usize];
                let rate = *rate_micros as f64 / 1e6;
                let at = FixedOffset::east_opt(0).unwrap()
                    .timestamp_opt(*at_secs, 0)
                    .unwrap();
                store.append(&obs(base, target, rate, at)).unwrap();

                let best = expected
                    .entry((base.to_string(), target.to_string()))
                    .or_insert((*at_secs, seq, rate));
                if (*at_secs, seq) >= (best.0, best.1) {
                    *best = (*at_secs, seq, rate);
                }
            }

            let latest = store.latest_per_key().unwrap();
            prop_assert_eq!(latest.len(), expected.len());
            for o in &latest {
                let key = (o.base.as_str().to_string(), o.target.as_str().to_string());
                let best = &expected[&key];
                prop_assert_eq!(o.rate, best.2);
            }
            // Presentation order: target ascending, base breaking ties
            let mut sorted: Vec<_> = latest
                .iter()
                .map(|o| (o.target.as_str(), o.base.as_str()))
                .collect();
            sorted.sort_unstable();
            prop_assert_eq!(
                sorted,
                latest
                    .iter()
                    .map(|o| (o.target.as_str(), o.base.as_str()))
                    .collect::<Vec<_>>()
            );
        }
    }
}
