// 💾 Score Cache - One row per person, fully overwritten on every recompute
//
// Missing and stale entries are normal states, not errors: the caller decides
// whether to serve the stale value or recompute.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::{ScoreBreakdown, MAX_HUMANITY_SCORE, MAX_SCORE};
use crate::config::CacheConfig;
use crate::db::ConnectionPool;
use crate::error::{CacheError, StoreError};

// ============================================================================
// GRADE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Grade::A
        } else if score >= 60.0 {
            Grade::B
        } else if score >= 40.0 {
            Grade::C
        } else if score > 0.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Human-readable band shown next to the letter
    pub fn category(&self) -> &'static str {
        match self {
            Grade::A => "High Support",
            Grade::B => "Moderate Support",
            Grade::C | Grade::D => "Low Support",
            Grade::F => "No Support",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Grade::A),
            "B" => Ok(Grade::B),
            "C" => Ok(Grade::C),
            "D" => Ok(Grade::D),
            "F" => Ok(Grade::F),
            other => Err(format!("unknown grade {:?}", other)),
        }
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCacheEntry {
    pub person_id: String,
    pub score: f64,
    pub total_funding: f64,
    pub grade: Grade,
    pub humanity_score: u8,
    pub support_total: f64,
    pub oppose_total: f64,
    pub matched_committee_count: usize,
    pub matched_transaction_count: usize,
    pub election_year: i32,
    pub config_fingerprint: String,
    pub last_calculated: DateTime<Utc>,
}

impl ScoreCacheEntry {
    /// Entry for a fresh computation. The timestamp is truncated to the
    /// microsecond precision the store keeps.
    pub fn from_breakdown(person_id: &str, breakdown: &ScoreBreakdown, now: DateTime<Utc>) -> Self {
        ScoreCacheEntry {
            person_id: person_id.to_string(),
            score: breakdown.score,
            total_funding: breakdown.total_funding,
            grade: Grade::from_score(breakdown.score),
            humanity_score: breakdown.humanity_score,
            support_total: breakdown.support_total,
            oppose_total: breakdown.oppose_total,
            matched_committee_count: breakdown.matched_committee_count,
            matched_transaction_count: breakdown.matched_transaction_count,
            election_year: breakdown.election_year,
            config_fingerprint: breakdown.config_fingerprint.clone(),
            last_calculated: now.trunc_subsecs(6),
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_calculated
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Row as stored, before validation
struct RawEntry {
    person_id: String,
    score: f64,
    total_funding: f64,
    grade: String,
    humanity_score: i64,
    support_total: f64,
    oppose_total: f64,
    matched_committee_count: i64,
    matched_transaction_count: i64,
    election_year: i32,
    config_fingerprint: String,
    last_calculated: String,
}

const ENTRY_COLUMNS: &str = "person_id, score, total_funding, grade, humanity_score, support_total, oppose_total,
     matched_committee_count, matched_transaction_count, election_year,
     config_fingerprint, last_calculated";

impl RawEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RawEntry {
            person_id: row.get(0)?,
            score: row.get(1)?,
            total_funding: row.get(2)?,
            grade: row.get(3)?,
            humanity_score: row.get(4)?,
            support_total: row.get(5)?,
            oppose_total: row.get(6)?,
            matched_committee_count: row.get(7)?,
            matched_transaction_count: row.get(8)?,
            election_year: row.get(9)?,
            config_fingerprint: row.get(10)?,
            last_calculated: row.get(11)?,
        })
    }

    fn into_entry(self) -> Result<ScoreCacheEntry, CacheError> {
        let corrupt = |detail: String| CacheError::Corrupt {
            person_id: self.person_id.clone(),
            detail,
        };

        if !(0.0..=MAX_SCORE).contains(&self.score) {
            return Err(corrupt(format!("score {} out of range", self.score)));
        }
        if !(0..=i64::from(MAX_HUMANITY_SCORE)).contains(&self.humanity_score) {
            return Err(corrupt(format!("humanity score {} out of range", self.humanity_score)));
        }
        let grade = Grade::from_str(&self.grade).map_err(corrupt)?;
        let last_calculated = parse_timestamp(&self.last_calculated)
            .ok_or_else(|| corrupt(format!("bad timestamp {:?}", self.last_calculated)))?;

        Ok(ScoreCacheEntry {
            person_id: self.person_id.clone(),
            score: self.score,
            total_funding: self.total_funding,
            grade,
            humanity_score: self.humanity_score as u8,
            support_total: self.support_total,
            oppose_total: self.oppose_total,
            matched_committee_count: self.matched_committee_count.max(0) as usize,
            matched_transaction_count: self.matched_transaction_count.max(0) as usize,
            election_year: self.election_year,
            config_fingerprint: self.config_fingerprint.clone(),
            last_calculated,
        })
    }
}

// ============================================================================
// COVERAGE / STATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub cached_count: usize,
    pub expected_count: usize,

    /// cached / expected × 100, not clamped
    pub coverage_percent: f64,
}

impl Coverage {
    pub fn new(cached_count: usize, expected_count: usize) -> Self {
        let coverage_percent = if expected_count == 0 {
            0.0
        } else {
            cached_count as f64 * 100.0 / expected_count as f64
        };
        Coverage {
            cached_count,
            expected_count,
            coverage_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub stale_count: usize,
    pub average_score: f64,
    pub average_humanity_score: f64,
    pub total_funding: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

// ============================================================================
// CACHE
// ============================================================================

pub struct ScoreCache {
    pool: Arc<ConnectionPool>,
    config: CacheConfig,
}

impl ScoreCache {
    pub fn new(pool: Arc<ConnectionPool>, config: CacheConfig) -> Self {
        ScoreCache { pool, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, person_id: &str) -> Result<Option<ScoreCacheEntry>, CacheError> {
        let conn = self.pool.checkout()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM score_cache WHERE person_id = ?1", ENTRY_COLUMNS),
                params![person_id],
                RawEntry::from_row,
            )
            .optional()
            .map_err(CacheError::Read)?;

        raw.map(RawEntry::into_entry).transpose()
    }

    /// Full overwrite of the person's row in one transaction
    pub fn put(&self, entry: &ScoreCacheEntry) -> Result<(), CacheError> {
        let write_err = |source| CacheError::Write {
            person_id: entry.person_id.clone(),
            source,
        };

        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction().map_err(write_err)?;
        tx.execute(
            &format!(
                "INSERT INTO score_cache ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(person_id) DO UPDATE SET
                    score = excluded.score,
                    total_funding = excluded.total_funding,
                    grade = excluded.grade,
                    humanity_score = excluded.humanity_score,
                    support_total = excluded.support_total,
                    oppose_total = excluded.oppose_total,
                    matched_committee_count = excluded.matched_committee_count,
                    matched_transaction_count = excluded.matched_transaction_count,
                    election_year = excluded.election_year,
                    config_fingerprint = excluded.config_fingerprint,
                    last_calculated = excluded.last_calculated",
                ENTRY_COLUMNS
            ),
            params![
                entry.person_id,
                entry.score,
                entry.total_funding,
                entry.grade.as_str(),
                i64::from(entry.humanity_score),
                entry.support_total,
                entry.oppose_total,
                entry.matched_committee_count as i64,
                entry.matched_transaction_count as i64,
                entry.election_year,
                entry.config_fingerprint,
                format_timestamp(&entry.last_calculated),
            ],
        )
        .map_err(write_err)?;
        tx.commit().map_err(write_err)?;

        debug!(person_id = %entry.person_id, score = entry.score, "cache entry written");
        Ok(())
    }

    /// Write `entry`; if that fails, run `recompute` once and write its fresh
    /// value instead. Returns the entry that was stored.
    pub fn put_or_recompute<F>(&self, entry: ScoreCacheEntry, recompute: F) -> Result<ScoreCacheEntry, CacheError>
    where
        F: FnOnce() -> Result<ScoreCacheEntry, StoreError>,
    {
        let err = match self.put(&entry) {
            Ok(()) => return Ok(entry),
            Err(err) => err,
        };

        warn!(person_id = %entry.person_id, error = %err, "cache write failed, recomputing once");
        let fresh = recompute()?;
        self.put(&fresh)?;
        Ok(fresh)
    }

    /// Older than `threshold_days`, measured now
    pub fn is_stale(&self, entry: &ScoreCacheEntry, threshold_days: i64) -> bool {
        Self::is_stale_at(entry, threshold_days, Utc::now())
    }

    pub fn is_stale_at(entry: &ScoreCacheEntry, threshold_days: i64, now: DateTime<Utc>) -> bool {
        entry.age_at(now) > Duration::days(threshold_days)
    }

    /// Computed under a different interest-group configuration
    pub fn is_outdated(&self, entry: &ScoreCacheEntry, current_fingerprint: &str) -> bool {
        self.config.track_config_fingerprint && entry.config_fingerprint != current_fingerprint
    }

    /// Stale by age (configured threshold) or by configuration
    pub fn needs_refresh(&self, entry: &ScoreCacheEntry, current_fingerprint: &str) -> bool {
        self.is_stale(entry, self.config.stale_after_days) || self.is_outdated(entry, current_fingerprint)
    }

    pub fn cached_count(&self) -> Result<usize, CacheError> {
        let conn = self.pool.checkout()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM score_cache", [], |row| row.get(0))
            .map_err(CacheError::Read)?;
        Ok(count.max(0) as usize)
    }

    pub fn coverage(&self, expected_count: usize) -> Result<Coverage, CacheError> {
        Ok(Coverage::new(self.cached_count()?, expected_count))
    }

    /// Delete the row; returns whether one existed
    pub fn invalidate(&self, person_id: &str) -> Result<bool, CacheError> {
        let conn = self.pool.checkout()?;
        let deleted = conn
            .execute("DELETE FROM score_cache WHERE person_id = ?1", params![person_id])
            .map_err(|source| CacheError::Write {
                person_id: person_id.to_string(),
                source,
            })?;

        if deleted > 0 {
            info!(person_id, "cache entry invalidated");
        }
        Ok(deleted > 0)
    }

    pub fn all_entries(&self) -> Result<Vec<ScoreCacheEntry>, CacheError> {
        self.query_entries(
            &format!(
                "SELECT {} FROM score_cache ORDER BY score DESC, person_id",
                ENTRY_COLUMNS
            ),
            None,
        )
    }

    /// Entries older than `threshold_days`, oldest first
    pub fn stale_entries(&self, threshold_days: i64) -> Result<Vec<ScoreCacheEntry>, CacheError> {
        let cutoff = Utc::now() - Duration::days(threshold_days);
        self.query_entries(
            &format!(
                "SELECT {} FROM score_cache WHERE last_calculated < ?1
                 ORDER BY last_calculated, person_id",
                ENTRY_COLUMNS
            ),
            Some(format_timestamp(&cutoff)),
        )
    }

    fn query_entries(&self, sql: &str, cutoff: Option<String>) -> Result<Vec<ScoreCacheEntry>, CacheError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(sql).map_err(CacheError::Read)?;
        let rows = match cutoff {
            Some(cutoff) => stmt.query_map(params![cutoff], RawEntry::from_row),
            None => stmt.query_map([], RawEntry::from_row),
        }
        .map_err(CacheError::Read)?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw.map_err(CacheError::Read)?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.all_entries()?;
        let now = Utc::now();

        let entry_count = entries.len();
        let stale_count = entries
            .iter()
            .filter(|e| Self::is_stale_at(e, self.config.stale_after_days, now))
            .count();
        let total_funding: f64 = entries.iter().map(|e| e.total_funding).sum();
        let average = |value: fn(&ScoreCacheEntry) -> f64| {
            if entry_count == 0 {
                0.0
            } else {
                entries.iter().map(value).sum::<f64>() / entry_count as f64
            }
        };
        let average_score = average(|e| e.score);
        let average_humanity_score = average(|e| f64::from(e.humanity_score));

        Ok(CacheStats {
            entry_count,
            stale_count,
            average_score,
            average_humanity_score,
            total_funding,
            oldest: entries.iter().map(|e| e.last_calculated).min(),
            newest: entries.iter().map(|e| e.last_calculated).max(),
        })
    }

    /// Write every entry to a CSV file; returns the row count
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize, CacheError> {
        let entries = self.all_entries()?;

        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for entry in &entries {
            writer.serialize(entry)?;
        }
        writer.flush().map_err(csv::Error::from)?;

        info!(path = ?path.as_ref(), rows = entries.len(), "cache exported");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{temp_pool, temp_pool_with_busy, WriteLock};
    use std::collections::BTreeSet;

    fn cache() -> ScoreCache {
        ScoreCache::new(Arc::new(temp_pool("cache", 2)), CacheConfig::default())
    }

    fn breakdown(support: f64, score: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            election_year: 2024,
            fec_candidate_ids: BTreeSet::new(),
            support_total: support,
            oppose_total: 0.0,
            score,
            total_funding: support,
            matched_committee_count: 1,
            matched_transaction_count: 1,
            funded_years: [2024].into_iter().collect(),
            humanity_score: 0,
            config_fingerprint: "abc".to_string(),
        }
    }

    fn entry(person_id: &str, score: f64, age_days: i64) -> ScoreCacheEntry {
        ScoreCacheEntry::from_breakdown(
            person_id,
            &breakdown(score * 1_000.0, score),
            Utc::now() - Duration::days(age_days),
        )
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(Grade::from_score(80.0), Grade::A);
        assert_eq!(Grade::from_score(79.9), Grade::B);
        assert_eq!(Grade::from_score(60.0), Grade::B);
        assert_eq!(Grade::from_score(45.0), Grade::C);
        assert_eq!(Grade::from_score(39.0), Grade::D);
        assert_eq!(Grade::from_score(0.01), Grade::D);
        assert_eq!(Grade::from_score(0.0), Grade::F);

        assert_eq!(Grade::A.category(), "High Support");
        assert_eq!(Grade::D.category(), "Low Support");
        assert_eq!(Grade::F.category(), "No Support");
    }

    #[test]
    fn test_put_get_round_trip() {
        let cache = cache();
        let e = entry("P1", 45.0, 0);

        cache.put(&e).unwrap();
        assert_eq!(cache.get("P1").unwrap(), Some(e));
        assert_eq!(cache.get("P2").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites_whole_row() {
        let cache = cache();
        cache.put(&entry("P1", 45.0, 3)).unwrap();

        let mut newer = entry("P1", 0.0, 0);
        newer.config_fingerprint = "def".to_string();
        cache.put(&newer).unwrap();
        cache.put(&newer).unwrap();

        let stored = cache.get("P1").unwrap().unwrap();
        assert_eq!(stored, newer);
        assert_eq!(stored.grade, Grade::F);
        assert_eq!(cache.cached_count().unwrap(), 1);
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let fresh = ScoreCacheEntry::from_breakdown("P1", &breakdown(1.0, 1.0), now - Duration::days(29));
        let old = ScoreCacheEntry::from_breakdown("P2", &breakdown(1.0, 1.0), now - Duration::days(31));

        assert!(!ScoreCache::is_stale_at(&fresh, 30, now));
        assert!(ScoreCache::is_stale_at(&old, 30, now));
    }

    #[test]
    fn test_fingerprint_mismatch_is_outdated() {
        let cache = cache();
        let e = entry("P1", 45.0, 0);

        assert!(!cache.is_outdated(&e, "abc"));
        assert!(cache.is_outdated(&e, "xyz"));
        assert!(cache.needs_refresh(&e, "xyz"));
        assert!(!cache.needs_refresh(&e, "abc"));

        let untracked = ScoreCache::new(
            Arc::new(temp_pool("untracked", 1)),
            CacheConfig {
                track_config_fingerprint: false,
                ..CacheConfig::default()
            },
        );
        assert!(!untracked.is_outdated(&e, "xyz"));
    }

    #[test]
    fn test_coverage() {
        assert_eq!(Coverage::new(450, 500).coverage_percent, 90.0);
        assert_eq!(Coverage::new(0, 0).coverage_percent, 0.0);
        assert_eq!(Coverage::new(10, 5).coverage_percent, 200.0);

        let cache = cache();
        cache.put(&entry("P1", 10.0, 0)).unwrap();
        cache.put(&entry("P2", 20.0, 0)).unwrap();
        let c = cache.coverage(4).unwrap();
        assert_eq!(c.cached_count, 2);
        assert_eq!(c.coverage_percent, 50.0);
    }

    #[test]
    fn test_invalidate() {
        let cache = cache();
        cache.put(&entry("P1", 10.0, 0)).unwrap();

        assert!(cache.invalidate("P1").unwrap());
        assert!(!cache.invalidate("P1").unwrap());
        assert_eq!(cache.get("P1").unwrap(), None);
    }

    #[test]
    fn test_stale_entries_and_stats() {
        let cache = cache();
        cache.put(&entry("P1", 10.0, 40)).unwrap();
        cache.put(&entry("P2", 30.0, 35)).unwrap();
        cache.put(&entry("P3", 50.0, 1)).unwrap();

        let stale: Vec<String> = cache
            .stale_entries(30)
            .unwrap()
            .into_iter()
            .map(|e| e.person_id)
            .collect();
        assert_eq!(stale, vec!["P1".to_string(), "P2".to_string()]);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.stale_count, 2);
        assert_eq!(stats.average_score, 30.0);
        assert_eq!(stats.average_humanity_score, 0.0);
        assert!(stats.oldest < stats.newest);
    }

    #[test]
    fn test_corrupt_row_reported() {
        let cache = cache();
        {
            let conn = cache.pool.checkout().unwrap();
            conn.execute(
                "INSERT INTO score_cache (person_id, score, total_funding, grade, humanity_score,
                    support_total, oppose_total, matched_committee_count, matched_transaction_count,
                    election_year, config_fingerprint, last_calculated)
                 VALUES ('P9', 10.0, 0, 'Z', 3, 0, 0, 0, 0, 2024, 'abc', '2024-01-01T00:00:00Z'),
                        ('P8', 10.0, 0, 'D', 9, 0, 0, 0, 0, 2024, 'abc', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }

        assert!(matches!(cache.get("P9"), Err(CacheError::Corrupt { .. })));
        assert!(matches!(cache.get("P8"), Err(CacheError::Corrupt { .. })));
    }

    #[test]
    fn test_export_csv() {
        let cache = cache();
        cache.put(&entry("P1", 10.0, 0)).unwrap();
        cache.put(&entry("P2", 60.0, 0)).unwrap();

        let path = std::env::temp_dir().join(format!("scores-{}.csv", uuid::Uuid::new_v4()));
        assert_eq!(cache.export_csv(&path).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "person_id");

        let first = reader.records().next().unwrap().unwrap();
        // Highest score first
        assert_eq!(&first[0], "P2");
        assert_eq!(&first[3], "B");
    }

    fn locked_cache(label: &str) -> (ScoreCache, WriteLock) {
        let pool = temp_pool_with_busy(label, 2, std::time::Duration::from_millis(50));
        let lock = WriteLock::acquire(pool.path());
        (ScoreCache::new(Arc::new(pool), CacheConfig::default()), lock)
    }

    #[test]
    fn test_put_or_recompute_skips_recompute_on_success() {
        let cache = cache();
        let stored = cache
            .put_or_recompute(entry("P1", 45.0, 0), || panic!("no recompute expected"))
            .unwrap();

        assert_eq!(stored.score, 45.0);
        assert_eq!(cache.get("P1").unwrap(), Some(stored));
    }

    #[test]
    fn test_failed_write_stores_recomputed_value() {
        let (cache, lock) = locked_cache("recompute");

        let stored = cache
            .put_or_recompute(entry("P1", 45.0, 0), || {
                lock.release();
                Ok(entry("P1", 60.0, 0))
            })
            .unwrap();

        assert_eq!(stored.score, 60.0);
        assert_eq!(cache.get("P1").unwrap().unwrap().score, 60.0);
    }

    #[test]
    fn test_second_write_failure_is_reported() {
        let (cache, _lock) = locked_cache("write-twice");
        let mut recomputes = 0;

        let result = cache.put_or_recompute(entry("P1", 45.0, 0), || {
            recomputes += 1;
            Ok(entry("P1", 45.0, 0))
        });

        assert!(matches!(result, Err(CacheError::Write { .. })));
        assert_eq!(recomputes, 1);
        assert_eq!(cache.get("P1").unwrap(), None);
    }
}
