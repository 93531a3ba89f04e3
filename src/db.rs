// 🗄️ Database - SQLite schema, connection pool, seed helpers
//
// One database file holds the collaborator tables (persons, candidate
// records, committees, transactions, interest-group config) and the one
// table this crate owns: score_cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::entities::{CandidateRecord, Committee, Person, Transaction};
use crate::error::StoreError;

/// How long a connection waits on a locked database before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Identity tables (owned by the identity-resolution pipeline)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons (
            person_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT '',
            current_office TEXT NOT NULL DEFAULT '',
            current_district TEXT NOT NULL DEFAULT '',
            current_party TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    // No uniqueness on (fec_candidate_id, election_year): the resolver has to
    // see duplicate claims to report them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidate_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id TEXT NOT NULL,
            fec_candidate_id TEXT NOT NULL,
            election_year INTEGER NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    // ==========================================================================
    // Campaign finance tables (owned by bulk ingestion)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS committees (
            committee_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            committee_type TEXT NOT NULL DEFAULT '',
            designation TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            committee_id TEXT NOT NULL,
            fec_candidate_id TEXT NOT NULL,
            transaction_type_code TEXT NOT NULL,
            amount REAL NOT NULL,
            transaction_date TEXT,
            election_year INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Interest-group configuration (owned by configuration management)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cfg_interest_group_committees (
            committee_id TEXT PRIMARY KEY,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cfg_interest_group_keywords (
            keyword TEXT PRIMARY KEY,
            category TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // ==========================================================================
    // Score cache (owned by this crate)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_cache (
            person_id TEXT PRIMARY KEY,
            score REAL NOT NULL,
            total_funding REAL NOT NULL,
            grade TEXT NOT NULL,
            humanity_score INTEGER NOT NULL,
            support_total REAL NOT NULL,
            oppose_total REAL NOT NULL,
            matched_committee_count INTEGER NOT NULL,
            matched_transaction_count INTEGER NOT NULL,
            election_year INTEGER NOT NULL,
            config_fingerprint TEXT NOT NULL,
            last_calculated TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidate_records_fec
         ON candidate_records(fec_candidate_id, election_year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_candidate_records_person
         ON candidate_records(person_id, election_year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_candidate
         ON transactions(fec_candidate_id, election_year)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_cache_last_calculated
         ON score_cache(last_calculated)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CONNECTION POOL
// ============================================================================

/// Connection borrowed from the pool; goes back when dropped
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Bounded pool of SQLite connections with scoped checkout.
///
/// Workers borrow a connection for one operation and give it back when the
/// guard drops; nothing holds a connection across candidates.
pub struct ConnectionPool {
    path: PathBuf,
    inner: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Open up to `capacity` connections and make sure the schema exists
    pub fn open(path: &Path, capacity: usize, checkout_timeout: Duration) -> Result<Self> {
        Self::open_with_busy_timeout(path, capacity, checkout_timeout, BUSY_TIMEOUT)
    }

    pub fn open_with_busy_timeout(
        path: &Path,
        capacity: usize,
        checkout_timeout: Duration,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let capacity = capacity.clamp(1, u32::MAX as usize) as u32;
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| conn.busy_timeout(busy_timeout));

        let inner = Pool::builder()
            .max_size(capacity)
            .connection_timeout(checkout_timeout)
            .build(manager)
            .with_context(|| format!("Failed to open database: {:?}", path))?;

        {
            let conn = inner
                .get()
                .with_context(|| format!("Failed to connect to database: {:?}", path))?;
            setup_database(&conn).context("Failed to set up schema")?;
        }

        debug!(path = ?path, capacity, "connection pool opened");

        Ok(ConnectionPool {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_size() as usize
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow a connection, waiting up to the checkout timeout
    pub fn checkout(&self) -> std::result::Result<PooledConnection, StoreError> {
        self.inner.get().map_err(|err| {
            StoreError::Unavailable(format!(
                "no connection available (pool size {}): {}",
                self.capacity(),
                err
            ))
        })
    }
}

// ============================================================================
// SEED HELPERS
// The collaborator tables are normally filled by the ingestion and identity
// pipelines; these helpers write the same rows for the CLI `init` command
// and for tests.
// ============================================================================

pub fn insert_person(conn: &Connection, person: &Person) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO persons (
            person_id, display_name, state, current_office, current_district, current_party
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            person.person_id,
            person.display_name,
            person.state,
            person.current_office,
            person.current_district,
            person.current_party,
        ],
    )?;
    Ok(())
}

pub fn insert_candidate_record(conn: &Connection, record: &CandidateRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO candidate_records (person_id, fec_candidate_id, election_year, is_primary)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.person_id,
            record.fec_candidate_id,
            record.election_year,
            record.is_primary,
        ],
    )?;
    Ok(())
}

pub fn insert_committee(conn: &Connection, committee: &Committee) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO committees (committee_id, name, committee_type, designation)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            committee.committee_id,
            committee.name,
            committee.committee_type.code(),
            committee.designation,
        ],
    )?;
    Ok(())
}

pub fn insert_transactions(conn: &mut Connection, transactions: &[Transaction]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO transactions (
                committee_id, fec_candidate_id, transaction_type_code,
                amount, transaction_date, election_year
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        for t in transactions {
            stmt.execute(params![
                t.committee_id,
                t.fec_candidate_id,
                t.transaction_type_code,
                t.amount,
                t.transaction_date.map(|d| d.format("%Y-%m-%d").to_string()),
                t.election_year,
            ])?;
        }
    }
    tx.commit()?;

    Ok(transactions.len())
}

pub fn insert_interest_group_committee(
    conn: &Connection,
    committee_id: &str,
    description: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cfg_interest_group_committees (committee_id, description, is_active)
         VALUES (?1, ?2, 1)",
        params![committee_id, description],
    )?;
    Ok(())
}

pub fn insert_interest_group_keyword(conn: &Connection, keyword: &str, category: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cfg_interest_group_keywords (keyword, category, is_active)
         VALUES (?1, ?2, 1)",
        params![keyword, category],
    )?;
    Ok(())
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::entities::CommitteeType;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(count_rows(&conn, "score_cache").unwrap(), 0);
    }

    #[test]
    fn test_seed_helpers() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_committee(
            &conn,
            &Committee::new("C00797670", "AIPAC PAC", CommitteeType::Pac),
        )
        .unwrap();
        insert_candidate_record(&conn, &CandidateRecord::new("P1", "H4NY00001", 2024)).unwrap();
        // Duplicate claims are allowed at the storage level
        insert_candidate_record(&conn, &CandidateRecord::new("P2", "H4NY00001", 2024)).unwrap();

        let inserted = insert_transactions(
            &mut conn,
            &[
                Transaction::new("C00797670", "H4NY00001", "24E", 15_000.0, 2024),
                Transaction::new("C00797670", "H4NY00001", "24K", 5_000.0, 2024),
            ],
        )
        .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(count_rows(&conn, "transactions").unwrap(), 2);
        assert_eq!(count_rows(&conn, "candidate_records").unwrap(), 2);
        assert_eq!(count_rows(&conn, "committees").unwrap(), 1);
    }

    #[test]
    fn test_pool_checkout_returns_on_drop() {
        let pool = temp_pool("checkout", 1);

        {
            let conn = pool.checkout().unwrap();
            assert_eq!(count_rows(&conn, "score_cache").unwrap(), 0);
        }

        // The single connection came back
        assert!(pool.checkout().is_ok());
    }

    #[test]
    fn test_pool_exhaustion_times_out() {
        let pool = ConnectionPool::open(
            &temp_db_path("exhaust"),
            1,
            Duration::from_millis(50),
        )
        .unwrap();

        let _held = pool.checkout().unwrap();
        let second = pool.checkout();

        assert!(matches!(second, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_pool_waiter_wakes_when_connection_returned() {
        let pool = Arc::new(temp_pool("wake", 1));
        let held = pool.checkout().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkout().map(|_| ()).is_ok())
        };

        thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_locked_database_write_is_unavailable() {
        let pool = temp_pool_with_busy("locked", 1, Duration::from_millis(50));
        let lock = WriteLock::acquire(pool.path());

        let conn = pool.checkout().unwrap();
        // Reads still go through under WAL
        assert_eq!(count_rows(&conn, "score_cache").unwrap(), 0);

        let insert = "INSERT INTO cfg_interest_group_keywords (keyword) VALUES ('NORPAC')";
        let err = conn.execute(insert, []).map_err(StoreError::from).unwrap_err();
        assert!(err.is_retryable());

        lock.release();
        assert!(conn.execute(insert, []).is_ok());
    }
}
