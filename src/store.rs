// 🔌 Store Interfaces - What this crate reads from its collaborators
//
// Ingestion owns transactions and committees, the identity pipeline owns
// persons and candidate records, configuration management owns the
// interest-group tables. Everything here is read-only.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::ConnectionPool;
use crate::entities::{CandidateRecord, Committee, CommitteeType, Person, Transaction};
use crate::error::{ConfigError, StoreError};
use crate::registry::InterestGroupConfig;

// ============================================================================
// TRAITS
// ============================================================================

pub trait TransactionStore: Send + Sync {
    /// Every transaction received by (or targeting) the candidate in the cycle
    fn query_transactions(
        &self,
        fec_candidate_id: &str,
        election_year: i32,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Same as `query_transactions` across every cycle on record
    fn query_candidate_history(&self, fec_candidate_id: &str) -> Result<Vec<Transaction>, StoreError>;

    fn query_committee(&self, committee_id: &str) -> Result<Option<Committee>, StoreError>;
}

pub trait IdentityStore: Send + Sync {
    /// All candidate records for the cycle, duplicates included
    fn query_candidate_records(&self, election_year: i32) -> Result<Vec<CandidateRecord>, StoreError>;

    fn query_person(&self, person_id: &str) -> Result<Option<Person>, StoreError>;

    fn query_records_for_person(
        &self,
        person_id: &str,
        election_year: i32,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        Ok(self
            .query_candidate_records(election_year)?
            .into_iter()
            .filter(|r| r.person_id == person_id)
            .collect())
    }

    fn query_records_for_candidate(
        &self,
        fec_candidate_id: &str,
        election_year: i32,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        Ok(self
            .query_candidate_records(election_year)?
            .into_iter()
            .filter(|r| r.fec_candidate_id == fec_candidate_id)
            .collect())
    }
}

pub trait ConfigStore: Send + Sync {
    fn load_interest_group_config(&self) -> Result<InterestGroupConfig, ConfigError>;
}

// ============================================================================
// SQLITE
// ============================================================================

/// All three stores backed by the shared connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<ConnectionPool>,
}

impl SqliteStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        SqliteStore { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

fn record_from_row(row: &Row) -> rusqlite::Result<CandidateRecord> {
    Ok(CandidateRecord {
        person_id: row.get(0)?,
        fec_candidate_id: row.get(1)?,
        election_year: row.get(2)?,
        is_primary: row.get(3)?,
    })
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let date: Option<String> = row.get(4)?;
    Ok(Transaction {
        committee_id: row.get(0)?,
        fec_candidate_id: row.get(1)?,
        transaction_type_code: row.get(2)?,
        amount: row.get(3)?,
        transaction_date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        election_year: row.get(5)?,
    })
}

impl TransactionStore for SqliteStore {
    fn query_transactions(
        &self,
        fec_candidate_id: &str,
        election_year: i32,
    ) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT committee_id, fec_candidate_id, transaction_type_code,
                    amount, transaction_date, election_year
             FROM transactions
             WHERE fec_candidate_id = ?1 AND election_year = ?2
             ORDER BY id",
        )?;

        let rows = stmt.query_map(params![fec_candidate_id, election_year], transaction_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_candidate_history(&self, fec_candidate_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT committee_id, fec_candidate_id, transaction_type_code,
                    amount, transaction_date, election_year
             FROM transactions
             WHERE fec_candidate_id = ?1
             ORDER BY election_year DESC, id",
        )?;
        let rows = stmt.query_map(params![fec_candidate_id], transaction_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_committee(&self, committee_id: &str) -> Result<Option<Committee>, StoreError> {
        let conn = self.pool.checkout()?;
        let committee = conn
            .query_row(
                "SELECT committee_id, name, committee_type, designation
                 FROM committees WHERE committee_id = ?1",
                params![committee_id],
                |row| {
                    let code: String = row.get(2)?;
                    Ok(Committee {
                        committee_id: row.get(0)?,
                        name: row.get(1)?,
                        committee_type: CommitteeType::from_code(&code),
                        designation: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(committee)
    }
}

impl IdentityStore for SqliteStore {
    fn query_candidate_records(&self, election_year: i32) -> Result<Vec<CandidateRecord>, StoreError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT person_id, fec_candidate_id, election_year, is_primary
             FROM candidate_records
             WHERE election_year = ?1
             ORDER BY person_id, fec_candidate_id",
        )?;
        let rows = stmt.query_map(params![election_year], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_person(&self, person_id: &str) -> Result<Option<Person>, StoreError> {
        let conn = self.pool.checkout()?;
        let person = conn
            .query_row(
                "SELECT person_id, display_name, state, current_office, current_district, current_party
                 FROM persons WHERE person_id = ?1",
                params![person_id],
                |row| {
                    Ok(Person {
                        person_id: row.get(0)?,
                        display_name: row.get(1)?,
                        state: row.get(2)?,
                        current_office: row.get(3)?,
                        current_district: row.get(4)?,
                        current_party: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(person)
    }

    fn query_records_for_person(
        &self,
        person_id: &str,
        election_year: i32,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT person_id, fec_candidate_id, election_year, is_primary
             FROM candidate_records
             WHERE person_id = ?1 AND election_year = ?2
             ORDER BY fec_candidate_id",
        )?;
        let rows = stmt.query_map(params![person_id, election_year], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_records_for_candidate(
        &self,
        fec_candidate_id: &str,
        election_year: i32,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let conn = self.pool.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT person_id, fec_candidate_id, election_year, is_primary
             FROM candidate_records
             WHERE fec_candidate_id = ?1 AND election_year = ?2
             ORDER BY person_id",
        )?;
        let rows = stmt.query_map(params![fec_candidate_id, election_year], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl ConfigStore for SqliteStore {
    fn load_interest_group_config(&self) -> Result<InterestGroupConfig, ConfigError> {
        let conn = self.pool.checkout()?;

        let mut stmt = conn
            .prepare("SELECT committee_id FROM cfg_interest_group_committees WHERE is_active = 1")
            .map_err(StoreError::from)?;
        let committee_ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(StoreError::from)?;

        let mut stmt = conn
            .prepare(
                "SELECT keyword FROM cfg_interest_group_keywords
                 WHERE is_active = 1 ORDER BY keyword",
            )
            .map_err(StoreError::from)?;
        let keywords = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(StoreError::from)?;

        Ok(InterestGroupConfig::new(committee_ids, keywords))
    }
}

// ============================================================================
// JSON FILE CONFIG
// ============================================================================

/// Interest-group config read from a JSON file on every load, so editing the
/// file and calling reload picks up the change.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonConfigStore {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigStore for JsonConfigStore {
    fn load_interest_group_config(&self) -> Result<InterestGroupConfig, ConfigError> {
        InterestGroupConfig::from_file(&self.path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;
    use crate::db::{
        insert_candidate_record, insert_committee, insert_interest_group_committee,
        insert_interest_group_keyword, insert_person, insert_transactions,
    };
    use crate::resolver::{CandidateResolver, CanonicalizationPolicy};

    fn seeded_store() -> SqliteStore {
        let pool = Arc::new(temp_pool("store", 2));
        {
            let mut conn = pool.checkout().unwrap();
            insert_person(
                &conn,
                &Person {
                    person_id: "P1".to_string(),
                    display_name: "Jane Doe".to_string(),
                    state: "NY".to_string(),
                    current_office: "H".to_string(),
                    current_district: "10".to_string(),
                    current_party: "DEM".to_string(),
                },
            )
            .unwrap();
            insert_candidate_record(&conn, &CandidateRecord::new("P1", "H4NY10001", 2024)).unwrap();
            insert_candidate_record(&conn, &CandidateRecord::new("P1", "S4NY00002", 2024)).unwrap();
            insert_candidate_record(&conn, &CandidateRecord::new("P2", "H4CA00003", 2024)).unwrap();
            insert_candidate_record(&conn, &CandidateRecord::new("P1", "H2NY10001", 2022)).unwrap();
            insert_committee(
                &conn,
                &Committee::new("C00797670", "AIPAC PAC", CommitteeType::Pac).with_designation("B"),
            )
            .unwrap();
            insert_transactions(
                &mut conn,
                &[
                    Transaction::new("C00797670", "H4NY10001", "24E", 15_000.0, 2024)
                        .with_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
                    Transaction::new("C00797670", "H4NY10001", "24K", 5_000.0, 2022),
                ],
            )
            .unwrap();
            insert_interest_group_committee(&conn, "C00797670", "AIPAC PAC").unwrap();
            insert_interest_group_keyword(&conn, "NORPAC", "direct").unwrap();
            conn.execute(
                "INSERT INTO cfg_interest_group_keywords (keyword, category, is_active)
                 VALUES ('RETIRED', 'old', 0)",
                [],
            )
            .unwrap();
        }
        SqliteStore::new(pool)
    }

    #[test]
    fn test_query_transactions_filters_year() {
        let store = seeded_store();

        let txs = store.query_transactions("H4NY10001", 2024).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].transaction_type_code, "24E");
        assert_eq!(txs[0].amount, 15_000.0);
        assert_eq!(txs[0].transaction_date, NaiveDate::from_ymd_opt(2024, 3, 1));

        assert!(store.query_transactions("H4NY10001", 2020).unwrap().is_empty());
    }

    #[test]
    fn test_candidate_history_spans_cycles() {
        let store = seeded_store();

        let years: Vec<i32> = store
            .query_candidate_history("H4NY10001")
            .unwrap()
            .iter()
            .map(|t| t.election_year)
            .collect();
        assert_eq!(years, vec![2024, 2022]);
        assert!(store.query_candidate_history("H4CA00003").unwrap().is_empty());
    }

    #[test]
    fn test_holds_office_from_person_row() {
        let store = Arc::new(seeded_store());
        let resolver = CandidateResolver::new(store, CanonicalizationPolicy::Strict);

        assert!(resolver.holds_office("P1").unwrap());
        // No persons row
        assert!(!resolver.holds_office("P2").unwrap());
    }

    #[test]
    fn test_query_committee() {
        let store = seeded_store();

        let committee = store.query_committee("C00797670").unwrap().unwrap();
        assert_eq!(committee.name, "AIPAC PAC");
        assert_eq!(committee.committee_type, CommitteeType::Pac);
        assert_eq!(committee.designation, "B");

        assert!(store.query_committee("C99999999").unwrap().is_none());
    }

    #[test]
    fn test_identity_queries() {
        let store = seeded_store();

        assert_eq!(store.query_candidate_records(2024).unwrap().len(), 3);

        let mine = store.query_records_for_person("P1", 2024).unwrap();
        let ids: Vec<&str> = mine.iter().map(|r| r.fec_candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["H4NY10001", "S4NY00002"]);

        let owners = store.query_records_for_candidate("H4CA00003", 2024).unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].person_id, "P2");

        let person = store.query_person("P1").unwrap().unwrap();
        assert_eq!(person.display_name, "Jane Doe");
        assert!(store.query_person("P404").unwrap().is_none());
    }

    #[test]
    fn test_config_only_active_rows() {
        let store = seeded_store();
        let config = store.load_interest_group_config().unwrap();

        assert!(config.committee_ids.contains("C00797670"));
        assert_eq!(config.keywords, vec!["NORPAC".to_string()]);
    }

    #[test]
    fn test_json_config_store() {
        let path = std::env::temp_dir().join(format!("ig-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "committee_ids": ["C1"], "keywords": ["AIPAC"] }"#).unwrap();

        let store = JsonConfigStore::new(&path);
        let config = store.load_interest_group_config().unwrap();
        assert!(config.committee_ids.contains("C1"));

        let missing = JsonConfigStore::new(path.with_extension("missing"));
        assert!(matches!(
            missing.load_interest_group_config(),
            Err(ConfigError::Io { .. })
        ));
    }
}
