// End-to-end scenarios against a real SQLite file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pac_alignment::db::{
    insert_candidate_record, insert_committee, insert_interest_group_committee,
    insert_interest_group_keyword, insert_person, insert_transactions,
};
use pac_alignment::{
    AlignmentConfig, AlignmentService, AnomalyKind, CandidateRecord, CandidateResolver,
    CanonicalizationPolicy, Committee, CommitteeType, ConnectionPool, Grade, Person, ResolveError,
    RetryPolicy, ScoreCache, SqliteStore, StoreError, Transaction, TransactionStore,
};

fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pac-scenario-{}-{}.db", label, uuid::Uuid::new_v4()))
}

fn open_pool(label: &str) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::open(&temp_db(label), 4, Duration::from_secs(2)).unwrap())
}

fn test_config() -> AlignmentConfig {
    let mut config = AlignmentConfig::default();
    config.retry = RetryPolicy::immediate(2);
    config
}

/// Allow-listed committee X and keyword-matched committee Y
fn seed_committees(pool: &ConnectionPool) {
    let conn = pool.checkout().unwrap();
    insert_committee(&conn, &Committee::new("C00797670", "Committee X", CommitteeType::Pac)).unwrap();
    insert_committee(
        &conn,
        &Committee::new("C00888888", "UNITED DEMOCRACY PROJECT ('UDP')", CommitteeType::SuperPac),
    )
    .unwrap();
    insert_committee(&conn, &Committee::new("C00999999", "Unrelated PAC", CommitteeType::Pac)).unwrap();
    insert_interest_group_committee(&conn, "C00797670", "allow-listed").unwrap();
    insert_interest_group_keyword(&conn, "United Democracy Project", "super pac").unwrap();
}

fn service_on(pool: &Arc<ConnectionPool>, transactions: Arc<dyn TransactionStore>) -> AlignmentService {
    let store = Arc::new(SqliteStore::new(Arc::clone(pool)));
    let config = test_config();
    let cache = Arc::new(ScoreCache::new(Arc::clone(pool), config.cache.clone()));
    AlignmentService::new(config, transactions, store.clone(), store, cache, pool.capacity()).unwrap()
}

#[test]
fn scenario_a_allow_listed_support() {
    let pool = open_pool("a");
    seed_committees(&pool);
    {
        let mut conn = pool.checkout().unwrap();
        insert_candidate_record(&conn, &CandidateRecord::new("PC", "H4NY00010", 2024)).unwrap();
        insert_transactions(
            &mut conn,
            &[
                Transaction::new("C00797670", "H4NY00010", "24E", 15_000.0, 2024),
                // Not in the interest group
                Transaction::new("C00999999", "H4NY00010", "24E", 500_000.0, 2024),
            ],
        )
        .unwrap();
    }

    let store = Arc::new(SqliteStore::new(Arc::clone(&pool)));
    let service = service_on(&pool, store);

    let view = service.get_score("PC").unwrap().unwrap();
    assert_eq!(view.score, 45.0);
    assert_eq!(view.total_funding, 15_000.0);
    assert_eq!(view.grade, Grade::C);
    assert_eq!(view.humanity_score, 0);

    let entry = service.cache().get("PC").unwrap().unwrap();
    assert_eq!(entry.support_total, 15_000.0);
    assert_eq!(entry.oppose_total, 0.0);
    assert_eq!(entry.matched_committee_count, 1);
}

#[test]
fn scenario_b_keyword_matched_opposition() {
    let pool = open_pool("b");
    seed_committees(&pool);
    {
        let mut conn = pool.checkout().unwrap();
        insert_candidate_record(&conn, &CandidateRecord::new("PD", "H4MO00001", 2024)).unwrap();
        insert_transactions(
            &mut conn,
            &[Transaction::new("C00888888", "H4MO00001", "24A", 60_000.0, 2024)],
        )
        .unwrap();
    }

    let store = Arc::new(SqliteStore::new(Arc::clone(&pool)));
    let service = service_on(&pool, store);

    let view = service.get_score("PD").unwrap().unwrap();
    assert_eq!(view.score, 0.0);
    assert_eq!(view.total_funding, 60_000.0);
    assert_eq!(view.grade, Grade::F);

    let entry = service.cache().get("PD").unwrap().unwrap();
    assert_eq!(entry.oppose_total, 60_000.0);
}

#[test]
fn scenario_c_conflicting_identities() {
    let pool = open_pool("c");
    {
        let conn = pool.checkout().unwrap();
        for record in [
            CandidateRecord::new("E", "H4TX00001", 2024),
            CandidateRecord::new("E", "S4TX00002", 2024),
            CandidateRecord::new("E2", "H4TX00001", 2024),
            CandidateRecord::new("E3", "S4TX00002", 2024),
        ] {
            insert_candidate_record(&conn, &record).unwrap();
        }
    }

    let store = Arc::new(SqliteStore::new(Arc::clone(&pool)));
    let resolver = CandidateResolver::new(store.clone(), CanonicalizationPolicy::Strict);

    match resolver.resolve("E", 2024) {
        Err(ResolveError::AmbiguousMapping { person_ids, .. }) => {
            assert!(person_ids.contains(&"E".to_string()));
            assert_eq!(person_ids.len(), 2);
        }
        other => panic!("expected AmbiguousMapping, got {:?}", other),
    }

    // Never summed: the service refuses to produce a score for E
    seed_committees(&pool);
    let service = service_on(&pool, store);
    assert!(service.get_score("E").is_err());

    let summary = service.run_population().unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.skipped_ambiguous, 3);
    assert_eq!(summary.anomalies_of(AnomalyKind::AmbiguousMapping).count(), 3);
}

/// Connection error on every read for one candidate
struct BrokenCandidateStore {
    inner: SqliteStore,
    broken: String,
}

impl TransactionStore for BrokenCandidateStore {
    fn query_transactions(
        &self,
        fec_candidate_id: &str,
        election_year: i32,
    ) -> Result<Vec<Transaction>, StoreError> {
        if fec_candidate_id == self.broken {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.query_transactions(fec_candidate_id, election_year)
    }

    fn query_candidate_history(&self, fec_candidate_id: &str) -> Result<Vec<Transaction>, StoreError> {
        self.inner.query_candidate_history(fec_candidate_id)
    }

    fn query_committee(&self, committee_id: &str) -> Result<Option<Committee>, StoreError> {
        self.inner.query_committee(committee_id)
    }
}

#[test]
fn scenario_d_partial_failure() {
    let pool = open_pool("d");
    seed_committees(&pool);
    {
        let mut conn = pool.checkout().unwrap();
        for (person, fec) in [("P1", "H4CA00001"), ("P2", "H4CA00002"), ("P3", "H4CA00003")] {
            insert_candidate_record(&conn, &CandidateRecord::new(person, fec, 2024)).unwrap();
        }
        insert_transactions(
            &mut conn,
            &[
                Transaction::new("C00797670", "H4CA00001", "24E", 10_000.0, 2024),
                Transaction::new("C00797670", "H4CA00002", "24E", 10_000.0, 2024),
                Transaction::new("C00797670", "H4CA00003", "24E", 5_000.0, 2024),
            ],
        )
        .unwrap();
    }

    let broken = Arc::new(BrokenCandidateStore {
        inner: SqliteStore::new(Arc::clone(&pool)),
        broken: "H4CA00002".to_string(),
    });
    let service = service_on(&pool, broken);

    let summary = service.run_population().unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.anomalies_of(AnomalyKind::ComputeFailed).count(), 1);

    let cache = service.cache();
    assert_eq!(cache.get("P1").unwrap().unwrap().score, 30.0);
    assert_eq!(cache.get("P3").unwrap().unwrap().score, 15.0);
    assert!(cache.get("P2").unwrap().is_none());

    let coverage = service.get_coverage().unwrap();
    assert_eq!(coverage.cached_count, 2);
    assert_eq!(coverage.expected_count, 3);
}

#[test]
fn scenario_e_humanity_from_earlier_cycles() {
    let pool = open_pool("e");
    seed_committees(&pool);
    {
        let mut conn = pool.checkout().unwrap();
        insert_person(
            &conn,
            &Person {
                person_id: "PF".to_string(),
                display_name: "Office Holder".to_string(),
                state: "OH".to_string(),
                current_office: "H".to_string(),
                current_district: "03".to_string(),
                current_party: "REP".to_string(),
            },
        )
        .unwrap();
        insert_candidate_record(&conn, &CandidateRecord::new("PF", "H0OH03001", 2024)).unwrap();
        insert_transactions(
            &mut conn,
            &[
                Transaction::new("C00797670", "H0OH03001", "24E", 8_000.0, 2020),
                Transaction::new("C00797670", "H0OH03001", "24E", 4_000.0, 2022),
            ],
        )
        .unwrap();
    }

    let store = Arc::new(SqliteStore::new(Arc::clone(&pool)));
    let service = service_on(&pool, store);

    // Nothing in 2024, funded in two earlier cycles while holding office
    let view = service.get_score("PF").unwrap().unwrap();
    assert_eq!(view.score, 0.0);
    assert_eq!(view.grade, Grade::F);
    assert_eq!(view.humanity_score, 1);
    assert_eq!(service.cache().get("PF").unwrap().unwrap().humanity_score, 1);
}
