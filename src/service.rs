// 🛎️ Alignment Service - What the presentation layer calls
//
// get_score serves the cache when fresh and recomputes otherwise. Lookups for
// different persons never wait on each other; for the same person at most one
// recompute runs at a time:
// - no cached value: followers wait for the leader, then share its outcome
// - stale cached value: followers get the stale value immediately

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::ScoreAggregator;
use crate::cache::{Coverage, Grade, ScoreCache, ScoreCacheEntry};
use crate::classifier::TransactionClassifier;
use crate::config::AlignmentConfig;
use crate::db::ConnectionPool;
use crate::error::{JobError, ServiceError, StoreError};
use crate::job::{JobSummary, PopulationJob};
use crate::registry::RegistryHandle;
use crate::resolver::CandidateResolver;
use crate::store::{ConfigStore, IdentityStore, SqliteStore, TransactionStore};

// ============================================================================
// VIEW
// ============================================================================

/// Score as shown to readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreView {
    pub person_id: String,
    pub score: f64,
    pub total_funding: f64,
    pub grade: Grade,
    pub category: String,

    /// 0 (worst) to 5 (best)
    pub humanity_score: u8,
    pub last_calculated: DateTime<Utc>,
    pub is_stale: bool,
}

impl ScoreView {
    fn from_entry(entry: ScoreCacheEntry, is_stale: bool) -> Self {
        ScoreView {
            category: entry.grade.category().to_string(),
            person_id: entry.person_id,
            score: entry.score,
            total_funding: entry.total_funding,
            grade: entry.grade,
            humanity_score: entry.humanity_score,
            last_calculated: entry.last_calculated,
            is_stale,
        }
    }
}

// ============================================================================
// IN-FLIGHT MARKERS
// ============================================================================

#[derive(Debug, Clone, Default)]
enum FlightState {
    #[default]
    Running,
    Done,
    Failed(String),
}

#[derive(Default)]
struct InFlight {
    state: Mutex<FlightState>,
    finished: Condvar,
}

impl InFlight {
    fn wait(&self) -> FlightState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while matches!(*state, FlightState::Running) {
            state = self
                .finished
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.clone()
    }
}

/// Held by the leader; clears the marker and wakes followers on drop
struct LeaderGuard<'a> {
    markers: &'a Mutex<HashMap<String, Arc<InFlight>>>,
    person_id: String,
    flight: Arc<InFlight>,
    failure: Option<String>,
}

impl LeaderGuard<'_> {
    fn fail(&mut self, err: &ServiceError) {
        self.failure = Some(err.to_string());
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.markers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.person_id);

        let outcome = match self.failure.take() {
            Some(reason) => FlightState::Failed(reason),
            None => FlightState::Done,
        };
        *self.flight.state.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
        self.flight.finished.notify_all();
    }
}

enum Role<'a> {
    Leader(LeaderGuard<'a>),
    Follower(Arc<InFlight>),
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct AlignmentService {
    config: AlignmentConfig,
    config_store: Arc<dyn ConfigStore>,
    registry: Arc<RegistryHandle>,
    resolver: Arc<CandidateResolver>,
    aggregator: Arc<ScoreAggregator>,
    cache: Arc<ScoreCache>,
    job: PopulationJob,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl AlignmentService {
    /// Wire the service from its collaborators. Loads the interest-group
    /// registry from `config_store` once.
    pub fn new(
        config: AlignmentConfig,
        transactions: Arc<dyn TransactionStore>,
        identities: Arc<dyn IdentityStore>,
        config_store: Arc<dyn ConfigStore>,
        cache: Arc<ScoreCache>,
        pool_capacity: usize,
    ) -> Result<Self, ServiceError> {
        let registry = Arc::new(RegistryHandle::from_store(config_store.as_ref())?);
        let snapshot = registry.snapshot();
        info!(
            committees = snapshot.committee_count(),
            keywords = snapshot.keyword_count(),
            fingerprint = %snapshot.fingerprint(),
            "interest-group registry loaded"
        );

        let resolver = Arc::new(CandidateResolver::new(identities, config.canonicalization));
        let aggregator = Arc::new(ScoreAggregator::new(
            transactions,
            Arc::clone(&registry),
            TransactionClassifier::new(config.classifier.clone()),
            config.scoring.clone(),
        ));
        let job = PopulationJob::new(
            Arc::clone(&resolver),
            Arc::clone(&aggregator),
            Arc::clone(&cache),
            config.clone(),
            pool_capacity,
        );

        Ok(AlignmentService {
            config,
            config_store,
            registry,
            resolver,
            aggregator,
            cache,
            job,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Everything on one SQLite file. Interest-group config comes from
    /// `config_store` when given, otherwise from the cfg_* tables.
    pub fn open_sqlite(
        path: &Path,
        config: AlignmentConfig,
        config_store: Option<Arc<dyn ConfigStore>>,
    ) -> anyhow::Result<Self> {
        let pool = Arc::new(
            ConnectionPool::open(
                path,
                config.job.pool_size,
                Duration::from_millis(config.job.checkout_timeout_ms),
            )
            .with_context(|| format!("Failed to open connection pool for {:?}", path))?,
        );

        let store = Arc::new(SqliteStore::new(Arc::clone(&pool)));
        let config_store = config_store.unwrap_or_else(|| store.clone() as Arc<dyn ConfigStore>);
        let cache = Arc::new(ScoreCache::new(Arc::clone(&pool), config.cache.clone()));

        let service = AlignmentService::new(
            config,
            store.clone(),
            store,
            config_store,
            cache,
            pool.capacity(),
        )
        .context("Failed to initialize alignment service")?;
        Ok(service)
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn resolver(&self) -> &CandidateResolver {
        &self.resolver
    }

    /// Cached score for the person, recomputed if missing or stale.
    /// `None` means no score is available (unknown person), never zero.
    pub fn get_score(&self, person_id: &str) -> Result<Option<ScoreView>, ServiceError> {
        let fingerprint = self.registry.snapshot().fingerprint().to_string();
        let cached = self.cache.get(person_id)?;

        if let Some(entry) = &cached {
            if !self.cache.needs_refresh(entry, &fingerprint) {
                return Ok(Some(ScoreView::from_entry(entry.clone(), false)));
            }
        }

        let mut guard = match self.claim(person_id) {
            Role::Leader(guard) => guard,
            Role::Follower(flight) => {
                if let Some(entry) = cached {
                    debug!(person_id, "recompute in flight, serving stale entry");
                    return Ok(Some(ScoreView::from_entry(entry, true)));
                }
                return self.follow(person_id, &flight, &fingerprint);
            }
        };

        let result = self.lead(person_id, &fingerprint);
        if let Err(err) = &result {
            guard.fail(err);
        }
        result
    }

    /// Leader side of `get_score`; runs while this call owns the marker
    fn lead(&self, person_id: &str, fingerprint: &str) -> Result<Option<ScoreView>, ServiceError> {
        // Another leader may have finished between our read and our claim
        let current = self.cache.get(person_id)?;
        if let Some(entry) = &current {
            if !self.cache.needs_refresh(entry, fingerprint) {
                return Ok(Some(ScoreView::from_entry(entry.clone(), false)));
            }
        }

        match self.recompute(person_id) {
            Ok(Some(entry)) => Ok(Some(ScoreView::from_entry(entry, false))),
            Ok(None) => Ok(current.map(|entry| ScoreView::from_entry(entry, true))),
            Err(err) => match current {
                Some(entry) => {
                    warn!(person_id, error = %err, "recompute failed, serving stale entry");
                    Ok(Some(ScoreView::from_entry(entry, true)))
                }
                None => Err(err),
            },
        }
    }

    /// Wait for the leader, then serve what it left in the cache or its failure
    fn follow(
        &self,
        person_id: &str,
        flight: &InFlight,
        fingerprint: &str,
    ) -> Result<Option<ScoreView>, ServiceError> {
        let outcome = flight.wait();

        match (outcome, self.cache.get(person_id)?) {
            (_, Some(entry)) => {
                let is_stale = self.cache.needs_refresh(&entry, fingerprint);
                Ok(Some(ScoreView::from_entry(entry, is_stale)))
            }
            (FlightState::Failed(reason), None) => Err(ServiceError::RecomputeFailed {
                person_id: person_id.to_string(),
                reason,
            }),
            (_, None) => Ok(None),
        }
    }

    fn claim(&self, person_id: &str) -> Role<'_> {
        let mut markers = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = markers.get(person_id) {
            return Role::Follower(Arc::clone(flight));
        }

        let flight = Arc::new(InFlight::default());
        markers.insert(person_id.to_string(), Arc::clone(&flight));
        Role::Leader(LeaderGuard {
            markers: &self.in_flight,
            person_id: person_id.to_string(),
            flight,
            failure: None,
        })
    }

    /// Resolve, compute and store. `None` when the person has no FEC ids.
    fn recompute(&self, person_id: &str) -> Result<Option<ScoreCacheEntry>, ServiceError> {
        let year = self.config.election_year;
        let retry = &self.config.retry;

        let fec_candidate_ids = retry.run("resolve person", || self.resolver.resolve(person_id, year))?;
        if fec_candidate_ids.is_empty() {
            debug!(person_id, election_year = year, "person has no candidate records");
            return Ok(None);
        }

        let holds_office = retry.run("load person", || self.resolver.holds_office(person_id))?;

        let compute = || -> Result<ScoreCacheEntry, StoreError> {
            let breakdown = retry.run("compute score", || {
                self.aggregator
                    .compute_person_score(&fec_candidate_ids, year, holds_office)
            })?;
            Ok(ScoreCacheEntry::from_breakdown(person_id, &breakdown, Utc::now()))
        };
        let entry = self.cache.put_or_recompute(compute()?, compute)?;

        info!(
            person_id,
            score = entry.score,
            grade = %entry.grade,
            humanity = entry.humanity_score,
            "score recomputed"
        );
        Ok(Some(entry))
    }

    /// Drop the cached score so the next lookup recomputes it
    pub fn invalidate(&self, person_id: &str) -> Result<bool, ServiceError> {
        Ok(self.cache.invalidate(person_id)?)
    }

    pub fn run_population(&self) -> Result<JobSummary, JobError> {
        self.job.run_full()
    }

    /// Coverage against the configured population, or the roster size
    pub fn get_coverage(&self) -> Result<Coverage, ServiceError> {
        let expected = match self.config.expected_population {
            Some(expected) => expected,
            None => self
                .config
                .retry
                .run("load roster", || self.resolver.roster(self.config.election_year))?
                .population(),
        };
        Ok(self.cache.coverage(expected)?)
    }

    /// Re-read the interest-group configuration. Cached scores computed under
    /// the previous configuration become stale when fingerprints are tracked.
    pub fn reload_config(&self) -> Result<(), ServiceError> {
        self.registry.reload(self.config_store.as_ref())?;
        Ok(())
    }
}
