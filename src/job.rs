// 🏭 Population Job - Score every resolvable person and upsert the cache
//
// One run:
//   registry snapshot -> roster -> N workers (read, compute, upsert) -> coverage
//
// Per-person failures are logged and recorded; the run itself only fails when
// it cannot start (empty registry, roster unreadable) or cannot measure
// coverage at the end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::ScoreAggregator;
use crate::cache::{Coverage, ScoreCache, ScoreCacheEntry};
use crate::config::AlignmentConfig;
use crate::error::{JobError, StoreError};
use crate::registry::InterestGroupRegistry;
use crate::resolver::{CandidateResolver, RosterEntry};

/// Coverage below this is logged as a warning
pub const COVERAGE_WARNING_PERCENT: f64 = 90.0;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Stops dispatch of new persons; work already started is finished
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Person not scored: an FEC id is claimed by several persons
    AmbiguousMapping,

    /// Conflict settled by the canonicalization policy; person was scored
    CanonicalizedMapping,

    /// Store kept failing while computing
    ComputeFailed,

    /// Cache upsert failed twice
    WriteFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAnomaly {
    pub person_id: String,
    pub kind: AnomalyKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub run_id: Uuid,
    pub election_year: i32,

    /// Persons dispatched to a worker plus persons skipped as ambiguous
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped_ambiguous: usize,
    pub failed: usize,
    pub coverage: Coverage,
    pub anomalies: Vec<JobAnomaly>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn anomalies_of(&self, kind: AnomalyKind) -> impl Iterator<Item = &JobAnomaly> {
        self.anomalies.iter().filter(move |a| a.kind == kind)
    }
}

enum Outcome {
    Succeeded,
    Failed(JobAnomaly),
}

// ============================================================================
// JOB
// ============================================================================

pub struct PopulationJob {
    resolver: Arc<CandidateResolver>,
    aggregator: Arc<ScoreAggregator>,
    cache: Arc<ScoreCache>,
    config: AlignmentConfig,
    pool_capacity: usize,
}

impl PopulationJob {
    pub fn new(
        resolver: Arc<CandidateResolver>,
        aggregator: Arc<ScoreAggregator>,
        cache: Arc<ScoreCache>,
        config: AlignmentConfig,
        pool_capacity: usize,
    ) -> Self {
        PopulationJob {
            resolver,
            aggregator,
            cache,
            config,
            pool_capacity,
        }
    }

    pub fn run_full(&self) -> Result<JobSummary, JobError> {
        self.run(&CancellationToken::new())
    }

    pub fn run(&self, token: &CancellationToken) -> Result<JobSummary, JobError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let year = self.config.election_year;

        // One registry for the whole run, even if it is reloaded meanwhile
        let registry = self.aggregator.registry().snapshot();
        if registry.is_empty() {
            error!(%run_id, "interest-group registry is empty");
            return Err(JobError::EmptyRegistry);
        }

        let roster = self
            .config
            .retry
            .run("load roster", || self.resolver.roster(year))?;

        let workers = self.config.effective_workers(self.pool_capacity);
        info!(
            %run_id,
            election_year = year,
            persons = roster.entries.len(),
            skipped = roster.skipped.len(),
            workers,
            fingerprint = %registry.fingerprint(),
            "population run started"
        );

        let mut anomalies: Vec<JobAnomaly> = roster
            .skipped
            .iter()
            .map(|s| JobAnomaly {
                person_id: s.person_id.clone(),
                kind: AnomalyKind::AmbiguousMapping,
                detail: s.mapping.to_error().to_string(),
            })
            .collect();
        for mapping in roster.ambiguities.iter().filter(|m| m.is_resolved()) {
            anomalies.push(JobAnomaly {
                person_id: mapping.canonical_person_id.clone().unwrap_or_default(),
                kind: AnomalyKind::CanonicalizedMapping,
                detail: format!(
                    "{} ({}) claimed by {:?}",
                    mapping.fec_candidate_id, mapping.election_year, mapping.person_ids
                ),
            });
        }

        let next = AtomicUsize::new(0);
        let dispatched = AtomicUsize::new(0);
        let outcomes: Mutex<Vec<Outcome>> = Mutex::new(Vec::with_capacity(roster.entries.len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(entry) = roster.entries.get(index) else {
                        break;
                    };
                    dispatched.fetch_add(1, Ordering::SeqCst);

                    let outcome = self.process(entry, &registry);
                    outcomes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(outcome);
                });
            }
        });

        let mut succeeded = 0;
        let mut failed = 0;
        for outcome in outcomes.into_inner().unwrap_or_else(PoisonError::into_inner) {
            match outcome {
                Outcome::Succeeded => succeeded += 1,
                Outcome::Failed(anomaly) => {
                    failed += 1;
                    anomalies.push(anomaly);
                }
            }
        }

        let dispatched = dispatched.load(Ordering::SeqCst);
        let cancelled = token.is_cancelled() && dispatched < roster.entries.len();

        let expected = self
            .config
            .expected_population
            .unwrap_or_else(|| roster.population());
        let coverage = self.cache.coverage(expected)?;

        let summary = JobSummary {
            run_id,
            election_year: year,
            attempted: dispatched + roster.skipped.len(),
            succeeded,
            skipped_ambiguous: roster.skipped.len(),
            failed,
            coverage,
            anomalies,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            attempted = summary.attempted,
            succeeded,
            skipped_ambiguous = summary.skipped_ambiguous,
            failed,
            cancelled,
            coverage_percent = coverage.coverage_percent,
            "population run finished"
        );
        if coverage.coverage_percent < COVERAGE_WARNING_PERCENT {
            warn!(
                %run_id,
                cached = coverage.cached_count,
                expected = coverage.expected_count,
                coverage_percent = coverage.coverage_percent,
                "cache coverage below {}%",
                COVERAGE_WARNING_PERCENT
            );
        }

        Ok(summary)
    }

    fn process(&self, entry: &RosterEntry, registry: &InterestGroupRegistry) -> Outcome {
        let person_id = entry.person_id.as_str();
        let failed = |kind: AnomalyKind, detail: String| {
            Outcome::Failed(JobAnomaly {
                person_id: person_id.to_string(),
                kind,
                detail,
            })
        };

        let holds_office = match self
            .config
            .retry
            .run("load person", || self.resolver.holds_office(person_id))
        {
            Ok(holds_office) => holds_office,
            Err(err) => {
                warn!(person_id, error = %err, "person lookup failed");
                return failed(AnomalyKind::ComputeFailed, err.to_string());
            }
        };

        let entry_for = |label: &str| -> Result<ScoreCacheEntry, StoreError> {
            let breakdown = self.config.retry.run(label, || {
                self.aggregator.compute_person_score_with(
                    registry,
                    &entry.fec_candidate_ids,
                    entry.election_year,
                    holds_office,
                )
            })?;
            Ok(ScoreCacheEntry::from_breakdown(person_id, &breakdown, Utc::now()))
        };

        let first = match entry_for("compute score") {
            Ok(e) => e,
            Err(err) => {
                warn!(person_id, error = %err, "score computation failed");
                return failed(AnomalyKind::ComputeFailed, err.to_string());
            }
        };

        match self.cache.put_or_recompute(first, || entry_for("recompute score")) {
            Ok(stored) => {
                debug!(person_id, score = stored.score, "person scored");
                Outcome::Succeeded
            }
            Err(err) => {
                error!(person_id, error = %err, "cache write failed twice");
                failed(AnomalyKind::WriteFailed, err.to_string())
            }
        }
    }
}
