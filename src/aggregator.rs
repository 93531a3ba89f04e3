// 🧮 Score Aggregator - Matched PAC money -> bounded alignment score
//
// Pipeline per candidate:
//   transactions -> payer matches registry? -> classify -> support/oppose totals
//   -> dominant side -> scaled, capped score (or 0 under heavy opposition)
//
// The humanity score (0-5) comes from the candidate's history: which cycles
// carried matched money at all.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{Direction, TransactionClassifier};
use crate::config::{ScoringPolicy, TieBreak};
use crate::entities::Committee;
use crate::error::StoreError;
use crate::registry::{InterestGroupRegistry, MatchReason, RegistryHandle};
use crate::store::TransactionStore;

/// Upper bound of every score
pub const MAX_SCORE: f64 = 100.0;

/// Humanity score of a person with no matched money anywhere
pub const MAX_HUMANITY_SCORE: u8 = 5;

// ============================================================================
// SCORING RULE (pure)
// ============================================================================

/// Score for the given totals.
///
/// The dominant side is whichever total is larger (ties per `tie_break`).
/// Support-dominant money scales linearly up to the cap; oppose-dominant
/// money above the override threshold forces zero.
pub fn score_from_totals(support_total: f64, oppose_total: f64, policy: &ScoringPolicy) -> f64 {
    let support_dominant = support_total > oppose_total
        || (support_total == oppose_total && policy.tie_break == TieBreak::FavorSupport);
    let dominant = support_total.max(oppose_total);

    if !(dominant > 0.0) {
        return 0.0;
    }

    if !support_dominant && dominant > policy.oppose_override_threshold {
        return 0.0;
    }

    let raw = (dominant / policy.scaling_unit * policy.points_per_unit).min(policy.score_cap);
    raw.clamp(0.0, MAX_SCORE)
}

/// Humanity score from funding history, 0 (worst) to 5 (best).
///
/// Caps, lowest wins:
/// - funded in any cycle: 4
/// - funded in exactly one cycle while holding office: 3
/// - funded in several cycles: 2, or 1 while holding office
/// - funded in the scored cycle: 0
///
/// With no funded cycle but matched money in the scored one (only negative
/// amounts, for instance) the grade band of `alignment_score` decides.
pub fn humanity_score(
    funded_years: &BTreeSet<i32>,
    election_year: i32,
    holds_office: bool,
    alignment_score: f64,
    total_funding: f64,
) -> u8 {
    let mut humanity = MAX_HUMANITY_SCORE;

    if !funded_years.is_empty() {
        humanity = humanity.min(4);
        if holds_office && funded_years.len() == 1 {
            humanity = humanity.min(3);
        }
        if funded_years.len() > 1 {
            humanity = humanity.min(if holds_office { 1 } else { 2 });
        }
        if funded_years.contains(&election_year) {
            humanity = 0;
        }
    }

    if humanity == MAX_HUMANITY_SCORE && total_funding > 0.0 {
        humanity = if alignment_score >= 80.0 {
            0
        } else if alignment_score >= 60.0 {
            1
        } else if alignment_score >= 40.0 {
            2
        } else if alignment_score > 0.0 {
            3
        } else {
            MAX_HUMANITY_SCORE
        };
    }

    humanity
}

// ============================================================================
// BREAKDOWN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub election_year: i32,
    pub fec_candidate_ids: BTreeSet<String>,
    pub support_total: f64,
    pub oppose_total: f64,
    pub score: f64,

    /// support_total + oppose_total
    pub total_funding: f64,

    /// Distinct paying committees that matched the registry
    pub matched_committee_count: usize,

    /// Matched transactions with a non-zero amount
    pub matched_transaction_count: usize,

    /// Cycles, scored one included, with positive matched money
    pub funded_years: BTreeSet<i32>,

    pub humanity_score: u8,

    /// Registry fingerprint the score was computed under
    pub config_fingerprint: String,
}

impl ScoreBreakdown {
    pub fn empty(election_year: i32, config_fingerprint: &str) -> Self {
        ScoreBreakdown {
            election_year,
            fec_candidate_ids: BTreeSet::new(),
            support_total: 0.0,
            oppose_total: 0.0,
            score: 0.0,
            total_funding: 0.0,
            matched_committee_count: 0,
            matched_transaction_count: 0,
            funded_years: BTreeSet::new(),
            humanity_score: MAX_HUMANITY_SCORE,
            config_fingerprint: config_fingerprint.to_string(),
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct ScoreAggregator {
    store: Arc<dyn TransactionStore>,
    registry: Arc<RegistryHandle>,
    classifier: TransactionClassifier,
    policy: ScoringPolicy,
}

impl ScoreAggregator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registry: Arc<RegistryHandle>,
        classifier: TransactionClassifier,
        policy: ScoringPolicy,
    ) -> Self {
        ScoreAggregator {
            store,
            registry,
            classifier,
            policy,
        }
    }

    pub fn registry(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score for a single FEC candidate id
    pub fn compute_score(&self, fec_candidate_id: &str, election_year: i32) -> Result<ScoreBreakdown, StoreError> {
        let ids: BTreeSet<String> = std::iter::once(fec_candidate_id.to_string()).collect();
        self.compute_person_score(&ids, election_year, false)
    }

    /// Score for one person: totals merged across every resolved FEC id
    pub fn compute_person_score(
        &self,
        fec_candidate_ids: &BTreeSet<String>,
        election_year: i32,
        holds_office: bool,
    ) -> Result<ScoreBreakdown, StoreError> {
        let registry = self.registry.snapshot();
        self.compute_person_score_with(&registry, fec_candidate_ids, election_year, holds_office)
    }

    /// Same as `compute_person_score` against an explicit registry snapshot
    pub fn compute_person_score_with(
        &self,
        registry: &InterestGroupRegistry,
        fec_candidate_ids: &BTreeSet<String>,
        election_year: i32,
        holds_office: bool,
    ) -> Result<ScoreBreakdown, StoreError> {
        let mut breakdown = ScoreBreakdown::empty(election_year, registry.fingerprint());
        breakdown.fec_candidate_ids = fec_candidate_ids.clone();

        // committee_id -> match result, so each payer is looked up once
        let mut matched: HashMap<String, Option<MatchReason>> = HashMap::new();
        let mut matched_committees: HashSet<String> = HashSet::new();

        for fec_candidate_id in fec_candidate_ids {
            let transactions = self.store.query_transactions(fec_candidate_id, election_year)?;

            for tx in &transactions {
                if !self.payer_matches(registry, &mut matched, &tx.committee_id)? {
                    continue;
                }

                let classification = self.classifier.classify(tx);
                match classification.direction {
                    Direction::Support => breakdown.support_total += classification.magnitude,
                    Direction::Oppose => breakdown.oppose_total += classification.magnitude,
                    Direction::Neutral => continue,
                }
                breakdown.matched_transaction_count += 1;
                matched_committees.insert(tx.committee_id.clone());
            }

            for tx in self.store.query_candidate_history(fec_candidate_id)? {
                if !(tx.amount > 0.0) || breakdown.funded_years.contains(&tx.election_year) {
                    continue;
                }
                if self.classifier.classify(&tx).direction == Direction::Neutral {
                    continue;
                }
                if self.payer_matches(registry, &mut matched, &tx.committee_id)? {
                    breakdown.funded_years.insert(tx.election_year);
                }
            }
        }

        breakdown.matched_committee_count = matched_committees.len();
        breakdown.total_funding = breakdown.support_total + breakdown.oppose_total;
        breakdown.score = score_from_totals(breakdown.support_total, breakdown.oppose_total, &self.policy);
        breakdown.humanity_score = humanity_score(
            &breakdown.funded_years,
            election_year,
            holds_office,
            breakdown.score,
            breakdown.total_funding,
        );

        debug!(
            candidates = ?breakdown.fec_candidate_ids,
            election_year,
            support = breakdown.support_total,
            oppose = breakdown.oppose_total,
            score = breakdown.score,
            humanity = breakdown.humanity_score,
            funded_years = ?breakdown.funded_years,
            matched_committees = breakdown.matched_committee_count,
            "score computed"
        );

        Ok(breakdown)
    }

    fn payer_matches(
        &self,
        registry: &InterestGroupRegistry,
        matched: &mut HashMap<String, Option<MatchReason>>,
        committee_id: &str,
    ) -> Result<bool, StoreError> {
        if let Some(reason) = matched.get(committee_id) {
            return Ok(reason.is_some());
        }

        let committee = self
            .store
            .query_committee(committee_id)?
            .unwrap_or_else(|| Committee::unnamed(committee_id));
        let reason = registry.explain(&committee);
        let is_match = reason.is_some();
        matched.insert(committee_id.to_string(), reason);
        Ok(is_match)
    }
}
