// 🪪 Candidate Identity Resolver - person_id <-> FEC candidate ids
//
// Invariant: within one election year an FEC candidate id belongs to exactly
// one person. The identity store can violate this (two person rows created for
// the same candidate). Such claims are never summed: they are either
// canonicalized by policy or surfaced as an AmbiguousMapping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entities::CandidateRecord;
use crate::error::ResolveError;
use crate::store::IdentityStore;

// ============================================================================
// POLICY
// ============================================================================

/// Who owns an FEC candidate id claimed by several persons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalizationPolicy {
    /// Nobody: every involved person fails with AmbiguousMapping
    #[default]
    Strict,

    /// The lexicographically lowest person_id
    LowestPersonId,

    /// The single person whose record is flagged primary; strict otherwise
    PrimaryFlag,
}

// ============================================================================
// AMBIGUITY RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousMapping {
    pub fec_candidate_id: String,
    pub election_year: i32,

    /// Every claimant, sorted
    pub person_ids: Vec<String>,

    /// Owner chosen by the policy, if any
    pub canonical_person_id: Option<String>,
}

impl AmbiguousMapping {
    pub fn is_resolved(&self) -> bool {
        self.canonical_person_id.is_some()
    }

    pub fn to_error(&self) -> ResolveError {
        ResolveError::AmbiguousMapping {
            fec_candidate_id: self.fec_candidate_id.clone(),
            election_year: self.election_year,
            person_ids: self.person_ids.clone(),
        }
    }
}

enum Ownership {
    Unique(String),
    Canonical { owner: String, mapping: AmbiguousMapping },
    Ambiguous(AmbiguousMapping),
}

impl Ownership {
    fn owner(&self) -> Option<&str> {
        match self {
            Ownership::Unique(owner) | Ownership::Canonical { owner, .. } => Some(owner),
            Ownership::Ambiguous(_) => None,
        }
    }
}

/// Decide who owns one FEC id given every record claiming it.
/// `claims` must all share the FEC id and year and must not be empty.
fn decide_owner(
    fec_candidate_id: &str,
    election_year: i32,
    claims: &[&CandidateRecord],
    policy: CanonicalizationPolicy,
) -> Ownership {
    let claimants: BTreeSet<&str> = claims.iter().map(|r| r.person_id.as_str()).collect();

    if claims.len() > claimants.len() {
        warn!(
            fec_candidate_id,
            election_year,
            rows = claims.len(),
            persons = claimants.len(),
            "duplicate candidate record rows"
        );
    }

    if claimants.len() == 1 {
        let owner = claimants.iter().next().map(|p| p.to_string()).unwrap_or_default();
        return Ownership::Unique(owner);
    }

    let person_ids: Vec<String> = claimants.iter().map(|p| p.to_string()).collect();

    let owner = match policy {
        CanonicalizationPolicy::Strict => None,
        CanonicalizationPolicy::LowestPersonId => person_ids.first().cloned(),
        CanonicalizationPolicy::PrimaryFlag => {
            let flagged: BTreeSet<&str> = claims
                .iter()
                .filter(|r| r.is_primary)
                .map(|r| r.person_id.as_str())
                .collect();
            if flagged.len() == 1 {
                flagged.iter().next().map(|p| p.to_string())
            } else {
                None
            }
        }
    };

    let mapping = AmbiguousMapping {
        fec_candidate_id: fec_candidate_id.to_string(),
        election_year,
        person_ids,
        canonical_person_id: owner.clone(),
    };

    warn!(
        fec_candidate_id,
        election_year,
        persons = ?mapping.person_ids,
        canonical = ?mapping.canonical_person_id,
        "fec candidate id claimed by several persons"
    );

    match owner {
        Some(owner) => Ownership::Canonical { owner, mapping },
        None => Ownership::Ambiguous(mapping),
    }
}

// ============================================================================
// ROSTER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub person_id: String,
    pub election_year: i32,
    pub fec_candidate_ids: BTreeSet<String>,
}

/// A person left out of the roster because of an identity conflict
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPerson {
    pub person_id: String,
    pub mapping: AmbiguousMapping,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
    pub skipped: Vec<SkippedPerson>,

    /// Every conflict seen, canonicalized or not
    pub ambiguities: Vec<AmbiguousMapping>,
}

impl Roster {
    /// Number of distinct persons known for the cycle
    pub fn population(&self) -> usize {
        self.entries.len() + self.skipped.len()
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct CandidateResolver {
    store: Arc<dyn IdentityStore>,
    policy: CanonicalizationPolicy,
}

impl CandidateResolver {
    pub fn new(store: Arc<dyn IdentityStore>, policy: CanonicalizationPolicy) -> Self {
        CandidateResolver { store, policy }
    }

    pub fn policy(&self) -> CanonicalizationPolicy {
        self.policy
    }

    /// Whether the identity pipeline lists a current office for the person
    pub fn holds_office(&self, person_id: &str) -> Result<bool, ResolveError> {
        Ok(self
            .store
            .query_person(person_id)?
            .map(|p| !p.current_office.trim().is_empty())
            .unwrap_or(false))
    }

    /// FEC candidate ids owned by `person_id` in the cycle.
    ///
    /// An unknown person resolves to the empty set. Fails with
    /// `AmbiguousMapping` if any of the person's ids is contested and the
    /// policy cannot pick an owner.
    pub fn resolve(&self, person_id: &str, election_year: i32) -> Result<BTreeSet<String>, ResolveError> {
        let own = self.store.query_records_for_person(person_id, election_year)?;
        let candidate_ids: BTreeSet<String> =
            own.into_iter().map(|r| r.fec_candidate_id).collect();

        let mut resolved = BTreeSet::new();
        for fec_candidate_id in candidate_ids {
            let claims = self
                .store
                .query_records_for_candidate(&fec_candidate_id, election_year)?;
            let claims: Vec<&CandidateRecord> = claims.iter().collect();

            match decide_owner(&fec_candidate_id, election_year, &claims, self.policy) {
                Ownership::Ambiguous(mapping) => return Err(mapping.to_error()),
                ownership => {
                    if ownership.owner() == Some(person_id) {
                        resolved.insert(fec_candidate_id);
                    } else {
                        debug!(
                            person_id,
                            fec_candidate_id = %fec_candidate_id,
                            "fec candidate id assigned to another person"
                        );
                    }
                }
            }
        }

        Ok(resolved)
    }

    /// Owner of an FEC candidate id in the cycle
    pub fn person_for(&self, fec_candidate_id: &str, election_year: i32) -> Result<String, ResolveError> {
        let claims = self
            .store
            .query_records_for_candidate(fec_candidate_id, election_year)?;

        if claims.is_empty() {
            return Err(ResolveError::UnknownCandidate {
                fec_candidate_id: fec_candidate_id.to_string(),
                election_year,
            });
        }

        let claims: Vec<&CandidateRecord> = claims.iter().collect();
        match decide_owner(fec_candidate_id, election_year, &claims, self.policy) {
            Ownership::Unique(owner) | Ownership::Canonical { owner, .. } => Ok(owner),
            Ownership::Ambiguous(mapping) => Err(mapping.to_error()),
        }
    }

    /// Every person of the cycle with their resolved ids, in one store read
    pub fn roster(&self, election_year: i32) -> Result<Roster, ResolveError> {
        let records = self.store.query_candidate_records(election_year)?;

        let mut by_candidate: BTreeMap<&str, Vec<&CandidateRecord>> = BTreeMap::new();
        let mut persons: BTreeSet<&str> = BTreeSet::new();
        for record in &records {
            by_candidate
                .entry(record.fec_candidate_id.as_str())
                .or_default()
                .push(record);
            persons.insert(record.person_id.as_str());
        }

        let mut owned: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        let mut blocked: BTreeMap<String, AmbiguousMapping> = BTreeMap::new();
        let mut lost: BTreeMap<String, AmbiguousMapping> = BTreeMap::new();
        let mut ambiguities = Vec::new();

        for (fec_candidate_id, claims) in &by_candidate {
            match decide_owner(fec_candidate_id, election_year, claims, self.policy) {
                Ownership::Unique(owner) => {
                    if let Some(p) = persons.get(owner.as_str()) {
                        owned.entry(*p).or_default().insert(fec_candidate_id.to_string());
                    }
                }
                Ownership::Canonical { owner, mapping } => {
                    if let Some(p) = persons.get(owner.as_str()) {
                        owned.entry(*p).or_default().insert(fec_candidate_id.to_string());
                    }
                    for loser in mapping.person_ids.iter().filter(|p| **p != owner) {
                        lost.entry(loser.clone()).or_insert_with(|| mapping.clone());
                    }
                    ambiguities.push(mapping);
                }
                Ownership::Ambiguous(mapping) => {
                    for person_id in &mapping.person_ids {
                        blocked
                            .entry(person_id.clone())
                            .or_insert_with(|| mapping.clone());
                    }
                    ambiguities.push(mapping);
                }
            }
        }

        let mut roster = Roster {
            ambiguities,
            ..Roster::default()
        };

        for person_id in persons {
            if let Some(mapping) = blocked.remove(person_id) {
                roster.skipped.push(SkippedPerson {
                    person_id: person_id.to_string(),
                    mapping,
                });
                continue;
            }

            match owned.remove(person_id) {
                Some(fec_candidate_ids) => roster.entries.push(RosterEntry {
                    person_id: person_id.to_string(),
                    election_year,
                    fec_candidate_ids,
                }),
                // Every id went to another claimant
                None => {
                    if let Some(mapping) = lost.remove(person_id) {
                        roster.skipped.push(SkippedPerson {
                            person_id: person_id.to_string(),
                            mapping,
                        });
                    }
                }
            }
        }

        debug!(
            election_year,
            entries = roster.entries.len(),
            skipped = roster.skipped.len(),
            ambiguities = roster.ambiguities.len(),
            "roster resolved"
        );

        Ok(roster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Person;
    use crate::error::StoreError;

    struct MemoryIdentityStore(Vec<CandidateRecord>);

    impl IdentityStore for MemoryIdentityStore {
        fn query_candidate_records(&self, election_year: i32) -> Result<Vec<CandidateRecord>, StoreError> {
            Ok(self
                .0
                .iter()
                .filter(|r| r.election_year == election_year)
                .cloned()
                .collect())
        }

        fn query_person(&self, _person_id: &str) -> Result<Option<Person>, StoreError> {
            Ok(None)
        }
    }

    fn resolver(records: Vec<CandidateRecord>, policy: CanonicalizationPolicy) -> CandidateResolver {
        CandidateResolver::new(Arc::new(MemoryIdentityStore(records)), policy)
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Person E holds two ids, each also claimed by someone else
    fn conflicted_records() -> Vec<CandidateRecord> {
        vec![
            CandidateRecord::new("E", "H4TX00001", 2024),
            CandidateRecord::new("E", "S4TX00002", 2024),
            CandidateRecord::new("F", "H4TX00001", 2024),
            CandidateRecord::new("G", "S4TX00002", 2024),
            CandidateRecord::new("H", "H4CA00009", 2024),
        ]
    }

    #[test]
    fn test_resolve_unique_ids() {
        let r = resolver(
            vec![
                CandidateRecord::new("P1", "H4NY00001", 2024),
                CandidateRecord::new("P1", "S4NY00002", 2024),
                CandidateRecord::new("P1", "H2NY00001", 2022),
            ],
            CanonicalizationPolicy::Strict,
        );

        assert_eq!(r.resolve("P1", 2024).unwrap(), ids(&["H4NY00001", "S4NY00002"]));
        assert_eq!(r.resolve("P1", 2022).unwrap(), ids(&["H2NY00001"]));
        assert!(r.resolve("nobody", 2024).unwrap().is_empty());
    }

    #[test]
    fn test_strict_reports_every_claimant() {
        let r = resolver(conflicted_records(), CanonicalizationPolicy::Strict);

        match r.resolve("E", 2024) {
            Err(ResolveError::AmbiguousMapping {
                election_year,
                person_ids,
                ..
            }) => {
                assert_eq!(election_year, 2024);
                assert!(person_ids.contains(&"E".to_string()));
                assert_eq!(person_ids.len(), 2);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }

        assert!(matches!(
            r.resolve("F", 2024),
            Err(ResolveError::AmbiguousMapping { .. })
        ));
        assert!(matches!(
            r.person_for("H4TX00001", 2024),
            Err(ResolveError::AmbiguousMapping { .. })
        ));
    }

    #[test]
    fn test_lowest_person_id_policy() {
        let r = resolver(conflicted_records(), CanonicalizationPolicy::LowestPersonId);

        // "E" < "F" and "E" < "G": E keeps both, the others lose theirs
        assert_eq!(r.resolve("E", 2024).unwrap(), ids(&["H4TX00001", "S4TX00002"]));
        assert!(r.resolve("F", 2024).unwrap().is_empty());
        assert_eq!(r.person_for("S4TX00002", 2024).unwrap(), "E");
    }

    #[test]
    fn test_primary_flag_policy() {
        let mut records = vec![
            CandidateRecord::new("P1", "H4NY00001", 2024),
            CandidateRecord::new("P2", "H4NY00001", 2024).primary(),
        ];
        let r = resolver(records.clone(), CanonicalizationPolicy::PrimaryFlag);
        assert_eq!(r.person_for("H4NY00001", 2024).unwrap(), "P2");
        assert!(r.resolve("P1", 2024).unwrap().is_empty());

        // Two primaries: back to strict
        records[0].is_primary = true;
        let r = resolver(records, CanonicalizationPolicy::PrimaryFlag);
        assert!(matches!(
            r.person_for("H4NY00001", 2024),
            Err(ResolveError::AmbiguousMapping { .. })
        ));
    }

    #[test]
    fn test_exact_duplicate_rows_are_not_ambiguous() {
        let r = resolver(
            vec![
                CandidateRecord::new("P1", "H4NY00001", 2024),
                CandidateRecord::new("P1", "H4NY00001", 2024),
            ],
            CanonicalizationPolicy::Strict,
        );

        assert_eq!(r.resolve("P1", 2024).unwrap(), ids(&["H4NY00001"]));
        assert_eq!(r.person_for("H4NY00001", 2024).unwrap(), "P1");
    }

    #[test]
    fn test_person_for_unknown() {
        let r = resolver(vec![], CanonicalizationPolicy::Strict);
        assert!(matches!(
            r.person_for("H4NY00001", 2024),
            Err(ResolveError::UnknownCandidate { .. })
        ));
    }

    #[test]
    fn test_roster_strict_skips_conflicted_persons() {
        let r = resolver(conflicted_records(), CanonicalizationPolicy::Strict);
        let roster = r.roster(2024).unwrap();

        let entries: Vec<&str> = roster.entries.iter().map(|e| e.person_id.as_str()).collect();
        let skipped: Vec<&str> = roster.skipped.iter().map(|s| s.person_id.as_str()).collect();

        assert_eq!(entries, vec!["H"]);
        assert_eq!(skipped, vec!["E", "F", "G"]);
        assert_eq!(roster.ambiguities.len(), 2);
        assert_eq!(roster.population(), 4);
    }

    #[test]
    fn test_roster_canonicalized_records_ambiguity() {
        let r = resolver(conflicted_records(), CanonicalizationPolicy::LowestPersonId);
        let roster = r.roster(2024).unwrap();

        let e = roster.entries.iter().find(|e| e.person_id == "E").unwrap();
        assert_eq!(e.fec_candidate_ids, ids(&["H4TX00001", "S4TX00002"]));
        assert!(roster.ambiguities.iter().all(|m| m.is_resolved()));

        // F and G own nothing; they are reported, not scored as zero
        let skipped: Vec<&str> = roster.skipped.iter().map(|s| s.person_id.as_str()).collect();
        assert_eq!(skipped, vec!["F", "G"]);
    }

    #[test]
    fn test_roster_is_deterministic() {
        let mut records = conflicted_records();
        let a = resolver(records.clone(), CanonicalizationPolicy::LowestPersonId)
            .roster(2024)
            .unwrap();
        records.reverse();
        let b = resolver(records, CanonicalizationPolicy::LowestPersonId)
            .roster(2024)
            .unwrap();

        assert_eq!(a.entries, b.entries);
        assert_eq!(a.skipped, b.skipped);
    }
}
