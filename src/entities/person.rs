// 👤 Person + CandidateRecord - Identity across election cycles
//
// "person_id is IDENTITY (never changes), fec_candidate_id is a VALUE per cycle"
//
// A person can run under several FEC candidate ids (House then Senate, or a
// re-registration). The reverse must not happen: within one election year an
// FEC candidate id belongs to exactly one person.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub display_name: String,
    pub state: String,

    /// H, S or P
    pub current_office: String,
    pub current_district: String,
    pub current_party: String,
}

/// One (person, FEC candidate id, election year) link from the identity store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub person_id: String,
    pub fec_candidate_id: String,
    pub election_year: i32,

    /// Set by the identity pipeline on the record that owns a disputed id
    #[serde(default)]
    pub is_primary: bool,
}

impl CandidateRecord {
    pub fn new(person_id: &str, fec_candidate_id: &str, election_year: i32) -> Self {
        CandidateRecord {
            person_id: person_id.to_string(),
            fec_candidate_id: fec_candidate_id.to_string(),
            election_year,
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}
