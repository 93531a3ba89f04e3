// 🏛️ Committee Entity - PACs, super PACs and campaign committees
//
// "Committee name is a VALUE (can change), committee_id is IDENTITY"
//
// The interest-group registry matches on both: the FEC id for explicitly
// configured committees, the name for keyword matches.

use serde::{Deserialize, Serialize};

// ============================================================================
// COMMITTEE TYPE
// ============================================================================

/// FEC committee type (single-letter code in the committee master file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitteeType {
    /// H - House campaign committee
    House,

    /// S - Senate campaign committee
    Senate,

    /// P - Presidential campaign committee
    Presidential,

    /// N / Q - PAC (nonqualified / qualified)
    Pac,

    /// O - Independent-expenditure-only committee (super PAC)
    SuperPac,

    /// V / W - Hybrid PAC with non-contribution account
    HybridPac,

    /// X / Y - Party committee
    Party,

    /// Anything else, kept verbatim
    Other(String),
}

impl CommitteeType {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "H" => CommitteeType::House,
            "S" => CommitteeType::Senate,
            "P" => CommitteeType::Presidential,
            "N" | "Q" => CommitteeType::Pac,
            "O" => CommitteeType::SuperPac,
            "V" | "W" => CommitteeType::HybridPac,
            "X" | "Y" => CommitteeType::Party,
            other => CommitteeType::Other(other.to_string()),
        }
    }

    /// Code written back to the store
    pub fn code(&self) -> &str {
        match self {
            CommitteeType::House => "H",
            CommitteeType::Senate => "S",
            CommitteeType::Presidential => "P",
            CommitteeType::Pac => "Q",
            CommitteeType::SuperPac => "O",
            CommitteeType::HybridPac => "V",
            CommitteeType::Party => "Y",
            CommitteeType::Other(code) => code,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommitteeType::House => "House",
            CommitteeType::Senate => "Senate",
            CommitteeType::Presidential => "Presidential",
            CommitteeType::Pac => "PAC",
            CommitteeType::SuperPac => "Super PAC",
            CommitteeType::HybridPac => "Hybrid PAC",
            CommitteeType::Party => "Party",
            CommitteeType::Other(_) => "Other",
        }
    }
}

// ============================================================================
// COMMITTEE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    /// FEC committee id, e.g. "C00797670"
    pub committee_id: String,

    pub name: String,

    pub committee_type: CommitteeType,

    /// FEC designation code (A, B, D, J, P, U)
    pub designation: String,
}

impl Committee {
    pub fn new(committee_id: &str, name: &str, committee_type: CommitteeType) -> Self {
        Committee {
            committee_id: committee_id.to_string(),
            name: name.to_string(),
            committee_type,
            designation: String::new(),
        }
    }

    /// Placeholder for a payer missing from the committee master file.
    /// It can still match through the allow-list, never through keywords.
    pub fn unnamed(committee_id: &str) -> Self {
        Committee::new(committee_id, "", CommitteeType::Other(String::new()))
    }

    pub fn with_designation(mut self, designation: &str) -> Self {
        self.designation = designation.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committee_type_codes() {
        assert_eq!(CommitteeType::from_code("o"), CommitteeType::SuperPac);
        assert_eq!(CommitteeType::from_code("Q"), CommitteeType::Pac);
        assert_eq!(CommitteeType::from_code("N"), CommitteeType::Pac);
        assert_eq!(
            CommitteeType::from_code("Z"),
            CommitteeType::Other("Z".to_string())
        );
        assert_eq!(CommitteeType::SuperPac.code(), "O");
        assert_eq!(CommitteeType::Other("Z".to_string()).code(), "Z");
    }

    #[test]
    fn test_unnamed_committee() {
        let c = Committee::unnamed("C00000001");
        assert_eq!(c.committee_id, "C00000001");
        assert!(c.name.is_empty());
    }
}
