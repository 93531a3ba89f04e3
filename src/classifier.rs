// 🧭 Transaction Classifier - Support, oppose or neither
//
// Raw FEC data mixes two conventions:
// - explicit type codes: independent expenditures are always tagged for/against
// - signed amounts: for ordinary contributions a negative amount is a refund or
//   correction, so it counts in the opposing direction
// Explicit codes win; the sign is only consulted for undifferentiated codes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entities::Transaction;

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Support,
    Oppose,
    /// Zero or unusable amount; excluded from both totals
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub direction: Direction,

    /// Unsigned dollars
    pub magnitude: f64,
}

impl Classification {
    fn neutral() -> Self {
        Classification {
            direction: Direction::Neutral,
            magnitude: 0.0,
        }
    }
}

// ============================================================================
// TYPE CODES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierCodes {
    /// Codes that always count as support
    pub for_codes: BTreeSet<String>,

    /// Codes that always count as opposition
    pub against_codes: BTreeSet<String>,
}

impl Default for ClassifierCodes {
    fn default() -> Self {
        ClassifierCodes {
            // 24E independent expenditure for, 24F communication cost for,
            // 24C coordinated party expenditure
            for_codes: ["24E", "24F", "24C"].iter().map(|s| s.to_string()).collect(),
            // 24A independent expenditure against, 24N communication cost against
            against_codes: ["24A", "24N"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TransactionClassifier {
    codes: ClassifierCodes,
}

impl TransactionClassifier {
    pub fn new(codes: ClassifierCodes) -> Self {
        let normalize = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|c| c.trim().to_uppercase()).collect()
        };
        TransactionClassifier {
            codes: ClassifierCodes {
                for_codes: normalize(&codes.for_codes),
                against_codes: normalize(&codes.against_codes),
            },
        }
    }

    pub fn classify(&self, tx: &Transaction) -> Classification {
        if tx.amount == 0.0 || !tx.amount.is_finite() {
            return Classification::neutral();
        }

        let code = tx.transaction_type_code.trim().to_uppercase();
        let magnitude = tx.amount.abs();

        let direction = if self.codes.for_codes.contains(&code) {
            Direction::Support
        } else if self.codes.against_codes.contains(&code) {
            Direction::Oppose
        } else if tx.amount > 0.0 {
            Direction::Support
        } else {
            Direction::Oppose
        };

        Classification {
            direction,
            magnitude,
        }
    }
}
