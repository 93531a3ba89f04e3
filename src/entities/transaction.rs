// 💸 Transaction - One contribution or expenditure touching a candidate
//
// Immutable once ingested. Amounts are signed: a negative direct contribution
// is a refund/correction and counts against the candidate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Paying committee
    pub committee_id: String,

    /// Receiving (or targeted) candidate
    pub fec_candidate_id: String,

    /// FEC transaction type, e.g. "24E" (independent expenditure for)
    pub transaction_type_code: String,

    /// Signed dollar amount
    pub amount: f64,

    pub transaction_date: Option<NaiveDate>,

    pub election_year: i32,
}

impl Transaction {
    pub fn new(
        committee_id: &str,
        fec_candidate_id: &str,
        transaction_type_code: &str,
        amount: f64,
        election_year: i32,
    ) -> Self {
        Transaction {
            committee_id: committee_id.to_string(),
            fec_candidate_id: fec_candidate_id.to_string(),
            transaction_type_code: transaction_type_code.to_string(),
            amount,
            transaction_date: None,
            election_year,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.transaction_date = Some(date);
        self
    }
}
