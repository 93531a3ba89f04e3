// Entity Models
// "Identity persists, values change"
//
// - Person: stable identity, read-only here
// - CandidateRecord: per-cycle link from a person to an FEC candidate id
// - Committee: the payer side of a transaction
// - Transaction: immutable campaign-finance row

pub mod committee;
pub mod person;
pub mod transaction;

pub use committee::{Committee, CommitteeType};
pub use person::{CandidateRecord, Person};
pub use transaction::Transaction;
