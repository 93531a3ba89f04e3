// 🚨 Error Taxonomy
// One enum per failure domain so callers can tell "ambiguous identity" from
// "store down" from "cache write failed" without string matching.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// STORE ERRORS
// ============================================================================

/// Failures talking to the relational store (transactions, identities, config).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection could not be obtained or the database was busy/locked.
    /// Retryable with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed (bad SQL, constraint, decode). Not retryable.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::SystemIoFailure
                ) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

// ============================================================================
// IDENTITY RESOLUTION ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ResolveError {
    /// More than one person claims the same FEC candidate id in one cycle.
    #[error(
        "ambiguous mapping: {fec_candidate_id} ({election_year}) is claimed by {person_ids:?}"
    )]
    AmbiguousMapping {
        fec_candidate_id: String,
        election_year: i32,
        person_ids: Vec<String>,
    },

    #[error("no person is linked to {fec_candidate_id} in {election_year}")]
    UnknownCandidate {
        fec_candidate_id: String,
        election_year: i32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Store(e) if e.is_retryable())
    }
}

// ============================================================================
// CACHE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache read failed: {0}")]
    Read(#[source] rusqlite::Error),

    /// Upsert failed (constraint violation, serialization conflict).
    #[error("cache write failed for {person_id}: {source}")]
    Write {
        person_id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("corrupt cache row for {person_id}: {detail}")]
    Corrupt { person_id: String, detail: String },

    #[error("cache export failed: {0}")]
    Export(#[from] csv::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// JOB / SERVICE ERRORS
// ============================================================================

/// Errors that abort a whole population run. Per-candidate failures never
/// surface here; they are recorded in the job summary instead.
#[derive(Debug, Error)]
pub enum JobError {
    /// A run against an empty interest group matches nothing and would
    /// overwrite every cached score with zero.
    #[error("interest-group registry is empty; refusing to run population")]
    EmptyRegistry,

    #[error("failed to load roster: {0}")]
    Roster(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another lookup for the same person was recomputing and failed
    #[error("recompute of {person_id} failed: {reason}")]
    RecomputeFailed { person_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_and_locked_are_retryable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );

        assert!(StoreError::from(busy).is_retryable());
        assert!(StoreError::from(locked).is_retryable());
    }

    #[test]
    fn test_query_errors_are_not_retryable() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(!err.is_retryable());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        assert!(!StoreError::from(constraint).is_retryable());
    }

    #[test]
    fn test_resolve_error_retryability_follows_store() {
        let ambiguous = ResolveError::AmbiguousMapping {
            fec_candidate_id: "H4NY00001".to_string(),
            election_year: 2024,
            person_ids: vec!["P1".to_string(), "P2".to_string()],
        };
        assert!(!ambiguous.is_retryable());

        let down = ResolveError::Store(StoreError::Unavailable("down".to_string()));
        assert!(down.is_retryable());
    }
}
