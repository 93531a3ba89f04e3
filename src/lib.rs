// PAC Alignment Scoring Engine - Core Library
// Exposes all modules for use in the CLI and tests

pub mod entities;   // Person, CandidateRecord, Committee, Transaction
pub mod error;      // Typed errors per failure domain
pub mod config;     // Policy constants, env overrides, retry
pub mod db;         // SQLite schema + connection pool
pub mod store;      // Collaborator interfaces + SQLite implementation
pub mod registry;   // Interest-Group Registry
pub mod classifier; // Transaction Classifier
pub mod resolver;   // Candidate Identity Resolver
pub mod aggregator; // Score Aggregator
pub mod cache;      // Score Cache
pub mod job;        // Population Job
pub mod service;    // Facade for the presentation layer

// Re-export commonly used types
pub use entities::{CandidateRecord, Committee, CommitteeType, Person, Transaction};
pub use error::{CacheError, ConfigError, JobError, ResolveError, ServiceError, StoreError};
pub use config::{AlignmentConfig, CacheConfig, JobConfig, RetryPolicy, ScoringPolicy, TieBreak};
pub use db::{setup_database, ConnectionPool, PooledConnection};
pub use store::{ConfigStore, IdentityStore, JsonConfigStore, SqliteStore, TransactionStore};
pub use registry::{InterestGroupConfig, InterestGroupRegistry, MatchReason, RegistryHandle};
pub use classifier::{Classification, ClassifierCodes, Direction, TransactionClassifier};
pub use resolver::{
    AmbiguousMapping, CandidateResolver, CanonicalizationPolicy, Roster, RosterEntry, SkippedPerson,
};
pub use aggregator::{humanity_score, score_from_totals, ScoreAggregator, ScoreBreakdown, MAX_HUMANITY_SCORE};
pub use cache::{CacheStats, Coverage, Grade, ScoreCache, ScoreCacheEntry};
pub use job::{AnomalyKind, CancellationToken, JobAnomaly, JobSummary, PopulationJob};
pub use service::{AlignmentService, ScoreView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
