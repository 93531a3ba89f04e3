// ⚙️ Configuration - Policy constants as data
// Every threshold the scoring and caching code depends on lives here, with
// defaults equal to the historical behavior of the site.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::ClassifierCodes;
use crate::error::{ConfigError, ResolveError, StoreError};
use crate::resolver::CanonicalizationPolicy;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PAC_ALIGNMENT_";

// ============================================================================
// SCORING POLICY
// ============================================================================

/// Which side wins when support and oppose totals are exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    FavorSupport,
    FavorOppose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Dollars per scaling step (default: $10,000)
    pub scaling_unit: f64,

    /// Points awarded per scaling step (default: 30)
    pub points_per_unit: f64,

    /// Ceiling for the dollar-derived score (default: 60)
    pub score_cap: f64,

    /// Opposition spending above this forces the score to zero (default: $50,000)
    pub oppose_override_threshold: f64,

    pub tie_break: TieBreak,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        ScoringPolicy {
            scaling_unit: 10_000.0,
            points_per_unit: 30.0,
            score_cap: 60.0,
            oppose_override_threshold: 50_000.0,
            tie_break: TieBreak::FavorSupport,
        }
    }
}

// ============================================================================
// CACHE / JOB / RETRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are stale (default: 30 days)
    pub stale_after_days: i64,

    /// Treat entries computed under a different interest-group config as stale
    pub track_config_fingerprint: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            stale_after_days: 30,
            track_config_fingerprint: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Requested worker count; capped by the connection pool size
    pub workers: usize,

    /// Number of SQLite connections held by the pool
    pub pool_size: usize,

    /// How long a worker waits for a free connection
    pub checkout_timeout_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            workers: 4,
            pool_size: 4,
            checkout_timeout_ms: 5_000,
        }
    }
}

/// Errors that may succeed if the operation is simply tried again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

impl Retryable for ResolveError {
    fn is_retryable(&self) -> bool {
        ResolveError::is_retryable(self)
    }
}

/// Bounded exponential backoff for store round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests, interactive lookups)
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient store error"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Election cycle scored by population runs and lookups
    pub election_year: i32,

    /// Officeholder population size used for coverage. When absent the
    /// roster size for `election_year` is used.
    pub expected_population: Option<usize>,

    pub scoring: ScoringPolicy,
    pub classifier: ClassifierCodes,
    pub cache: CacheConfig,
    pub job: JobConfig,
    pub retry: RetryPolicy,
    pub canonicalization: CanonicalizationPolicy,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        AlignmentConfig {
            election_year: 2024,
            expected_population: None,
            scoring: ScoringPolicy::default(),
            classifier: ClassifierCodes::default(),
            cache: CacheConfig::default(),
            job: JobConfig::default(),
            retry: RetryPolicy::default(),
            canonicalization: CanonicalizationPolicy::default(),
        }
    }
}

impl AlignmentConfig {
    /// Load config from a JSON file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AlignmentConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PAC_ALIGNMENT_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from any key/value source (keys without prefix)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<i32>(&lookup, "ELECTION_YEAR")? {
            self.election_year = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, "EXPECTED_POPULATION")? {
            self.expected_population = Some(v);
        }
        if let Some(v) = parse_override::<i64>(&lookup, "STALE_DAYS")? {
            self.cache.stale_after_days = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, "WORKERS")? {
            self.job.workers = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, "POOL_SIZE")? {
            self.job.pool_size = v;
        }
        if let Some(v) = parse_override::<u32>(&lookup, "MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        if let Some(v) = parse_override::<f64>(&lookup, "OPPOSE_OVERRIDE_THRESHOLD")? {
            self.scoring.oppose_override_threshold = v;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scoring = &self.scoring;
        if !(scoring.scaling_unit > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "scaling_unit must be positive, got {}",
                scoring.scaling_unit
            )));
        }
        if !(0.0..=100.0).contains(&scoring.score_cap) {
            return Err(ConfigError::Invalid(format!(
                "score_cap must be within 0..=100, got {}",
                scoring.score_cap
            )));
        }
        if scoring.points_per_unit < 0.0 || scoring.oppose_override_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "points_per_unit and oppose_override_threshold must not be negative".to_string(),
            ));
        }
        if self.cache.stale_after_days < 0 {
            return Err(ConfigError::Invalid(format!(
                "stale_after_days must not be negative, got {}",
                self.cache.stale_after_days
            )));
        }
        if self.job.workers == 0 || self.job.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "workers and pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count actually used: never more than the pool can serve
    pub fn effective_workers(&self, pool_capacity: usize) -> usize {
        self.job.workers.min(pool_capacity).max(1)
    }
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>().map_err(|_| {
                ConfigError::Invalid(format!("{}{} has invalid value {:?}", ENV_PREFIX, key, raw))
            })?;
            debug!(key, value = %raw.trim(), "config override applied");
            Ok(Some(parsed))
        }
    }
}
