// 🏷️ Interest-Group Registry - Which committees belong to the group
// Explicit FEC committee ids plus case-insensitive name keywords, compiled
// once into a single regex so per-row matching is one automaton pass.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::entities::Committee;
use crate::error::ConfigError;
use crate::store::ConfigStore;

// ============================================================================
// CONFIG (as loaded from the configuration store)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestGroupConfig {
    /// Allow-listed FEC committee ids
    #[serde(default)]
    pub committee_ids: BTreeSet<String>,

    /// Name substrings, matched case-insensitively
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl InterestGroupConfig {
    pub fn new<I, J, S, T>(committee_ids: I, keywords: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        InterestGroupConfig {
            committee_ids: committee_ids.into_iter().map(Into::into).collect(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Load from a JSON file: `{ "committee_ids": [...], "keywords": [...] }`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn is_empty(&self) -> bool {
        self.normalized_ids().is_empty() && self.normalized_keywords().is_empty()
    }

    /// SHA-256 over the normalized allow-list and keyword set. Two configs
    /// that match exactly the same committees share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for id in self.normalized_ids() {
            hasher.update(b"id:");
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        for keyword in self.normalized_keywords() {
            hasher.update(b"kw:");
            hasher.update(keyword.to_lowercase().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    fn normalized_ids(&self) -> BTreeSet<String> {
        self.committee_ids
            .iter()
            .map(|id| normalize_committee_id(id))
            .filter(|id| !id.is_empty())
            .collect()
    }

    fn normalized_keywords(&self) -> BTreeSet<String> {
        self.keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

fn normalize_committee_id(id: &str) -> String {
    id.trim().to_uppercase()
}

// ============================================================================
// MATCH REASON
// ============================================================================

/// Why a committee was counted as part of the interest group (for audit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    AllowList,
    Keyword(String),
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct InterestGroupRegistry {
    committee_ids: HashSet<String>,
    keywords: Vec<String>,
    pattern: Option<Regex>,
    fingerprint: String,
}

impl InterestGroupRegistry {
    pub fn from_config(config: &InterestGroupConfig) -> Result<Self, ConfigError> {
        let committee_ids: HashSet<String> = config.normalized_ids().into_iter().collect();
        let keywords: Vec<String> = config.normalized_keywords().into_iter().collect();

        let pattern = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            let compiled = RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::Invalid(format!("keyword pattern: {}", e)))?;
            Some(compiled)
        };

        Ok(InterestGroupRegistry {
            committee_ids,
            keywords,
            pattern,
            fingerprint: config.fingerprint(),
        })
    }

    /// True if the committee is allow-listed or its name contains a keyword
    pub fn matches(&self, committee: &Committee) -> bool {
        self.explain(committee).is_some()
    }

    /// Like `matches`, but says which rule fired
    pub fn explain(&self, committee: &Committee) -> Option<MatchReason> {
        if self
            .committee_ids
            .contains(&normalize_committee_id(&committee.committee_id))
        {
            return Some(MatchReason::AllowList);
        }

        let pattern = self.pattern.as_ref()?;
        let found = pattern.find(&committee.name)?;
        let matched = found.as_str().to_lowercase();
        let keyword = self
            .keywords
            .iter()
            .find(|k| k.to_lowercase() == matched)
            .cloned()
            .unwrap_or_else(|| found.as_str().to_string());

        debug!(
            committee_id = %committee.committee_id,
            committee_name = %committee.name,
            keyword = %keyword,
            "committee matched by keyword"
        );
        Some(MatchReason::Keyword(keyword))
    }

    pub fn is_empty(&self) -> bool {
        self.committee_ids.is_empty() && self.keywords.is_empty()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn committee_count(&self) -> usize {
        self.committee_ids.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }
}

// ============================================================================
// HOT-RELOADABLE HANDLE
// ============================================================================

/// Shared registry that can be swapped while readers hold snapshots.
/// A computation takes one `snapshot()` and uses it throughout, so a reload
/// never mixes two configurations inside one score.
pub struct RegistryHandle {
    current: RwLock<Arc<InterestGroupRegistry>>,
}

impl RegistryHandle {
    pub fn new(registry: InterestGroupRegistry) -> Self {
        RegistryHandle {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn from_store(store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        let config = store.load_interest_group_config()?;
        Ok(RegistryHandle::new(InterestGroupRegistry::from_config(&config)?))
    }

    pub fn snapshot(&self) -> Arc<InterestGroupRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, registry: InterestGroupRegistry) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(registry);
    }

    /// Reload from the configuration store. The old registry stays active if
    /// loading or compiling fails.
    pub fn reload(&self, store: &dyn ConfigStore) -> Result<Arc<InterestGroupRegistry>, ConfigError> {
        let config = store.load_interest_group_config()?;
        let registry = InterestGroupRegistry::from_config(&config)?;

        info!(
            committees = registry.committee_count(),
            keywords = registry.keyword_count(),
            fingerprint = %registry.fingerprint(),
            "interest-group registry reloaded"
        );

        self.replace(registry);
        Ok(self.snapshot())
    }
}
