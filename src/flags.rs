use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucketer::{is_simple_flag_enabled, Bucketer};

/// A feature flag definition as returned by the feature flags API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDefinition {
    #[serde(default)]
    pub id: Option<i64>,
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `true` if the flag can be evaluated from its rollout percentage alone. Other flags depend
    /// on server-side filters and are evaluated by the decide endpoint.
    #[serde(default)]
    pub is_simple_flag: bool,
    /// Percentage (0-100) of subjects the flag is enabled for.
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_active() -> bool {
    true
}

impl FlagDefinition {
    /// Evaluate a simple flag locally for `distinct_id`.
    pub fn is_simple_enabled_for(&self, distinct_id: &str, bucketer: &impl Bucketer) -> bool {
        is_simple_flag_enabled(bucketer, &self.key, distinct_id, self.rollout_percentage)
    }

    fn is_live(&self) -> bool {
        self.active && !self.deleted
    }
}

/// `TryParse` allows a single definition to fail parsing without failing the whole listing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

/// Response body of `GET /api/feature_flag/`.
#[derive(Debug, Deserialize)]
pub(crate) struct FlagDefinitionsResponse {
    #[serde(default)]
    pub results: Vec<TryParse<FlagDefinition>>,
}

impl FlagDefinitionsResponse {
    pub fn into_definitions(self) -> Vec<FlagDefinition> {
        self.results
            .into_iter()
            .filter_map(|result| match result {
                TryParse::Parsed(flag) => Some(flag),
                TryParse::ParseFailed(value) => {
                    log::warn!(target: "posthog", definition:serde = value; "skipping malformed feature flag definition");
                    None
                }
            })
            .collect()
    }
}

/// Request body of `POST /decide/`.
#[derive(Debug, Serialize)]
pub(crate) struct DecideRequest<'a> {
    pub api_key: &'a str,
    pub distinct_id: &'a str,
}

/// Response body of `POST /decide/`.
#[derive(Debug, Deserialize)]
pub(crate) struct DecideResponse {
    #[serde(rename = "featureFlags", default)]
    pub feature_flags: Vec<String>,
}

/// An immutable set of flag definitions from one successful refresh.
///
/// Only active, non-deleted definitions are kept.
#[derive(Debug, Clone)]
pub struct FlagSnapshot {
    flags: Vec<FlagDefinition>,
    fetched_at: DateTime<Utc>,
}

impl FlagSnapshot {
    pub fn from_definitions(definitions: Vec<FlagDefinition>) -> FlagSnapshot {
        FlagSnapshot {
            flags: definitions.into_iter().filter(FlagDefinition::is_live).collect(),
            fetched_at: Utc::now(),
        }
    }

    /// Find a flag by key. Keys are expected to be unique; the first match wins otherwise.
    pub fn get(&self, key: &str) -> Option<&FlagDefinition> {
        self.flags.iter().find(|flag| flag.key == key)
    }

    pub fn flags(&self) -> &[FlagDefinition] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// When the definitions were fetched.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
