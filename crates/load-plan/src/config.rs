//! Load plan builder configuration
//!
//! Values come from defaults, environment variables or a YAML document.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{LoadPlanError, LoadPlanResult};

pub const ENV_MAX_FETCH_DEPTH: &str = "ELIF_LOAD_PLAN_MAX_FETCH_DEPTH";
pub const ENV_MAX_JOIN_FETCHED_COLLECTIONS: &str = "ELIF_LOAD_PLAN_MAX_JOIN_FETCHED_COLLECTIONS";
pub const ENV_BATCH_FETCH_SIZE: &str = "ELIF_LOAD_PLAN_BATCH_FETCH_SIZE";
pub const ENV_FORCE_FETCH_LAZY: &str = "ELIF_LOAD_PLAN_FORCE_FETCH_LAZY";
pub const ENV_ALIAS_STEM_LENGTH: &str = "ELIF_LOAD_PLAN_ALIAS_STEM_LENGTH";

/// Configuration for load plan construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPlanConfig {
    /// Deepest fetch source stack at which a JOIN fetch is still allowed
    pub max_fetch_depth: Option<usize>,
    /// Number of collections that may be join fetched by one plan
    pub max_join_fetched_collections: usize,
    /// Batch size applied to SELECT fetches that have none mapped
    pub default_batch_fetch_size: Option<usize>,
    /// Whether lazy basic attributes are fetched anyway
    pub force_fetch_lazy_attributes: bool,
    /// Characters of an entity or role name used as SQL alias stem
    pub alias_stem_length: usize,
}

impl Default for LoadPlanConfig {
    fn default() -> Self {
        Self {
            max_fetch_depth: None,
            max_join_fetched_collections: 1,
            default_batch_fetch_size: None,
            force_fetch_lazy_attributes: false,
            alias_stem_length: 1,
        }
    }
}

impl LoadPlanConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum fetch depth
    pub fn with_max_fetch_depth(mut self, depth: usize) -> Self {
        self.max_fetch_depth = Some(depth);
        self
    }

    /// Set the number of collections that may be join fetched
    pub fn with_max_join_fetched_collections(mut self, count: usize) -> Self {
        self.max_join_fetched_collections = count;
        self
    }

    /// Set the default batch fetch size
    pub fn with_default_batch_fetch_size(mut self, size: usize) -> Self {
        self.default_batch_fetch_size = Some(size);
        self
    }

    /// Load configuration from environment variables, starting from defaults
    pub fn from_env() -> LoadPlanResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> LoadPlanResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(value) = lookup(ENV_MAX_FETCH_DEPTH) {
            config.max_fetch_depth = Some(parse_usize("max_fetch_depth", &value)?);
        }

        if let Some(value) = lookup(ENV_MAX_JOIN_FETCHED_COLLECTIONS) {
            config.max_join_fetched_collections =
                parse_usize("max_join_fetched_collections", &value)?;
        }

        if let Some(value) = lookup(ENV_BATCH_FETCH_SIZE) {
            config.default_batch_fetch_size = Some(parse_usize("default_batch_fetch_size", &value)?);
        }

        if let Some(value) = lookup(ENV_FORCE_FETCH_LAZY) {
            config.force_fetch_lazy_attributes = value.parse().map_err(|_| {
                LoadPlanError::invalid_value("force_fetch_lazy_attributes", &value, "true or false")
            })?;
        }

        if let Some(value) = lookup(ENV_ALIAS_STEM_LENGTH) {
            config.alias_stem_length = parse_usize("alias_stem_length", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML document; missing keys keep defaults
    pub fn from_yaml_str(yaml: &str) -> LoadPlanResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> LoadPlanResult<()> {
        if self.max_fetch_depth == Some(0) {
            return Err(LoadPlanError::invalid_value(
                "max_fetch_depth",
                "0",
                "a depth of at least 1",
            ));
        }

        if self.default_batch_fetch_size == Some(0) {
            return Err(LoadPlanError::invalid_value(
                "default_batch_fetch_size",
                "0",
                "a batch size of at least 1",
            ));
        }

        if self.alias_stem_length == 0 {
            return Err(LoadPlanError::invalid_value(
                "alias_stem_length",
                "0",
                "a stem length of at least 1",
            ));
        }

        Ok(())
    }
}

fn parse_usize(field: &str, value: &str) -> LoadPlanResult<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| LoadPlanError::invalid_value(field, value, "non-negative integer"))
}
