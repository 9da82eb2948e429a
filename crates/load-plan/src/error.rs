//! Error types for load plan construction
//!
//! Every failure aborts the whole build. Nothing here is retried because
//! walking, table group resolution and key registration are deterministic
//! functions of the metamodel and the influencers.

use thiserror::Error;

/// Result type alias for load plan operations
pub type LoadPlanResult<T> = Result<T, LoadPlanError>;

/// Error types raised while building a load plan
#[derive(Debug, Error)]
pub enum LoadPlanError {
    /// Stack discipline or callback protocol violation during a walk
    #[error("Walking error: {message}")]
    Walking { message: String },

    /// A second root return was offered to a single-root build
    #[error("Root return already registered as [{existing}]; cannot add [{attempted}]")]
    DuplicateRootReturn { existing: String, attempted: String },

    /// The active strategy cannot build this kind of root
    #[error("This strategy does not support root {kind} returns")]
    UnsupportedRootReturn { kind: String },

    /// A table expression could not be resolved against a qualifier
    #[error("Unable to resolve table reference `{table_expression}` for path `{navigable_path}`")]
    UnknownTableReference {
        table_expression: String,
        navigable_path: String,
    },

    /// No join matched the path given to a prepend
    #[error("No table group join found for path `{navigable_path}`")]
    NoSuchJoin { navigable_path: String },

    /// A fetch strategy that cannot be honoured for an attribute
    #[error("Invalid fetch plan for attribute `{attribute}`: {message}")]
    InvalidFetchPlan { attribute: String, message: String },

    /// The builder reached a state it cannot package into a plan
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// Structural or semantic error in the select tree
    #[error("Semantic error: {message}")]
    Semantic { message: String },

    #[error("Unknown entity `{0}`")]
    UnknownEntity(String),

    #[error("Unknown collection role `{0}`")]
    UnknownCollection(String),

    #[error("Unknown attribute `{attribute}` on `{owner}`")]
    UnknownAttribute { owner: String, attribute: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': got '{value}', expected {expected}")]
    Configuration {
        field: String,
        value: String,
        expected: String,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadPlanError {
    /// Create a walking (protocol) error
    pub fn walking(message: impl Into<String>) -> Self {
        Self::Walking {
            message: message.into(),
        }
    }

    /// Create a semantic error
    pub fn semantic(message: impl Into<String>) -> Self {
        Self::Semantic {
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create an invalid configuration value error
    pub fn invalid_value(field: &str, value: &str, expected: &str) -> Self {
        Self::Configuration {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Returns true for protocol violations (programming errors in the caller)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Walking { .. } | Self::DuplicateRootReturn { .. }
        )
    }
}
