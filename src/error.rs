//! Error types for the drip engine.

use std::time::Duration;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Campaign state and lifecycle errors.
///
/// `NotFound` and `InvalidTransition` are stale-reference conditions the operator
/// can act on; `Busy` means another dispatch run holds the campaign.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign {id} not found")]
    NotFound { id: Uuid },

    #[error("Campaign {id} is {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Campaign {id} is already being dispatched, retry later")]
    Busy { id: Uuid },

    #[error("Invalid campaign: {0}")]
    Invalid(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Delivery transport errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Provider {provider} rejected message: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("No delivery provider configured")]
    NotConfigured,
}

/// Contact list intake errors (whole-file problems only; per-row issues are findings).
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Contact sheet has no header row")]
    MissingHeader,
}

impl From<csv::Error> for IntakeError {
    fn from(e: csv::Error) -> Self {
        IntakeError::Csv(e.to_string())
    }
}
