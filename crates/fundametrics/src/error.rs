//! Error types for the valuation engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while running the engine.
///
/// Only structural failures are surfaced as errors: a missing source table
/// or a cyclic formula registry aborts the affected entity type. Row-level
/// and metric-level problems (missing inputs, non-positive denominators)
/// surface as nulls in the output, never as errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Required input table absent; fatal for one entity type only.
    #[error("Missing input for {entity_type}: no readable source at {path}")]
    MissingInput {
        /// Entity type whose run is aborted
        entity_type: String,
        /// Path (without extension) that was probed
        path: String,
    },

    /// Cyclic dependency in a formula registry; fatal at load time.
    #[error("Formula registry cycle: {cycle}")]
    ConfigCycle {
        /// The metric names forming the cycle, in order
        cycle: String,
    },

    /// A formula expression failed to parse; fatal at load time.
    #[error("Formula '{name}' failed to parse: {reason}")]
    Parse {
        /// Derived metric whose expression is malformed
        name: String,
        /// What the parser rejected
        reason: String,
    },

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Polars DataFrame error
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// I/O error while reading or writing a dataset
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be deserialized
    #[error("Config deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}
