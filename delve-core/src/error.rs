//! Error types for DELVE operations
//!
//! Recoverable conditions (a safety rejection, a failed query) are data,
//! not errors: they become `QueryExecutionRecord`s and the exploration
//! loop continues. These types cover the collaborator failures that can
//! actually terminate an attempt.

use thiserror::Error;

/// Token budget errors. Ceiling rejections are `BudgetDecision` data, not
/// errors; these cover the persistence seam.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Failed to load usage ledger: {reason}")]
    LedgerLoadFailed { reason: String },

    #[error("Failed to persist usage ledger: {reason}")]
    LedgerSaveFailed { reason: String },
}

/// Translation/planning collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("Planner unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Invalid planner response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Token budget exhausted: {reason}")]
    BudgetExhausted { reason: String },
}

/// Pattern store collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternStoreError {
    #[error("Pattern store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Malformed pattern store response: {reason}")]
    MalformedResponse { reason: String },
}

/// Schema fingerprint errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Schema introspection failed: {reason}")]
    IntrospectionFailed { reason: String },
}

/// Export and export-validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("Export not found: {export_id}")]
    NotFound { export_id: String },

    #[error("Export sink I/O failed: {reason}")]
    SinkIo { reason: String },

    #[error("Export serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Top-level error enum wrapping all DELVE error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DelveError {
    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    PatternStore(#[from] PatternStoreError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for DELVE operations.
pub type DelveResult<T> = Result<T, DelveError>;
