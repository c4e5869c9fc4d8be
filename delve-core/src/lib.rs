//! DELVE Core - Entity Types
//!
//! Pure data structures shared by every DELVE crate. All other crates
//! depend on this. This crate contains ONLY data types and identity
//! helpers - no business logic.

pub mod action;
pub mod config;
pub mod error;
pub mod session;

pub use action::{AnswerDraft, CompletenessCheck, PlannerAction, PlannerContext};
pub use config::{BudgetConfig, ExplorerConfig};
pub use error::{
    BudgetError, ConfigError, DelveError, DelveResult, ExportError, FingerprintError,
    PatternStoreError, PlannerError,
};
pub use session::{
    ColumnInfo, ExplorationResult, ExplorationSession, ExploreOptions, QueryExecutionRecord,
    QueryOutcome, ResultSummary, TableInfo,
};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Session identifier using UUIDv7 for timestamp-sortable IDs.
pub type SessionId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A single result row, as returned by the query-execution collaborator.
/// Column order is not significant; values are untyped JSON.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// SHA-256 content hash for export identity and schema fingerprints.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 SessionId (timestamp-sortable).
pub fn new_session_id() -> SessionId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encode a content hash.
pub fn hash_to_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}

// ============================================================================
// SCHEMA HASH
// ============================================================================

/// Opaque fingerprint of a database's table/column shape.
///
/// The empty value is the "fingerprint unavailable" sentinel: callers must
/// skip pattern matching on it rather than treating it as a match key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default)]
pub struct SchemaHash(pub String);

impl SchemaHash {
    /// Construct from a hex digest.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// The sentinel returned when introspection fails.
    pub fn unavailable() -> Self {
        Self(String::new())
    }

    /// True when this hash is the "introspection failed" sentinel.
    pub fn is_unavailable(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
