//! DELVE Patterns - Pattern Store Client
//!
//! The interface to the external, centralized cache of previously
//! successful (question -> query sequence) mappings, keyed by schema
//! fingerprint plus a text-similarity match. The similarity threshold is
//! the store's policy, not the engine's: the engine replays whatever best
//! match the store returns and only reports performance back. It never
//! deletes or edits a pattern's core fields.
//!
//! The actual network client is user-supplied; `MockPatternStore` here is
//! the reference implementation for tests, in the same spirit as the mock
//! storage that ships with the storage traits.

use delve_core::{PatternStoreError, SchemaHash};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// PATTERN TYPES
// ============================================================================

/// One step of a learned query sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStep {
    /// Why the query was run.
    pub purpose: String,
    pub query: String,
}

/// A previously-learned, reusable mapping from a question shape to a
/// validated query sequence. Owned by the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub question_template: String,
    pub query_sequence: Vec<QueryStep>,
    pub schema_hash: SchemaHash,
    /// The store's confidence in this pattern, in [0, 1].
    pub confidence: f64,
    /// Similarity of the incoming question to the template, in [0, 1].
    pub similarity_score: f64,
    pub use_count: u64,
    pub avg_execution_time_ms: f64,
}

/// Reply to a pattern lookup. Patterns are ordered best-match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PatternMatch {
    pub found: bool,
    pub patterns: Vec<Pattern>,
}

impl PatternMatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<&Pattern> {
        self.patterns.first()
    }
}

/// A successful exploration submitted for learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnRequest {
    pub question: String,
    pub database: String,
    pub query_sequence: Vec<QueryStep>,
    pub discovered_tables: Vec<String>,
    pub execution_time_ms: f64,
    pub confidence: f64,
    pub schema_hash: SchemaHash,
    pub total_rows: i64,
}

// ============================================================================
// PATTERN STORE TRAIT
// ============================================================================

/// Client contract for the centralized pattern store.
/// Implementations must be thread-safe (Send + Sync); the store itself
/// handles concurrent writers.
pub trait PatternStore: Send + Sync {
    /// Find the best stored patterns for `(question, database, schema_hash)`.
    /// An empty match is `Ok(PatternMatch::none())`, not an error.
    fn find_pattern(
        &self,
        question: &str,
        database: &str,
        schema_hash: &SchemaHash,
    ) -> Result<PatternMatch, PatternStoreError>;

    /// Submit a successful query sequence as a new learnable pattern.
    fn learn_pattern(&self, request: &LearnRequest) -> Result<(), PatternStoreError>;

    /// Report a replay outcome so the store's usage statistics improve.
    fn update_pattern_performance(
        &self,
        pattern_id: &str,
        execution_time_ms: f64,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), PatternStoreError>;
}

// ============================================================================
// MOCK PATTERN STORE
// ============================================================================

/// A recorded performance report, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub pattern_id: String,
    pub execution_time_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    matches: Vec<Pattern>,
    learned: Vec<LearnRequest>,
    reports: Vec<PerformanceReport>,
    fail_lookups: bool,
}

/// In-memory pattern store for testing the engine's fast path, learning
/// and performance reporting without a network collaborator.
#[derive(Debug, Default)]
pub struct MockPatternStore {
    state: Mutex<MockState>,
}

impl MockPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the patterns returned by every `find_pattern` call.
    pub fn with_match(self, pattern: Pattern) -> Self {
        self.lock().matches.push(pattern);
        self
    }

    /// Make every lookup fail, to exercise store-outage degradation.
    pub fn with_unavailable_lookups(self) -> Self {
        self.lock().fail_lookups = true;
        self
    }

    pub fn learned(&self) -> Vec<LearnRequest> {
        self.lock().learned.clone()
    }

    pub fn reports(&self) -> Vec<PerformanceReport> {
        self.lock().reports.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl PatternStore for MockPatternStore {
    fn find_pattern(
        &self,
        _question: &str,
        _database: &str,
        schema_hash: &SchemaHash,
    ) -> Result<PatternMatch, PatternStoreError> {
        let state = self.lock();
        if state.fail_lookups {
            return Err(PatternStoreError::Unavailable {
                reason: "mock store offline".to_string(),
            });
        }
        let patterns: Vec<Pattern> = state
            .matches
            .iter()
            .filter(|p| &p.schema_hash == schema_hash)
            .cloned()
            .collect();
        Ok(PatternMatch {
            found: !patterns.is_empty(),
            patterns,
        })
    }

    fn learn_pattern(&self, request: &LearnRequest) -> Result<(), PatternStoreError> {
        self.lock().learned.push(request.clone());
        Ok(())
    }

    fn update_pattern_performance(
        &self,
        pattern_id: &str,
        execution_time_ms: f64,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), PatternStoreError> {
        self.lock().reports.push(PerformanceReport {
            pattern_id: pattern_id.to_string(),
            execution_time_ms,
            success,
            error: error.map(str::to_string),
        });
        Ok(())
    }
}
