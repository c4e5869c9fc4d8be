//! Exploration session entities
//!
//! One `ExplorationSession` per question-answering attempt. The session is
//! owned exclusively by the request handling it, mutated only by the
//! engine, and becomes immutable once an answer is set. Nothing survives
//! across requests except through the pattern store and export artifacts.

use crate::{new_session_id, Row, SessionId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column discovered during exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// What a session knows about one table. Grows monotonically within a
/// session; never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    /// Small sample fetched during schema discovery, for planner context.
    pub sample_rows: Vec<Row>,
    pub discovered_at: Timestamp,
}

impl TableInfo {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            sample_rows: Vec::new(),
            discovered_at: Utc::now(),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl Default for TableInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// One validated SQL statement and its outcome. Immutable once appended to
/// the session's query history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExecutionRecord {
    pub query: String,
    /// Why the query was run, as stated by the planner (or the replayed pattern).
    pub purpose: String,
    pub row_count: i64,
    pub execution_time_ms: f64,
    pub error: Option<String>,
}

impl QueryExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// The query-execution collaborator's full reply, including rows. Held as
/// a transient working set for planner context and answer synthesis; the
/// durable history keeps only `QueryExecutionRecord`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query: String,
    pub rows: Vec<Row>,
    pub row_count: i64,
    pub execution_time_ms: f64,
    pub error: Option<String>,
}

impl QueryOutcome {
    /// Build a failure outcome for a query that never reached execution
    /// (e.g. rejected by the safety gate).
    pub fn rejected(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0.0,
            error: Some(reason.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Compact view of a `QueryOutcome` for planner prompts and explanation
/// logs: query text truncated, at most three sample rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub query: String,
    pub purpose: String,
    pub row_count: i64,
    pub error: Option<String>,
    pub sample_rows: Vec<Row>,
}

impl ResultSummary {
    const QUERY_PREVIEW_CHARS: usize = 100;
    const SAMPLE_ROWS: usize = 3;

    pub fn from_outcome(outcome: &QueryOutcome, purpose: &str) -> Self {
        let query = if outcome.query.chars().count() > Self::QUERY_PREVIEW_CHARS {
            let preview: String = outcome.query.chars().take(Self::QUERY_PREVIEW_CHARS).collect();
            format!("{preview}...")
        } else {
            outcome.query.clone()
        };
        Self {
            query,
            purpose: purpose.to_string(),
            row_count: outcome.row_count,
            error: outcome.error.clone(),
            sample_rows: outcome.rows.iter().take(Self::SAMPLE_ROWS).cloned().collect(),
        }
    }
}

/// One end-to-end attempt to answer a single natural-language question
/// against one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSession {
    pub session_id: SessionId,
    pub question: String,
    pub database: String,
    /// Accumulates as queries reveal structure. Append-only.
    pub discovered_schema: BTreeMap<String, TableInfo>,
    /// Ordered, append-only; the replayable sequence.
    pub query_history: Vec<QueryExecutionRecord>,
    /// Transient working set with full rows, parallel to `query_history`.
    pub query_results: Vec<QueryOutcome>,
    pub iteration_count: u32,
    pub confidence: f64,
    pub final_answer: Option<String>,
    pub using_cached_pattern: bool,
    pub pattern_id: Option<String>,
    pub queries_executed: u32,
    pub total_execution_time_ms: f64,
    pub started_at: Timestamp,
}

impl ExplorationSession {
    pub fn new(question: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            session_id: new_session_id(),
            question: question.into(),
            database: database.into(),
            discovered_schema: BTreeMap::new(),
            query_history: Vec::new(),
            query_results: Vec::new(),
            iteration_count: 0,
            confidence: 0.0,
            final_answer: None,
            using_cached_pattern: false,
            pattern_id: None,
            queries_executed: 0,
            total_execution_time_ms: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Append an executed (or rejected) query. The only way history grows.
    pub fn record_query(&mut self, outcome: QueryOutcome, purpose: impl Into<String>) {
        let purpose = purpose.into();
        self.query_history.push(QueryExecutionRecord {
            query: outcome.query.clone(),
            purpose,
            row_count: outcome.row_count,
            execution_time_ms: outcome.execution_time_ms,
            error: outcome.error.clone(),
        });
        self.total_execution_time_ms += outcome.execution_time_ms;
        self.queries_executed += 1;
        self.query_results.push(outcome);
    }

    /// Summaries of the most recent `n` results, oldest first.
    pub fn recent_result_summaries(&self, n: usize) -> Vec<ResultSummary> {
        let start = self.query_history.len().saturating_sub(n);
        self.query_results[start..]
            .iter()
            .zip(&self.query_history[start..])
            .map(|(outcome, record)| ResultSummary::from_outcome(outcome, &record.purpose))
            .collect()
    }

    pub fn discovered_tables(&self) -> Vec<String> {
        self.discovered_schema.keys().cloned().collect()
    }

    pub fn total_rows(&self) -> i64 {
        self.query_history.iter().map(|q| q.row_count).sum()
    }

    pub fn is_answered(&self) -> bool {
        self.final_answer.is_some()
    }
}

/// Caller-facing options for one exploration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploreOptions {
    pub enable_learning: bool,
    pub enable_explanation: bool,
    pub export_session: bool,
}

impl Default for ExploreOptions {
    fn default() -> Self {
        Self {
            enable_learning: true,
            enable_explanation: true,
            export_session: false,
        }
    }
}

/// Final product of `explore_and_answer`. Always well-formed: collaborator
/// failures degrade confidence, they never surface as errors here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationResult {
    pub session_id: SessionId,
    pub answer: String,
    pub confidence: f64,
    pub iterations_used: u32,
    pub queries_executed: u32,
    pub query_history: Vec<QueryExecutionRecord>,
    pub discovered_tables: Vec<String>,
    pub using_cached_pattern: bool,
    pub pattern_id: Option<String>,
    pub total_execution_time_ms: f64,
    /// Present when explanation tracking was enabled.
    pub explanation: Option<serde_json::Value>,
    /// Present when the session was exported.
    pub export_id: Option<String>,
}
