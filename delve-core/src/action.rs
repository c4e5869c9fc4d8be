//! Planner decision types
//!
//! The planner's decision is a closed sum type matched exhaustively by the
//! engine, so an "unknown action" can only fail at the planner's own
//! deserialization boundary, never inside the loop.

use crate::ResultSummary;
use serde::{Deserialize, Serialize};

/// Next step chosen by the translation/planning collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerAction {
    /// Run one candidate SQL statement. Must pass the safety gate before
    /// execution; a rejection is a failed step, not an abort.
    Query {
        query: String,
        /// What this query will help determine.
        purpose: String,
        /// What the planner expects to find.
        expected_outcome: String,
        reasoning: String,
    },
    /// The planner can answer now; ends the loop immediately.
    Complete {
        answer: String,
        confidence: f64,
        reasoning: String,
    },
    /// Explore more schema before deciding. Does not count as the
    /// iteration's query execution.
    NeedMoreInfo {
        tables: Vec<String>,
        reasoning: String,
    },
}

impl PlannerAction {
    /// Short label for decision logs.
    pub fn label(&self) -> &'static str {
        match self {
            PlannerAction::Query { .. } => "query",
            PlannerAction::Complete { .. } => "complete",
            PlannerAction::NeedMoreInfo { .. } => "need_more_info",
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            PlannerAction::Query { reasoning, .. }
            | PlannerAction::Complete { reasoning, .. }
            | PlannerAction::NeedMoreInfo { reasoning, .. } => reasoning,
        }
    }
}

/// Answer to the narrower post-query question: "is this now answerable
/// completely?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessCheck {
    pub complete: bool,
    /// The complete answer when `complete`, or what is missing when not.
    pub answer: String,
    pub confidence: f64,
    pub missing_information: Vec<String>,
}

/// Answer synthesized from combined result sets (pattern replay path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerDraft {
    pub answer: String,
    pub confidence: f64,
    pub key_findings: Vec<String>,
}

/// Accumulated context handed to the planner on each decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerContext {
    pub question: String,
    pub database: String,
    pub discovered_tables: Vec<String>,
    pub iteration: u32,
    pub queries_executed: u32,
    /// Summaries of the last few results, oldest first.
    pub recent_results: Vec<ResultSummary>,
}
