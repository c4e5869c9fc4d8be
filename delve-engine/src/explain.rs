//! Explanation tracking
//!
//! Append-only decision log kept per exploration session, consumed for
//! audit output and export. Purely in-memory; the engine drives it and
//! the exporter serializes its summary.

use chrono::Utc;
use delve_core::{ExplorationSession, Timestamp};
use serde::{Deserialize, Serialize};

/// Kind of decision point being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Which planner action was chosen for an iteration.
    ActionSelection,
    /// Why a specific query is being run.
    QuerySelection,
    /// A stored pattern was selected for replay.
    PatternReuse,
    /// A complete answer was found.
    Breakthrough,
}

/// One decision point with its reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub reasoning: String,
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
}

/// Snapshot of session state at the start of an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextSummary {
    pub question: String,
    pub tables_discovered: usize,
    pub queries_run: usize,
    pub current_confidence: f64,
}

/// Everything recorded during one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    pub iteration: u32,
    pub timestamp: Timestamp,
    pub context_summary: ContextSummary,
    pub decisions: Vec<Decision>,
    /// Set when the iteration finishes; absent for an interrupted one.
    pub outcome: Option<String>,
}

/// Complete explanation output for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationSummary {
    pub total_iterations: usize,
    pub decision_count: usize,
    pub detailed_reasoning: Vec<IterationLog>,
    /// Reasoning of breakthrough decisions, capped at five.
    pub key_insights: Vec<String>,
}

/// Tracks and explains the reasoning behind each query.
#[derive(Debug, Default)]
pub struct ExplanationTracker {
    completed: Vec<IterationLog>,
    current: Option<IterationLog>,
}

impl ExplanationTracker {
    const MAX_INSIGHTS: usize = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a new iteration, snapshotting the session state.
    pub fn start_iteration(&mut self, iteration: u32, session: &ExplorationSession) {
        self.flush_current();
        self.current = Some(IterationLog {
            iteration,
            timestamp: Utc::now(),
            context_summary: ContextSummary {
                question: session.question.clone(),
                tables_discovered: session.discovered_schema.len(),
                queries_run: session.query_history.len(),
                current_confidence: session.confidence,
            },
            decisions: Vec::new(),
            outcome: None,
        });
    }

    /// Record a decision point. Decisions made outside any iteration (the
    /// pattern-replay fast path) land in an implicit iteration zero.
    pub fn add_decision(
        &mut self,
        kind: DecisionKind,
        reasoning: impl Into<String>,
        details: serde_json::Value,
    ) {
        let entry = self.current.get_or_insert_with(|| IterationLog {
            iteration: 0,
            timestamp: Utc::now(),
            context_summary: ContextSummary::default(),
            decisions: Vec::new(),
            outcome: None,
        });
        entry.decisions.push(Decision {
            kind,
            reasoning: reasoning.into(),
            details,
            timestamp: Utc::now(),
        });
    }

    /// Record why a specific query is about to run.
    pub fn add_query_reasoning(&mut self, query: &str, purpose: &str, expected_outcome: &str) {
        self.add_decision(
            DecisionKind::QuerySelection,
            format!("Running query to {purpose}"),
            serde_json::json!({
                "query": query,
                "purpose": purpose,
                "expected_outcome": expected_outcome,
            }),
        );
    }

    /// Close the current iteration with its outcome.
    pub fn complete_iteration(&mut self, outcome: impl Into<String>) {
        if let Some(mut entry) = self.current.take() {
            entry.outcome = Some(outcome.into());
            self.completed.push(entry);
        }
    }

    /// Full explanation summary, including any still-open iteration.
    pub fn summary(&self) -> ExplanationSummary {
        let mut detailed = self.completed.clone();
        if let Some(current) = &self.current {
            detailed.push(current.clone());
        }

        let decision_count = detailed.iter().map(|e| e.decisions.len()).sum();
        let key_insights = detailed
            .iter()
            .flat_map(|e| &e.decisions)
            .filter(|d| d.kind == DecisionKind::Breakthrough)
            .map(|d| d.reasoning.clone())
            .take(Self::MAX_INSIGHTS)
            .collect();

        ExplanationSummary {
            total_iterations: detailed.len(),
            decision_count,
            detailed_reasoning: detailed,
            key_insights,
        }
    }

    fn flush_current(&mut self) {
        if let Some(entry) = self.current.take() {
            self.completed.push(entry);
        }
    }
}
