//! Scripted mock collaborators for testing
//!
//! Deterministic stand-ins for the planner and the query executor, in the
//! same spirit as the mock providers that ship with the LLM traits.

use crate::traits::{Planner, QueryExecutor};
use delve_core::{
    AnswerDraft, CompletenessCheck, PlannerAction, PlannerContext, PlannerError, QueryOutcome,
    ResultSummary, Row,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Build a [`Row`] from string fields.
pub fn row(fields: &[(&str, &str)]) -> Row {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// SCRIPTED PLANNER
// ============================================================================

/// Planner that plays back a queue of actions and completeness checks.
///
/// When the action queue runs dry the fallback action (if any) repeats
/// forever, which is how tests drive the iteration cap. Call counters
/// let tests assert the fast path never consulted the iterative planner.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    actions: Mutex<VecDeque<PlannerAction>>,
    fallback_action: Mutex<Option<PlannerAction>>,
    completions: Mutex<VecDeque<CompletenessCheck>>,
    draft: Mutex<Option<AnswerDraft>>,
    failure: Mutex<Option<PlannerError>>,
    pub decide_calls: AtomicUsize,
    pub completeness_calls: AtomicUsize,
    pub synthesize_calls: AtomicUsize,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A planner whose first decision is `Complete` with the given answer.
    pub fn completing(answer: &str, confidence: f64) -> Self {
        Self::new().then(PlannerAction::Complete {
            answer: answer.to_string(),
            confidence,
            reasoning: "scripted".to_string(),
        })
    }

    /// A planner that proposes the same action forever.
    pub fn repeating(action: PlannerAction) -> Self {
        let planner = Self::new();
        *lock(&planner.fallback_action) = Some(action);
        planner
    }

    /// Queue the next action.
    pub fn then(self, action: PlannerAction) -> Self {
        lock(&self.actions).push_back(action);
        self
    }

    /// Queue the next completeness check. The default when the queue is
    /// empty is "not complete yet".
    pub fn then_completeness(self, check: CompletenessCheck) -> Self {
        lock(&self.completions).push_back(check);
        self
    }

    /// Configure the answer synthesized on the pattern-replay path.
    pub fn with_draft(self, draft: AnswerDraft) -> Self {
        *lock(&self.draft) = Some(draft);
        self
    }

    /// Make every call fail, to exercise collaborator-outage degradation.
    pub fn failing(error: PlannerError) -> Self {
        let planner = Self::new();
        *lock(&planner.failure) = Some(error);
        planner
    }

    fn check_failure(&self) -> Result<(), PlannerError> {
        match lock(&self.failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Planner for ScriptedPlanner {
    fn decide_next_action(
        &self,
        _context: &PlannerContext,
    ) -> Result<PlannerAction, PlannerError> {
        self.decide_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if let Some(action) = lock(&self.actions).pop_front() {
            return Ok(action);
        }
        lock(&self.fallback_action)
            .clone()
            .ok_or_else(|| PlannerError::InvalidResponse {
                reason: "scripted planner exhausted".to_string(),
            })
    }

    fn check_completeness(
        &self,
        _context: &PlannerContext,
    ) -> Result<CompletenessCheck, PlannerError> {
        self.completeness_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(lock(&self.completions)
            .pop_front()
            .unwrap_or(CompletenessCheck {
                complete: false,
                answer: "still gathering evidence".to_string(),
                confidence: 0.3,
                missing_information: vec!["more data".to_string()],
            }))
    }

    fn synthesize_answer(
        &self,
        _question: &str,
        results: &[ResultSummary],
    ) -> Result<AnswerDraft, PlannerError> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(lock(&self.draft).clone().unwrap_or(AnswerDraft {
            answer: format!("synthesized from {} result sets", results.len()),
            confidence: 0.9,
            key_findings: Vec::new(),
        }))
    }
}

// ============================================================================
// SCRIPTED EXECUTOR
// ============================================================================

/// Executor that answers by substring match against the incoming SQL and
/// records everything it was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<Vec<(String, QueryOutcome)>>,
    default_outcome: Mutex<Option<QueryOutcome>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned outcome for any SQL containing `pattern` (first match wins).
    pub fn respond(self, pattern: &str, outcome: QueryOutcome) -> Self {
        lock(&self.responses).push((pattern.to_string(), outcome));
        self
    }

    /// Outcome for SQL matching no pattern. Without one, unmatched SQL
    /// gets an empty success.
    pub fn otherwise(self, outcome: QueryOutcome) -> Self {
        *lock(&self.default_outcome) = Some(outcome);
        self
    }

    /// Everything executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Convenience: a successful outcome with the given rows.
    pub fn ok(rows: Vec<Row>) -> QueryOutcome {
        QueryOutcome {
            query: String::new(),
            row_count: rows.len() as i64,
            rows,
            execution_time_ms: 5.0,
            error: None,
        }
    }

    /// Convenience: an execution failure.
    pub fn err(message: &str) -> QueryOutcome {
        QueryOutcome {
            query: String::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 1.0,
            error: Some(message.to_string()),
        }
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn execute(&self, sql: &str, _database: &str) -> QueryOutcome {
        lock(&self.executed).push(sql.to_string());

        let responses = lock(&self.responses);
        let template = responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .or_else(|| lock(&self.default_outcome).clone())
            .unwrap_or_else(|| Self::ok(Vec::new()));

        QueryOutcome {
            query: sql.to_string(),
            ..template
        }
    }
}
