//! Collaborator traits consumed by the exploration engine
//!
//! The engine talks to the outside world through these seams only. All
//! implementations must be thread-safe (Send + Sync); calls are blocking,
//! network-bound operations from the engine's point of view.

use delve_budget::{BudgetGuard, UsageLedger};
use delve_core::{
    AnswerDraft, CompletenessCheck, PlannerAction, PlannerContext, PlannerError, QueryOutcome,
    ResultSummary,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Query-execution collaborator.
///
/// Must be read-only at the storage layer; the safety gate in front of it
/// is a second line of defense, not the only one. SQL-level failures (bad
/// table name, permission denial) travel in [`QueryOutcome::error`] so
/// they can be recorded and shown to the planner; this call itself never
/// fails.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, sql: &str, database: &str) -> QueryOutcome;
}

/// Translation/planning collaborator, backed by a language model.
///
/// Implementations must route every call through the token budget guard
/// first (see [`BudgetedPlanner`] for the admission wrapper) and surface
/// exhaustion as [`PlannerError::BudgetExhausted`] so the engine can
/// degrade instead of retrying.
pub trait Planner: Send + Sync {
    /// Choose the next step given the accumulated context.
    fn decide_next_action(&self, context: &PlannerContext)
        -> Result<PlannerAction, PlannerError>;

    /// The narrower post-query question: is this now answerable completely?
    fn check_completeness(
        &self,
        context: &PlannerContext,
    ) -> Result<CompletenessCheck, PlannerError>;

    /// Synthesize an answer from combined result sets (pattern replay).
    fn synthesize_answer(
        &self,
        question: &str,
        results: &[ResultSummary],
    ) -> Result<AnswerDraft, PlannerError>;
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cooperative cancellation signal, checked between iterations and before
/// each query execution. Mid-query cancellation of the underlying database
/// call is the query-execution collaborator's responsibility.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// BUDGET ADMISSION WRAPPER
// ============================================================================

/// Planner decorator that gates every call on the token budget guard.
///
/// Admission uses the rough size estimate of the serialized context; a
/// rejected call becomes [`PlannerError::BudgetExhausted`] carrying the
/// guard's reason verbatim (naming the ceiling and its reset time).
/// Post-call accounting stays with the inner planner, which sees the
/// provider-reported token counts; tracking is never speculative.
pub struct BudgetedPlanner<P, L>
where
    P: Planner,
    L: UsageLedger,
{
    inner: P,
    guard: Arc<BudgetGuard<L>>,
}

impl<P, L> BudgetedPlanner<P, L>
where
    P: Planner,
    L: UsageLedger,
{
    pub fn new(inner: P, guard: Arc<BudgetGuard<L>>) -> Self {
        Self { inner, guard }
    }

    fn admit(&self, payload: &str) -> Result<(), PlannerError> {
        let estimate = BudgetGuard::<L>::estimate_tokens(payload);
        let decision = self.guard.check_limits(estimate);
        if decision.allowed {
            Ok(())
        } else {
            Err(PlannerError::BudgetExhausted {
                reason: decision
                    .reason
                    .unwrap_or_else(|| "token budget exhausted".to_string()),
            })
        }
    }
}

impl<P, L> Planner for BudgetedPlanner<P, L>
where
    P: Planner,
    L: UsageLedger,
{
    fn decide_next_action(
        &self,
        context: &PlannerContext,
    ) -> Result<PlannerAction, PlannerError> {
        let payload = serde_json::to_string(context).unwrap_or_default();
        self.admit(&payload)?;
        self.inner.decide_next_action(context)
    }

    fn check_completeness(
        &self,
        context: &PlannerContext,
    ) -> Result<CompletenessCheck, PlannerError> {
        let payload = serde_json::to_string(context).unwrap_or_default();
        self.admit(&payload)?;
        self.inner.check_completeness(context)
    }

    fn synthesize_answer(
        &self,
        question: &str,
        results: &[ResultSummary],
    ) -> Result<AnswerDraft, PlannerError> {
        let payload = format!(
            "{question}{}",
            serde_json::to_string(results).unwrap_or_default()
        );
        self.admit(&payload)?;
        self.inner.synthesize_answer(question, results)
    }
}
