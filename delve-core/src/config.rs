//! Configuration types

use serde::{Deserialize, Serialize};

/// Token budget ceilings and cost reporting constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Rolling-day ceiling, keyed by calendar date.
    pub max_daily_tokens: i64,
    /// Rolling-hour ceiling, keyed by date+hour.
    pub max_hourly_tokens: i64,
    /// Per-request ceiling applied to the estimate before a call.
    pub max_tokens_per_request: i64,
    /// Reporting-only cost constant; not an enforcement input.
    pub cost_per_1k_tokens: f64,
}

impl BudgetConfig {
    /// Default ceilings: roughly $1-2/day at GPT-4-class pricing.
    pub fn default_limits() -> Self {
        Self {
            max_daily_tokens: 50_000,
            max_hourly_tokens: 10_000,
            max_tokens_per_request: 2_000,
            cost_per_1k_tokens: 0.03,
        }
    }
}

/// Master configuration for the exploration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Hard cap on slow-path iterations per session.
    pub max_iterations: u32,
    /// Row cap injected by the safety gate's bounding rewrite.
    pub max_result_rows: u32,
    /// Rows fetched when sampling a table during schema discovery.
    pub sample_row_limit: u32,
    /// Max tables explored per `NeedMoreInfo` action.
    pub extra_table_limit: usize,
    /// Minimum confidence before a session is submitted as a learnable pattern.
    pub learn_confidence_threshold: f64,
    /// Confidence reported when the iteration cap is hit without an answer.
    pub exhausted_confidence: f64,
    /// Age in days past which an export validation emits a staleness warning.
    pub export_stale_days: i64,
}

impl ExplorerConfig {
    /// Build the default exploration configuration.
    ///
    /// This centralizes the "sane defaults" so callers embedding the engine
    /// do not hardcode policy at the call site.
    pub fn default_exploration() -> Self {
        Self {
            max_iterations: 10,
            max_result_rows: 10_000,
            sample_row_limit: 5,
            extra_table_limit: 3,
            learn_confidence_threshold: 0.8,
            exhausted_confidence: 0.5,
            export_stale_days: 30,
        }
    }
}
