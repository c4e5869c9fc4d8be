//! DELVE Engine - Autonomous Query Exploration
//!
//! The orchestration crate: given a natural-language question and a
//! database name, the engine fingerprints the schema, replays a cached
//! pattern when one matches, and otherwise runs a bounded planner-driven
//! exploration loop with every query passing through the safety gate.
//!
//! The planner, the query executor and the pattern store are injected
//! behind traits; this crate ships scripted mocks for all of them.

pub mod engine;
pub mod explain;
pub mod fingerprint;
pub mod mock;
pub mod traits;

pub use engine::ExplorationEngine;
pub use explain::{
    ContextSummary, Decision, DecisionKind, ExplanationSummary, ExplanationTracker, IterationLog,
};
pub use fingerprint::{fingerprint_rows, schema_fingerprint, SCHEMA_INTROSPECTION_QUERY};
pub use traits::{BudgetedPlanner, CancelToken, Planner, QueryExecutor};
