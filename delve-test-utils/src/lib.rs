//! DELVE Test Utilities
//!
//! Centralized test infrastructure for the DELVE workspace:
//! - Proptest generators for entity types and SQL inputs
//! - Scripted mocks re-exported from their source crates
//! - Test fixtures for common exploration scenarios

// Re-export the scripted mocks from their source crates
pub use delve_budget::MemoryLedger;
pub use delve_engine::mock::{row, ScriptedExecutor, ScriptedPlanner};
pub use delve_patterns::MockPatternStore;

// Re-export the safety gate so scenario tests can assert on verdicts
pub use delve_safety::{bound, validate, SafetyVerdict};

// Re-export core types for convenience
pub use delve_core::{
    compute_content_hash, new_session_id, AnswerDraft, BudgetConfig, ColumnInfo,
    CompletenessCheck, DelveError, DelveResult, ExplorationResult, ExplorationSession,
    ExploreOptions, ExplorerConfig, PlannerAction, PlannerContext, QueryExecutionRecord,
    QueryOutcome, ResultSummary, Row, SchemaHash, SessionId, TableInfo, Timestamp,
};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    // === Identity Type Generators ===

    pub fn arb_session_id() -> impl Strategy<Value = SessionId> {
        any::<u128>().prop_map(uuid::Uuid::from_u128)
    }

    pub fn arb_schema_hash() -> impl Strategy<Value = SchemaHash> {
        "[0-9a-f]{64}".prop_map(SchemaHash::new)
    }

    // === SQL Generators ===

    /// Reserved words the identifier generator must never emit whole:
    /// the deny list, the row-bounding triggers, and the query verbs.
    const RESERVED: &[&str] = &[
        "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant", "revoke",
        "exec", "execute", "merge", "bulk", "backup", "restore", "shutdown", "reconfigure",
        "into", "top", "count", "select", "from", "with", "show", "describe",
    ];

    /// Identifiers that never collide with reserved or bounding keywords.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_]{0,20}".prop_filter("avoid keyword collisions", |s| {
            !RESERVED.contains(&s.to_lowercase().as_str())
        })
    }

    /// SQL the safety gate must accept.
    pub fn arb_safe_sql() -> impl Strategy<Value = String> {
        (arb_identifier(), arb_identifier())
            .prop_map(|(table, column)| format!("SELECT {column} FROM {table}"))
    }

    /// SQL the safety gate must reject.
    pub fn arb_unsafe_sql() -> impl Strategy<Value = String> {
        let verbs = prop_oneof![
            Just("DROP TABLE"),
            Just("DELETE FROM"),
            Just("UPDATE"),
            Just("TRUNCATE TABLE"),
            Just("ALTER TABLE"),
        ];
        (verbs, arb_identifier()).prop_map(|(verb, table)| format!("{verb} {table}"))
    }

    // === Struct Generators ===

    pub fn arb_column_info() -> impl Strategy<Value = ColumnInfo> {
        (arb_identifier(), prop_oneof![
            Just("int".to_string()),
            Just("nvarchar".to_string()),
            Just("datetime".to_string()),
            Just("decimal".to_string()),
        ], any::<bool>())
            .prop_map(|(name, data_type, is_nullable)| ColumnInfo {
                name,
                data_type,
                is_nullable,
            })
    }

    pub fn arb_query_outcome() -> impl Strategy<Value = QueryOutcome> {
        (arb_safe_sql(), 0i64..1000, 0.0f64..5000.0, any::<bool>()).prop_map(
            |(query, row_count, execution_time_ms, failed)| QueryOutcome {
                query,
                rows: Vec::new(),
                row_count: if failed { 0 } else { row_count },
                execution_time_ms,
                error: failed.then(|| "invalid object name".to_string()),
            },
        )
    }

    /// A session with some executed history, no answer yet.
    pub fn arb_session_in_progress() -> impl Strategy<Value = ExplorationSession> {
        (
            "[a-z ]{5,40}",
            arb_identifier(),
            proptest::collection::vec((arb_query_outcome(), "[a-z ]{3,30}"), 0..6),
        )
            .prop_map(|(question, database, history)| {
                let mut session = ExplorationSession::new(question, database);
                for (outcome, purpose) in history {
                    session.record_query(outcome, purpose);
                }
                session
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    /// Column metadata for a small retail-style schema.
    pub fn retail_table(columns: &[(&str, &str)]) -> TableInfo {
        TableInfo {
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnInfo {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    is_nullable: true,
                })
                .collect(),
            sample_rows: Vec::new(),
            discovered_at: Utc::now(),
        }
    }

    /// Customers/Orders schema used across workspace tests.
    pub fn retail_schema() -> BTreeMap<String, TableInfo> {
        let mut schema = BTreeMap::new();
        schema.insert(
            "Customers".to_string(),
            retail_table(&[("id", "int"), ("name", "nvarchar"), ("region", "nvarchar")]),
        );
        schema.insert(
            "Orders".to_string(),
            retail_table(&[("id", "int"), ("customer_id", "int"), ("total", "decimal")]),
        );
        schema
    }

    /// Introspection rows matching [`retail_schema`], in the shape returned
    /// by `INFORMATION_SCHEMA.COLUMNS`.
    pub fn retail_introspection_rows() -> Vec<Row> {
        let schema = retail_schema();
        let mut rows = Vec::new();
        for (table, info) in &schema {
            for column in &info.columns {
                rows.push(row(&[
                    ("TABLE_SCHEMA", "dbo"),
                    ("TABLE_NAME", table.as_str()),
                    ("COLUMN_NAME", column.name.as_str()),
                    ("DATA_TYPE", column.data_type.as_str()),
                ]));
            }
        }
        rows
    }

    /// A session that found its answer confidently.
    pub fn answered_session() -> ExplorationSession {
        let mut session = ExplorationSession::new("how many customers do we have", "sales");
        session.discovered_schema = retail_schema();
        session.record_query(
            QueryOutcome {
                query: "SELECT COUNT(*) FROM Customers".to_string(),
                rows: Vec::new(),
                row_count: 1,
                execution_time_ms: 12.0,
                error: None,
            },
            "count customers",
        );
        session.final_answer = Some("There are 42 customers.".to_string());
        session.confidence = 0.9;
        session.iteration_count = 1;
        session
    }
}
