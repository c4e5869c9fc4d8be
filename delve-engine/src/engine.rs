//! The autonomous exploration loop
//!
//! `ExplorationEngine` owns the whole lifecycle of one question: fingerprint
//! the schema, try a cached pattern replay, otherwise iterate with the
//! planner until an answer is found or the iteration cap is hit, then learn
//! and export. Collaborator failures degrade the answer's confidence; they
//! never surface as errors to the caller.

use crate::explain::{DecisionKind, ExplanationTracker};
use crate::fingerprint::schema_fingerprint;
use crate::traits::{CancelToken, Planner, QueryExecutor};
use delve_core::{
    ColumnInfo, ExplorationResult, ExplorationSession, ExploreOptions, ExplorerConfig,
    PlannerAction, PlannerContext, QueryOutcome, Row, SchemaHash, TableInfo,
};
use delve_export::Exporter;
use delve_patterns::{LearnRequest, Pattern, PatternStore, QueryStep};
use std::sync::Arc;

/// How many recent results the planner sees each iteration.
const RECENT_RESULTS_WINDOW: usize = 3;

/// Autonomous query-exploration engine.
///
/// Collaborators are injected behind trait objects; the pattern store and
/// the exporter are optional and their absence simply disables the fast
/// path, learning and export.
pub struct ExplorationEngine {
    config: ExplorerConfig,
    executor: Arc<dyn QueryExecutor>,
    planner: Arc<dyn Planner>,
    pattern_store: Option<Arc<dyn PatternStore>>,
    exporter: Option<Arc<Exporter>>,
}

impl ExplorationEngine {
    pub fn new(executor: Arc<dyn QueryExecutor>, planner: Arc<dyn Planner>) -> Self {
        Self {
            config: ExplorerConfig::default_exploration(),
            executor,
            planner,
            pattern_store: None,
            exporter: None,
        }
    }

    pub fn with_config(mut self, config: ExplorerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pattern_store(mut self, store: Arc<dyn PatternStore>) -> Self {
        self.pattern_store = Some(store);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Answer `question` against `database` by autonomous exploration.
    ///
    /// Always returns a well-formed result: safety rejections and failed
    /// queries become history records, planner and store outages degrade
    /// confidence, and cancellation ends the session with whatever partial
    /// answer exists.
    pub fn explore_and_answer(
        &self,
        question: &str,
        database: &str,
        options: ExploreOptions,
        cancel: &CancelToken,
    ) -> ExplorationResult {
        let mut session = ExplorationSession::new(question, database);
        let mut tracker = options.enable_explanation.then(ExplanationTracker::new);

        tracing::info!(question, database, "exploration started");

        let schema_hash = if options.enable_learning && self.pattern_store.is_some() {
            schema_fingerprint(self.executor.as_ref(), database)
        } else {
            SchemaHash::unavailable()
        };

        if !schema_hash.is_unavailable() {
            if let Some(store) = self.pattern_store.clone() {
                self.try_pattern_replay(
                    &mut session,
                    &mut tracker,
                    store.as_ref(),
                    &schema_hash,
                    cancel,
                );
            }
        }

        if !session.is_answered() {
            self.run_exploration_loop(&mut session, &mut tracker, cancel);
        }

        if !session.is_answered() {
            // Iteration cap reached without a complete answer.
            session.final_answer = Some(format!(
                "I could not find a complete answer to '{}' within the iteration limit. \
                 Explored {} tables across {} queries.",
                session.question,
                session.discovered_schema.len(),
                session.queries_executed,
            ));
            session.confidence = self.config.exhausted_confidence;
            tracing::warn!(
                iterations = session.iteration_count,
                "exploration exhausted without a complete answer"
            );
        }

        if options.enable_learning && !session.using_cached_pattern {
            self.maybe_learn(&session, &schema_hash);
        }

        self.finalize(session, tracker, &options)
    }

    // ------------------------------------------------------------------
    // Fast path: cached pattern replay
    // ------------------------------------------------------------------

    fn try_pattern_replay(
        &self,
        session: &mut ExplorationSession,
        tracker: &mut Option<ExplanationTracker>,
        store: &dyn PatternStore,
        schema_hash: &SchemaHash,
        cancel: &CancelToken,
    ) {
        let found = match store.find_pattern(&session.question, &session.database, schema_hash) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(%error, "pattern lookup failed, falling back to exploration");
                return;
            }
        };
        let Some(pattern) = found.best().cloned() else {
            return;
        };

        tracing::info!(
            pattern_id = %pattern.pattern_id,
            similarity = pattern.similarity_score,
            "replaying cached pattern"
        );
        if let Some(tracker) = tracker {
            tracker.add_decision(
                DecisionKind::PatternReuse,
                format!(
                    "Found cached pattern with {:.0}% similarity",
                    pattern.similarity_score * 100.0
                ),
                serde_json::json!({
                    "pattern_id": pattern.pattern_id,
                    "similarity_score": pattern.similarity_score,
                    "use_count": pattern.use_count,
                }),
            );
        }

        if self.replay_pattern(session, tracker, &pattern, cancel) {
            self.report_performance(store, &pattern, session.total_execution_time_ms, true, None);
        } else {
            self.report_performance(
                store,
                &pattern,
                session.total_execution_time_ms,
                false,
                Some("replay failed against current data"),
            );
        }
    }

    /// Replay every step of `pattern`; on success the answer is synthesized
    /// from the combined results. Returns false on any failure, leaving the
    /// partial results in place for the slow path to build on.
    fn replay_pattern(
        &self,
        session: &mut ExplorationSession,
        tracker: &mut Option<ExplanationTracker>,
        pattern: &Pattern,
        cancel: &CancelToken,
    ) -> bool {
        session.using_cached_pattern = true;
        session.pattern_id = Some(pattern.pattern_id.clone());

        for step in &pattern.query_sequence {
            if cancel.is_cancelled() {
                self.reset_replay_markers(session);
                return false;
            }
            let outcome = self.execute_safe(&session.database, &step.query);
            let failed = !outcome.succeeded();
            self.absorb_outcome(session, outcome, &step.purpose);
            if failed {
                tracing::warn!(pattern_id = %pattern.pattern_id, "pattern replay step failed");
                self.reset_replay_markers(session);
                return false;
            }
        }

        let summaries = session.recent_result_summaries(pattern.query_sequence.len());
        let draft = match self.planner.synthesize_answer(&session.question, &summaries) {
            Ok(draft) => draft,
            Err(error) => {
                tracing::warn!(%error, "answer synthesis failed after replay");
                self.reset_replay_markers(session);
                return false;
            }
        };

        session.final_answer = Some(draft.answer);
        // Compound confidence: synthesis quality times the store's trust
        // in the pattern itself.
        session.confidence = draft.confidence * pattern.confidence;
        session.iteration_count = 1;
        if let Some(tracker) = tracker {
            tracker.add_decision(
                DecisionKind::Breakthrough,
                "Answered from cached pattern replay".to_string(),
                serde_json::json!({ "confidence": session.confidence }),
            );
        }
        true
    }

    fn reset_replay_markers(&self, session: &mut ExplorationSession) {
        session.using_cached_pattern = false;
        session.pattern_id = None;
    }

    fn report_performance(
        &self,
        store: &dyn PatternStore,
        pattern: &Pattern,
        execution_time_ms: f64,
        success: bool,
        error: Option<&str>,
    ) {
        if let Err(report_error) =
            store.update_pattern_performance(&pattern.pattern_id, execution_time_ms, success, error)
        {
            tracing::warn!(%report_error, "failed to report pattern performance");
        }
    }

    // ------------------------------------------------------------------
    // Slow path: the bounded exploration loop
    // ------------------------------------------------------------------

    fn run_exploration_loop(
        &self,
        session: &mut ExplorationSession,
        tracker: &mut Option<ExplanationTracker>,
        cancel: &CancelToken,
    ) {
        while session.iteration_count < self.config.max_iterations {
            if cancel.is_cancelled() {
                self.degrade(session, "exploration was cancelled");
                return;
            }

            session.iteration_count += 1;
            if let Some(tracker) = tracker {
                tracker.start_iteration(session.iteration_count, session);
            }

            let context = self.planner_context(session);
            let action = match self.planner.decide_next_action(&context) {
                Ok(action) => action,
                Err(error) => {
                    tracing::warn!(%error, "planner failed, ending exploration early");
                    self.degrade(session, &error.to_string());
                    return;
                }
            };
            if let Some(tracker) = tracker {
                tracker.add_decision(
                    DecisionKind::ActionSelection,
                    format!("Decided to: {}", action.label()),
                    serde_json::json!({ "reasoning": action.reasoning() }),
                );
            }

            match action {
                PlannerAction::Complete {
                    answer,
                    confidence,
                    reasoning,
                } => {
                    session.final_answer = Some(answer);
                    session.confidence = confidence;
                    if let Some(tracker) = tracker {
                        tracker.add_decision(
                            DecisionKind::Breakthrough,
                            reasoning,
                            serde_json::json!({ "confidence": confidence }),
                        );
                        tracker.complete_iteration("complete");
                    }
                    return;
                }
                PlannerAction::Query {
                    query,
                    purpose,
                    expected_outcome,
                    ..
                } => {
                    if cancel.is_cancelled() {
                        self.degrade(session, "exploration was cancelled");
                        return;
                    }
                    if let Some(tracker) = tracker {
                        tracker.add_query_reasoning(&query, &purpose, &expected_outcome);
                    }
                    let outcome = self.execute_safe(&session.database, &query);
                    self.absorb_outcome(session, outcome, &purpose);

                    if self.answer_is_complete(session, tracker) {
                        return;
                    }
                    if let Some(tracker) = tracker {
                        tracker.complete_iteration("continuing");
                    }
                }
                PlannerAction::NeedMoreInfo { tables, .. } => {
                    self.explore_additional_tables(session, &tables, cancel);
                    if let Some(tracker) = tracker {
                        tracker.complete_iteration("explored additional tables");
                    }
                }
            }
        }
    }

    /// Post-query completeness check. True when the planner declares the
    /// question answered, which ends the loop.
    fn answer_is_complete(
        &self,
        session: &mut ExplorationSession,
        tracker: &mut Option<ExplanationTracker>,
    ) -> bool {
        let context = self.planner_context(session);
        match self.planner.check_completeness(&context) {
            Ok(check) if check.complete => {
                session.final_answer = Some(check.answer);
                session.confidence = check.confidence;
                if let Some(tracker) = tracker {
                    tracker.add_decision(
                        DecisionKind::Breakthrough,
                        "Gathered enough evidence for a complete answer".to_string(),
                        serde_json::json!({ "confidence": check.confidence }),
                    );
                    tracker.complete_iteration("complete");
                }
                true
            }
            Ok(_) => false,
            Err(error) => {
                tracing::warn!(%error, "completeness check failed, ending exploration early");
                self.degrade(session, &error.to_string());
                true
            }
        }
    }

    /// End the session early, keeping whatever partial answer exists and
    /// halving the confidence.
    fn degrade(&self, session: &mut ExplorationSession, reason: &str) {
        if session.final_answer.is_none() {
            session.final_answer = Some(format!(
                "Exploration ended early ({reason}). Partial findings: {} queries across {} \
                 discovered tables.",
                session.queries_executed,
                session.discovered_schema.len(),
            ));
        }
        session.confidence *= 0.5;
    }

    /// Fetch column metadata and a row sample for up to `extra_table_limit`
    /// of the requested tables. Discovery probes feed `discovered_schema`
    /// directly; they are not part of the replayable history.
    fn explore_additional_tables(
        &self,
        session: &mut ExplorationSession,
        tables: &[String],
        cancel: &CancelToken,
    ) {
        for table in tables.iter().take(self.config.extra_table_limit) {
            if cancel.is_cancelled() {
                return;
            }
            if !delve_safety::validate_identifier(table) {
                tracing::warn!(%table, "skipping table with unsafe identifier");
                continue;
            }

            let columns_sql = format!(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_NAME = '{table}'"
            );
            let outcome = self.execute_safe(&session.database, &columns_sql);
            if outcome.succeeded() && !outcome.rows.is_empty() {
                merge_column_rows(session, table, &outcome.rows);
            }

            let sample_sql = format!(
                "SELECT TOP {} * FROM [{table}]",
                self.config.sample_row_limit
            );
            let sample = self.execute_safe(&session.database, &sample_sql);
            if sample.succeeded() {
                let info = session
                    .discovered_schema
                    .entry(table.clone())
                    .or_default();
                info.sample_rows = sample
                    .rows
                    .into_iter()
                    .take(self.config.sample_row_limit as usize)
                    .collect();
            }
        }
    }

    // ------------------------------------------------------------------
    // Query execution
    // ------------------------------------------------------------------

    /// The single guarded execution path: validate, reject as a failed
    /// outcome, or bound and execute.
    fn execute_safe(&self, database: &str, sql: &str) -> QueryOutcome {
        let verdict = delve_safety::validate(sql);
        if !verdict.allowed {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "query rejected".to_string());
            tracing::warn!(sql, %reason, "query rejected by safety gate");
            return QueryOutcome::rejected(sql, reason);
        }
        let bounded = delve_safety::bound_with_cap(sql, self.config.max_result_rows);
        self.executor.execute(&bounded, database)
    }

    /// Record an outcome into history and fold any schema metadata it
    /// carries into the discovered schema.
    fn absorb_outcome(&self, session: &mut ExplorationSession, outcome: QueryOutcome, purpose: &str) {
        if outcome.succeeded() && outcome.query.to_lowercase().contains("information_schema") {
            merge_schema_rows(session, &outcome.rows);
        }
        session.record_query(outcome, purpose);
    }

    fn planner_context(&self, session: &ExplorationSession) -> PlannerContext {
        PlannerContext {
            question: session.question.clone(),
            database: session.database.clone(),
            discovered_tables: session.discovered_tables(),
            iteration: session.iteration_count,
            queries_executed: session.queries_executed,
            recent_results: session.recent_result_summaries(RECENT_RESULTS_WINDOW),
        }
    }

    // ------------------------------------------------------------------
    // Learning and finalization
    // ------------------------------------------------------------------

    /// Submit the session for learning when it ended confidently. Failures
    /// are logged and ignored; learning never affects the result.
    fn maybe_learn(&self, session: &ExplorationSession, schema_hash: &SchemaHash) {
        let Some(store) = &self.pattern_store else {
            return;
        };
        if session.confidence <= self.config.learn_confidence_threshold {
            return;
        }
        if schema_hash.is_unavailable() {
            tracing::debug!("skipping learning: no schema fingerprint to key the pattern on");
            return;
        }
        let query_sequence: Vec<QueryStep> = session
            .query_history
            .iter()
            .filter(|record| record.succeeded())
            .map(|record| QueryStep {
                purpose: record.purpose.clone(),
                query: record.query.clone(),
            })
            .collect();
        if query_sequence.is_empty() {
            return;
        }

        let request = LearnRequest {
            question: session.question.clone(),
            database: session.database.clone(),
            query_sequence,
            discovered_tables: session.discovered_tables(),
            execution_time_ms: session.total_execution_time_ms,
            confidence: session.confidence,
            schema_hash: schema_hash.clone(),
            total_rows: session.total_rows(),
        };
        match store.learn_pattern(&request) {
            Ok(()) => tracing::info!(confidence = session.confidence, "pattern learned"),
            Err(error) => tracing::warn!(%error, "pattern learning failed"),
        }
    }

    fn finalize(
        &self,
        session: ExplorationSession,
        tracker: Option<ExplanationTracker>,
        options: &ExploreOptions,
    ) -> ExplorationResult {
        let explanation = tracker
            .as_ref()
            .and_then(|t| serde_json::to_value(t.summary()).ok());

        let export_id = if options.export_session {
            match &self.exporter {
                Some(exporter) => match exporter.export(&session, explanation.clone()) {
                    Ok(id) => Some(id),
                    Err(error) => {
                        tracing::warn!(%error, "session export failed");
                        None
                    }
                },
                None => {
                    tracing::warn!("export requested but no exporter is configured");
                    None
                }
            }
        } else {
            None
        };

        ExplorationResult {
            session_id: session.session_id,
            answer: session.final_answer.unwrap_or_default(),
            confidence: session.confidence,
            iterations_used: session.iteration_count,
            queries_executed: session.queries_executed,
            query_history: session.query_history,
            discovered_tables: session.discovered_schema.keys().cloned().collect(),
            using_cached_pattern: session.using_cached_pattern,
            pattern_id: session.pattern_id,
            total_execution_time_ms: session.total_execution_time_ms,
            explanation,
            export_id,
        }
    }
}

/// Fold generic information-schema rows into the discovered schema. Rows
/// carrying `TABLE_NAME` create tables; rows that also carry `COLUMN_NAME`
/// add columns, deduplicated by name.
fn merge_schema_rows(session: &mut ExplorationSession, rows: &[Row]) {
    for row in rows {
        let Some(table) = str_field(row, "TABLE_NAME") else {
            continue;
        };
        let info = session
            .discovered_schema
            .entry(table.to_string())
            .or_default();
        if let Some(column) = str_field(row, "COLUMN_NAME") {
            push_column(info, column, row);
        }
    }
}

/// Fold column-details rows (already scoped to one table) into the schema.
fn merge_column_rows(session: &mut ExplorationSession, table: &str, rows: &[Row]) {
    let info = session
        .discovered_schema
        .entry(table.to_string())
        .or_default();
    for row in rows {
        if let Some(column) = str_field(row, "COLUMN_NAME") {
            push_column(info, column, row);
        }
    }
}

fn push_column(info: &mut TableInfo, name: &str, row: &Row) {
    if info.columns.iter().any(|c| c.name == name) {
        return;
    }
    info.columns.push(ColumnInfo {
        name: name.to_string(),
        data_type: str_field(row, "DATA_TYPE").unwrap_or("unknown").to_string(),
        is_nullable: str_field(row, "IS_NULLABLE") == Some("YES"),
    });
}

fn str_field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_rows;
    use crate::mock::{row, ScriptedExecutor, ScriptedPlanner};
    use crate::traits::BudgetedPlanner;
    use delve_budget::{BudgetGuard, MemoryLedger};
    use delve_core::{BudgetConfig, CompletenessCheck};
    use delve_export::{ExportSink, MemoryExportSink};
    use delve_patterns::MockPatternStore;
    use std::sync::atomic::Ordering;

    fn introspection_rows() -> Vec<Row> {
        vec![
            row(&[
                ("TABLE_SCHEMA", "dbo"),
                ("TABLE_NAME", "Customers"),
                ("COLUMN_NAME", "id"),
                ("DATA_TYPE", "int"),
            ]),
            row(&[
                ("TABLE_SCHEMA", "dbo"),
                ("TABLE_NAME", "Customers"),
                ("COLUMN_NAME", "region"),
                ("DATA_TYPE", "nvarchar"),
            ]),
        ]
    }

    fn query_action(query: &str, purpose: &str) -> PlannerAction {
        PlannerAction::Query {
            query: query.to_string(),
            purpose: purpose.to_string(),
            expected_outcome: "rows".to_string(),
            reasoning: "scripted".to_string(),
        }
    }

    fn engine(executor: ScriptedExecutor, planner: ScriptedPlanner) -> ExplorationEngine {
        ExplorationEngine::new(Arc::new(executor), Arc::new(planner))
    }

    #[test]
    fn test_iteration_cap_yields_degraded_answer() {
        let planner = ScriptedPlanner::repeating(query_action(
            "SELECT name FROM Customers",
            "inspect customers",
        ));
        let engine = engine(ScriptedExecutor::new(), planner);

        let result = engine.explore_and_answer(
            "what drives churn",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.iterations_used, 10);
        assert_eq!(result.queries_executed, 10);
        assert_eq!(result.confidence, 0.5);
        assert!(!result.answer.is_empty());
        assert!(result.answer.contains("iteration limit"));
    }

    #[test]
    fn test_pattern_replay_skips_the_iterative_planner() {
        let hash = fingerprint_rows(&introspection_rows());
        let pattern = delve_patterns::Pattern {
            pattern_id: "p1".to_string(),
            question_template: "how many customers".to_string(),
            query_sequence: vec![delve_patterns::QueryStep {
                purpose: "count customers".to_string(),
                query: "SELECT COUNT(*) FROM Customers".to_string(),
            }],
            schema_hash: hash,
            confidence: 0.9,
            similarity_score: 0.85,
            use_count: 3,
            avg_execution_time_ms: 40.0,
        };
        let store = Arc::new(MockPatternStore::new().with_match(pattern));

        let executor = ScriptedExecutor::new()
            .respond(
                "INFORMATION_SCHEMA.COLUMNS",
                ScriptedExecutor::ok(introspection_rows()),
            )
            .respond(
                "COUNT(*)",
                ScriptedExecutor::ok(vec![row(&[("count", "42")])]),
            );
        let planner = Arc::new(ScriptedPlanner::new());
        let engine = ExplorationEngine::new(Arc::new(executor), planner.clone())
            .with_pattern_store(store.clone());

        let result = engine.explore_and_answer(
            "how many customers do we have",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert!(result.using_cached_pattern);
        assert_eq!(result.pattern_id.as_deref(), Some("p1"));
        assert_eq!(result.iterations_used, 1);
        assert_eq!(planner.decide_calls.load(Ordering::SeqCst), 0);
        assert_eq!(planner.synthesize_calls.load(Ordering::SeqCst), 1);
        // Compound of synthesis confidence (0.9 default draft) and pattern
        // confidence (0.9).
        assert!((result.confidence - 0.81).abs() < 1e-9);

        let reports = store.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
    }

    #[test]
    fn test_failed_replay_falls_back_to_exploration() {
        let hash = fingerprint_rows(&introspection_rows());
        let pattern = delve_patterns::Pattern {
            pattern_id: "p1".to_string(),
            question_template: "revenue by region".to_string(),
            query_sequence: vec![
                delve_patterns::QueryStep {
                    purpose: "count customers".to_string(),
                    query: "SELECT COUNT(*) FROM Customers".to_string(),
                },
                delve_patterns::QueryStep {
                    purpose: "sum revenue".to_string(),
                    query: "SELECT SUM(total) FROM Invoices".to_string(),
                },
            ],
            schema_hash: hash,
            confidence: 0.9,
            similarity_score: 0.8,
            use_count: 1,
            avg_execution_time_ms: 60.0,
        };
        let store = Arc::new(MockPatternStore::new().with_match(pattern));

        let executor = ScriptedExecutor::new()
            .respond(
                "INFORMATION_SCHEMA.COLUMNS",
                ScriptedExecutor::ok(introspection_rows()),
            )
            .respond("Invoices", ScriptedExecutor::err("invalid object name 'Invoices'"));
        let planner = ScriptedPlanner::completing("fallback answer", 0.75);
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner))
            .with_pattern_store(store.clone());

        let result = engine.explore_and_answer(
            "revenue by region",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        // The failed replay is reported and the slow path takes over,
        // keeping the partial replay results in history.
        assert!(!result.using_cached_pattern);
        assert!(result.pattern_id.is_none());
        assert_eq!(result.answer, "fallback answer");
        assert_eq!(result.query_history.len(), 2);
        assert!(!result.query_history[1].succeeded());

        let reports = store.reports();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].success);
    }

    #[test]
    fn test_rejected_query_becomes_failed_record_and_loop_continues() {
        let planner = ScriptedPlanner::new()
            .then(query_action("DROP TABLE Customers", "destructive probe"))
            .then(PlannerAction::Complete {
                answer: "done".to_string(),
                confidence: 0.7,
                reasoning: "scripted".to_string(),
            });
        let executor = ScriptedExecutor::new();
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner));

        let result = engine.explore_and_answer(
            "q",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.answer, "done");
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.query_history.len(), 1);
        assert!(!result.query_history[0].succeeded());
        assert!(result.query_history[0]
            .error
            .as_deref()
            .unwrap()
            .contains("must start with"));
    }

    #[test]
    fn test_rejected_query_never_reaches_executor() {
        let planner = ScriptedPlanner::new()
            .then(query_action("DELETE FROM Customers", "bad idea"))
            .then(PlannerAction::Complete {
                answer: "done".to_string(),
                confidence: 0.7,
                reasoning: "scripted".to_string(),
            });
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = ExplorationEngine::new(executor.clone(), Arc::new(planner));

        engine.explore_and_answer("q", "sales", ExploreOptions::default(), &CancelToken::new());

        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_show_me_all_tables_populates_discovered_schema() {
        let planner = ScriptedPlanner::new()
            .then(query_action(
                "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES",
                "list all tables",
            ))
            .then_completeness(CompletenessCheck {
                complete: true,
                answer: "The database has Customers and Orders tables.".to_string(),
                confidence: 0.95,
                missing_information: vec![],
            });
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.TABLES",
            ScriptedExecutor::ok(vec![
                row(&[("TABLE_SCHEMA", "dbo"), ("TABLE_NAME", "Customers")]),
                row(&[("TABLE_SCHEMA", "dbo"), ("TABLE_NAME", "Orders")]),
            ]),
        );
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner));

        let result = engine.explore_and_answer(
            "show me all tables",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.iterations_used, 1);
        assert_eq!(
            result.discovered_tables,
            vec!["Customers".to_string(), "Orders".to_string()]
        );
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_need_more_info_probes_tables_without_recording_history() {
        let planner = ScriptedPlanner::new()
            .then(PlannerAction::NeedMoreInfo {
                tables: vec!["Orders".to_string()],
                reasoning: "need order columns".to_string(),
            })
            .then(PlannerAction::Complete {
                answer: "orders live in the Orders table".to_string(),
                confidence: 0.85,
                reasoning: "scripted".to_string(),
            });
        let executor = Arc::new(
            ScriptedExecutor::new()
                .respond(
                    "WHERE TABLE_NAME = 'Orders'",
                    ScriptedExecutor::ok(vec![row(&[
                        ("COLUMN_NAME", "id"),
                        ("DATA_TYPE", "int"),
                        ("IS_NULLABLE", "NO"),
                    ])]),
                )
                .respond(
                    "FROM [Orders]",
                    ScriptedExecutor::ok(vec![row(&[("id", "1")])]),
                ),
        );
        let engine = ExplorationEngine::new(executor.clone(), Arc::new(planner));

        let result = engine.explore_and_answer(
            "where are orders stored",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.iterations_used, 2);
        // Discovery probes feed the schema but not the replayable history.
        assert_eq!(result.queries_executed, 0);
        assert!(result.query_history.is_empty());
        assert_eq!(result.discovered_tables, vec!["Orders".to_string()]);
        assert_eq!(executor.executed().len(), 2);
    }

    #[test]
    fn test_budget_exhaustion_degrades_instead_of_erroring() {
        let config = BudgetConfig {
            max_daily_tokens: 50_000,
            max_hourly_tokens: 1_000,
            max_tokens_per_request: 2_000,
            cost_per_1k_tokens: 0.03,
        };
        let guard = Arc::new(BudgetGuard::new(config, MemoryLedger::new()));
        guard.track(1_000, 0);

        let planner = BudgetedPlanner::new(
            ScriptedPlanner::completing("never reached", 0.9),
            guard,
        );
        let engine = ExplorationEngine::new(Arc::new(ScriptedExecutor::new()), Arc::new(planner));

        let result = engine.explore_and_answer(
            "q",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.iterations_used, 1);
        assert_eq!(result.confidence, 0.0);
        assert!(result.answer.contains("Hourly"));
    }

    #[test]
    fn test_cancellation_before_start() {
        let planner = Arc::new(ScriptedPlanner::repeating(query_action(
            "SELECT 1",
            "probe",
        )));
        let engine = ExplorationEngine::new(Arc::new(ScriptedExecutor::new()), planner.clone());

        let cancel = CancelToken::new();
        cancel.cancel();
        let result =
            engine.explore_and_answer("q", "sales", ExploreOptions::default(), &cancel);

        assert_eq!(planner.decide_calls.load(Ordering::SeqCst), 0);
        assert!(result.answer.contains("cancelled"));
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_confident_session_is_learned() {
        let store = Arc::new(MockPatternStore::new());
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            ScriptedExecutor::ok(introspection_rows()),
        );
        let planner = ScriptedPlanner::new()
            .then(query_action("SELECT COUNT(*) FROM Customers", "count customers"))
            .then_completeness(CompletenessCheck {
                complete: true,
                answer: "There are 42 customers.".to_string(),
                confidence: 0.9,
                missing_information: vec![],
            });
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner))
            .with_pattern_store(store.clone());

        let result = engine.explore_and_answer(
            "how many customers do we have",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.confidence, 0.9);
        let learned = store.learned();
        assert_eq!(learned.len(), 1);
        assert_eq!(learned[0].query_sequence.len(), 1);
        assert!(!learned[0].schema_hash.is_unavailable());
    }

    #[test]
    fn test_low_confidence_session_is_not_learned() {
        let store = Arc::new(MockPatternStore::new());
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            ScriptedExecutor::ok(introspection_rows()),
        );
        let planner = ScriptedPlanner::new()
            .then(query_action("SELECT COUNT(*) FROM Customers", "count customers"))
            .then_completeness(CompletenessCheck {
                complete: true,
                answer: "maybe 42".to_string(),
                confidence: 0.6,
                missing_information: vec![],
            });
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner))
            .with_pattern_store(store.clone());

        engine.explore_and_answer(
            "how many customers do we have",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert!(store.learned().is_empty());
    }

    #[test]
    fn test_store_outage_degrades_to_slow_path() {
        let store = Arc::new(MockPatternStore::new().with_unavailable_lookups());
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            ScriptedExecutor::ok(introspection_rows()),
        );
        let planner = ScriptedPlanner::completing("answered the slow way", 0.7);
        let engine = ExplorationEngine::new(Arc::new(executor), Arc::new(planner))
            .with_pattern_store(store);

        let result = engine.explore_and_answer(
            "q",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        assert_eq!(result.answer, "answered the slow way");
        assert!(!result.using_cached_pattern);
    }

    #[test]
    fn test_export_requested_writes_to_sink() {
        struct Forward(Arc<MemoryExportSink>);
        impl ExportSink for Forward {
            fn put(&self, id: &str, doc: &str, report: &str) -> Result<(), delve_core::ExportError> {
                self.0.put(id, doc, report)
            }
            fn get(
                &self,
                id: &str,
            ) -> Result<delve_export::ExplorationExport, delve_core::ExportError> {
                self.0.get(id)
            }
        }
        let sink = Arc::new(MemoryExportSink::new());
        let exporter = Arc::new(Exporter::new(Box::new(Forward(sink.clone())), 30));

        let planner = ScriptedPlanner::completing("exported answer", 0.9);
        let engine = ExplorationEngine::new(Arc::new(ScriptedExecutor::new()), Arc::new(planner))
            .with_exporter(exporter);

        let options = ExploreOptions {
            export_session: true,
            ..ExploreOptions::default()
        };
        let result = engine.explore_and_answer("q", "sales", options, &CancelToken::new());

        assert!(result.export_id.is_some());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_explanation_disabled_yields_none() {
        let planner = ScriptedPlanner::completing("a", 0.9);
        let engine = ExplorationEngine::new(Arc::new(ScriptedExecutor::new()), Arc::new(planner));

        let options = ExploreOptions {
            enable_explanation: false,
            ..ExploreOptions::default()
        };
        let result = engine.explore_and_answer("q", "sales", options, &CancelToken::new());

        assert!(result.explanation.is_none());
    }

    #[test]
    fn test_explanation_records_breakthrough() {
        let planner = ScriptedPlanner::completing("a", 0.9);
        let engine = ExplorationEngine::new(Arc::new(ScriptedExecutor::new()), Arc::new(planner));

        let result = engine.explore_and_answer(
            "q",
            "sales",
            ExploreOptions::default(),
            &CancelToken::new(),
        );

        let explanation = result.explanation.unwrap();
        let insights = explanation["key_insights"].as_array().unwrap();
        assert!(!insights.is_empty());
    }
}
