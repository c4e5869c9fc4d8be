//! Schema fingerprinting
//!
//! A stable hash summarizing a database's current table/column shape.
//! Used as the cache-key dimension that must match before a stored
//! pattern is reusable, and as the drift check when re-validating an
//! export.

use crate::traits::QueryExecutor;
use delve_core::{Row, SchemaHash};
use sha2::{Digest, Sha256};

/// The single read-only introspection query behind every fingerprint.
pub const SCHEMA_INTROSPECTION_QUERY: &str =
    "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS";

/// Compute an order-independent checksum over every
/// `(schema, table, column, data_type)` tuple in `database`.
///
/// Returns [`SchemaHash::unavailable`] when introspection fails or comes
/// back empty; callers must skip pattern matching on the sentinel rather
/// than treating it as a valid match key.
pub fn schema_fingerprint(executor: &dyn QueryExecutor, database: &str) -> SchemaHash {
    let outcome = executor.execute(SCHEMA_INTROSPECTION_QUERY, database);
    if let Some(error) = &outcome.error {
        tracing::warn!(database, %error, "schema introspection failed");
        return SchemaHash::unavailable();
    }
    if outcome.rows.is_empty() {
        tracing::warn!(database, "schema introspection returned no columns");
        return SchemaHash::unavailable();
    }

    fingerprint_rows(&outcome.rows)
}

/// Hash already-fetched introspection rows. Row order does not affect the
/// result: tuples are canonicalized by sorting before hashing.
pub fn fingerprint_rows(rows: &[Row]) -> SchemaHash {
    let mut tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "{}|{}|{}|{}",
                field(row, "TABLE_SCHEMA"),
                field(row, "TABLE_NAME"),
                field(row, "COLUMN_NAME"),
                field(row, "DATA_TYPE"),
            )
        })
        .collect();
    tuples.sort_unstable();

    let mut hasher = Sha256::new();
    for tuple in &tuples {
        hasher.update(tuple.as_bytes());
        hasher.update(b"\n");
    }
    SchemaHash::new(hex::encode(hasher.finalize()))
}

fn field<'a>(row: &'a Row, name: &str) -> &'a str {
    row.get(name).and_then(|v| v.as_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{row, ScriptedExecutor};
    use delve_core::QueryOutcome;

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
                ("COLUMN_NAME", "name"),
                ("DATA_TYPE", "nvarchar"),
            ]),
        ]
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let rows = introspection_rows();
        let mut reversed = rows.clone();
        reversed.reverse();
        assert_eq!(fingerprint_rows(&rows), fingerprint_rows(&reversed));
    }

    #[test]
    fn test_fingerprint_changes_when_schema_drifts() {
        let rows = introspection_rows();
        let mut drifted = rows.clone();
        drifted.pop();
        assert_ne!(fingerprint_rows(&rows), fingerprint_rows(&drifted));
    }

    #[test]
    fn test_introspection_error_yields_sentinel() {
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            QueryOutcome {
                query: String::new(),
                rows: vec![],
                row_count: 0,
                execution_time_ms: 0.0,
                error: Some("permission denied".to_string()),
            },
        );
        let hash = schema_fingerprint(&executor, "sales");
        assert!(hash.is_unavailable());
    }

    #[test]
    fn test_live_fingerprint_via_executor() {
        let executor = ScriptedExecutor::new().respond(
            "INFORMATION_SCHEMA.COLUMNS",
            QueryOutcome {
                query: String::new(),
                rows: introspection_rows(),
                row_count: 2,
                execution_time_ms: 3.0,
                error: None,
            },
        );
        let hash = schema_fingerprint(&executor, "sales");
        assert!(!hash.is_unavailable());
        assert_eq!(hash.as_str().len(), 64);
    }
}
