//! DELVE Safety - Query Safety Gate
//!
//! Pure functions that decide whether raw SQL text may reach execution and
//! rewrite accepted statements into a row-bounded form. The gate is a
//! heuristic keyword filter, not a SQL parser: it is deliberately
//! conservative, and a false rejection is recoverable (the planner simply
//! proposes another query). The query-execution collaborator is required
//! to be read-only at the storage layer; this gate is the second line of
//! defense, not the only one.
//!
//! Rejection is communicated as a `SafetyVerdict`, never as an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Row cap injected by [`bound`] when a statement has no limit of its own.
pub const DEFAULT_ROW_CAP: u32 = 10_000;

/// Read-only verbs a statement may start with.
const ALLOWED_PREFIXES: &[&str] = &["select", "with", "show", "describe", "sp_help", "sp_columns"];

/// System procedures exempt from the `sp_` prefix rejection.
const SAFE_PROCEDURES: &[&str] = &["sp_help", "sp_columns"];

/// Write/DDL/escape keywords rejected anywhere in a statement.
static DENY_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|create|alter|truncate|grant|revoke|exec|execute|merge|bulk|backup|restore|shutdown|reconfigure|sp_configure|xp_cmdshell|openrowset|openquery|opendatasource)\b",
    )
    .expect("deny keyword regex is valid")
});

/// Any `INTO` occurrence.
static INTO_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\binto\b").expect("into regex is valid"));

/// `INTO` targeting a temp table (`SELECT ... INTO #tmp`), the one safe form.
static INTO_TEMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\binto\s+#\w").expect("into-temp regex is valid"));

/// System procedure references (`sp_foo`, `xp_foo`).
static PROC_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sp|xp)_\w+").expect("proc prefix regex is valid"));

/// Existing row limit or aggregate count, either of which suppresses bounding.
static HAS_LIMIT_OR_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(top|count)\b").expect("limit regex is valid"));

/// First `SELECT` keyword.
static FIRST_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\b").expect("select regex is valid"));

/// Accept/reject decision for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub allowed: bool,
    /// Rejection reason; `None` when allowed.
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decide whether `sql` is safe to execute.
///
/// A statement is accepted only when it starts with a read-only verb,
/// contains no deny-listed keyword outside its recognized safe context,
/// has at most a single trailing statement separator, and carries no raw
/// comment delimiters.
pub fn validate(sql: &str) -> SafetyVerdict {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return SafetyVerdict::reject("Query cannot be empty");
    }
    let lower = trimmed.to_lowercase();

    if !starts_with_allowed_verb(&lower) {
        return SafetyVerdict::reject(format!(
            "Query must start with one of: {}",
            ALLOWED_PREFIXES.join(", ")
        ));
    }

    // Comment delimiters defeat the keyword scan, so they are banned outright.
    for delim in ["--", "/*", "*/"] {
        if lower.contains(delim) {
            return SafetyVerdict::reject(format!(
                "Query contains comment delimiter '{delim}'"
            ));
        }
    }

    let separators = trimmed.matches(';').count();
    if separators > 1 || (separators == 1 && !trimmed.ends_with(';')) {
        return SafetyVerdict::reject("Multiple statements are not allowed");
    }

    if let Some(found) = DENY_KEYWORDS.find(&lower) {
        return SafetyVerdict::reject(format!(
            "Query contains forbidden keyword: {}",
            found.as_str()
        ));
    }

    // INTO is safe only as a temp-table SELECT target. The deny list has
    // already excluded INSERT/BULK by this point.
    let into_count = INTO_ANY.find_iter(&lower).count();
    if into_count > 0 && INTO_TEMP.find_iter(&lower).count() != into_count {
        return SafetyVerdict::reject("INTO may only target a temp table (#name)");
    }

    for proc in PROC_PREFIX.find_iter(&lower) {
        let name = proc.as_str();
        if name.starts_with("xp_") {
            return SafetyVerdict::reject(format!("Extended procedure not allowed: {name}"));
        }
        if !SAFE_PROCEDURES.contains(&name) {
            return SafetyVerdict::reject(format!("System procedure not allowed: {name}"));
        }
    }

    SafetyVerdict::allow()
}

fn starts_with_allowed_verb(lower: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|prefix| {
        lower.starts_with(prefix)
            && lower[prefix.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric() && c != '_')
    })
}

/// Rewrite `sql` with the default row cap. See [`bound_with_cap`].
pub fn bound(sql: &str) -> String {
    bound_with_cap(sql, DEFAULT_ROW_CAP)
}

/// Inject a `TOP {cap}` clause into statements that have neither an
/// existing `TOP` nor an aggregate `COUNT`.
///
/// For `WITH` statements the clause lands on the first `SELECT` after the
/// CTE body's closing parenthesis. Idempotent: a bounded statement already
/// contains `TOP`, so a second pass changes nothing.
pub fn bound_with_cap(sql: &str, cap: u32) -> String {
    if HAS_LIMIT_OR_COUNT.is_match(sql) {
        return sql.to_string();
    }

    let insert_after = if sql.trim_start().to_lowercase().starts_with("with") {
        // Skip the CTE body: bound the outer SELECT, not the inner one.
        sql.find(')')
            .and_then(|close| FIRST_SELECT.find_at(sql, close).map(|m| m.end()))
    } else {
        FIRST_SELECT.find(sql).map(|m| m.end())
    };

    match insert_after {
        Some(pos) => format!("{} TOP {}{}", &sql[..pos], cap, &sql[pos..]),
        None => sql.to_string(),
    }
}

/// Hygiene check for database/table names before they are interpolated
/// into discovery queries. Tolerates brackets and `schema.table` form.
pub fn validate_identifier(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    let clean = name.replace(['[', ']'], "");
    clean.split('.').all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    const DENY_LIST: &[&str] = &[
        "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant", "revoke",
        "exec", "execute", "merge", "bulk", "backup", "restore", "shutdown", "reconfigure",
    ];

    fn mixed_case(word: &str, mask: u64) -> String {
        word.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask >> (i % 64) & 1 == 1 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Any deny-listed keyword appearing as a whole word is rejected,
        /// regardless of casing or position inside an otherwise-valid SELECT.
        #[test]
        fn prop_deny_keywords_always_rejected(
            idx in 0..DENY_LIST.len(),
            mask in any::<u64>(),
        ) {
            let keyword = mixed_case(DENY_LIST[idx], mask);
            let sql = format!("SELECT * FROM t WHERE note = {keyword} (x)");
            let verdict = validate(&sql);
            prop_assert!(!verdict.allowed, "accepted: {sql}");
        }

        /// `bound` is idempotent for statements without an existing limit.
        #[test]
        fn prop_bound_idempotent(
            table in "t_[A-Za-z0-9_]{0,20}",
            column in "c_[A-Za-z0-9_]{0,20}",
        ) {
            let sql = format!("SELECT {column} FROM {table}");
            let once = bound(&sql);
            prop_assert_eq!(bound(&once), once.clone());
            prop_assert!(once.to_lowercase().contains("top 10000"));
        }

        /// Bounding never changes whether a statement passes the gate.
        #[test]
        fn prop_bound_preserves_validity(
            table in "t_[A-Za-z0-9_]{0,20}",
        ) {
            let sql = format!("SELECT * FROM {table}");
            prop_assert!(validate(&sql).allowed);
            prop_assert!(validate(&bound(&sql)).allowed);
        }

        /// Identifier validation accepts exactly the hygienic shapes.
        #[test]
        fn prop_clean_identifiers_accepted(name in "[A-Za-z0-9_-]{1,30}") {
            prop_assert!(validate_identifier(&name));
        }
    }
}
