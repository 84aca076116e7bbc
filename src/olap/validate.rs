//! Warehouse validation.
//!
//! Deterministic checks that the attached warehouse honours the data model
//! the dispatcher assumes:
//! - **Structure**: every table and column the schema descriptor names exists.
//! - **Fact grain**: one fact row per fact key.
//! - **Bridges**: no duplicate pairs, every dimension key resolves, and
//!   bridged fact keys have a fact row.
//! - **Codes**: bridged dimensions have unique codes.
//! - **Ranges**: ratings lie in `0..=10`.
//!
//! None of this runs on the read path. Output is a [`ValidationReport`] that
//! serialises to JSON for `olap check --json`.

use std::time::Instant;

use rusqlite::Connection;
use serde::Serialize;

use super::schema::{DimensionLink, SchemaDescriptor, TableRequirement};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Severity level for a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single validation check result.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub id: String,
    pub ok: bool,
    pub severity: Severity,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl Check {
    fn pass(id: impl Into<String>, severity: Severity, details: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            severity,
            details: details.into(),
            suggested_action: None,
        }
    }

    fn fail(
        id: impl Into<String>,
        severity: Severity,
        details: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ok: false,
            severity,
            details: details.into(),
            suggested_action: Some(action.into()),
        }
    }
}

/// Report metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub elapsed_ms: u64,
    pub schema: String,
}

/// Full validation report.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
    #[serde(rename = "_meta")]
    pub meta: ReportMeta,
}

impl ValidationReport {
    /// True if every check passed.
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// Count of checks that failed with a given severity.
    pub fn count_failures(&self, sev: Severity) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.ok && c.severity == sev)
            .count()
    }

    pub fn check(&self, id: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.id == id)
    }

    /// Produce the JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::json!({"error": "serialization failed"}))
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Run every check against the warehouse attached on `conn`.
pub fn run_validation(conn: &Connection, schema: &SchemaDescriptor) -> ValidationReport {
    let start = Instant::now();
    let mut checks = Vec::new();

    let structure: Vec<(TableRequirement, Check)> = schema
        .table_requirements()
        .into_iter()
        .map(|req| {
            let check = check_table(conn, schema.schema(), &req);
            (req, check)
        })
        .collect();
    let present = |table: &str| {
        structure
            .iter()
            .any(|(req, check)| req.table == table && check.ok)
    };

    let fact = schema.fact();
    if present(fact.table.as_str()) {
        checks.push(check_fact_grain(conn, schema));
        if let Some(rating) = fact.measures.iter().find(|m| m.name == "rating") {
            checks.push(check_rating_range(conn, schema, &rating.column));
        }
    }

    for dim in schema.dimensions() {
        let DimensionLink::Bridge(bridge) = &dim.link else {
            continue;
        };
        if !present(bridge.table.as_str()) || !present(dim.table.as_str()) {
            continue;
        }
        let bridge_table = schema.qualified(&bridge.table);
        let dim_table = schema.qualified(&dim.table);

        checks.push(count_check(
            conn,
            format!("bridge.{}.unique_pairs", bridge.table),
            Severity::Error,
            &format!(
                "SELECT COUNT(*) FROM (SELECT 1 FROM {bridge_table} \
                 GROUP BY {fk}, {dk} HAVING COUNT(*) > 1)",
                fk = bridge.fact_key,
                dk = bridge.dimension_key,
            ),
            "duplicate bridge pairs",
            "Deduplicate the bridge; duplicates weight a title more than once in averages.",
        ));

        checks.push(count_check(
            conn,
            format!("bridge.{}.dimension_keys", bridge.table),
            Severity::Error,
            &format!(
                "SELECT COUNT(*) FROM {bridge_table} b \
                 LEFT JOIN {dim_table} d ON d.{key} = b.{dk} \
                 WHERE d.{key} IS NULL",
                key = dim.key,
                dk = bridge.dimension_key,
            ),
            "bridge rows pointing at a missing dimension row",
            "Reload the dimension before the bridge.",
        ));

        if present(fact.table.as_str()) {
            checks.push(count_check(
                conn,
                format!("bridge.{}.fact_keys", bridge.table),
                Severity::Warning,
                &format!(
                    "SELECT COUNT(*) FROM {bridge_table} b \
                     LEFT JOIN {fact_table} f ON f.{key} = b.{fk} \
                     WHERE f.{key} IS NULL",
                    fact_table = schema.qualified(&fact.table),
                    key = fact.key,
                    fk = bridge.fact_key,
                ),
                "bridge rows without a fact row (excluded from every operation)",
                "Expected for unrated titles; otherwise reload the fact table.",
            ));
        }

        if let Some(code) = dim.stored_column(&dim.code_attribute) {
            checks.push(count_check(
                conn,
                format!("dimension.{}.unique_codes", dim.name),
                Severity::Error,
                &format!(
                    "SELECT COUNT(*) FROM (SELECT 1 FROM {dim_table} \
                     GROUP BY {code} HAVING COUNT(*) > 1)"
                ),
                "duplicated codes",
                "Make the code column unique; duplicates split one group into several.",
            ));
        }
    }

    let mut all = structure.into_iter().map(|(_, check)| check).collect::<Vec<_>>();
    all.append(&mut checks);

    ValidationReport {
        checks: all,
        meta: ReportMeta {
            elapsed_ms: start.elapsed().as_millis() as u64,
            schema: schema.schema().to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn check_table(conn: &Connection, schema: &str, req: &TableRequirement) -> Check {
    let id = format!("table.{}", req.table);
    let columns: Result<Vec<String>, rusqlite::Error> = conn
        .prepare("SELECT name FROM pragma_table_info(?1, ?2)")
        .and_then(|mut stmt| {
            let names = stmt
                .query_map([req.table.as_str(), schema], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>();
            names
        });
    let columns = match columns {
        Ok(columns) => columns,
        Err(err) => {
            return Check::fail(
                id,
                Severity::Error,
                format!("could not inspect table: {err}"),
                "Check that the warehouse file is a SQLite database.",
            );
        }
    };
    if columns.is_empty() {
        return Check::fail(
            id,
            Severity::Error,
            format!("{schema}.{} does not exist", req.table),
            "Load the star schema into the warehouse.",
        );
    }
    let missing: Vec<&str> = req
        .columns
        .iter()
        .filter(|c| !columns.iter().any(|have| have.eq_ignore_ascii_case(c)))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Check::pass(id, Severity::Error, format!("{} columns present", req.columns.len()))
    } else {
        Check::fail(
            id,
            Severity::Error,
            format!("missing columns: {}", missing.join(", ")),
            "Rebuild the table with the expected columns.",
        )
    }
}

fn check_fact_grain(conn: &Connection, schema: &SchemaDescriptor) -> Check {
    let fact = schema.fact();
    count_check(
        conn,
        "fact.grain".to_string(),
        Severity::Error,
        &format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {} GROUP BY {} HAVING COUNT(*) > 1)",
            schema.qualified(&fact.table),
            fact.key
        ),
        "fact keys with more than one row",
        "The fact table must hold one row per title.",
    )
}

fn check_rating_range(conn: &Connection, schema: &SchemaDescriptor, column: &str) -> Check {
    count_check(
        conn,
        "fact.rating_range".to_string(),
        Severity::Warning,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {column} IS NOT NULL AND ({column} < 0 OR {column} > 10)",
            schema.qualified(&schema.fact().table)
        ),
        "ratings outside 0..10",
        "Ratings should be on the 0 to 10 scale.",
    )
}

/// Passes when `sql` (a single `COUNT(*)`) returns zero.
fn count_check(
    conn: &Connection,
    id: String,
    severity: Severity,
    sql: &str,
    what: &str,
    action: &str,
) -> Check {
    match conn.query_row(sql, [], |row| row.get::<_, i64>(0)) {
        Ok(0) => Check::pass(id, severity, format!("no {what}")),
        Ok(n) => Check::fail(id, severity, format!("{n} {what}"), action),
        Err(err) => Check::fail(id, Severity::Error, format!("query failed: {err}"), action),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
