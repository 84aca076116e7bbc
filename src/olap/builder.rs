//! SQL query builder.
//!
//! Translates one [`AggregationSpec`] into parameterized SQL against the
//! star schema. Identifiers only ever come from the schema descriptor or from
//! validated output aliases; every literal is a bound parameter.

use itertools::Itertools;

use super::catalog::{AggregationSpec, FilterOp, FilterValue, MeasureExpr};
use super::schema::{SchemaDescriptor, is_identifier};
use super::types::{Bindings, OlapError, OlapResult, ResultShape, Scalar};

/// A query ready for the execution adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub operation: String,
    pub sql: String,
    /// Values for `?1`, `?2`, … in order.
    pub params: Vec<Scalar>,
    pub shape: ResultShape,
}

/// How filter parameters are resolved while building.
enum ParamMode<'b> {
    /// Registration-time check: parameters stay unbound.
    Validate,
    Bind(&'b Bindings),
}

/// Turns an [`AggregationSpec`] into schema-qualified SQL with bound parameters.
pub struct QueryBuilder<'a> {
    schema: &'a SchemaDescriptor,
}

fn unsupported(spec: &AggregationSpec, msg: impl std::fmt::Display) -> OlapError {
    OlapError::UnsupportedSpecification(format!("{}: {msg}", spec.id))
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a SchemaDescriptor) -> Self {
        Self { schema }
    }

    /// Check every reference in `spec` and return the result shape it
    /// produces. Parameters do not need bindings here.
    pub fn validate(&self, spec: &AggregationSpec) -> OlapResult<ResultShape> {
        self.plan(spec, ParamMode::Validate).map(|q| q.shape)
    }

    /// Build the executable query, binding named parameters from `bindings`.
    pub fn build(&self, spec: &AggregationSpec, bindings: &Bindings) -> OlapResult<BuiltQuery> {
        let query = self.plan(spec, ParamMode::Bind(bindings))?;
        tracing::debug!(operation = %spec.id, sql = %query.sql, params = query.params.len(), "built query");
        Ok(query)
    }

    fn plan(&self, spec: &AggregationSpec, mode: ParamMode<'_>) -> OlapResult<BuiltQuery> {
        let shape = self.check_structure(spec)?;

        let mut select: Vec<String> = Vec::new();
        let mut group_by: Vec<String> = Vec::new();

        for column in spec.grouping.iter() {
            let resolved = self.schema.resolve(&column.attr)?;
            select.push(format!("{} AS {}", resolved.expr, column.alias));
            group_by.push(resolved.expr);
        }
        for column in &spec.details {
            let resolved = self.schema.resolve(&column.attr)?;
            select.push(format!("{} AS {}", resolved.expr, column.alias));
        }
        if let Some(pivot) = &spec.pivot {
            let resolved = self.schema.resolve(&pivot.attr)?;
            select.push(format!("{} AS {}", resolved.expr, pivot.alias));
            group_by.push(resolved.expr);
        }
        for measure in &spec.measures {
            select.push(format!("{} AS {}", self.measure_sql(&measure.expr)?, measure.alias));
        }

        let mut params: Vec<Scalar> = Vec::new();
        let mut predicates: Vec<String> = Vec::new();
        for filter in &spec.filters {
            let expr = self.schema.resolve(&filter.attr)?.expr;
            let op = match filter.op {
                FilterOp::NotNull => {
                    predicates.push(format!("{expr} IS NOT NULL"));
                    continue;
                }
                FilterOp::Eq => "=",
                FilterOp::Ge => ">=",
            };
            let value = match (&filter.value, &mode) {
                (None, _) => {
                    return Err(unsupported(
                        spec,
                        format!("filter on {} has no value", filter.attr),
                    ));
                }
                (Some(FilterValue::Constant(Scalar::Null)), _) => {
                    return Err(unsupported(
                        spec,
                        format!("filter on {} compares against null", filter.attr),
                    ));
                }
                (Some(FilterValue::Constant(value)), _) => value.clone(),
                (Some(FilterValue::Parameter(_)), ParamMode::Validate) => Scalar::Null,
                (Some(FilterValue::Parameter(name)), ParamMode::Bind(bindings)) => bindings
                    .get(name)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| OlapError::MissingParameter(name.clone()))?,
            };
            params.push(value);
            predicates.push(format!("{expr} {op} ?{}", params.len()));
        }

        let dimensions = spec.referenced_dimensions();
        let mut sql = format!(
            "SELECT {}\n{}",
            select.join(", "),
            self.schema.from_clause(dimensions.iter().copied())?
        );
        if !predicates.is_empty() {
            sql.push_str(&format!("\nWHERE {}", predicates.join(" AND ")));
        }
        let aggregated = spec.measures.iter().any(|m| m.expr.is_aggregate());
        if aggregated && !group_by.is_empty() {
            sql.push_str(&format!("\nGROUP BY {}", group_by.join(", ")));
        }

        let mut ordering: Vec<String> = spec
            .ordering
            .iter()
            .map(|key| format!("{} {}", key.column, key.direction))
            .collect();
        if let Some(pivot) = &spec.pivot {
            // Long-form rows arrive grouped by row key, pivot values sorted within.
            if !spec.ordering.iter().any(|k| k.column == pivot.alias) {
                ordering.push(format!("{} ASC", pivot.alias));
            }
        }
        if !ordering.is_empty() {
            sql.push_str(&format!("\nORDER BY {}", ordering.join(", ")));
        }

        if let Some(limit) = spec.limit {
            params.push(Scalar::Integer(i64::from(limit)));
            sql.push_str(&format!("\nLIMIT ?{}", params.len()));
        }

        Ok(BuiltQuery {
            operation: spec.id.clone(),
            sql,
            params,
            shape,
        })
    }

    fn measure_sql(&self, expr: &MeasureExpr) -> OlapResult<String> {
        Ok(match expr {
            MeasureExpr::Avg {
                measure,
                round: Some(digits),
            } => format!("ROUND(AVG({}), {digits})", self.schema.measure_column(measure)?),
            MeasureExpr::Avg {
                measure,
                round: None,
            } => format!("AVG({})", self.schema.measure_column(measure)?),
            MeasureExpr::Sum { measure } => {
                format!("SUM({})", self.schema.measure_column(measure)?)
            }
            MeasureExpr::CountAll => "COUNT(*)".to_string(),
            MeasureExpr::Corr { x, y } => format!(
                "corr({}, {})",
                self.schema.measure_column(x)?,
                self.schema.measure_column(y)?
            ),
            MeasureExpr::Raw { measure } => self.schema.measure_column(measure)?,
        })
    }

    /// Structural rules that do not depend on bindings.
    fn check_structure(&self, spec: &AggregationSpec) -> OlapResult<ResultShape> {
        if spec.measures.is_empty() {
            return Err(unsupported(spec, "no measures"));
        }

        let aliases: Vec<&str> = spec
            .grouping
            .iter()
            .chain(&spec.details)
            .map(|c| c.alias.as_str())
            .chain(spec.pivot.iter().map(|p| p.alias.as_str()))
            .chain(spec.measures.iter().map(|m| m.alias.as_str()))
            .collect();
        if let Some(bad) = aliases.iter().find(|a| !is_identifier(a)) {
            return Err(unsupported(spec, format!("invalid output alias '{bad}'")));
        }
        if let Some(dup) = aliases.iter().duplicates().next() {
            return Err(unsupported(spec, format!("duplicate output alias '{dup}'")));
        }
        for key in &spec.ordering {
            if !aliases.contains(&key.column.as_str()) {
                return Err(unsupported(
                    spec,
                    format!("ordering on '{}' which is not an output column", key.column),
                ));
            }
        }

        let raw = spec.measures.iter().filter(|m| !m.expr.is_aggregate()).count();
        if raw > 0 && raw != spec.measures.len() {
            return Err(unsupported(spec, "raw and aggregated measures mixed"));
        }
        if raw > 0 && !spec.grouping.is_empty() {
            return Err(unsupported(spec, "raw measures cannot be grouped"));
        }
        if raw == 0 && !spec.details.is_empty() {
            return Err(unsupported(spec, "detail columns need raw measures"));
        }

        // Resolve everything up front so unknown references fail here.
        let mut numeric: Vec<String> = Vec::new();
        for column in spec.grouping.iter().chain(&spec.details) {
            if self.schema.resolve(&column.attr)?.numeric {
                numeric.push(column.alias.clone());
            }
        }
        for filter in &spec.filters {
            self.schema.resolve(&filter.attr)?;
        }
        for measure in &spec.measures {
            self.measure_sql(&measure.expr)?;
            numeric.push(measure.alias.clone());
        }

        if let Some(pivot) = &spec.pivot {
            self.schema.resolve(&pivot.attr)?;
            if spec.grouping.len() != 1 {
                return Err(unsupported(spec, "a pivot needs exactly one row key"));
            }
            if spec.measures.len() != 1 || raw > 0 {
                return Err(unsupported(spec, "a pivot needs exactly one aggregated measure"));
            }
            if spec.limit.is_some() {
                return Err(unsupported(spec, "a pivot cannot be row-limited"));
            }
            return Ok(ResultShape::Matrix {
                row_key: spec.grouping[0].alias.clone(),
                pivot_key: pivot.alias.clone(),
                value: spec.measures[0].alias.clone(),
            });
        }

        if spec.grouping.is_empty() && spec.details.is_empty() && spec.measures.len() == 1 && raw == 0
        {
            return Ok(ResultShape::Scalar {
                field: spec.measures[0].alias.clone(),
            });
        }

        Ok(ResultShape::Flat { numeric })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::olap::catalog::{
        Direction, Filter, Measure, OperationDefaults, standard_specs,
    };
    use crate::olap::schema::{Attr, decade_sql};

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::warehouse("dwh").unwrap()
    }

    fn standard(id: &str) -> AggregationSpec {
        standard_specs(&OperationDefaults::default())
            .into_iter()
            .find(|s| s.id == id)
            .unwrap()
    }

    fn build(id: &str) -> BuiltQuery {
        let s = schema();
        QueryBuilder::new(&s)
            .build(&standard(id), &Bindings::new())
            .unwrap()
    }

    #[test]
    fn rollup_sql() {
        let q = build("roll-up");
        assert_eq!(
            q.sql,
            "SELECT g.genre_code AS genre, ROUND(AVG(f.average_rating), 2) AS avg_rating, \
             SUM(f.num_votes) AS total_votes\n\
             FROM dwh.fact_title_rating f\n\
             JOIN dwh.bridge_title_genre bg ON bg.title_key = f.title_key\n\
             JOIN dwh.dim_genre g ON g.genre_key = bg.genre_key\n\
             GROUP BY g.genre_code\n\
             ORDER BY avg_rating DESC, genre ASC"
        );
        assert!(q.params.is_empty());
        assert_eq!(
            q.shape,
            ResultShape::Flat {
                numeric: vec!["avg_rating".into(), "total_votes".into()]
            }
        );
    }

    #[test]
    fn drilldown_and_pivot_share_decade_expression() {
        let drill = build("drill-down");
        let pivot = build("pivot");
        let decade = format!("{} AS decade", decade_sql("t.start_year"));
        assert!(drill.sql.contains(&decade));
        assert!(pivot.sql.contains(&decade));
        assert!(drill.sql.contains("WHERE t.start_year IS NOT NULL"));
        assert!(drill.sql.contains("ORDER BY decade ASC, avg_rating DESC, genre ASC"));
    }

    #[test]
    fn slice_binds_its_genre() {
        let q = build("slice");
        assert!(q.sql.contains("WHERE g.genre_code = ?1"));
        assert!(!q.sql.contains("'drama'"));
        assert_eq!(q.params, vec![Scalar::Text("drama".into())]);
        assert!(q.sql.contains("COUNT(*) AS total_titles"));
        assert!(!q.sql.contains("dim_region"));
    }

    #[test]
    fn dice_binds_filters_and_limit() {
        let q = build("dice");
        assert!(
            q.sql
                .contains("WHERE g.genre_code = ?1 AND r.region_code = ?2 AND t.start_year >= ?3")
        );
        assert!(q.sql.ends_with("ORDER BY average_rating DESC, primary_title ASC\nLIMIT ?4"));
        assert!(!q.sql.contains("GROUP BY"));
        assert_eq!(
            q.params,
            vec![
                Scalar::Text("comedy".into()),
                Scalar::Text("us".into()),
                Scalar::Integer(2015),
                Scalar::Integer(20),
            ]
        );
        assert_eq!(
            q.shape,
            ResultShape::Flat {
                numeric: vec![
                    "start_year".into(),
                    "average_rating".into(),
                    "num_votes".into()
                ]
            }
        );
    }

    #[test]
    fn pivot_builds_long_form_first() {
        let q = build("pivot");
        assert!(q.sql.contains("g.genre_code AS genre"));
        assert!(q.sql.contains(&format!(
            "GROUP BY {}, g.genre_code",
            decade_sql("t.start_year")
        )));
        assert!(q.sql.ends_with("ORDER BY decade ASC, genre ASC"));
        assert!(matches!(q.shape, ResultShape::Matrix { .. }));
    }

    #[test]
    fn correlation_joins_nothing() {
        let q = build("correlation");
        assert_eq!(
            q.sql,
            "SELECT corr(f.average_rating, f.num_votes) AS correlation\nFROM dwh.fact_title_rating f"
        );
        assert!(!q.sql.contains("JOIN"));
    }

    #[test]
    fn parameters_are_bound_or_rejected() {
        let s = schema();
        let spec = AggregationSpec::new("by-type", "By type")
            .group_by(Attr::new("title", "title_type"), "title_type")
            .filter(Filter::eq_param(Attr::new("genre", "code"), "genre"))
            .measure(Measure::count("n"));
        let builder = QueryBuilder::new(&s);

        assert!(builder.validate(&spec).is_ok());
        assert_eq!(
            builder.build(&spec, &Bindings::new()).unwrap_err(),
            OlapError::MissingParameter("genre".into())
        );

        let mut bindings = Bindings::new();
        bindings.insert("genre".into(), Scalar::from("horror"));
        let q = builder.build(&spec, &bindings).unwrap();
        assert_eq!(q.params, vec![Scalar::Text("horror".into())]);
    }

    #[test]
    fn hostile_literal_stays_a_parameter() {
        let s = schema();
        let spec = AggregationSpec::new("evil", "x")
            .group_by(Attr::new("title", "title_type"), "title_type")
            .filter(Filter::eq(Attr::new("genre", "code"), "x'; DROP TABLE dim_genre; --"))
            .measure(Measure::count("n"));
        let q = QueryBuilder::new(&s).build(&spec, &Bindings::new()).unwrap();
        assert!(!q.sql.contains("DROP"));
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn structural_errors_are_unsupported() {
        let s = schema();
        let b = QueryBuilder::new(&s);
        let is_unsupported =
            |spec: AggregationSpec| matches!(b.validate(&spec), Err(OlapError::UnsupportedSpecification(_)));

        assert!(is_unsupported(AggregationSpec::new("none", "no measures")));
        assert!(is_unsupported(
            AggregationSpec::new("bad-order", "x")
                .measure(Measure::count("n"))
                .order_by("missing", Direction::Asc)
        ));
        assert!(is_unsupported(
            AggregationSpec::new("bad-alias", "x").measure(Measure::count("n; DROP"))
        ));
        assert!(is_unsupported(
            AggregationSpec::new("dup", "x")
                .group_by(Attr::new("genre", "code"), "n")
                .measure(Measure::count("n"))
        ));
        assert!(is_unsupported(
            AggregationSpec::new("mixed", "x")
                .measure(Measure::count("n"))
                .measure(Measure::raw("rating", "r"))
        ));
        assert!(is_unsupported(
            AggregationSpec::new("pivot-two-keys", "x")
                .group_by(Attr::new("title", "decade"), "decade")
                .group_by(Attr::new("title", "title_type"), "title_type")
                .pivot_on(Attr::new("genre", "code"), "genre")
                .measure(Measure::count("n"))
        ));
        assert!(is_unsupported(
            AggregationSpec::new("pivot-unknown", "x")
                .group_by(Attr::new("title", "decade"), "decade")
                .pivot_on(Attr::new("studio", "code"), "studio")
                .measure(Measure::count("n"))
        ));
        assert!(is_unsupported(
            AggregationSpec::new("bad-measure", "x").measure(Measure::sum("budget", "b"))
        ));
    }
}
