//! Reshape raw warehouse rows into the canonical result contract.
//!
//! The catalog records one [`ResultShape`] per operation at registration
//! time; the normalizer only looks it up, it never inspects the query.

use std::collections::HashSet;
use std::sync::Arc;

use super::catalog::Catalog;
use super::types::{CanonicalResult, OlapResult, Record, ResultShape, Scalar};

/// Shapes executor rows into the [`CanonicalResult`] registered for each operation.
pub struct ResultNormalizer {
    catalog: Arc<Catalog>,
}

impl ResultNormalizer {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Normalize rows produced for `operation_id`.
    pub fn normalize(&self, operation_id: &str, raw: Vec<Record>) -> OlapResult<CanonicalResult> {
        let shape = self.catalog.shape_for(operation_id)?;
        Ok(normalize_shape(shape, raw))
    }
}

pub fn normalize_shape(shape: &ResultShape, raw: Vec<Record>) -> CanonicalResult {
    match shape {
        ResultShape::Flat { numeric } => CanonicalResult::Flat(normalize_flat(numeric, raw)),
        ResultShape::Matrix {
            row_key,
            pivot_key,
            value,
        } => pivot(row_key, pivot_key, value, &raw),
        ResultShape::Scalar { field } => {
            let value = raw
                .first()
                .and_then(|record| record.get(field))
                .map(numeric_value)
                .unwrap_or(Scalar::Null);
            CanonicalResult::Scalar(Record::new().with(field.as_str(), value))
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

/// Coerce a cell that must be numeric. Text is parsed (integer first), and
/// anything unparseable or non-finite becomes null.
pub fn numeric_value(value: &Scalar) -> Scalar {
    match value {
        Scalar::Null => Scalar::Null,
        Scalar::Integer(i) => Scalar::Integer(*i),
        Scalar::Real(r) if r.is_finite() => Scalar::Real(*r),
        Scalar::Real(_) => Scalar::Null,
        Scalar::Text(text) => {
            let text = text.trim();
            if let Ok(i) = text.parse::<i64>() {
                Scalar::Integer(i)
            } else {
                match text.parse::<f64>() {
                    Ok(r) if r.is_finite() => Scalar::Real(r),
                    _ => Scalar::Null,
                }
            }
        }
    }
}

fn normalize_flat(numeric: &[String], mut rows: Vec<Record>) -> Vec<Record> {
    if numeric.is_empty() {
        return rows;
    }
    for row in &mut rows {
        for (column, value) in row.iter_mut() {
            if numeric.iter().any(|n| n == column) {
                *value = numeric_value(value);
            }
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Pivot
// ---------------------------------------------------------------------------

/// Long-form `(row_key, pivot_key, value)` rows to one record per row key.
///
/// Phase 1 collects row keys in first-seen order and the distinct non-null
/// pivot values, sorted by label. Phase 2 builds each record with every
/// discovered column, null where the long form had no cell. Rows whose pivot
/// value is null contribute their row key but no column.
///
/// Pivot values are distinct by value, not by label: `1` and `"1"` are two
/// columns. A label that is already taken, including the row key's own
/// name, gets a `_2`, `_3`, ... suffix.
fn pivot(row_key: &str, pivot_key: &str, value_field: &str, raw: &[Record]) -> CanonicalResult {
    let mut keys: Vec<Scalar> = Vec::new();
    let mut values: Vec<Scalar> = Vec::new();
    for record in raw {
        let key = record.get(row_key).cloned().unwrap_or(Scalar::Null);
        if !keys.contains(&key) {
            keys.push(key);
        }
        if let Some(pivot_value) = record.get(pivot_key).filter(|v| !v.is_null())
            && !values.contains(pivot_value)
        {
            values.push(pivot_value.clone());
        }
    }
    values.sort_by(|a, b| {
        a.label()
            .cmp(&b.label())
            .then_with(|| kind_rank(a).cmp(&kind_rank(b)))
    });
    let columns = column_names(row_key, &values);

    let mut rows: Vec<Record> = keys
        .iter()
        .map(|key| {
            let mut record = Record::new().with(row_key, key.clone());
            for column in &columns {
                record.set(column.as_str(), Scalar::Null);
            }
            record
        })
        .collect();

    for record in raw {
        let Some(pivot_value) = record.get(pivot_key).filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(col) = values.iter().position(|v| v == pivot_value) else {
            continue;
        };
        let key = record.get(row_key).cloned().unwrap_or(Scalar::Null);
        if let Some(idx) = keys.iter().position(|k| *k == key) {
            let cell = record.get(value_field).map(numeric_value).unwrap_or(Scalar::Null);
            rows[idx].set(columns[col].as_str(), cell);
        }
    }

    CanonicalResult::Matrix {
        row_key: row_key.to_string(),
        columns,
        rows,
    }
}

fn kind_rank(value: &Scalar) -> u8 {
    match value {
        Scalar::Null => 0,
        Scalar::Integer(_) => 1,
        Scalar::Real(_) => 2,
        Scalar::Text(_) => 3,
    }
}

/// One unique column name per pivot value, never equal to `row_key`.
fn column_names(row_key: &str, values: &[Scalar]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::from([row_key.to_string()]);
    values
        .iter()
        .map(|value| {
            let base = value.label();
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }
            name
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::olap::catalog::OperationDefaults;
    use crate::olap::schema::SchemaDescriptor;
    use crate::olap::types::OlapError;

    fn matrix_shape() -> ResultShape {
        ResultShape::Matrix {
            row_key: "decade".into(),
            pivot_key: "genre".into(),
            value: "avg_rating".into(),
        }
    }

    fn long(decade: Scalar, genre: Scalar, avg: f64) -> Record {
        Record::new()
            .with("decade", decade)
            .with("genre", genre)
            .with("avg_rating", avg)
    }

    #[test]
    fn flat_coerces_numeric_text_and_drops_nan() {
        let shape = ResultShape::Flat {
            numeric: vec!["avg_rating".into(), "total_votes".into()],
        };
        let raw = vec![
            Record::new()
                .with("genre", "42")
                .with("avg_rating", "7.25")
                .with("total_votes", "150"),
            Record::new()
                .with("genre", "drama")
                .with("avg_rating", f64::NAN)
                .with("total_votes", Scalar::Null),
        ];
        let CanonicalResult::Flat(rows) = normalize_shape(&shape, raw) else {
            panic!("expected flat");
        };
        assert_eq!(rows[0].get("genre"), Some(&Scalar::from("42")));
        assert_eq!(rows[0].get("avg_rating"), Some(&Scalar::Real(7.25)));
        assert_eq!(rows[0].get("total_votes"), Some(&Scalar::Integer(150)));
        assert_eq!(rows[1].get("avg_rating"), Some(&Scalar::Null));
        assert_eq!(rows[1].get("total_votes"), Some(&Scalar::Null));
    }

    #[test]
    fn flat_preserves_order_and_empty_is_valid() {
        let shape = ResultShape::Flat { numeric: vec![] };
        let raw = vec![
            Record::new().with("k", "b"),
            Record::new().with("k", "a"),
        ];
        let CanonicalResult::Flat(rows) = normalize_shape(&shape, raw) else {
            panic!("expected flat");
        };
        assert_eq!(rows[0].get("k"), Some(&Scalar::from("b")));
        assert!(normalize_shape(&shape, vec![]).is_empty());
    }

    #[test]
    fn matrix_is_complete_without_fabricated_columns() {
        let raw = vec![
            long(1990_i64.into(), "drama".into(), 7.5),
            long(1990_i64.into(), "action".into(), 6.0),
            long(2000_i64.into(), "drama".into(), 7.0),
        ];
        let CanonicalResult::Matrix { row_key, columns, rows } =
            normalize_shape(&matrix_shape(), raw)
        else {
            panic!("expected matrix");
        };
        assert_eq!(row_key, "decade");
        assert_eq!(columns, vec!["action", "drama"]);
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.columns().collect::<Vec<_>>(), vec!["decade", "action", "drama"]);
        }
        assert_eq!(rows[0].get("action"), Some(&Scalar::Real(6.0)));
        assert_eq!(rows[1].get("action"), Some(&Scalar::Null));
        assert_eq!(rows[1].get("drama"), Some(&Scalar::Real(7.0)));
    }

    #[test]
    fn matrix_keeps_first_seen_row_order() {
        let raw = vec![
            long(2010_i64.into(), "drama".into(), 7.0),
            long(1980_i64.into(), "drama".into(), 6.0),
        ];
        let result = normalize_shape(&matrix_shape(), raw);
        let decades: Vec<_> = result.records().iter().map(|r| r.get("decade").cloned()).collect();
        assert_eq!(decades, vec![Some(Scalar::Integer(2010)), Some(Scalar::Integer(1980))]);
    }

    #[test]
    fn null_pivot_values_do_not_become_columns() {
        let raw = vec![
            long(Scalar::Null, "drama".into(), 5.0),
            long(1990_i64.into(), Scalar::Null, 9.0),
        ];
        let CanonicalResult::Matrix { columns, rows, .. } = normalize_shape(&matrix_shape(), raw)
        else {
            panic!("expected matrix");
        };
        assert_eq!(columns, vec!["drama"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("decade"), Some(&Scalar::Null));
        assert_eq!(rows[1].get("drama"), Some(&Scalar::Null));
    }

    #[test]
    fn pivot_value_named_like_row_key_keeps_row_key() {
        let raw = vec![
            long(1990_i64.into(), "decade".into(), 7.5),
            long(2000_i64.into(), "drama".into(), 6.0),
        ];
        let CanonicalResult::Matrix { columns, rows, .. } = normalize_shape(&matrix_shape(), raw)
        else {
            panic!("expected matrix");
        };
        assert_eq!(columns, vec!["decade_2", "drama"]);
        assert_eq!(rows[0].get("decade"), Some(&Scalar::Integer(1990)));
        assert_eq!(rows[0].get("decade_2"), Some(&Scalar::Real(7.5)));
        assert_eq!(rows[1].get("decade"), Some(&Scalar::Integer(2000)));
        assert_eq!(rows[1].get("drama"), Some(&Scalar::Real(6.0)));
        assert_eq!(rows[1].get("decade_2"), Some(&Scalar::Null));
    }

    #[test]
    fn pivot_values_with_equal_labels_stay_separate() {
        let raw = vec![
            long(1990_i64.into(), Scalar::Text("1".into()), 3.0),
            long(1990_i64.into(), Scalar::Integer(1), 8.0),
        ];
        let CanonicalResult::Matrix { columns, rows, .. } = normalize_shape(&matrix_shape(), raw)
        else {
            panic!("expected matrix");
        };
        assert_eq!(columns, vec!["1", "1_2"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("1"), Some(&Scalar::Real(8.0)));
        assert_eq!(rows[0].get("1_2"), Some(&Scalar::Real(3.0)));
    }

    #[test]
    fn empty_matrix() {
        let result = normalize_shape(&matrix_shape(), vec![]);
        assert!(result.is_empty());
        assert_eq!(result.to_json(), serde_json::json!([]));
    }

    #[test]
    fn scalar_handles_missing_null_and_zero() {
        let shape = ResultShape::Scalar {
            field: "correlation".into(),
        };
        let missing = normalize_shape(&shape, vec![]);
        assert_eq!(missing.to_json(), serde_json::json!({"correlation": null}));

        let nan = normalize_shape(&shape, vec![Record::new().with("correlation", f64::NAN)]);
        assert!(nan.is_empty());

        let zero = normalize_shape(&shape, vec![Record::new().with("correlation", 0.0)]);
        assert_eq!(zero.to_json(), serde_json::json!({"correlation": 0.0}));
        assert!(!zero.is_empty());
    }

    #[test]
    fn normalizer_uses_catalog_shapes() {
        let schema = Arc::new(SchemaDescriptor::warehouse("dwh").unwrap());
        let catalog = Arc::new(Catalog::standard(schema, &OperationDefaults::default()).unwrap());
        let normalizer = ResultNormalizer::new(catalog);

        let result = normalizer.normalize("popularity", vec![]).unwrap();
        assert_eq!(result.shape_name(), "matrix");
        let result = normalizer.normalize("correlation", vec![]).unwrap();
        assert_eq!(result.shape_name(), "scalar");
        let err = normalizer.normalize("nonexistent", vec![]).unwrap_err();
        assert!(matches!(err, OlapError::UnknownOperation(_)));
    }
}
