//! Shared types for the OLAP dispatcher.
//!
//! Errors, scalar values, ordered records and the canonical result contract
//! handed to the rendering layer all live here so every stage of the
//! pipeline (catalog, builder, executor, normalizer) speaks the same types.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failure raised anywhere between catalog lookup and normalization.
///
/// Each variant maps to a stable [`ErrorKind`] so the transport boundary can
/// pick a status code without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OlapError {
    /// The operation id is not registered in the catalog.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    /// A parameterized filter was dispatched without a binding.
    #[error("missing value for parameter '{0}'")]
    MissingParameter(String),
    /// The specification references something the schema does not know.
    #[error("unsupported specification: {0}")]
    UnsupportedSpecification(String),
    /// Connectivity or SQL failure reported by the warehouse driver.
    #[error("warehouse query failed: {0}")]
    Execution(String),
}

/// Stable, machine-readable error category.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownOperation,
    MissingParameter,
    UnsupportedSpecification,
    ExecutionError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOperation => write!(f, "unknown_operation"),
            Self::MissingParameter => write!(f, "missing_parameter"),
            Self::UnsupportedSpecification => write!(f, "unsupported_specification"),
            Self::ExecutionError => write!(f, "execution_error"),
        }
    }
}

impl OlapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Self::MissingParameter(_) => ErrorKind::MissingParameter,
            Self::UnsupportedSpecification(_) => ErrorKind::UnsupportedSpecification,
            Self::Execution(_) => ErrorKind::ExecutionError,
        }
    }

    /// True when the caller, not the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnknownOperation | ErrorKind::MissingParameter
        )
    }

    /// HTTP status a transport layer should answer with.
    pub fn http_status(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }

    /// Execution failures are transient; everything else will fail again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExecutionError
    }
}

impl From<rusqlite::Error> for OlapError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Execution(err.to_string())
    }
}

/// Convenience alias.
pub type OlapResult<T> = std::result::Result<T, OlapError>;

// ---------------------------------------------------------------------------
// Scalar values
// ---------------------------------------------------------------------------

/// A single cell as read from (or bound into) the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value. Text is not parsed here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as a label (pivot column names, chart categories).
    pub fn label(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub(crate) fn to_sql_value(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value;
        match self {
            Self::Null => Value::Null,
            Self::Integer(i) => Value::Integer(*i),
            Self::Real(r) => Value::Real(*r),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }

    pub(crate) fn from_value_ref(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(r) => Self::Real(r),
            ValueRef::Text(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
            // Binary columns never appear in the star schema; surface them as text.
            ValueRef::Blob(bytes) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(i) => serializer.serialize_i64(*i),
            // serde_json would otherwise refuse NaN; the normalizer already
            // maps non-finite values to null, this is the last line.
            Self::Real(r) if !r.is_finite() => serializer.serialize_none(),
            Self::Real(r) => serializer.serialize_f64(*r),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row: column name → scalar, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Scalar)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy in tests and fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Insert or replace a column, keeping the original position on replace.
    pub fn set(&mut self, column: impl Into<String>, value: Scalar) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Scalar)> {
        self.fields
            .iter_mut()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Named values for parameterized filters.
pub type Bindings = BTreeMap<String, Scalar>;

// ---------------------------------------------------------------------------
// Result shape and canonical result
// ---------------------------------------------------------------------------

/// How raw rows must be reshaped before they reach the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultShape {
    /// Rows pass through; `numeric` lists columns that must be numbers.
    Flat { numeric: Vec<String> },
    /// Long-form rows (row key, pivot value, measure) become a wide matrix.
    Matrix {
        row_key: String,
        pivot_key: String,
        value: String,
    },
    /// A single statistic.
    Scalar { field: String },
}

/// Canonical chart-input contract consumed by the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalResult {
    /// Ordered homogeneous records.
    Flat(Vec<Record>),
    /// One record per row key, one column per discovered pivot value.
    Matrix {
        row_key: String,
        columns: Vec<String>,
        rows: Vec<Record>,
    },
    /// A single one-field record.
    Scalar(Record),
}

impl CanonicalResult {
    /// Short name of the shape, used in logs and CLI metadata.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Flat(_) => "flat",
            Self::Matrix { .. } => "matrix",
            Self::Scalar(_) => "scalar",
        }
    }

    /// Number of records; a scalar counts as one.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Flat(rows) => rows.len(),
            Self::Matrix { rows, .. } => rows.len(),
            Self::Scalar(_) => 1,
        }
    }

    /// True when there is nothing to chart. A null statistic counts as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flat(rows) => rows.is_empty(),
            Self::Matrix { rows, .. } => rows.is_empty(),
            Self::Scalar(record) => record.iter().all(|(_, value)| value.is_null()),
        }
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Self::Flat(rows) => rows,
            Self::Matrix { rows, .. } => rows,
            Self::Scalar(record) => std::slice::from_ref(record),
        }
    }

    /// JSON value in the wire shape (array for flat/matrix, object for scalar).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for CanonicalResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Flat(rows) => rows.serialize(serializer),
            Self::Matrix { rows, .. } => rows.serialize(serializer),
            Self::Scalar(record) => record.serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
