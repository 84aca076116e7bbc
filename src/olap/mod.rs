//! OLAP operation dispatcher over the title-rating star schema.
//!
//! A caller names an operation (`roll-up`, `drill-down`, `slice`, `dice`,
//! `pivot`, `correlation`); the dispatcher looks up its aggregation spec,
//! builds parameterized SQL, runs it on a pooled warehouse connection and
//! hands back a canonical result ready for charting.
//!
//! # Module structure
//!
//! - [`types`]: error type, scalar values, records, canonical result
//! - [`schema`]: fact, dimensions, bridges and the derived decade attribute
//! - [`catalog`]: registry of aggregation specs and the built-in operations
//! - [`builder`]: spec → SQL text plus bound parameters
//! - [`executor`]: connection pool with the warehouse attached read-only
//! - [`stats`]: Pearson accumulator behind the `corr` aggregate
//! - [`normalize`]: raw rows → flat, matrix or scalar result
//! - [`chart`]: canonical result → renderer-agnostic chart input
//! - [`dispatch`]: composes all of the above
//! - [`validate`]: warehouse invariant checks

pub mod builder;
pub mod catalog;
pub mod chart;
pub mod dispatch;
pub mod executor;
pub mod normalize;
pub mod schema;
pub mod stats;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_fixture;

pub use builder::{BuiltQuery, QueryBuilder};
pub use catalog::{AggregationSpec, Catalog, OperationDefaults};
pub use chart::{ChartInput, ChartKind};
pub use dispatch::Dispatcher;
pub use executor::WarehousePool;
pub use normalize::ResultNormalizer;
pub use schema::SchemaDescriptor;
pub use types::{
    Bindings, CanonicalResult, ErrorKind, OlapError, OlapResult, Record, ResultShape, Scalar,
};
pub use validate::{Severity, ValidationReport};
