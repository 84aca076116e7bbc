//! Dispatcher: operation id in, canonical result out.
//!
//! Composes catalog lookup, query building, execution and normalization.
//! Errors from any stage propagate unchanged. The dispatcher is `Send +
//! Sync`; concurrent calls share the immutable catalog and the pool.

use std::sync::Arc;
use std::time::Instant;

use super::builder::{BuiltQuery, QueryBuilder};
use super::catalog::Catalog;
use super::chart::ChartInput;
use super::executor::WarehousePool;
use super::normalize::ResultNormalizer;
use super::schema::SchemaDescriptor;
use super::types::{Bindings, CanonicalResult, OlapResult};
use super::validate::{ValidationReport, run_validation};
use crate::config::OlapConfig;

/// Runs catalog operations end to end: build, execute, normalize.
pub struct Dispatcher {
    catalog: Arc<Catalog>,
    pool: Arc<WarehousePool>,
    normalizer: ResultNormalizer,
}

impl Dispatcher {
    pub fn new(catalog: Arc<Catalog>, pool: Arc<WarehousePool>) -> Self {
        let normalizer = ResultNormalizer::new(Arc::clone(&catalog));
        Self {
            catalog,
            pool,
            normalizer,
        }
    }

    /// Standard schema and catalog over the configured warehouse.
    pub fn open(config: &OlapConfig) -> OlapResult<Self> {
        let schema = Arc::new(SchemaDescriptor::warehouse(&config.warehouse.schema)?);
        let catalog = Catalog::standard(schema, &config.operations)?;
        let pool = WarehousePool::open(&config.warehouse)?;
        Ok(Self::new(Arc::new(catalog), Arc::new(pool)))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &WarehousePool {
        &self.pool
    }

    pub fn run(&self, operation_id: &str) -> OlapResult<CanonicalResult> {
        self.run_with(operation_id, &Bindings::new())
    }

    /// Run with values for parameterized filters.
    pub fn run_with(&self, operation_id: &str, bindings: &Bindings) -> OlapResult<CanonicalResult> {
        let started = Instant::now();
        let query = self.explain_with(operation_id, bindings)?;
        let raw = self.pool.execute(&query)?;
        let result = self.normalizer.normalize(&query.operation, raw)?;
        tracing::info!(
            operation = %query.operation,
            requested = operation_id,
            shape = result.shape_name(),
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "operation dispatched"
        );
        Ok(result)
    }

    /// Run and convert to chart input using the operation's presentation.
    pub fn chart(&self, operation_id: &str) -> OlapResult<ChartInput> {
        let spec = self.catalog.specification_for(operation_id)?;
        let result = self.run(operation_id)?;
        Ok(ChartInput::from_result(&spec.presentation, &result))
    }

    /// The query `run` would execute, without executing it.
    pub fn explain(&self, operation_id: &str) -> OlapResult<BuiltQuery> {
        self.explain_with(operation_id, &Bindings::new())
    }

    pub fn explain_with(&self, operation_id: &str, bindings: &Bindings) -> OlapResult<BuiltQuery> {
        let spec = self.catalog.specification_for(operation_id)?;
        QueryBuilder::new(self.catalog.schema()).build(&spec, bindings)
    }

    /// Check the warehouse against the data model's invariants.
    pub fn validate_warehouse(&self) -> OlapResult<ValidationReport> {
        self.pool
            .with_connection(|conn| Ok(run_validation(conn, self.catalog.schema())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
