//! Execution adapter: a small blocking pool of SQLite connections.
//!
//! Every pooled connection is an in-memory session that attaches the
//! warehouse file under the configured schema name, so built SQL can qualify
//! tables as `dwh.fact_title_rating` regardless of which file is mounted.
//! Sessions are `query_only` and carry the `corr` aggregate.
//!
//! Connections are opened lazily up to `max_connections`. A caller that
//! finds none idle waits on a condvar until one is returned or the acquire
//! timeout elapses. The checkout guard returns its connection on drop, so a
//! failing query never leaks one.

use std::ops::Deref;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;

use super::builder::BuiltQuery;
use super::schema::is_identifier;
use super::stats;
use super::types::{OlapError, OlapResult, Record, Scalar};
use crate::config::WarehouseConfig;

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// Shared by every request; the only mutable state in the dispatcher.
#[derive(Debug)]
pub struct WarehousePool {
    config: WarehouseConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A connection checked out of the pool. Returned on drop.
pub struct PooledConnection<'a> {
    pool: &'a WarehousePool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in `drop`.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection already returned"))
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
}

impl WarehousePool {
    /// Validate the configuration and make sure the warehouse file exists.
    /// No connection is opened yet.
    pub fn open(config: &WarehouseConfig) -> OlapResult<Self> {
        if !is_identifier(&config.schema) {
            return Err(OlapError::Execution(format!(
                "invalid warehouse schema name '{}'",
                config.schema
            )));
        }
        if config.max_connections == 0 {
            return Err(OlapError::Execution(
                "warehouse pool needs at least one connection".into(),
            ));
        }
        if !config.path.is_file() {
            return Err(OlapError::Execution(format!(
                "warehouse database not found at {}",
                config.path.display()
            )));
        }
        tracing::debug!(
            path = %config.path.display(),
            schema = %config.schema,
            max_connections = config.max_connections,
            "warehouse pool ready"
        );
        Ok(Self {
            config: config.clone(),
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        })
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            open: state.open,
            idle: state.idle.len(),
        }
    }

    /// Check a connection out, blocking up to the acquire timeout.
    pub fn checkout(&self) -> OlapResult<PooledConnection<'_>> {
        let deadline = Instant::now() + self.config.acquire_timeout();
        let mut state = self.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(self.guard(conn));
            }
            if state.open < self.config.max_connections {
                state.open += 1;
                drop(state);
                return match self.connect() {
                    Ok(conn) => Ok(self.guard(conn)),
                    Err(err) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        Err(err)
                    }
                };
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                if let Some(conn) = state.idle.pop() {
                    return Ok(self.guard(conn));
                }
                return Err(OlapError::Execution(format!(
                    "timed out after {} ms waiting for a warehouse connection",
                    self.config.acquire_timeout_ms
                )));
            }
        }
    }

    /// Run `f` with a checked-out connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> OlapResult<T>,
    ) -> OlapResult<T> {
        let conn = self.checkout()?;
        f(&conn)
    }

    /// Run a built query and read every row into ordered records.
    pub fn execute(&self, query: &BuiltQuery) -> OlapResult<Vec<Record>> {
        let started = Instant::now();
        let result = self.with_connection(|conn| read_rows(conn, query));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(rows) => tracing::debug!(
                operation = %query.operation,
                rows = rows.len(),
                elapsed_ms,
                "warehouse query finished"
            ),
            Err(err) => tracing::warn!(
                operation = %query.operation,
                elapsed_ms,
                error = %err,
                "warehouse query failed"
            ),
        }
        result
    }

    fn guard(&self, conn: Connection) -> PooledConnection<'_> {
        PooledConnection {
            pool: self,
            conn: Some(conn),
        }
    }

    fn release(&self, conn: Connection) {
        self.state.lock().idle.push(conn);
        self.available.notify_one();
    }

    fn connect(&self) -> OlapResult<Connection> {
        let conn = Connection::open_in_memory()?;
        stats::register_functions(&conn)?;
        prepare_session(&conn, &self.config)?;
        tracing::debug!(schema = %self.config.schema, "opened warehouse connection");
        Ok(conn)
    }
}

/// Attach the warehouse under the schema name unless the session already
/// has it, then lock the session to read-only statements.
pub(crate) fn prepare_session(conn: &Connection, config: &WarehouseConfig) -> OlapResult<()> {
    if !is_attached(conn, &config.schema)? {
        let path = config.path.to_string_lossy().into_owned();
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", config.schema),
            [path.as_str()],
        )?;
    }
    conn.pragma_update(None, "query_only", true)?;
    Ok(())
}

fn is_attached(conn: &Connection, schema: &str) -> OlapResult<bool> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name?.eq_ignore_ascii_case(schema) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn read_rows(conn: &Connection, query: &BuiltQuery) -> OlapResult<Vec<Record>> {
    let mut stmt = conn.prepare(&query.sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let params: Vec<rusqlite::types::Value> =
        query.params.iter().map(Scalar::to_sql_value).collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, column) in columns.iter().enumerate() {
            record.set(column.as_str(), Scalar::from_value_ref(row.get_ref(idx)?));
        }
        records.push(record);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
