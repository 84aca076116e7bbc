//! Statistical aggregates.
//!
//! SQLite has no `CORR`, so the executor registers [`CorrAggregate`] as a
//! two-argument `corr(x, y)` aggregate on every pooled connection. Pairs with
//! a NULL on either side are skipped. An undefined coefficient (fewer than
//! two pairs, or zero variance on either side) is NULL, never 0 or NaN.

use rusqlite::Connection;
use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::ValueRef;

/// Streaming Pearson correlation (Welford-style co-moments).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PearsonAccumulator {
    n: u64,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    c_xy: f64,
}

impl PearsonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64, y: f64) {
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        self.mean_x += dx / n;
        let dy = y - self.mean_y;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.c_xy += dx * (y - self.mean_y);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    /// The coefficient, or `None` when it is undefined.
    pub fn value(&self) -> Option<f64> {
        if self.n < 2 || self.m2_x <= 0.0 || self.m2_y <= 0.0 {
            return None;
        }
        let r = self.c_xy / (self.m2_x * self.m2_y).sqrt();
        r.is_finite().then(|| r.clamp(-1.0, 1.0))
    }
}

/// Pearson correlation of two equally long series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let mut acc = PearsonAccumulator::new();
    for (x, y) in xs.iter().zip(ys) {
        acc.push(*x, *y);
    }
    acc.value()
}

fn numeric_arg(ctx: &Context<'_>, idx: usize) -> Option<f64> {
    match ctx.get_raw(idx) {
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(r) => Some(r),
        ValueRef::Text(t) => std::str::from_utf8(t).ok()?.trim().parse().ok(),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

/// `corr(x, y)` for SQLite.
pub struct CorrAggregate;

impl Aggregate<PearsonAccumulator, Option<f64>> for CorrAggregate {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<PearsonAccumulator> {
        Ok(PearsonAccumulator::new())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut PearsonAccumulator) -> rusqlite::Result<()> {
        if let (Some(x), Some(y)) = (numeric_arg(ctx, 0), numeric_arg(ctx, 1)) {
            acc.push(x, y);
        }
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        acc: Option<PearsonAccumulator>,
    ) -> rusqlite::Result<Option<f64>> {
        Ok(acc.and_then(|a| a.value()))
    }
}

/// Register the statistical functions on `conn`.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_aggregate_function(
        "corr",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        CorrAggregate,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
