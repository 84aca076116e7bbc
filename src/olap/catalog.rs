//! Operation catalog.
//!
//! Each OLAP operation is an immutable [`AggregationSpec`] registered under
//! an identifier. Adding an operation means registering another spec; the
//! dispatcher never branches on operation names.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::builder::QueryBuilder;
use super::chart::{ChartKind, Presentation, SeriesSpec};
use super::schema::{Attr, SchemaDescriptor};
use super::types::{OlapError, OlapResult, ResultShape, Scalar};

// ---------------------------------------------------------------------------
// Specification building blocks
// ---------------------------------------------------------------------------

/// A dimension attribute projected into the output under `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    pub attr: Attr,
    pub alias: String,
}

impl OutputColumn {
    pub fn new(attr: Attr, alias: impl Into<String>) -> Self {
        Self {
            attr,
            alias: alias.into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ge,
    NotNull,
}

/// Right-hand side of a filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Fixed at registration time.
    Constant(Scalar),
    /// Supplied per request through [`Bindings`](super::types::Bindings).
    Parameter(String),
}

/// One conjunct of the WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub attr: Attr,
    pub op: FilterOp,
    pub value: Option<FilterValue>,
}

impl Filter {
    pub fn eq(attr: Attr, value: impl Into<Scalar>) -> Self {
        Self {
            attr,
            op: FilterOp::Eq,
            value: Some(FilterValue::Constant(value.into())),
        }
    }

    pub fn ge(attr: Attr, value: impl Into<Scalar>) -> Self {
        Self {
            attr,
            op: FilterOp::Ge,
            value: Some(FilterValue::Constant(value.into())),
        }
    }

    pub fn not_null(attr: Attr) -> Self {
        Self {
            attr,
            op: FilterOp::NotNull,
            value: None,
        }
    }

    /// Equality against a named request parameter.
    pub fn eq_param(attr: Attr, parameter: impl Into<String>) -> Self {
        Self {
            attr,
            op: FilterOp::Eq,
            value: Some(FilterValue::Parameter(parameter.into())),
        }
    }
}

/// Aggregate (or raw projection) over fact measures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasureExpr {
    /// Average, optionally rounded to `round` decimals in SQL.
    Avg { measure: String, round: Option<u32> },
    Sum { measure: String },
    CountAll,
    /// Pearson correlation of two measures.
    Corr { x: String, y: String },
    /// Unaggregated value, for detail rows.
    Raw { measure: String },
}

impl MeasureExpr {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Self::Raw { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub alias: String,
    pub expr: MeasureExpr,
}

impl Measure {
    /// Average rounded to two decimals; rounding happens before ordering.
    pub fn avg_rounded(measure: &str, alias: &str) -> Self {
        Self {
            alias: alias.into(),
            expr: MeasureExpr::Avg {
                measure: measure.into(),
                round: Some(2),
            },
        }
    }

    pub fn sum(measure: &str, alias: &str) -> Self {
        Self {
            alias: alias.into(),
            expr: MeasureExpr::Sum {
                measure: measure.into(),
            },
        }
    }

    pub fn count(alias: &str) -> Self {
        Self {
            alias: alias.into(),
            expr: MeasureExpr::CountAll,
        }
    }

    pub fn corr(x: &str, y: &str, alias: &str) -> Self {
        Self {
            alias: alias.into(),
            expr: MeasureExpr::Corr {
                x: x.into(),
                y: y.into(),
            },
        }
    }

    pub fn raw(measure: &str, alias: &str) -> Self {
        Self {
            alias: alias.into(),
            expr: MeasureExpr::Raw {
                measure: measure.into(),
            },
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// Ordering on an output column alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub direction: Direction,
}

/// Attribute whose distinct values become output columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotAxis {
    pub attr: Attr,
    /// Column name of the pivot value in the long-form aggregate.
    pub alias: String,
}

// ---------------------------------------------------------------------------
// AggregationSpec
// ---------------------------------------------------------------------------

/// Everything needed to compute one operation. Immutable once registered.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub id: String,
    pub description: String,
    /// GROUP BY keys, in order. For a pivot, the first key is the row key.
    pub grouping: Vec<OutputColumn>,
    /// Ungrouped attributes projected alongside raw measures.
    pub details: Vec<OutputColumn>,
    pub filters: Vec<Filter>,
    pub measures: Vec<Measure>,
    pub ordering: Vec<OrderKey>,
    pub pivot: Option<PivotAxis>,
    pub limit: Option<u32>,
    pub presentation: Presentation,
}

impl AggregationSpec {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            grouping: Vec::new(),
            details: Vec::new(),
            filters: Vec::new(),
            measures: Vec::new(),
            ordering: Vec::new(),
            pivot: None,
            limit: None,
            presentation: Presentation::default(),
        }
    }

    pub fn group_by(mut self, attr: Attr, alias: &str) -> Self {
        self.grouping.push(OutputColumn::new(attr, alias));
        self
    }

    pub fn detail(mut self, attr: Attr, alias: &str) -> Self {
        self.details.push(OutputColumn::new(attr, alias));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.ordering.push(OrderKey {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn pivot_on(mut self, attr: Attr, alias: &str) -> Self {
        self.pivot = Some(PivotAxis {
            attr,
            alias: alias.into(),
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = presentation;
        self
    }

    /// Names of request parameters referenced by filters.
    pub fn parameters(&self) -> Vec<&str> {
        self.filters
            .iter()
            .filter_map(|f| match &f.value {
                Some(FilterValue::Parameter(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Dimensions referenced by grouping, details, filters or the pivot axis.
    pub fn referenced_dimensions(&self) -> Vec<&str> {
        let mut dims: Vec<&str> = Vec::new();
        let attrs = self
            .grouping
            .iter()
            .chain(&self.details)
            .map(|c| &c.attr)
            .chain(self.filters.iter().map(|f| &f.attr))
            .chain(self.pivot.iter().map(|p| &p.attr));
        for attr in attrs {
            if !dims.contains(&attr.dimension.as_str()) {
                dims.push(&attr.dimension);
            }
        }
        dims
    }
}

// ---------------------------------------------------------------------------
// Configuration constants for the built-in operations
// ---------------------------------------------------------------------------

/// Literal values the built-in slice and dice operations fix on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationDefaults {
    pub slice_genre: String,
    pub dice_genre: String,
    pub dice_region: String,
    pub dice_min_year: i64,
    pub dice_limit: u32,
}

impl Default for OperationDefaults {
    fn default() -> Self {
        Self {
            slice_genre: "drama".into(),
            dice_genre: "comedy".into(),
            dice_region: "us".into(),
            dice_min_year: 2015,
            dice_limit: 20,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Registered {
    spec: Arc<AggregationSpec>,
    shape: ResultShape,
}

/// Registry of operation specs, immutable after startup and shared
/// read-only across requests.
#[derive(Debug)]
pub struct Catalog {
    schema: Arc<SchemaDescriptor>,
    entries: HashMap<String, Registered>,
    aliases: HashMap<String, String>,
    order: Vec<String>,
}

impl Catalog {
    pub fn new(schema: Arc<SchemaDescriptor>) -> Self {
        Self {
            schema,
            entries: HashMap::new(),
            aliases: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The six built-in operations plus the legacy identifiers.
    pub fn standard(
        schema: Arc<SchemaDescriptor>,
        defaults: &OperationDefaults,
    ) -> OlapResult<Self> {
        let mut catalog = Self::new(schema);
        for spec in standard_specs(defaults) {
            catalog.register(spec)?;
        }
        catalog.alias("rollup", "roll-up")?;
        catalog.alias("drilldown", "drill-down")?;
        catalog.alias("popularity", "pivot")?;
        Ok(catalog)
    }

    /// Validate `spec` against the schema and add it.
    pub fn register(&mut self, spec: AggregationSpec) -> OlapResult<()> {
        if self.entries.contains_key(&spec.id) || self.aliases.contains_key(&spec.id) {
            return Err(OlapError::UnsupportedSpecification(format!(
                "operation '{}' registered twice",
                spec.id
            )));
        }
        let shape = QueryBuilder::new(&self.schema).validate(&spec)?;
        tracing::debug!(operation = %spec.id, ?shape, "registered operation");
        self.order.push(spec.id.clone());
        self.entries.insert(
            spec.id.clone(),
            Registered {
                spec: Arc::new(spec),
                shape,
            },
        );
        Ok(())
    }

    /// Register an alternative identifier for an existing operation.
    pub fn alias(&mut self, alias: &str, target: &str) -> OlapResult<()> {
        if !self.entries.contains_key(target) {
            return Err(OlapError::UnknownOperation(target.into()));
        }
        if self.entries.contains_key(alias) || self.aliases.contains_key(alias) {
            return Err(OlapError::UnsupportedSpecification(format!(
                "alias '{alias}' already taken"
            )));
        }
        self.aliases.insert(alias.into(), target.into());
        Ok(())
    }

    /// Canonical id for `id`, following aliases.
    pub fn canonical_id<'a>(&'a self, id: &'a str) -> OlapResult<&'a str> {
        if self.entries.contains_key(id) {
            return Ok(id);
        }
        self.aliases
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| OlapError::UnknownOperation(id.into()))
    }

    pub fn specification_for(&self, id: &str) -> OlapResult<Arc<AggregationSpec>> {
        let id = self.canonical_id(id)?;
        Ok(Arc::clone(&self.entries[id].spec))
    }

    pub fn shape_for(&self, id: &str) -> OlapResult<&ResultShape> {
        let id = self.canonical_id(id)?;
        Ok(&self.entries[id].shape)
    }

    /// Registered specs in registration order.
    pub fn specs(&self) -> impl Iterator<Item = &Arc<AggregationSpec>> {
        self.order.iter().map(|id| &self.entries[id].spec)
    }

    /// Aliases pointing at `id`.
    pub fn aliases_of(&self, id: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(_, target)| target.as_str() == id)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Specs for roll-up, drill-down, slice, dice, pivot and correlation.
pub fn standard_specs(defaults: &OperationDefaults) -> Vec<AggregationSpec> {
    let genre = || Attr::new("genre", "code");
    let decade = || Attr::new("title", "decade");
    let start_year = || Attr::new("title", "start_year");

    let rollup = AggregationSpec::new("roll-up", "Average Rating per Genre (ROLL-UP)")
        .group_by(genre(), "genre")
        .measure(Measure::avg_rounded("rating", "avg_rating"))
        .measure(Measure::sum("votes", "total_votes"))
        .order_by("avg_rating", Direction::Desc)
        .order_by("genre", Direction::Asc)
        .presentation(
            Presentation::new(ChartKind::Bar, "Average Rating per Genre (ROLL-UP)", "genre")
                .series(SeriesSpec::field("avg_rating", "Average Rating"))
                .y_range(0.0, 10.0),
        );

    let drilldown = AggregationSpec::new("drill-down", "Ratings by Decade (DRILL-DOWN)")
        .group_by(decade(), "decade")
        .group_by(genre(), "genre")
        .filter(Filter::not_null(start_year()))
        .measure(Measure::avg_rounded("rating", "avg_rating"))
        .order_by("decade", Direction::Asc)
        .order_by("avg_rating", Direction::Desc)
        .order_by("genre", Direction::Asc)
        .presentation(
            Presentation::new(
                ChartKind::Line,
                "Average Ratings by Decade (Top Genres, DRILL-DOWN)",
                "decade",
            )
            .label_suffix("s")
            .series(SeriesSpec::SplitBy {
                series: "genre".into(),
                value: "avg_rating".into(),
                top: 8,
            })
            .y_range(0.0, 10.0),
        );

    let slice_title = format!(
        "{} Ratings by Title Type (SLICE)",
        capitalize(&defaults.slice_genre)
    );
    let slice = AggregationSpec::new(
        "slice",
        &format!("{} Title Types (SLICE)", capitalize(&defaults.slice_genre)),
    )
    .group_by(Attr::new("title", "title_type"), "title_type")
    .filter(Filter::eq(genre(), defaults.slice_genre.as_str()))
    .measure(Measure::avg_rounded("rating", "avg_rating"))
    .measure(Measure::count("total_titles"))
    .order_by("avg_rating", Direction::Desc)
    .order_by("title_type", Direction::Asc)
    .presentation(
        Presentation::new(ChartKind::Pie, &slice_title, "title_type")
            .series(SeriesSpec::field("avg_rating", "Average Rating")),
    );

    let dice_genre = capitalize(&defaults.dice_genre);
    let dice_region = defaults.dice_region.to_uppercase();
    let dice = AggregationSpec::new(
        "dice",
        &format!("{dice_genre} in {dice_region} (DICE)"),
    )
    .detail(Attr::new("title", "primary_title"), "primary_title")
    .detail(start_year(), "start_year")
    .filter(Filter::eq(genre(), defaults.dice_genre.as_str()))
    .filter(Filter::eq(
        Attr::new("region", "code"),
        defaults.dice_region.as_str(),
    ))
    .filter(Filter::ge(start_year(), defaults.dice_min_year))
    .measure(Measure::raw("rating", "average_rating"))
    .measure(Measure::raw("votes", "num_votes"))
    .order_by("average_rating", Direction::Desc)
    .order_by("primary_title", Direction::Asc)
    .limit(defaults.dice_limit)
    .presentation(
        Presentation::new(
            ChartKind::HorizontalBar,
            &format!(
                "{dice_genre} Titles in {dice_region} ({}–Present) (DICE)",
                defaults.dice_min_year
            ),
            "primary_title",
        )
        .series(SeriesSpec::field(
            "average_rating",
            &format!(
                "Average Rating ({dice_genre}, {dice_region}, {}+)",
                defaults.dice_min_year
            ),
        )),
    );

    let pivot = AggregationSpec::new("pivot", "Average Ratings per Genre by Decade (PIVOT)")
        .group_by(decade(), "decade")
        .pivot_on(genre(), "genre")
        .measure(Measure::avg_rounded("rating", "avg_rating"))
        .order_by("decade", Direction::Asc)
        .presentation(
            Presentation::new(
                ChartKind::GroupedBar,
                "Average Ratings per Genre by Decade (PIVOT)",
                "decade",
            )
            .label_suffix("s")
            .series(SeriesSpec::PivotColumns)
            .y_range(0.0, 10.0),
        );

    let correlation = AggregationSpec::new("correlation", "Rating vs Votes (STATISTICAL)")
        .measure(Measure::corr("rating", "votes", "correlation"))
        .presentation(
            Presentation::new(ChartKind::Statistic, "Rating vs Votes (STATISTICAL)", "")
                .series(SeriesSpec::field("correlation", "Pearson correlation")),
        );

    vec![rollup, drilldown, slice, dice, pivot, correlation]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
