//! Chart input for the rendering layer.
//!
//! Turns a [`CanonicalResult`] into renderer-agnostic series data: category
//! labels plus one or more datasets of nullable numbers. The renderer picks
//! colors and styling; this module only decides what is plotted.

use serde::Serialize;

use super::types::{CanonicalResult, Record, Scalar};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[default]
    Bar,
    HorizontalBar,
    Line,
    Pie,
    GroupedBar,
    /// A single number, no axes.
    Statistic,
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bar => write!(f, "bar"),
            Self::HorizontalBar => write!(f, "horizontal_bar"),
            Self::Line => write!(f, "line"),
            Self::Pie => write!(f, "pie"),
            Self::GroupedBar => write!(f, "grouped_bar"),
            Self::Statistic => write!(f, "statistic"),
        }
    }
}

/// One plotted column and its legend label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesField {
    pub field: String,
    pub label: String,
}

/// Where the datasets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSpec {
    /// One dataset per listed column.
    Fields(Vec<SeriesField>),
    /// Long-form rows split into one dataset per distinct `series` value,
    /// keeping the `top` series with the highest mean `value`.
    SplitBy {
        series: String,
        value: String,
        top: usize,
    },
    /// One dataset per discovered pivot column of a matrix result.
    PivotColumns,
}

impl SeriesSpec {
    pub fn field(field: &str, label: &str) -> Self {
        Self::Fields(vec![SeriesField {
            field: field.into(),
            label: label.into(),
        }])
    }
}

impl Default for SeriesSpec {
    fn default() -> Self {
        Self::Fields(Vec::new())
    }
}

/// Presentation hints attached to an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presentation {
    pub chart: ChartKind,
    pub title: String,
    /// Column providing category labels.
    pub label_field: String,
    /// Appended to every label (`1990` → `1990s`).
    pub label_suffix: Option<String>,
    pub series: SeriesSpec,
    pub y_range: Option<(f64, f64)>,
}

impl Presentation {
    pub fn new(chart: ChartKind, title: &str, label_field: &str) -> Self {
        Self {
            chart,
            title: title.into(),
            label_field: label_field.into(),
            ..Default::default()
        }
    }

    pub fn label_suffix(mut self, suffix: &str) -> Self {
        self.label_suffix = Some(suffix.into());
        self
    }

    pub fn series(mut self, series: SeriesSpec) -> Self {
        self.series = series;
        self
    }

    pub fn y_range(mut self, min: f64, max: f64) -> Self {
        self.y_range = Some((min, max));
        self
    }

    fn label_for(&self, value: Option<&Scalar>) -> String {
        match value {
            None | Some(Scalar::Null) => "Unknown".into(),
            Some(v) => match &self.label_suffix {
                Some(suffix) => format!("{}{suffix}", v.label()),
                None => v.label(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// What the renderer draws.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartInput {
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_range: Option<(f64, f64)>,
    /// True when there is no data to show.
    pub empty: bool,
}

impl ChartInput {
    pub fn from_result(presentation: &Presentation, result: &CanonicalResult) -> Self {
        let (labels, datasets) = match (&presentation.series, result) {
            (SeriesSpec::PivotColumns, CanonicalResult::Matrix { row_key, columns, rows }) => {
                let labels = rows
                    .iter()
                    .map(|r| presentation.label_for(r.get(row_key)))
                    .collect();
                let datasets = columns
                    .iter()
                    .map(|column| Dataset {
                        label: column.clone(),
                        values: rows.iter().map(|r| numeric(r, column)).collect(),
                    })
                    .collect();
                (labels, datasets)
            }
            (SeriesSpec::SplitBy { series, value, top }, result) => {
                split_series(presentation, result.records(), series, value, *top)
            }
            (SeriesSpec::Fields(fields), CanonicalResult::Scalar(record)) => {
                let datasets = fields
                    .iter()
                    .map(|f| Dataset {
                        label: f.label.clone(),
                        values: vec![numeric(record, &f.field)],
                    })
                    .collect();
                (vec![presentation.title.clone()], datasets)
            }
            (SeriesSpec::Fields(fields), result) => {
                let rows = result.records();
                let labels = rows
                    .iter()
                    .map(|r| presentation.label_for(r.get(&presentation.label_field)))
                    .collect();
                let datasets = fields
                    .iter()
                    .map(|f| Dataset {
                        label: f.label.clone(),
                        values: rows.iter().map(|r| numeric(r, &f.field)).collect(),
                    })
                    .collect();
                (labels, datasets)
            }
            (SeriesSpec::PivotColumns, _) => (Vec::new(), Vec::new()),
        };

        let empty = result.is_empty();
        Self {
            kind: presentation.chart,
            title: presentation.title.clone(),
            labels,
            datasets,
            y_range: presentation.y_range,
            empty,
        }
    }
}

fn numeric(record: &Record, field: &str) -> Option<f64> {
    record
        .get(field)
        .and_then(Scalar::as_f64)
        .filter(|v| v.is_finite())
}

fn split_series(
    presentation: &Presentation,
    rows: &[Record],
    series_field: &str,
    value_field: &str,
    top: usize,
) -> (Vec<String>, Vec<Dataset>) {
    let mut labels: Vec<String> = Vec::new();
    let mut series: Vec<(String, f64, usize)> = Vec::new();

    for row in rows {
        let label = presentation.label_for(row.get(&presentation.label_field));
        if !labels.contains(&label) {
            labels.push(label);
        }
        let name = row.get(series_field).map(Scalar::label).unwrap_or_default();
        let value = numeric(row, value_field);
        match series.iter_mut().find(|(n, _, _)| *n == name) {
            Some((_, sum, count)) => {
                if let Some(v) = value {
                    *sum += v;
                    *count += 1;
                }
            }
            None => series.push((name, value.unwrap_or(0.0), usize::from(value.is_some()))),
        }
    }

    let mean = |sum: f64, count: usize| if count == 0 { f64::MIN } else { sum / count as f64 };
    series.sort_by(|a, b| {
        mean(b.1, b.2)
            .total_cmp(&mean(a.1, a.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    series.truncate(top);

    let datasets = series
        .into_iter()
        .map(|(name, _, _)| {
            let values = labels
                .iter()
                .map(|label| {
                    rows.iter()
                        .find(|row| {
                            presentation.label_for(row.get(&presentation.label_field)) == *label
                                && row.get(series_field).map(Scalar::label).unwrap_or_default()
                                    == name
                        })
                        .and_then(|row| numeric(row, value_field))
                })
                .collect();
            Dataset {
                label: name,
                values,
            }
        })
        .collect();

    (labels, datasets)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
