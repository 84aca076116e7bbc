//! olap-explorer: named OLAP operations over a title-rating star schema.
//!
//! The library half of the `olap` binary. [`olap`] holds the dispatcher and
//! everything behind it; this file is the command-line transport.

pub mod config;
pub mod olap;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use itertools::Itertools;
use serde::Serialize;

use crate::config::{ConfigError, OlapConfig};
use crate::olap::{
    Bindings, CanonicalResult, Catalog, ChartInput, Dispatcher, ErrorKind, OlapError,
    QueryBuilder, Record, ResultShape, Scalar, SchemaDescriptor, Severity, ValidationReport,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "olap",
    version,
    about = "Run OLAP operations (roll-up, drill-down, slice, dice, pivot, correlation) against a ratings warehouse"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/olap-explorer/config.toml)
    #[arg(long, global = true, env = "OLAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Warehouse database, overriding config and OLAP_WAREHOUSE_PATH
    #[arg(long, global = true)]
    pub warehouse: Option<PathBuf>,

    /// Machine-readable output on stdout, structured errors on stderr
    #[arg(long, global = true, alias = "robot")]
    pub json: bool,

    /// More logging (-v debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List registered operations and their aliases
    List,
    /// Run an operation and print its canonical result
    Run {
        operation: String,
        /// Value for a parameterized filter, as name=value (repeatable)
        #[arg(long = "param", value_parser = parse_binding)]
        params: Vec<(String, String)>,
    },
    /// Run an operation and print chart input for it (a table, or the chart
    /// document with --json)
    Chart { operation: String },
    /// Print the SQL an operation would run, without running it
    Sql { operation: String },
    /// Validate the warehouse against the data model
    Check,
}

fn parse_binding(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Typed binding value: integers and reals are recognised, anything else is text.
fn binding_value(raw: &str) -> Scalar {
    match olap::normalize::numeric_value(&Scalar::from(raw)) {
        Scalar::Null => Scalar::from(raw),
        number => number,
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error surfaced by the CLI, with a stable exit code and kind.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub code: i32,
    pub kind: String,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

impl CliError {
    fn new(code: i32, kind: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.to_string(),
            message: message.into(),
            hint: None,
            retryable: false,
        }
    }

    fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    /// `{"error": {...}}` payload for `--json` mode.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<OlapError> for CliError {
    fn from(err: OlapError) -> Self {
        let kind = err.kind();
        let code = match kind {
            ErrorKind::UnknownOperation | ErrorKind::MissingParameter => 2,
            ErrorKind::UnsupportedSpecification => 3,
            ErrorKind::ExecutionError => 4,
        };
        let mut out = CliError::new(code, &kind.to_string(), err.to_string());
        out.retryable = err.is_retryable();
        match kind {
            ErrorKind::UnknownOperation => {
                out.with_hint("Run `olap list` to see the available operations.")
            }
            ErrorKind::MissingParameter => out.with_hint("Pass the value with --param name=value."),
            ErrorKind::ExecutionError => out.with_hint(
                "Check the warehouse path (--warehouse or OLAP_WAREHOUSE_PATH) and run `olap check`.",
            ),
            ErrorKind::UnsupportedSpecification => out,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::new(5, "config_error", err.to_string())
            .with_hint("Fix the config file or unset the OLAP_* environment overrides.")
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ParsedCli {
    pub cli: Cli,
}

/// Parse arguments. Help and version requests come back as a `CliError`
/// with code 0 whose message is the text to print.
pub fn parse_cli(raw_args: Vec<String>) -> Result<ParsedCli, CliError> {
    match Cli::try_parse_from(raw_args) {
        Ok(cli) => Ok(ParsedCli { cli }),
        Err(err) => {
            use clap::error::ErrorKind as ClapKind;
            let code = match err.kind() {
                ClapKind::DisplayHelp
                | ClapKind::DisplayVersion
                | ClapKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
                _ => 2,
            };
            Err(CliError::new(code, "usage", err.render().to_string())
                .with_hint("Run `olap --help` for usage."))
        }
    }
}

pub fn run_with_parsed(parsed: ParsedCli) -> Result<(), CliError> {
    let cli = parsed.cli;
    init_tracing(cli.verbose);
    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let mut config = match &cli.config {
        Some(path) => OlapConfig::load_from(path)?,
        None => OlapConfig::load()?,
    };
    if let Some(path) = &cli.warehouse {
        config.warehouse.path = path.clone();
    }
    tracing::debug!(warehouse = %config.warehouse.path.display(), "configuration loaded");

    match cli.command.clone().unwrap_or(Commands::List) {
        Commands::List => cmd_list(&config, cli.json),
        Commands::Run { operation, params } => cmd_run(&config, &operation, &params, cli.json),
        Commands::Chart { operation } => cmd_chart(&config, &operation, cli.json),
        Commands::Sql { operation } => cmd_sql(&config, &operation, cli.json),
        Commands::Check => cmd_check(&config, cli.json),
    }
}

fn init_tracing(verbose: u8) {
    let filter = if verbose > 0 {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    // A second init (tests driving the library twice) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Schema and catalog only; no warehouse connection.
fn catalog_for(config: &OlapConfig) -> Result<Catalog, CliError> {
    let schema = Arc::new(SchemaDescriptor::warehouse(&config.warehouse.schema)?);
    Ok(Catalog::standard(schema, &config.operations)?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OperationInfo<'a> {
    id: &'a str,
    aliases: Vec<&'a str>,
    description: &'a str,
    shape: &'static str,
    chart: String,
    parameters: Vec<&'a str>,
}

fn shape_name(shape: &ResultShape) -> &'static str {
    match shape {
        ResultShape::Flat { .. } => "flat",
        ResultShape::Matrix { .. } => "matrix",
        ResultShape::Scalar { .. } => "scalar",
    }
}

fn cmd_list(config: &OlapConfig, json: bool) -> Result<(), CliError> {
    let catalog = catalog_for(config)?;
    let mut infos = Vec::new();
    for spec in catalog.specs() {
        infos.push(OperationInfo {
            id: &spec.id,
            aliases: catalog.aliases_of(&spec.id),
            description: &spec.description,
            shape: shape_name(catalog.shape_for(&spec.id)?),
            chart: spec.presentation.chart.to_string(),
            parameters: spec.parameters(),
        });
    }

    if json {
        print_json(&serde_json::json!({ "operations": infos }));
        return Ok(());
    }
    let width = infos.iter().map(|i| i.id.len()).max().unwrap_or(0);
    for info in &infos {
        let aliases = if info.aliases.is_empty() {
            String::new()
        } else {
            format!(" (alias: {})", info.aliases.join(", "))
        };
        println!(
            "{:<width$}  {}{}  [{}, {}]",
            info.id.bold(),
            info.description,
            aliases.dimmed(),
            info.shape,
            info.chart
        );
    }
    Ok(())
}

fn cmd_run(
    config: &OlapConfig,
    operation: &str,
    params: &[(String, String)],
    json: bool,
) -> Result<(), CliError> {
    let dispatcher = Dispatcher::open(config)?;
    let bindings: Bindings = params
        .iter()
        .map(|(name, value)| (name.clone(), binding_value(value)))
        .collect();
    let result = dispatcher.run_with(operation, &bindings)?;

    if json {
        print_json(&result.to_json());
    } else {
        print!("{}", render_result(&result));
    }
    Ok(())
}

fn cmd_chart(config: &OlapConfig, operation: &str, json: bool) -> Result<(), CliError> {
    let dispatcher = Dispatcher::open(config)?;
    let chart = dispatcher.chart(operation)?;
    if json {
        print_json(&serde_json::to_value(&chart).unwrap_or(serde_json::Value::Null));
    } else {
        print!("{}", render_chart(&chart));
    }
    Ok(())
}

fn cmd_sql(config: &OlapConfig, operation: &str, json: bool) -> Result<(), CliError> {
    let catalog = catalog_for(config)?;
    let spec = catalog.specification_for(operation)?;
    let query = QueryBuilder::new(catalog.schema()).build(&spec, &Bindings::new())?;

    if json {
        print_json(&serde_json::json!({
            "operation": query.operation,
            "sql": query.sql,
            "params": query.params,
            "shape": shape_name(&query.shape),
        }));
    } else {
        println!("{}", query.sql);
        for (idx, param) in query.params.iter().enumerate() {
            println!("{} ?{} = {}", "--".dimmed(), idx + 1, param_literal(param));
        }
    }
    Ok(())
}

fn cmd_check(config: &OlapConfig, json: bool) -> Result<(), CliError> {
    let dispatcher = Dispatcher::open(config)?;
    let report = dispatcher.validate_warehouse()?;

    if json {
        print_json(&report.to_json());
    } else {
        print!("{}", render_report(&report));
    }

    let errors = report.count_failures(Severity::Error);
    if errors > 0 {
        return Err(CliError::new(
            1,
            "validation_failed",
            format!("{errors} warehouse check(s) failed"),
        )
        .with_hint("See the failed checks above for suggested actions."));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn param_literal(value: &Scalar) -> String {
    match value {
        Scalar::Text(text) => format!("'{}'", text.replace('\'', "''")),
        other => other.label(),
    }
}

fn cell(value: Option<&Scalar>) -> String {
    match value {
        None | Some(Scalar::Null) => "null".to_string(),
        Some(v) => v.label(),
    }
}

/// Plain-text table for human output.
pub fn render_result(result: &CanonicalResult) -> String {
    if let CanonicalResult::Scalar(record) = result {
        return record
            .iter()
            .map(|(name, value)| format!("{name}: {}\n", cell(Some(value))))
            .collect();
    }
    let rows = result.records();
    if rows.is_empty() {
        return "(no rows)\n".to_string();
    }
    let columns: Vec<&str> = match result {
        CanonicalResult::Matrix { row_key, columns, .. } => std::iter::once(row_key.as_str())
            .chain(columns.iter().map(String::as_str))
            .collect(),
        _ => rows[0].columns().collect(),
    };
    render_table(&columns, rows)
}

fn render_table(columns: &[&str], rows: &[Record]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell(row.get(c))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            cells
                .iter()
                .map(|r| r[idx].chars().count())
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header = columns
        .iter()
        .zip(&widths)
        .map(|(name, &w)| format!("{name:<w$}"))
        .join("  ");
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).join("  "));
    out.push('\n');
    for row in &cells {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(value, &w)| format!("{value:<w$}"))
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Chart title and kind, then one table row per label.
fn render_chart(chart: &ChartInput) -> String {
    let kind = serde_json::to_value(chart.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    let mut out = format!("{} ({kind})\n", chart.title);
    if chart.empty {
        out.push_str("(no rows)\n");
        return out;
    }
    let columns: Vec<&str> = std::iter::once("label")
        .chain(chart.datasets.iter().map(|d| d.label.as_str()))
        .collect();
    let rows: Vec<Record> = chart
        .labels
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            chart
                .datasets
                .iter()
                .fold(Record::new().with("label", label.as_str()), |row, dataset| {
                    let value = dataset.values.get(idx).copied().flatten();
                    row.with(dataset.label.as_str(), value.map_or(Scalar::Null, Scalar::Real))
                })
        })
        .collect();
    out.push_str(&render_table(&columns, &rows));
    out
}

fn render_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    for check in &report.checks {
        let mark = match (check.ok, check.severity) {
            (true, _) => "ok".green(),
            (false, Severity::Error) => "FAIL".red().bold(),
            (false, Severity::Warning) => "warn".yellow(),
            (false, Severity::Info) => "info".normal(),
        };
        out.push_str(&format!("{mark:>4}  {}  {}\n", check.id, check.details));
        if !check.ok
            && let Some(action) = &check.suggested_action
        {
            out.push_str(&format!("      {}\n", action.dimmed()));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
