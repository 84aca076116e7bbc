//! Dimensional schema descriptor.
//!
//! A static description of the star schema: the fact table with its
//! measures, each dimension with its key, business code and attributes, and
//! the bridge tables that resolve many-to-many links. Derived attributes
//! (decade from year) are declared here once so every operation buckets the
//! same way.

use super::types::{OlapError, OlapResult};

/// Reference to a dimension attribute, written `dimension.attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attr {
    pub dimension: String,
    pub attribute: String,
}

impl Attr {
    pub fn new(dimension: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `genre.code` style references.
    pub fn parse(text: &str) -> Option<Self> {
        let (dimension, attribute) = text.split_once('.')?;
        if dimension.is_empty() || attribute.is_empty() || attribute.contains('.') {
            return None;
        }
        Some(Self::new(dimension, attribute))
    }
}

impl std::fmt::Display for Attr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dimension, self.attribute)
    }
}

/// A named numeric column on the fact table.
#[derive(Debug, Clone)]
pub struct FactMeasure {
    pub name: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct FactTable {
    pub table: String,
    pub alias: String,
    pub key: String,
    pub measures: Vec<FactMeasure>,
}

/// Many-to-many link between fact keys and dimension keys.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub table: String,
    pub alias: String,
    pub fact_key: String,
    pub dimension_key: String,
}

/// How a dimension is reached from the fact table.
#[derive(Debug, Clone)]
pub enum DimensionLink {
    /// The fact carries the dimension key in `fact_column`.
    Direct { fact_column: String },
    /// Through a bridge; joining fans one fact row out per linked member.
    Bridge(Bridge),
}

/// Rule producing an attribute from another attribute of the same dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Derivation {
    /// `floor(year / 10) * 10`.
    Decade { from: String },
}

#[derive(Debug, Clone)]
pub enum AttributeSource {
    Column(String),
    Derived(Derivation),
}

#[derive(Debug, Clone)]
pub struct DimensionAttribute {
    pub name: String,
    pub source: AttributeSource,
    pub numeric: bool,
}

impl DimensionAttribute {
    pub fn column(name: &str, column: &str) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Column(column.into()),
            numeric: false,
        }
    }

    pub fn numeric_column(name: &str, column: &str) -> Self {
        Self {
            numeric: true,
            ..Self::column(name, column)
        }
    }

    pub fn decade_of(name: &str, from: &str) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Derived(Derivation::Decade { from: from.into() }),
            numeric: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub table: String,
    pub alias: String,
    pub key: String,
    /// Attribute holding the stable business code.
    pub code_attribute: String,
    pub attributes: Vec<DimensionAttribute>,
    pub link: DimensionLink,
}

impl Dimension {
    pub fn attribute(&self, name: &str) -> Option<&DimensionAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Physical column of a stored attribute.
    pub fn stored_column(&self, name: &str) -> Option<&str> {
        match &self.attribute(name)?.source {
            AttributeSource::Column(column) => Some(column),
            AttributeSource::Derived(_) => None,
        }
    }
}

/// An attribute reference resolved to SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttr {
    /// SQL expression over the dimension alias.
    pub expr: String,
    /// Dimension whose join the expression needs.
    pub dimension: String,
    pub numeric: bool,
}

/// A physical table and the columns the dispatcher relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRequirement {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    schema: String,
    fact: FactTable,
    dimensions: Vec<Dimension>,
}

/// Integer floor division by ten, scaled back by ten (1994 → 1990).
pub fn decade(year: i64) -> i64 {
    year.div_euclid(10) * 10
}

/// SQL form of [`decade`]. SQLite's `%` truncates toward zero, so the
/// remainder is normalized to `0..10` before subtracting.
pub fn decade_sql(expr: &str) -> String {
    format!("({expr} - ((({expr} % 10) + 10) % 10))")
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl SchemaDescriptor {
    /// Build and validate a descriptor.
    pub fn new(
        schema: impl Into<String>,
        fact: FactTable,
        dimensions: Vec<Dimension>,
    ) -> OlapResult<Self> {
        let descriptor = Self {
            schema: schema.into(),
            fact,
            dimensions,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// The title-rating warehouse: ratings fact, title dimension, and genre
    /// and region dimensions reached through bridges.
    pub fn warehouse(schema: &str) -> OlapResult<Self> {
        let fact = FactTable {
            table: "fact_title_rating".into(),
            alias: "f".into(),
            key: "title_key".into(),
            measures: vec![
                FactMeasure {
                    name: "rating".into(),
                    column: "average_rating".into(),
                },
                FactMeasure {
                    name: "votes".into(),
                    column: "num_votes".into(),
                },
            ],
        };

        let title = Dimension {
            name: "title".into(),
            table: "dim_title".into(),
            alias: "t".into(),
            key: "title_key".into(),
            code_attribute: "primary_title".into(),
            attributes: vec![
                DimensionAttribute::column("primary_title", "primary_title"),
                DimensionAttribute::column("title_type", "title_type"),
                DimensionAttribute::numeric_column("start_year", "start_year"),
                DimensionAttribute::decade_of("decade", "start_year"),
            ],
            link: DimensionLink::Direct {
                fact_column: "title_key".into(),
            },
        };

        let genre = Dimension {
            name: "genre".into(),
            table: "dim_genre".into(),
            alias: "g".into(),
            key: "genre_key".into(),
            code_attribute: "code".into(),
            attributes: vec![DimensionAttribute::column("code", "genre_code")],
            link: DimensionLink::Bridge(Bridge {
                table: "bridge_title_genre".into(),
                alias: "bg".into(),
                fact_key: "title_key".into(),
                dimension_key: "genre_key".into(),
            }),
        };

        let region = Dimension {
            name: "region".into(),
            table: "dim_region".into(),
            alias: "r".into(),
            key: "region_key".into(),
            code_attribute: "code".into(),
            attributes: vec![DimensionAttribute::column("code", "region_code")],
            link: DimensionLink::Bridge(Bridge {
                table: "bridge_title_region".into(),
                alias: "br".into(),
                fact_key: "title_key".into(),
                dimension_key: "region_key".into(),
            }),
        };

        Self::new(schema, fact, vec![title, genre, region])
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn fact(&self) -> &FactTable {
        &self.fact
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Schema-qualified table name.
    pub fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    /// Resolve an attribute to its SQL expression.
    pub fn resolve(&self, attr: &Attr) -> OlapResult<ResolvedAttr> {
        let dimension = self.dimension(&attr.dimension).ok_or_else(|| {
            OlapError::UnsupportedSpecification(format!("unknown dimension '{}'", attr.dimension))
        })?;
        let attribute = dimension.attribute(&attr.attribute).ok_or_else(|| {
            OlapError::UnsupportedSpecification(format!("unknown attribute '{attr}'"))
        })?;

        let expr = match &attribute.source {
            AttributeSource::Column(column) => format!("{}.{}", dimension.alias, column),
            AttributeSource::Derived(Derivation::Decade { from }) => {
                let column = dimension.stored_column(from).ok_or_else(|| {
                    OlapError::UnsupportedSpecification(format!(
                        "derived attribute '{attr}' has no stored source '{from}'"
                    ))
                })?;
                decade_sql(&format!("{}.{}", dimension.alias, column))
            }
        };

        Ok(ResolvedAttr {
            expr,
            dimension: dimension.name.clone(),
            numeric: attribute.numeric,
        })
    }

    /// Resolve a fact measure (`rating`, `votes`) to a qualified column.
    pub fn measure_column(&self, name: &str) -> OlapResult<String> {
        self.fact
            .measures
            .iter()
            .find(|m| m.name == name)
            .map(|m| format!("{}.{}", self.fact.alias, m.column))
            .ok_or_else(|| {
                OlapError::UnsupportedSpecification(format!("unknown fact measure '{name}'"))
            })
    }

    /// FROM clause plus the joins needed for `dimensions`, in declaration
    /// order. Unreferenced dimensions are never joined.
    pub fn from_clause<'a, I>(&self, dimensions: I) -> OlapResult<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: Vec<&str> = dimensions.into_iter().collect();
        for name in &wanted {
            if self.dimension(name).is_none() {
                return Err(OlapError::UnsupportedSpecification(format!(
                    "unknown dimension '{name}'"
                )));
            }
        }

        let fact = &self.fact;
        let mut sql = format!("FROM {} {}", self.qualified(&fact.table), fact.alias);
        for dim in self.dimensions.iter().filter(|d| wanted.contains(&d.name.as_str())) {
            match &dim.link {
                DimensionLink::Direct { fact_column } => {
                    sql.push_str(&format!(
                        "\nJOIN {} {} ON {}.{} = {}.{}",
                        self.qualified(&dim.table),
                        dim.alias,
                        dim.alias,
                        dim.key,
                        fact.alias,
                        fact_column
                    ));
                }
                DimensionLink::Bridge(bridge) => {
                    sql.push_str(&format!(
                        "\nJOIN {} {} ON {}.{} = {}.{}",
                        self.qualified(&bridge.table),
                        bridge.alias,
                        bridge.alias,
                        bridge.fact_key,
                        fact.alias,
                        fact.key
                    ));
                    sql.push_str(&format!(
                        "\nJOIN {} {} ON {}.{} = {}.{}",
                        self.qualified(&dim.table),
                        dim.alias,
                        dim.alias,
                        dim.key,
                        bridge.alias,
                        bridge.dimension_key
                    ));
                }
            }
        }
        Ok(sql)
    }

    /// Every physical table with the columns queries touch.
    pub fn table_requirements(&self) -> Vec<TableRequirement> {
        let mut tables = Vec::new();
        let mut fact_columns = vec![self.fact.key.clone()];
        fact_columns.extend(self.fact.measures.iter().map(|m| m.column.clone()));
        for dim in &self.dimensions {
            if let DimensionLink::Direct { fact_column } = &dim.link
                && !fact_columns.contains(fact_column)
            {
                fact_columns.push(fact_column.clone());
            }
        }
        tables.push(TableRequirement {
            table: self.fact.table.clone(),
            columns: fact_columns,
        });

        for dim in &self.dimensions {
            let mut columns = vec![dim.key.clone()];
            for attribute in &dim.attributes {
                if let AttributeSource::Column(column) = &attribute.source
                    && !columns.contains(column)
                {
                    columns.push(column.clone());
                }
            }
            tables.push(TableRequirement {
                table: dim.table.clone(),
                columns,
            });
            if let DimensionLink::Bridge(bridge) = &dim.link {
                tables.push(TableRequirement {
                    table: bridge.table.clone(),
                    columns: vec![bridge.fact_key.clone(), bridge.dimension_key.clone()],
                });
            }
        }
        tables
    }

    /// Fail fast on a malformed descriptor.
    pub fn validate(&self) -> OlapResult<()> {
        let invalid = |msg: String| Err(OlapError::UnsupportedSpecification(msg));

        if !is_identifier(&self.schema) {
            return invalid(format!("invalid schema name '{}'", self.schema));
        }

        let mut aliases = vec![self.fact.alias.as_str()];
        let mut identifiers = vec![
            self.fact.table.as_str(),
            self.fact.alias.as_str(),
            self.fact.key.as_str(),
        ];
        identifiers.extend(self.fact.measures.iter().map(|m| m.column.as_str()));

        let mut names: Vec<&str> = Vec::new();
        for dim in &self.dimensions {
            if names.contains(&dim.name.as_str()) {
                return invalid(format!("duplicate dimension '{}'", dim.name));
            }
            names.push(&dim.name);

            identifiers.extend([dim.table.as_str(), dim.alias.as_str(), dim.key.as_str()]);
            aliases.push(&dim.alias);
            match &dim.link {
                DimensionLink::Direct { fact_column } => identifiers.push(fact_column),
                DimensionLink::Bridge(bridge) => {
                    identifiers.extend([
                        bridge.table.as_str(),
                        bridge.alias.as_str(),
                        bridge.fact_key.as_str(),
                        bridge.dimension_key.as_str(),
                    ]);
                    aliases.push(&bridge.alias);
                }
            }

            if dim.attribute(&dim.code_attribute).is_none() {
                return invalid(format!(
                    "dimension '{}' declares missing code attribute '{}'",
                    dim.name, dim.code_attribute
                ));
            }

            for attribute in &dim.attributes {
                match &attribute.source {
                    AttributeSource::Column(column) => identifiers.push(column),
                    AttributeSource::Derived(Derivation::Decade { from }) => {
                        if dim.stored_column(from).is_none() {
                            return invalid(format!(
                                "derived attribute '{}.{}' references missing '{from}'",
                                dim.name, attribute.name
                            ));
                        }
                    }
                }
            }
        }

        if let Some(bad) = identifiers.iter().find(|id| !is_identifier(id)) {
            return invalid(format!("invalid identifier '{bad}'"));
        }

        let mut seen = Vec::new();
        for alias in aliases {
            if seen.contains(&alias) {
                return invalid(format!("duplicate table alias '{alias}'"));
            }
            seen.push(alias);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
