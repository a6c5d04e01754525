use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::DatasetError;

/// Column holding the measured quantity.
pub const VALUE_COLUMN: &str = "value";
/// Column naming the measured analyte.
pub const BIOMARKER_COLUMN: &str = "biomarker";
/// Index column used when the caller does not name one.
pub const DEFAULT_INDEX_COLUMN: &str = "day";
/// Level count above which a covariate is considered unsuitable for faceting.
pub const HIGH_CARDINALITY_LEVELS: usize = 100;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

// ---------------------------------------------------------------------------
// CellValue – a single cell of the table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value.
/// Groups and level sets key on `CellValue`, so equality must agree with `Hash`:
/// floats compare by bit pattern, which makes `NaN` equal to itself.
#[derive(Debug, Clone)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text; see [`date_ordinal`] for the numeric form.
    Date(String),
    Null,
}

// -- Manual Eq so we can put CellValue in sets and maps --

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        use CellValue::*;
        match (self, other) {
            (String(a), String(b)) | (Date(a), Date(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Null, Null) => true,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) | CellValue::Date(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::Null => write!(f, "NA"),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::String(s) | CellValue::Date(s) => serializer.serialize_str(s),
            CellValue::Integer(i) => serializer.serialize_i64(*i),
            CellValue::Float(v) => serializer.serialize_f64(*v),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Null => serializer.serialize_none(),
        }
    }
}

impl CellValue {
    /// Interpret the value as an `f64`. Numeric strings are accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Numeric ordinal for the index column: numbers as-is, dates as days
    /// since 1970-01-01.
    pub fn as_ordinal(&self) -> Option<f64> {
        match self {
            CellValue::Date(s) => date_ordinal(s),
            CellValue::String(s) => s.trim().parse::<f64>().ok().or_else(|| date_ordinal(s)),
            other => other.as_f64(),
        }
    }

    /// Equality against a textual level, compared at the cell's own type.
    pub fn matches_level(&self, level: &str) -> bool {
        match self {
            CellValue::Integer(i) => level
                .trim()
                .parse::<f64>()
                .map(|l| l == *i as f64)
                .unwrap_or(false),
            CellValue::Float(v) => level
                .trim()
                .parse::<f64>()
                .map(|l| l == *v)
                .unwrap_or(false),
            CellValue::Bool(b) => level.parse::<bool>().map(|l| l == *b).unwrap_or(false),
            CellValue::String(s) | CellValue::Date(s) => s == level,
            CellValue::Null => false,
        }
    }
}

/// Parse an ISO date or RFC 3339 timestamp into fractional days since the epoch.
pub fn date_ordinal(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        return Some(date.signed_duration_since(epoch).num_days() as f64);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.timestamp_millis() as f64 / MILLIS_PER_DAY);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis() as f64 / MILLIS_PER_DAY)
}

// ---------------------------------------------------------------------------
// Dataset tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeriesType {
    #[default]
    Surveillance,
    PostExposure,
}

impl FromStr for SeriesType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surveillance" => Ok(SeriesType::Surveillance),
            "post-exposure" => Ok(SeriesType::PostExposure),
            other => Err(format!("unknown series type '{other}'")),
        }
    }
}

/// Whether the index column holds plain numbers or calendar dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Number,
    Date,
}

// ---------------------------------------------------------------------------
// Schema and Row
// ---------------------------------------------------------------------------

/// Column layout fixed at dataset construction.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<String>,
    positions: HashMap<String, usize>,
    value: usize,
    biomarker: usize,
    index: usize,
}

impl Schema {
    /// Validate the header: unique names, and `value`, `biomarker` and the
    /// index column all present.
    pub fn new(columns: Vec<String>, index_column: &str) -> Result<Self, DatasetError> {
        let mut positions = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            if positions.insert(name.clone(), i).is_some() {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
        }

        let missing: Vec<String> = [VALUE_COLUMN, BIOMARKER_COLUMN, index_column]
            .iter()
            .filter(|c| !positions.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DatasetError::MissingColumns(missing));
        }

        Ok(Schema {
            value: positions[VALUE_COLUMN],
            biomarker: positions[BIOMARKER_COLUMN],
            index: positions[index_column],
            columns,
            positions,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn index_column(&self) -> &str {
        &self.columns[self.index]
    }

    pub fn biomarker_position(&self) -> usize {
        self.biomarker
    }

    /// Every column other than `value`, `biomarker` and the index column.
    pub fn covariates(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.value && *i != self.biomarker && *i != self.index)
            .map(|(i, name)| (i, name.as_str()))
    }
}

/// One record of the table, with its index ordinal and value pre-coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    cells: Vec<CellValue>,
    x: f64,
    value: f64,
}

impl Row {
    pub fn cells(&self) -> &[CellValue] {
        &self.cells
    }

    pub fn cell(&self, position: usize) -> &CellValue {
        &self.cells[position]
    }

    /// Index ordinal (NaN when the index cell was not coercible).
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Measured value, after any scale transform (NaN when non-numeric).
    pub fn value(&self) -> f64 {
        self.value
    }

    pub(crate) fn set_value(&mut self, value: f64) {
        self.value = value;
    }
}

// ---------------------------------------------------------------------------
// Derived metadata
// ---------------------------------------------------------------------------

/// A covariate column and its distinct levels in first-appearance order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSummary {
    pub name: String,
    pub levels: Vec<CellValue>,
}

impl VariableSummary {
    /// More levels than `threshold`; see [`HIGH_CARDINALITY_LEVELS`].
    pub fn is_high_cardinality(&self, threshold: usize) -> bool {
        self.levels.len() > threshold
    }
}

/// Structural description of a dataset as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetMetadata {
    pub variables: Vec<VariableSummary>,
    pub biomarkers: Vec<String>,
    pub xcol: String,
    pub xtype: IndexKind,
    #[serde(rename = "type")]
    pub series_type: SeriesType,
}

// ---------------------------------------------------------------------------
// BiomarkerDataset – the complete loaded table
// ---------------------------------------------------------------------------

/// An immutable table of biomarker measurements.
#[derive(Debug, Clone)]
pub struct BiomarkerDataset {
    schema: Schema,
    rows: Vec<Row>,
    series_type: SeriesType,
    index_kind: IndexKind,
    metadata: OnceLock<DatasetMetadata>,
}

impl BiomarkerDataset {
    /// Build a dataset from a header and its records.
    pub fn new(
        columns: Vec<String>,
        records: Vec<Vec<CellValue>>,
        index_column: &str,
        series_type: SeriesType,
    ) -> Result<Self, DatasetError> {
        let schema = Schema::new(columns, index_column)?;
        let width = schema.columns().len();

        let mut rows = Vec::with_capacity(records.len());
        let mut index_kind = IndexKind::Number;
        for (i, cells) in records.into_iter().enumerate() {
            if cells.len() != width {
                return Err(DatasetError::RaggedRow {
                    row: i,
                    got: cells.len(),
                    expected: width,
                });
            }
            let index_cell = &cells[schema.index];
            if is_date_like(index_cell) {
                index_kind = IndexKind::Date;
            }
            let x = index_cell.as_ordinal().unwrap_or(f64::NAN);
            let value = cells[schema.value].as_f64().unwrap_or(f64::NAN);
            rows.push(Row { cells, x, value });
        }

        if !rows.is_empty() && rows.iter().all(|r| r.x.is_nan()) {
            return Err(DatasetError::InvalidIndexColumn(index_column.to_string()));
        }

        Ok(BiomarkerDataset {
            schema,
            rows,
            series_type,
            index_kind,
            metadata: OnceLock::new(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn series_type(&self) -> SeriesType {
        self.series_type
    }

    pub fn index_kind(&self) -> IndexKind {
        self.index_kind
    }

    pub fn index_column(&self) -> &str {
        self.schema.index_column()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Metadata is derived on first use and cached for the dataset's lifetime.
    pub fn metadata(&self) -> &DatasetMetadata {
        self.metadata.get_or_init(|| self.derive_metadata())
    }

    pub fn variables(&self) -> &[VariableSummary] {
        &self.metadata().variables
    }

    pub fn biomarkers(&self) -> &[String] {
        &self.metadata().biomarkers
    }

    fn derive_metadata(&self) -> DatasetMetadata {
        let mut biomarkers = Vec::new();
        let mut seen_biomarkers = HashSet::new();
        for row in &self.rows {
            let name = row.cell(self.schema.biomarker).to_string();
            if seen_biomarkers.insert(name.clone()) {
                biomarkers.push(name);
            }
        }

        let variables = self
            .schema
            .covariates()
            .map(|(pos, name)| {
                let mut seen = HashSet::new();
                let levels = self
                    .rows
                    .iter()
                    .map(|r| r.cell(pos))
                    .filter(|v| seen.insert(*v))
                    .cloned()
                    .collect();
                VariableSummary {
                    name: name.to_string(),
                    levels,
                }
            })
            .collect();

        DatasetMetadata {
            variables,
            biomarkers,
            xcol: self.schema.index_column().to_string(),
            xtype: self.index_kind,
            series_type: self.series_type,
        }
    }
}

fn is_date_like(cell: &CellValue) -> bool {
    match cell {
        CellValue::Date(_) => true,
        CellValue::String(s) => s.trim().parse::<f64>().is_err() && date_ordinal(s).is_some(),
        _ => false,
    }
}
