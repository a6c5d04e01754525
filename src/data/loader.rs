use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::array_value_to_string;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{date_ordinal, BiomarkerDataset, CellValue, SeriesType, DEFAULT_INDEX_COLUMN};

/// How to interpret an uploaded table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub index_column: String,
    pub series_type: SeriesType,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            index_column: DEFAULT_INDEX_COLUMN.to_string(),
            series_type: SeriesType::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a long-format biomarker table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row, one measurement per line
/// * `.json`    – `[{ "biomarker": "IgG", "value": 1.2, "day": 0, ... }, ...]`
/// * `.parquet` – flat columns of strings, numbers, booleans or dates
///
/// Schema violations surface as [`DatasetError`](crate::error::DatasetError)
/// inside the returned `anyhow::Error` and can be recovered with `downcast_ref`.
pub fn load_file(path: &Path, options: &LoadOptions) -> Result<BiomarkerDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (columns, records) = match ext.as_str() {
        "csv" => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            read_csv_table(file)?
        }
        "json" => {
            let text = std::fs::read_to_string(path).context("reading JSON file")?;
            read_json_table(&text)?
        }
        "parquet" | "pq" => read_parquet_table(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };

    info!(
        "loaded {} rows x {} columns from {}",
        records.len(),
        columns.len(),
        path.display()
    );
    let dataset = BiomarkerDataset::new(columns, records, &options.index_column, options.series_type)?;
    Ok(dataset)
}

/// Parse CSV text from any reader into a dataset.
pub fn read_csv<R: Read>(reader: R, options: &LoadOptions) -> Result<BiomarkerDataset> {
    let (columns, records) = read_csv_table(reader)?;
    let dataset = BiomarkerDataset::new(columns, records, &options.index_column, options.series_type)?;
    Ok(dataset)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn read_csv_table<R: Read>(reader: R) -> Result<(Vec<String>, Vec<Vec<CellValue>>)> {
    // Flexible so that ragged rows reach dataset validation with their row number.
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        records.push(record.iter().map(guess_cell_type).collect());
    }
    Ok((columns, records))
}

/// Type a raw text cell: integers, floats, booleans and ISO dates are
/// recognised, empty and `NA` cells are null, everything else is text.
pub fn guess_cell_type(s: &str) -> CellValue {
    let s = s.trim();
    if s.is_empty() || s == "NA" {
        return CellValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return CellValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return CellValue::Float(f);
    }
    if s == "true" || s == "false" {
        return CellValue::Bool(s == "true");
    }
    if date_ordinal(s).is_some() {
        return CellValue::Date(s.to_string());
    }
    CellValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON, the default `df.to_json(orient='records')`.
/// Columns follow first appearance across records; absent keys are null.
fn read_json_table(text: &str) -> Result<(Vec<String>, Vec<Vec<CellValue>>)> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;
    let rows = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: Vec<String> = Vec::new();
    for (i, rec) in rows.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let records = rows
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| {
            columns
                .iter()
                .map(|c| obj.get(c).map_or(CellValue::Null, json_to_cell))
                .collect()
        })
        .collect();
    Ok((columns, records))
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) if s.is_empty() || s == "NA" => CellValue::Null,
        JsonValue::String(s) if date_ordinal(s).is_some() => CellValue::Date(s.clone()),
        JsonValue::String(s) => CellValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn read_parquet_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<CellValue>>)> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        debug!("parquet batch of {} rows", batch.num_rows());
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|col| arrow_cell(col, row))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Row {}", records.len()))?;
            records.push(cells);
        }
    }
    Ok((columns, records))
}

/// Extract a single cell from an Arrow column at a given row.
fn arrow_cell(col: &ArrayRef, row: usize) -> Result<CellValue> {
    if col.is_null(row) {
        return Ok(CellValue::Null);
    }
    let cell = match col.data_type() {
        DataType::Utf8 => CellValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => CellValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Boolean => CellValue::Bool(col.as_boolean().value(row)),
        DataType::Int8 => CellValue::Integer(col.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => CellValue::Integer(col.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => CellValue::Integer(col.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => CellValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => CellValue::Integer(col.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => CellValue::Integer(col.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => CellValue::Integer(col.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => {
            let v = col.as_primitive::<UInt64Type>().value(row);
            i64::try_from(v).map_or(CellValue::Float(v as f64), CellValue::Integer)
        }
        DataType::Float32 => CellValue::Float(col.as_primitive::<Float32Type>().value(row).into()),
        DataType::Float64 => CellValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Date32 => match col.as_primitive::<Date32Type>().value_as_date(row) {
            Some(d) => CellValue::Date(d.format("%Y-%m-%d").to_string()),
            None => CellValue::Null,
        },
        // Timestamps, dictionaries and the rest go through Arrow's formatter.
        _ => {
            let text = array_value_to_string(col.as_ref(), row)
                .with_context(|| format!("formatting {} value", col.data_type()))?;
            guess_cell_type(&text)
        }
    };
    Ok(cell)
}
