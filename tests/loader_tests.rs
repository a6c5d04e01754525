//! File loading: format dispatch and schema validation.

use std::io::Write;

use seroviz::data::model::{CellValue, IndexKind, SeriesType};
use seroviz::{load_file, DatasetError, LoadOptions};

fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn csv_with_dates_is_date_indexed() {
    let file = write_temp(
        ".csv",
        "pid,biomarker,value,date\n1,IgG,1.5,2021-01-01\n1,IgG,NA,2021-01-11\n",
    );
    let options = LoadOptions {
        index_column: "date".into(),
        series_type: SeriesType::PostExposure,
    };
    let ds = load_file(file.path(), &options).unwrap();
    assert_eq!(ds.index_kind(), IndexKind::Date);
    assert_eq!(ds.series_type(), SeriesType::PostExposure);
    assert_eq!(ds.rows()[1].x() - ds.rows()[0].x(), 10.0);
    assert!(ds.rows()[1].value().is_nan());
    assert_eq!(ds.rows()[1].cell(2), &CellValue::Null);
}

#[test]
fn missing_columns_are_listed() {
    let file = write_temp(".csv", "pid,day\n1,0\n");
    let err = load_file(file.path(), &LoadOptions::default()).unwrap_err();
    let err = err.downcast_ref::<DatasetError>().unwrap();
    assert_eq!(err.code(), "MISSING_COLUMNS");
    assert_eq!(err.to_string(), "Missing required columns: value, biomarker");
}

#[test]
fn unparseable_index_is_invalid_xcol() {
    let file = write_temp(".csv", "biomarker,value,day\nIgG,1,early\nIgG,2,late\n");
    let err = load_file(file.path(), &LoadOptions::default()).unwrap_err();
    assert_eq!(err.downcast_ref::<DatasetError>().map(DatasetError::code), Some("INVALID_XCOL"));
}

#[test]
fn json_records_load() {
    let file = write_temp(
        ".json",
        r#"[{"biomarker":"IgG","value":3.5,"day":0,"sex":"F"},{"biomarker":"IgG","value":4,"day":7}]"#,
    );
    let ds = load_file(file.path(), &LoadOptions::default()).unwrap();
    assert_eq!(ds.len(), 2);
    assert_eq!(ds.rows()[1].cell(3), &CellValue::Null);
    assert_eq!(ds.variables()[0].name, "sex");
}

#[test]
fn unknown_extension_is_rejected() {
    let file = write_temp(".xlsx", "");
    let err = load_file(file.path(), &LoadOptions::default()).unwrap_err();
    assert!(err.downcast_ref::<DatasetError>().is_none());
    assert!(err.to_string().contains("Unsupported file extension"));
}
