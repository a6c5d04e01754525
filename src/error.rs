use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Ingestion errors
// ---------------------------------------------------------------------------

/// Schema validation failures raised while building a dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatasetError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Could not parse values of '{0}' as numbers or dates")]
    InvalidIndexColumn(String),

    #[error("Row {row} has {got} cells but the header declares {expected}")]
    RaggedRow {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),
}

impl DatasetError {
    /// Wire tag reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            DatasetError::MissingColumns(_) => "MISSING_COLUMNS",
            DatasetError::InvalidIndexColumn(_) => "INVALID_XCOL",
            DatasetError::RaggedRow { .. } | DatasetError::DuplicateColumn(_) => "UPLOAD_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Fitting errors
// ---------------------------------------------------------------------------

/// The fallback chain was exhausted without producing a finite curve.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

// ---------------------------------------------------------------------------
// Query errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a single query. None of them are fatal to the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    #[error("Malformed filter segment '{0}': expected <variable>:<level>")]
    InvalidFilter(String),

    #[error("Invalid dataset name '{0}': use letters, digits and underscores only")]
    InvalidDatasetName(String),

    #[error("{0}")]
    Plot(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl QueryError {
    /// Wire tag reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::DatasetNotFound(_) => "DATASET_NOT_FOUND",
            QueryError::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            QueryError::InvalidFilter(_) => "INVALID_FILTER",
            QueryError::InvalidDatasetName(_) => "INVALID_DATASET_NAME",
            QueryError::Plot(_) => "PLOT_ERROR",
            QueryError::Model(_) => "MODEL_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// `{ error, detail }` pair as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub error: String,
    pub detail: Option<String>,
}

impl From<&QueryError> for ErrorDetail {
    fn from(err: &QueryError) -> Self {
        ErrorDetail {
            error: err.code().to_string(),
            detail: Some(err.to_string()),
        }
    }
}

impl From<&DatasetError> for ErrorDetail {
    fn from(err: &DatasetError) -> Self {
        ErrorDetail {
            error: err.code().to_string(),
            detail: Some(err.to_string()),
        }
    }
}

/// Tagged success/failure envelope: `{ status, data, errors }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response<T> {
    Success { data: T, errors: Option<Vec<ErrorDetail>> },
    Failure { data: Option<T>, errors: Vec<ErrorDetail> },
}

impl<T> Response<T> {
    pub fn success(data: T) -> Self {
        Response::Success { data, errors: None }
    }

    pub fn failure(error: ErrorDetail) -> Self {
        Response::Failure {
            data: None,
            errors: vec![error],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

impl<T> From<Result<T, QueryError>> for Response<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(data) => Response::success(data),
            Err(err) => Response::failure(ErrorDetail::from(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_tags() {
        assert_eq!(QueryError::DatasetNotFound("x".into()).code(), "DATASET_NOT_FOUND");
        assert_eq!(QueryError::ColumnNotFound("pid".into()).code(), "COLUMN_NOT_FOUND");
        assert_eq!(QueryError::Plot("boom".into()).code(), "PLOT_ERROR");
        assert_eq!(QueryError::from(ModelError("nan".into())).code(), "MODEL_ERROR");
        assert_eq!(
            DatasetError::MissingColumns(vec!["value".into()]).code(),
            "MISSING_COLUMNS"
        );
        assert_eq!(DatasetError::InvalidIndexColumn("day".into()).code(), "INVALID_XCOL");
    }

    #[test]
    fn failure_envelope_serializes_status_tag() {
        let resp: Response<Vec<u8>> = Err(QueryError::DatasetNotFound("sim".into())).into();
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["errors"][0]["error"], "DATASET_NOT_FOUND");
        assert!(json["data"].is_null());
    }

    #[test]
    fn missing_columns_message_lists_every_column() {
        let err = DatasetError::MissingColumns(vec!["value".into(), "day".into()]);
        assert_eq!(err.to_string(), "Missing required columns: value, day");
    }
}
