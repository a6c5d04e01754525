//! Query and curve-fitting engine for longitudinal biomarker tables.
//!
//! Datasets are loaded from CSV, JSON or Parquet, held per session in a
//! [`SessionStore`], and queried for smoothed population traces or
//! paginated per-subject series.

pub mod config;
pub mod data;
pub mod error;
pub mod fit;
pub mod query;
pub mod state;

pub use config::Settings;
pub use data::loader::{load_file, LoadOptions};
pub use data::model::BiomarkerDataset;
pub use error::{DatasetError, ErrorDetail, ModelError, QueryError, Response};
pub use query::{IndividualRequest, QueryService, TraceRequest};
pub use state::{DatasetStore, SessionStore};
