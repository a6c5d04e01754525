use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::config::Settings;
use crate::data::filter::{
    apply_filter, apply_scale, filtered_indices, parse_variable_list, FilterPredicate, Scale,
};
use crate::data::grouping::{cross_product, disaggregate, paginate_ids, PAGE_LENGTH};
use crate::data::model::{BiomarkerDataset, CellValue, DatasetMetadata, Row};
use crate::error::QueryError;
use crate::fit::{fit, FitResult, ModelSpec};
use crate::state::DatasetStore;

// ---------------------------------------------------------------------------
// Result shapes
// ---------------------------------------------------------------------------

/// Observed points in row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawPoints {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// One named trace: raw points, fitted curve and warnings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub raw: RawPoints,
    /// `None` when fitting failed outright; see `warnings`.
    pub model: Option<FitResult>,
    pub warnings: Vec<String>,
}

/// One subject's unsmoothed time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSeries {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// The subject's value of the colour-by variable, if one was requested.
    pub color: Option<CellValue>,
    /// The subject's value of the line-type variable, if one was requested.
    pub linetype: Option<CellValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualPage {
    pub series: Vec<SubjectSeries>,
    pub page: usize,
    pub num_pages: usize,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceRequest {
    pub biomarker: String,
    pub filter: FilterPredicate,
    /// Covariates to split the trace by; empty for a single series.
    pub disaggregate: Vec<String>,
    pub scale: Scale,
    pub model: ModelSpec,
}

impl TraceRequest {
    pub fn new(biomarker: impl Into<String>) -> Self {
        TraceRequest {
            biomarker: biomarker.into(),
            ..TraceRequest::default()
        }
    }

    /// Build from the `+`-joined wire strings used by clients.
    pub fn from_wire(
        biomarker: &str,
        filter: &str,
        disaggregate: &str,
        scale: Scale,
        model: ModelSpec,
    ) -> Result<Self, QueryError> {
        Ok(TraceRequest {
            biomarker: biomarker.to_string(),
            filter: filter.parse()?,
            disaggregate: parse_variable_list(disaggregate),
            scale,
            model,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndividualRequest {
    pub subject_column: String,
    pub scale: Scale,
    pub filter: FilterPredicate,
    pub color: Option<String>,
    pub linetype: Option<String>,
    /// 1-based.
    pub page: usize,
}

impl IndividualRequest {
    pub fn new(subject_column: impl Into<String>) -> Self {
        IndividualRequest {
            subject_column: subject_column.into(),
            scale: Scale::Natural,
            filter: FilterPredicate::default(),
            color: None,
            linetype: None,
            page: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Trace query
// ---------------------------------------------------------------------------

/// Raw points and a fitted curve for one biomarker, optionally split by
/// covariates. A failure inside one series never aborts the others.
pub fn query_trace(dataset: &BiomarkerDataset, request: &TraceRequest) -> Result<Vec<Series>, QueryError> {
    let schema = dataset.schema();
    let biomarker = schema.biomarker_position();
    let rows: Vec<Row> = dataset
        .rows()
        .iter()
        .filter(|r| r.cell(biomarker).matches_level(&request.biomarker))
        .cloned()
        .collect();
    let rows = apply_filter(schema, rows, &request.filter);
    let rows = apply_scale(rows, request.scale);
    debug!(
        "trace '{}' [{}]: {} rows after filtering",
        request.biomarker,
        request.filter,
        rows.len()
    );

    if request.disaggregate.is_empty() {
        return Ok(vec![build_series(request.filter.label(), &rows, &request.model)]);
    }

    let groups = disaggregate(schema, rows, &request.disaggregate)?;
    Ok(groups
        .into_iter()
        .map(|g| build_series(g.key, &g.rows, &request.model))
        .collect())
}

fn usable_points(rows: &[Row]) -> (RawPoints, usize) {
    let mut raw = RawPoints::default();
    let mut dropped = 0;
    for row in rows {
        let (x, y) = (row.x(), row.value());
        if x.is_finite() && y.is_finite() {
            raw.x.push(x);
            raw.y.push(y);
        } else {
            dropped += 1;
        }
    }
    (raw, dropped)
}

fn build_series(name: String, rows: &[Row], spec: &ModelSpec) -> Series {
    let (raw, dropped) = usable_points(rows);
    let mut warnings = Vec::new();
    if dropped > 0 {
        warn!("series '{name}': {dropped} of {} rows not plottable", rows.len());
        warnings.push(format!(
            "{dropped} of {} observations had a missing or non-finite index or value \
             (for example the log of a non-positive value) and were excluded",
            rows.len()
        ));
    }

    if raw.x.len() < 2 {
        return Series {
            name,
            raw,
            model: Some(FitResult::empty()),
            warnings,
        };
    }

    let observations: Vec<(f64, f64)> = raw.x.iter().copied().zip(raw.y.iter().copied()).collect();
    let model = match fit(&observations, spec) {
        Ok(outcome) => {
            warnings.extend(outcome.warnings());
            Some(outcome.result)
        }
        Err(err) => {
            warn!("series '{name}': {err}");
            warnings.push(format!("MODEL_ERROR: {err}"));
            None
        }
    };

    Series {
        name,
        raw,
        model,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Individual query
// ---------------------------------------------------------------------------

/// One unsmoothed series per subject on `request.page`, with the default
/// page length.
pub fn query_individual(
    dataset: &BiomarkerDataset,
    request: &IndividualRequest,
) -> Result<IndividualPage, QueryError> {
    query_individual_paged(dataset, request, PAGE_LENGTH)
}

pub fn query_individual_paged(
    dataset: &BiomarkerDataset,
    request: &IndividualRequest,
    page_length: usize,
) -> Result<IndividualPage, QueryError> {
    if request.page == 0 {
        return Err(QueryError::Plot("page numbers start at 1".to_string()));
    }
    let schema = dataset.schema();
    let rows: Vec<Row> = filtered_indices(dataset, &request.filter)
        .into_iter()
        .map(|i| dataset.rows()[i].clone())
        .collect();
    let rows = apply_scale(rows, request.scale);

    let column = |name: &str| {
        schema
            .position(name)
            .ok_or_else(|| QueryError::ColumnNotFound(name.to_string()))
    };
    let subject = column(&request.subject_column)?;
    let color = request.color.as_deref().map(column).transpose()?;
    let linetype = request.linetype.as_deref().map(column).transpose()?;

    let pagination = paginate_ids(rows.iter().map(|r| r.cell(subject).clone()), page_length);
    let on_page = pagination.page(request.page);

    let slots: HashMap<&CellValue, usize> = on_page.iter().enumerate().map(|(i, id)| (id, i)).collect();
    let mut series: Vec<SubjectSeries> = on_page
        .iter()
        .map(|id| SubjectSeries {
            name: id.to_string(),
            x: Vec::new(),
            y: Vec::new(),
            color: None,
            linetype: None,
        })
        .collect();

    let mut dropped = 0;
    for row in &rows {
        let Some(&slot) = slots.get(row.cell(subject)) else {
            continue;
        };
        let s = &mut series[slot];
        if let Some(p) = color {
            s.color.get_or_insert_with(|| row.cell(p).clone());
        }
        if let Some(p) = linetype {
            s.linetype.get_or_insert_with(|| row.cell(p).clone());
        }
        if row.x().is_finite() && row.value().is_finite() {
            s.x.push(row.x());
            s.y.push(row.value());
        } else {
            dropped += 1;
        }
    }

    let mut warnings = Vec::new();
    if dropped > 0 {
        warnings.push(format!(
            "{dropped} observations on this page had a missing or non-finite index or value and were excluded"
        ));
    }

    Ok(IndividualPage {
        series,
        page: request.page,
        num_pages: pagination.num_pages,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// Panel keys for a faceted layout: every combination of the levels of
/// `variables`, first variable varying slowest.
pub fn facet_levels(
    dataset: &BiomarkerDataset,
    variables: &[String],
) -> Result<Vec<Vec<CellValue>>, QueryError> {
    let summaries = dataset.variables();
    let level_lists = variables
        .iter()
        .map(|v| {
            summaries
                .iter()
                .find(|s| &s.name == v)
                .map(|s| s.levels.clone())
                .ok_or_else(|| QueryError::ColumnNotFound(v.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cross_product(&level_lists))
}

// ---------------------------------------------------------------------------
// Store-backed service
// ---------------------------------------------------------------------------

/// Answers queries against named datasets held by a [`DatasetStore`].
pub struct QueryService<S> {
    store: S,
    settings: Settings,
}

impl<S: DatasetStore> QueryService<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        QueryService { store, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn snapshot(&self, name: &str) -> Result<Arc<BiomarkerDataset>, QueryError> {
        self.store
            .get(name)
            .ok_or_else(|| QueryError::DatasetNotFound(name.to_string()))
    }

    pub fn metadata(&self, name: &str) -> Result<DatasetMetadata, QueryError> {
        let dataset = self.snapshot(name)?;
        let metadata = dataset.metadata().clone();
        for var in &metadata.variables {
            if var.is_high_cardinality(self.settings.high_cardinality_levels) {
                warn!(
                    "variable '{}' in '{name}' has {} levels; too many to facet",
                    var.name,
                    var.levels.len()
                );
            }
        }
        Ok(metadata)
    }

    pub fn trace(&self, name: &str, request: &TraceRequest) -> Result<Vec<Series>, QueryError> {
        let dataset = self.snapshot(name)?;
        query_trace(&dataset, request)
    }

    pub fn facets(&self, name: &str, variables: &[String]) -> Result<Vec<Vec<CellValue>>, QueryError> {
        let dataset = self.snapshot(name)?;
        facet_levels(&dataset, variables)
    }

    pub fn individual(&self, name: &str, request: &IndividualRequest) -> Result<IndividualPage, QueryError> {
        let dataset = self.snapshot(name)?;
        query_individual_paged(&dataset, request, self.settings.page_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::SeriesType;
    use crate::fit::Method;
    use crate::state::SessionStore;

    fn s(v: &str) -> CellValue {
        CellValue::String(v.to_string())
    }

    fn dataset(rows: Vec<Vec<CellValue>>) -> BiomarkerDataset {
        BiomarkerDataset::new(
            ["pid", "biomarker", "value", "day", "sex"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows,
            "day",
            SeriesType::Surveillance,
        )
        .unwrap()
    }

    fn row(pid: i64, biomarker: &str, value: f64, day: i64, sex: &str) -> Vec<CellValue> {
        vec![
            CellValue::Integer(pid),
            s(biomarker),
            CellValue::Float(value),
            CellValue::Integer(day),
            s(sex),
        ]
    }

    #[test]
    fn single_trace_named_by_filter() {
        let ds = dataset(vec![
            row(1, "IgG", 1.0, 0, "M"),
            row(2, "IgG", 2.0, 1, "F"),
            row(3, "IgG", 3.0, 2, "M"),
            row(4, "IgA", 9.0, 3, "M"),
        ]);
        let mut req = TraceRequest::new("IgG");
        req.filter = "sex:M".parse().unwrap();
        req.model = ModelSpec::with_method(Method::Linear);
        let series = query_trace(&ds, &req).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "sex:M");
        assert_eq!(series[0].raw.x, vec![0.0, 2.0]);
        assert_eq!(series[0].raw.y, vec![1.0, 3.0]);
    }

    #[test]
    fn single_point_series_is_raw_only() {
        let ds = dataset(vec![row(1, "IgG", 1.0, 0, "M"), row(2, "IgG", 2.0, 1, "F")]);
        let mut req = TraceRequest::new("IgG");
        req.disaggregate = vec!["sex".into()];
        let series = query_trace(&ds, &req).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name, "M");
        assert_eq!(series[0].raw.x, vec![0.0]);
        assert_eq!(series[0].model, Some(FitResult::empty()));
    }

    #[test]
    fn log_scale_warns_about_non_positive_values() {
        let ds = dataset(vec![
            row(1, "IgG", 1.0, 0, "M"),
            row(1, "IgG", 0.0, 1, "M"),
            row(1, "IgG", 4.0, 2, "M"),
            row(1, "IgG", 8.0, 3, "M"),
        ]);
        let mut req = TraceRequest::new("IgG");
        req.scale = Scale::Log2;
        req.model = ModelSpec::with_method(Method::Linear);
        let series = query_trace(&ds, &req).unwrap();
        assert_eq!(series[0].raw.y, vec![0.0, 2.0, 3.0]);
        assert_eq!(series[0].warnings.len(), 1);
        assert!(series[0].warnings[0].starts_with("1 of 4 observations"));
    }

    #[test]
    fn model_error_is_isolated_to_its_series() {
        let ds = dataset(vec![
            row(1, "IgG", 1.0, 0, "M"),
            row(1, "IgG", 2.0, 1, "M"),
            row(2, "IgG", 1.0, 0, "F"),
            row(2, "IgG", 2.0, 0, "F"),
        ]);
        // Push the second subject's days far apart.
        let mut rows: Vec<Vec<CellValue>> = ds.rows().iter().map(|r| r.cells().to_vec()).collect();
        rows[2][3] = CellValue::Float(-1e12);
        rows[3][3] = CellValue::Float(1e12);
        let ds = dataset(rows);
        let mut req = TraceRequest::new("IgG");
        req.disaggregate = vec!["sex".into()];
        req.model = ModelSpec::with_method(Method::Linear);
        let series = query_trace(&ds, &req).unwrap();
        assert!(series[0].model.is_some());
        assert!(series[0].warnings.is_empty());
        assert!(series[1].model.is_none());
        assert!(series[1].warnings[0].starts_with("MODEL_ERROR"));
        assert_eq!(series[1].raw.x, vec![-1e12, 1e12]);
    }

    #[test]
    fn individual_checks_columns() {
        let ds = dataset(vec![row(1, "IgG", 1.0, 0, "M")]);
        let err = query_individual(&ds, &IndividualRequest::new("subject")).unwrap_err();
        assert_eq!(err, QueryError::ColumnNotFound("subject".into()));

        let mut req = IndividualRequest::new("pid");
        req.color = Some("arm".into());
        assert_eq!(
            query_individual(&ds, &req).unwrap_err(),
            QueryError::ColumnNotFound("arm".into())
        );

        req.color = None;
        req.page = 0;
        assert_eq!(query_individual(&ds, &req).unwrap_err().code(), "PLOT_ERROR");
    }

    #[test]
    fn individual_series_carry_colour_values() {
        let ds = dataset(vec![
            row(7, "IgG", 1.0, 0, "F"),
            row(3, "IgG", 2.0, 0, "M"),
            row(7, "IgA", 5.0, 4, "F"),
        ]);
        let mut req = IndividualRequest::new("pid");
        req.color = Some("sex".into());
        let page = query_individual(&ds, &req).unwrap();
        assert_eq!(page.num_pages, 1);
        let names: Vec<&str> = page.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["7", "3"]);
        assert_eq!(page.series[0].x, vec![0.0, 4.0]);
        assert_eq!(page.series[0].y, vec![1.0, 5.0]);
        assert_eq!(page.series[0].color, Some(s("F")));
        assert_eq!(page.series[1].linetype, None);
    }

    #[test]
    fn facets_cross_covariate_levels() {
        let ds = BiomarkerDataset::new(
            ["biomarker", "value", "day", "sex", "arm"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            vec![
                vec![s("IgG"), CellValue::Float(1.0), CellValue::Integer(0), s("M"), s("a")],
                vec![s("IgG"), CellValue::Float(1.0), CellValue::Integer(0), s("F"), s("b")],
            ],
            "day",
            SeriesType::Surveillance,
        )
        .unwrap();
        let panels = facet_levels(&ds, &["sex".into(), "arm".into()]).unwrap();
        assert_eq!(
            panels,
            vec![
                vec![s("M"), s("a")],
                vec![s("M"), s("b")],
                vec![s("F"), s("a")],
                vec![s("F"), s("b")],
            ]
        );
        // The index column is not a covariate.
        assert_eq!(
            facet_levels(&ds, &["day".into()]).unwrap_err(),
            QueryError::ColumnNotFound("day".into())
        );
    }

    #[test]
    fn service_reports_unknown_dataset() {
        let store = SessionStore::new();
        let service = QueryService::new(&store, Settings::default());
        let err = service.trace("missing", &TraceRequest::new("IgG")).unwrap_err();
        assert_eq!(err, QueryError::DatasetNotFound("missing".into()));
    }

    #[test]
    fn service_uses_configured_page_length() {
        let store = SessionStore::new();
        let rows = (0..5).map(|pid| row(pid, "IgG", 1.0, 0, "M")).collect();
        store.insert("sim", dataset(rows)).unwrap();
        let settings = Settings {
            page_length: 2,
            ..Settings::default()
        };
        let service = QueryService::new(&store, settings);
        let page = service.individual("sim", &IndividualRequest::new("pid")).unwrap();
        assert_eq!(page.num_pages, 3);
        assert_eq!(page.series.len(), 2);
    }
}
