use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::{BiomarkerDataset, Row, Schema};
use crate::error::QueryError;

// ---------------------------------------------------------------------------
// Filter predicate: (variable, level) pairs, ANDed
// ---------------------------------------------------------------------------

/// Compound equality predicate. Wire form: `"var:level+var:level"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    pairs: Vec<(String, String)>,
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one `variable == level` constraint.
    pub fn with(mut self, variable: impl Into<String>, level: impl Into<String>) -> Self {
        self.pairs.push((variable.into(), level.into()));
        self
    }

    /// Concatenate two predicates; the result matches rows matching both.
    pub fn and(mut self, other: FilterPredicate) -> Self {
        self.pairs.extend(other.pairs);
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Series name for an unsplit trace.
    pub fn label(&self) -> String {
        if self.is_empty() {
            "all".to_string()
        } else {
            self.to_string()
        }
    }
}

impl FromStr for FilterPredicate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(FilterPredicate::default());
        }
        let pairs = s
            .split('+')
            .map(|segment| match segment.split_once(':') {
                Some((var, level)) if !var.is_empty() => Ok((var.to_string(), level.to_string())),
                _ => Err(QueryError::InvalidFilter(segment.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterPredicate { pairs })
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (var, level)) in self.pairs.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{var}:{level}")?;
        }
        Ok(())
    }
}

/// Parse a `+`-joined list of variable names (the disaggregation wire form).
pub fn parse_variable_list(s: &str) -> Vec<String> {
    s.split('+')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn row_matches(row: &Row, resolved: &[(Option<usize>, &str)]) -> bool {
    resolved.iter().all(|(pos, level)| match pos {
        Some(p) => row.cell(*p).matches_level(level),
        // Column not in the schema: nothing can match.
        None => false,
    })
}

fn resolve<'p>(schema: &Schema, predicate: &'p FilterPredicate) -> Vec<(Option<usize>, &'p str)> {
    predicate
        .pairs
        .iter()
        .map(|(var, level)| (schema.position(var), level.as_str()))
        .collect()
}

/// Keep the rows satisfying every pair of `predicate`, preserving order.
pub fn apply_filter(schema: &Schema, mut rows: Vec<Row>, predicate: &FilterPredicate) -> Vec<Row> {
    if predicate.is_empty() {
        return rows;
    }
    let resolved = resolve(schema, predicate);
    rows.retain(|row| row_matches(row, &resolved));
    rows
}

/// Return indices of rows that pass the predicate.
pub fn filtered_indices(dataset: &BiomarkerDataset, predicate: &FilterPredicate) -> Vec<usize> {
    let resolved = resolve(dataset.schema(), predicate);
    dataset
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| row_matches(row, &resolved))
        .map(|(i, _)| i)
        .collect()
}

// ---------------------------------------------------------------------------
// Scale transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Natural,
    Log,
    Log2,
}

impl Scale {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Scale::Natural => value,
            Scale::Log => value.ln(),
            Scale::Log2 => value.log2(),
        }
    }
}

impl FromStr for Scale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "natural" => Ok(Scale::Natural),
            "log" => Ok(Scale::Log),
            "log2" => Ok(Scale::Log2),
            other => Err(format!("unknown scale '{other}'")),
        }
    }
}

/// Replace each row's value by its transform. Non-positive values under a
/// log scale become NaN or -inf and are left for the fitter to drop.
pub fn apply_scale(mut rows: Vec<Row>, scale: Scale) -> Vec<Row> {
    if scale == Scale::Natural {
        return rows;
    }
    for row in &mut rows {
        row.set_value(scale.apply(row.value()));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{CellValue, SeriesType};

    fn dataset() -> BiomarkerDataset {
        let cols = ["biomarker", "value", "day", "sex", "age"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let s = |v: &str| CellValue::String(v.to_string());
        BiomarkerDataset::new(
            cols,
            vec![
                vec![s("IgG"), CellValue::Float(1.0), CellValue::Integer(0), s("M"), CellValue::Integer(30)],
                vec![s("IgG"), CellValue::Float(4.0), CellValue::Integer(1), s("F"), CellValue::Integer(40)],
                vec![s("IgG"), CellValue::Float(8.0), CellValue::Integer(2), s("M"), CellValue::Integer(40)],
                vec![s("IgA"), CellValue::Float(0.0), CellValue::Integer(3), s("F"), CellValue::Integer(30)],
            ],
            "day",
            SeriesType::Surveillance,
        )
        .unwrap()
    }

    #[test]
    fn parses_and_prints_wire_form() {
        let p: FilterPredicate = "sex:M+age:40".parse().unwrap();
        assert_eq!(
            p.pairs(),
            &[("sex".to_string(), "M".to_string()), ("age".to_string(), "40".to_string())]
        );
        assert_eq!(p.to_string(), "sex:M+age:40");
        assert_eq!(p.label(), "sex:M+age:40");
        assert_eq!(FilterPredicate::new().label(), "all");
    }

    #[test]
    fn level_may_contain_colons() {
        let p: FilterPredicate = "time:10:30".parse().unwrap();
        assert_eq!(p.pairs(), &[("time".to_string(), "10:30".to_string())]);
    }

    #[test]
    fn malformed_segment_is_rejected() {
        let err = "sex:M+age".parse::<FilterPredicate>().unwrap_err();
        assert_eq!(err, QueryError::InvalidFilter("age".to_string()));
        assert!(":M".parse::<FilterPredicate>().is_err());
    }

    #[test]
    fn empty_predicate_is_identity() {
        let ds = dataset();
        let rows = apply_filter(ds.schema(), ds.rows().to_vec(), &FilterPredicate::new());
        assert_eq!(rows, ds.rows());
    }

    #[test]
    fn numeric_levels_compare_numerically() {
        let ds = dataset();
        let p = FilterPredicate::new().with("age", "40.0");
        assert_eq!(filtered_indices(&ds, &p), vec![1, 2]);
    }

    #[test]
    fn unknown_column_matches_nothing() {
        let ds = dataset();
        let p = FilterPredicate::new().with("smoker", "yes");
        assert!(apply_filter(ds.schema(), ds.rows().to_vec(), &p).is_empty());
    }

    #[test]
    fn filters_compose_as_concatenation() {
        let ds = dataset();
        let p1 = FilterPredicate::new().with("sex", "M");
        let p2 = FilterPredicate::new().with("age", "40");
        let stepwise = apply_filter(
            ds.schema(),
            apply_filter(ds.schema(), ds.rows().to_vec(), &p1),
            &p2,
        );
        let combined = apply_filter(ds.schema(), ds.rows().to_vec(), &p1.and(p2));
        assert_eq!(stepwise, combined);
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].value(), 8.0);
    }

    #[test]
    fn natural_scale_is_identity_and_log_is_monotonic() {
        let ds = dataset();
        let natural = apply_scale(ds.rows().to_vec(), Scale::Natural);
        assert_eq!(natural, ds.rows());

        let logged = apply_scale(ds.rows()[..3].to_vec(), Scale::Log2);
        let values: Vec<f64> = logged.iter().map(Row::value).collect();
        assert_eq!(values, vec![0.0, 2.0, 3.0]);
    }

    #[test]
    fn log_of_zero_propagates_non_finite() {
        let ds = dataset();
        let logged = apply_scale(ds.rows().to_vec(), Scale::Log);
        assert!(!logged[3].value().is_finite());
    }

    #[test]
    fn variable_list_skips_blanks() {
        assert_eq!(parse_variable_list("sex+ age+"), vec!["sex", "age"]);
        assert!(parse_variable_list("").is_empty());
    }
}
