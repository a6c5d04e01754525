//! Curve fitting: turns (x, y) observations into a trend sampled on an
//! integer grid.
//!
//! ```text
//!   observations ──► drop non-finite ──► resolve strategy ──► grid
//!                                              │
//!            ┌─────────────┬───────────────────┼──────────────┐
//!            ▼             ▼                   ▼              │
//!         linear      polynomial            loess             │
//!            │             │ Err(FitFailure)   │              │
//!            │             └──► linear ◄───────┘ (fallback)   │
//!            ▼                                                ▼
//!        FitOutcome { result, strategy, notes, fallback }
//! ```
//!
//! The `gam` method label is kept for compatibility with existing clients,
//! but it selects bounded-degree polynomial least squares, not a generalized
//! additive model.

pub mod linear;
pub mod loess;
pub mod polynomial;

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ModelError;

/// Above this many observations `auto` switches from loess to polynomial.
pub const AUTO_POLYNOMIAL_THRESHOLD: usize = 1000;
/// Hard ceiling on the polynomial degree, whatever the requested cap.
pub const MAX_POLYNOMIAL_DEGREE: usize = 10;
pub const DEFAULT_SPAN: f64 = 0.75;
pub const DEFAULT_DEGREE_CAP: usize = 10;
pub const MIN_DEGREE_CAP: usize = 5;
pub const MAX_DEGREE_CAP: usize = 30;
/// Widest x range, in index units, that will be sampled onto a grid.
pub const MAX_GRID_POINTS: usize = 1_000_000;

// ---------------------------------------------------------------------------
// Model selection
// ---------------------------------------------------------------------------

/// User-facing method selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Auto,
    Linear,
    /// Polynomial regression under its historical label.
    Gam,
    Loess,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Method::Auto),
            "linear" => Ok(Method::Linear),
            "gam" => Ok(Method::Gam),
            "loess" => Ok(Method::Loess),
            other => Err(format!("unknown method '{other}'")),
        }
    }
}

/// The algorithm actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Linear,
    Polynomial,
    LocalWeighted,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "linear"),
            Strategy::Polynomial => write!(f, "polynomial"),
            Strategy::LocalWeighted => write!(f, "loess"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct RawModelSpec {
    method: Method,
    span: f64,
    #[serde(alias = "k")]
    degree_cap: usize,
}

impl Default for RawModelSpec {
    fn default() -> Self {
        RawModelSpec {
            method: Method::Auto,
            span: DEFAULT_SPAN,
            degree_cap: DEFAULT_DEGREE_CAP,
        }
    }
}

impl From<RawModelSpec> for ModelSpec {
    fn from(raw: RawModelSpec) -> Self {
        ModelSpec::new(raw.method, raw.span, raw.degree_cap)
    }
}

/// Method plus tuning parameters. `span` is kept in `[0, 1]` and
/// `degree_cap` in `[5, 30]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawModelSpec")]
pub struct ModelSpec {
    method: Method,
    span: f64,
    degree_cap: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        RawModelSpec::default().into()
    }
}

impl ModelSpec {
    pub fn new(method: Method, span: f64, degree_cap: usize) -> Self {
        let span = if span.is_nan() { DEFAULT_SPAN } else { span.clamp(0.0, 1.0) };
        ModelSpec {
            method,
            span,
            degree_cap: degree_cap.clamp(MIN_DEGREE_CAP, MAX_DEGREE_CAP),
        }
    }

    pub fn with_method(method: Method) -> Self {
        ModelSpec {
            method,
            ..ModelSpec::default()
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn span(&self) -> f64 {
        self.span
    }

    pub fn degree_cap(&self) -> usize {
        self.degree_cap
    }

    /// Pick the strategy for `n` usable observations.
    pub fn resolve(&self, n: usize) -> Strategy {
        match self.method {
            Method::Linear => Strategy::Linear,
            Method::Gam => Strategy::Polynomial,
            Method::Loess => Strategy::LocalWeighted,
            Method::Auto if n > AUTO_POLYNOMIAL_THRESHOLD => Strategy::Polynomial,
            Method::Auto => Strategy::LocalWeighted,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy results
// ---------------------------------------------------------------------------

/// Expected numerical edge cases, handled in place by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Degeneracy {
    /// Every x is identical; the curve is the mean of y.
    ConstantX,
    /// The polynomial degree was lowered to what the data can support.
    DegreeReduced { requested: usize, used: usize },
    /// Grid points whose neighbourhood had no positive weight.
    NearestNeighbour { points: usize },
    /// Grid points whose weighted x-variance was zero.
    FlatNeighbourhood { points: usize },
}

/// A strategy could not produce a curve.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FitFailure {
    #[error("singular normal equations at column {column}")]
    Singular { column: usize },
    #[error("non-finite coefficients")]
    NonFinite,
}

/// Predictions on the grid plus any edge cases met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub y: Vec<Option<f64>>,
    pub notes: Vec<Degeneracy>,
}

/// A fitted curve sampled on the integer grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FitResult {
    pub x: Vec<f64>,
    pub y: Vec<Option<f64>>,
}

impl FitResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Everything [`fit`] learned while producing a [`FitResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub result: FitResult,
    pub strategy: Strategy,
    pub notes: Vec<Degeneracy>,
    /// Set when the resolved strategy failed and the linear fit was used.
    pub fallback: Option<FitFailure>,
    /// Observations discarded for non-finite x or y.
    pub dropped: usize,
}

impl FitOutcome {
    /// Messages worth surfacing next to the series.
    pub fn warnings(&self) -> Vec<String> {
        self.fallback
            .iter()
            .map(|failure| {
                format!("{} fit failed ({failure}); fell back to linear regression", self.strategy)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Fit `observations` according to `spec`.
///
/// Non-finite points are dropped first; no remaining points gives an empty
/// curve. Only an exhausted fallback chain is an error.
pub fn fit(observations: &[(f64, f64)], spec: &ModelSpec) -> Result<FitOutcome, ModelError> {
    let spec = ModelSpec::new(spec.method, spec.span, spec.degree_cap);
    let (xs, ys): (Vec<f64>, Vec<f64>) = observations
        .iter()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .copied()
        .unzip();
    let dropped = observations.len() - xs.len();
    let strategy = spec.resolve(xs.len());

    if xs.is_empty() {
        return Ok(FitOutcome {
            result: FitResult::empty(),
            strategy,
            notes: Vec::new(),
            fallback: None,
            dropped,
        });
    }

    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max - min < MAX_GRID_POINTS as f64) {
        return Err(ModelError(format!(
            "x range {min}..{max} is too wide to sample on a unit grid"
        )));
    }

    let grid = grid(&xs);
    debug!(
        "fitting {} observations with {strategy} on {} grid points",
        xs.len(),
        grid.len()
    );

    let attempt = match strategy {
        Strategy::Linear => linear::fit(&xs, &ys, &grid),
        Strategy::Polynomial => polynomial::fit(&xs, &ys, &grid, spec.degree_cap),
        Strategy::LocalWeighted => Ok(loess::fit(&xs, &ys, &grid, spec.span)),
    };

    let (curve, fallback) = match attempt {
        Ok(curve) => (curve, None),
        Err(failure) => {
            warn!("{strategy} fit failed ({failure}), falling back to linear");
            let curve = linear::fit(&xs, &ys, &grid).map_err(|e| {
                ModelError(format!(
                    "{strategy} fit failed ({failure}) and the linear fallback failed ({e})"
                ))
            })?;
            (curve, Some(failure))
        }
    };

    for note in &curve.notes {
        debug!("{strategy}: {note:?}");
    }

    Ok(FitOutcome {
        result: FitResult { x: grid, y: curve.y },
        strategy,
        notes: curve.notes,
        fallback,
        dropped,
    })
}

/// `min(x), min(x) + 1, ...` until `max(x)` is covered.
pub fn grid(xs: &[f64]) -> Vec<f64> {
    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return Vec::new();
    }
    let steps = (max - min).ceil() as usize;
    (0..=steps).map(|i| min + i as f64).collect()
}

/// Map a prediction to `None` when it is not a usable number.
pub(crate) fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parameters_are_clamped() {
        let spec = ModelSpec::new(Method::Loess, 3.0, 100);
        assert_eq!(spec.span(), 1.0);
        assert_eq!(spec.degree_cap(), MAX_DEGREE_CAP);

        let spec = ModelSpec::new(Method::Gam, -1.0, 1);
        assert_eq!(spec.span(), 0.0);
        assert_eq!(spec.degree_cap(), MIN_DEGREE_CAP);

        assert_eq!(ModelSpec::new(Method::Auto, f64::NAN, 10).span(), DEFAULT_SPAN);
    }

    #[test]
    fn deserialized_spec_is_clamped() {
        let spec: ModelSpec = serde_json::from_str(r#"{"method":"gam","span":7.5,"k":2}"#).unwrap();
        assert_eq!(spec.method(), Method::Gam);
        assert_eq!(spec.span(), 1.0);
        assert_eq!(spec.degree_cap(), MIN_DEGREE_CAP);

        let spec: ModelSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, ModelSpec::default());
    }

    #[test]
    fn auto_resolution_depends_on_count() {
        let auto = ModelSpec::default();
        assert_eq!(auto.resolve(1000), Strategy::LocalWeighted);
        assert_eq!(auto.resolve(1001), Strategy::Polynomial);
        assert_eq!(ModelSpec::with_method(Method::Gam).resolve(3), Strategy::Polynomial);
        assert_eq!(ModelSpec::with_method(Method::Linear).resolve(5000), Strategy::Linear);
    }

    #[test]
    fn grid_covers_fractional_max() {
        assert_eq!(grid(&[0.5, 2.2]), vec![0.5, 1.5, 2.5]);
        assert_eq!(grid(&[5.0, 5.0]), vec![5.0]);
        assert!(grid(&[]).is_empty());
    }

    #[test]
    fn empty_input_gives_empty_curve_for_every_method() {
        for method in [Method::Auto, Method::Linear, Method::Gam, Method::Loess] {
            let outcome = fit(&[], &ModelSpec::with_method(method)).unwrap();
            assert!(outcome.result.is_empty());
            assert!(outcome.result.y.is_empty());
        }
    }

    #[test]
    fn non_finite_observations_are_dropped() {
        let obs = [(0.0, 1.0), (f64::NAN, 2.0), (1.0, f64::NEG_INFINITY), (2.0, 3.0)];
        let outcome = fit(&obs, &ModelSpec::with_method(Method::Linear)).unwrap();
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.result.x, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn overly_wide_range_is_a_model_error() {
        let err = fit(&[(0.0, 1.0), (1e9, 2.0)], &ModelSpec::default()).unwrap_err();
        assert!(err.0.contains("too wide"));
    }

    #[test]
    fn fallback_warning_names_strategy_and_cause() {
        let outcome = FitOutcome {
            result: FitResult::empty(),
            strategy: Strategy::Polynomial,
            notes: Vec::new(),
            fallback: Some(FitFailure::Singular { column: 2 }),
            dropped: 0,
        };
        assert_eq!(
            outcome.warnings(),
            vec!["polynomial fit failed (singular normal equations at column 2); fell back to linear regression"]
        );
    }
}
