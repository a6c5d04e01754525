//! Bounded-degree polynomial least squares, served under the `gam` label.
//!
//! x is rescaled to `[-1, 1]` before the normal equations are built so that
//! high powers stay within a few orders of magnitude of each other; the
//! fitted polynomial space is unchanged.

use nalgebra::{DMatrix, DVector};

use super::{finite, Curve, Degeneracy, FitFailure, MAX_POLYNOMIAL_DEGREE};

/// Pivots smaller than this fraction of the largest matrix entry are zero.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// A fitted polynomial in the rescaled coordinate `u = (x - center) / half_range`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialFit {
    /// Ascending powers of `u`.
    pub coefficients: Vec<f64>,
    center: f64,
    half_range: f64,
}

impl PolynomialFit {
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn predict(&self, x: f64) -> f64 {
        let u = (x - self.center) / self.half_range;
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * u + c)
    }
}

/// Degree actually fitted: the cap, never above 10, and never more than the
/// data can determine (`n - 1`, and `distinct x - 1`).
pub fn effective_degree(degree_cap: usize, n: usize, distinct_x: usize) -> usize {
    degree_cap
        .min(MAX_POLYNOMIAL_DEGREE)
        .min(n.saturating_sub(1))
        .min(distinct_x.saturating_sub(1))
}

fn distinct_count(xs: &[f64]) -> usize {
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Least-squares coefficients via the normal equations.
pub fn fit_coefficients(
    xs: &[f64],
    ys: &[f64],
    degree_cap: usize,
) -> Result<(PolynomialFit, Option<Degeneracy>), FitFailure> {
    let requested = degree_cap.min(MAX_POLYNOMIAL_DEGREE);
    let degree = effective_degree(degree_cap, xs.len(), distinct_count(xs));
    let note = (degree < requested).then_some(Degeneracy::DegreeReduced {
        requested,
        used: degree,
    });

    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let center = (min + max) / 2.0;
    let half = (max - min) / 2.0;
    let half_range = if half > 0.0 { half } else { 1.0 };

    let m = degree + 1;
    let mut power_sums = vec![0.0; 2 * degree + 1];
    let mut rhs = vec![0.0; m];
    for (&x, &y) in xs.iter().zip(ys) {
        let u = (x - center) / half_range;
        let mut p = 1.0;
        for (k, sum) in power_sums.iter_mut().enumerate() {
            *sum += p;
            if k < m {
                rhs[k] += y * p;
            }
            p *= u;
        }
    }

    let normal = DMatrix::from_fn(m, m, |i, j| power_sums[i + j]);
    let coefficients = solve(normal, DVector::from_vec(rhs))?;

    Ok((
        PolynomialFit {
            coefficients,
            center,
            half_range,
        },
        note,
    ))
}

/// Solve `a · x = b` by LU decomposition with partial pivoting.
///
/// A pivot on the diagonal of `U` below the tolerance marks the system as
/// singular at that column.
pub fn solve(a: DMatrix<f64>, b: DVector<f64>) -> Result<Vec<f64>, FitFailure> {
    let scale = a.amax();
    let tolerance = PIVOT_TOLERANCE * scale.max(f64::MIN_POSITIVE);

    let lu = a.lu();
    let u = lu.u();
    // Negated comparison so that NaN pivots are singular too.
    if let Some(column) = (0..u.nrows()).find(|&i| !(u[(i, i)].abs() > tolerance)) {
        return Err(FitFailure::Singular { column });
    }
    let x = lu.solve(&b).ok_or(FitFailure::Singular {
        column: b.len().saturating_sub(1),
    })?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    Ok(x.as_slice().to_vec())
}

/// Evaluate the least-squares polynomial on `grid`.
pub fn fit(xs: &[f64], ys: &[f64], grid: &[f64], degree_cap: usize) -> Result<Curve, FitFailure> {
    let (poly, note) = fit_coefficients(xs, ys, degree_cap)?;
    Ok(Curve {
        y: grid.iter().map(|&x| finite(poly.predict(x))).collect(),
        notes: note.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_quadratic() {
        let xs: Vec<f64> = (0..12).map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 1.0 + 2.0 * x - 0.5 * x * x).collect();
        let (poly, _) = fit_coefficients(&xs, &ys, 5).unwrap();
        assert_eq!(poly.degree(), 5);
        for (&x, &y) in xs.iter().zip(&ys) {
            assert_abs_diff_eq!(poly.predict(x), y, epsilon = 1e-8);
        }
    }

    #[test]
    fn degree_never_exceeds_bounds() {
        assert_eq!(effective_degree(30, 500, 500), 10);
        assert_eq!(effective_degree(5, 3, 3), 2);
        assert_eq!(effective_degree(12, 50, 4), 3);
        assert_eq!(effective_degree(5, 1, 1), 0);
        for cap in 5..=30 {
            for n in 1..15 {
                assert!(effective_degree(cap, n, n) <= cap.min(10).min(n - 1));
            }
        }
    }

    #[test]
    fn repeated_x_reduces_to_mean() {
        let curve = fit(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0], &[5.0], 10).unwrap();
        assert_eq!(
            curve.notes,
            vec![Degeneracy::DegreeReduced {
                requested: 10,
                used: 0
            }]
        );
        assert_abs_diff_eq!(curve.y[0].unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn large_x_offsets_stay_stable() {
        // Day ordinals of calendar dates sit around 19 000.
        let xs: Vec<f64> = (0..200).map(|i| 19_000.0 + f64::from(i)).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x - 19_000.0) * 0.1).collect();
        let (poly, _) = fit_coefficients(&xs, &ys, 10).unwrap();
        assert_abs_diff_eq!(poly.predict(19_100.0), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn solve_pivots_on_zero_diagonal() {
        let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let x = solve(a, DVector::from_vec(vec![2.0, 3.0])).unwrap();
        assert_eq!(x, vec![3.0, 2.0]);
    }

    #[test]
    fn clustered_x_is_singular() {
        // Forty nearly coincident x values and one far away: only two
        // directions are resolvable, so the third pivot vanishes.
        let mut xs: Vec<f64> = (0..40).map(|i| f64::from(i) * 1e-9).collect();
        let mut ys: Vec<f64> = (0..40).map(|i| f64::from(i % 3)).collect();
        xs.push(100.0);
        ys.push(5.0);
        let err = fit_coefficients(&xs, &ys, 30).unwrap_err();
        assert!(matches!(err, FitFailure::Singular { .. }), "{err:?}");
    }

    #[test]
    fn solve_reports_singular_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let err = solve(a, DVector::from_vec(vec![1.0, 2.0])).unwrap_err();
        assert_eq!(err, FitFailure::Singular { column: 1 });
    }
}
