//! Ordinary least-squares simple linear regression.

use super::{finite, Curve, Degeneracy, FitFailure};

/// `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCoefficients {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearCoefficients {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Closed-form slope and intercept from the sums of `x`, `y`, `xy` and `x²`.
///
/// When all x coincide the denominator vanishes and the line is flat at the
/// mean of y, tagged [`Degeneracy::ConstantX`]. Callers guarantee
/// `xs.len() == ys.len() > 0`.
pub fn coefficients(
    xs: &[f64],
    ys: &[f64],
) -> Result<(LinearCoefficients, Option<Degeneracy>), FitFailure> {
    let n = xs.len() as f64;
    let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        sx += x;
        sy += y;
        sxy += x * y;
        sxx += x * x;
    }

    let denom = n * sxx - sx * sx;
    if !denom.is_finite() || !sxy.is_finite() || !sy.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    let (coef, note) = if denom == 0.0 || denom.abs() <= f64::EPSILON * n * sxx {
        let mean = sy / n;
        (
            LinearCoefficients {
                slope: 0.0,
                intercept: mean,
            },
            Some(Degeneracy::ConstantX),
        )
    } else {
        let slope = (n * sxy - sx * sy) / denom;
        let intercept = (sy - slope * sx) / n;
        (LinearCoefficients { slope, intercept }, None)
    };

    if !coef.slope.is_finite() || !coef.intercept.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    Ok((coef, note))
}

/// Evaluate the least-squares line on `grid`.
pub fn fit(xs: &[f64], ys: &[f64], grid: &[f64]) -> Result<Curve, FitFailure> {
    let (coef, note) = coefficients(xs, ys)?;
    Ok(Curve {
        y: grid.iter().map(|&x| finite(coef.predict(x))).collect(),
        notes: note.into_iter().collect(),
    })
}
