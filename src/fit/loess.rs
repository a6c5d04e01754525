//! Locally weighted linear regression with tricube weights.

use super::{finite, Curve, Degeneracy};

/// Tricube kernel on a normalized distance; zero outside `[0, 1)`.
#[inline]
pub fn tricube(u: f64) -> f64 {
    if !(0.0..1.0).contains(&u) {
        return 0.0;
    }
    let t = 1.0 - u * u * u;
    t * t * t
}

/// Neighbourhood size `k = max(2, floor(span * n))`, never above `n`.
pub fn neighbourhood_size(span: f64, n: usize) -> usize {
    let k = (span * n as f64).floor() as usize;
    k.max(2).min(n)
}

/// How a single grid point was estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Estimate {
    Regression(f64),
    /// No positive weight: y of the first nearest observation, or the mean
    /// y when the whole neighbourhood sits at `x0`.
    Nearest(f64),
    /// Zero weighted x-variance: weighted mean of y.
    Flat(f64),
}

/// Distance buffers reused across grid points.
#[derive(Debug, Default)]
struct Workspace {
    distances: Vec<f64>,
    selection: Vec<f64>,
}

/// Local linear estimate at `x0`.
fn estimate_at(xs: &[f64], ys: &[f64], x0: f64, k: usize, ws: &mut Workspace) -> Estimate {
    ws.distances.clear();
    ws.distances.extend(xs.iter().map(|&x| (x - x0).abs()));
    let scratch = &ws.distances;
    let nearest = scratch.iter().copied().fold(f64::INFINITY, f64::min);

    ws.selection.clear();
    ws.selection.extend_from_slice(scratch);
    let (_, &mut d_max, _) = ws.selection.select_nth_unstable_by(k - 1, f64::total_cmp);

    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;
    if d_max > 0.0 {
        for (i, &d) in scratch.iter().enumerate() {
            let w = tricube(d / d_max);
            sum_w += w;
            sum_wx += w * xs[i];
            sum_wy += w * ys[i];
        }
    }

    if d_max == 0.0 {
        let (total, count) = scratch
            .iter()
            .zip(ys)
            .filter(|&(&d, _)| d == 0.0)
            .fold((0.0, 0usize), |(t, c), (_, &y)| (t + y, c + 1));
        return Estimate::Nearest(total / count as f64);
    }
    if sum_w <= 0.0 {
        // Ties go to the earliest row.
        let first = scratch.iter().position(|&d| d == nearest).unwrap_or(0);
        return Estimate::Nearest(ys[first]);
    }

    let mean_x = sum_wx / sum_w;
    let mean_y = sum_wy / sum_w;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &d) in scratch.iter().enumerate() {
        let w = tricube(d / d_max);
        let dx = xs[i] - mean_x;
        cov += w * dx * (ys[i] - mean_y);
        var += w * dx * dx;
    }

    if var == 0.0 {
        return Estimate::Flat(mean_y);
    }
    let slope = cov / var;
    Estimate::Regression(mean_y + slope * (x0 - mean_x))
}

/// Evaluate the loess smoother on `grid`. Never fails: degenerate
/// neighbourhoods fall back as described on [`Estimate`].
pub fn fit(xs: &[f64], ys: &[f64], grid: &[f64], span: f64) -> Curve {
    let k = neighbourhood_size(span, xs.len());
    let mut ws = Workspace::default();
    let mut nearest = 0;
    let mut flat = 0;

    let y = grid
        .iter()
        .map(|&x0| {
            let v = match estimate_at(xs, ys, x0, k, &mut ws) {
                Estimate::Regression(v) => v,
                Estimate::Nearest(v) => {
                    nearest += 1;
                    v
                }
                Estimate::Flat(v) => {
                    flat += 1;
                    v
                }
            };
            finite(v)
        })
        .collect();

    let mut notes = Vec::new();
    if nearest > 0 {
        notes.push(Degeneracy::NearestNeighbour { points: nearest });
    }
    if flat > 0 {
        notes.push(Degeneracy::FlatNeighbourhood { points: flat });
    }
    Curve { y, notes }
}
