//! Smoothing primitives for derivative melting-curve analysis.

use crate::error::{AssayError, Result};
use nalgebra::DMatrix;

/// Savitzky–Golay smoothing: local polynomial least squares.
///
/// Interior points use the precomputed central convolution; the first and
/// last half-windows are evaluated from a polynomial fitted to the leading
/// and trailing window respectively, so the ends are not flattened.
///
/// `window` must be odd, `order < window <= y.len()`.
pub fn savitzky_golay(y: &[f64], window: usize, order: usize) -> Result<Vec<f64>> {
    let n = y.len();
    if window % 2 == 0 || window == 0 {
        return Err(AssayError::InvalidParameter(
            "smoothing window must be odd".to_string(),
        ));
    }
    if order >= window {
        return Err(AssayError::InvalidParameter(
            "polynomial order must be below the window size".to_string(),
        ));
    }
    if window > n {
        return Err(AssayError::InvalidParameter(format!(
            "smoothing window {} exceeds trace length {}",
            window, n
        )));
    }

    let half = window / 2;
    let p = order + 1;

    // Central design matrix over offsets -half..=half.
    let design = DMatrix::from_fn(window, p, |r, c| (r as f64 - half as f64).powi(c as i32));
    let normal = (design.transpose() * &design)
        .try_inverse()
        .ok_or_else(|| AssayError::Numerical("singular smoothing design".to_string()))?;
    let projector = normal * design.transpose();

    // Value at offset 0 is the first polynomial coefficient.
    let center_weights: Vec<f64> = (0..window).map(|j| projector[(0, j)]).collect();

    let mut smoothed = vec![0.0; n];
    for i in half..n - half {
        smoothed[i] = (0..window)
            .map(|j| center_weights[j] * y[i - half + j])
            .sum();
    }

    // Head: polynomial over the first window evaluated at offsets 0..half.
    let head = polyfit_window(&y[..window], p, &projector);
    for (i, item) in smoothed.iter_mut().take(half).enumerate() {
        *item = eval_poly(&head, i as f64 - half as f64);
    }
    // Tail: same over the last window.
    let tail = polyfit_window(&y[n - window..], p, &projector);
    for i in 0..half {
        smoothed[n - half + i] = eval_poly(&tail, (i + 1) as f64);
    }

    Ok(smoothed)
}

fn polyfit_window(y: &[f64], p: usize, projector: &DMatrix<f64>) -> Vec<f64> {
    (0..p)
        .map(|c| (0..y.len()).map(|j| projector[(c, j)] * y[j]).sum())
        .collect()
}

fn eval_poly(coeffs: &[f64], t: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c)
}

/// Natural cubic spline through `(knots_x, knots_y)`, evaluated at `query`.
///
/// Knot abscissae must be strictly increasing. Queries beyond the knot range
/// extrapolate with the boundary segment.
pub fn cubic_spline(knots_x: &[f64], knots_y: &[f64], query: &[f64]) -> Result<Vec<f64>> {
    let n = knots_x.len();
    if n != knots_y.len() {
        return Err(AssayError::InvalidParameter(
            "spline knot x/y length mismatch".to_string(),
        ));
    }
    if n < 2 {
        return Err(AssayError::InvalidParameter(
            "spline needs at least two knots".to_string(),
        ));
    }
    if knots_x.windows(2).any(|w| w[1] <= w[0]) {
        return Err(AssayError::InvalidParameter(
            "spline knots must be strictly increasing".to_string(),
        ));
    }

    // Second derivatives with natural boundary (zero curvature at the ends),
    // solved with the Thomas tridiagonal recurrence.
    let mut m = vec![0.0; n];
    if n > 2 {
        let rows = n - 2;
        let mut diag = vec![0.0; rows];
        let mut upper = vec![0.0; rows];
        let mut lower = vec![0.0; rows];
        let mut rhs = vec![0.0; rows];
        for i in 0..rows {
            let h0 = knots_x[i + 1] - knots_x[i];
            let h1 = knots_x[i + 2] - knots_x[i + 1];
            lower[i] = h0;
            diag[i] = 2.0 * (h0 + h1);
            upper[i] = h1;
            rhs[i] = 6.0
                * ((knots_y[i + 2] - knots_y[i + 1]) / h1 - (knots_y[i + 1] - knots_y[i]) / h0);
        }
        for i in 1..rows {
            let factor = lower[i] / diag[i - 1];
            diag[i] -= factor * upper[i - 1];
            rhs[i] -= factor * rhs[i - 1];
        }
        m[rows] = rhs[rows - 1] / diag[rows - 1];
        for i in (1..rows).rev() {
            m[i] = (rhs[i - 1] - upper[i - 1] * m[i + 1]) / diag[i - 1];
        }
    }

    let values = query
        .iter()
        .map(|&x| {
            // Segment index, clamped so out-of-range queries extrapolate.
            let seg = match knots_x.partition_point(|&k| k <= x) {
                0 => 0,
                idx => (idx - 1).min(n - 2),
            };
            let h = knots_x[seg + 1] - knots_x[seg];
            let a = (knots_x[seg + 1] - x) / h;
            let b = (x - knots_x[seg]) / h;
            a * knots_y[seg]
                + b * knots_y[seg + 1]
                + ((a * a * a - a) * m[seg] + (b * b * b - b) * m[seg + 1]) * h * h / 6.0
        })
        .collect();
    Ok(values)
}

/// Derivative estimated from a parabola through each point and its two
/// neighbours at `spacing = ⌈N/100⌉`.
///
/// Returns the abscissae that received a derivative (the interior
/// `spacing..N−spacing`) and the derivative values.
pub fn moving_parabola_derivative(xs: &[f64], ys: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    let n = xs.len();
    if n != ys.len() {
        return Err(AssayError::InvalidParameter(
            "derivative x/y length mismatch".to_string(),
        ));
    }
    let spacing = n.div_ceil(100).max(1);
    if n < 2 * spacing + 1 {
        return Err(AssayError::EmptyData(format!(
            "trace of {} points is too short for derivative analysis",
            n
        )));
    }

    let mut out_x = Vec::with_capacity(n - 2 * spacing);
    let mut out_dy = Vec::with_capacity(n - 2 * spacing);
    for i in spacing..n - spacing {
        let (x0, x1, x2) = (xs[i - spacing], xs[i], xs[i + spacing]);
        let (y0, y1, y2) = (ys[i - spacing], ys[i], ys[i + spacing]);
        // Analytic derivative of the Lagrange parabola at the centre point.
        let dy = y0 * (x1 - x2) / ((x0 - x1) * (x0 - x2))
            + y1 * (2.0 * x1 - x0 - x2) / ((x1 - x0) * (x1 - x2))
            + y2 * (x1 - x0) / ((x2 - x0) * (x2 - x1));
        out_x.push(x1);
        out_dy.push(dy);
    }
    Ok((out_x, out_dy))
}
