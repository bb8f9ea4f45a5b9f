//! Locally weighted scatterplot smoothing (lowess)
//!
//! Used to fit the mean-variance trend in voom. Local linear fits with
//! tricube distance weights and bisquare robustness iterations, following
//! R's lowess() defaults.

/// Fit a lowess curve through (x, y).
/// R equivalent: lowess(x, y, f=span) in stats
///
/// Returns the points sorted by x together with their smoothed values.
/// `span` is the fraction of points in each local window; `iterations`
/// robustness passes downweight outliers with bisquare weights.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> (Vec<f64>, Vec<f64>) {
    assert_eq!(x.len(), y.len());
    let n = x.len();
    if n == 0 {
        return (vec![], vec![]);
    }
    if n == 1 {
        return (vec![x[0]], vec![y[0]]);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(std::cmp::Ordering::Equal));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let window = ((span * n as f64).ceil() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iter in 0..=iterations {
        for i in 0..n {
            fitted[i] = local_fit(&xs, &ys, &robustness, i, window);
        }

        if iter == iterations {
            break;
        }

        // Bisquare robustness weights from residuals
        let mut abs_res: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, _)| (ys[i] - fitted[i]).abs())
            .collect();
        abs_res.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let s = 6.0 * median_sorted(&abs_res);
        if s <= 0.0 {
            // Perfect fit; nothing left to downweight
            break;
        }
        for i in 0..n {
            let u = (ys[i] - fitted[i]).abs() / s;
            robustness[i] = if u >= 1.0 { 0.0 } else { (1.0 - u * u).powi(2) };
        }
    }

    (xs, fitted)
}

/// Weighted local linear fit at point `i` over its `window` nearest
/// neighbors in x.
fn local_fit(xs: &[f64], ys: &[f64], robustness: &[f64], i: usize, window: usize) -> f64 {
    let n = xs.len();

    // Nearest-neighbor window around i (xs is sorted)
    let mut lo = i.saturating_sub(window / 2);
    let mut hi = (lo + window).min(n);
    lo = hi.saturating_sub(window);
    // Slide the window toward the closer boundary
    while lo > 0 && xs[i] - xs[lo - 1] < xs[hi - 1] - xs[i] {
        lo -= 1;
        hi -= 1;
    }

    let h = (xs[i] - xs[lo]).abs().max((xs[hi - 1] - xs[i]).abs());

    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut swxx = 0.0;
    let mut swxy = 0.0;
    for j in lo..hi {
        let d = if h > 0.0 { (xs[j] - xs[i]).abs() / h } else { 0.0 };
        if d >= 1.0 && h > 0.0 {
            continue;
        }
        let tricube = (1.0 - d * d * d).powi(3);
        let w = tricube * robustness[j];
        if w <= 0.0 {
            continue;
        }
        sw += w;
        swx += w * xs[j];
        swy += w * ys[j];
        swxx += w * xs[j] * xs[j];
        swxy += w * xs[j] * ys[j];
    }

    if sw <= 0.0 {
        return ys[i];
    }

    let mean_x = swx / sw;
    let mean_y = swy / sw;
    let var_x = swxx / sw - mean_x * mean_x;
    if var_x <= f64::EPSILON * mean_x.abs().max(1.0) {
        // Degenerate window (tied x values): weighted mean
        return mean_y;
    }
    let cov_xy = swxy / sw - mean_x * mean_y;
    let slope = cov_xy / var_x;
    mean_y + slope * (xs[i] - mean_x)
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Linear interpolation with boundary clamping.
/// R equivalent: approx(x, y, xout, rule=2) in stats
///
/// `xs` must be sorted ascending. Values outside the range take the
/// boundary value.
pub fn interp_linear(xs: &[f64], ys: &[f64], xout: f64) -> f64 {
    assert_eq!(xs.len(), ys.len());
    let n = xs.len();
    if n == 0 {
        return f64::NAN;
    }
    if xout <= xs[0] {
        return ys[0];
    }
    if xout >= xs[n - 1] {
        return ys[n - 1];
    }

    // Binary search for the bracketing interval
    let mut lo = 0;
    let mut hi = n - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if xs[mid] <= xout {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    if xs[hi] == xs[lo] {
        return ys[lo];
    }
    let t = (xout - xs[lo]) / (xs[hi] - xs[lo]);
    ys[lo] + t * (ys[hi] - ys[lo])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowess_recovers_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 * v + 1.0).collect();
        let (xs, fitted) = lowess(&x, &y, 0.5, 3);
        for (i, &xv) in xs.iter().enumerate() {
            assert!(
                (fitted[i] - (2.0 * xv + 1.0)).abs() < 1e-6,
                "lowess should reproduce a straight line exactly"
            );
        }
    }

    #[test]
    fn test_lowess_smooths_noise() {
        // Deterministic zig-zag around a flat line
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = (0..40)
            .map(|i| 5.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let (_, fitted) = lowess(&x, &y, 0.5, 3);
        for &f in fitted.iter().skip(5).take(30) {
            assert!((f - 5.0).abs() < 0.3, "smoothed value {} too far from 5.0", f);
        }
    }

    #[test]
    fn test_lowess_handles_tied_x() {
        let x = vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (xs, fitted) = lowess(&x, &y, 1.0, 3);
        assert_eq!(xs.len(), 6);
        assert!(fitted.iter().all(|f| f.is_finite()));
    }

    #[test]
    fn test_interp_linear() {
        let xs = vec![0.0, 1.0, 2.0];
        let ys = vec![0.0, 10.0, 20.0];
        assert_eq!(interp_linear(&xs, &ys, 0.5), 5.0);
        assert_eq!(interp_linear(&xs, &ys, -1.0), 0.0);
        assert_eq!(interp_linear(&xs, &ys, 5.0), 20.0);
    }
}
