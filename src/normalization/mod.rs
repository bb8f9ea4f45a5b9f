//! Library-size normalization: TMM scale factors and log2-CPM transform

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::data::VoomDataSet;
use crate::error::{LimmaError, Result};

/// Method for library-size scale factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormMethod {
    /// Trimmed mean of M-values (edgeR's calcNormFactors default)
    #[default]
    Tmm,
    /// Plain library-size scaling (all factors 1)
    LibSize,
}

/// Minimum number of genes surviving the TMM trim before the factor is
/// considered estimable; below this the factor falls back to 1.
const TMM_MIN_GENES: usize = 10;

/// Estimate library-size scale factors and store them on the dataset.
pub fn estimate_norm_factors(dds: &mut VoomDataSet, method: NormMethod) -> Result<()> {
    let factors = match method {
        NormMethod::Tmm => tmm_norm_factors(dds.counts().counts())?,
        NormMethod::LibSize => Array1::from_elem(dds.n_samples(), 1.0),
    };
    dds.set_norm_factors(factors)
}

/// Compute TMM scale factors for all samples.
/// R equivalent: calcNormFactors(method="TMM") in edgeR
///
/// Factors are normalized so their product is 1, so the geometric mean of
/// the effective library sizes equals that of the raw library sizes.
pub fn tmm_norm_factors(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(LimmaError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let lib_sizes: Vec<f64> = counts.axis_iter(Axis(1)).map(|c| c.sum()).collect();
    if lib_sizes.iter().any(|&l| l <= 0.0) {
        return Err(LimmaError::NormalizationFailed {
            reason: "Every sample must have a positive library size".to_string(),
        });
    }

    // Reference sample: the one whose 75th percentile of scaled counts is
    // closest to the mean across samples.
    let f75: Vec<f64> = (0..n_samples)
        .map(|j| quantile(counts.column(j), lib_sizes[j], 0.75))
        .collect();
    let mean_f75 = f75.iter().sum::<f64>() / n_samples as f64;
    let ref_idx = (0..n_samples)
        .min_by(|&a, &b| {
            let da = (f75[a] - mean_f75).abs();
            let db = (f75[b] - mean_f75).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);

    let mut factors = Array1::from_elem(n_samples, 1.0);
    for j in 0..n_samples {
        factors[j] = if j == ref_idx {
            1.0
        } else {
            tmm_pair(
                counts.column(j),
                counts.column(ref_idx),
                lib_sizes[j],
                lib_sizes[ref_idx],
            )
        };
    }

    // Normalize so the factors multiply to 1
    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
    factors.mapv_inplace(|f| f / log_mean.exp());

    Ok(factors)
}

/// Trimmed mean of M-values between one sample and the reference.
///
/// M-values (log ratios) are trimmed by 30% on each side and A-values
/// (average log abundance) by 5%, then averaged with inverse asymptotic
/// variance weights. Degenerate comparisons fall back to a factor of 1.
fn tmm_pair(obs: ArrayView1<f64>, reference: ArrayView1<f64>, lib_obs: f64, lib_ref: f64) -> f64 {
    const LOG_RATIO_TRIM: f64 = 0.3;
    const SUM_TRIM: f64 = 0.05;

    // (M, A, precision weight) for genes expressed in both samples
    let mut points: Vec<(f64, f64, f64)> = Vec::new();
    for (&y_o, &y_r) in obs.iter().zip(reference.iter()) {
        if y_o > 0.0 && y_r > 0.0 {
            let p_o = y_o / lib_obs;
            let p_r = y_r / lib_ref;
            let m = (p_o / p_r).log2();
            let a = 0.5 * (p_o * p_r).log2();
            // Asymptotic variance of M (delta method on binomial counts)
            let v = (lib_obs - y_o) / (lib_obs * y_o) + (lib_ref - y_r) / (lib_ref * y_r);
            if m.is_finite() && a.is_finite() && v > 0.0 {
                points.push((m, a, v));
            }
        }
    }

    if points.len() < TMM_MIN_GENES {
        return 1.0;
    }

    let n = points.len();
    let keep_m = trim_mask(&points, n, LOG_RATIO_TRIM, |p| p.0);
    let keep_a = trim_mask(&points, n, SUM_TRIM, |p| p.1);

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &(m, _, v)) in points.iter().enumerate() {
        if keep_m[i] && keep_a[i] {
            num += m / v;
            den += 1.0 / v;
        }
    }

    if den > 0.0 {
        let f = (num / den).exp2();
        if f.is_finite() && f > 0.0 {
            return f;
        }
    }
    1.0
}

/// Rank-based two-sided trim: keep entries whose rank on `key` lies in the
/// central (1 - 2*trim) fraction.
fn trim_mask<F: Fn(&(f64, f64, f64)) -> f64>(
    points: &[(f64, f64, f64)],
    n: usize,
    trim: f64,
    key: F,
) -> Vec<bool> {
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        key(&points[a])
            .partial_cmp(&key(&points[b]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let lo = (n as f64 * trim).floor() as usize;
    let hi = n - (n as f64 * trim).floor() as usize;

    let mut keep = vec![false; n];
    for (rank, &idx) in order.iter().enumerate() {
        if rank >= lo && rank < hi {
            keep[idx] = true;
        }
    }
    keep
}

/// Empirical quantile of counts scaled by library size
fn quantile(col: ArrayView1<f64>, lib_size: f64, prob: f64) -> f64 {
    let mut scaled: Vec<f64> = col.iter().map(|&y| y / lib_size).collect();
    scaled.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = scaled.len();
    if n == 0 {
        return 0.0;
    }
    // Type-7 quantile (R default)
    let h = (n as f64 - 1.0) * prob;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    scaled[lo] + (h - lo as f64) * (scaled[hi] - scaled[lo])
}

/// Transform counts to log2 counts-per-million using effective library sizes.
/// R equivalent: the logCPM computation inside voom() in limma
///
/// A prior count of `prior_count` (default 0.5) avoids taking the log of
/// zero; library sizes are offset by 1 to keep the transform bounded.
pub fn log_cpm(
    counts: ArrayView2<f64>,
    effective_lib_sizes: &Array1<f64>,
    prior_count: f64,
) -> Array2<f64> {
    let (n_genes, n_samples) = counts.dim();
    let mut out = Array2::zeros((n_genes, n_samples));
    for j in 0..n_samples {
        let denom = effective_lib_sizes[j] + 1.0;
        for i in 0..n_genes {
            out[[i, j]] = ((counts[[i, j]] + prior_count) / denom * 1e6).log2();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tmm_equal_samples_give_unit_factors() {
        // Identical samples: all M-values are zero, factors are 1
        let counts = Array2::from_shape_fn((50, 3), |(i, _)| (i + 1) as f64 * 10.0);
        let factors = tmm_norm_factors(counts.view()).unwrap();
        for &f in factors.iter() {
            assert!((f - 1.0).abs() < 1e-10, "expected 1.0, got {}", f);
        }
    }

    #[test]
    fn test_tmm_scaled_sample() {
        // Sample 2 is sample 1 doubled: composition identical, so after
        // library-size scaling the M-values vanish and factors stay ~1.
        let base = Array2::from_shape_fn((100, 1), |(i, _)| (i + 1) as f64);
        let mut counts = Array2::zeros((100, 2));
        for i in 0..100 {
            counts[[i, 0]] = base[[i, 0]];
            counts[[i, 1]] = base[[i, 0]] * 2.0;
        }
        let factors = tmm_norm_factors(counts.view()).unwrap();
        assert!((factors[0] - 1.0).abs() < 0.05);
        assert!((factors[1] - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_tmm_factors_multiply_to_one() {
        let counts = Array2::from_shape_fn((80, 4), |(i, j)| ((i * 7 + j * 13) % 50 + 5) as f64);
        let factors = tmm_norm_factors(counts.view()).unwrap();
        let product: f64 = factors.iter().product();
        assert!((product - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_log_cpm_values() {
        let counts = array![[999.5, 0.0]];
        let lib = array![999.0, 999.0];
        let cpm = log_cpm(counts.view(), &lib, 0.5);
        // (999.5 + 0.5) / 1000 * 1e6 = 1e6 -> log2 = ~19.93
        assert!((cpm[[0, 0]] - 1e6f64.log2()).abs() < 1e-9);
        assert!(cpm[[0, 1]] < cpm[[0, 0]]);
    }
}
