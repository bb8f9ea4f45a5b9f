//! Empirical Bayes moderation of gene-wise variances
//!
//! Shrinks each gene's residual variance toward a pooled prior estimated
//! from all genes, then forms moderated t-statistics on the augmented
//! degrees of freedom. With few replicates per group this stabilizes the
//! denominator of the t-statistic for genes whose sample variance is
//! accidentally small.

use ndarray::Array1;
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::gamma::digamma;

use crate::error::{LimmaError, Result};
use crate::fit::{ContrastFit, LinearFit};

/// Degrees of freedom are capped before evaluating the t distribution;
/// beyond this the t and normal tails are numerically identical.
const MAX_DF: f64 = 1e6;

/// Squared limits on the prior coefficient standard deviation used for
/// the B-statistic, matching eBayes(stdev.coef.lim=c(0.1, 4)).
const VAR_PRIOR_LIM: (f64, f64) = (0.01, 16.0);

/// Tuning parameters for the moderation step.
#[derive(Debug, Clone)]
pub struct EbayesParams {
    /// Assumed proportion of differentially expressed genes, used only
    /// for the B-statistic (log-odds)
    pub proportion: f64,
}

impl Default for EbayesParams {
    fn default() -> Self {
        Self { proportion: 0.01 }
    }
}

/// Moderated statistics for one contrast.
/// R equivalent: the t, p.value and lods components produced by eBayes()
#[derive(Debug, Clone)]
pub struct ModeratedStats {
    /// Moderated t-statistic per gene (NaN for degenerate genes)
    pub t: Array1<f64>,
    /// Two-sided p-value per gene (NaN for degenerate genes)
    pub pvalue: Array1<f64>,
    /// Log-odds of differential expression per gene
    pub lods: Array1<f64>,
    /// Posterior (squeezed) variance per gene
    pub var_post: Array1<f64>,
    /// Prior degrees of freedom (may be infinite)
    pub df_prior: f64,
    /// Prior variance estimate
    pub s2_prior: f64,
    /// Total degrees of freedom for the moderated t
    pub df_total: f64,
}

/// Moderate a contrast fit with empirical Bayes variance shrinkage.
/// R equivalent: eBayes() in limma
///
/// Genes flagged in `degenerate` (zero residual variance, typically
/// constant counts) are excluded from the prior estimation and receive
/// NaN statistics; their effect estimates are preserved by the caller.
pub fn moderate(
    cfit: &ContrastFit,
    fit: &LinearFit,
    degenerate: &[bool],
    params: &EbayesParams,
) -> Result<ModeratedStats> {
    let n_genes = cfit.effect.len();
    if degenerate.len() != n_genes {
        return Err(LimmaError::DimensionMismatch {
            expected: format!("degenerate mask of length {}", n_genes),
            got: format!("length {}", degenerate.len()),
        });
    }
    if !(params.proportion > 0.0 && params.proportion < 1.0) {
        return Err(LimmaError::InvalidInput {
            reason: format!(
                "Proportion of DE genes must be in (0, 1), got {}",
                params.proportion
            ),
        });
    }

    let df = fit.df_residual;
    let usable = |i: usize| {
        !degenerate[i] && fit.sigma[i].is_finite() && fit.sigma[i] > 0.0
    };

    let s2: Vec<f64> = (0..n_genes)
        .filter(|&i| usable(i))
        .map(|i| fit.sigma[i] * fit.sigma[i])
        .collect();
    if s2.len() < 2 {
        return Err(LimmaError::FitFailed {
            reason: "Too few genes with positive residual variance to estimate the \
                     variance prior"
                .to_string(),
        });
    }

    let (s2_prior, df_prior) = fit_f_dist(&s2, df)?;

    // Squeeze each gene's variance toward the prior
    let mut var_post = Array1::from_elem(n_genes, f64::NAN);
    for i in 0..n_genes {
        if usable(i) {
            let s2_i = fit.sigma[i] * fit.sigma[i];
            var_post[i] = if df_prior.is_finite() {
                (df_prior * s2_prior + df * s2_i) / (df_prior + df)
            } else {
                s2_prior
            };
        }
    }

    let df_pooled = s2.len() as f64 * df;
    let df_total = (df + df_prior).min(df_pooled).min(MAX_DF);
    let t_dist = StudentsT::new(0.0, 1.0, df_total).map_err(|e| LimmaError::FitFailed {
        reason: format!("Invalid degrees of freedom for the t distribution: {}", e),
    })?;

    let mut t = Array1::from_elem(n_genes, f64::NAN);
    let mut pvalue = Array1::from_elem(n_genes, f64::NAN);
    for i in 0..n_genes {
        let su = cfit.stdev_unscaled[i];
        if var_post[i].is_finite() && var_post[i] > 0.0 && su > 0.0 {
            let ti = cfit.effect[i] / (su * var_post[i].sqrt());
            t[i] = ti;
            pvalue[i] = 2.0 * t_dist.cdf(-ti.abs());
        }
    }

    let lods = log_odds(cfit, &t, &var_post, s2_prior, df_prior, df_total, params, &t_dist);

    Ok(ModeratedStats {
        t,
        pvalue,
        lods,
        var_post,
        df_prior,
        s2_prior,
        df_total,
    })
}

/// Estimate the scale and degrees of freedom of a scaled F-distribution
/// from observed sample variances, by matching moments of log(s^2).
/// R equivalent: fitFDist() in limma
///
/// Returns `(s2_prior, df_prior)`; `df_prior` is infinite when the
/// variances show no more spread than expected from chi-square sampling
/// alone.
pub fn fit_f_dist(s2: &[f64], df: f64) -> Result<(f64, f64)> {
    let valid: Vec<f64> = s2.iter().copied().filter(|&v| v.is_finite() && v > 0.0).collect();
    let n = valid.len();
    if n < 2 {
        return Err(LimmaError::FitFailed {
            reason: "At least two positive variances are required to fit the prior".to_string(),
        });
    }

    // Moments of e = log(s^2) corrected for the chi-square bias
    let half_df = df / 2.0;
    let e: Vec<f64> = valid
        .iter()
        .map(|&v| v.ln() - digamma(half_df) + half_df.ln())
        .collect();
    let emean = e.iter().sum::<f64>() / n as f64;
    let evar =
        e.iter().map(|&v| (v - emean) * (v - emean)).sum::<f64>() / (n as f64 - 1.0);
    let evar = evar - trigamma(half_df);

    if evar > 0.0 {
        let df_prior = 2.0 * trigamma_inverse(evar);
        let s2_prior = (emean + digamma(df_prior / 2.0) - (df_prior / 2.0).ln()).exp();
        Ok((s2_prior, df_prior))
    } else {
        let s2_prior = valid.iter().sum::<f64>() / n as f64;
        Ok((s2_prior, f64::INFINITY))
    }
}

/// B-statistic: log posterior odds of differential expression.
#[allow(clippy::too_many_arguments)]
fn log_odds(
    cfit: &ContrastFit,
    t: &Array1<f64>,
    var_post: &Array1<f64>,
    s2_prior: f64,
    df_prior: f64,
    df_total: f64,
    params: &EbayesParams,
    t_dist: &StudentsT,
) -> Array1<f64> {
    let n_genes = t.len();
    let var_prior = tmixture_var_prior(cfit, t, params.proportion, t_dist)
        .unwrap_or(1.0 / s2_prior);

    let prior_odds = (params.proportion / (1.0 - params.proportion)).ln();
    let mut lods = Array1::from_elem(n_genes, f64::NAN);
    for i in 0..n_genes {
        if !t[i].is_finite() || !var_post[i].is_finite() {
            continue;
        }
        let su2 = cfit.stdev_unscaled[i] * cfit.stdev_unscaled[i];
        let r = (su2 + var_prior) / su2;
        let t2 = t[i] * t[i];
        let kernel = if df_prior > MAX_DF {
            t2 * (1.0 - 1.0 / r) / 2.0
        } else {
            (1.0 + df_total) / 2.0 * ((t2 + df_total) / (t2 / r + df_total)).ln()
        };
        lods[i] = prior_odds - r.ln() / 2.0 + kernel;
    }
    lods
}

/// Estimate the prior variance of the contrast coefficient from the top
/// fraction of t-statistics.
/// R equivalent: tmixture.vector() in limma
fn tmixture_var_prior(
    cfit: &ContrastFit,
    t: &Array1<f64>,
    proportion: f64,
    t_dist: &StudentsT,
) -> Option<f64> {
    let finite: Vec<usize> = (0..t.len()).filter(|&i| t[i].is_finite()).collect();
    let n_genes = finite.len();
    let ntarget = ((proportion / 2.0) * n_genes as f64).ceil() as usize;
    if ntarget < 1 || n_genes == 0 {
        return None;
    }
    let p = (ntarget as f64 / n_genes as f64).max(proportion);

    let mut order = finite;
    order.sort_by(|&a, &b| {
        t[b].abs()
            .partial_cmp(&t[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(ntarget);

    let mut v0_sum = 0.0;
    for (rank, &i) in order.iter().enumerate() {
        let tabs = t[i].abs();
        let v1 = cfit.stdev_unscaled[i] * cfit.stdev_unscaled[i];
        let p0 = 2.0 * t_dist.cdf(-tabs);
        let ptarget = (((rank as f64 + 0.5) / n_genes as f64) - (1.0 - p) * p0) / p;
        let mut v0 = 0.0;
        if ptarget > p0 {
            let qtarget = -t_dist.inverse_cdf(ptarget / 2.0);
            if qtarget > 0.0 {
                v0 = v1 * ((tabs / qtarget).powi(2) - 1.0);
            }
        }
        v0_sum += v0.clamp(VAR_PRIOR_LIM.0, VAR_PRIOR_LIM.1);
    }
    Some(v0_sum / ntarget as f64)
}

/// Second derivative of the log-gamma function.
///
/// Recurrence to shift the argument above 8, then the standard
/// asymptotic expansion; the truncation error at the shift point is
/// below 1e-12.
fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut x = x;
    while x < 8.0 {
        value += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    value
        + inv
        + 0.5 * inv2
        + inv2 * inv
            * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Third derivative of the log-gamma function, needed for Newton steps
/// in `trigamma_inverse`.
fn tetragamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut value = 0.0;
    let mut x = x;
    while x < 8.0 {
        value -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    value
        - inv2
        - inv2 * inv
        - 0.5 * inv2 * inv2
        + inv2 * inv2 * inv2 * (1.0 / 6.0 - inv2 / 6.0)
}

/// Solve trigamma(y) = x for y.
/// R equivalent: trigammaInverse() in limma
fn trigamma_inverse(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }

    // Newton iteration on the scale-invariant form, as in limma
    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if (dif / y).abs() < 1e-8 {
            break;
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-10);
        // trigamma(2) = pi^2/6 - 1
        assert!((trigamma(2.0) - (expected - 1.0)).abs() < 1e-10);
        // trigamma(0.5) = pi^2 / 2
        let half = std::f64::consts::PI.powi(2) / 2.0;
        assert!((trigamma(0.5) - half).abs() < 1e-10);
    }

    #[test]
    fn test_trigamma_inverse_roundtrip() {
        for &y in &[0.1, 0.5, 1.0, 2.0, 5.0, 20.0] {
            let x = trigamma(y);
            let back = trigamma_inverse(x);
            assert!(
                (back - y).abs() < 1e-6,
                "trigamma_inverse(trigamma({})) = {}",
                y,
                back
            );
        }
    }

    #[test]
    fn test_fit_f_dist_identical_variances() {
        // No spread beyond chi-square sampling: infinite prior df and the
        // prior equals the common variance.
        let s2 = vec![2.0; 100];
        let (s2_prior, df_prior) = fit_f_dist(&s2, 4.0).unwrap();
        assert!(df_prior.is_infinite());
        assert!((s2_prior - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_f_dist_spread_variances() {
        // Strongly heterogeneous variances produce a finite prior df
        let s2: Vec<f64> = (1..=100).map(|i| (i as f64 / 10.0).exp()).collect();
        let (s2_prior, df_prior) = fit_f_dist(&s2, 4.0).unwrap();
        assert!(df_prior.is_finite() && df_prior > 0.0);
        assert!(s2_prior > 0.0);
    }

    fn toy_fit(sigmas: &[f64], df: f64) -> (ContrastFit, LinearFit) {
        let n = sigmas.len();
        let cfit = ContrastFit {
            effect: Array1::from_iter((0..n).map(|i| (i % 5) as f64 - 2.0)),
            stdev_unscaled: Array1::from_elem(n, (0.5f64).sqrt() * 2.0f64.sqrt()),
        };
        let fit = LinearFit {
            coefficients: ndarray::Array2::zeros((n, 2)),
            stdev_unscaled: ndarray::Array2::zeros((n, 2)),
            cov_unscaled: ndarray::Array3::zeros((n, 2, 2)),
            sigma: Array1::from_vec(sigmas.to_vec()),
            fitted: ndarray::Array2::zeros((n, 6)),
            df_residual: df,
        };
        (cfit, fit)
    }

    #[test]
    fn test_moderate_squeezes_toward_prior() {
        let sigmas: Vec<f64> = (0..100).map(|i| 0.5 + (i % 10) as f64 * 0.2).collect();
        let (cfit, fit) = toy_fit(&sigmas, 4.0);
        let degenerate = vec![false; 100];
        let stats = moderate(&cfit, &fit, &degenerate, &EbayesParams::default()).unwrap();

        let s2_min = 0.25;
        let s2_max = (0.5f64 + 1.8).powi(2);
        for i in 0..100 {
            let vp = stats.var_post[i];
            assert!(vp.is_finite() && vp > 0.0);
            // Posterior variances lie within the observed range, pulled
            // toward the prior
            assert!(vp > s2_min - 1e-9 && vp < s2_max + 1e-9);
        }
        assert!(stats.df_total >= fit.df_residual);
    }

    #[test]
    fn test_moderate_flags_degenerate_genes() {
        let mut sigmas: Vec<f64> = (0..60).map(|i| 0.5 + (i % 7) as f64 * 0.1).collect();
        sigmas[10] = 0.0;
        let (cfit, fit) = toy_fit(&sigmas, 4.0);
        let mut degenerate = vec![false; 60];
        degenerate[10] = true;
        let stats = moderate(&cfit, &fit, &degenerate, &EbayesParams::default()).unwrap();

        assert!(stats.t[10].is_nan());
        assert!(stats.pvalue[10].is_nan());
        assert!(stats.lods[10].is_nan());
        assert!(stats.t[11].is_finite());
        let p = stats.pvalue[11];
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_moderate_rejects_bad_proportion() {
        let sigmas = vec![0.5; 10];
        let (cfit, fit) = toy_fit(&sigmas, 4.0);
        let degenerate = vec![false; 10];
        let params = EbayesParams { proportion: 1.5 };
        assert!(moderate(&cfit, &fit, &degenerate, &params).is_err());
    }
}
