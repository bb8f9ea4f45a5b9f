//! voom: mean-variance modeling at the observational level
//!
//! Transforms counts to log2-CPM, estimates the mean-variance trend from a
//! pilot fit, and converts the trend into per-observation precision weights
//! for the final weighted linear model.

use ndarray::{Array1, Array2};

use super::lowess::{interp_linear, lowess};
use super::fit_wls;
use crate::data::VoomDataSet;
use crate::error::{LimmaError, Result};
use crate::normalization::log_cpm;

/// Tuning parameters for the voom transform.
/// R equivalent: voom(span=0.5) in limma
#[derive(Debug, Clone)]
pub struct VoomParams {
    /// Lowess span for the mean-variance trend
    pub span: f64,
    /// Prior count added before taking logs
    pub prior_count: f64,
}

impl Default for VoomParams {
    fn default() -> Self {
        Self {
            span: 0.5,
            prior_count: 0.5,
        }
    }
}

/// Output of the voom transform: the continuous expression matrix and the
/// precision weight for every observation.
#[derive(Debug, Clone)]
pub struct VoomFit {
    /// log2-CPM expression values (genes x samples)
    pub log_cpm: Array2<f64>,
    /// Precision weights (genes x samples), all positive
    pub weights: Array2<f64>,
    /// Average log2-CPM per gene (AveExpr)
    pub ave_expr: Array1<f64>,
}

/// Run the voom transform.
/// R equivalent: voom() in limma
///
/// A pilot unweighted fit on the log2-CPM values yields per-gene residual
/// standard deviations; lowess of sqrt(sd) against mean log2 count gives
/// the mean-variance trend. Each observation's weight is the inverse fourth
/// power of its predicted sqrt(sd), so noisy low-count measurements are
/// downweighted in the final fit.
pub fn voom(dds: &VoomDataSet, design: &Array2<f64>, params: &VoomParams) -> Result<VoomFit> {
    let eff_lib = dds.effective_lib_sizes()?;
    let counts = dds.counts().counts();
    let (n_genes, n_samples) = counts.dim();

    let log_cpm_matrix = log_cpm(counts, &eff_lib, params.prior_count);

    // Pilot fit without weights
    let pilot = fit_wls(log_cpm_matrix.view(), design, None)?;

    let ave_expr = Array1::from_iter(
        (0..n_genes).map(|i| log_cpm_matrix.row(i).sum() / n_samples as f64),
    );

    // Mean log2 count per gene: shift AveExpr back to the count scale
    let mean_log_lib: f64 =
        eff_lib.iter().map(|&l| (l + 1.0).log2()).sum::<f64>() / n_samples as f64;
    let offset = mean_log_lib - 1e6f64.log2();

    let mut sx = Vec::with_capacity(n_genes);
    let mut sy = Vec::with_capacity(n_genes);
    for i in 0..n_genes {
        let s = pilot.sigma[i];
        if s.is_finite() && s > 0.0 {
            sx.push(ave_expr[i] + offset);
            sy.push(s.sqrt());
        }
    }

    if sx.len() < 2 {
        return Err(LimmaError::FitFailed {
            reason: "Too few genes with residual variance to fit the mean-variance trend"
                .to_string(),
        });
    }
    if sx.len() < 50 {
        log::warn!(
            "Mean-variance trend fitted on only {} genes; weights may be unstable",
            sx.len()
        );
    }

    let (trend_x, trend_y) = lowess(&sx, &sy, params.span, 3);

    // Predicted sqrt(sd) must stay positive for the inverse fourth power
    let floor = trend_y
        .iter()
        .copied()
        .filter(|&v| v > 0.0)
        .fold(f64::INFINITY, f64::min)
        .min(1e-2)
        .max(1e-4);

    let mut weights = Array2::from_elem((n_genes, n_samples), 1.0);
    for i in 0..n_genes {
        if !(pilot.sigma[i].is_finite() && pilot.sigma[i] > 0.0) {
            // Degenerate gene: flat weights, statistics flagged downstream
            continue;
        }
        for s in 0..n_samples {
            let fitted_log_count = pilot.fitted[[i, s]] + (eff_lib[s] + 1.0).log2() - 1e6f64.log2();
            let pred = interp_linear(&trend_x, &trend_y, fitted_log_count).max(floor);
            weights[[i, s]] = pred.powi(-4);
        }
    }

    Ok(VoomFit {
        log_cpm: log_cpm_matrix,
        weights,
        ave_expr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata, VoomDataSet};
    use crate::fit::build_design_matrix;
    use crate::normalization::{estimate_norm_factors, NormMethod};

    fn jitter(i: usize, s: usize) -> f64 {
        // Deterministic pseudo-noise in [-1, 1]
        (((i * 31 + s * 17) % 7) as f64 - 3.0) / 3.0
    }

    fn synthetic_dataset() -> VoomDataSet {
        let n_genes = 60;
        let n_samples = 6;
        let mut counts = ndarray::Array2::zeros((n_genes, n_samples));
        for i in 0..n_genes {
            for s in 0..n_samples {
                let base = if i < 30 {
                    // Low-count genes with proportionally large noise
                    20.0 + 10.0 * jitter(i, s)
                } else {
                    // High-count genes with proportionally small noise
                    5000.0 + 50.0 * jitter(i, s)
                };
                counts[[i, s]] = base.round().max(0.0);
            }
        }
        let gene_ids = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let sample_ids: Vec<String> = (0..n_samples).map(|s| format!("s{}", s)).collect();
        let matrix = CountMatrix::new(counts, gene_ids, sample_ids.clone()).unwrap();
        let meta = SampleMetadata::new(
            sample_ids,
            vec!["M0", "M0", "M0", "M1", "M1", "M1"]
                .into_iter()
                .map(String::from)
                .collect(),
            vec!["b1"; 6].into_iter().map(String::from).collect(),
        )
        .unwrap();
        VoomDataSet::new(matrix, meta).unwrap()
    }

    #[test]
    fn test_voom_weights_positive_finite() {
        let mut dds = synthetic_dataset();
        estimate_norm_factors(&mut dds, NormMethod::Tmm).unwrap();
        let (design, _info) = build_design_matrix(dds.metadata()).unwrap();
        let fit = voom(&dds, &design, &VoomParams::default()).unwrap();

        assert_eq!(fit.weights.dim(), (60, 6));
        assert!(fit.weights.iter().all(|&w| w > 0.0 && w.is_finite()));
        assert!(fit.log_cpm.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_voom_downweights_noisy_low_counts() {
        let mut dds = synthetic_dataset();
        estimate_norm_factors(&mut dds, NormMethod::Tmm).unwrap();
        let (design, _info) = build_design_matrix(dds.metadata()).unwrap();
        let fit = voom(&dds, &design, &VoomParams::default()).unwrap();

        let mean_w = |range: std::ops::Range<usize>| {
            let mut sum = 0.0;
            let mut n = 0.0;
            for i in range {
                for s in 0..6 {
                    sum += fit.weights[[i, s]];
                    n += 1.0;
                }
            }
            sum / n
        };
        let low = mean_w(0..30);
        let high = mean_w(30..60);
        assert!(
            low < high,
            "low-count noisy genes should get lower weights ({} vs {})",
            low,
            high
        );
    }

    #[test]
    fn test_voom_requires_norm_factors() {
        let dds = synthetic_dataset();
        let (design, _info) = build_design_matrix(dds.metadata()).unwrap();
        assert!(voom(&dds, &design, &VoomParams::default()).is_err());
    }
}
