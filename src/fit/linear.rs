//! Per-gene weighted least squares fitting

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{LimmaError, Result};

/// Results of the per-gene weighted linear model fit.
/// R equivalent: the MArrayLM object returned by lmFit() in limma
#[derive(Debug, Clone)]
pub struct LinearFit {
    /// Fitted coefficients (genes x coefficients)
    pub coefficients: Array2<f64>,
    /// Unscaled standard deviations of the coefficients (genes x coefficients)
    pub stdev_unscaled: Array2<f64>,
    /// Unscaled coefficient covariance (X'WX)^-1 per gene
    pub cov_unscaled: Array3<f64>,
    /// Residual standard deviation per gene
    pub sigma: Array1<f64>,
    /// Fitted values (genes x samples)
    pub fitted: Array2<f64>,
    /// Residual degrees of freedom (n_samples - n_coefficients)
    pub df_residual: f64,
}

/// Effect estimate and unscaled standard deviation for one contrast.
/// R equivalent: contrasts.fit() in limma
#[derive(Debug, Clone)]
pub struct ContrastFit {
    /// Estimated effect per gene (difference of group coefficients,
    /// log2 scale)
    pub effect: Array1<f64>,
    /// Unscaled standard deviation of the effect per gene
    pub stdev_unscaled: Array1<f64>,
}

/// Fit a weighted linear model to every gene independently.
/// R equivalent: lmFit() in limma
///
/// `y` is the log2-CPM matrix (genes x samples), `design` the model matrix
/// (samples x coefficients), `weights` optional per-observation precision
/// weights of the same shape as `y`. The design must be full rank (checked
/// by the caller); the fit requires positive residual degrees of freedom.
pub fn fit_wls(
    y: ArrayView2<f64>,
    design: &Array2<f64>,
    weights: Option<&Array2<f64>>,
) -> Result<LinearFit> {
    let (n_genes, n_samples) = y.dim();
    let n_coefs = design.ncols();

    if design.nrows() != n_samples {
        return Err(LimmaError::DimensionMismatch {
            expected: format!("design with {} rows", n_samples),
            got: format!("design with {} rows", design.nrows()),
        });
    }
    if let Some(w) = weights {
        if w.dim() != y.dim() {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("weights of shape {:?}", y.dim()),
                got: format!("weights of shape {:?}", w.dim()),
            });
        }
        if w.iter().any(|&v| v <= 0.0 || !v.is_finite()) {
            return Err(LimmaError::FitFailed {
                reason: "Precision weights must be positive finite values".to_string(),
            });
        }
    }
    if n_samples <= n_coefs {
        return Err(LimmaError::FitFailed {
            reason: format!(
                "No residual degrees of freedom: {} samples for {} coefficients",
                n_samples, n_coefs
            ),
        });
    }

    let gene_fits: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let w_row = weights.map(|w| w.row(i));
            fit_single_gene(y.row(i), design, w_row)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut stdev_unscaled = Array2::zeros((n_genes, n_coefs));
    let mut cov_unscaled = Array3::zeros((n_genes, n_coefs, n_coefs));
    let mut sigma = Array1::zeros(n_genes);
    let mut fitted = Array2::zeros((n_genes, n_samples));

    for (i, gf) in gene_fits.into_iter().enumerate() {
        for j in 0..n_coefs {
            coefficients[[i, j]] = gf.beta[j];
            stdev_unscaled[[i, j]] = gf.cov[j * n_coefs + j].max(0.0).sqrt();
            for k in 0..n_coefs {
                cov_unscaled[[i, j, k]] = gf.cov[j * n_coefs + k];
            }
        }
        for s in 0..n_samples {
            fitted[[i, s]] = gf.fitted[s];
        }
        sigma[i] = gf.sigma;
    }

    Ok(LinearFit {
        coefficients,
        stdev_unscaled,
        cov_unscaled,
        sigma,
        fitted,
        df_residual: (n_samples - n_coefs) as f64,
    })
}

/// Compute the effect and unscaled standard deviation of a contrast from a
/// fitted model. The standard deviation comes from the quadratic form
/// c' (X'WX)^-1 c, so correlated coefficients are handled exactly.
pub fn contrast_fit(fit: &LinearFit, contrast: &Array1<f64>) -> Result<ContrastFit> {
    let n_genes = fit.coefficients.nrows();
    let n_coefs = fit.coefficients.ncols();
    if contrast.len() != n_coefs {
        return Err(LimmaError::InvalidContrast {
            reason: format!(
                "Contrast vector has {} entries, design has {} coefficients",
                contrast.len(),
                n_coefs
            ),
        });
    }

    let mut effect = Array1::zeros(n_genes);
    let mut stdev_unscaled = Array1::zeros(n_genes);
    for i in 0..n_genes {
        let mut e = 0.0;
        for j in 0..n_coefs {
            e += contrast[j] * fit.coefficients[[i, j]];
        }
        effect[i] = e;

        let mut var = 0.0;
        for j in 0..n_coefs {
            for k in 0..n_coefs {
                var += contrast[j] * fit.cov_unscaled[[i, j, k]] * contrast[k];
            }
        }
        stdev_unscaled[i] = var.max(0.0).sqrt();
    }

    Ok(ContrastFit {
        effect,
        stdev_unscaled,
    })
}

struct GeneFit {
    beta: Vec<f64>,
    /// (X'WX)^-1 stored row-major
    cov: Vec<f64>,
    fitted: Vec<f64>,
    sigma: f64,
}

fn fit_single_gene(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    weights: Option<ArrayView1<f64>>,
) -> Result<GeneFit> {
    let n = y.len();
    let p = design.ncols();

    // Normal equations: X'WX and X'Wy
    let mut xtwx = vec![0.0; p * p];
    let mut xtwy = vec![0.0; p];
    for s in 0..n {
        let w = weights.map_or(1.0, |wv| wv[s]);
        for j in 0..p {
            let xj = design[[s, j]];
            if xj == 0.0 {
                continue;
            }
            xtwy[j] += w * xj * y[s];
            for k in j..p {
                xtwx[j * p + k] += w * xj * design[[s, k]];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            xtwx[j * p + k] = xtwx[k * p + j];
        }
    }

    let inv = cholesky_inverse(&xtwx, p).ok_or_else(|| LimmaError::FitFailed {
        reason: "X'WX is not positive definite; check the design matrix".to_string(),
    })?;

    let mut beta = vec![0.0; p];
    for j in 0..p {
        for k in 0..p {
            beta[j] += inv[j * p + k] * xtwy[k];
        }
    }

    let mut fitted = vec![0.0; n];
    let mut rss = 0.0;
    for s in 0..n {
        let mut f = 0.0;
        for j in 0..p {
            f += design[[s, j]] * beta[j];
        }
        fitted[s] = f;
        let w = weights.map_or(1.0, |wv| wv[s]);
        let r = y[s] - f;
        rss += w * r * r;
    }

    let df = (n - p) as f64;
    let sigma = (rss / df).max(0.0).sqrt();

    Ok(GeneFit {
        beta,
        cov: inv,
        fitted,
        sigma,
    })
}

/// Invert a symmetric positive-definite matrix via Cholesky decomposition.
/// Returns None if the matrix is not positive definite.
fn cholesky_inverse(a: &[f64], p: usize) -> Option<Vec<f64>> {
    // Lower-triangular factor L with A = L L'
    let mut l = vec![0.0; p * p];
    for j in 0..p {
        let mut d = a[j * p + j];
        for k in 0..j {
            d -= l[j * p + k] * l[j * p + k];
        }
        if d <= 0.0 || !d.is_finite() {
            return None;
        }
        let ljj = d.sqrt();
        l[j * p + j] = ljj;
        for i in (j + 1)..p {
            let mut v = a[i * p + j];
            for k in 0..j {
                v -= l[i * p + k] * l[j * p + k];
            }
            l[i * p + j] = v / ljj;
        }
    }

    // Invert L in place (forward substitution on the identity)
    let mut linv = vec![0.0; p * p];
    for j in 0..p {
        linv[j * p + j] = 1.0 / l[j * p + j];
        for i in (j + 1)..p {
            let mut v = 0.0;
            for k in j..i {
                v -= l[i * p + k] * linv[k * p + j];
            }
            linv[i * p + j] = v / l[i * p + i];
        }
    }

    // A^-1 = L'^-1 L^-1
    let mut inv = vec![0.0; p * p];
    for i in 0..p {
        for j in 0..p {
            let mut v = 0.0;
            for k in i.max(j)..p {
                v += linv[k * p + i] * linv[k * p + j];
            }
            inv[i * p + j] = v;
        }
    }
    Some(inv)
}
