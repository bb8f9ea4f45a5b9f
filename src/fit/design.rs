//! Design matrix construction for the group + batch linear model

use ndarray::{Array1, Array2};

use crate::data::SampleMetadata;
use crate::error::{LimmaError, Result};

/// Information about the fitted design matrix
#[derive(Debug, Clone)]
pub struct DesignInfo {
    /// Names of the coefficients, in column order
    pub coef_names: Vec<String>,
    /// Group levels, one coefficient per level (cell-means coding)
    pub group_levels: Vec<String>,
    /// Batch levels; the first is the reference and has no column
    pub batch_levels: Vec<String>,
}

impl DesignInfo {
    /// Column index of a group coefficient
    pub fn group_column(&self, level: &str) -> Option<usize> {
        self.group_levels.iter().position(|l| l == level)
    }

    /// Total number of coefficients
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }
}

/// Create the model matrix for `~ 0 + group + batch`.
/// R equivalent: model.matrix(~0+group+batch) in stats
///
/// No intercept: every group level is coded explicitly with its own
/// indicator column, so a contrast is a plain difference of group
/// coefficients. Batch uses treatment coding against its first level.
/// The matrix is checked for full column rank before being returned.
pub fn build_design_matrix(metadata: &SampleMetadata) -> Result<(Array2<f64>, DesignInfo)> {
    let group_levels = metadata.group_levels();
    let batch_levels = metadata.batch_levels();
    let n_samples = metadata.n_samples();

    if group_levels.len() < 2 {
        return Err(LimmaError::InvalidDesignMatrix {
            reason: "At least two group levels are required for a contrast".to_string(),
        });
    }

    let n_coefs = group_levels.len() + batch_levels.len() - 1;
    let mut design = Array2::zeros((n_samples, n_coefs));

    for (i, label) in metadata.group().iter().enumerate() {
        // Unwrap is safe: levels are derived from these labels
        let j = group_levels.iter().position(|l| l == label).unwrap();
        design[[i, j]] = 1.0;
    }

    for (i, label) in metadata.batch().iter().enumerate() {
        let k = batch_levels.iter().position(|l| l == label).unwrap();
        if k > 0 {
            design[[i, group_levels.len() + k - 1]] = 1.0;
        }
    }

    let mut coef_names: Vec<String> = group_levels.clone();
    for level in batch_levels.iter().skip(1) {
        coef_names.push(format!("batch_{}_vs_{}", level, batch_levels[0]));
    }

    check_full_rank(&design)?;

    Ok((
        design,
        DesignInfo {
            coef_names,
            group_levels,
            batch_levels,
        },
    ))
}

/// Contrast vector for "numerator minus denominator" on the group
/// coefficients.
/// R equivalent: makeContrasts() in limma
pub fn contrast_vector(info: &DesignInfo, numerator: &str, denominator: &str) -> Result<Array1<f64>> {
    if numerator == denominator {
        return Err(LimmaError::InvalidContrast {
            reason: format!("Contrast '{0} - {0}' compares a group to itself", numerator),
        });
    }

    let num_col = info.group_column(numerator).ok_or_else(|| LimmaError::InvalidContrast {
        reason: format!(
            "Group level '{}' not found. Available: {:?}",
            numerator, info.group_levels
        ),
    })?;
    let den_col = info.group_column(denominator).ok_or_else(|| LimmaError::InvalidContrast {
        reason: format!(
            "Group level '{}' not found. Available: {:?}",
            denominator, info.group_levels
        ),
    })?;

    let mut c = Array1::zeros(info.n_coefs());
    c[num_col] = 1.0;
    c[den_col] = -1.0;
    Ok(c)
}

/// Check that a design matrix has full column rank.
///
/// The rank is computed with Householder QR with column pivoting; a column
/// counts toward the rank when the corresponding diagonal of R exceeds
/// `max(nrow, ncol) * eps * max(|diag(R)|)`, matching R's `qr()`. A
/// rank-deficient design is a configuration error and aborts the fit.
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let ncol = matrix.ncols();
    if matrix.nrows() == 0 || ncol == 0 {
        return Err(LimmaError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }

    if qr_rank(matrix) < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if has_zero_column {
            "the model matrix is not full rank: a covariate level without any samples \
             produced a column of zeros"
        } else {
            "the model matrix is not full rank: one or more covariates are linear \
             combinations of the others (e.g. batch confounded with group)"
        };
        return Err(LimmaError::InvalidDesignMatrix {
            reason: reason.to_string(),
        });
    }

    Ok(())
}

/// Numerical rank via Householder QR with column pivoting.
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();
    let k = nrow.min(ncol);

    let mut r = matrix.to_owned();
    let mut norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        // Bring the column with the largest remaining norm to the front
        let pivot = (step..ncol)
            .max_by(|&a, &b| {
                norms_sq[a]
                    .partial_cmp(&norms_sq[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(step);
        if pivot != step {
            for i in 0..nrow {
                r.swap([i, step], [i, pivot]);
            }
            norms_sq.swap(step, pivot);
        }

        let mut alpha: f64 = (step..nrow).map(|i| r[[i, step]] * r[[i, step]]).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            // Remaining columns are effectively zero
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;

        let mut v_norm_sq = v0 * v0;
        for i in (step + 1)..nrow {
            v_norm_sq += r[[i, step]] * r[[i, step]];
        }
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let mut dot = v0 * r[[step, j]];
            for i in (step + 1)..nrow {
                dot += r[[i, step]] * r[[i, j]];
            }
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
        }

        for j in (step + 1)..ncol {
            norms_sq[j] = (norms_sq[j] - r[[step, j]] * r[[step, j]]).max(0.0);
        }
    }

    let max_abs_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_abs_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
