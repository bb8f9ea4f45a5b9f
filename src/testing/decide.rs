//! Significance classification of tested genes

use serde::{Deserialize, Serialize};

use crate::error::{LimmaError, Result};

/// Direction call for a gene in one contrast.
/// R equivalent: the -1/0/1 matrix returned by decideTests() in limma
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regulation {
    /// Significant with log2 fold change at or above the cutoff
    Up,
    /// Significant with log2 fold change at or below the negated cutoff
    Down,
    /// Everything else, including genes with undefined statistics
    NotSignificant,
}

impl std::fmt::Display for Regulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regulation::Up => write!(f, "up"),
            Regulation::Down => write!(f, "down"),
            Regulation::NotSignificant => write!(f, "ns"),
        }
    }
}

/// Dual criterion for calling a gene differentially expressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignificanceThresholds {
    /// Maximum BH-adjusted p-value (exclusive)
    pub max_adj_p: f64,
    /// Minimum absolute log2 fold change (inclusive)
    pub min_abs_log2_fc: f64,
}

impl Default for SignificanceThresholds {
    fn default() -> Self {
        Self {
            max_adj_p: 0.05,
            min_abs_log2_fc: 2.0,
        }
    }
}

impl SignificanceThresholds {
    pub fn new(max_adj_p: f64, min_abs_log2_fc: f64) -> Result<Self> {
        if !(max_adj_p > 0.0 && max_adj_p <= 1.0) {
            return Err(LimmaError::InvalidInput {
                reason: format!("Adjusted p-value cutoff must be in (0, 1], got {}", max_adj_p),
            });
        }
        if !(min_abs_log2_fc >= 0.0 && min_abs_log2_fc.is_finite()) {
            return Err(LimmaError::InvalidInput {
                reason: format!(
                    "log2 fold change cutoff must be non-negative, got {}",
                    min_abs_log2_fc
                ),
            });
        }
        Ok(Self {
            max_adj_p,
            min_abs_log2_fc,
        })
    }
}

/// Classify one gene from its log2 fold change and adjusted p-value.
///
/// Both criteria must hold for a significant call; the fold-change test
/// is symmetric (>= cutoff up, <= -cutoff down). A NaN adjusted p-value
/// or fold change is never significant.
pub fn classify(log2_fc: f64, adj_p: f64, thresholds: &SignificanceThresholds) -> Regulation {
    if !adj_p.is_finite() || !log2_fc.is_finite() || adj_p >= thresholds.max_adj_p {
        return Regulation::NotSignificant;
    }
    if log2_fc >= thresholds.min_abs_log2_fc {
        Regulation::Up
    } else if log2_fc <= -thresholds.min_abs_log2_fc {
        Regulation::Down
    } else {
        Regulation::NotSignificant
    }
}

/// Classify every gene of a contrast.
/// R equivalent: decideTests(method="separate") in limma
pub fn decide_tests(
    log2_fcs: &[f64],
    adj_ps: &[f64],
    thresholds: &SignificanceThresholds,
) -> Result<Vec<Regulation>> {
    if log2_fcs.len() != adj_ps.len() {
        return Err(LimmaError::DimensionMismatch {
            expected: format!("{} adjusted p-values", log2_fcs.len()),
            got: format!("{}", adj_ps.len()),
        });
    }
    Ok(log2_fcs
        .iter()
        .zip(adj_ps.iter())
        .map(|(&fc, &p)| classify(fc, p, thresholds))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_dual_criterion() {
        let th = SignificanceThresholds::default();

        assert_eq!(classify(3.0, 0.01, &th), Regulation::Up);
        assert_eq!(classify(-3.0, 0.01, &th), Regulation::Down);
        // Boundary: fold change cutoff is inclusive
        assert_eq!(classify(2.0, 0.01, &th), Regulation::Up);
        assert_eq!(classify(-2.0, 0.01, &th), Regulation::Down);
        // Boundary: p-value cutoff is exclusive
        assert_eq!(classify(3.0, 0.05, &th), Regulation::NotSignificant);
        // Large effect but weak evidence
        assert_eq!(classify(5.0, 0.2, &th), Regulation::NotSignificant);
        // Strong evidence but small effect
        assert_eq!(classify(1.5, 0.001, &th), Regulation::NotSignificant);
    }

    #[test]
    fn test_classify_nan_never_significant() {
        let th = SignificanceThresholds::default();
        assert_eq!(classify(f64::NAN, 0.01, &th), Regulation::NotSignificant);
        assert_eq!(classify(3.0, f64::NAN, &th), Regulation::NotSignificant);
    }

    #[test]
    fn test_classify_exclusive_categories() {
        // Every (fc, p) pair maps to exactly one category by construction;
        // spot-check a grid around the cutoffs.
        let th = SignificanceThresholds::default();
        for &fc in &[-5.0, -2.0, -1.9, 0.0, 1.9, 2.0, 5.0] {
            for &p in &[0.001, 0.049, 0.05, 0.5] {
                let call = classify(fc, p, &th);
                let up = call == Regulation::Up;
                let down = call == Regulation::Down;
                assert!(!(up && down));
                if up || down {
                    assert!(p < th.max_adj_p && fc.abs() >= th.min_abs_log2_fc);
                }
            }
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let th = SignificanceThresholds::new(0.1, 1.0).unwrap();
        assert_eq!(classify(1.5, 0.08, &th), Regulation::Up);

        assert!(SignificanceThresholds::new(0.0, 1.0).is_err());
        assert!(SignificanceThresholds::new(0.05, -1.0).is_err());
    }

    #[test]
    fn test_decide_tests_length_check() {
        let th = SignificanceThresholds::default();
        assert!(decide_tests(&[1.0, 2.0], &[0.1], &th).is_err());
        let calls = decide_tests(&[3.0, 0.1], &[0.01, 0.01], &th).unwrap();
        assert_eq!(calls, vec![Regulation::Up, Regulation::NotSignificant]);
    }
}
