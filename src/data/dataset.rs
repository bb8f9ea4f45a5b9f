//! Dataset combining counts, sample annotations, and normalization state

use ndarray::Array1;

use super::{CountMatrix, SampleMetadata};
use crate::error::{LimmaError, Result};

/// A filtered expression matrix with sample annotations, ready for voom.
///
/// The dataset is the persisted snapshot exchanged between pipeline stages:
/// counts plus per-sample group and batch labels. Normalization factors are
/// the only mutable state; everything downstream of the fit is produced as
/// new, independent artifacts.
#[derive(Debug, Clone)]
pub struct VoomDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    norm_factors: Option<Array1<f64>>,
}

impl VoomDataSet {
    /// Create a dataset, validating that counts and metadata describe the
    /// same samples in the same order.
    pub fn new(counts: CountMatrix, metadata: SampleMetadata) -> Result<Self> {
        if counts.n_samples() != metadata.n_samples() {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} samples in counts", counts.n_samples()),
                got: format!("{} samples in metadata", metadata.n_samples()),
            });
        }

        for (a, b) in counts.sample_ids().iter().zip(metadata.sample_ids()) {
            if a != b {
                return Err(LimmaError::InvalidMetadata {
                    reason: format!(
                        "Sample order mismatch between counts and metadata: '{}' vs '{}'",
                        a, b
                    ),
                });
            }
        }

        Ok(Self {
            counts,
            metadata,
            norm_factors: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn has_norm_factors(&self) -> bool {
        self.norm_factors.is_some()
    }

    /// Library-size scale factors, once estimated
    pub fn norm_factors(&self) -> Option<&Array1<f64>> {
        self.norm_factors.as_ref()
    }

    /// Set library-size scale factors (must be positive, one per sample)
    pub fn set_norm_factors(&mut self, factors: Array1<f64>) -> Result<()> {
        if factors.len() != self.n_samples() {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} factors", self.n_samples()),
                got: format!("{} factors", factors.len()),
            });
        }
        if factors.iter().any(|&f| f <= 0.0 || !f.is_finite()) {
            return Err(LimmaError::NormalizationFailed {
                reason: "Scale factors must be positive finite values".to_string(),
            });
        }
        self.norm_factors = Some(factors);
        Ok(())
    }

    /// Effective library sizes: raw library size times scale factor.
    ///
    /// Fails if normalization factors have not been estimated yet.
    pub fn effective_lib_sizes(&self) -> Result<Array1<f64>> {
        let factors = self
            .norm_factors
            .as_ref()
            .ok_or_else(|| LimmaError::NormalizationFailed {
                reason: "Normalization factors must be estimated first".to_string(),
            })?;
        let lib_sizes = self.counts.library_sizes();
        Ok(Array1::from_iter(
            lib_sizes.iter().zip(factors.iter()).map(|(&l, &f)| l * f),
        ))
    }
}
