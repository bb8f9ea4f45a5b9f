//! Count matrix representation for RNA-seq data

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{LimmaError, Result};

/// A matrix of RNA-seq read counts.
/// Rows are genes, columns are samples.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Sample identifiers
    sample_ids: Vec<String>,
}

fn check_unique(names: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(LimmaError::InvalidCountMatrix {
                reason: format!("Duplicate {} identifier '{}'", what, name),
            });
        }
    }
    Ok(())
}

impl CountMatrix {
    /// Create a new count matrix from raw data.
    ///
    /// Gene and sample identifiers must be unique; counts must be
    /// non-negative finite values.
    pub fn new(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(LimmaError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(LimmaError::InvalidCountMatrix {
                reason: "All samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers; expected raw read counts. \
                 Non-integer values may affect the mean-variance trend."
            );
        }

        check_unique(&gene_ids, "gene")?;
        check_unique(&sample_ids, "sample")?;

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    /// Create from integer counts
    pub fn from_integers(
        counts: Array2<u32>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        Self::new(counts.mapv(|x| x as f64), gene_ids, sample_ids)
    }

    /// Number of genes (rows)
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Number of samples (columns)
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// Gene IDs
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for one gene across all samples
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Total counts per sample (library sizes)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.sum())
            .collect()
    }

    /// True for genes whose counts are identical in every sample.
    ///
    /// Such genes (including all-zero genes) carry no within-experiment
    /// variance and get undefined test statistics downstream.
    pub fn zero_variance_genes(&self) -> Vec<bool> {
        self.counts
            .axis_iter(Axis(0))
            .map(|row| {
                let first = row[0];
                row.iter().all(|&x| x == first)
            })
            .collect()
    }

    /// Filter genes by minimum count threshold.
    ///
    /// Keeps genes with at least `min_count` in at least `min_samples`
    /// samples. Mirrors the expression filter applied upstream of the
    /// differential-expression fit.
    pub fn filter_low_counts(&self, min_count: f64, min_samples: usize) -> Result<Self> {
        let keep: Vec<usize> = (0..self.n_genes())
            .filter(|&i| {
                self.counts.row(i).iter().filter(|&&x| x >= min_count).count() >= min_samples
            })
            .collect();

        if keep.is_empty() {
            return Err(LimmaError::EmptyData {
                reason: "No genes passed the filtering threshold".to_string(),
            });
        }

        let new_counts = self.counts.select(Axis(0), &keep);
        let new_gene_ids: Vec<String> = keep.iter().map(|&i| self.gene_ids[i].clone()).collect();

        Self::new(new_counts, new_gene_ids, self.sample_ids.clone())
    }

    /// Subset to specific samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids: Vec<String> = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        Self::new(new_counts, self.gene_ids.clone(), new_sample_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(
            counts,
            vec!["gene1".to_string(), "gene2".to_string()],
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
        )
        .unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        let result = CountMatrix::new(
            counts,
            vec!["gene1".to_string(), "gene2".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_gene_ids_rejected() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let result = CountMatrix::new(
            counts,
            vec!["gene1".to_string(), "gene1".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_library_sizes() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(
            counts,
            vec!["gene1".to_string(), "gene2".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
        )
        .unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
    }

    #[test]
    fn test_zero_variance_genes() {
        let counts = array![[10.0, 10.0, 10.0], [5.0, 15.0, 25.0], [0.0, 0.0, 0.0]];
        let matrix = CountMatrix::new(
            counts,
            vec!["flat".to_string(), "var".to_string(), "zero".to_string()],
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
        )
        .unwrap();
        assert_eq!(matrix.zero_variance_genes(), vec![true, false, true]);
    }

    #[test]
    fn test_filter_low_counts() {
        let counts = array![[100.0, 120.0, 90.0], [1.0, 0.0, 2.0]];
        let matrix = CountMatrix::new(
            counts,
            vec!["kept".to_string(), "dropped".to_string()],
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()],
        )
        .unwrap();
        let filtered = matrix.filter_low_counts(10.0, 3).unwrap();
        assert_eq!(filtered.n_genes(), 1);
        assert_eq!(filtered.gene_ids(), &["kept".to_string()]);
    }
}
