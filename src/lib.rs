//! rust_limma: differential expression for bulk RNA-seq counts
//!
//! A Rust implementation of the limma-voom workflow for comparing
//! macrophage polarization states (or any grouped count data):
//! TMM library normalization, log2-CPM with observation-level precision
//! weights, per-gene weighted linear models with batch adjustment,
//! empirical Bayes moderated t-statistics, BH false discovery control,
//! and set-level comparison of the resulting gene signatures.
//!
//! ```no_run
//! use rust_limma::prelude::*;
//!
//! # fn main() -> rust_limma::Result<()> {
//! let counts = read_count_matrix("counts.tsv")?;
//! let metadata = read_metadata("samples.csv", "polarization", "series")?;
//! let mut dds = VoomDataSet::new(counts, metadata)?;
//!
//! let contrasts = vec![Contrast::parse("M1-M0")?, Contrast::parse("M2-M0")?];
//! let tables = run_voom_limma(&mut dds, &contrasts, &PipelineParams::default())?;
//! for table in &tables {
//!     println!("{}", table.summary(&SignificanceThresholds::default()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod data;
pub mod ebayes;
pub mod error;
pub mod fit;
pub mod io;
pub mod normalization;
pub mod plot;
pub mod sets;
pub mod testing;

pub use error::{LimmaError, Result};

use data::VoomDataSet;
use ebayes::EbayesParams;
use fit::VoomParams;
use io::{Contrast, TopTable};
use normalization::NormMethod;

/// Tuning parameters for the whole pipeline. The defaults reproduce
/// voom/eBayes with their standard settings.
#[derive(Debug, Clone, Default)]
pub struct PipelineParams {
    pub norm_method: NormMethod,
    pub voom: VoomParams,
    pub ebayes: EbayesParams,
}

/// Run the full differential expression pipeline: normalization, voom
/// weights, weighted linear fit, and one moderated test per contrast.
///
/// Normalization factors are estimated unless already set on the
/// dataset. Genes whose raw counts are constant across all samples keep
/// their effect estimates but receive NaN statistics; they are excluded
/// from the multiple testing correction and never called significant.
pub fn run_voom_limma(
    dds: &mut VoomDataSet,
    contrasts: &[Contrast],
    params: &PipelineParams,
) -> Result<Vec<TopTable>> {
    if contrasts.is_empty() {
        return Err(LimmaError::InvalidContrast {
            reason: "At least one contrast is required".to_string(),
        });
    }

    if dds.norm_factors().is_none() {
        log::info!("Estimating normalization factors ({:?})", params.norm_method);
        normalization::estimate_norm_factors(dds, params.norm_method)?;
    }

    let (design, info) = fit::build_design_matrix(dds.metadata())?;
    log::info!(
        "Design matrix: {} samples x {} coefficients ({:?})",
        dds.counts().n_samples(),
        info.n_coefs(),
        info.coef_names
    );

    let vfit = fit::voom(dds, &design, &params.voom)?;
    let lfit = fit::fit_wls(vfit.log_cpm.view(), &design, Some(&vfit.weights))?;

    let degenerate = dds.counts().zero_variance_genes();
    let n_degenerate = degenerate.iter().filter(|&&d| d).count();
    if n_degenerate > 0 {
        log::warn!(
            "{} genes have constant counts across all samples; their test \
             statistics will be NaN",
            n_degenerate
        );
    }

    let mut tables = Vec::with_capacity(contrasts.len());
    for contrast in contrasts {
        log::info!("Testing contrast {}", contrast);
        let c = fit::contrast_vector(&info, &contrast.numerator, &contrast.denominator)?;
        let cfit = fit::contrast_fit(&lfit, &c)?;
        let stats = ebayes::moderate(&cfit, &lfit, &degenerate, &params.ebayes)?;
        tables.push(TopTable::assemble(
            contrast.clone(),
            dds.counts().gene_ids(),
            &vfit.ave_expr,
            &cfit,
            &stats,
        )?);
    }

    Ok(tables)
}

/// Commonly used types and functions.
pub mod prelude {
    pub use crate::data::{CountMatrix, SampleMetadata, VoomDataSet};
    pub use crate::ebayes::EbayesParams;
    pub use crate::fit::VoomParams;
    pub use crate::io::{read_count_matrix, read_metadata, write_top_table, Contrast, TopTable};
    pub use crate::normalization::NormMethod;
    pub use crate::sets::{canonical_gene_id, overlap3, overlap_report, GeneSet};
    pub use crate::testing::{Regulation, SignificanceThresholds};
    pub use crate::{run_voom_limma, PipelineParams};
    pub use crate::{LimmaError, Result};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::testing::{self, Regulation, SignificanceThresholds};
    use ndarray::Array2;

    fn jitter(i: usize, s: usize) -> f64 {
        (((i * 31 + s * 17) % 7) as f64 - 3.0) / 3.0
    }

    /// 50 background genes, one strongly induced gene and one constant
    /// gene, two groups of three samples.
    fn de_dataset() -> VoomDataSet {
        let n_genes = 52;
        let n_samples = 6;
        let mut counts = Array2::zeros((n_genes, n_samples));
        let mut gene_ids = Vec::with_capacity(n_genes);

        // Induced gene: about 2^10-fold higher in M1
        let de_counts = [10.0, 11.0, 9.0, 10240.0, 10300.0, 10180.0];
        for s in 0..n_samples {
            counts[[0, s]] = de_counts[s];
        }
        gene_ids.push("DEG1".to_string());

        for i in 1..=50 {
            let mean = 100.0 + i as f64 * 20.0;
            for s in 0..n_samples {
                counts[[i, s]] = (mean * (1.0 + 0.05 * jitter(i, s))).round();
            }
            gene_ids.push(format!("BG{}", i));
        }

        // Constant counts: untestable but its fold change is reported
        for s in 0..n_samples {
            counts[[51, s]] = 100.0;
        }
        gene_ids.push("FLAT1".to_string());

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

    /// Three groups in two batches, background genes only.
    fn three_group_dataset() -> VoomDataSet {
        let n_genes = 60;
        let n_samples = 9;
        let mut counts = Array2::zeros((n_genes, n_samples));
        for i in 0..n_genes {
            let mean = 80.0 + i as f64 * 15.0;
            for s in 0..n_samples {
                counts[[i, s]] = (mean * (1.0 + 0.05 * jitter(i, s))).round();
            }
        }
        let gene_ids = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let sample_ids: Vec<String> = (0..n_samples).map(|s| format!("s{}", s)).collect();
        let matrix = CountMatrix::new(counts, gene_ids, sample_ids.clone()).unwrap();
        let meta = SampleMetadata::new(
            sample_ids,
            vec!["M0", "M0", "M0", "M1", "M1", "M1", "M2", "M2", "M2"]
                .into_iter()
                .map(String::from)
                .collect(),
            vec!["b1", "b2", "b1", "b2", "b1", "b2", "b1", "b2", "b1"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
        .unwrap();
        VoomDataSet::new(matrix, meta).unwrap()
    }

    #[test]
    fn test_pipeline_recovers_large_fold_change() {
        let mut dds = de_dataset();
        let contrasts = vec![Contrast::parse("M1-M0").unwrap()];
        let tables = run_voom_limma(&mut dds, &contrasts, &PipelineParams::default()).unwrap();
        let table = &tables[0];

        let idx = table.gene_ids.iter().position(|g| g == "DEG1").unwrap();
        let lfc = table.log2_fold_changes[idx];
        assert!(
            (lfc - 10.0).abs() < 0.5,
            "expected log2 fold change near 10, got {}",
            lfc
        );
        assert!(table.padj[idx] < 0.05);

        let th = SignificanceThresholds::default();
        assert_eq!(
            testing::classify(lfc, table.padj[idx], &th),
            Regulation::Up
        );
    }

    #[test]
    fn test_pipeline_flags_constant_gene() {
        let mut dds = de_dataset();
        let contrasts = vec![Contrast::parse("M1-M0").unwrap()];
        let tables = run_voom_limma(&mut dds, &contrasts, &PipelineParams::default()).unwrap();
        let table = &tables[0];

        // Untestable genes sort last
        assert_eq!(table.gene_ids.last().unwrap(), "FLAT1");
        let i = table.n_genes() - 1;
        assert!(table.pvalues[i].is_nan());
        assert!(table.padj[i].is_nan());
        assert!(table.log2_fold_changes[i].is_finite());

        let summary = table.summary(&SignificanceThresholds::default());
        assert_eq!(summary.n_na, 1);
    }

    #[test]
    fn test_pipeline_deterministic() {
        let contrasts = vec![
            Contrast::parse("M1-M0").unwrap(),
            Contrast::parse("M2-M0").unwrap(),
            Contrast::parse("M2-M1").unwrap(),
        ];
        let params = PipelineParams::default();

        let mut dds1 = three_group_dataset();
        let mut dds2 = three_group_dataset();
        let run1 = run_voom_limma(&mut dds1, &contrasts, &params).unwrap();
        let run2 = run_voom_limma(&mut dds2, &contrasts, &params).unwrap();

        assert_eq!(run1.len(), run2.len());
        for (a, b) in run1.iter().zip(run2.iter()) {
            assert_eq!(a.gene_ids, b.gene_ids);
            // Bitwise identity, not approximate equality
            for i in 0..a.n_genes() {
                assert_eq!(
                    a.log2_fold_changes[i].to_bits(),
                    b.log2_fold_changes[i].to_bits()
                );
                assert_eq!(a.pvalues[i].to_bits(), b.pvalues[i].to_bits());
                assert_eq!(a.padj[i].to_bits(), b.padj[i].to_bits());
                assert_eq!(a.t[i].to_bits(), b.t[i].to_bits());
            }
        }
    }

    #[test]
    fn test_pipeline_rejects_empty_contrasts() {
        let mut dds = de_dataset();
        assert!(run_voom_limma(&mut dds, &[], &PipelineParams::default()).is_err());
    }

    #[test]
    fn test_pipeline_unknown_group_fails() {
        let mut dds = de_dataset();
        let contrasts = vec![Contrast::parse("M4-M0").unwrap()];
        let err = run_voom_limma(&mut dds, &contrasts, &PipelineParams::default()).unwrap_err();
        assert!(format!("{}", err).contains("M4"));
    }
}
