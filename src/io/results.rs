//! Result tables for tested contrasts

use std::fmt;
use std::fs::File;
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::ebayes::ModeratedStats;
use crate::error::{LimmaError, Result};
use crate::fit::ContrastFit;
use crate::sets::OverlapReport;
use crate::testing::{benjamini_hochberg, classify, Regulation, SignificanceThresholds};

/// A pairwise comparison of two group levels, read "numerator minus
/// denominator" on the log2 scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    /// Parse a contrast from the "M1-M0" command line form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, '-');
        match (parts.next(), parts.next()) {
            (Some(num), Some(den)) if !num.trim().is_empty() && !den.trim().is_empty() => {
                Ok(Contrast {
                    numerator: num.trim().to_string(),
                    denominator: den.trim().to_string(),
                })
            }
            _ => Err(LimmaError::InvalidContrast {
                reason: format!("Cannot parse contrast '{}'; expected 'GROUP1-GROUP2'", s),
            }),
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.numerator, self.denominator)
    }
}

impl fmt::Display for Contrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.numerator, self.denominator)
    }
}

/// Per-gene statistics for one tested contrast, ordered by ascending
/// p-value with untestable genes last.
/// R equivalent: topTable(number=Inf) in limma
#[derive(Debug, Clone)]
pub struct TopTable {
    pub contrast: Contrast,
    pub gene_ids: Vec<String>,
    /// Contrast effect on the log2 scale (logFC)
    pub log2_fold_changes: Array1<f64>,
    /// Average log2-CPM across all samples (AveExpr)
    pub ave_expr: Array1<f64>,
    /// Moderated t-statistic
    pub t: Array1<f64>,
    /// Raw two-sided p-value
    pub pvalues: Array1<f64>,
    /// BH-adjusted p-value
    pub padj: Array1<f64>,
    /// Log-odds of differential expression (B)
    pub lods: Array1<f64>,
}

impl TopTable {
    /// Assemble the table from a contrast fit and its moderated
    /// statistics, applying the BH adjustment and sorting.
    ///
    /// Genes with NaN p-values (degenerate counts) keep their effect
    /// estimates, receive NaN adjusted p-values, and sort to the end.
    /// Ties break on the gene ID so the order is deterministic.
    pub fn assemble(
        contrast: Contrast,
        gene_ids: &[String],
        ave_expr: &Array1<f64>,
        cfit: &ContrastFit,
        stats: &ModeratedStats,
    ) -> Result<TopTable> {
        let n = gene_ids.len();
        if cfit.effect.len() != n || stats.pvalue.len() != n || ave_expr.len() != n {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("statistics for {} genes", n),
                got: format!(
                    "effect {}, pvalue {}, ave_expr {}",
                    cfit.effect.len(),
                    stats.pvalue.len(),
                    ave_expr.len()
                ),
            });
        }

        let padj = benjamini_hochberg(stats.pvalue.as_slice().ok_or_else(|| {
            LimmaError::FitFailed {
                reason: "P-value array is not contiguous".to_string(),
            }
        })?);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let pa = stats.pvalue[a];
            let pb = stats.pvalue[b];
            match (pa.is_nan(), pb.is_nan()) {
                (true, true) => gene_ids[a].cmp(&gene_ids[b]),
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => pa
                    .partial_cmp(&pb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| gene_ids[a].cmp(&gene_ids[b])),
            }
        });

        let pick = |src: &Array1<f64>| Array1::from_iter(order.iter().map(|&i| src[i]));
        Ok(TopTable {
            contrast,
            gene_ids: order.iter().map(|&i| gene_ids[i].clone()).collect(),
            log2_fold_changes: pick(&cfit.effect),
            ave_expr: pick(ave_expr),
            t: pick(&stats.t),
            pvalues: pick(&stats.pvalue),
            padj: Array1::from_iter(order.iter().map(|&i| padj[i])),
            lods: pick(&stats.lods),
        })
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Count significant calls under the given thresholds.
    pub fn summary(&self, thresholds: &SignificanceThresholds) -> TopTableSummary {
        let mut n_up = 0;
        let mut n_down = 0;
        let mut n_na = 0;
        for i in 0..self.n_genes() {
            if self.padj[i].is_nan() {
                n_na += 1;
                continue;
            }
            match classify(self.log2_fold_changes[i], self.padj[i], thresholds) {
                Regulation::Up => n_up += 1,
                Regulation::Down => n_down += 1,
                Regulation::NotSignificant => {}
            }
        }
        TopTableSummary {
            contrast: self.contrast.label(),
            n_genes: self.n_genes(),
            n_up,
            n_down,
            n_na,
            thresholds: *thresholds,
        }
    }
}

/// Human-readable summary of one contrast's results.
#[derive(Debug, Clone, Serialize)]
pub struct TopTableSummary {
    pub contrast: String,
    pub n_genes: usize,
    pub n_up: usize,
    pub n_down: usize,
    pub n_na: usize,
    pub thresholds: SignificanceThresholds,
}

impl fmt::Display for TopTableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Contrast {}: {} genes tested", self.contrast, self.n_genes)?;
        writeln!(
            f,
            "  up:   {} (adj.P.Val < {}, logFC >= {})",
            self.n_up, self.thresholds.max_adj_p, self.thresholds.min_abs_log2_fc
        )?;
        writeln!(
            f,
            "  down: {} (adj.P.Val < {}, logFC <= -{})",
            self.n_down, self.thresholds.max_adj_p, self.thresholds.min_abs_log2_fc
        )?;
        if self.n_na > 0 {
            writeln!(f, "  untestable (constant counts): {}", self.n_na)?;
        }
        Ok(())
    }
}

/// Write a result table as tab-separated values with the usual limma
/// column names.
pub fn write_top_table<P: AsRef<Path>>(path: P, table: &TopTable) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;

    writer.write_record(["gene_id", "logFC", "AveExpr", "t", "P.Value", "adj.P.Val", "B"])?;
    for i in 0..table.n_genes() {
        writer.write_record([
            table.gene_ids[i].clone(),
            format!("{:.6}", table.log2_fold_changes[i]),
            format!("{:.6}", table.ave_expr[i]),
            format!("{:.6}", table.t[i]),
            format!("{:.6e}", table.pvalues[i]),
            format!("{:.6e}", table.padj[i]),
            format!("{:.6}", table.lods[i]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the set-overlap report as JSON.
pub fn write_overlap_json<P: AsRef<Path>>(path: P, report: &OverlapReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn toy_table() -> TopTable {
        let contrast = Contrast::parse("M1-M0").unwrap();
        let gene_ids: Vec<String> = ["g1", "g2", "g3", "g4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cfit = ContrastFit {
            effect: array![3.0, -4.0, 0.2, 1.0],
            stdev_unscaled: array![1.0, 1.0, 1.0, 1.0],
        };
        let stats = ModeratedStats {
            t: array![5.0, -6.0, 0.5, f64::NAN],
            pvalue: array![0.002, 0.001, 0.6, f64::NAN],
            lods: array![2.0, 3.0, -5.0, f64::NAN],
            var_post: array![1.0, 1.0, 1.0, f64::NAN],
            df_prior: 2.0,
            s2_prior: 1.0,
            df_total: 6.0,
        };
        let ave_expr = array![5.0, 6.0, 7.0, 0.0];
        TopTable::assemble(contrast, &gene_ids, &ave_expr, &cfit, &stats).unwrap()
    }

    #[test]
    fn test_assemble_sorts_by_pvalue_nan_last() {
        let table = toy_table();
        assert_eq!(table.gene_ids, vec!["g2", "g1", "g3", "g4"]);
        assert!(table.pvalues[3].is_nan());
        assert!(table.padj[3].is_nan());
        // Effect estimate is preserved for the untestable gene
        assert_eq!(table.log2_fold_changes[3], 1.0);
    }

    #[test]
    fn test_assemble_applies_bh() {
        let table = toy_table();
        // 3 testable genes: 0.001*3/1 = 0.003, 0.002*3/2 = 0.003
        assert!((table.padj[0] - 0.003).abs() < 1e-12);
        assert!((table.padj[1] - 0.003).abs() < 1e-12);
        assert!((table.padj[2] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_summary_counts() {
        let table = toy_table();
        let summary = table.summary(&SignificanceThresholds::default());
        assert_eq!(summary.n_up, 1);
        assert_eq!(summary.n_down, 1);
        assert_eq!(summary.n_na, 1);
        let text = format!("{}", summary);
        assert!(text.contains("M1-M0"));
        assert!(text.contains("untestable"));
    }

    #[test]
    fn test_contrast_parse() {
        let c = Contrast::parse("M2-M0").unwrap();
        assert_eq!(c.numerator, "M2");
        assert_eq!(c.denominator, "M0");
        assert_eq!(c.label(), "M2-M0");
        assert!(Contrast::parse("M1").is_err());
        assert!(Contrast::parse("-M0").is_err());
    }

    #[test]
    fn test_write_top_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m1_vs_m0.tsv");
        write_top_table(&path, &toy_table()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "gene_id\tlogFC\tAveExpr\tt\tP.Value\tadj.P.Val\tB"
        );
        assert!(text.lines().count() == 5);
        assert!(text.contains("g2"));
    }
}
