//! Command-line interface for rust_limma

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rust_limma")]
#[command(version)]
#[command(about = "limma-voom differential expression analysis in Rust")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full voom/limma analysis
    #[command(
        long_about = "Run the full voom/limma analysis\n\n\
            TMM normalization, log2-CPM with precision weights, per-gene weighted\n\
            linear models with batch adjustment, empirical Bayes moderated t-tests\n\
            and BH correction. Writes one result table and one volcano plot per\n\
            contrast; with exactly three contrasts also a Venn diagram and JSON\n\
            overlap summary of the significant gene sets.",
        after_long_help = "\
Examples:
  # Three-group macrophage comparison with batch adjustment
  rust_limma run -c counts.tsv -m samples.csv \\
    --contrast M1-M0 --contrast M2-M0 --contrast M2-M1 -o results/

  # Custom thresholds and a different metadata layout
  rust_limma run -c counts.tsv -m samples.csv --group-col condition \\
    --batch-col run --contrast M1-M0 --alpha 0.01 --lfc 1.0 -o results/"
    )]
    Run {
        /// Path to count matrix file (CSV or TSV)
        #[arg(short, long,
            long_help = "Path to count matrix file.\n\
                Format: first column = gene IDs, first row = sample IDs,\n\
                cells = raw read counts. Delimiter is auto-detected.")]
        counts: String,

        /// Path to sample metadata file (CSV or TSV)
        #[arg(short, long,
            long_help = "Path to sample metadata file.\n\
                Format: first column = sample IDs matching the count matrix\n\
                columns (any order); see --group-col and --batch-col.")]
        metadata: String,

        /// Metadata column holding the group label [default: polarization]
        #[arg(long, default_value = "polarization")]
        group_col: String,

        /// Metadata column holding the batch label [default: series]
        #[arg(long, default_value = "series",
            long_help = "Metadata column holding the batch label.\n\
                A missing column means all samples form a single batch and no\n\
                batch coefficients enter the model.")]
        batch_col: String,

        /// Contrast to test, e.g. M1-M0 (repeatable)
        #[arg(long, required = true,
            long_help = "Contrast to test, written NUMERATOR-DENOMINATOR on the\n\
                group levels, e.g. --contrast M1-M0. Repeat for multiple\n\
                contrasts; each produces its own result table and volcano plot.")]
        contrast: Vec<String>,

        /// Output directory [default: .]
        #[arg(short, long, default_value = ".")]
        outdir: String,

        /// Adjusted p-value cutoff for significance [default: 0.05]
        #[arg(long, default_value = "0.05")]
        alpha: f64,

        /// Absolute log2 fold change cutoff for significance [default: 2]
        #[arg(long, default_value = "2.0")]
        lfc: f64,

        /// Normalization method [default: tmm]
        #[arg(long, default_value = "tmm",
            long_help = "Library normalization method.\n\
                tmm:     trimmed mean of M-values (edgeR default)\n\
                libsize: plain library-size scaling")]
        norm: String,

        /// Lowess span for the voom mean-variance trend [default: 0.5]
        #[arg(long, default_value = "0.5")]
        span: f64,

        /// Prior count added before taking logs [default: 0.5]
        #[arg(long, default_value = "0.5")]
        prior_count: f64,

        /// Assumed proportion of DE genes (for the B-statistic) [default: 0.01]
        #[arg(long, default_value = "0.01")]
        proportion: f64,

        /// Minimum count for the expression filter [default: 10]
        #[arg(long, default_value = "10",
            long_help = "Minimum count for the expression filter.\n\
                Used together with --min-samples; genes below the threshold in\n\
                too few samples are dropped before normalization.")]
        min_count: f64,

        /// Samples that must reach --min-count; 0 disables filtering [default: 0]
        #[arg(long, default_value = "0")]
        min_samples: usize,

        /// Skip volcano and Venn images
        #[arg(long)]
        no_plots: bool,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// Write the normalized log2-CPM matrix
    #[command(
        long_about = "Write the normalized log2-CPM matrix.\n\n\
            TMM-normalized log2 counts-per-million, the expression values used by\n\
            the linear model. Useful as input for PCA, clustering, or heatmaps.",
        after_long_help = "\
Examples:
  rust_limma cpm -c counts.tsv -o logcpm.tsv
  rust_limma cpm -c counts.tsv -o logcpm.tsv --norm libsize"
    )]
    Cpm {
        /// Path to count matrix file (CSV or TSV)
        #[arg(short, long)]
        counts: String,

        /// Output file path
        #[arg(short, long)]
        output: String,

        /// Normalization method [default: tmm]
        #[arg(long, default_value = "tmm")]
        norm: String,

        /// Prior count added before taking logs [default: 0.5]
        #[arg(long, default_value = "0.5")]
        prior_count: f64,
    },
}
