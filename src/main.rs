//! rust_limma command-line interface

use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rust_limma::cli::{Cli, Commands};
use rust_limma::ebayes::EbayesParams;
use rust_limma::fit::VoomParams;
use rust_limma::normalization;
use rust_limma::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run {
            counts,
            metadata,
            group_col,
            batch_col,
            contrast,
            outdir,
            alpha,
            lfc,
            norm,
            span,
            prior_count,
            proportion,
            min_count,
            min_samples,
            no_plots,
            threads,
        } => run_analysis(
            &counts,
            &metadata,
            &group_col,
            &batch_col,
            &contrast,
            &outdir,
            alpha,
            lfc,
            &norm,
            span,
            prior_count,
            proportion,
            min_count,
            min_samples,
            no_plots,
            threads,
        ),
        Commands::Cpm {
            counts,
            output,
            norm,
            prior_count,
        } => run_cpm(&counts, &output, &norm, prior_count),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn parse_norm_method(norm: &str) -> Result<NormMethod> {
    match norm {
        "tmm" => Ok(NormMethod::Tmm),
        "libsize" => Ok(NormMethod::LibSize),
        _ => Err(LimmaError::InvalidInput {
            reason: format!("Unknown normalization method '{}'. Use 'tmm' or 'libsize'.", norm),
        }),
    }
}

/// File-system safe version of a contrast label
fn file_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn run_analysis(
    counts_path: &str,
    metadata_path: &str,
    group_col: &str,
    batch_col: &str,
    contrast_specs: &[String],
    outdir: &str,
    alpha: f64,
    lfc: f64,
    norm: &str,
    span: f64,
    prior_count: f64,
    proportion: f64,
    min_count: f64,
    min_samples: usize,
    no_plots: bool,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let thresholds = SignificanceThresholds::new(alpha, lfc)?;
    let norm_method = parse_norm_method(norm)?;
    let contrasts: Result<Vec<Contrast>> =
        contrast_specs.iter().map(|s| Contrast::parse(s)).collect();
    let contrasts = contrasts?;

    info!("Loading count matrix from: {}", counts_path);
    let mut counts = read_count_matrix(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    if min_samples > 0 {
        let before = counts.n_genes();
        counts = counts.filter_low_counts(min_count, min_samples)?;
        info!(
            "Expression filter (>= {} in >= {} samples) kept {} of {} genes",
            min_count,
            min_samples,
            counts.n_genes(),
            before
        );
    }

    info!("Loading metadata from: {}", metadata_path);
    let metadata = read_metadata(metadata_path, group_col, batch_col)?;
    let metadata = align_metadata(&counts, metadata)?;

    let mut dds = VoomDataSet::new(counts, metadata)?;
    let params = PipelineParams {
        norm_method,
        voom: VoomParams { span, prior_count },
        ebayes: EbayesParams { proportion },
    };

    let tables = run_voom_limma(&mut dds, &contrasts, &params)?;

    let outdir = Path::new(outdir);
    std::fs::create_dir_all(outdir)?;

    for table in &tables {
        let label = file_label(&table.contrast.label());
        let table_path = outdir.join(format!("{}.tsv", label));
        info!("Writing results to: {}", table_path.display());
        write_top_table(&table_path, table)?;

        if !no_plots {
            let plot_path = outdir.join(format!("volcano_{}.png", label));
            info!("Writing volcano plot to: {}", plot_path.display());
            rust_limma::plot::volcano_plot(&plot_path, table, &thresholds)?;
        }

        println!("{}", table.summary(&thresholds));
    }

    if tables.len() == 3 {
        let gene_sets: Vec<GeneSet> = tables
            .iter()
            .map(|t| GeneSet::from_top_table(t, &thresholds))
            .collect();
        let report = overlap_report(&gene_sets[0], &gene_sets[1], &gene_sets[2])?;

        let json_path = outdir.join("overlap.json");
        info!("Writing overlap summary to: {}", json_path.display());
        rust_limma::io::write_overlap_json(&json_path, &report)?;

        if !no_plots {
            for (name, summary) in [
                ("venn.png", &report.all),
                ("venn_up.png", &report.up),
                ("venn_down.png", &report.down),
            ] {
                let venn_path = outdir.join(name);
                info!("Writing Venn diagram to: {}", venn_path.display());
                rust_limma::plot::venn3_plot(&venn_path, summary)?;
            }
        }

        println!(
            "Shared across all three contrasts: {} genes",
            report.all.core.len()
        );
    } else if tables.len() > 1 {
        info!(
            "Set overlap reporting needs exactly three contrasts, got {}; skipping",
            tables.len()
        );
    }

    Ok(())
}

/// Reorder metadata rows to the count matrix's sample order, failing on
/// any mismatch in either direction.
fn align_metadata(counts: &CountMatrix, metadata: SampleMetadata) -> Result<SampleMetadata> {
    if counts.n_samples() != metadata.n_samples() {
        return Err(LimmaError::InvalidMetadata {
            reason: format!(
                "Count matrix has {} samples, metadata has {}",
                counts.n_samples(),
                metadata.n_samples()
            ),
        });
    }

    let meta_ids = metadata.sample_ids();
    let mut order = Vec::with_capacity(counts.n_samples());
    let mut missing: Vec<&str> = Vec::new();
    for id in counts.sample_ids() {
        match meta_ids.iter().position(|m| m == id) {
            Some(k) => order.push(k),
            None => missing.push(id),
        }
    }
    if !missing.is_empty() {
        return Err(LimmaError::InvalidMetadata {
            reason: format!("Samples present in counts but not in metadata: {:?}", missing),
        });
    }

    metadata.subset(&order)
}

fn run_cpm(counts_path: &str, output_path: &str, norm: &str, prior_count: f64) -> Result<()> {
    let norm_method = parse_norm_method(norm)?;

    info!("Loading count matrix from: {}", counts_path);
    let counts = read_count_matrix(counts_path)?;
    info!("  {} genes, {} samples", counts.n_genes(), counts.n_samples());

    let factors = match norm_method {
        NormMethod::Tmm => normalization::tmm_norm_factors(counts.counts())?,
        NormMethod::LibSize => ndarray::Array1::from_elem(counts.n_samples(), 1.0),
    };
    let lib_sizes = counts.library_sizes();
    let eff: ndarray::Array1<f64> = ndarray::Array1::from_iter(
        lib_sizes.iter().zip(factors.iter()).map(|(&l, &f)| l * f),
    );
    let cpm = normalization::log_cpm(counts.counts(), &eff, prior_count);

    info!("Writing log2-CPM matrix to: {}", output_path);
    let mut file = std::fs::File::create(output_path)?;
    use std::io::Write;

    writeln!(file, "gene_id\t{}", counts.sample_ids().join("\t"))?;
    for (i, gene_id) in counts.gene_ids().iter().enumerate() {
        let row: Vec<String> = (0..counts.n_samples())
            .map(|j| format!("{:.6}", cpm[[i, j]]))
            .collect();
        writeln!(file, "{}\t{}", gene_id, row.join("\t"))?;
    }

    Ok(())
}
