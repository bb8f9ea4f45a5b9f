//! CSV reading for count matrices and sample metadata

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{LimmaError, Result};

/// Strip surrounding quotes from a string
fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Detect the field delimiter from the header line
fn detect_delimiter(header_line: &str) -> char {
    if header_line.contains('\t') {
        '\t'
    } else {
        ','
    }
}

/// Read a count matrix from a CSV or TSV file.
/// Expected format: first column is gene IDs, first row is sample IDs.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = lines.next().ok_or_else(|| LimmaError::EmptyData {
        reason: "Empty count matrix file".to_string(),
    })??;

    let delimiter = detect_delimiter(&header_line);
    let header: Vec<&str> = header_line.split(delimiter).collect();
    if header.len() < 2 {
        return Err(LimmaError::InvalidCountMatrix {
            reason: "Count matrix header needs a gene ID column and at least one sample"
                .to_string(),
        });
    }

    let sample_ids: Vec<String> = header[1..].iter().map(|s| strip_quotes(s)).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids: Vec<String> = Vec::new();
    let mut counts_data: Vec<Vec<f64>> = Vec::new();

    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(delimiter).collect();
        if fields.len() != n_samples + 1 {
            return Err(LimmaError::InvalidCountMatrix {
                reason: format!(
                    "Row has {} columns, expected {}",
                    fields.len(),
                    n_samples + 1
                ),
            });
        }

        gene_ids.push(strip_quotes(fields[0]));

        let row_counts: Result<Vec<f64>> = fields[1..]
            .iter()
            .map(|s| {
                let val = strip_quotes(s);
                val.parse::<f64>().map_err(|_| LimmaError::InvalidCountMatrix {
                    reason: format!("Invalid count value: {}", val),
                })
            })
            .collect();

        counts_data.push(row_counts?);
    }

    if gene_ids.is_empty() {
        return Err(LimmaError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let n_genes = gene_ids.len();
    let mut counts = Array2::zeros((n_genes, n_samples));
    for (i, row) in counts_data.iter().enumerate() {
        for (j, &val) in row.iter().enumerate() {
            counts[[i, j]] = val;
        }
    }

    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read sample metadata from a CSV or TSV file.
/// Expected format: first column is sample IDs; `group_col` and
/// `batch_col` name the columns holding the polarization group and the
/// batch label. An absent batch column means a single batch.
pub fn read_metadata<P: AsRef<Path>>(
    path: P,
    group_col: &str,
    batch_col: &str,
) -> Result<SampleMetadata> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = lines.next().ok_or_else(|| LimmaError::EmptyData {
        reason: "Empty metadata file".to_string(),
    })??;

    let delimiter = detect_delimiter(&header_line);
    let header: Vec<String> = header_line
        .split(delimiter)
        .map(strip_quotes)
        .collect();

    let group_idx = header
        .iter()
        .position(|h| h == group_col)
        .ok_or_else(|| LimmaError::InvalidMetadata {
            reason: format!(
                "Group column '{}' not found in metadata header {:?}",
                group_col, header
            ),
        })?;
    let batch_idx = header.iter().position(|h| h == batch_col);
    if batch_idx.is_none() {
        log::warn!(
            "Batch column '{}' not found in metadata; assuming a single batch",
            batch_col
        );
    }

    let mut sample_ids: Vec<String> = Vec::new();
    let mut group: Vec<String> = Vec::new();
    let mut batch: Vec<String> = Vec::new();

    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<String> = line.split(delimiter).map(strip_quotes).collect();
        if fields.len() != header.len() {
            return Err(LimmaError::InvalidMetadata {
                reason: format!(
                    "Row has {} columns, expected {}",
                    fields.len(),
                    header.len()
                ),
            });
        }

        sample_ids.push(fields[0].clone());
        group.push(fields[group_idx].clone());
        batch.push(match batch_idx {
            Some(k) => fields[k].clone(),
            None => "batch1".to_string(),
        });
    }

    if sample_ids.is_empty() {
        return Err(LimmaError::EmptyData {
            reason: "No samples found in metadata".to_string(),
        });
    }

    SampleMetadata::new(sample_ids, group, batch)
}
