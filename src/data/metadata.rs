//! Sample metadata: polarization group and sequencing batch per sample

use serde::{Deserialize, Serialize};

use crate::error::{LimmaError, Result};

/// Per-sample annotations used in the linear model.
///
/// Every sample carries a polarization-state group label (e.g. M0/M1/M2)
/// and a batch/series label. Both are mandatory; a missing label is an
/// input validation error, not something to be imputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Group (polarization state) label per sample
    group: Vec<String>,
    /// Batch (series) label per sample
    batch: Vec<String>,
}

fn sorted_levels(values: &[String]) -> Vec<String> {
    let mut levels: Vec<String> = values.to_vec();
    levels.sort();
    levels.dedup();
    levels
}

impl SampleMetadata {
    /// Create sample metadata, validating label completeness.
    pub fn new(sample_ids: Vec<String>, group: Vec<String>, batch: Vec<String>) -> Result<Self> {
        let n = sample_ids.len();
        if group.len() != n {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} group labels", n),
                got: format!("{} group labels", group.len()),
            });
        }
        if batch.len() != n {
            return Err(LimmaError::DimensionMismatch {
                expected: format!("{} batch labels", n),
                got: format!("{} batch labels", batch.len()),
            });
        }

        for (i, id) in sample_ids.iter().enumerate() {
            if group[i].trim().is_empty() {
                return Err(LimmaError::InvalidMetadata {
                    reason: format!("Sample '{}' is missing a group label", id),
                });
            }
            if batch[i].trim().is_empty() {
                return Err(LimmaError::InvalidMetadata {
                    reason: format!("Sample '{}' is missing a batch label", id),
                });
            }
        }

        Ok(Self {
            sample_ids,
            group,
            batch,
        })
    }

    /// Sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Group label per sample
    pub fn group(&self) -> &[String] {
        &self.group
    }

    /// Batch label per sample
    pub fn batch(&self) -> &[String] {
        &self.batch
    }

    /// Unique group levels, sorted
    pub fn group_levels(&self) -> Vec<String> {
        sorted_levels(&self.group)
    }

    /// Unique batch levels, sorted
    pub fn batch_levels(&self) -> Vec<String> {
        sorted_levels(&self.batch)
    }

    /// Sample indices belonging to one group level
    pub fn samples_with_group(&self, level: &str) -> Vec<usize> {
        self.group
            .iter()
            .enumerate()
            .filter(|(_, g)| g.as_str() == level)
            .map(|(i, _)| i)
            .collect()
    }

    /// Subset metadata to specific samples
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let pick = |v: &[String]| -> Vec<String> {
            sample_indices.iter().map(|&i| v[i].clone()).collect()
        };
        Self::new(pick(&self.sample_ids), pick(&self.group), pick(&self.batch))
    }
}
