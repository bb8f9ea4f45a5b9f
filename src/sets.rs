//! Gene set construction and overlap reporting
//!
//! Significant genes from each contrast are collected into sets keyed by
//! canonical gene IDs, then compared across contrasts to find shared and
//! exclusive signature genes.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{LimmaError, Result};
use crate::io::TopTable;
use crate::testing::{classify, Regulation, SignificanceThresholds};

/// Canonical form of a gene identifier used for set membership.
///
/// Identifiers are trimmed, uppercased, and '.' separators are replaced
/// with '-' so the same gene matches across annotation sources.
pub fn canonical_gene_id(id: &str) -> String {
    id.trim().to_uppercase().replace('.', "-")
}

/// The significant genes of one contrast, split by direction.
#[derive(Debug, Clone, Serialize)]
pub struct GeneSet {
    /// Contrast label, e.g. "M1-M0"
    pub label: String,
    /// Canonical IDs of all significant genes
    pub all: BTreeSet<String>,
    /// Canonical IDs of up-regulated genes
    pub up: BTreeSet<String>,
    /// Canonical IDs of down-regulated genes
    pub down: BTreeSet<String>,
}

impl GeneSet {
    /// Collect the significant genes of a result table.
    ///
    /// An empty set is a valid outcome: a contrast may have no gene
    /// passing both thresholds.
    pub fn from_top_table(table: &TopTable, thresholds: &SignificanceThresholds) -> Self {
        let mut all = BTreeSet::new();
        let mut up = BTreeSet::new();
        let mut down = BTreeSet::new();

        for i in 0..table.gene_ids.len() {
            let call = classify(table.log2_fold_changes[i], table.padj[i], thresholds);
            if call == Regulation::NotSignificant {
                continue;
            }
            let id = canonical_gene_id(&table.gene_ids[i]);
            match call {
                Regulation::Up => {
                    up.insert(id.clone());
                }
                Regulation::Down => {
                    down.insert(id.clone());
                }
                Regulation::NotSignificant => unreachable!(),
            }
            all.insert(id);
        }

        GeneSet {
            label: table.contrast.label(),
            all,
            up,
            down,
        }
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// The up-regulated genes as a set of their own
    pub fn up_only(&self) -> GeneSet {
        GeneSet {
            label: format!("{}(up)", self.label),
            all: self.up.clone(),
            up: self.up.clone(),
            down: BTreeSet::new(),
        }
    }

    /// The down-regulated genes as a set of their own
    pub fn down_only(&self) -> GeneSet {
        GeneSet {
            label: format!("{}(down)", self.label),
            all: self.down.clone(),
            up: BTreeSet::new(),
            down: self.down.clone(),
        }
    }
}

/// Region sizes and memberships for a three-set comparison.
/// R equivalent: the region counts drawn by VennDiagram::venn.diagram()
#[derive(Debug, Clone, Serialize)]
pub struct OverlapSummary {
    /// Labels of the three sets, in order
    pub labels: [String; 3],
    /// Total size of each set
    pub sizes: [usize; 3],
    /// Pairwise intersection sizes: |A&B|, |A&C|, |B&C|
    pub pairwise: [usize; 3],
    /// Genes in all three sets
    pub core: BTreeSet<String>,
    /// Genes exclusive to each set
    pub exclusive: [BTreeSet<String>; 3],
    /// Exact region sizes: only A, only B, only C, A&B only,
    /// A&C only, B&C only, A&B&C
    pub regions: [usize; 7],
}

/// Compare three gene sets region by region.
///
/// All seven Venn regions are computed exactly; by inclusion-exclusion
/// the region sizes of each set sum back to its total size. Empty input
/// sets are allowed and simply produce zero-sized regions.
pub fn overlap3(a: &GeneSet, b: &GeneSet, c: &GeneSet) -> Result<OverlapSummary> {
    let labels = [a.label.clone(), b.label.clone(), c.label.clone()];
    if labels[0] == labels[1] || labels[0] == labels[2] || labels[1] == labels[2] {
        return Err(LimmaError::InvalidInput {
            reason: format!("Overlap requires three distinct contrasts, got {:?}", labels),
        });
    }

    let ab: BTreeSet<String> = a.all.intersection(&b.all).cloned().collect();
    let ac: BTreeSet<String> = a.all.intersection(&c.all).cloned().collect();
    let bc: BTreeSet<String> = b.all.intersection(&c.all).cloned().collect();
    let core: BTreeSet<String> = ab.intersection(&c.all).cloned().collect();

    let only = |s: &BTreeSet<String>, o1: &BTreeSet<String>, o2: &BTreeSet<String>| {
        s.iter()
            .filter(|id| !o1.contains(*id) && !o2.contains(*id))
            .cloned()
            .collect::<BTreeSet<String>>()
    };
    let exclusive = [
        only(&a.all, &b.all, &c.all),
        only(&b.all, &a.all, &c.all),
        only(&c.all, &a.all, &b.all),
    ];

    let regions = [
        exclusive[0].len(),
        exclusive[1].len(),
        exclusive[2].len(),
        ab.len() - core.len(),
        ac.len() - core.len(),
        bc.len() - core.len(),
        core.len(),
    ];

    Ok(OverlapSummary {
        labels,
        sizes: [a.len(), b.len(), c.len()],
        pairwise: [ab.len(), ac.len(), bc.len()],
        core,
        exclusive,
        regions,
    })
}

/// Overlap of three contrasts, combined and split by direction.
#[derive(Debug, Clone, Serialize)]
pub struct OverlapReport {
    pub all: OverlapSummary,
    pub up: OverlapSummary,
    pub down: OverlapSummary,
}

/// Full three-way overlap report: the combined significant sets plus the
/// up- and down-regulated subsets compared separately.
pub fn overlap_report(a: &GeneSet, b: &GeneSet, c: &GeneSet) -> Result<OverlapReport> {
    Ok(OverlapReport {
        all: overlap3(a, b, c)?,
        up: overlap3(&a.up_only(), &b.up_only(), &c.up_only())?,
        down: overlap3(&a.down_only(), &b.down_only(), &c.down_only())?,
    })
}
