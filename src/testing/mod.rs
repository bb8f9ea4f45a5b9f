//! Hypothesis testing utilities: multiple testing correction and
//! significance classification

mod decide;
mod fdr;

pub use decide::{classify, decide_tests, Regulation, SignificanceThresholds};
pub use fdr::benjamini_hochberg;
