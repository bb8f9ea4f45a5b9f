//! Data structures for RNA-seq expression data and sample annotations

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::VoomDataSet;
pub use metadata::SampleMetadata;
