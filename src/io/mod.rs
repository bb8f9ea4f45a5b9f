//! Input and output: count matrix and metadata readers, result tables

mod csv;
mod results;

pub use csv::{read_count_matrix, read_metadata};
pub use results::{write_overlap_json, write_top_table, Contrast, TopTable, TopTableSummary};
