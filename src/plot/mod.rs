//! Diagnostic figures: volcano plots and three-way Venn diagrams

mod venn;
mod volcano;

pub use venn::venn3_plot;
pub use volcano::volcano_plot;
