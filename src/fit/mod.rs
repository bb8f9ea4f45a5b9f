//! Linear modeling: design construction, voom weights, per-gene WLS fit

mod design;
mod linear;
mod lowess;
mod voom;

pub use design::{build_design_matrix, check_full_rank, contrast_vector, DesignInfo};
pub use linear::{contrast_fit, fit_wls, ContrastFit, LinearFit};
pub use lowess::{interp_linear, lowess};
pub use voom::{voom, VoomFit, VoomParams};
