//! Diffusion MRI pipelines.

pub mod tracula;

pub use tracula::{read_bvals_bvecs, trac_all, trac_all_stats, TracAllOptions};
