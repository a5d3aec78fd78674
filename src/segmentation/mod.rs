//! FreeSurfer segmentation pipelines.

pub mod cortical;

pub use cortical::recon_all;
