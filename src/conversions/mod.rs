//! Wrappers of the FreeSurfer surface and volume conversion tools.

pub mod surfconvs;
pub mod volconvs;

pub use surfconvs::{
    interhemi_projection, interhemi_surfreg, midgray_surface, mri_surf2surf, resample_cortical_surface,
    surf_convert,
};
pub use volconvs::{mri_binarize, mri_convert, mri_vol2surf, BinarizeOptions};
