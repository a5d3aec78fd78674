//! Quality check renderings: slices of the anatomy with the segmentation overlaid, and polar
//! plots of the regional statistics of a subject against its cohort.

pub mod polar;
pub mod slicer;

pub use polar::{polar_plot, write_polar_plot};
pub use slicer::{slice_aparc_overlay, tkmedit_slice, CutAxis, SliceType};
