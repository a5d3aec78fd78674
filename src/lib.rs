//! Wrappers of the FreeSurfer, FSL and HCP command line tools, plus readers and writers of the
//! FreeSurfer file formats they exchange.
//!
//! Every wrapper runs its tool through an [`FsContext`] (or an [`HcpContext`] for the HCP
//! pipelines) built from the setup scripts of the installations:
//!
//! ```no_run
//! let ctx = fswrap::FsContext::configure("/i2bm/local/freesurfer/SetUpFreeSurfer.sh").unwrap();
//! let subjdir = fswrap::segmentation::recon_all("/data/freesurfer", "/data/t1.nii.gz", "ab123456", &ctx).unwrap();
//! println!("Segmentation in {}", subjdir.display());
//! ```

pub mod configuration;
pub mod conversions;
pub mod datacheck;
pub mod diffusion;
pub mod error;
pub mod filetools;
pub mod fmri;
pub mod fs_annot;
pub mod fs_lut;
pub mod fs_mgh;
pub mod fs_surface;
pub mod hcp;
pub mod info;
#[doc(hidden)]
pub mod mock;
pub mod nifti_io;
pub mod plots;
pub mod regtools;
pub mod runner;
pub mod segmentation;
pub mod stattools;
pub mod traits;
pub mod tri_surface;
pub mod util;
pub mod wrapper;

pub use configuration::{concat_environment, environment, Environment};
pub use error::{FsError, Result};
pub use fs_annot::{read_annot, write_annot, FsAnnot, FsAnnotColortable};
pub use fs_lut::{load_look_up_table, parse_fs_lut, FsLut};
pub use fs_mgh::{read_mgh, write_mgh, FsMgh, FsMghHeader};
pub use fs_surface::{read_surf, write_surf, BrainMesh, FsSurface, FsSurfaceHeader};
pub use runner::{CommandRunner, Invocation, ProcessOutput, SystemRunner};
pub use traits::VertexColor;
pub use tri_surface::TriSurface;
pub use util::{Hemisphere, Interpolation, SurfaceName};
pub use wrapper::{FsContext, FsWrapper, HcpContext, HcpWrapper};
