//! Default locations of the wrapped toolchains and supported releases.

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default FreeSurfer setup script.
pub const DEFAULT_FREESURFER_PATH: &str = "/i2bm/local/freesurfer/SetUpFreeSurfer.sh";

/// Default FSL setup script.
pub const DEFAULT_FSL_PATH: &str = "/etc/fsl/5.0/fsl.sh";

/// Default Connectome Workbench installation, used by the HCP pipelines.
pub const DEFAULT_WORKBENCH_PATH: &str = "/i2bm/local/workbench/bin_rh_linux64";

/// FreeSurfer releases the wrappers have been tested against.
pub const FREESURFER_RELEASES: [&str; 1] = ["5.3.0"];
