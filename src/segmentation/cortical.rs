//! The FreeSurfer cortical reconstruction.

use tracing::info;

use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::util::{check_file, path_arg};
use crate::wrapper::FsContext;


/// Run all the FreeSurfer cortical reconstruction steps with `recon-all -all`.
///
/// Covers motion correction, intensity normalization, skull strip, volumetric labeling,
/// white matter segmentation, surface tessellation, inflation, spherical registration,
/// cortical parcellation and their statistics.
///
/// Returns the subject directory, `<fsdir>/<sid>`.
///
/// # Examples
///
/// ```no_run
/// let ctx = fswrap::FsContext::configure_default().unwrap();
/// let subjdir = fswrap::segmentation::recon_all("/data/fs", "/data/s1/t1.nii.gz", "s1", &ctx).unwrap();
/// println!("{}", subjdir.display());
/// ```
pub fn recon_all<P: AsRef<Path>, Q: AsRef<Path>>(fsdir: P, anatfile: Q, sid: &str, ctx: &FsContext) -> Result<PathBuf> {
    let (fsdir, anatfile) = (fsdir.as_ref(), anatfile.as_ref());
    if !fsdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a valid FreeSurfer home directory.", fsdir.display())));
    }
    check_file(anatfile)?;

    let (anat_arg, fsdir_arg) = (path_arg(anatfile), path_arg(fsdir));
    let cmd = [
        "recon-all", "-all",
        "-subjid", sid,
        "-i", anat_arg.as_str(),
        "-sd", fsdir_arg.as_str(),
    ];
    ctx.run(&cmd)?;
    let subjfsdir = fsdir.join(sid);
    info!("recon-all done for '{}': {}", sid, subjfsdir.display());
    Ok(subjfsdir)
}
