//! Wrappers of the Human Connectome Project structural pipelines: PreFreeSurfer, FreeSurfer
//! and PostFreeSurfer.
//!
//! The pipelines need FSL 5.0.6, FreeSurfer 5.3.0-HCP, the Connectome Workbench and, for
//! gradient distortion correction, gradunwarp 1.0.2. They run in the FreeSurfer and FSL
//! environments of an [`HcpContext`], extended with the `HCPPIPEDIR*` and `CARET7DIR`
//! variables derived from the pipelines and Workbench directories.

use tracing::info;

use std::path::{Path, PathBuf};

use crate::configuration::Environment;
use crate::error::Result;
use crate::util::{check_dir, check_file, path_arg};
use crate::wrapper::HcpContext;

const NONE: &str = "NONE";


fn hcp_environment(hcpdir: &Path, wbcommand: &Path, scripts: &[(&str, PathBuf)]) -> Environment {
    let mut env = Environment::new();
    env.insert("HCPPIPEDIR".to_string(), path_arg(hcpdir));
    env.insert("CARET7DIR".to_string(), path_arg(wbcommand));
    for (name, dir) in scripts.iter() {
        env.insert(name.to_string(), path_arg(dir));
    }
    env
}

fn global(hcpdir: &Path, kind: &str, name: &str) -> String {
    path_arg(hcpdir.join("global").join(kind).join(name))
}


/// Field map and distortion correction settings of the PreFreeSurfer pipeline.
///
/// The defaults are those of the HCP protocol on the Siemens Connectom scanner, with Siemens
/// gradient echo field maps. Unused settings are `NONE`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFreeSurferOptions {
    /// Brain size estimate in mm.
    pub brainsize: u32,
    /// General Electric gradient echo field map: field map in deg, then magnitude.
    pub fmapgeneralelectric: String,
    /// Delta TE in ms of the field map: 2.46 at 3T, 1.02 at 7T.
    pub echodiff: String,
    /// Spin echo field map with a negative phase encoding direction (LR in HCP data).
    pub se_phase_neg: String,
    /// Spin echo field map with a positive phase encoding direction (RL in HCP data).
    pub se_phase_pos: String,
    /// Echo spacing or dwell time of the spin echo field map.
    pub echospacing: String,
    /// Phase encoding direction of the spin echo field map.
    pub seunwarpdir: String,
    pub t1samplespacing: String,
    pub t2samplespacing: String,
    /// Readout direction of the T1w and T2w images.
    pub unwarpdir: String,
    /// Gradient distortion coefficients.
    pub gdcoeffs: String,
    /// Averaging and readout distortion correction method.
    pub avgrdcmethod: String,
    pub topupconfig: String,
}

impl Default for PreFreeSurferOptions {
    fn default() -> Self {
        PreFreeSurferOptions {
            brainsize: 150,
            fmapgeneralelectric: NONE.to_string(),
            echodiff: "2.46".to_string(),
            se_phase_neg: NONE.to_string(),
            se_phase_pos: NONE.to_string(),
            echospacing: NONE.to_string(),
            seunwarpdir: NONE.to_string(),
            t1samplespacing: "0.0000074".to_string(),
            t2samplespacing: "0.0000021".to_string(),
            unwarpdir: "z".to_string(),
            gdcoeffs: NONE.to_string(),
            avgrdcmethod: "SiemensFieldMap".to_string(),
            topupconfig: NONE.to_string(),
        }
    }
}

/// Structural images in the native space, produced by [`prefreesurfer_hcp`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreFreeSurferOutputs {
    pub t1w_folder: PathBuf,
    pub t1_img: PathBuf,
    pub t1_img_brain: PathBuf,
    pub t2_img: PathBuf,
}


/// Run `PreFreeSurferPipeline.sh`: average the image repeats, correct the gradient and b0
/// distortions, extract the brain, register T2w on T1w, correct the bias field and register
/// the native space on MNI.
///
/// Outputs live in `<path>/<subject>/T1w`, `<path>/<subject>/T2w` and
/// `<path>/<subject>/MNINonLinear`. The repeats of `t1` and `t2` are joined with `@`.
/// `fmapmag` and `fmapphase` may be `NONE`.
#[allow(clippy::too_many_arguments)]
pub fn prefreesurfer_hcp<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    path: P,
    subject: &str,
    t1: &[PathBuf],
    t2: &[PathBuf],
    fmapmag: &str,
    fmapphase: &str,
    hcpdir: Q,
    wbcommand: R,
    opts: &PreFreeSurferOptions,
    ctx: &HcpContext,
) -> Result<PreFreeSurferOutputs> {
    let (path, hcpdir, wbcommand) = (path.as_ref(), hcpdir.as_ref(), wbcommand.as_ref());
    for directory in [path, hcpdir, wbcommand].iter() {
        check_dir(directory)?;
    }
    for filename in t1.iter().chain(t2.iter()) {
        check_file(filename)?;
    }
    for fmap in [fmapmag, fmapphase].iter().filter(|f| **f != NONE) {
        check_file(fmap)?;
    }

    let join = |images: &[PathBuf]| images.iter().map(path_arg).collect::<Vec<_>>().join("@");
    let pipeline = path_arg(hcpdir.join("PreFreeSurfer").join("PreFreeSurferPipeline.sh"));
    let cmd = vec![
        pipeline,
        "--path".to_string(), path_arg(path),
        "--subject".to_string(), subject.to_string(),
        "--t1".to_string(), join(t1),
        "--t2".to_string(), join(t2),
        "--t1template".to_string(), global(hcpdir, "templates", "MNI152_T1_0.7mm.nii.gz"),
        "--t1templatebrain".to_string(), global(hcpdir, "templates", "MNI152_T1_0.7mm_brain.nii.gz"),
        "--t1template2mm".to_string(), global(hcpdir, "templates", "MNI152_T1_2mm.nii.gz"),
        "--t2template".to_string(), global(hcpdir, "templates", "MNI152_T2_0.7mm.nii.gz"),
        "--t2templatebrain".to_string(), global(hcpdir, "templates", "MNI152_T2_0.7mm_brain.nii.gz"),
        "--t2template2mm".to_string(), global(hcpdir, "templates", "MNI152_T2_2mm.nii.gz"),
        "--templatemask".to_string(), global(hcpdir, "templates", "MNI152_T1_0.7mm_brain_mask.nii.gz"),
        "--template2mmmask".to_string(), global(hcpdir, "templates", "MNI152_T1_2mm_brain_mask_dil.nii.gz"),
        "--brainsize".to_string(), opts.brainsize.to_string(),
        "--fnirtconfig".to_string(), global(hcpdir, "config", "T1_2_MNI152_2mm.cnf"),
        "--fmapmag".to_string(), fmapmag.to_string(),
        "--fmapphase".to_string(), fmapphase.to_string(),
        "--fmapgeneralelectric".to_string(), opts.fmapgeneralelectric.clone(),
        "--echodiff".to_string(), opts.echodiff.clone(),
        "--SEPhaseNeg".to_string(), opts.se_phase_neg.clone(),
        "--SEPhasePos".to_string(), opts.se_phase_pos.clone(),
        "--echospacing".to_string(), opts.echospacing.clone(),
        "--seunwarpdir".to_string(), opts.seunwarpdir.clone(),
        "--t1samplespacing".to_string(), opts.t1samplespacing.clone(),
        "--t2samplespacing".to_string(), opts.t2samplespacing.clone(),
        "--unwarpdir".to_string(), opts.unwarpdir.clone(),
        "--gdcoeffs".to_string(), opts.gdcoeffs.clone(),
        "--avgrdcmethod".to_string(), opts.avgrdcmethod.clone(),
        "--topupconfig".to_string(), opts.topupconfig.clone(),
    ];

    let mut env = hcp_environment(hcpdir, wbcommand, &[
        ("HCPPIPEDIR_PreFS", hcpdir.join("PreFreeSurfer").join("scripts")),
        ("HCPPIPEDIR_Global", hcpdir.join("global").join("scripts")),
        ("HCPPIPEDIR_Templates", hcpdir.join("global").join("templates")),
        ("HCPPIPEDIR_Config", hcpdir.join("global").join("config")),
    ]);
    if let Ok(path_var) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path_var);
    }
    ctx.wrapper(&env).call(&cmd)?;

    let t1w_folder = path.join(subject).join("T1w");
    info!("PreFreeSurfer done for '{}': {}", subject, t1w_folder.display());
    Ok(PreFreeSurferOutputs {
        t1_img: t1w_folder.join("T1w_acpc_dc_restore.nii.gz"),
        t1_img_brain: t1w_folder.join("T1w_acpc_dc_restore_brain.nii.gz"),
        t2_img: t1w_folder.join("T2w_acpc_dc_restore.nii.gz"),
        t1w_folder,
    })
}


/// Run `FreeSurferPipeline.sh` on the outputs of [`prefreesurfer_hcp`]: `recon-all` on the
/// 1mm downsampled T1w, with the white and pial surfaces refined at full resolution with the
/// T2w image.
#[allow(clippy::too_many_arguments)]
pub fn freesurfer_hcp<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    subject: &str,
    t1w_folder: P,
    t1_img: &Path,
    t1_img_brain: &Path,
    t2_img: &Path,
    hcpdir: Q,
    wbcommand: R,
    ctx: &HcpContext,
) -> Result<()> {
    let (t1w_folder, hcpdir, wbcommand) = (t1w_folder.as_ref(), hcpdir.as_ref(), wbcommand.as_ref());
    for directory in [t1w_folder, hcpdir, wbcommand].iter() {
        check_dir(directory)?;
    }
    for filename in [t1_img, t1_img_brain, t2_img].iter() {
        check_file(filename)?;
    }

    let cmd = vec![
        path_arg(hcpdir.join("FreeSurfer").join("FreeSurferPipeline.sh")),
        "--subject".to_string(), subject.to_string(),
        "--subjectDIR".to_string(), path_arg(t1w_folder),
        "--t1".to_string(), path_arg(t1_img),
        "--t1brain".to_string(), path_arg(t1_img_brain),
        "--t2".to_string(), path_arg(t2_img),
    ];
    let env = hcp_environment(hcpdir, wbcommand, &[
        ("HCPPIPEDIR_FS", hcpdir.join("FreeSurfer").join("scripts")),
    ]);
    ctx.wrapper(&env).call(&cmd)?;
    Ok(())
}


/// Run `PostFreeSurferPipeline.sh`: convert the FreeSurfer volumes and surfaces to NIfTI and
/// GIFTI, register them on the `fs_LR` meshes, build the ribbon and the myelin maps.
pub fn postfreesurfer_hcp<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    path: P,
    subject: &str,
    hcpdir: Q,
    wbcommand: R,
    ctx: &HcpContext,
) -> Result<()> {
    let (path, hcpdir, wbcommand) = (path.as_ref(), hcpdir.as_ref(), wbcommand.as_ref());
    for directory in [path, hcpdir, wbcommand].iter() {
        check_dir(directory)?;
    }

    let atlases = hcpdir.join("global").join("templates").join("standard_mesh_atlases");
    let cmd = vec![
        path_arg(hcpdir.join("PostFreeSurfer").join("PostFreeSurferPipeline.sh")),
        "--path".to_string(), path_arg(path),
        "--subject".to_string(), subject.to_string(),
        "--surfatlasdir".to_string(), path_arg(&atlases),
        "--grayordinatesdir".to_string(), global(hcpdir, "templates", "91282_Greyordinates"),
        "--grayordinatesres".to_string(), "2".to_string(),
        "--hiresmesh".to_string(), "164".to_string(),
        "--lowresmesh".to_string(), "32".to_string(),
        "--subcortgraylabels".to_string(), global(hcpdir, "config", "FreeSurferSubcorticalLabelTableLut.txt"),
        "--freesurferlabels".to_string(), global(hcpdir, "config", "FreeSurferAllLut.txt"),
        "--refmyelinmaps".to_string(), path_arg(atlases.join("Conte69.MyelinMap_BC.164k_fs_LR.dscalar.nii")),
        "--regname".to_string(), "FS".to_string(),
    ];
    let env = hcp_environment(hcpdir, wbcommand, &[
        ("HCPPIPEDIR_PostFS", hcpdir.join("PostFreeSurfer").join("scripts")),
    ]);
    ctx.wrapper(&env).call(&cmd)?;
    Ok(())
}
