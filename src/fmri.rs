//! Functional MRI processing on the cortical surface with FS-FAST.
//!
//! The FS-FAST commands work on a session directory: every call runs with the session directory
//! as working directory, and the logs FS-FAST writes in `<outdir>/log` are gathered in
//! `<outdir>/logs`.

use serde::Deserialize;
use tracing::{debug, info};

use std::fs;
use std::path::{Path, PathBuf};

use crate::configuration::process_environment;
use crate::error::{FsError, Result};
use crate::util::{check_file, glob_paths, path_arg};
use crate::wrapper::FsContext;


fn session_args(sessid: &str) -> Vec<String> {
    if Path::new(sessid).is_file() {
        vec!["-sf".to_string(), sessid.to_string()]
    } else {
        vec!["-s".to_string(), sessid.to_string()]
    }
}

fn push_flags(cmd: &mut Vec<String>, flags: &[(bool, &str)]) {
    cmd.extend(flags.iter().filter(|(on, _)| *on).map(|(_, name)| name.to_string()));
}

/// Move the content of the FS-FAST `log` folder to `logs`.
fn gather_logs(outdir: &Path) -> Result<PathBuf> {
    let fs_log_dir = outdir.join("log");
    let log_dir = outdir.join("logs");
    fs::create_dir_all(&log_dir)?;
    if fs_log_dir.is_dir() {
        for entry in fs::read_dir(&fs_log_dir)? {
            let name = entry?.file_name();
            fs::rename(fs_log_dir.join(&name), log_dir.join(&name))?;
        }
        fs::remove_dir_all(&fs_log_dir)?;
    }
    Ok(log_dir)
}


/// Options of `preproc-sess`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocOptions {
    /// Folder of the sessions holding the `f.nii.gz` functional volumes.
    pub fsd: String,
    /// Motion correction and registration to the middle time point of each run.
    pub perrun: bool,
    /// Motion correction and registration to the first time point of the first run.
    pub persession: bool,
    /// Smoothing level in mm.
    pub fwhm: f64,
    pub update: bool,
    pub force: bool,
    /// Turn on slice timing correction with this slice order (`up`, `down`, `odd`, `even`, `siemens`).
    pub sliceorder: Option<String>,
    /// `lh`, `rh` or `lhrh`, sampled on `fsaverage`.
    pub surface: String,
    pub mni305_2mm: bool,
    pub mni305_1mm: bool,
    pub nomc: bool,
    pub nostc: bool,
    pub nosmooth: bool,
    pub nomask: bool,
    pub noreg: bool,
    pub noinorm: bool,
}

impl Default for PreprocOptions {
    fn default() -> Self {
        PreprocOptions {
            fsd: "bold".to_string(),
            perrun: true,
            persession: false,
            fwhm: 5.0,
            update: true,
            force: false,
            sliceorder: None,
            surface: "lhrh".to_string(),
            mni305_2mm: true,
            mni305_1mm: false,
            nomc: false,
            nostc: false,
            nosmooth: false,
            nomask: false,
            noreg: false,
            noinorm: false,
        }
    }
}

/// Files produced by [`mkpreproc_sess`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocOutputs {
    pub lh_fsaverage: Vec<PathBuf>,
    pub rh_fsaverage: Vec<PathBuf>,
    /// Volumes in the MNI305 space, for subcortical analyses.
    pub sub_fsaverage: Vec<PathBuf>,
    /// Functional to anatomical registration scores, from 0 (perfect) to 1 (terrible).
    pub bbr_sum: PathBuf,
    pub mc_plots: Vec<PathBuf>,
}


/// All the FS-FAST preprocessing steps of a session with `preproc-sess`: motion correction,
/// slice timing correction, smoothing, intensity normalisation and brain mask.
///
/// The motion correction is then plotted with `plot-twf-sess` and the registration quality
/// summarised by `tkregister-sess` in `<outdir>/bbr_sum.txt`. `sessid` is a session
/// identifier, or a file listing them. `preproc-sess` runs with the FSL environment.
pub fn mkpreproc_sess<P: AsRef<Path>, Q: AsRef<Path>>(
    sessid: &str,
    outdir: P,
    fsdir: Q,
    opts: &PreprocOptions,
    ctx: &FsContext,
) -> Result<PreprocOutputs> {
    let (outdir, fsdir) = (outdir.as_ref(), fsdir.as_ref());
    if !["lh", "rh", "lhrh"].contains(&opts.surface.as_str()) {
        return Err(FsError::InvalidArgument(format!(
            "Unknown '{}' preproc-sess surface.", opts.surface)));
    }
    let func_files = glob_paths(outdir.join("*").join(&opts.fsd).join("*").join("f.nii.gz"))?;
    info!("Found {} fMRI file(s) to be processed.", func_files.len());

    let mut cmd = vec![
        "preproc-sess".to_string(),
        "-d".to_string(), path_arg(outdir),
        "-fsd".to_string(), opts.fsd.clone(),
        "-fwhm".to_string(), format!("{:?}", opts.fwhm),
        "-surface".to_string(), "fsaverage".to_string(), opts.surface.clone(),
    ];
    cmd.extend(session_args(sessid));
    if let Some(order) = &opts.sliceorder {
        cmd.extend(vec!["-sliceorder".to_string(), order.clone()]);
    }
    push_flags(&mut cmd, &[
        (opts.perrun, "-per-run"),
        (opts.persession, "-per-session"),
        (opts.update, "-update"),
        (opts.force, "-force"),
        (opts.mni305_2mm, "-mni305-2mm"),
        (opts.mni305_1mm, "-mni305-1mm"),
        (opts.nomc, "-nomc"),
        (opts.nostc, "-nostc"),
        (opts.nosmooth, "-nosmooth"),
        (opts.nomask, "-nomask"),
        (opts.noreg, "-noreg"),
        (opts.noinorm, "-noinorm"),
    ]);
    ctx.wrapper(&cmd).with_fsl().subjects_dir(fsdir).current_dir(outdir).run()?;

    let mut cmd = vec![
        "plot-twf-sess".to_string(),
        "-d".to_string(), path_arg(outdir),
        "-fsd".to_string(), opts.fsd.clone(),
        "-mc".to_string(),
    ];
    cmd.extend(session_args(sessid));
    ctx.wrapper(&cmd).subjects_dir(fsdir).current_dir(outdir).run()?;

    let mut cmd = vec![
        "tkregister-sess".to_string(),
        "-d".to_string(), path_arg(outdir),
        "-fsd".to_string(), opts.fsd.clone(),
        "-per-run".to_string(),
        "-bbr-sum".to_string(),
    ];
    cmd.extend(session_args(sessid));
    let output = ctx.wrapper(&cmd).subjects_dir(fsdir).current_dir(outdir).run()?;
    let bbr_sum = outdir.join("bbr_sum.txt");
    fs::write(&bbr_sum, output.stdout)?;

    gather_logs(outdir)?;

    let runs = outdir.join("*").join(&opts.fsd).join("*");
    Ok(PreprocOutputs {
        lh_fsaverage: glob_paths(runs.join("f*.fsaverage.lh.nii.gz"))?,
        rh_fsaverage: glob_paths(runs.join("f*.fsaverage.rh.nii.gz"))?,
        sub_fsaverage: glob_paths(runs.join("f*.mni305.*mm.nii.gz"))?,
        bbr_sum,
        mc_plots: glob_paths(outdir.join("*").join(&opts.fsd).join("*.mcdat.png"))?,
    })
}


/// A contrast as stored in the contrasts JSON file:
/// `[name, stat, [conditions], [condition ids], [weights]]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contrast(
    pub String,
    pub String,
    pub Vec<serde_json::Value>,
    pub Vec<usize>,
    pub Vec<f64>,
);

/// Options of `mkanalysis-sess`, for event-related and blocked designs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    /// Basename of the functional volumes, overriding the smoothed default.
    pub funcstem: Option<String>,
    pub fsd: String,
    pub perrun: bool,
    pub persession: bool,
    pub fwhm: f64,
    pub mni305_2mm: bool,
    pub mni305_1mm: bool,
    pub retinotopy_design: bool,
    pub abblocked_design: bool,
    /// SPM HRF with this number of derivatives.
    pub spmhrf: Option<i32>,
    /// FSL HRF with this number of derivatives.
    pub fslhrf: Option<i32>,
    /// Gamma function IRF `(delta, tau)`.
    pub gammafit: Option<(f64, f64)>,
    pub ngammaderiv: Option<i32>,
    /// FIR prestimulus and total time window in seconds.
    pub fir: Option<(f64, f64)>,
    /// Number of conditions, fixation excluded. Required by the contrasts.
    pub nconditions: Option<usize>,
    pub refeventdur: Option<i32>,
    /// Order of the polynomial trend.
    pub polyfit: i32,
    /// Use the motion parameters as nuisance regressors.
    pub mcextreg: bool,
    /// External nuisance regressor file and number of regressors.
    pub nuisreg: Option<(String, i32)>,
    /// Time points skipped at the start of each run.
    pub nskip: i32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions {
            funcstem: None,
            fsd: "bold".to_string(),
            perrun: true,
            persession: false,
            fwhm: 5.0,
            mni305_2mm: true,
            mni305_1mm: false,
            retinotopy_design: false,
            abblocked_design: false,
            spmhrf: Some(0),
            fslhrf: None,
            gammafit: None,
            ngammaderiv: None,
            fir: None,
            nconditions: None,
            refeventdur: None,
            polyfit: 2,
            mcextreg: true,
            nuisreg: None,
            nskip: 4,
        }
    }
}

fn contrast_weights(contrast: &Contrast, nconditions: usize) -> Result<Vec<f64>> {
    let Contrast(name, _, _, conditions, weights) = contrast;
    if conditions.len() != weights.len() {
        return Err(FsError::InvalidArgument(format!(
            "Contrast '{}' has {} conditions and {} weights.", name, conditions.len(), weights.len())));
    }
    let mut wcond = vec![0.0; nconditions];
    for (idx, weight) in conditions.iter().zip(weights.iter()) {
        let slot = wcond.get_mut(*idx).ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "Contrast '{}' references condition {} out of {}.", name, idx, nconditions))
        })?;
        *slot = *weight;
    }
    Ok(wcond)
}


/// Configure the first level GLM analyses of the `lh`, `rh` and `mni305` spaces with
/// `mkanalysis-sess`, and their contrasts with `mkcontrast-sess`.
///
/// The paradigm is `odd.even.par`; the analyses are named `odd.even.sm<fwhm>.<space>`.
/// Returns the analysis names.
pub fn mkmodel_sess<P: AsRef<Path>, Q: AsRef<Path>>(
    outdir: P,
    tr: f64,
    contrasts_file: Q,
    opts: &ModelOptions,
    ctx: &FsContext,
) -> Result<Vec<String>> {
    let outdir = outdir.as_ref();
    check_file(&contrasts_file)?;
    if opts.retinotopy_design || opts.abblocked_design {
        return Err(FsError::InvalidArgument("Selected design not yet supported.".to_string()));
    }
    let contrasts: Vec<Contrast> = serde_json::from_str(&fs::read_to_string(&contrasts_file)?)?;
    let nconditions = match (opts.nconditions, contrasts.is_empty()) {
        (Some(n), _) => n,
        (None, true) => 0,
        (None, false) => {
            return Err(FsError::InvalidArgument(
                "The number of conditions is required to build the contrasts.".to_string()));
        }
    };

    let mut analysis_names = Vec::new();
    for space in ["lh", "rh", "mni305"].iter() {
        let analysis_name = format!("odd.even.sm{:?}.{}", opts.fwhm, space);
        debug!("Configuring analysis '{}'.", analysis_name);

        let mut cmd = vec![
            "mkanalysis-sess".to_string(),
            "-fsd".to_string(), opts.fsd.clone(),
            "-paradigm".to_string(), "odd.even.par".to_string(),
            "-analysis".to_string(), analysis_name.clone(),
            "-TR".to_string(), format!("{:?}", tr),
            "-force".to_string(),
        ];
        match &opts.funcstem {
            None => cmd.extend(vec!["-fwhm".to_string(), format!("{:?}", opts.fwhm)]),
            Some(stem) => cmd.extend(vec!["-funcstem".to_string(), stem.clone()]),
        }
        if *space == "mni305" {
            cmd.push("-mni305".to_string());
        } else {
            cmd.extend(vec!["-surface".to_string(), "fsaverage".to_string(), space.to_string()]);
        }
        push_flags(&mut cmd, &[(opts.perrun, "-per-run"), (opts.persession, "-per-session")]);
        if opts.mni305_2mm {
            cmd.extend(vec!["-mni305".to_string(), "2".to_string()]);
        }
        if opts.mni305_1mm {
            cmd.extend(vec!["-mni305".to_string(), "1".to_string()]);
        }

        cmd.push("-event-related".to_string());
        let scalars = [
            (opts.spmhrf, "-spmhrf"),
            (opts.fslhrf, "-fslhrf"),
            (opts.ngammaderiv, "-ngammaderiv"),
            (opts.refeventdur, "-refeventdur"),
            (opts.nconditions.map(|n| n as i32), "-nconditions"),
        ];
        for (value, name) in scalars.iter() {
            if let Some(value) = value {
                cmd.extend(vec![name.to_string(), value.to_string()]);
            }
        }
        for (value, name) in [(opts.gammafit, "-gammafit"), (opts.fir, "-fir")].iter() {
            if let Some((a, b)) = value {
                cmd.extend(vec![name.to_string(), format!("{:?}", a), format!("{:?}", b)]);
            }
        }
        cmd.extend(vec![
            "-polyfit".to_string(), opts.polyfit.to_string(),
            "-nskip".to_string(), opts.nskip.to_string(),
        ]);
        if opts.mcextreg {
            cmd.push("-mcextreg".to_string());
        }
        if let Some((file, n)) = &opts.nuisreg {
            cmd.extend(vec!["-nuisreg".to_string(), file.clone(), n.to_string()]);
        }
        ctx.wrapper(&cmd).current_dir(outdir).run()?;

        for contrast in contrasts.iter() {
            let mut cmd = vec![
                "mkcontrast-sess".to_string(),
                "-debug".to_string(),
                "-analysis".to_string(), analysis_name.clone(),
                "-contrast".to_string(), contrast.0.clone(),
                "-ncond".to_string(), nconditions.to_string(),
                "-wcond".to_string(),
            ];
            cmd.extend(contrast_weights(contrast, nconditions)?.iter().map(|w| format!("{:?}", w)));
            ctx.wrapper(&cmd).env(process_environment()).current_dir(outdir).run()?;
        }
        analysis_names.push(analysis_name);
    }

    gather_logs(outdir)?;
    Ok(analysis_names)
}


/// Options of `selxavg3-sess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatOptions {
    /// Save the residuals.
    pub svres: bool,
    pub svres_unwhitened: bool,
    /// Analyse each run separately.
    pub run_wise: bool,
    /// Use all CPUs.
    pub max_threads: bool,
    /// Delete the analysis of already analysed sessions.
    pub overwrite: bool,
}


/// Fit the first level GLM of each analysis with `selxavg3-sess`. The log goes to
/// `<outdir>/logs/selxavg3-sess.log`.
pub fn mkstat_sess<P: AsRef<Path>, Q: AsRef<Path>>(
    sessid: &str,
    outdir: P,
    fsdir: Q,
    analysis_names: &[String],
    opts: &StatOptions,
    ctx: &FsContext,
) -> Result<()> {
    let (outdir, fsdir) = (outdir.as_ref(), fsdir.as_ref());
    let mut cmd = vec![
        "selxavg3-sess".to_string(),
        "-d".to_string(), path_arg(outdir),
        "-debug".to_string(),
        "-no-preproc".to_string(),
    ];
    cmd.extend(session_args(sessid));
    push_flags(&mut cmd, &[
        (opts.svres, "-svres"),
        (opts.svres_unwhitened, "-svres-unwhitened"),
        (opts.run_wise, "-run-wise"),
        (opts.overwrite, "-overwrite"),
        (opts.max_threads, "-max-threads"),
    ]);
    let log_dir = outdir.join("logs");
    fs::create_dir_all(&log_dir)?;
    cmd.extend(vec!["-log".to_string(), path_arg(log_dir.join("selxavg3-sess.log"))]);
    cmd.push("-analysis".to_string());

    for name in analysis_names.iter() {
        info!("Performing analysis '{}'.", name);
        let mut analysis_cmd = cmd.clone();
        analysis_cmd.push(name.clone());
        ctx.wrapper(&analysis_cmd)
            .env(process_environment())
            .subjects_dir(fsdir)
            .current_dir(outdir)
            .run()?;
    }
    Ok(())
}
