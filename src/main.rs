use chrono::Local;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use fswrap::conversions::{mri_convert, resample_cortical_surface, surf_convert};
use fswrap::datacheck::{datacheck, FolderCounts};
use fswrap::filetools::surf2ctm;
use fswrap::info::{DEFAULT_FREESURFER_PATH, VERSION};
use fswrap::plots::{polar_plot, slice_aparc_overlay, tkmedit_slice, CutAxis};
use fswrap::regtools::conformed_to_native_space;
use fswrap::segmentation::recon_all;
use fswrap::stattools::{aparcstats2table, asegstats2table, population_summary, textures2table};
use fswrap::{FsContext, FsError, Result};

const CONVERSION_MODALITIES: [&str; 5] = ["aparc+aseg", "aparc.a2009s+aseg", "aseg", "wm", "rawavg"];
const TEXTURES: [&str; 6] = ["lh.sulc", "rh.sulc", "lh.curv", "rh.curv", "lh.curv.pial", "rh.curv.pial"];


#[derive(Debug, Parser)]
#[command(name = "fswrap")]
#[command(about = "FreeSurfer processing, statistics, conversion and quality check")]
#[command(version)]
struct Cli {
    /// The FreeSurfer configuration file.
    #[arg(short = 'c', long, global = true, env = "FREESURFER_SH", default_value = DEFAULT_FREESURFER_PATH)]
    fsconfig: PathBuf,

    /// The FSL configuration file, for the commands that need FSL.
    #[arg(long, global = true, env = "FSL_SH")]
    fslconfig: Option<PathBuf>,

    /// Log at debug level, unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Segment a subject with recon-all
    Reconall {
        /// The FreeSurfer processing home directory.
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        #[arg(short, long)]
        subjectid: String,
        /// The subject anatomical image to be processed.
        #[arg(short, long)]
        anatfile: PathBuf,
        /// Clean the subject folder first.
        #[arg(short, long)]
        erase: bool,
    },
    /// Summarize the aparc and aseg statistics of all the subjects in tables
    Stats {
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        /// Destination of the 'stats' folder, default is 'fsdir'.
        #[arg(short, long)]
        outdir: Option<PathBuf>,
        #[arg(short, long)]
        erase: bool,
    },
    /// Resample the sulcal depth and curvature textures of all the subjects on an icosahedron
    Textures {
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        /// Order of the icosahedral tesselation, in [0, 7].
        #[arg(short, long, default_value_t = 7)]
        icoorder: i32,
        /// Keep the individual resampled textures.
        #[arg(short, long)]
        keep: bool,
        #[arg(short, long)]
        erase: bool,
    },
    /// Export the volumes and surfaces of a subject to its native space
    Conversion {
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        /// The FreeSurfer conversion home directory.
        #[arg(short, long)]
        outdir: PathBuf,
        #[arg(short, long)]
        subjectid: String,
        #[arg(short, long)]
        erase: bool,
    },
    /// Check the expected outputs of all the subjects of a processing directory
    Datacheck {
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        /// Regular expression matching the whole subject folder names.
        #[arg(short, long)]
        regex: String,
        /// Only check this subject, and report its tree.
        #[arg(short, long)]
        subjectid: Option<String>,
        /// Number of files expected in the 'convert' folder.
        #[arg(long)]
        conversion: Option<usize>,
        /// Number of files expected in the 'convert/qc' folder.
        #[arg(short, long)]
        qc: Option<usize>,
    },
    /// Quality check of a subject: polar plots, slices and OpenCTM surfaces
    Qc {
        #[arg(short = 'd', long)]
        fsdir: PathBuf,
        #[arg(short, long)]
        subjectid: String,
        /// The QC home directory, default is '<fsdir>/<subjectid>/qc'.
        #[arg(short, long)]
        outdir: Option<PathBuf>,
        /// Increment between two slices.
        #[arg(short, long, default_value_t = 1)]
        incr: i32,
        #[arg(short, long)]
        erase: bool,
    },
}


fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if let Err(e) = tracing_subscriber::registry().with(env_filter).with(fmt::layer()).try_init() {
        eprintln!("Failed to initialize tracing: {}", e);
    }
}


fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Datacheck { fsdir, regex, subjectid, conversion, qc } = &cli.command {
        return run_datacheck(fsdir, regex, subjectid.as_deref(), *conversion, *qc);
    }

    let mut ctx = FsContext::configure(&cli.fsconfig)?;
    if let Some(fslconfig) = &cli.fslconfig {
        ctx = ctx.with_fsl(fslconfig)?;
    }
    let start = Local::now();

    match &cli.command {
        Command::Reconall { fsdir, subjectid, anatfile, erase } => {
            let subjdir = fsdir.join(subjectid);
            if subjdir.is_dir() && *erase {
                fs::remove_dir_all(&subjdir)?;
            }
            let subjdir = recon_all(fsdir, anatfile, subjectid, &ctx)?;
            info!("Segmentation in folder: {}.", subjdir.display());
            let inputs = json!({"fsdir": fsdir, "subjectid": subjectid, "anatfile": anatfile});
            record_logs(&subjdir, "recon-all", &cli, &ctx, inputs, json!({"subjdir": subjdir}), start)
        }
        Command::Stats { fsdir, outdir, erase } => {
            let outdir = outdir.clone().unwrap_or_else(|| fsdir.clone());
            let statsdir = clean_dir(&outdir.join("stats"), *erase)?;
            let mut statfiles = aparcstats2table(fsdir, &outdir, &ctx)?;
            statfiles.extend(asegstats2table(fsdir, &outdir, &ctx)?);
            info!("{} statistic tables in '{}'.", statfiles.len(), statsdir.display());
            let inputs = json!({"fsdir": fsdir, "outdir": outdir});
            record_logs(&statsdir, "stats", &cli, &ctx, inputs, json!({"statfiles": statfiles}), start)
        }
        Command::Textures { fsdir, icoorder, keep, erase } => {
            let texturesdir = clean_dir(&fsdir.join("textures"), *erase)?;
            let mut textures_files = Vec::new();
            for texture in TEXTURES.iter() {
                let regex = format!("*/surf/{}", texture);
                textures_files.extend(textures2table(&regex, *icoorder, fsdir, &texturesdir, *keep, "all", &ctx)?);
            }
            let inputs = json!({"fsdir": fsdir, "ico_order": icoorder, "keep": keep});
            record_logs(&texturesdir, "textures", &cli, &ctx, inputs, json!({"textures": textures_files}), start)
        }
        Command::Conversion { fsdir, outdir, subjectid, erase } => {
            let outputs = run_conversion(fsdir, outdir, subjectid, *erase, &ctx)?;
            let inputs = json!({"fsdir": fsdir, "outdir": outdir, "subjectid": subjectid});
            let convertdir = outdir.join(subjectid).join("convert");
            record_logs(&convertdir, "conversion", &cli, &ctx, inputs, json!({"outputs": outputs}), start)
        }
        Command::Qc { fsdir, subjectid, outdir, incr, erase } => {
            let qcdir = match outdir {
                Some(outdir) => outdir.join(subjectid),
                None => fsdir.join(subjectid).join("qc"),
            };
            let outputs = run_qc(fsdir, subjectid, &qcdir, *incr, *erase, &ctx)?;
            let inputs = json!({"fsdir": fsdir, "subjectid": subjectid, "increment": incr});
            record_logs(&qcdir, "qc", &cli, &ctx, inputs, json!({"outputs": outputs}), start)
        }
        Command::Datacheck { .. } => Ok(()),
    }
}


fn run_datacheck(fsdir: &Path, regex: &str, subjectid: Option<&str>, conversion: Option<usize>, qc: Option<usize>) -> Result<()> {
    let reference = FolderCounts::default().with_conversion(conversion, qc);
    let report = datacheck(fsdir, regex, subjectid, &reference)?;
    println!("SUCCESS: {}/{}", report.success, report.total);
    println!("FAILED: {}/{}", report.total - report.success, report.total);
    println!("FAILED SIDS: {:?}", report.failed_sids);
    println!("COUNT SUCCESS: {}/{}", report.count_success, report.total);
    println!("COUNT FAILED: {}/{}", report.total - report.count_success, report.total);
    println!("COUNT FAILED SIDS: {:?}", report.count_failed_sids);

    if let Some(sid) = subjectid {
        if let Some(status) = report.subjects.get(sid) {
            println!("TREE '{}': ", sid);
            for (folder, expected) in reference.0.iter() {
                let observed = status.counts.get(folder).map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{:>20} | {:>10} (observed) | {:>10} (reference)", folder, observed, expected);
            }
            println!("{:>20} | {:?}", "extrapaths", status.extrapaths);
        }
    }
    Ok(())
}


fn run_conversion(fsdir: &Path, outdir: &Path, subjectid: &str, erase: bool, ctx: &FsContext) -> Result<Vec<PathBuf>> {
    let subjdir = fsdir.join(subjectid);
    if !subjdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a FreeSurfer subject folder.", subjdir.display())));
    }
    clean_dir(&outdir.join(subjectid).join("convert"), erase)?;

    let mut outputs = Vec::new();
    let mut rawavg = Vec::new();
    for modality in CONVERSION_MODALITIES.iter() {
        let regex = format!("{}/mri/{}.mgz", subjectid, modality);
        let niftifiles = mri_convert(fsdir, &regex, outdir, Some("convert"), true, "nearest", ctx)?;
        if *modality == "rawavg" {
            rawavg = niftifiles.clone();
        }
        outputs.extend(niftifiles);
    }
    outputs.extend(conformed_to_native_space(fsdir, &format!("{}/mri", subjectid), outdir, ctx)?);

    let mut annotations = Vec::new();
    for modality in ["pial", "white"].iter() {
        for hemi in ["lh", "rh"].iter() {
            let regex = format!("{}/surf/{}.{}", subjectid, hemi, modality);
            let (resampled, annotfiles) = resample_cortical_surface(fsdir, &regex, outdir, "convert", &[4, 5, 6, 7], modality, ctx)?;
            annotations.extend(annotfiles);
            outputs.extend(surf_convert(fsdir, &rawavg, &resampled, 3, true, ctx)?);
        }
    }
    annotations.sort();
    annotations.dedup();
    outputs.extend(annotations);
    info!("{} files converted for '{}'.", outputs.len(), subjectid);
    Ok(outputs)
}


fn run_qc(fsdir: &Path, subjectid: &str, qcdir: &Path, increment: i32, erase: bool, ctx: &FsContext) -> Result<Vec<PathBuf>> {
    let subjdir = fsdir.join(subjectid);
    if !subjdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a FreeSurfer subject folder.", subjdir.display())));
    }
    clean_dir(qcdir, erase)?;
    let mut outputs = Vec::new();

    let statsdir = fsdir.join("stats");
    let popstats = population_summary(&statsdir, None)?;
    let indstats = population_summary(&statsdir, Some(subjectid))?;
    for (name, cohort_stats) in popstats.iter() {
        if let Some(individual_stats) = indstats.get(name) {
            let snapfile = qcdir.join(format!("polarplot-{}.svg", name));
            polar_plot(individual_stats, cohort_stats, &snapfile, Some(format!("polarplot-{}", name).as_str()))?;
            outputs.push(snapfile);
        }
    }

    let slice_interval = (0, 255, increment);
    for axis in CutAxis::ALL.iter() {
        let meshdir = qcdir.join(axis.name()).join("mesh");
        fs::create_dir_all(&meshdir)?;
        outputs.extend(tkmedit_slice(fsdir, subjectid, &meshdir, "edges", axis.letter(), slice_interval, None, ctx)?);

        let segdir = qcdir.join(axis.name()).join("aparc_segmentation");
        fs::create_dir_all(&segdir)?;
        outputs.extend(slice_aparc_overlay(fsdir, subjectid, &segdir, axis.letter(), slice_interval, false, ctx)?);
    }

    for surfaces in surf2ctm(&subjdir, qcdir)?.into_values() {
        outputs.extend(surfaces);
    }
    Ok(outputs)
}


/// Create `dir`, emptied first with `erase`.
fn clean_dir(dir: &Path, erase: bool) -> Result<PathBuf> {
    if dir.is_dir() && erase {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}


/// Record the inputs, outputs and runtime of a run in `<outdir>/logs`.
fn record_logs(
    outdir: &Path,
    tool: &str,
    cli: &Cli,
    ctx: &FsContext,
    inputs: serde_json::Value,
    outputs: serde_json::Value,
    start: chrono::DateTime<Local>,
) -> Result<()> {
    let logdir = outdir.join("logs");
    fs::create_dir_all(&logdir)?;
    let end = Local::now();
    let runtime = json!({
        "tool": tool,
        "fswrap_version": VERSION,
        "freesurfer_version": ctx.version(),
        "fsconfig": cli.fsconfig,
        "timestamp": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "duration_seconds": (end - start).num_milliseconds() as f64 / 1000.0,
    });
    for (name, value) in [("runtime", runtime), ("inputs", inputs), ("outputs", outputs)].iter() {
        let logfile = logdir.join(format!("{}.json", name));
        fs::write(&logfile, serde_json::to_string_pretty(value)?)?;
    }
    info!("Logs written in '{}'.", logdir.display());
    Ok(())
}
