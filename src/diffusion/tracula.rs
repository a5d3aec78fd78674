//! Wrappers of TRACULA, FreeSurfer's automated reconstruction of white matter pathways.

use ndarray::{Array1, Array2};
use regex::Regex;
use tracing::{debug, info};

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::filetools::get_or_check_freesurfer_subjects_dir;
use crate::util::{glob_paths, move_dir, path_arg, path_component_from_end};
use crate::wrapper::FsContext;

/// b-value under which a volume counts as a b0.
pub const MIN_BVAL: f64 = 200.0;

const OUTLIER_PREFIX: &str = "Found outlier path: ";

/// Steps of the `trac-all` preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracAllOptions {
    /// FSL eddy-current correction.
    pub do_eddy: bool,
    /// Rotate the bvecs to match the eddy-current correction.
    pub do_rotate_bvecs: bool,
    /// Register the diffusion to the T1 with `bbregister`.
    pub do_bbregister: bool,
    /// Register the T1 to the MNI template.
    pub do_register_mni: bool,
}

impl Default for TracAllOptions {
    fn default() -> Self {
        TracAllOptions {
            do_eddy: false,
            do_rotate_bvecs: true,
            do_bbregister: true,
            do_register_mni: true,
        }
    }
}


#[allow(clippy::too_many_arguments)]
fn subject_config(
    subjects_dir: &Path,
    subject_id: &str,
    dtroot: &Path,
    dwi: &Path,
    bvecfile: &Path,
    bvalfile: &Path,
    nb0: usize,
    opts: &TracAllOptions,
) -> String {
    format!(
        "\nsetenv SUBJECTS_DIR {}\n\
         set subjlist = ({})\n\
         set dtroot = {}\n\
         set dcmlist = ({})\n\
         set bvecfile = {}\n\
         set bvalfile = {}\n\
         set nb0 = {}\n\
         set dob0 = 0\n\
         set doeddy = {}\n\
         set dorotbvecs = {}\n\
         set doregflt = 0\n\
         set doregbbr = {}\n\
         set doregmni = {}\n\
         set doregcvs = 0\n",
        subjects_dir.display(),
        subject_id,
        dtroot.display(),
        dwi.display(),
        bvecfile.display(),
        bvalfile.display(),
        nb0,
        opts.do_eddy as u8,
        opts.do_rotate_bvecs as u8,
        opts.do_bbregister as u8,
        opts.do_register_mni as u8,
    )
}

fn stats_config(subjects_dir: &Path, subjects: &[String]) -> String {
    format!(
        "\nsetenv SUBJECTS_DIR {0}\nset subjlist = ({1})\nset dtroot = {0}\n",
        subjects_dir.display(),
        subjects.join(" ")
    )
}


fn read_matrix(path: &Path) -> Result<Vec<Vec<f64>>> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            line.split_whitespace()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        FsError::InvalidArgument(format!("'{}' is not a number, in '{}'.", v, path.display()))
                    })
                })
                .collect()
        })
        .collect()
}

/// Read the b-values and the diffusion directions.
///
/// The bvecs may be stored as a 3 x N or a N x 3 matrix; they are returned as N x 3, one row
/// per direction. Also returns the number of b0 volumes, those with a b-value of at most
/// `min_bval`.
pub fn read_bvals_bvecs<P: AsRef<Path>, Q: AsRef<Path>>(
    bvals_path: P,
    bvecs_path: Q,
    min_bval: f64,
) -> Result<(Array1<f64>, Array2<f64>, usize)> {
    let bvals: Array1<f64> = read_matrix(bvals_path.as_ref())?.into_iter().flatten().collect();

    let rows = read_matrix(bvecs_path.as_ref())?;
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a matrix.", bvecs_path.as_ref().display())));
    }
    let matrix = Array2::from_shape_vec((rows.len(), ncols), rows.into_iter().flatten().collect())?;
    let bvecs = if matrix.ncols() == 3 {
        matrix
    } else if matrix.nrows() == 3 {
        matrix.t().to_owned()
    } else {
        return Err(FsError::InvalidArgument(format!(
            "bvecs should be (N, 3) or (3, N), got {:?}.", matrix.dim())));
    };

    if bvecs.nrows() != bvals.len() {
        return Err(FsError::InvalidArgument(format!(
            "Got {} bvals and {} bvecs.", bvals.len(), bvecs.nrows())));
    }
    let nb_b0s = bvals.iter().filter(|b| **b <= min_bval).count();
    Ok((bvals, bvecs, nb_b0s))
}


/// Reconstruct the white matter pathways of a subject with `trac-all`.
///
/// The subject output directory `<outdir>/<subject_id>` gets the `trac-all.dmrirc`
/// configuration and `dmri/bvecs_Nx3`, the directions rewritten one per row. After
/// `trac-all -prep`, the content of `bedpostx_dir` is linked into `dmri.bedpostX`, where
/// `trac-all -path` expects it. Both steps run with the FSL environment and `SUBJECTS_DIR`.
///
/// Returns the subject output directory.
#[allow(clippy::too_many_arguments)]
pub fn trac_all<P: AsRef<Path>>(
    outdir: P,
    subject_id: &str,
    dwi: &Path,
    bvals: &Path,
    bvecs: &Path,
    bedpostx_dir: &Path,
    subjects_dir: Option<&Path>,
    opts: &TracAllOptions,
    ctx: &FsContext,
) -> Result<PathBuf> {
    let outdir = outdir.as_ref();
    let subjects_dir = get_or_check_freesurfer_subjects_dir(subjects_dir)?;
    for path in [dwi, bvals, bvecs, bedpostx_dir].iter() {
        if !path.exists() {
            return Err(FsError::InvalidArgument(format!(
                "File or directory does not exist: {}", path.display())));
        }
    }

    let subject_outdir = outdir.join(subject_id);
    let subject_dmri_dir = subject_outdir.join("dmri");
    fs::create_dir_all(&subject_dmri_dir)?;

    let (_, bvecs_array, nb_b0s) = read_bvals_bvecs(bvals, bvecs, MIN_BVAL)?;
    let bvecs_nx3 = subject_dmri_dir.join("bvecs_Nx3");
    let lines: Vec<String> = bvecs_array
        .outer_iter()
        .map(|row| row.iter().map(|v| format!("{:.18e}", v)).collect::<Vec<_>>().join(" "))
        .collect();
    fs::write(&bvecs_nx3, lines.join("\n") + "\n")?;

    let config = subject_config(&subjects_dir, subject_id, outdir, dwi, &bvecs_nx3, bvals, nb_b0s, opts);
    let path_config = subject_outdir.join("trac-all.dmrirc");
    fs::write(&path_config, config)?;
    debug!("TRACULA configuration written: {}", path_config.display());

    ctx.wrapper(&["trac-all", "-prep", "-c", path_arg(&path_config).as_str()])
        .subjects_dir(&subjects_dir)
        .with_fsl()
        .run()?;

    let dmri_bedpostx_dir = subject_outdir.join("dmri.bedpostX");
    fs::create_dir_all(&dmri_bedpostx_dir)?;
    for entry in fs::read_dir(bedpostx_dir)? {
        let name = entry?.file_name();
        symlink(bedpostx_dir.join(&name), dmri_bedpostx_dir.join(&name))?;
    }

    ctx.wrapper(&["trac-all", "-path", "-c", path_arg(&path_config).as_str()])
        .subjects_dir(&subjects_dir)
        .with_fsl()
        .run()?;
    info!("TRACULA pathways of '{}' in '{}'.", subject_id, subject_outdir.display());
    Ok(subject_outdir)
}


/// Anisotropy and diffusivity along the pathways of all the subjects of `subjects_dir`
/// having a `dpath` folder, with `trac-all -stat`.
///
/// The configuration lives in a temporary directory under `temp_dir` (the OS one by default)
/// removed afterwards. The `stats` folder produced in `subjects_dir` is moved to `outdir`, and
/// the pathways flagged as outliers in its logs are listed in `<outdir>/outliers.json`.
///
/// Returns the statistics directory and the outlier file.
pub fn trac_all_stats<P: AsRef<Path>>(
    outdir: P,
    subjects_dir: Option<&Path>,
    temp_dir: Option<&Path>,
    ctx: &FsContext,
) -> Result<(PathBuf, PathBuf)> {
    let outdir = outdir.as_ref();
    let subjects_dir = get_or_check_freesurfer_subjects_dir(subjects_dir)?;

    let subjects = glob_paths(subjects_dir.join("*").join("dpath"))?
        .iter()
        .map(|p| path_component_from_end(p, 2))
        .collect::<Result<BTreeSet<String>>>()?
        .into_iter()
        .collect::<Vec<_>>();

    let builder = {
        let mut b = tempfile::Builder::new();
        b.prefix("trac-all_");
        b
    };
    let tmp = match temp_dir {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };
    let path_config = tmp.path().join("trac-all.dmrirc");
    fs::write(&path_config, stats_config(&subjects_dir, &subjects))?;

    ctx.wrapper(&["trac-all", "-stat", "-c", path_arg(&path_config).as_str()])
        .subjects_dir(&subjects_dir)
        .with_fsl()
        .run()?;

    fs::create_dir_all(outdir)?;
    let statdir = outdir.join("stats");
    move_dir(subjects_dir.join("stats"), &statdir)?;
    tmp.close()?;

    let re = Regex::new(&format!("(?m)^{}.*", OUTLIER_PREFIX))?;
    let mut outliers = BTreeSet::new();
    for path in glob_paths(statdir.join("*.log"))? {
        let content = fs::read_to_string(&path)?;
        for m in re.find_iter(&content) {
            outliers.insert(m.as_str().trim_end().replacen(OUTLIER_PREFIX, "", 1));
        }
    }
    let outlierfile = outdir.join("outliers.json");
    fs::write(&outlierfile, serde_json::to_string_pretty(&outliers)?)?;
    info!("{} TRACULA outlier pathways over {} subjects.", outliers.len(), subjects.len());
    Ok((statdir, outlierfile))
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::configuration::Environment;
    use crate::mock::mock_context;

    fn fsl_context() -> (std::sync::Arc<crate::mock::MockRunner>, FsContext) {
        let (mock, ctx) = mock_context();
        let mut fsl = Environment::new();
        fsl.insert("FSLDIR".to_string(), "/opt/fsl".to_string());
        (mock, ctx.with_fsl_environment(fsl))
    }

    #[test]
    fn bvecs_are_read_in_both_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let bvals = dir.path().join("dwi.bval");
        fs::write(&bvals, "0 1000 1000 5\n").unwrap();
        let bvecs = dir.path().join("dwi.bvec");
        fs::write(&bvecs, "0 1 0 0\n0 0 1 0\n0 0 0 1\n").unwrap();

        let (values, directions, nb_b0s) = read_bvals_bvecs(&bvals, &bvecs, MIN_BVAL).unwrap();
        assert_eq!(4, values.len());
        assert_eq!((4, 3), directions.dim());
        assert_eq!(1.0, directions[[1, 0]]);
        assert_eq!(1.0, directions[[2, 1]]);
        assert_eq!(2, nb_b0s);

        fs::write(&bvecs, "0 0 0\n1 0 0\n0 1 0\n").unwrap();
        assert!(read_bvals_bvecs(&bvals, &bvecs, MIN_BVAL).is_err());
    }

    #[test]
    fn tracula_prepares_then_reconstructs_the_pathways() {
        let root = tempfile::tempdir().unwrap();
        let subjects_dir = root.path().join("subjects");
        let bedpostx = root.path().join("bedpostx");
        fs::create_dir_all(&subjects_dir).unwrap();
        fs::create_dir_all(&bedpostx).unwrap();
        fs::write(bedpostx.join("merged_th1samples.nii.gz"), "").unwrap();
        let (dwi, bvals, bvecs) = (root.path().join("dwi.nii.gz"), root.path().join("dwi.bval"), root.path().join("dwi.bvec"));
        fs::write(&dwi, "").unwrap();
        fs::write(&bvals, "0\n1000\n").unwrap();
        fs::write(&bvecs, "0 0 0\n1 0 0\n").unwrap();
        let outdir = root.path().join("out");
        let (mock, ctx) = fsl_context();

        let subject_outdir = trac_all(
            &outdir, "Lola", &dwi, &bvals, &bvecs, &bedpostx, Some(subjects_dir.as_path()),
            &TracAllOptions::default(), &ctx,
        ).unwrap();
        assert_eq!(outdir.join("Lola"), subject_outdir);

        let config = subject_outdir.join("trac-all.dmrirc");
        let lines = mock.command_lines();
        assert_eq!(
            vec![
                vec!["trac-all".to_string(), "-prep".to_string(), "-c".to_string(), path_arg(&config)],
                vec!["trac-all".to_string(), "-path".to_string(), "-c".to_string(), path_arg(&config)],
            ],
            lines
        );
        let call = &mock.invocations()[0];
        assert_eq!("/opt/fsl", call.env["FSLDIR"]);
        assert_eq!(path_arg(&subjects_dir), call.env["SUBJECTS_DIR"]);

        let content = fs::read_to_string(&config).unwrap();
        assert!(content.contains("set subjlist = (Lola)\n"));
        assert!(content.contains("set nb0 = 1\n"));
        assert!(content.contains("set doeddy = 0\n"));
        assert!(content.contains("set dorotbvecs = 1\n"));
        assert_eq!(2, fs::read_to_string(subject_outdir.join("dmri").join("bvecs_Nx3")).unwrap().lines().count());
        assert_eq!(
            bedpostx.join("merged_th1samples.nii.gz"),
            fs::read_link(subject_outdir.join("dmri.bedpostX").join("merged_th1samples.nii.gz")).unwrap()
        );
    }

    #[test]
    fn missing_inputs_are_rejected_before_running() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("missing");
        let (mock, ctx) = fsl_context();
        let result = trac_all(
            root.path(), "Lola", &missing, &missing, &missing, &missing, Some(root.path()),
            &TracAllOptions::default(), &ctx,
        );
        match result {
            Err(FsError::InvalidArgument(msg)) => assert!(msg.starts_with("File or directory does not exist")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn pathway_stats_are_moved_and_outliers_listed() {
        let root = tempfile::tempdir().unwrap();
        let subjects_dir = root.path().join("subjects");
        fs::create_dir_all(subjects_dir.join("Lolo").join("dpath")).unwrap();
        fs::create_dir_all(subjects_dir.join("Lola").join("dpath")).unwrap();
        fs::create_dir_all(subjects_dir.join("stats")).unwrap();
        fs::write(
            subjects_dir.join("stats").join("lh.cst_AS.log"),
            "Loading\nFound outlier path: Lola/dpath/lh.cst_AS\nFound outlier path: Lola/dpath/lh.cst_AS\nDone\n",
        ).unwrap();
        let outdir = root.path().join("out");
        let (mock, ctx) = fsl_context();

        let (statdir, outlierfile) = trac_all_stats(&outdir, Some(subjects_dir.as_path()), Some(root.path()), &ctx).unwrap();
        assert_eq!(outdir.join("stats"), statdir);
        assert!(statdir.join("lh.cst_AS.log").is_file());
        assert!(!subjects_dir.join("stats").exists());
        let outliers: Vec<String> = serde_json::from_str(&fs::read_to_string(&outlierfile).unwrap()).unwrap();
        assert_eq!(vec!["Lola/dpath/lh.cst_AS".to_string()], outliers);

        let line = &mock.command_lines()[0];
        assert_eq!(vec!["trac-all", "-stat", "-c"], line[..3].to_vec());
        assert!(!Path::new(&line[3]).exists());
    }

    #[test]
    fn pathway_stats_are_moved_to_another_filesystem() {
        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let subjects_dir = root.path().join("subjects");
        fs::create_dir_all(subjects_dir.join("Lola").join("dpath")).unwrap();
        fs::create_dir_all(subjects_dir.join("stats")).unwrap();
        fs::write(subjects_dir.join("stats").join("rh.ilf_AS.log"), "Found outlier path: Lola/dpath/rh.ilf_AS\n").unwrap();
        let other = tempfile::tempdir_in(shm).unwrap();
        let outdir = other.path().join("out");
        let (_mock, ctx) = fsl_context();

        let (statdir, outlierfile) = trac_all_stats(&outdir, Some(subjects_dir.as_path()), None, &ctx).unwrap();
        assert!(statdir.join("rh.ilf_AS.log").is_file());
        assert!(!subjects_dir.join("stats").exists());
        let outliers: Vec<String> = serde_json::from_str(&fs::read_to_string(&outlierfile).unwrap()).unwrap();
        assert_eq!(vec!["Lola/dpath/rh.ilf_AS".to_string()], outliers);
    }
}
