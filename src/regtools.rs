//! Registration helpers between FreeSurfer's conformed space and the native anatomical space.

use ndarray::Array2;
use tracing::info;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::util::{check_dir, glob_paths, path_arg, path_component_from_end};
use crate::wrapper::FsContext;


/// Create, for every subject `mri` folder matched by `regex` under `fsdir`, the registration
/// matrix between the conformed space (`orig.mgz`) and the native anatomical space
/// (`rawavg.mgz`) with `tkregister2`.
///
/// Each matrix is written to `<outdir>/<sid>/convert/register.native.dat`. Returns the
/// matrix files.
pub fn conformed_to_native_space<P: AsRef<Path>, Q: AsRef<Path>>(
    fsdir: P,
    regex: &str,
    outdir: Q,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;

    let mut trffiles = Vec::new();
    for path_mri in glob_paths(fsdir.join(regex))? {
        let subject_id = path_component_from_end(&path_mri, 2)?;
        let convertdir = outdir.join(&subject_id).join("convert");
        fs::create_dir_all(&convertdir)?;

        let rawfile = path_mri.join("rawavg.mgz");
        let origfile = path_mri.join("orig.mgz");
        for path in [&rawfile, &origfile].iter() {
            if !path.is_file() {
                return Err(FsError::InvalidArgument(format!(
                    "In folder '{}' can't find file '{}'.", path_mri.display(), path.display())));
            }
        }

        let trffile = convertdir.join("register.native.dat");
        let cmd = vec![
            "tkregister2".to_string(),
            "--mov".to_string(), path_arg(&rawfile),
            "--targ".to_string(), path_arg(&origfile),
            "--reg".to_string(), path_arg(&trffile),
            "--noedit".to_string(),
            "--regheader".to_string(),
        ];
        ctx.run(&cmd)?;
        info!("Conformed to native registration of '{}': {}", subject_id, trffile.display());
        trffiles.push(trffile);
    }
    Ok(trffiles)
}


/// Translation between FreeSurfer's scanner RAS space and its tkregister RAS space.
///
/// Both voxel-to-RAS matrices of `mgzfile` are read from `mri_info`, and the translation is
/// `I + (vox2ras - vox2ras_tkr)`.
pub fn tkregister_translation<P: AsRef<Path>>(mgzfile: P, ctx: &FsContext) -> Result<Array2<f64>> {
    let mgzfile = mgzfile.as_ref();
    if !mgzfile.is_file() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a valid '.mgz' file.", mgzfile.display())));
    }

    let tkr = vox2ras(mgzfile, "--vox2ras-tkr", ctx)?;
    let scanner = vox2ras(mgzfile, "--vox2ras", ctx)?;
    Ok(Array2::<f64>::eye(4) + &(scanner - &tkr))
}

fn vox2ras(mgzfile: &Path, flag: &str, ctx: &FsContext) -> Result<Array2<f64>> {
    let output = ctx.run(&["mri_info", flag, path_arg(mgzfile).as_str()])?;
    parse_affine(&output.stdout)
}

/// Parse a 4x4 matrix printed as 4 lines of whitespace-separated numbers.
pub fn parse_affine(text: &str) -> Result<Array2<f64>> {
    let values = text
        .split_whitespace()
        .map(|token| token.parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .map_err(|_| FsError::InvalidArgument(format!("Can't parse an affine matrix from '{}'.", text.trim())))?;
    if values.len() != 16 {
        return Err(FsError::InvalidArgument(format!(
            "Expected 16 affine matrix values, got {}.", values.len())));
    }
    Ok(Array2::from_shape_vec((4, 4), values)?)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::mock_context;
    use approx::assert_abs_diff_eq;

    const TKR: &str = "-1.00000    0.00000    0.00000   128.00000\n \
                        0.00000    0.00000    1.00000  -128.00000\n \
                        0.00000   -1.00000    0.00000   128.00000\n \
                        0.00000    0.00000    0.00000     1.00000\n";
    const SCANNER: &str = "-1.00000    0.00000    0.00000   130.50000\n \
                            0.00000    0.00000    1.00000  -110.00000\n \
                            0.00000   -1.00000    0.00000   140.25000\n \
                            0.00000    0.00000    0.00000     1.00000\n";

    #[test]
    fn a_missing_mgz_file_is_rejected_before_running() {
        let (mock, ctx) = mock_context();
        assert!(tkregister_translation("/no/such/aseg.mgz", &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn the_translation_is_the_difference_of_the_vox2ras_matrices() {
        let dir = tempfile::tempdir().unwrap();
        let mgz = dir.path().join("aseg.mgz");
        fs::write(&mgz, b"").unwrap();
        let (mock, ctx) = mock_context();
        mock.push_output(0, TKR, "");
        mock.push_output(0, SCANNER, "");

        let translation = tkregister_translation(&mgz, &ctx).unwrap();
        let lines = mock.command_lines();
        assert_eq!(2, lines.len());
        assert_eq!("--vox2ras-tkr", lines[0][1]);
        assert_eq!("--vox2ras", lines[1][1]);
        assert_abs_diff_eq!(2.5, translation[[0, 3]]);
        assert_abs_diff_eq!(18.0, translation[[1, 3]]);
        assert_abs_diff_eq!(12.25, translation[[2, 3]]);
        assert_abs_diff_eq!(1.0, translation[[1, 1]]);
        assert_abs_diff_eq!(1.0, translation[[3, 3]]);
    }

    #[test]
    fn malformed_matrices_are_rejected() {
        assert!(parse_affine("1 2 3").is_err());
        assert!(parse_affine("a b c d").is_err());
    }

    #[test]
    fn a_registration_is_computed_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let mri = dir.path().join("fs").join("s1").join("mri");
        fs::create_dir_all(&mri).unwrap();
        fs::write(mri.join("rawavg.mgz"), b"").unwrap();
        fs::write(mri.join("orig.mgz"), b"").unwrap();
        let outdir = dir.path().join("out");
        fs::create_dir_all(&outdir).unwrap();
        let (mock, ctx) = mock_context();

        let trffiles = conformed_to_native_space(dir.path().join("fs"), "*/mri", &outdir, &ctx).unwrap();
        let trffile = outdir.join("s1").join("convert").join("register.native.dat");
        assert_eq!(vec![trffile.clone()], trffiles);
        assert!(outdir.join("s1").join("convert").is_dir());
        assert_eq!(
            vec![vec![
                "tkregister2".to_string(),
                "--mov".to_string(), path_arg(mri.join("rawavg.mgz")),
                "--targ".to_string(), path_arg(mri.join("orig.mgz")),
                "--reg".to_string(), path_arg(&trffile),
                "--noedit".to_string(),
                "--regheader".to_string(),
            ]],
            mock.command_lines()
        );
    }

    #[test]
    fn a_subject_without_rawavg_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mri = dir.path().join("s1").join("mri");
        fs::create_dir_all(&mri).unwrap();
        fs::write(mri.join("orig.mgz"), b"").unwrap();
        let (mock, ctx) = mock_context();
        assert!(conformed_to_native_space(dir.path(), "*/mri", dir.path(), &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }
}
