//! Volume conversions: label map binarization, MGZ to NIfTI export, volume to surface sampling.

use tracing::{debug, info};

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::util::{check_dir, check_file, check_ico_order, glob_paths, path_arg, Hemisphere, Interpolation, SurfaceName};
use crate::wrapper::FsContext;


/// Options of `mri_binarize`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinarizeOptions {
    /// Match these label values instead of thresholding.
    pub match_labels: Option<Vec<i32>>,
    /// Match the cerebral white matter labels (2 and 41).
    pub wm: bool,
    /// Match the ventricle labels.
    pub ventricles: bool,
    /// Invert the result.
    pub inv: bool,
}

/// Binarize a FreeSurfer label map with `mri_binarize`.
pub fn mri_binarize<P: AsRef<Path>, Q: AsRef<Path>>(
    inputfile: P,
    outputfile: Q,
    options: &BinarizeOptions,
    ctx: &FsContext,
) -> Result<()> {
    check_file(&inputfile)?;
    let mut cmd = vec![
        "mri_binarize".to_string(),
        "--i".to_string(), path_arg(&inputfile),
        "--o".to_string(), path_arg(&outputfile),
    ];
    if let Some(labels) = &options.match_labels {
        cmd.push("--match".to_string());
        cmd.extend(labels.iter().map(|l| l.to_string()));
    }
    if options.wm {
        cmd.push("--wm".to_string());
    }
    if options.ventricles {
        cmd.push("--ventricles".to_string());
    }
    if options.inv {
        cmd.push("--inv".to_string());
    }
    ctx.run(&cmd)?;
    Ok(())
}


/// Export the FreeSurfer images matched by `regex` under `fsdir` to NIfTI with `mri_convert`.
///
/// The subject of each image is the first path component below `fsdir`. Images are written
/// to `<outdir>/<subject>/<destdirname>/<name>.nii.gz`, or directly to `outdir` without a
/// `destdirname`. With `reslice`, images are resliced like the subject's `mri/rawavg.mgz`,
/// i.e. converted to the native space, and get a `.native` suffix.
///
/// Returns the converted files.
pub fn mri_convert<P: AsRef<Path>, Q: AsRef<Path>>(
    fsdir: P,
    regex: &str,
    outdir: Q,
    destdirname: Option<&str>,
    reslice: bool,
    interpolation: &str,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;
    let interpolation: Interpolation = interpolation.parse()?;

    let mut niftifiles = Vec::new();
    for input_file in glob_paths(fsdir.join(regex))? {
        let subject = input_file
            .strip_prefix(fsdir)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .ok_or_else(|| FsError::InvalidArgument(format!(
                "Can't find the subject of '{}'.", input_file.display())))?;
        let subjoutdir = match destdirname {
            Some(name) => outdir.join(&subject).join(name),
            None => outdir.to_path_buf(),
        };
        fs::create_dir_all(&subjoutdir)?;

        let mut basename = input_file
            .file_name()
            .map(|n| n.to_string_lossy().replace(".mgz", ""))
            .unwrap_or_default();
        let mut cmd = vec![
            "mri_convert".to_string(),
            "--resample_type".to_string(),
            interpolation.as_str().to_string(),
        ];
        if reslice {
            let reference_file = fsdir.join(&subject).join("mri").join("rawavg.mgz");
            if !reference_file.is_file() {
                return Err(FsError::InvalidArgument(format!(
                    "'{}' does not exists, can't reslice image '{}'.",
                    reference_file.display(), input_file.display())));
            }
            cmd.push("--reslice_like".to_string());
            cmd.push(path_arg(&reference_file));
            basename.push_str(".native");
        }
        let converted_file = subjoutdir.join(format!("{}.nii.gz", basename));
        cmd.push(path_arg(&input_file));
        cmd.push(path_arg(&converted_file));
        ctx.run(&cmd)?;
        debug!("Converted '{}' to '{}'.", input_file.display(), converted_file.display());
        niftifiles.push(converted_file);
    }
    info!("{} images converted to NIfTI.", niftifiles.len());
    Ok(niftifiles)
}


/// Sample a volume on the `ico` subject surface of the given order with `mri_vol2surf`.
///
/// `dat_file` is the structural to FreeSurfer space registration computed by `tkregister2`.
/// The texture is written in MGZ format.
#[allow(clippy::too_many_arguments)]
pub fn mri_vol2surf<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>, S: AsRef<Path>>(
    hemi: &str,
    volume_file: P,
    out_texture_file: Q,
    ico_order: i32,
    dat_file: R,
    fsdir: S,
    sid: &str,
    surface_name: &str,
    ctx: &FsContext,
) -> Result<()> {
    check_file(&volume_file)?;
    check_file(&dat_file)?;
    check_dir(&fsdir)?;
    let hemi: Hemisphere = hemi.parse()?;
    let surface_name: SurfaceName = surface_name.parse()?;
    check_ico_order(ico_order)?;

    let cmd = vec![
        "mri_vol2surf".to_string(),
        "--src".to_string(), path_arg(&volume_file),
        "--out".to_string(), path_arg(&out_texture_file),
        "--srcreg".to_string(), path_arg(&dat_file),
        "--hemi".to_string(), hemi.to_string(),
        "--trgsubject".to_string(), "ico".to_string(),
        "--icoorder".to_string(), ico_order.to_string(),
        "--surf".to_string(), surface_name.to_string(),
        "--sd".to_string(), path_arg(&fsdir),
        "--srcsubject".to_string(), sid.to_string(),
        "--noreshape".to_string(),
        "--out_type".to_string(), "mgz".to_string(),
    ];
    ctx.run(&cmd)?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::mock_context;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn binarize_options_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let aseg = dir.path().join("aseg.mgz");
        touch(&aseg);
        let (mock, ctx) = mock_context();
        let options = BinarizeOptions { match_labels: Some(vec![17, 53]), wm: true, ventricles: false, inv: true };
        mri_binarize(&aseg, dir.path().join("mask.mgz"), &options, &ctx).unwrap();
        let line = &mock.command_lines()[0];
        assert_eq!(
            &vec![
                "mri_binarize".to_string(),
                "--i".to_string(), path_arg(&aseg),
                "--o".to_string(), path_arg(dir.path().join("mask.mgz")),
                "--match".to_string(), "17".to_string(), "53".to_string(),
                "--wm".to_string(),
                "--inv".to_string(),
            ],
            line
        );
    }

    #[test]
    fn binarize_needs_an_existing_input() {
        let (mock, ctx) = mock_context();
        assert!(mri_binarize("/no/such/aseg.mgz", "/tmp/mask.mgz", &BinarizeOptions::default(), &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn images_are_converted_in_native_space() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        touch(&fsdir.path().join("s1").join("mri").join("aseg.mgz"));
        touch(&fsdir.path().join("s1").join("mri").join("rawavg.mgz"));
        let (mock, ctx) = mock_context();

        let files = mri_convert(fsdir.path(), "*/mri/aseg.mgz", outdir.path(), Some("convert"), true, "nearest", &ctx).unwrap();
        let expected = outdir.path().join("s1").join("convert").join("aseg.native.nii.gz");
        assert_eq!(vec![expected.clone()], files);
        assert!(outdir.path().join("s1").join("convert").is_dir());
        assert_eq!(
            vec![vec![
                "mri_convert".to_string(),
                "--resample_type".to_string(), "nearest".to_string(),
                "--reslice_like".to_string(), path_arg(fsdir.path().join("s1").join("mri").join("rawavg.mgz")),
                path_arg(fsdir.path().join("s1").join("mri").join("aseg.mgz")),
                path_arg(&expected),
            ]],
            mock.command_lines()
        );
    }

    #[test]
    fn images_are_converted_without_reslicing() {
        let fsdir = tempfile::tempdir().unwrap();
        let outdir = tempfile::tempdir().unwrap();
        touch(&fsdir.path().join("s1").join("mri").join("orig.mgz"));
        let (mock, ctx) = mock_context();
        let files = mri_convert(fsdir.path(), "*/mri/orig.mgz", outdir.path(), None, false, "interpolate", &ctx).unwrap();
        assert_eq!(vec![outdir.path().join("orig.nii.gz")], files);
        assert_eq!(5, mock.command_lines()[0].len());
    }

    #[test]
    fn reslicing_without_rawavg_fails() {
        let fsdir = tempfile::tempdir().unwrap();
        touch(&fsdir.path().join("s1").join("mri").join("aseg.mgz"));
        let (mock, ctx) = mock_context();
        assert!(mri_convert(fsdir.path(), "*/mri/aseg.mgz", fsdir.path(), Some("convert"), true, "nearest", &ctx).is_err());
        assert!(mri_convert(fsdir.path(), "*/mri/aseg.mgz", fsdir.path(), None, false, "linear", &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }

    #[test]
    fn volumes_are_sampled_on_the_ico_surface() {
        let dir = tempfile::tempdir().unwrap();
        let volume = dir.path().join("fa.nii.gz");
        let dat = dir.path().join("register.dat");
        touch(&volume);
        touch(&dat);
        let (mock, ctx) = mock_context();
        let out = dir.path().join("lh.fa.mgz");
        mri_vol2surf("lh", &volume, &out, 7, &dat, dir.path(), "s1", "white", &ctx).unwrap();
        let line = &mock.command_lines()[0];
        assert_eq!("mri_vol2surf", line[0]);
        assert_eq!(
            &["--hemi".to_string(), "lh".to_string(), "--trgsubject".to_string(), "ico".to_string(),
              "--icoorder".to_string(), "7".to_string(), "--surf".to_string(), "white".to_string()],
            &line[7..15]
        );
        assert_eq!(&["--noreshape".to_string(), "--out_type".to_string(), "mgz".to_string()], &line[19..]);
    }

    #[test]
    fn invalid_sampling_arguments_spawn_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let volume = dir.path().join("fa.nii.gz");
        touch(&volume);
        let (mock, ctx) = mock_context();
        let out = dir.path().join("out.mgz");
        assert!(mri_vol2surf("xh", &volume, &out, 7, &volume, dir.path(), "s1", "white", &ctx).is_err());
        assert!(mri_vol2surf("lh", &volume, &out, 8, &volume, dir.path(), "s1", "white", &ctx).is_err());
        assert!(mri_vol2surf("lh", &volume, &out, -1, &volume, dir.path(), "s1", "white", &ctx).is_err());
        assert!(mri_vol2surf("lh", &volume, &out, 5, &volume, dir.path(), "s1", "inflated", &ctx).is_err());
        assert!(mock.invocations().is_empty());
    }
}
