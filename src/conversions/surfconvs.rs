//! Surface conversions: resampling on icosahedrons, native space export, mid-thickness and
//! inter-hemispheric surfaces.

use ndarray::Array3;
use tracing::{debug, info};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::fs_surface::read_surf;
use crate::nifti_io::{invert_affine, ReferenceImage};
use crate::regtools::tkregister_translation;
use crate::tri_surface::{apply_affine_on_mesh, TriSurface};
use crate::util::{
    check_dir, check_file, check_ico_order, glob_paths, path_arg, path_component_from_end, Hemisphere, SurfaceName,
};
use crate::wrapper::FsContext;

const SYMMETRIC_TEMPLATE: &str = "fsaverage_sym";


/// Resample a surface texture of a subject on the `ico` subject with `mri_surf2surf`.
///
/// The output is written in MGZ format; `.mgz` is appended to `output_surface_file` if
/// missing. Returns the output file.
pub fn mri_surf2surf<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    hemi: &str,
    input_surface_file: P,
    output_surface_file: Q,
    ico_order: i32,
    fsdir: R,
    sid: &str,
    ctx: &FsContext,
) -> Result<PathBuf> {
    check_file(&input_surface_file)?;
    check_dir(&fsdir)?;
    let hemi: Hemisphere = hemi.parse()?;
    check_ico_order(ico_order)?;

    let mut output = path_arg(&output_surface_file);
    if !output.ends_with(".mgz") {
        output.push_str(".mgz");
    }
    let cmd = vec![
        "mri_surf2surf".to_string(),
        "--hemi".to_string(), hemi.to_string(),
        "--srcsurfval".to_string(), path_arg(&input_surface_file),
        "--srcsubject".to_string(), sid.to_string(),
        "--trgsubject".to_string(), "ico".to_string(),
        "--trgicoorder".to_string(), ico_order.to_string(),
        "--trgsurfval".to_string(), output.clone(),
        "--sd".to_string(), path_arg(&fsdir),
        "--trg_type".to_string(), "mgz".to_string(),
    ];
    ctx.run(&cmd)?;
    Ok(PathBuf::from(output))
}


/// Resample the white or pial surfaces matched by `regex` under `fsdir` on icosahedrons
/// of the given orders, along with their `aparc` annotation.
///
/// The number of vertices of an icosahedron of order 0 to 7 is 12, 42, 162, 642, 2562,
/// 10242, 40962 and 163842. Surfaces are expected at `<fsdir>/<sid>/surf/<hemi>.<name>`.
/// Outputs go to `<outdir>/<sid>/<destdirname>/<hemi>.<surface>.<order>` and
/// `<hemi>.aparc.annot.<order>`; existing annotations are not resampled again.
///
/// Returns the sorted resampled surfaces and annotations.
pub fn resample_cortical_surface<P: AsRef<Path>, Q: AsRef<Path>>(
    fsdir: P,
    regex: &str,
    outdir: Q,
    destdirname: &str,
    orders: &[i32],
    surface_name: &str,
    ctx: &FsContext,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    check_dir(fsdir)?;
    check_dir(outdir)?;
    let surface_name: SurfaceName = surface_name.parse()?;
    if orders.iter().any(|o| check_ico_order(*o).is_err()) {
        return Err(FsError::InvalidArgument(format!(
            "'At least one value in {:?} is not in 0-7 range.", orders)));
    }

    let mut resamplefiles = Vec::new();
    let mut annotfiles = BTreeSet::new();
    for surf in glob_paths(fsdir.join(regex))? {
        let subject_id = path_component_from_end(&surf, 3)?;
        let hemi = path_component_from_end(&surf, 1)?
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        let convertdir = outdir.join(&subject_id).join(destdirname);
        fs::create_dir_all(&convertdir)?;

        for level in orders.iter() {
            let convertfile = convertdir.join(format!("{}.{}.{}", hemi, surface_name, level));
            let cmd = vec![
                "mri_surf2surf".to_string(),
                "--sval-xyz".to_string(), surface_name.to_string(),
                "--srcsubject".to_string(), subject_id.clone(),
                "--trgsubject".to_string(), "ico".to_string(),
                "--trgicoorder".to_string(), level.to_string(),
                "--tval".to_string(), path_arg(&convertfile),
                "--tval-xyz".to_string(),
                "--hemi".to_string(), hemi.clone(),
                "--sd".to_string(), path_arg(fsdir),
            ];
            ctx.run(&cmd)?;
            resamplefiles.push(convertfile);

            let annotfile = convertdir.join(format!("{}.aparc.annot.{}", hemi, level));
            if !annotfile.is_file() {
                let svalannot = fsdir.join(&subject_id).join("label").join(format!("{}.aparc.annot", hemi));
                let cmd = vec![
                    "mri_surf2surf".to_string(),
                    "--srcsubject".to_string(), subject_id.clone(),
                    "--trgsubject".to_string(), "ico".to_string(),
                    "--trgicoorder".to_string(), level.to_string(),
                    "--hemi".to_string(), hemi.clone(),
                    "--sval-annot".to_string(), path_arg(&svalannot),
                    "--tval".to_string(), path_arg(&annotfile),
                    "--sd".to_string(), path_arg(fsdir),
                ];
                ctx.run(&cmd)?;
            }
            annotfiles.insert(annotfile);
        }
        debug!("Resampled '{}' at orders {:?}.", surf.display(), orders);
    }
    resamplefiles.sort();
    Ok((resamplefiles, annotfiles.into_iter().collect()))
}


/// Export FreeSurfer surfaces to the index coordinates of the native T1 images.
///
/// The subject of every T1 and surface file is the path component at `sidpos` from the end
/// (3 for `<...>/<sid>/mri/t1.nii.gz`). Each surface is warped with the inverse T1 affine
/// composed with the tkregister translation of the subject's `mri/aseg.mgz`, saved as
/// `<surface>.native`, and rasterised into the binary volume `<surface>.native.nii.gz`
/// on the T1 grid. Vertices outside of the grid are set on index 0 along that axis.
///
/// Returns the native surfaces.
pub fn surf_convert<P: AsRef<Path>>(
    fsdir: P,
    t1files: &[PathBuf],
    surffiles: &[PathBuf],
    sidpos: usize,
    rm_orig: bool,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let fsdir = fsdir.as_ref();
    for path in t1files.iter().chain(surffiles.iter()) {
        check_file(path)?;
    }
    check_dir(fsdir)?;

    let mut t1map = BTreeMap::new();
    for fname in t1files.iter() {
        let subject_id = path_component_from_end(fname, sidpos)?;
        if t1map.contains_key(&subject_id) {
            return Err(FsError::InvalidArgument(format!(
                "Can't map two t1 for subject '{}'.", subject_id)));
        }
        t1map.insert(subject_id, fname);
    }

    let mut csurffiles = Vec::new();
    for fname in surffiles.iter() {
        let subject_id = path_component_from_end(fname, sidpos)?;
        let t1file = t1map.get(&subject_id).ok_or_else(|| {
            FsError::InvalidArgument(format!("No t1 file for subject '{}'.", subject_id))
        })?;
        let t1_image = ReferenceImage::from_file(t1file)?;

        let asegfile = fsdir.join(&subject_id).join("mri").join("aseg.mgz");
        let physical_to_index = invert_affine(&t1_image.affine)?;
        let translation = tkregister_translation(&asegfile, ctx)?;
        let deformation = physical_to_index.dot(&translation);

        let mesh = read_surf(fname)?.mesh;
        let surf = TriSurface::new(
            apply_affine_on_mesh(&mesh.vertices_array()?, &deformation)?,
            mesh.faces_array()?,
            None,
            None,
            None,
        )?;

        let mut outputfile = fname.clone().into_os_string();
        outputfile.push(".native");
        let outputfile = PathBuf::from(outputfile);
        surf.save(&outputfile)?;

        let mut binarizedfile = outputfile.clone().into_os_string();
        binarizedfile.push(".nii.gz");
        let overlay = surface_overlay(&surf, t1_image.shape);
        t1_image.write_u8_volume(PathBuf::from(binarizedfile), &overlay)?;

        if rm_orig {
            fs::remove_file(fname)?;
        }
        info!("Native surface of '{}': {}", subject_id, outputfile.display());
        csurffiles.push(outputfile);
    }
    Ok(csurffiles)
}

/// Binary volume marking the voxels holding a vertex.
fn surface_overlay(surf: &TriSurface, shape: (usize, usize, usize)) -> Array3<u8> {
    let mut overlay = Array3::<u8>::zeros(shape);
    let dims = [shape.0, shape.1, shape.2];
    for vertex in surf.vertices.outer_iter() {
        let mut idx = [0usize; 3];
        for k in 0..3 {
            let v = vertex[k].round();
            idx[k] = if v < 0.0 || v as usize >= dims[k] { 0 } else { v as usize };
        }
        overlay[idx] = 1;
    }
    overlay
}


/// Compute the mid-thickness gray matter surface of a hemisphere with `mris_expand`.
///
/// The white surface is expanded by half the cortical thickness into `<outdir>/<hemi>.graymid`
/// and shrunk by the same amount into `<outdir>/<hemi>.mirror.graymid`. The mid-thickness
/// surface is then linked into the subject's `surf` folder unless a link already exists.
///
/// Returns both surfaces.
pub fn midgray_surface<P: AsRef<Path>, Q: AsRef<Path>>(
    hemi: &str,
    outdir: P,
    fsdir: Q,
    sid: &str,
    ctx: &FsContext,
) -> Result<(PathBuf, PathBuf)> {
    let (outdir, fsdir) = (outdir.as_ref(), fsdir.as_ref());
    let surfdir = fsdir.join(sid).join("surf");
    let white_file = surfdir.join(format!("{}.white", hemi));
    check_file(&white_file)?;
    check_dir(outdir)?;
    check_dir(fsdir)?;
    let hemi: Hemisphere = hemi.parse()?;

    let midgray_file = outdir.join(format!("{}.graymid", hemi));
    let mirror_midgray_file = outdir.join(format!("{}.mirror.graymid", hemi));
    for (distance, target) in [("0.5", &midgray_file), ("-0.5", &mirror_midgray_file)].iter() {
        let cmd = vec![
            "mris_expand".to_string(),
            "-thickness".to_string(),
            path_arg(&white_file),
            distance.to_string(),
            path_arg(target),
        ];
        ctx.run(&cmd)?;
    }

    let link = surfdir.join(format!("{}.graymid", hemi));
    if fs::symlink_metadata(&link).is_err() {
        symlink(&midgray_file, &link)?;
    }
    Ok((midgray_file, mirror_midgray_file))
}


/// Register a subject on the left-right symmetric template and build its inter-hemispheric
/// (`xhemi`) counterpart with `surfreg` and `xhemireg`.
///
/// The content of `<fsdir>/<sid>` is linked into `<outdir>/<destname>` and `template_file`,
/// the `fsaverage_sym` subject, into `<outdir>/fsaverage_sym`; all commands run with
/// `SUBJECTS_DIR=<outdir>`.
///
/// Returns the `xhemi` subject directory and the sphere registration of the subject.
pub fn interhemi_surfreg<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    hemi: &str,
    outdir: P,
    fsdir: Q,
    sid: &str,
    template_file: R,
    destname: &str,
    ctx: &FsContext,
) -> Result<(PathBuf, PathBuf)> {
    let (outdir, fsdir, template_file) = (outdir.as_ref(), fsdir.as_ref(), template_file.as_ref());
    let hemi: Hemisphere = hemi.parse()?;
    let subjdir = fsdir.join(sid);
    check_dir(&subjdir)?;
    check_dir(outdir)?;
    check_dir(template_file)?;

    let destdir = outdir.join(destname);
    fs::create_dir_all(&destdir)?;
    let mut entries = fs::read_dir(&subjdir)?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    for name in entries.iter() {
        let destpath = destdir.join(name);
        if fs::symlink_metadata(&destpath).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
            fs::remove_file(&destpath)?;
        }
        symlink(subjdir.join(name), &destpath)?;
    }
    let template_link = outdir.join(SYMMETRIC_TEMPLATE);
    if fs::symlink_metadata(&template_link).is_err() {
        symlink(template_file, &template_link)?;
    }

    let surfreg = |xhemi: bool| -> Result<()> {
        let mut cmd = vec![
            "surfreg".to_string(),
            "--s".to_string(), destname.to_string(),
            "--t".to_string(), SYMMETRIC_TEMPLATE.to_string(),
            hemi.flag().to_string(),
        ];
        if xhemi {
            cmd.push("--xhemi".to_string());
        }
        ctx.wrapper(&cmd).subjects_dir(outdir).run()?;
        Ok(())
    };
    surfreg(false)?;
    ctx.wrapper(&["xhemireg", "--s", destname]).subjects_dir(outdir).run()?;
    surfreg(true)?;

    let xhemidir = destdir.join("xhemi");
    let spherefile = subjdir
        .join("surf")
        .join(format!("{}.{}.sphere.reg", hemi, SYMMETRIC_TEMPLATE));
    info!("Inter-hemispheric registration of '{}' done: {}", sid, xhemidir.display());
    Ok((xhemidir, spherefile))
}


/// Project a texture of one hemisphere of a registered subject on its other hemisphere,
/// through the `fsaverage_sym` registration computed by [`interhemi_surfreg`].
///
/// Returns `output_file`.
pub fn interhemi_projection<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
    hemi: &str,
    texture_file: P,
    output_file: Q,
    outdir: R,
    destname: &str,
    ctx: &FsContext,
) -> Result<PathBuf> {
    let outdir = outdir.as_ref();
    let hemi: Hemisphere = hemi.parse()?;
    check_file(&texture_file)?;
    check_dir(outdir.join(destname).join("xhemi"))?;

    let surfreg = format!("{}.sphere.reg", SYMMETRIC_TEMPLATE);
    let cmd = vec![
        "mri_surf2surf".to_string(),
        "--srcsubject".to_string(), destname.to_string(),
        "--srcsurfreg".to_string(), surfreg.clone(),
        "--trgsubject".to_string(), format!("{}/xhemi", destname),
        "--trgsurfreg".to_string(), surfreg,
        "--hemi".to_string(), hemi.to_string(),
        "--sval".to_string(), path_arg(&texture_file),
        "--tval".to_string(), path_arg(&output_file),
    ];
    ctx.wrapper(&cmd).subjects_dir(outdir).run()?;
    Ok(output_file.as_ref().to_path_buf())
}
