//! Slices of a subject anatomy rendered by `tkmedit`, then converted to PNG with ImageMagick.

use tracing::{debug, info};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FsError, Result};
use crate::fs_lut::{parse_fs_lut, write_cortical_overlay_lut};
use crate::util::{check_dir, glob_paths, path_arg};
use crate::wrapper::FsContext;

const EDGES_SCRIPT: &str = "\
SetOrientation %ORIENT%
SetZoomLevel 1
LoadMainSurface 0 lh.white
LoadPialSurface 0 lh.pial
LoadMainSurface 1 rh.white
LoadPialSurface 1 rh.pial
SetDisplayFlag 5 1
for { set slice %START% } { $slice <= %END% } { incr slice %INCR% } {
    SetSlice $slice
    RedrawScreen
    SaveRGB %RGBFILE%
}
QuitMedit
";

const LABELS_SCRIPT: &str = "\
SetOrientation %ORIENT%
SetZoomLevel 1
LoadSegmentationVolume 0 aparc+aseg.mgz %LOOKUPTABLE%
SetSegmentationAlpha 0.4
SetDisplayFlag 22 1
for { set slice %START% } { $slice <= %END% } { incr slice %INCR% } {
    SetSlice $slice
    RedrawScreen
    SaveRGB %RGBFILE%
}
QuitMedit
";


/// What is overlaid on the anatomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// Pial and white surface edges.
    Edges,
    /// Cortical labels, subcortical structures hidden.
    Aparc,
    /// Subcortical structures.
    Aseg,
}

impl FromStr for SliceType {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "edges" => Ok(SliceType::Edges),
            "aparc" => Ok(SliceType::Aparc),
            "aseg" => Ok(SliceType::Aseg),
            _ => Err(FsError::InvalidArgument(format!(
                "Unrecognize slicing type '{}'. Implemented options are ['edges', 'aparc', 'aseg'].", s))),
        }
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SliceType::Edges => "edges",
            SliceType::Aparc => "aparc",
            SliceType::Aseg => "aseg",
        };
        write!(f, "{}", name)
    }
}


/// Slicing axis, `C`, `A` or `S` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutAxis {
    Coronal,
    Axial,
    Sagittal,
}

impl CutAxis {
    pub const ALL: [CutAxis; 3] = [CutAxis::Coronal, CutAxis::Axial, CutAxis::Sagittal];

    /// `tkmedit` orientation index.
    pub fn orientation(&self) -> u8 {
        match self {
            CutAxis::Coronal => 0,
            CutAxis::Axial => 1,
            CutAxis::Sagittal => 2,
        }
    }

    pub fn letter(&self) -> &'static str {
        match self {
            CutAxis::Coronal => "C",
            CutAxis::Axial => "A",
            CutAxis::Sagittal => "S",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CutAxis::Coronal => "coronal",
            CutAxis::Axial => "axial",
            CutAxis::Sagittal => "sagittal",
        }
    }
}

impl FromStr for CutAxis {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "C" => Ok(CutAxis::Coronal),
            "A" => Ok(CutAxis::Axial),
            "S" => Ok(CutAxis::Sagittal),
            _ => Err(FsError::InvalidArgument(format!(
                "'{}' axis is not recognized: use ['C', 'A', 'S'].", s))),
        }
    }
}

impl fmt::Display for CutAxis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}


/// Slice the `nu.mgz` anatomy of a subject, with the surfaces or the labels overlaid.
///
/// `slice_interval` is `(start, stop, increment)`, stop included. The `aparc` and `aseg` slicers
/// need a look-up table; for `aparc` a copy with transparent subcortical labels is written to
/// `outdir/CustomFreeSurferColorLUT.txt`. The tcl script is written to
/// `outdir/tkmedit_slicer_<axis>.tcl` and the slices to `outdir/slice-<axis>-<index>.png`.
///
/// Returns the PNG slices, sorted.
#[allow(clippy::too_many_arguments)]
pub fn tkmedit_slice<P: AsRef<Path>, Q: AsRef<Path>>(
    fsdir: P,
    sid: &str,
    outdir: Q,
    stype: &str,
    cut_axis: &str,
    slice_interval: (i32, i32, i32),
    path_lut: Option<&Path>,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    let stype: SliceType = stype.parse()?;
    let path_lut = match (stype, path_lut) {
        (SliceType::Edges, _) => None,
        (_, None) => {
            return Err(FsError::InvalidArgument(format!(
                "Need to specify the 'path_lut' parameter when the slicing is set to '{}'.", stype)));
        }
        (_, Some(lut)) if !lut.is_file() => {
            return Err(FsError::InvalidArgument(format!(
                "'{}' lookup table path does not exists.", lut.display())));
        }
        (_, Some(lut)) => Some(lut.to_path_buf()),
    };
    let cut_axis: CutAxis = cut_axis.parse()?;
    let subjdir = fsdir.join(sid);
    if !subjdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a valid FreeSurfer subject directory.", subjdir.display())));
    }
    if !outdir.is_dir() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is not a valid destination directory.", outdir.display())));
    }
    let anat_file = subjdir.join("mri").join("nu.mgz");
    if !anat_file.is_file() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' FreeSurfer anatomical file is missing.", anat_file.display())));
    }

    let path_lut = match (stype, path_lut) {
        (SliceType::Aparc, Some(lut)) => {
            let (names, colors) = parse_fs_lut(&lut)?;
            let custom_lut = outdir.join("CustomFreeSurferColorLUT.txt");
            write_cortical_overlay_lut(&custom_lut, &names, &colors)?;
            Some(custom_lut)
        }
        (_, lut) => lut,
    };

    let rgb_file = outdir.join(format!("slice-{}-$slice.rgb", cut_axis));
    let template = match stype {
        SliceType::Edges => EDGES_SCRIPT,
        SliceType::Aparc | SliceType::Aseg => LABELS_SCRIPT,
    };
    let mut script = template
        .replace("%ORIENT%", &cut_axis.orientation().to_string())
        .replace("%START%", &slice_interval.0.to_string())
        .replace("%END%", &slice_interval.1.to_string())
        .replace("%INCR%", &slice_interval.2.to_string())
        .replace("%RGBFILE%", &path_arg(&rgb_file));
    if let Some(lut) = &path_lut {
        script = script.replace("%LOOKUPTABLE%", &path_arg(lut));
    }
    let path_script = outdir.join(format!("tkmedit_slicer_{}.tcl", cut_axis));
    fs::write(&path_script, script)?;
    debug!("tkmedit script written: {}", path_script.display());

    ctx.wrapper(&["tkmedit", sid, "nu.mgz", "-tcl", path_arg(&path_script).as_str()])
        .subjects_dir(fsdir)
        .run()?;

    let mut slices = Vec::new();
    for path in glob_paths(outdir.join(format!("slice-{}-*.rgb", cut_axis)))? {
        let png_file = path.with_extension("png");
        ctx.run(&["convert", path_arg(&path).as_str(), path_arg(&png_file).as_str()])?;
        fs::remove_file(&path)?;
        slices.push(png_file);
    }
    info!("{} {} slices of '{}' in '{}'.", slices.len(), cut_axis.name(), sid, outdir.display());
    Ok(slices)
}


/// Slice the anatomy of a subject with its cortical parcellation overlaid, colored with the
/// `FreeSurferColorLUT.txt` of the configured installation.
///
/// With `erase`, the PNG slices of this axis already in `outdir` are removed first.
pub fn slice_aparc_overlay<P: AsRef<Path>, Q: AsRef<Path>>(
    fsdir: P,
    sid: &str,
    outdir: Q,
    cut_axis: &str,
    slice_interval: (i32, i32, i32),
    erase: bool,
    ctx: &FsContext,
) -> Result<Vec<PathBuf>> {
    let outdir = outdir.as_ref();
    check_dir(outdir)?;
    let axis: CutAxis = cut_axis.parse()?;
    let lut = ctx
        .freesurfer_home()
        .map(|home| home.join("FreeSurferColorLUT.txt"))
        .ok_or_else(|| FsError::InvalidArgument("FREESURFER_HOME is not configured.".to_string()))?;
    if erase {
        for png in glob_paths(outdir.join(format!("slice-{}-*.png", axis)))? {
            fs::remove_file(png)?;
        }
    }
    tkmedit_slice(fsdir, sid, outdir, "aparc", cut_axis, slice_interval, Some(lut.as_path()), ctx)
}
