//! File helpers: OpenCTM export of subject surfaces, and lookup of standard FreeSurfer locations.

use byteordered::ByteOrdered;
use tracing::{debug, info};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::tri_surface::TriSurface;
use crate::util::Hemisphere;

pub use crate::fs_lut::{load_look_up_table, parse_fs_lut};

const CTM_MAGIC: &[u8; 4] = b"OCTM";
const CTM_FORMAT_VERSION: i32 = 5;
const CTM_ATTRIBUTE_NAME: &str = "Color";


/// Export the white and pial surfaces of both hemispheres of a subject to OpenCTM files.
///
/// `fsdir` is the subject directory holding `surf/<hemi>.white`, `surf/<hemi>.pial` and
/// `label/<hemi>.aparc.annot`. Every vertex gets a `Color` attribute, the color of its region
/// scaled to [0, 1]. Vertices of no region get the color of the first colortable entry.
/// The files are written to `outdir/<surface file name>.ctm`.
pub fn surf2ctm<P: AsRef<Path>, Q: AsRef<Path>>(fsdir: P, outdir: Q) -> Result<BTreeMap<Hemisphere, Vec<PathBuf>>> {
    let (fsdir, outdir) = (fsdir.as_ref(), outdir.as_ref());
    let mut paths_ctm = BTreeMap::new();
    for hemi in Hemisphere::ALL.iter() {
        let path_white = fsdir.join("surf").join(format!("{}.white", hemi));
        let path_pial = fsdir.join("surf").join(format!("{}.pial", hemi));
        let path_annot = fsdir.join("label").join(format!("{}.aparc.annot", hemi));
        for path in [&path_white, &path_pial, &path_annot].iter() {
            if !path.is_file() {
                return Err(FsError::InvalidArgument(format!(
                    "'{}' FreeSurfer standard file cannot be found.", path.display())));
            }
        }

        let mut hemi_ctm = Vec::new();
        for path_surf in [&path_white, &path_pial].iter() {
            let surface = TriSurface::load(path_surf, None, Some(path_annot.as_path()))?;
            let name = path_surf.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let path_ctm = outdir.join(format!("{}.ctm", name));
            write_ctm(&path_ctm, &surface, &vertex_color_attribute(&surface)?)?;
            debug!("OpenCTM surface written: {}", path_ctm.display());
            hemi_ctm.push(path_ctm);
        }
        paths_ctm.insert(*hemi, hemi_ctm);
    }
    info!("Exported {} OpenCTM surfaces to '{}'.", 2 * paths_ctm.len(), outdir.display());
    Ok(paths_ctm)
}

/// RGBA in [0, 1] per vertex, from the region metadata of the surface.
fn vertex_color_attribute(surface: &TriSurface) -> Result<Vec<f32>> {
    let metadata = surface.metadata.as_ref().ok_or_else(|| {
        FsError::InvalidMesh("the surface has no region colors.".to_string())
    })?;
    let mut colors = Vec::with_capacity(4 * surface.labels.len());
    for label in surface.labels.iter() {
        // Unlabelled vertices (-1) are drawn with the first colortable entry.
        let label = (*label).max(0);
        let region = metadata.get(&label).ok_or_else(|| {
            FsError::InvalidMesh(format!("no region color for label {}.", label))
        })?;
        colors.extend(region.color.iter().map(|c| *c as f32 / 255.0));
    }
    Ok(colors)
}


/// Write a mesh with one RGBA attribute map in the uncompressed (RAW) OpenCTM format.
pub fn write_ctm<P: AsRef<Path>>(path: P, surface: &TriSurface, colors: &[f32]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_ctm_to(&mut file, surface, colors)?;
    file.flush()?;
    Ok(())
}

/// Write the RAW OpenCTM stream: header, then the `INDX`, `VERT` and `ATTR` chunks.
pub fn write_ctm_to<W: Write>(output: &mut W, surface: &TriSurface, colors: &[f32]) -> Result<()> {
    let mut out = ByteOrdered::le(output);
    let nvert = surface.vertices.nrows();
    if colors.len() != 4 * nvert {
        return Err(FsError::InvalidArgument(format!(
            "Expected {} color values for {} vertices, got {}.", 4 * nvert, nvert, colors.len())));
    }

    out.write_all(CTM_MAGIC)?;
    out.write_i32(CTM_FORMAT_VERSION)?;
    out.write_all(b"RAW\0")?;
    out.write_i32(nvert as i32)?;
    out.write_i32(surface.triangles.nrows() as i32)?;
    out.write_i32(0)?; // uv maps
    out.write_i32(1)?; // attribute maps
    out.write_i32(0)?; // no normals
    write_ctm_string(&mut out, "")?;

    out.write_all(b"INDX")?;
    for index in surface.triangles.iter() {
        out.write_u32(*index as u32)?;
    }
    out.write_all(b"VERT")?;
    for coord in surface.vertices.iter() {
        out.write_f32(*coord)?;
    }
    out.write_all(b"ATTR")?;
    write_ctm_string(&mut out, CTM_ATTRIBUTE_NAME)?;
    for value in colors.iter() {
        out.write_f32(*value)?;
    }
    Ok(())
}

fn write_ctm_string<W: Write>(output: &mut W, value: &str) -> Result<()> {
    let mut out = ByteOrdered::le(output);
    out.write_i32(value.len() as i32)?;
    out.write_all(value.as_bytes())?;
    Ok(())
}


/// Validate the FreeSurfer subjects directory.
///
/// The given directory must exist. Without it, `SUBJECTS_DIR` is read from the process
/// environment and must refer to an existing directory.
pub fn get_or_check_freesurfer_subjects_dir(subjects_dir: Option<&Path>) -> Result<PathBuf> {
    match subjects_dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(FsError::InvalidArgument(format!(
                    "Argument 'subjects_dir' refers to non existing directory: {}.", dir.display())));
            }
            Ok(dir.to_path_buf())
        }
        None => match std::env::var_os("SUBJECTS_DIR") {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_dir() {
                    return Err(FsError::InvalidArgument(format!(
                        "Environment variable 'SUBJECTS_DIR' refers to non existing directory: {}",
                        dir.display())));
                }
                Ok(dir)
            }
            None => Err(FsError::InvalidArgument(
                "Either set the FreeSurfer SUBJECTS_DIR environment variable or set the 'subjects_dir' argument."
                    .to_string(),
            )),
        },
    }
}


/// Path of an existing FreeSurfer look-up table.
///
/// Without an explicit table, `FreeSurferColorLUT.txt` is looked up in `freesurfer_home`, and
/// then in the `FREESURFER_HOME` of the process environment.
pub fn get_or_check_path_of_freesurfer_lut(freesurfer_lut: Option<&Path>, freesurfer_home: Option<&Path>) -> Result<PathBuf> {
    let lut = match freesurfer_lut {
        Some(lut) => lut.to_path_buf(),
        None => {
            let home = freesurfer_home
                .map(Path::to_path_buf)
                .or_else(|| std::env::var_os("FREESURFER_HOME").map(PathBuf::from))
                .ok_or_else(|| {
                    FsError::InvalidArgument(
                        "Could not find FreeSurfer Look Up Table, either set the 'freesurfer_lut' argument or the 'FREESURFER_HOME' environment variable."
                            .to_string(),
                    )
                })?;
            home.join("FreeSurferColorLUT.txt")
        }
    };
    if !lut.is_file() {
        return Err(FsError::InvalidArgument(format!("File does not exist: {}", lut.display())));
    }
    Ok(lut)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::fs_annot::{write_annot, FsAnnot, FsAnnotColortable};
    use crate::tri_surface::{cube_surface, RegionInfo};
    use byteordered::byteorder::{LittleEndian, ReadBytesExt};
    use std::io::{Cursor, Read};

    fn subject(dir: &Path) {
        std::fs::create_dir_all(dir.join("surf")).unwrap();
        std::fs::create_dir_all(dir.join("label")).unwrap();
        let cube = cube_surface(0.0, 1.0).unwrap();
        let ct = FsAnnotColortable::from_regions(&[
            ("unknown".to_string(), [0, 0, 0, 0]),
            ("insula".to_string(), [255, 0, 51, 0]),
        ]);
        let annot = FsAnnot::from_colortable_indices(&[1, 1, 1, 1, 0, 0, 0, -1], ct).unwrap();
        for hemi in ["lh", "rh"].iter() {
            cube.save(dir.join("surf").join(format!("{}.white", hemi))).unwrap();
            cube.save(dir.join("surf").join(format!("{}.pial", hemi))).unwrap();
            write_annot(dir.join("label").join(format!("{}.aparc.annot", hemi)), &annot).unwrap();
        }
    }

    #[test]
    fn both_hemispheres_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        subject(dir.path());
        let out = tempfile::tempdir().unwrap();
        let paths = surf2ctm(dir.path(), out.path()).unwrap();
        assert_eq!(vec![out.path().join("lh.white.ctm"), out.path().join("lh.pial.ctm")], paths[&Hemisphere::Lh]);
        assert_eq!(2, paths[&Hemisphere::Rh].len());

        let bytes = std::fs::read(out.path().join("rh.pial.ctm")).unwrap();
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).unwrap();
        assert_eq!(b"OCTM", &magic);
        assert_eq!(5, cursor.read_i32::<LittleEndian>().unwrap());
        let mut method = [0u8; 4];
        cursor.read_exact(&mut method).unwrap();
        assert_eq!(b"RAW\0", &method);
        assert_eq!(8, cursor.read_i32::<LittleEndian>().unwrap());
        assert_eq!(12, cursor.read_i32::<LittleEndian>().unwrap());

        // header (36 bytes), INDX (4 + 144), VERT (4 + 96), ATTR + name (4 + 4 + 5)
        let colors_at = 36 + 148 + 100 + 13;
        cursor.set_position(colors_at as u64);
        assert!((cursor.read_f32::<LittleEndian>().unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(0.0, cursor.read_f32::<LittleEndian>().unwrap());
        assert!((cursor.read_f32::<LittleEndian>().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn unlabelled_vertices_take_the_first_region_color() {
        let cube = cube_surface(0.0, 1.0).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert(0, RegionInfo { region: "unknown".to_string(), color: [51, 102, 255, 0] });
        metadata.insert(1, RegionInfo { region: "insula".to_string(), color: [255, 0, 51, 0] });
        let labels = vec![-1, 1, 1, 1, 0, 0, 0, 0];
        let surface = TriSurface::new(cube.vertices, cube.triangles, Some(labels), Some(metadata), None).unwrap();

        let colors = vertex_color_attribute(&surface).unwrap();
        assert_eq!(32, colors.len());
        assert_eq!(colors[16..20], colors[0..4]);
        assert!((colors[0] - 0.2).abs() < 1e-6);
        assert!((colors[2] - 1.0).abs() < 1e-6);
        assert!((colors[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn a_missing_standard_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        subject(dir.path());
        std::fs::remove_file(dir.path().join("label").join("rh.aparc.annot")).unwrap();
        match surf2ctm(dir.path(), dir.path()) {
            Err(FsError::InvalidArgument(msg)) => assert!(msg.ends_with("FreeSurfer standard file cannot be found.")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn an_explicit_subjects_dir_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(dir.path(), get_or_check_freesurfer_subjects_dir(Some(dir.path())).unwrap());
        assert!(get_or_check_freesurfer_subjects_dir(Some(Path::new("/no/such/subjects"))).is_err());
    }

    #[test]
    fn the_lut_is_found_in_freesurfer_home() {
        let dir = tempfile::tempdir().unwrap();
        let lut = dir.path().join("FreeSurferColorLUT.txt");
        std::fs::write(&lut, "0 Unknown 0 0 0 0\n").unwrap();
        assert_eq!(lut, get_or_check_path_of_freesurfer_lut(None, Some(dir.path())).unwrap());
        assert_eq!(lut, get_or_check_path_of_freesurfer_lut(Some(lut.as_path()), None).unwrap());
        assert!(get_or_check_path_of_freesurfer_lut(Some(dir.path().join("other.txt").as_path()), None).is_err());
    }
}
