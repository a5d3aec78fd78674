//! Utility functions used in all other fswrap modules: input validation and binary string helpers.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FsError, Result};

use byteordered::byteorder::ReadBytesExt;
use tracing::debug;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}


/// Read bytes from the input until the given terminator sequence has been consumed. The terminator is not part of the returned String.
pub fn read_string_until<S>(input: &mut S, terminator: &[u8]) -> Result<String>
where
    S: Read,
{
    let mut bytes: Vec<u8> = Vec::new();
    while !bytes.ends_with(terminator) {
        bytes.push(input.read_u8()?);
    }
    bytes.truncate(bytes.len() - terminator.len());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}


/// Read a fixed length zero-terminated byte string of the given length from the input. Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S>(input: &mut S, len: usize) -> Result<String>
where
    S: Read,
{
    let mut info_line = String::with_capacity(len);
    for _  in 0..len   {
        let cur_char = input.read_u8()? as char;
        if cur_char != '\0'  {
            info_line.push(cur_char);
        }
    }
    Ok(info_line)
}


/// Fail with [`FsError::InvalidArgument`] unless the path is an existing regular file.
pub fn check_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.is_file() {
        Ok(())
    } else {
        Err(FsError::InvalidArgument(format!("'{}' is not a valid file.", path.display())))
    }
}


/// Fail with [`FsError::InvalidArgument`] unless the path is an existing directory.
pub fn check_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        Ok(())
    } else {
        Err(FsError::InvalidArgument(format!("'{}' is not a valid directory.", path.display())))
    }
}


/// Icosahedron orders supported by the FreeSurfer `ico` subject.
pub fn check_ico_order(order: i32) -> Result<()> {
    if !(0..=7).contains(&order) {
        Err(FsError::InvalidArgument(format!("'Ico order '{}' is not in 0-7 range.", order)))
    } else {
        Ok(())
    }
}


/// A brain hemisphere, named like FreeSurfer names it in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hemisphere {
    Lh,
    Rh,
}

impl Hemisphere {
    pub const ALL: [Hemisphere; 2] = [Hemisphere::Lh, Hemisphere::Rh];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hemisphere::Lh => "lh",
            Hemisphere::Rh => "rh",
        }
    }

    /// The flag used by `surfreg` to select this hemisphere.
    pub fn flag(&self) -> &'static str {
        match self {
            Hemisphere::Lh => "--lh",
            Hemisphere::Rh => "--rh",
        }
    }
}

impl FromStr for Hemisphere {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lh" => Ok(Hemisphere::Lh),
            "rh" => Ok(Hemisphere::Rh),
            _ => Err(FsError::InvalidArgument(format!(
                "'{}' is not a valid hemisphere value which must be in ['lh', 'rh']", s))),
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


/// The cortical surfaces that can be used for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceName {
    White,
    Pial,
}

impl SurfaceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceName::White => "white",
            SurfaceName::Pial => "pial",
        }
    }
}

impl FromStr for SurfaceName {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "white" => Ok(SurfaceName::White),
            "pial" => Ok(SurfaceName::Pial),
            _ => Err(FsError::InvalidArgument(format!(
                "'{}' is not a valid surface value which must be in ['white', 'pial']", s))),
        }
    }
}

impl fmt::Display for SurfaceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


/// Resampling methods understood by `mri_convert --resample_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Interpolate,
    Weighted,
    Nearest,
    Cubic,
}

impl Interpolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interpolation::Interpolate => "interpolate",
            Interpolation::Weighted => "weighted",
            Interpolation::Nearest => "nearest",
            Interpolation::Cubic => "cubic",
        }
    }
}

impl FromStr for Interpolation {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interpolate" => Ok(Interpolation::Interpolate),
            "weighted" => Ok(Interpolation::Weighted),
            "nearest" => Ok(Interpolation::Nearest),
            "cubic" => Ok(Interpolation::Cubic),
            _ => Err(FsError::InvalidArgument(format!("'{}' is not a valid interpolation method.", s))),
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}


/// Render a path as an owned String argument for an external command.
pub fn path_arg<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().into_owned()
}


/// Paths matching a glob pattern, sorted.
pub fn glob_paths<P: AsRef<Path>>(pattern: P) -> Result<Vec<PathBuf>> {
    let mut paths = glob::glob(&pattern.as_ref().to_string_lossy())?
        .collect::<std::result::Result<Vec<PathBuf>, glob::GlobError>>()?;
    paths.sort();
    Ok(paths)
}


/// The path component at position `pos` counted from the end, with `pos = 1` being the file name.
///
/// FreeSurfer derives subject identifiers from the subject directory layout, e.g.
/// `<fsdir>/<sid>/surf/lh.white` has its subject at position 3.
pub fn path_component_from_end<P: AsRef<Path>>(path: P, pos: usize) -> Result<String> {
    let path = path.as_ref();
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if pos == 0 || pos > components.len() {
        return Err(FsError::InvalidArgument(format!(
            "Can't extract component {} from the end of '{}'.", pos, path.display())));
    }
    Ok(components[components.len() - pos].clone())
}


/// `rename(2)` error code when source and destination are on different filesystems.
const EXDEV: i32 = 18;

/// Move a directory to `dst`, which must not exist.
///
/// A plain rename is tried first. Across filesystems the tree is copied, then the source is
/// removed.
pub fn move_dir<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(EXDEV) => {
            debug!("'{}' and '{}' are on different filesystems, copying.", src.display(), dst.display());
            copy_dir_all(src, dst)?;
            fs::remove_dir_all(src)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Recursively copy a directory.
pub fn copy_dir_all<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_all(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}
