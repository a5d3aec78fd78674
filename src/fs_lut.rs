//! Functions for reading and writing FreeSurfer color look-up tables, like `FreeSurferColorLUT.txt`.
//!
//! Each table line is `<label> <name> <r> <g> <b> <a>`. Lines starting with `#` are comments.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{FsError, Result};


/// A look-up table as three ordered lists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FsLut {
    pub labels: Vec<i32>,
    pub names: Vec<String>,
    pub colors: Vec<[i32; 4]>,
}

impl FsLut {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Name of the region with the given label.
    pub fn name(&self, label: i32) -> Option<&str> {
        self.labels.iter().position(|l| *l == label).map(|p| self.names[p].as_str())
    }
}

impl fmt::Display for FsLut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Look-up table with {} labels.", self.len())
    }
}


/// Parse the FreeSurfer general look-up table, leniently.
///
/// Only lines made of exactly 6 tokens starting with a non-negative integer are considered.
/// Returns a map from label to region name and a map from label to RGB color.
pub fn parse_fs_lut<P: AsRef<Path>>(path: P) -> Result<(BTreeMap<i32, String>, BTreeMap<i32, [i32; 3]>)> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(FsError::InvalidArgument(format!(
            "'{}' FreeSurfer lookup table does not exists.", path.display())));
    }
    let content = fs::read_to_string(path)?;
    let parse_error = || FsError::InvalidArgument(format!("Can't parse '{}' FreeSurfer lookup table file.", path.display()));

    let mut names = BTreeMap::new();
    let mut colors = BTreeMap::new();
    for line in content.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() == 6 && tokens[0].chars().all(|c| c.is_ascii_digit()) {
            let label: i32 = tokens[0].parse().map_err(|_| parse_error())?;
            let mut rgb = [0i32; 3];
            for (idx, token) in tokens[2..5].iter().enumerate() {
                rgb[idx] = token.parse().map_err(|_| parse_error())?;
            }
            names.insert(label, tokens[1].to_string());
            colors.insert(label, rgb);
        }
    }
    Ok((names, colors))
}


/// Load a look-up table strictly: every non-comment line must be a valid 6 column entry.
///
/// # Examples
///
/// ```no_run
/// let lut = fswrap::load_look_up_table("/usr/local/freesurfer/FreeSurferColorLUT.txt").unwrap();
/// println!("{:?}", lut.name(17));
/// ```
pub fn load_look_up_table<P: AsRef<Path>>(path: P) -> Result<FsLut> {
    let path = path.as_ref();
    let load_error = || FsError::InvalidArgument(format!("Failed to load the Look Up Table: {}", path.display()));
    let content = fs::read_to_string(path).map_err(|_| load_error())?;

    let mut lut = FsLut::default();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 6 {
            return Err(load_error());
        }
        lut.labels.push(tokens[0].parse().map_err(|_| load_error())?);
        lut.names.push(tokens[1].to_string());
        let mut rgba = [0i32; 4];
        for (idx, token) in tokens[2..].iter().enumerate() {
            rgba[idx] = token.parse().map_err(|_| load_error())?;
        }
        lut.colors.push(rgba);
    }
    Ok(lut)
}


/// Write a look-up table in which cortical labels (`>= 1000`) are transparent.
///
/// Used to overlay the cortical parcellation on slices without hiding the anatomy of the
/// subcortical structures.
pub fn write_cortical_overlay_lut<P: AsRef<Path>>(
    path: P,
    names: &BTreeMap<i32, String>,
    colors: &BTreeMap<i32, [i32; 3]>,
) -> Result<()> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    for (label, name) in names.iter() {
        let rgb = colors.get(label).copied().unwrap_or([0, 0, 0]);
        let a = if *label >= 1000 { 0 } else { 255 };
        writeln!(
            file,
            "{:<10}{:<50}{:<4}{:<4}{:<4}{:<4}",
            label, name, rgb[0], rgb[1], rgb[2], a
        )?;
    }
    file.flush()?;
    Ok(())
}
