//! Functions for managing FreeSurfer brain surface parcellations in annot files.
//!
//! These files assign each vertex of a brain surface mesh to exactly one brain region
//! or label. A so-called colortable contains data on the regions, including the region's
//! name, an RGBA display color, and a label derived from that color.

use byteordered::ByteOrdered;

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{FsError, Result};
use crate::traits::VertexColor;
use crate::util::read_fixed_length_string;

/// The annot format version written and understood by this module.
const ANNOT_CTAB_VERSION: i32 = -2;


/// Compute the label of a colortable entry from its color, `r + g*2^8 + b*2^16 + a*2^24`.
pub fn color_label(r: i32, g: i32, b: i32, a: i32) -> i32 {
    r | (g << 8) | (b << 16) | (a << 24)
}


/// One entry per brain region, stored as parallel vectors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FsAnnotColortable {
    pub id: Vec<i32>,
    pub name: Vec<String>,
    pub r: Vec<i32>,
    pub g: Vec<i32>,
    pub b: Vec<i32>,
    pub a: Vec<i32>,
    /// Computed from r,g,b,a. Used in `FsAnnot::vertex_labels` to identify the region.
    pub label: Vec<i32>,
}

impl FsAnnotColortable {

    /// Build a colortable from region names and RGBA colors. Region ids are assigned in order.
    pub fn from_regions(regions: &[(String, [i32; 4])]) -> FsAnnotColortable {
        let mut ct = FsAnnotColortable::default();
        for (idx, (name, color)) in regions.iter().enumerate() {
            ct.id.push(idx as i32);
            ct.name.push(name.clone());
            ct.r.push(color[0]);
            ct.g.push(color[1]);
            ct.b.push(color[2]);
            ct.a.push(color[3]);
            ct.label.push(color_label(color[0], color[1], color[2], color[3]));
        }
        ct
    }

    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    /// The RGBA color of the entry at `idx`.
    pub fn color(&self, idx: usize) -> [i32; 4] {
        [self.r[idx], self.g[idx], self.b[idx], self.a[idx]]
    }

    /// Read a colortable in format version 2 from a reader. The reader must be right after the entry count.
    pub fn from_reader<S>(input: &mut S) -> Result<FsAnnotColortable>
    where
        S: Read,
    {
        let mut input = ByteOrdered::be(input);

        let num_chars_orig_filename: i32 = input.read_i32()?;
        let _orig_filename = read_fixed_length_string(&mut input, num_chars_orig_filename as usize)?;
        let num_entries: i32 = input.read_i32()?; // Stored a second time.
        if num_entries < 0 {
            return Err(FsError::UnsupportedFsAnnotFormatVersion);
        }

        let mut ct = FsAnnotColortable::default();
        for _ in 0..num_entries {
            ct.id.push(input.read_i32()?);
            let num_chars_region_name: i32 = input.read_i32()?;
            ct.name.push(read_fixed_length_string(&mut input, num_chars_region_name as usize)?);
            let r = input.read_i32()?;
            let g = input.read_i32()?;
            let b = input.read_i32()?;
            let a = input.read_i32()?;
            ct.r.push(r);
            ct.g.push(g);
            ct.b.push(b);
            ct.a.push(a);
            ct.label.push(color_label(r, g, b, a));
        }
        Ok(ct)
    }

    /// Write the colortable in format version 2, starting with the version tag.
    pub fn to_writer<W>(&self, output: &mut W, orig_filename: &str) -> Result<()>
    where
        W: Write,
    {
        let mut output = ByteOrdered::be(output);
        let max_id = self.id.iter().cloned().max().map(|m| m + 1).unwrap_or(0);
        output.write_i32(ANNOT_CTAB_VERSION)?;
        output.write_i32(max_id)?;
        output.write_i32(orig_filename.len() as i32)?;
        output.write_all(orig_filename.as_bytes())?;
        output.write_i32(self.len() as i32)?;
        for idx in 0..self.len() {
            output.write_i32(self.id[idx])?;
            output.write_i32(self.name[idx].len() as i32 + 1)?;
            output.write_all(self.name[idx].as_bytes())?;
            output.write_u8(0)?;
            output.write_i32(self.r[idx])?;
            output.write_i32(self.g[idx])?;
            output.write_i32(self.b[idx])?;
            output.write_i32(self.a[idx])?;
        }
        Ok(())
    }
}

impl fmt::Display for FsAnnotColortable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Colortable for {} brain regions.", self.id.len())
    }
}


/// Models a FreeSurfer brain surface parcellation from an annot file.
///
/// The `vertex_labels` field contains the mesh vertices in order, and assigns to each vertex a brain region
/// using the `label` field (not the `id` field!) from the `colortable`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsAnnot {
    pub vertex_indices: Vec<i32>,
    pub vertex_labels: Vec<i32>,
    pub colortable: FsAnnotColortable,
}

impl FsAnnot {
    /// Read an FsAnnot instance from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsAnnot> {
        let mut file = BufReader::new(File::open(path)?);
        FsAnnot::from_reader(&mut file)
    }

    pub fn from_reader<S>(input: &mut S) -> Result<FsAnnot>
    where
        S: Read,
    {
        let mut file = ByteOrdered::be(input);

        let num_vertices: i32 = file.read_i32()?;

        let mut vertex_indices : Vec<i32> = Vec::with_capacity(num_vertices.max(0) as usize);
        let mut vertex_labels : Vec<i32> = Vec::with_capacity(num_vertices.max(0) as usize);
        for _ in 0..num_vertices {
            vertex_indices.push(file.read_i32()?);
            vertex_labels.push(file.read_i32()?);
        }

        let has_colortable: i32 = file.read_i32()?;
        if has_colortable != 1 {
            return Err(FsError::UnsupportedFsAnnotFormatVersion);
        }

        // A negative entry count encodes the format version. Only version 2 is supported.
        let version: i32 = file.read_i32()?;
        if version != ANNOT_CTAB_VERSION {
            return Err(FsError::UnsupportedFsAnnotFormatVersion);
        }
        let _max_id: i32 = file.read_i32()?;
        let colortable = FsAnnotColortable::from_reader(&mut file)?;

        Ok(FsAnnot {
            vertex_indices,
            vertex_labels,
            colortable,
        })
    }

    /// Build a parcellation from per-vertex colortable indices, `-1` marking unassigned vertices.
    pub fn from_colortable_indices(indices: &[i32], colortable: FsAnnotColortable) -> Result<FsAnnot> {
        let mut vertex_labels = Vec::with_capacity(indices.len());
        for idx in indices.iter() {
            if *idx < 0 {
                vertex_labels.push(0);
            } else if (*idx as usize) < colortable.len() {
                vertex_labels.push(colortable.label[*idx as usize]);
            } else {
                return Err(FsError::InvalidArgument(format!(
                    "Colortable index {} out of range for {} regions.", idx, colortable.len())));
            }
        }
        Ok(FsAnnot {
            vertex_indices: (0..indices.len() as i32).collect(),
            vertex_labels,
            colortable,
        })
    }

    /// Get the region names contained in the [`FsAnnot`] struct.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// let annot = fswrap::read_annot("/path/to/subjects_dir/subject1/label/lh.aparc.annot").unwrap();
    /// annot.regions();
    /// ```
    pub fn regions(&self) -> Vec<String> {
        self.colortable.name.clone()
    }

    pub fn num_regions(&self) -> usize {
        self.colortable.len()
    }

    /// Get the indices of all vertices which are part of the given brain region.
    ///
    /// It can happen that no vertices are assigned to the region, in which case the result vector is empty.
    /// Fails if `region` is not a region name of this parcellation.
    pub fn region_vertices(&self, region: &str) -> Result<Vec<usize>> {
        let region_idx = self.colortable.name.iter().position(|x| x == region).ok_or_else(|| {
            FsError::InvalidArgument(format!("No region '{}' in annot.", region))
        })?;
        let region_label = self.colortable.label[region_idx];
        Ok(self
            .vertex_labels
            .iter()
            .enumerate()
            .filter(|(_, vlabel)| **vlabel == region_label)
            .map(|(idx, _)| idx)
            .collect())
    }

    /// Get the region name of every vertex, `None` for vertices whose label matches no region.
    pub fn vertex_regions(&self) -> Vec<Option<String>> {
        self.vertex_colortable_indices()
            .iter()
            .map(|idx| {
                if *idx < 0 {
                    None
                } else {
                    Some(self.colortable.name[*idx as usize].clone())
                }
            })
            .collect()
    }

    /// Returns the colortable index of each vertex, or `-1` if its label matches no region.
    pub fn vertex_colortable_indices(&self) -> Vec<i32> {
        self.vertex_labels
            .iter()
            .map(|vlabel| {
                self.colortable
                    .label
                    .iter()
                    .position(|l| l == vlabel)
                    .map(|p| p as i32)
                    .unwrap_or(-1)
            })
            .collect()
    }

    /// Get the vertex colors for all annot vertices as u8 RGB(A) values.
    ///
    /// Vertices whose label matches no region get the color of the region at `unmatched_region_index`,
    /// or black if that index is out of range too.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// let annot = fswrap::read_annot("/path/to/subjects_dir/subject1/label/lh.aparc.annot").unwrap();
    /// let col_rgba = annot.vertex_colors(true, 0);
    /// assert_eq!(col_rgba.len(), annot.vertex_indices.len() * 4);
    /// ```
    pub fn vertex_colors(&self, alpha : bool, unmatched_region_index: usize) -> Vec<u8> {
        let channels = if alpha { 4 } else { 3 };
        let mut vert_colors: Vec<u8> = Vec::with_capacity(self.vertex_labels.len() * channels);
        for ct_idx in self.vertex_colortable_indices().iter() {
            let idx = if *ct_idx < 0 { unmatched_region_index } else { *ct_idx as usize };
            let color = if idx < self.colortable.len() { self.colortable.color(idx) } else { [0; 4] };
            for channel in color.iter().take(channels) {
                vert_colors.push(*channel as u8);
            }
        }
        vert_colors
    }

    /// Write the parcellation in annot format.
    pub fn to_writer<W: Write>(&self, output: &mut W) -> Result<()> {
        {
            let mut output = ByteOrdered::be(&mut *output);
            output.write_i32(self.vertex_labels.len() as i32)?;
            for (idx, label) in self.vertex_labels.iter().enumerate() {
                output.write_i32(idx as i32)?;
                output.write_i32(*label)?;
            }
            output.write_i32(1)?;
        }
        self.colortable.to_writer(output, "")
    }
}

impl VertexColor for FsAnnot {
    fn vertex_color_rgb(&self) -> Vec<u8> {
        self.vertex_colors(false, 0)
    }

    fn vertex_color_rgba(&self) -> Vec<u8> {
        self.vertex_colors(true, 0)
    }
}


impl fmt::Display for FsAnnot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Surface parcellation assigning {} vertices to {} brain regions.", self.vertex_indices.len(), self.colortable.id.len())
    }
}


/// Read a brain parcellation from a FreeSurfer annot file.
///
/// # Examples
///
/// ```no_run
/// let annot = fswrap::read_annot("/path/to/subjects_dir/subject1/label/lh.aparc.annot").unwrap();
/// println!("Annotation assigns the {} brain mesh vertices to {} different regions.", annot.vertex_indices.len(), annot.regions().len());
/// ```
pub fn read_annot<P: AsRef<Path>>(path: P) -> Result<FsAnnot> {
    FsAnnot::from_file(path)
}


/// Write a brain parcellation to a FreeSurfer annot file.
pub fn write_annot<P: AsRef<Path>>(path: P, annot: &FsAnnot) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    annot.to_writer(&mut file)?;
    file.flush()?;
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    fn demo_annot() -> FsAnnot {
        let ct = FsAnnotColortable::from_regions(&[
            ("unknown".to_string(), [25, 5, 25, 0]),
            ("bankssts".to_string(), [25, 100, 40, 0]),
            ("insula".to_string(), [255, 192, 32, 0]),
        ]);
        FsAnnot::from_colortable_indices(&[0, 1, 1, 2, -1, 2], ct).unwrap()
    }

    #[test]
    fn color_labels_follow_the_freesurfer_encoding() {
        assert_eq!(1639705, color_label(25, 5, 25, 0));
        assert_eq!(25 + 100 * 256 + 40 * 65536, color_label(25, 100, 40, 0));
    }

    #[test]
    fn a_written_annot_file_can_be_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lh.aparc.annot");
        let annot = demo_annot();
        write_annot(&path, &annot).unwrap();

        let read = read_annot(&path).unwrap();
        assert_eq!(annot, read);
        assert_eq!(3, read.num_regions());
        assert_eq!("insula", read.regions()[2]);
    }

    #[test]
    fn region_vertices_are_computed_correctly() {
        let annot = demo_annot();
        assert_eq!(vec![1, 2], annot.region_vertices("bankssts").unwrap());
        assert!(annot.region_vertices("precuneus").is_err());
    }

    #[test]
    fn unmatched_vertices_have_no_colortable_index() {
        let annot = demo_annot();
        assert_eq!(vec![0, 1, 1, 2, -1, 2], annot.vertex_colortable_indices());
        let regions = annot.vertex_regions();
        assert_eq!(Some("unknown".to_string()), regions[0]);
        assert_eq!(None, regions[4]);
    }

    #[test]
    fn vertex_colors_are_computed_correctly() {
        let annot = demo_annot();
        let col_rgba = annot.vertex_colors(true, 0);
        assert_eq!(col_rgba.len(), annot.vertex_indices.len() * 4);
        let col_rgb = annot.vertex_color_rgb();
        assert_eq!(col_rgb.len(), annot.vertex_indices.len() * 3);
        assert_eq!(&[25, 100, 40], &col_rgb[3..6]);
        // the unmatched vertex takes the color of region 0
        assert_eq!(&[25, 5, 25], &col_rgb[12..15]);
    }

    #[test]
    fn other_format_versions_are_rejected() {
        let mut data: Vec<u8> = Vec::new();
        for v in [0i32, 1, -1].iter() {
            data.extend_from_slice(&v.to_be_bytes());
        }
        match FsAnnot::from_reader(&mut data.as_slice()) {
            Err(FsError::UnsupportedFsAnnotFormatVersion) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
