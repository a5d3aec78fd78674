//! A triangulated 3D surface with optional labels and inflated coordinates.

use ndarray::{s, Array2, Array3, Axis};
use ndarray_stats::QuantileExt;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::convert::TryFrom;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::fs_annot::read_annot;
use crate::fs_surface::{read_surf, write_surf, BrainMesh};
use crate::traits::VertexColor;

const CREATED_BY: &str = "created by fswrap";


/// Name and RGBA color of a labelled region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInfo {
    pub region: String,
    pub color: [i32; 4],
}


/// A triangular surface. Every triangle holds 3 indices into `vertices`.
#[derive(Debug, Clone, PartialEq)]
pub struct TriSurface {
    /// Vertex coordinates, one row per vertex.
    pub vertices: Array2<f32>,
    /// Vertex indices, one row per triangle.
    pub triangles: Array2<i32>,
    /// A label per vertex. Defaults to 0, `-1` marks unlabelled vertices.
    pub labels: Vec<i32>,
    /// Region name and color of each label.
    pub metadata: Option<BTreeMap<i32, RegionInfo>>,
    /// Alternative coordinates of the same topology.
    pub inflated_vertices: Option<Array2<f32>>,
}

impl TriSurface {
    /// Create a surface from arrays, checking that the triangles reference valid vertices.
    pub fn new(
        vertices: Array2<f32>,
        triangles: Array2<i32>,
        labels: Option<Vec<i32>>,
        metadata: Option<BTreeMap<i32, RegionInfo>>,
        inflated_vertices: Option<Array2<f32>>,
    ) -> Result<TriSurface> {
        let nvert = vertices.nrows();
        if vertices.ncols() != 3 || triangles.ncols() != 3 {
            return Err(FsError::InvalidMesh(format!(
                "expected 3 columns for vertices and triangles, got {} and {}.",
                vertices.ncols(), triangles.ncols())));
        }
        if triangles.nrows() > 0 {
            let min = *triangles.min().map_err(|e| FsError::InvalidMesh(e.to_string()))?;
            let max = *triangles.max().map_err(|e| FsError::InvalidMesh(e.to_string()))?;
            if min < 0 || max as usize >= nvert {
                return Err(FsError::InvalidMesh(format!(
                    "triangle indices range from {} to {} but there are {} vertices.", min, max, nvert)));
            }
        }
        let labels = labels.unwrap_or_else(|| vec![0; nvert]);
        if labels.len() != nvert {
            return Err(FsError::InvalidMesh(format!(
                "{} labels given for {} vertices.", labels.len(), nvert)));
        }
        if let Some(inflated) = &inflated_vertices {
            if inflated.dim() != vertices.dim() {
                return Err(FsError::InvalidMesh(format!(
                    "inflated vertices of shape {:?} do not match vertices of shape {:?}.",
                    inflated.dim(), vertices.dim())));
            }
        }
        Ok(TriSurface { vertices, triangles, labels, metadata, inflated_vertices })
    }

    /// Load a FreeSurfer surface, with optional inflated surface and parcellation.
    ///
    /// The inflated surface must have exactly the triangles of `meshfile`. With an annotation,
    /// the labels are colortable indices (`-1` for vertices of no region) and the metadata
    /// holds the name and color of each colortable entry.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// let surf = fswrap::TriSurface::load(
    ///     "/path/to/subject1/surf/lh.white",
    ///     Some(Path::new("/path/to/subject1/surf/lh.inflated")),
    ///     Some(Path::new("/path/to/subject1/label/lh.aparc.annot")),
    /// ).unwrap();
    /// println!("{}", surf);
    /// ```
    pub fn load<P: AsRef<Path>>(meshfile: P, inflatedmeshpath: Option<&Path>, annotfile: Option<&Path>) -> Result<TriSurface> {
        let surf = read_surf(&meshfile)?;
        let vertices = surf.mesh.vertices_array()?;
        let triangles = surf.mesh.faces_array()?;

        let inflated_vertices = match inflatedmeshpath {
            Some(path) => {
                let inflated = read_surf(path)?;
                if inflated.mesh.faces != surf.mesh.faces {
                    return Err(FsError::InvalidMesh(format!(
                        "'{}' and '{}' do not represent the same surface.",
                        meshfile.as_ref().display(), path.display())));
                }
                Some(inflated.mesh.vertices_array()?)
            }
            None => None,
        };

        let (labels, metadata) = match annotfile {
            Some(path) => {
                let annot = read_annot(path)?;
                let meta: BTreeMap<i32, RegionInfo> = (0..annot.colortable.len())
                    .map(|idx| {
                        (idx as i32, RegionInfo {
                            region: annot.colortable.name[idx].clone(),
                            color: annot.colortable.color(idx),
                        })
                    })
                    .collect();
                (Some(annot.vertex_colortable_indices()), Some(meta))
            }
            None => (None, None),
        };

        TriSurface::new(vertices, triangles, labels, metadata, inflated_vertices)
    }

    /// Write the mesh in FreeSurfer format, and the inflated mesh to `<out_file>.inflated` if present.
    /// Returns the written files.
    pub fn save<P: AsRef<Path>>(&self, out_file: P) -> Result<Vec<PathBuf>> {
        let out_file = out_file.as_ref().to_path_buf();
        write_surf(&out_file, &self.mesh(), CREATED_BY)?;
        let mut written = vec![out_file.clone()];
        if let Some(inflated) = &self.inflated_vertices {
            let mut name = out_file.into_os_string();
            name.push(".inflated");
            let inflated_file = PathBuf::from(name);
            write_surf(&inflated_file, &BrainMesh::from_arrays(inflated, &self.triangles), CREATED_BY)?;
            written.push(inflated_file);
        }
        Ok(written)
    }

    /// Export the mesh as an ASCII legacy VTK polydata, with the labels (clamped to 0..=255) as point scalars.
    pub fn save_vtk<P: AsRef<Path>>(&self, outfile: P, inflated: bool) -> Result<()> {
        let vertices = if inflated {
            self.inflated_vertices.as_ref().ok_or_else(|| {
                FsError::InvalidArgument(format!(
                    "Can't save inflated volume '{}' since it has not been specified.",
                    outfile.as_ref().display()))
            })?
        } else {
            &self.vertices
        };
        let mut out = BufWriter::new(File::create(outfile)?);
        writeln!(out, "# vtk DataFile Version 3.0")?;
        writeln!(out, "vtk output")?;
        writeln!(out, "ASCII")?;
        writeln!(out, "DATASET POLYDATA")?;
        writeln!(out, "POINTS {} float", vertices.nrows())?;
        for row in vertices.outer_iter() {
            writeln!(out, "{} {} {}", row[0], row[1], row[2])?;
        }
        writeln!(out, "POLYGONS {} {}", self.triangles.nrows(), self.triangles.nrows() * 4)?;
        for tri in self.triangles.outer_iter() {
            writeln!(out, "3 {} {} {}", tri[0], tri[1], tri[2])?;
        }
        writeln!(out, "POINT_DATA {}", vertices.nrows())?;
        writeln!(out, "SCALARS scalars unsigned_char")?;
        writeln!(out, "LOOKUP_TABLE default")?;
        for label in self.labels.iter() {
            writeln!(out, "{}", (*label).max(0).min(255))?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn mesh(&self) -> BrainMesh {
        BrainMesh::from_arrays(&self.vertices, &self.triangles)
    }

    /// Approximation of the number of edges, from Euler's formula for triangle meshes.
    pub fn nedges(&self) -> usize {
        3 * self.vertices.nrows()
    }

    /// Number of vertices, edges and triangles.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.vertices.nrows(), self.nedges(), self.triangles.nrows())
    }

    /// Apply an affine transformation on the vertices, and the inflated vertices if present.
    pub fn apply_affine(&mut self, affine: &Array2<f64>) -> Result<()> {
        self.vertices = apply_affine_on_mesh(&self.vertices, affine)?;
        if let Some(inflated) = &self.inflated_vertices {
            self.inflated_vertices = Some(apply_affine_on_mesh(inflated, affine)?);
        }
        Ok(())
    }

    /// Neighbours of each vertex through a triangle edge.
    pub fn vertex_neighbours(&self) -> Vec<BTreeSet<usize>> {
        let mut neighbours = vec![BTreeSet::new(); self.vertices.nrows()];
        for tri in self.triangles.outer_iter() {
            for (a, b) in [(0, 1), (1, 2), (2, 0)].iter() {
                let (va, vb) = (tri[*a] as usize, tri[*b] as usize);
                neighbours[va].insert(vb);
                neighbours[vb].insert(va);
            }
        }
        neighbours
    }

    /// Index of the vertex with exactly these coordinates. Fails unless exactly one vertex matches.
    pub fn vertex_index(&self, point: [f32; 3]) -> Result<usize> {
        let matches: Vec<usize> = self
            .vertices
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row[0] == point[0] && row[1] == point[1] && row[2] == point[2])
            .map(|(idx, _)| idx)
            .collect();
        if matches.len() != 1 {
            return Err(FsError::InvalidArgument("Input points are not in mesh.".to_string()));
        }
        Ok(matches[0])
    }

    /// Shortest path along the mesh edges between two vertices, given by their coordinates.
    ///
    /// Returns the coordinates of the path vertices, from `point1` to `point2`.
    pub fn geodesic_path(&self, point1: [f32; 3], point2: [f32; 3]) -> Result<Array2<f32>> {
        let start = self.vertex_index(point1)?;
        let end = self.vertex_index(point2)?;
        let indices = self.dijkstra(start, end).ok_or_else(|| {
            FsError::InvalidArgument("Input points are not connected on the mesh.".to_string())
        })?;
        let mut path = Array2::<f32>::zeros((indices.len(), 3));
        for (row, idx) in indices.iter().enumerate() {
            path.row_mut(row).assign(&self.vertices.row(*idx));
        }
        Ok(path)
    }

    fn dijkstra(&self, start: usize, end: usize) -> Option<Vec<usize>> {
        let neighbours = self.vertex_neighbours();
        let nvert = self.vertices.nrows();
        let mut dist = vec![f64::INFINITY; nvert];
        let mut previous: Vec<Option<usize>> = vec![None; nvert];
        let mut heap = BinaryHeap::new();
        dist[start] = 0.0;
        heap.push(State { cost: 0.0, vertex: start });

        while let Some(State { cost, vertex }) = heap.pop() {
            if vertex == end {
                break;
            }
            if cost > dist[vertex] {
                continue;
            }
            for next in neighbours[vertex].iter() {
                let candidate = cost + self.edge_length(vertex, *next);
                if candidate < dist[*next] {
                    dist[*next] = candidate;
                    previous[*next] = Some(vertex);
                    heap.push(State { cost: candidate, vertex: *next });
                }
            }
        }
        if !dist[end].is_finite() {
            return None;
        }
        let mut path = vec![end];
        let mut current = end;
        while let Some(prev) = previous[current] {
            path.push(prev);
            current = prev;
        }
        path.reverse();
        Some(path)
    }

    fn edge_length(&self, a: usize, b: usize) -> f64 {
        let d = &self.vertices.row(a) - &self.vertices.row(b);
        d.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt()
    }

    /// Rasterise the labels in a volume of the given shape, at the rounded vertex coordinates.
    ///
    /// Vertices labelled `-1` are skipped and every other label is stored shifted by `shift`. A
    /// shifted label outside of the `i16` range is an error.
    /// Returns the label volume and the number of distinct labels.
    pub fn labelize(&self, shape: (usize, usize, usize), shift: i16) -> Result<(Array3<i16>, usize)> {
        let mut label_array = Array3::<i16>::zeros(shape);
        let distinct: BTreeSet<i32> = self.labels.iter().cloned().filter(|l| *l != -1).collect();
        for (vertex, label) in self.vertices.outer_iter().zip(self.labels.iter()) {
            if *label == -1 {
                continue;
            }
            let idx = voxel_index(vertex[0], vertex[1], vertex[2], shape).ok_or_else(|| {
                FsError::InvalidArgument(format!(
                    "Vertex ({}, {}, {}) lies outside of a {:?} volume.", vertex[0], vertex[1], vertex[2], shape))
            })?;
            label_array[idx] = i16::try_from(*label).ok().and_then(|l| l.checked_add(shift)).ok_or_else(|| {
                FsError::InvalidArgument(format!("Label {} shifted by {} does not fit in 16 bits.", label, shift))
            })?;
        }
        Ok((label_array, distinct.len()))
    }

    /// Mask of the voxels of a volume of the given shape enclosed by the surface.
    ///
    /// Voxel centers are at integer coordinates. A voxel is inside when a ray cast along the
    /// first axis crosses the surface an odd number of times before reaching it. With `tol > 0`,
    /// voxels closer to a crossing than `tol` times the bounding box diagonal are inside too.
    pub fn voxelize(&self, shape: (usize, usize, usize), tol: f64) -> Result<Array3<u8>> {
        let (nx, ny, nz) = shape;
        let mut inside = Array3::<u8>::zeros(shape);
        if self.vertices.nrows() == 0 {
            return Ok(inside);
        }
        let min = self.vertices.map_axis(Axis(0), |c| c.iter().cloned().fold(f32::INFINITY, f32::min));
        let max = self.vertices.map_axis(Axis(0), |c| c.iter().cloned().fold(f32::NEG_INFINITY, f32::max));
        let diag = (&max - &min).iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        let tolerance = tol * diag;

        // Offsets keeping rays away from mesh edges and vertices lying on the grid.
        const DY: f64 = 1.234_567e-5;
        const DZ: f64 = 2.345_678e-5;

        let mut crossings: Vec<Vec<f64>> = vec![Vec::new(); ny * nz];
        for tri in self.triangles.outer_iter() {
            let p: Vec<[f64; 3]> = (0..3)
                .map(|k| {
                    let v = self.vertices.row(tri[k] as usize);
                    [v[0] as f64, v[1] as f64, v[2] as f64]
                })
                .collect();
            let ymin = p.iter().map(|v| v[1]).fold(f64::INFINITY, f64::min);
            let ymax = p.iter().map(|v| v[1]).fold(f64::NEG_INFINITY, f64::max);
            let zmin = p.iter().map(|v| v[2]).fold(f64::INFINITY, f64::min);
            let zmax = p.iter().map(|v| v[2]).fold(f64::NEG_INFINITY, f64::max);
            let y_range = grid_range(ymin - DY, ymax - DY, ny);
            let z_range = grid_range(zmin - DZ, zmax - DZ, nz);
            for y in y_range.clone() {
                for z in z_range.clone() {
                    if let Some(x) = ray_crossing(&p, y as f64 + DY, z as f64 + DZ) {
                        crossings[y * nz + z].push(x);
                    }
                }
            }
        }

        for y in 0..ny {
            for z in 0..nz {
                let xs = &mut crossings[y * nz + z];
                if xs.is_empty() {
                    continue;
                }
                xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                for x in 0..nx {
                    let xf = x as f64;
                    let before = xs.iter().filter(|c| **c < xf).count();
                    let near = tolerance > 0.0 && xs.iter().any(|c| (c - xf).abs() <= tolerance);
                    if before % 2 == 1 || near {
                        inside[[x, y, z]] = 1;
                    }
                }
            }
        }
        Ok(inside)
    }
}

impl VertexColor for TriSurface {
    fn vertex_color_rgb(&self) -> Vec<u8> {
        self.vertex_color_rgba()
            .chunks(4)
            .flat_map(|c| c[..3].to_vec())
            .collect()
    }

    fn vertex_color_rgba(&self) -> Vec<u8> {
        let mut colors = Vec::with_capacity(self.labels.len() * 4);
        for label in self.labels.iter() {
            let color = self
                .metadata
                .as_ref()
                .and_then(|m| m.get(&(*label).max(0)))
                .map(|info| info.color)
                .unwrap_or([0; 4]);
            colors.extend(color.iter().map(|c| *c as u8));
        }
        colors
    }
}

impl fmt::Display for TriSurface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (nvert, nedges, ntri) = self.shape();
        write!(f, "Triangular surface with {} vertices, ~{} edges and {} triangles.", nvert, nedges, ntri)
    }
}


#[derive(Debug, PartialEq)]
struct State {
    cost: f64,
    vertex: usize,
}

impl Eq for State {}

// Reversed to turn the max-heap into a min-heap.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.vertex.cmp(&other.vertex))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}


fn voxel_index(x: f32, y: f32, z: f32, shape: (usize, usize, usize)) -> Option<[usize; 3]> {
    let idx = [x.round(), y.round(), z.round()];
    let dims = [shape.0, shape.1, shape.2];
    let mut out = [0usize; 3];
    for k in 0..3 {
        if idx[k] < 0.0 || idx[k] as usize >= dims[k] {
            return None;
        }
        out[k] = idx[k] as usize;
    }
    Some(out)
}

fn grid_range(lo: f64, hi: f64, n: usize) -> std::ops::Range<usize> {
    let start = lo.ceil().max(0.0) as usize;
    let stop = if hi < 0.0 { 0 } else { ((hi.floor() as usize) + 1).min(n) };
    start.min(stop)..stop
}

/// Crossing of the ray `(t, y, z)` with the triangle, as its first coordinate.
fn ray_crossing(p: &[[f64; 3]], y: f64, z: f64) -> Option<f64> {
    let (y0, z0) = (p[0][1], p[0][2]);
    let (ey1, ez1) = (p[1][1] - y0, p[1][2] - z0);
    let (ey2, ez2) = (p[2][1] - y0, p[2][2] - z0);
    let d = ey1 * ez2 - ey2 * ez1;
    if d.abs() < 1e-12 {
        return None;
    }
    let (py, pz) = (y - y0, z - z0);
    let l1 = (py * ez2 - ey2 * pz) / d;
    let l2 = (ey1 * pz - ez1 * py) / d;
    let l0 = 1.0 - l1 - l2;
    if l0 < 0.0 || l1 < 0.0 || l2 < 0.0 {
        return None;
    }
    Some(l0 * p[0][0] + l1 * p[1][0] + l2 * p[2][0])
}


/// Apply an affine transformation on each vertex of a mesh.
///
/// `vertices` is n x 3 and `affine` 4 x 4; the vertices are transformed in homogeneous coordinates.
pub fn apply_affine_on_mesh(vertices: &Array2<f32>, affine: &Array2<f64>) -> Result<Array2<f32>> {
    if affine.dim() != (4, 4) {
        return Err(FsError::InvalidArgument(format!(
            "Expected a 4x4 affine transformation, got shape {:?}.", affine.dim())));
    }
    let n = vertices.nrows();
    let mut homogenous = Array2::<f64>::ones((n, 4));
    homogenous.slice_mut(s![.., ..3]).assign(&vertices.mapv(|v| v as f64));
    let warped = affine.dot(&homogenous.t()).reversed_axes();
    Ok(warped.slice(s![.., ..3]).mapv(|v| v as f32))
}


/// An axis-aligned cube between `lo` and `hi` on every axis, as a closed surface of 12 triangles.
pub fn cube_surface(lo: f32, hi: f32) -> Result<TriSurface> {
    let mut vertices = Array2::<f32>::zeros((8, 3));
    for idx in 0..8 {
        vertices[[idx, 0]] = if idx & 1 == 0 { lo } else { hi };
        vertices[[idx, 1]] = if idx & 2 == 0 { lo } else { hi };
        vertices[[idx, 2]] = if idx & 4 == 0 { lo } else { hi };
    }
    let faces: Vec<i32> = vec![
        0, 2, 1, 1, 2, 3, // z = lo
        4, 5, 6, 5, 7, 6, // z = hi
        0, 1, 4, 1, 5, 4, // y = lo
        2, 6, 3, 3, 6, 7, // y = hi
        0, 4, 2, 2, 4, 6, // x = lo
        1, 3, 5, 3, 7, 5, // x = hi
    ];
    let triangles = Array2::from_shape_vec((12, 3), faces)?;
    TriSurface::new(vertices, triangles, None, None, None)
}
