// Functions for managing FreeSurfer brain surface meshes in binary 'surf' files.
// These files store a triangular mesh, where each vertex if defined by its x,y,z coord and
// each face is defined by 3 vertices, stored as 3 indices into the vertices.


use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{FsError, Result};
use crate::util::{is_gz_file, read_string_until};

pub const TRIS_MAGIC_FILE_TYPE_NUMBER: i32 = 16777214;

#[derive(Debug, Clone, PartialEq)]
pub struct FsSurfaceHeader {
    pub surf_magic: [u8; 3],
    pub info_line: String,
    pub num_vertices: i32,
    pub num_faces: i32,
}


impl Default for FsSurfaceHeader {
    fn default() -> FsSurfaceHeader {
        FsSurfaceHeader {
            surf_magic: [255; 3],
            info_line: String::from(""),
            num_vertices: 0,
            num_faces: 0
        }
    }
}

impl FsSurfaceHeader {

    /// Read an FsSurface header from a file.
    /// If the file's name ends with ".gz", the file is assumed to need GZip decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsSurfaceHeader> {
        let gz = is_gz_file(&path);
        let mut file = BufReader::new(File::open(path)?);
        if gz {
            FsSurfaceHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            FsSurfaceHeader::from_reader(&mut file)
        }
    }


    /// Read an FsSurface header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// FsSurface header. After reading, the input is at the start of the vertex data.
    pub fn from_reader<S>(input: &mut S) -> Result<FsSurfaceHeader>
    where
        S: Read,
    {
        let mut hdr = FsSurfaceHeader::default();

        let mut input = ByteOrdered::be(input);

        for v in &mut hdr.surf_magic {
            *v = input.read_u8()?;
        }

        let magic: i32 = interpret_fs_int24(hdr.surf_magic[0], hdr.surf_magic[1], hdr.surf_magic[2]);
        if magic != TRIS_MAGIC_FILE_TYPE_NUMBER {
            return Err(FsError::InvalidFsSurfaceFormat);
        }

        hdr.info_line = read_string_until(&mut input, b"\n\n")?;
        hdr.num_vertices = input.read_i32()?;
        hdr.num_faces = input.read_i32()?;

        if hdr.num_vertices < 0 || hdr.num_faces < 0 {
            return Err(FsError::InvalidFsSurfaceFormat);
        }
        Ok(hdr)
    }
}


/// Interpret three bytes as a single 24 bit integer, FreeSurfer style.
pub fn interpret_fs_int24(b1: u8, b2:u8, b3:u8) -> i32 {
    ((b1 as i32) << 16) + ((b2 as i32) << 8) + b3 as i32
}


// An FsSurface object
#[derive(Debug, PartialEq, Clone)]
pub struct FsSurface {
    pub header: FsSurfaceHeader,
    pub mesh: BrainMesh,
}

/// A triangular mesh, with vertex coordinates and vertex indices stored in row order.
#[derive(Debug, PartialEq, Clone)]
pub struct BrainMesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<i32>,
}

impl BrainMesh {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    /// The vertex coordinates as an n x 3 matrix.
    pub fn vertices_array(&self) -> Result<Array2<f32>> {
        Ok(Array2::from_shape_vec((self.num_vertices(), 3), self.vertices.clone())?)
    }

    /// The faces as an m x 3 matrix of vertex indices.
    pub fn faces_array(&self) -> Result<Array2<i32>> {
        Ok(Array2::from_shape_vec((self.num_faces(), 3), self.faces.clone())?)
    }

    pub fn from_arrays(vertices: &Array2<f32>, faces: &Array2<i32>) -> BrainMesh {
        BrainMesh {
            vertices: vertices.iter().cloned().collect(),
            faces: faces.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for BrainMesh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Brain mesh with {} vertices and {} faces.", self.num_vertices(), self.num_faces())
    }
}


/// Read a FreeSurfer brain surface mesh, like `surf/lh.white`.
///
/// # Examples
///
/// ```no_run
/// let surf = fswrap::read_surf("/path/to/subjects_dir/subject1/surf/lh.white").unwrap();
/// println!("{}", surf.mesh);
/// ```
pub fn read_surf<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
    FsSurface::from_file(path)
}


impl FsSurface {
    /// Read an FsSurface instance from a file.
    /// If the file's name ends with ".gz", the file is assumed to need GZip decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            FsSurface::from_reader(GzDecoder::new(file))
        } else {
            FsSurface::from_reader(file)
        }
    }

    pub fn from_reader<S>(mut input: S) -> Result<FsSurface>
    where
        S: Read,
    {
        let hdr = FsSurfaceHeader::from_reader(&mut input)?;
        let mesh = FsSurface::mesh_from_reader(input, &hdr)?;
        Ok(FsSurface { header: hdr, mesh })
    }

    /// Read the vertex and face data. The input must be positioned right after the header.
    pub fn mesh_from_reader<S>(input: S, hdr: &FsSurfaceHeader) -> Result<BrainMesh>
    where
        S: Read,
    {
        let mut input = ByteOrdered::be(input);

        let mut vertex_data : Vec<f32> = Vec::with_capacity((hdr.num_vertices * 3) as usize);
        for _ in 0..hdr.num_vertices * 3 {
            vertex_data.push(input.read_f32()?);
        }

        let mut face_data : Vec<i32> = Vec::with_capacity((hdr.num_faces * 3) as usize);
        for _ in 0..hdr.num_faces * 3 {
            face_data.push(input.read_i32()?);
        }

        Ok(BrainMesh {
            vertices : vertex_data,
            faces : face_data
        })
    }
}


/// Write a brain mesh to a FreeSurfer surf file. The file is GZip compressed if its name ends with ".gz".
pub fn write_surf<P: AsRef<Path>>(path: P, mesh: &BrainMesh, info_line: &str) -> Result<()> {
    let gz = is_gz_file(&path);
    let file = BufWriter::new(File::create(path)?);
    if gz {
        let mut encoder = GzEncoder::new(file, Compression::default());
        write_surf_to(&mut encoder, mesh, info_line)?;
        encoder.finish()?;
    } else {
        let mut file = file;
        write_surf_to(&mut file, mesh, info_line)?;
        file.flush()?;
    }
    Ok(())
}


/// Write a brain mesh in surf format to the given byte stream.
pub fn write_surf_to<W: Write>(output: &mut W, mesh: &BrainMesh, info_line: &str) -> Result<()> {
    let mut output = ByteOrdered::be(output);
    output.write_u8(0xff)?;
    output.write_u8(0xff)?;
    output.write_u8(0xfe)?;
    output.write_all(info_line.trim_end_matches('\n').replace("\n\n", "\n").as_bytes())?;
    output.write_all(b"\n\n")?;
    output.write_i32(mesh.num_vertices() as i32)?;
    output.write_i32(mesh.num_faces() as i32)?;
    for v in mesh.vertices.iter() {
        output.write_f32(*v)?;
    }
    for f in mesh.faces.iter() {
        output.write_i32(*f)?;
    }
    Ok(())
}
