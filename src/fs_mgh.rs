//! Functions for managing FreeSurfer brain volumes in binary 'MGH' files.
//!
//! MGZ files are GZip compressed MGH files. Per-vertex surface data ("textures") are stored as
//! volumes of shape `(num_vertices, 1, 1, 1)`.

use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, Array4, ShapeBuilder};

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{FsError, Result};
use crate::util::is_gz_file;

pub const MGH_VERSION: i32 = 1;

pub const MGH_DATATYPE_NAMES : [&str; 4] = ["MRI_UCHAR", "MRI_INT", "MRI_FLOAT", "MRI_SHORT"];
pub const MGH_DATATYPE_CODES : [i32; 4] = [0, 1, 3, 4];
pub const MGH_DATA_START : usize = 284; // The index in bytes where the data part starts in an MGH file.

const MRI_UCHAR: i32 = 0;
const MRI_INT: i32 = 1;
const MRI_FLOAT: i32 = 3;
const MRI_SHORT: i32 = 4;

/// Models the header of a FreeSurfer MGH file containing a brain volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMghHeader {
    pub mgh_format_version: i32,
    pub dim1len: i32,
    pub dim2len: i32,
    pub dim3len: i32,
    pub dim4len: i32,  // aka "num_frames"
    pub dtype: i32,
    pub dof: i32,
    pub is_ras_good: i16,
    pub delta: [f32; 3],
    pub mdc_raw: [f32; 9],
    pub p_xyz_c: [f32; 3],
}


/// Models a FreeSurfer MGH file. Exactly one of the data fields is set, matching `header.dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMgh {
    pub header: FsMghHeader,
    pub data_mri_uchar: Option<Array4<u8>>,
    pub data_mri_float: Option<Array4<f32>>,
    pub data_mri_int: Option<Array4<i32>>,
    pub data_mri_short: Option<Array4<i16>>,
}


impl Default for FsMghHeader {
    fn default() -> FsMghHeader {
        FsMghHeader {
            mgh_format_version: MGH_VERSION,
            dim1len: 0,
            dim2len: 0,
            dim3len: 0,
            dim4len: 0,
            dtype: MRI_FLOAT,
            dof: 0,
            is_ras_good: 0,
            delta: [1.; 3],
            mdc_raw: [-1., 0., 0., 0., 0., -1., 0., 1., 0.],
            p_xyz_c: [0.; 3],
        }
    }
}

impl FsMghHeader {

    /// Read an MGH header from a file. MGZ files are decompressed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMghHeader> {
        let gz = is_mgz_file(&path);
        let mut file = BufReader::new(File::open(path)?);
        if gz {
            FsMghHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            FsMghHeader::from_reader(&mut file)
        }
    }


    /// Read an MGH header from the given byte stream.
    /// It is assumed that the input is currently at the start of the header. After reading,
    /// the input is at the start of the data.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMghHeader>
    where
        S: Read,
    {
        let mut hdr = FsMghHeader::default();

        let mut input = ByteOrdered::be(input);

        hdr.mgh_format_version = input.read_i32()?;

        if hdr.mgh_format_version != MGH_VERSION {
            return Err(FsError::InvalidFsMghFormat);
        }

        hdr.dim1len = input.read_i32()?;
        hdr.dim2len = input.read_i32()?;
        hdr.dim3len = input.read_i32()?;
        hdr.dim4len = input.read_i32()?;

        hdr.dtype = input.read_i32()?;
        hdr.dof = input.read_i32()?;

        hdr.is_ras_good = input.read_i16()?;

        let mut consumed: usize = 30;
        if hdr.is_ras_good == 1 {
            for idx in 0..3 { hdr.delta[idx] = input.read_f32()?; }
            for idx in 0..9 { hdr.mdc_raw[idx] = input.read_f32()?; }
            for idx in 0..3 { hdr.p_xyz_c[idx] = input.read_f32()?; }
            consumed += 60;
        }

        // Cannot seek in a GZ stream.
        let mut unused = vec![0u8; MGH_DATA_START - consumed];
        input.read_exact(&mut unused)?;

        if !MGH_DATATYPE_CODES.contains(&hdr.dtype) || hdr.dim1len < 0 || hdr.dim2len < 0 || hdr.dim3len < 0 || hdr.dim4len < 0 {
            return Err(FsError::InvalidFsMghFormat);
        }
        Ok(hdr)
    }

    /// Shape of the volume, `(dim1, dim2, dim3, frames)`.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        (self.dim1len as usize, self.dim2len as usize, self.dim3len as usize, self.dim4len as usize)
    }

    pub fn num_values(&self) -> usize {
        let (a, b, c, d) = self.shape();
        a * b * c * d
    }

    /// Name of the data type, e.g. `MRI_FLOAT`.
    pub fn dtype_name(&self) -> &'static str {
        MGH_DATATYPE_CODES
            .iter()
            .position(|c| *c == self.dtype)
            .map(|p| MGH_DATATYPE_NAMES[p])
            .unwrap_or("unknown")
    }

    fn to_writer<W: Write>(&self, output: &mut W) -> Result<()> {
        let mut output = ByteOrdered::be(output);
        output.write_i32(self.mgh_format_version)?;
        output.write_i32(self.dim1len)?;
        output.write_i32(self.dim2len)?;
        output.write_i32(self.dim3len)?;
        output.write_i32(self.dim4len)?;
        output.write_i32(self.dtype)?;
        output.write_i32(self.dof)?;
        output.write_i16(self.is_ras_good)?;
        for v in self.delta.iter().chain(self.mdc_raw.iter()).chain(self.p_xyz_c.iter()) {
            output.write_f32(*v)?;
        }
        output.write_all(&vec![0u8; MGH_DATA_START - 90])?;
        Ok(())
    }
}


impl FsMgh {

    /// Read an MGH or MGZ file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
        let gz = is_mgz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            FsMgh::from_reader(GzDecoder::new(file))
        } else {
            FsMgh::from_reader(file)
        }
    }

    pub fn from_reader<S>(mut input: S) -> Result<FsMgh>
    where
        S: Read,
    {
        let header = FsMghHeader::from_reader(&mut input)?;
        let shape = header.shape().f();
        let n = header.num_values();
        let mut input = ByteOrdered::be(input);

        let mut mgh = FsMgh {
            header: header.clone(),
            data_mri_uchar: None,
            data_mri_int: None,
            data_mri_float: None,
            data_mri_short: None,
        };

        match header.dtype {
            MRI_UCHAR => {
                let mut data = vec![0u8; n];
                input.read_exact(&mut data)?;
                mgh.data_mri_uchar = Some(Array::from_shape_vec(shape, data)?);
            }
            MRI_INT => {
                let mut data = Vec::with_capacity(n);
                for _ in 0..n { data.push(input.read_i32()?); }
                mgh.data_mri_int = Some(Array::from_shape_vec(shape, data)?);
            }
            MRI_FLOAT => {
                let mut data = Vec::with_capacity(n);
                for _ in 0..n { data.push(input.read_f32()?); }
                mgh.data_mri_float = Some(Array::from_shape_vec(shape, data)?);
            }
            MRI_SHORT => {
                let mut data = Vec::with_capacity(n);
                for _ in 0..n { data.push(input.read_i16()?); }
                mgh.data_mri_short = Some(Array::from_shape_vec(shape, data)?);
            }
            _ => return Err(FsError::InvalidFsMghFormat),
        }
        Ok(mgh)
    }

    /// A float volume with an identity-like default header.
    pub fn from_f32(data: Array4<f32>) -> FsMgh {
        let (a, b, c, d) = data.dim();
        let header = FsMghHeader {
            dim1len: a as i32,
            dim2len: b as i32,
            dim3len: c as i32,
            dim4len: d as i32,
            dtype: MRI_FLOAT,
            ..FsMghHeader::default()
        };
        FsMgh {
            header,
            data_mri_uchar: None,
            data_mri_float: Some(data),
            data_mri_int: None,
            data_mri_short: None,
        }
    }

    /// The data converted to f64, whatever the stored type.
    pub fn data_f64(&self) -> Result<Array4<f64>> {
        if let Some(d) = &self.data_mri_float {
            Ok(d.mapv(|v| v as f64))
        } else if let Some(d) = &self.data_mri_int {
            Ok(d.mapv(|v| v as f64))
        } else if let Some(d) = &self.data_mri_short {
            Ok(d.mapv(|v| v as f64))
        } else if let Some(d) = &self.data_mri_uchar {
            Ok(d.mapv(|v| v as f64))
        } else {
            Err(FsError::InvalidFsMghFormat)
        }
    }

    /// Write in MGH format, in Fortran order like FreeSurfer does.
    pub fn to_writer<W: Write>(&self, output: &mut W) -> Result<()> {
        self.header.to_writer(output)?;
        let mut output = ByteOrdered::be(output);
        match self.header.dtype {
            MRI_UCHAR => {
                let d = self.data_mri_uchar.as_ref().ok_or(FsError::InvalidFsMghFormat)?;
                for v in d.t().iter() { output.write_u8(*v)?; }
            }
            MRI_INT => {
                let d = self.data_mri_int.as_ref().ok_or(FsError::InvalidFsMghFormat)?;
                for v in d.t().iter() { output.write_i32(*v)?; }
            }
            MRI_FLOAT => {
                let d = self.data_mri_float.as_ref().ok_or(FsError::InvalidFsMghFormat)?;
                for v in d.t().iter() { output.write_f32(*v)?; }
            }
            MRI_SHORT => {
                let d = self.data_mri_short.as_ref().ok_or(FsError::InvalidFsMghFormat)?;
                for v in d.t().iter() { output.write_i16(*v)?; }
            }
            _ => return Err(FsError::InvalidFsMghFormat),
        }
        Ok(())
    }
}

impl fmt::Display for FsMgh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (a, b, c, d) = self.header.shape();
        write!(f, "MGH volume of type {} with shape {}x{}x{}x{}.", self.header.dtype_name(), a, b, c, d)
    }
}


/// Whether the file is a compressed MGZ file (".mgz" or ".gz" extension).
pub fn is_mgz_file<P: AsRef<Path>>(path: P) -> bool {
    is_gz_file(&path)
        || path
            .as_ref()
            .file_name()
            .map(|a| a.to_string_lossy().ends_with(".mgz"))
            .unwrap_or(false)
}


/// Read an MGH or MGZ file.
///
/// # Examples
///
/// ```no_run
/// let mgh = fswrap::read_mgh("/path/to/subjects_dir/subject1/mri/brain.mgz").unwrap();
/// println!("{}", mgh);
/// ```
pub fn read_mgh<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
    FsMgh::from_file(path)
}


/// Write an MGH file, or an MGZ file if the name ends with ".mgz" or ".gz".
pub fn write_mgh<P: AsRef<Path>>(path: P, mgh: &FsMgh) -> Result<()> {
    let gz = is_mgz_file(&path);
    let file = BufWriter::new(File::create(path)?);
    if gz {
        let mut encoder = GzEncoder::new(file, Compression::default());
        mgh.to_writer(&mut encoder)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        mgh.to_writer(&mut file)?;
        file.flush()?;
    }
    Ok(())
}
