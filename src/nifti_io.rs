//! NIfTI reference images: voxel-to-world affine, grid shape, and binary mask output.

use ndarray::{Array2, Array3};
use nifti::writer::WriterOptions;
use nifti::{NiftiHeader, NiftiObject, ReaderOptions};

use std::path::Path;

use crate::error::{FsError, Result};


/// Header, voxel-to-world affine and 3D shape of a NIfTI image.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub header: NiftiHeader,
    pub affine: Array2<f64>,
    pub shape: (usize, usize, usize),
}

impl ReferenceImage {
    /// Read the geometry of a `.nii` or `.nii.gz` image. The voxel data is not kept.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ReferenceImage> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = obj.header().clone();
        if header.dim[0] < 3 {
            return Err(FsError::InvalidArgument(format!(
                "'{}' is not a 3D image.", path.as_ref().display())));
        }
        let shape = (header.dim[1] as usize, header.dim[2] as usize, header.dim[3] as usize);
        let affine = header_affine(&header);
        Ok(ReferenceImage { header, affine, shape })
    }

    /// Write a volume of this shape with this header.
    pub fn write_u8_volume<P: AsRef<Path>>(&self, path: P, volume: &Array3<u8>) -> Result<()> {
        if volume.dim() != self.shape {
            return Err(FsError::InvalidArgument(format!(
                "Volume of shape {:?} does not match the reference shape {:?}.", volume.dim(), self.shape)));
        }
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(volume)?;
        Ok(())
    }
}


/// Voxel-to-world affine of a header: the sform if set, else a pixdim scaling.
pub fn header_affine(header: &NiftiHeader) -> Array2<f64> {
    let mut affine = Array2::<f64>::eye(4);
    if header.sform_code > 0 {
        for (row, srow) in [header.srow_x, header.srow_y, header.srow_z].iter().enumerate() {
            for col in 0..4 {
                affine[[row, col]] = srow[col] as f64;
            }
        }
    } else {
        for k in 0..3 {
            affine[[k, k]] = header.pixdim[k + 1] as f64;
        }
    }
    affine
}


/// Invert an affine transformation `[R t; 0 1]`.
pub fn invert_affine(affine: &Array2<f64>) -> Result<Array2<f64>> {
    if affine.dim() != (4, 4) {
        return Err(FsError::InvalidArgument(format!(
            "Expected a 4x4 affine transformation, got shape {:?}.", affine.dim())));
    }
    let m = |r: usize, c: usize| affine[[r, c]];
    let det = m(0, 0) * (m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1))
        - m(0, 1) * (m(1, 0) * m(2, 2) - m(1, 2) * m(2, 0))
        + m(0, 2) * (m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0));
    if det.abs() < 1e-12 {
        return Err(FsError::InvalidArgument("Singular affine transformation.".to_string()));
    }

    let mut inverse = Array2::<f64>::eye(4);
    for r in 0..3 {
        for c in 0..3 {
            // Adjugate: transposed cofactors.
            let (r1, r2) = ((c + 1) % 3, (c + 2) % 3);
            let (c1, c2) = ((r + 1) % 3, (r + 2) % 3);
            inverse[[r, c]] = (m(r1, c1) * m(r2, c2) - m(r1, c2) * m(r2, c1)) / det;
        }
    }
    for r in 0..3 {
        inverse[[r, 3]] = -(0..3).map(|c| inverse[[r, c]] * m(c, 3)).sum::<f64>();
    }
    Ok(inverse)
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn reference_header() -> NiftiHeader {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [2.0, 0.0, 0.0, -10.0];
        header.srow_y = [0.0, 2.0, 0.0, -20.0];
        header.srow_z = [0.0, 0.0, 3.0, 5.0];
        header
    }

    #[test]
    fn the_sform_is_the_affine_when_set() {
        let affine = header_affine(&reference_header());
        assert_abs_diff_eq!(-20.0, affine[[1, 3]]);
        assert_abs_diff_eq!(3.0, affine[[2, 2]]);
        assert_abs_diff_eq!(1.0, affine[[3, 3]]);
    }

    #[test]
    fn without_sform_the_voxel_sizes_are_used() {
        let mut header = NiftiHeader::default();
        header.sform_code = 0;
        header.pixdim = [1.0, 1.5, 2.0, 2.5, 1.0, 1.0, 1.0, 1.0];
        let affine = header_affine(&header);
        assert_abs_diff_eq!(array![1.5, 2.0, 2.5, 1.0], affine.diag().to_owned());
        assert_abs_diff_eq!(0.0, affine[[0, 3]]);
    }

    #[test]
    fn affines_are_inverted() {
        let affine = array![
            [0.0, 2.0, 0.0, 1.0],
            [-1.0, 0.0, 0.0, 4.0],
            [0.0, 0.0, 3.0, -2.0],
            [0.0, 0.0, 0.0, 1.0]
        ];
        let inverse = invert_affine(&affine).unwrap();
        assert_abs_diff_eq!(Array2::<f64>::eye(4), affine.dot(&inverse), epsilon = 1e-12);
        assert!(invert_affine(&Array2::<f64>::zeros((4, 4))).is_err());
    }

    #[test]
    fn binary_volumes_keep_the_reference_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = dir.path().join("t1.nii.gz");
        WriterOptions::new(&t1)
            .reference_header(&reference_header())
            .write_nifti(&Array3::<f32>::zeros((4, 5, 6)))
            .unwrap();

        let reference = ReferenceImage::from_file(&t1).unwrap();
        assert_eq!((4, 5, 6), reference.shape);
        assert_abs_diff_eq!(-10.0, reference.affine[[0, 3]]);

        let mut mask = Array3::<u8>::zeros((4, 5, 6));
        mask[[1, 2, 3]] = 1;
        let out = dir.path().join("mask.nii.gz");
        reference.write_u8_volume(&out, &mask).unwrap();
        let written = ReferenceImage::from_file(&out).unwrap();
        assert_eq!(reference.shape, written.shape);
        assert_abs_diff_eq!(reference.affine, written.affine);

        assert!(reference.write_u8_volume(&out, &Array3::<u8>::zeros((2, 2, 2))).is_err());
    }
}
