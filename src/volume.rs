//! NIfTI volume loading and voxel/world coordinate transforms

use crate::structs::{Affine, InsightError, Result, Volume};
use nalgebra::{Matrix3, Matrix4, Vector4};
use ndarray::{ArrayD, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// A volume as stored on disk, before its dimensionality is checked
#[derive(Debug, Clone)]
pub struct RawVolume {
    pub data: ArrayD<f32>,
    pub affine: Affine,
}

/// Read any NIfTI-1 file (`.nii` or `.nii.gz`) into an `f32` array.
///
/// Intensity scaling from the header is applied by the reader.
///
/// # Errors
/// Returns `Volume` naming the file if it cannot be read or decoded
pub fn read_nifti(path: &Path) -> Result<RawVolume> {
    let volume_error = |reason: String| InsightError::Volume {
        path: path.to_path_buf(),
        reason,
    };

    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(|e| volume_error(e.to_string()))?;
    let affine = Affine::from_header(obj.header()).map_err(|e| volume_error(e.to_string()))?;
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| volume_error(e.to_string()))?;

    Ok(RawVolume { data, affine })
}

/// Load a 3D statistical map. A 4D file with a single volume is squeezed.
///
/// # Errors
/// Returns `Volume` if the file is unreadable or not a single 3D volume
pub fn load_volume(path: &Path) -> Result<Volume> {
    let raw = read_nifti(path)?;
    let shape = raw.data.shape().to_vec();

    let data = match shape.len() {
        3 => raw.data,
        4 if shape[3] == 1 => raw.data.index_axis_move(Axis(3), 0),
        _ => {
            return Err(InsightError::Volume {
                path: path.to_path_buf(),
                reason: format!("expected a single 3D volume, got shape {shape:?}"),
            })
        }
    };

    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|e| InsightError::Volume {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(Volume {
        data,
        affine: raw.affine,
    })
}

impl Affine {
    /// Build from a voxel-to-world matrix
    ///
    /// # Errors
    /// Returns `Config` if the matrix is not invertible
    pub fn from_matrix(matrix: Matrix4<f64>) -> Result<Self> {
        let inverse = matrix
            .try_inverse()
            .ok_or_else(|| InsightError::Config("affine matrix is singular".into()))?;
        Ok(Self { matrix, inverse })
    }

    /// Diagonal scaling with translation, mostly useful for synthetic volumes
    ///
    /// # Errors
    /// Returns `Config` if any voxel size is zero
    pub fn scaled(voxel_size: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        #[rustfmt::skip]
        let matrix = Matrix4::new(
            voxel_size[0], 0.0, 0.0, origin[0],
            0.0, voxel_size[1], 0.0, origin[1],
            0.0, 0.0, voxel_size[2], origin[2],
            0.0, 0.0, 0.0, 1.0,
        );
        Self::from_matrix(matrix)
    }

    /// Read the transform from a header: sform, then qform, then pixdim.
    ///
    /// # Errors
    /// Returns `Config` if the resulting matrix is singular
    pub fn from_header(header: &NiftiHeader) -> Result<Self> {
        Self::from_matrix(header.affine::<f64>())
    }

    #[must_use]
    pub fn voxel_to_world(&self, voxel: [f64; 3]) -> [f64; 3] {
        apply(&self.matrix, voxel)
    }

    #[must_use]
    pub fn world_to_voxel(&self, world: [f64; 3]) -> [f64; 3] {
        apply(&self.inverse, world)
    }

    /// Volume of one voxel in cubic millimetres
    #[must_use]
    pub fn voxel_volume(&self) -> f64 {
        let m = &self.matrix;
        Matrix3::from_fn(|r, c| m[(r, c)]).determinant().abs()
    }

    /// Nearest voxel to a world coordinate, clamped into `dims`.
    ///
    /// `None` when the coordinate is not finite or an axis is empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn nearest_voxel(&self, world: [f64; 3], dims: [usize; 3]) -> Option<[usize; 3]> {
        if world.iter().any(|v| !v.is_finite()) || dims.contains(&0) {
            return None;
        }

        let voxel = self.world_to_voxel(world);
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let rounded = voxel[axis].round();
            if !rounded.is_finite() {
                return None;
            }
            let max = (dims[axis] - 1) as f64;
            out[axis] = rounded.clamp(0.0, max) as usize;
        }
        Some(out)
    }
}

fn apply(m: &Matrix4<f64>, p: [f64; 3]) -> [f64; 3] {
    let v = m * Vector4::new(p[0], p[1], p[2], 1.0);
    [v.x, v.y, v.z]
}
