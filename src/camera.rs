//! Per-camera calibration descriptors as received with the sensor data.

use nalgebra::{Matrix3, Vector3};

use crate::transform::Transform;

/// Calibration of one camera.
///
/// `k` is the rectified intrinsic matrix. Unrectified cameras additionally
/// carry the raw intrinsics `k_raw` and distortion coefficients `d_raw`
/// (OpenCV ordering: `k1 k2 p1 p2 [k3 [k4 k5 k6]]`, or `k1 k2 _ _ k3 k4` for
/// the 6-value fisheye variant).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    pub name: String,
    pub image_width: u32,
    pub image_height: u32,
    pub k: Matrix3<f64>,
    pub k_raw: Option<Matrix3<f64>>,
    pub d_raw: Vec<f64>,
    /// Camera optical frame relative to the body frame.
    pub local_transform: Transform,
}

impl CameraModel {
    /// Rectified pinhole camera without distortion.
    #[allow(clippy::too_many_arguments)]
    pub fn pinhole(
        name: impl Into<String>,
        image_width: u32,
        image_height: u32,
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        local_transform: Transform,
    ) -> Self {
        Self {
            name: name.into(),
            image_width,
            image_height,
            k: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            k_raw: None,
            d_raw: Vec::new(),
            local_transform,
        }
    }

    /// Attach raw intrinsics and distortion coefficients.
    pub fn with_raw(mut self, k_raw: Matrix3<f64>, d_raw: Vec<f64>) -> Self {
        self.k_raw = Some(k_raw);
        self.d_raw = d_raw;
        self
    }

    pub fn fx(&self) -> f64 {
        self.k[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.k[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.k[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.k[(1, 2)]
    }

    /// Intrinsics to pair with the raw distortion, falling back to `k`.
    pub fn raw_intrinsics(&self) -> &Matrix3<f64> {
        self.k_raw.as_ref().unwrap_or(&self.k)
    }

    pub fn is_valid_for_projection(&self) -> bool {
        self.fx() > 0.0
            && self.fy() > 0.0
            && self.cx() > 0.0
            && self.cy() > 0.0
            && !self.local_transform.is_null()
    }
}

/// Calibration of a stereo pair.
///
/// `r` and `t` map points from the left camera frame into the right camera
/// frame (`X_r = R X_l + T`). They are only needed when the images are not
/// rectified; rectified pairs are fully described by the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoCameraModel {
    pub left: CameraModel,
    pub right: CameraModel,
    pub r: Option<Matrix3<f64>>,
    pub t: Option<Vector3<f64>>,
    /// Distance between the optical centers in meters.
    pub baseline: f64,
}

impl StereoCameraModel {
    pub fn rectified(left: CameraModel, right: CameraModel, baseline: f64) -> Self {
        Self {
            left,
            right,
            r: None,
            t: None,
            baseline,
        }
    }

    pub fn with_extrinsics(mut self, r: Matrix3<f64>, t: Vector3<f64>) -> Self {
        self.r = Some(r);
        self.t = Some(t);
        self
    }

    pub fn is_valid_for_projection(&self) -> bool {
        self.left.is_valid_for_projection()
            && self.right.is_valid_for_projection()
            && self.baseline > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CameraModel {
        CameraModel::pinhole("cam0", 640, 480, 450.0, 451.0, 320.0, 240.0, Transform::identity())
    }

    #[test]
    fn test_intrinsics_accessors() {
        let m = model();
        assert_eq!(m.fx(), 450.0);
        assert_eq!(m.fy(), 451.0);
        assert_eq!(m.cx(), 320.0);
        assert_eq!(m.cy(), 240.0);
        assert_eq!(m.raw_intrinsics(), &m.k);
    }

    #[test]
    fn test_validity() {
        assert!(model().is_valid_for_projection());

        let mut no_focal = model();
        no_focal.k[(0, 0)] = 0.0;
        assert!(!no_focal.is_valid_for_projection());

        let mut no_extrinsic = model();
        no_extrinsic.local_transform = Transform::null();
        assert!(!no_extrinsic.is_valid_for_projection());
    }

    #[test]
    fn test_stereo_validity_needs_baseline() {
        assert!(StereoCameraModel::rectified(model(), model(), 0.11).is_valid_for_projection());
        assert!(!StereoCameraModel::rectified(model(), model(), 0.0).is_valid_for_projection());
    }
}
