//! Camera projection models and the multi-camera system handed to the
//! estimator.
//!
//! [`build_camera`] turns a [`CameraModel`] descriptor into a
//! [`PinholeCamera`]. The distortion family is picked from the number of raw
//! coefficients, in this priority order:
//!
//! | coefficients | model                                  |
//! |--------------|----------------------------------------|
//! | 8            | radial-tangential, 8 parameters        |
//! | 6            | equidistant (fisheye), `d[0,1,4,5]`    |
//! | >= 4         | radial-tangential, first 4 parameters  |
//! | otherwise    | undistorted, only for rectified images |

use nalgebra::{Matrix3, Point2, Point3, Vector2};

use crate::camera::CameraModel;
use crate::transform::Transform;

/// Distortion tag registered with each camera of a [`CameraSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistortionType {
    RadialTangential,
    Equidistant,
    RadialTangential8,
}

/// Lens distortion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    RadialTangential {
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
    },
    RadialTangential8 {
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        k3: f64,
        k4: f64,
        k5: f64,
        k6: f64,
    },
    Equidistant {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
    },
}

impl Distortion {
    /// Radial-tangential model with all coefficients zero.
    pub fn none() -> Self {
        Distortion::RadialTangential {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    pub fn distortion_type(&self) -> DistortionType {
        match self {
            Distortion::RadialTangential { .. } => DistortionType::RadialTangential,
            Distortion::RadialTangential8 { .. } => DistortionType::RadialTangential8,
            Distortion::Equidistant { .. } => DistortionType::Equidistant,
        }
    }

    /// Apply distortion to a point on the normalized image plane.
    pub fn distort(&self, p: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        match *self {
            Distortion::RadialTangential { k1, k2, p1, p2 } => {
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
                tangential(x, y, r2, radial, p1, p2)
            }
            Distortion::RadialTangential8 {
                k1,
                k2,
                p1,
                p2,
                k3,
                k4,
                k5,
                k6,
            } => {
                let r4 = r2 * r2;
                let r6 = r4 * r2;
                let radial =
                    (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
                tangential(x, y, r2, radial, p1, p2)
            }
            Distortion::Equidistant { k1, k2, k3, k4 } => {
                let r = r2.sqrt();
                if r < 1e-12 {
                    return *p;
                }
                let theta = r.atan();
                let t2 = theta * theta;
                let theta_d = theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))));
                p * (theta_d / r)
            }
        }
    }
}

fn tangential(x: f64, y: f64, r2: f64, radial: f64, p1: f64, p2: f64) -> Vector2<f64> {
    Vector2::new(
        x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
        y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
    )
}

/// Pinhole projection with lens distortion.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub distortion: Distortion,
}

impl PinholeCamera {
    fn from_intrinsics(width: u32, height: u32, k: &Matrix3<f64>, distortion: Distortion) -> Self {
        Self {
            width,
            height,
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            distortion,
        }
    }

    pub fn distortion_type(&self) -> DistortionType {
        self.distortion.distortion_type()
    }

    /// Project a point given in the camera frame to pixel coordinates.
    ///
    /// Returns `None` for points behind the camera or outside the image.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        let d = self.distortion.distort(&Vector2::new(p.x / p.z, p.y / p.z));
        let u = self.fx * d.x + self.cx;
        let v = self.fy * d.y + self.cy;
        let inside = u >= -0.5
            && v >= -0.5
            && u < self.width as f64 - 0.5
            && v < self.height as f64 - 0.5;
        inside.then(|| Point2::new(u, v))
    }
}

/// Build the projection model for one camera.
///
/// Returns `None` when the coefficient count matches no distortion family and
/// the images are not rectified; such a camera cannot be used.
pub fn build_camera(model: &CameraModel, images_rectified: bool) -> Option<PinholeCamera> {
    let d = &model.d_raw;
    let (k, distortion) = match d.len() {
        8 => (
            model.raw_intrinsics(),
            Distortion::RadialTangential8 {
                k1: d[0],
                k2: d[1],
                p1: d[2],
                p2: d[3],
                k3: d[4],
                k4: d[5],
                k5: d[6],
                k6: d[7],
            },
        ),
        6 => (
            model.raw_intrinsics(),
            Distortion::Equidistant {
                k1: d[0],
                k2: d[1],
                k3: d[4],
                k4: d[5],
            },
        ),
        n if n >= 4 => (
            model.raw_intrinsics(),
            Distortion::RadialTangential {
                k1: d[0],
                k2: d[1],
                p1: d[2],
                p2: d[3],
            },
        ),
        _ if images_rectified => (&model.k, Distortion::none()),
        n => {
            log::warn!(
                "Camera \"{}\": no distortion model for {} coefficients on raw images, skipped",
                model.name,
                n
            );
            return None;
        }
    };
    log::info!(
        "Camera \"{}\": {:?} distortion",
        model.name,
        distortion.distortion_type()
    );
    Some(PinholeCamera::from_intrinsics(
        model.image_width,
        model.image_height,
        k,
        distortion,
    ))
}

/// A camera registered in a [`CameraSystem`].
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEntry {
    /// Camera pose in the IMU/body frame, rotation normalized.
    pub t_sc: Transform,
    pub camera: PinholeCamera,
    pub distortion_type: DistortionType,
}

/// The set of cameras the estimator observes, indexed by registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSystem {
    cameras: Vec<CameraEntry>,
}

impl CameraSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera and return its index.
    ///
    /// The extrinsic is stored as normalized quaternion plus translation.
    pub fn add_camera(
        &mut self,
        t_sc: &Transform,
        camera: PinholeCamera,
        distortion_type: DistortionType,
    ) -> usize {
        let t_sc = Transform::from_quaternion(&t_sc.quaternion(), *t_sc.translation());
        log::info!("Camera {}: T_SC {}", self.cameras.len(), t_sc);
        self.cameras.push(CameraEntry {
            t_sc,
            camera,
            distortion_type,
        });
        self.cameras.len() - 1
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn camera(&self, index: usize) -> Option<&CameraEntry> {
        self.cameras.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn model_with(d_raw: Vec<f64>) -> CameraModel {
        let k_raw = Matrix3::new(460.0, 0.0, 322.0, 0.0, 461.0, 241.0, 0.0, 0.0, 1.0);
        CameraModel::pinhole("cam", 640, 480, 450.0, 450.0, 320.0, 240.0, Transform::identity())
            .with_raw(k_raw, d_raw)
    }

    fn family(len: usize, rectified: bool) -> Option<DistortionType> {
        let d: Vec<f64> = (0..len).map(|i| 0.01 * (i + 1) as f64).collect();
        build_camera(&model_with(d), rectified).map(|c| c.distortion_type())
    }

    #[test]
    fn test_family_by_coefficient_count() {
        for rectified in [false, true] {
            assert_eq!(family(8, rectified), Some(DistortionType::RadialTangential8));
            assert_eq!(family(6, rectified), Some(DistortionType::Equidistant));
            assert_eq!(family(4, rectified), Some(DistortionType::RadialTangential));
            assert_eq!(family(5, rectified), Some(DistortionType::RadialTangential));
            assert_eq!(family(7, rectified), Some(DistortionType::RadialTangential));
        }
        assert_eq!(family(0, true), Some(DistortionType::RadialTangential));
    }

    #[test]
    fn test_unmatched_counts_produce_no_camera() {
        for len in [0, 1, 2, 3] {
            assert_eq!(family(len, false), None, "length {}", len);
        }
        for len in [1, 2, 3] {
            assert!(family(len, true).is_some(), "length {}", len);
        }
    }

    #[test]
    fn test_rectified_fallback_uses_rectified_intrinsics() {
        let cam = build_camera(&model_with(Vec::new()), true).unwrap();
        assert_eq!(cam.distortion, Distortion::none());
        assert_eq!((cam.fx, cam.cx, cam.cy), (450.0, 320.0, 240.0));
    }

    #[test]
    fn test_raw_branches_use_raw_intrinsics() {
        let cam = build_camera(&model_with(vec![0.1, 0.2, 0.3, 0.4]), false).unwrap();
        assert_eq!((cam.fx, cam.fy, cam.cx, cam.cy), (460.0, 461.0, 322.0, 241.0));
        assert_eq!(
            cam.distortion,
            Distortion::RadialTangential {
                k1: 0.1,
                k2: 0.2,
                p1: 0.3,
                p2: 0.4
            }
        );
    }

    #[test]
    fn test_equidistant_takes_outer_coefficients() {
        let cam = build_camera(&model_with(vec![0.1, 0.2, 9.0, 9.0, 0.3, 0.4]), false).unwrap();
        assert_eq!(
            cam.distortion,
            Distortion::Equidistant {
                k1: 0.1,
                k2: 0.2,
                k3: 0.3,
                k4: 0.4
            }
        );
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let p = Vector2::new(0.3, -0.2);
        assert_relative_eq!(Distortion::none().distort(&p), p, epsilon = 1e-15);
        let rt8 = Distortion::RadialTangential8 {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
            k4: 0.0,
            k5: 0.0,
            k6: 0.0,
        };
        assert_relative_eq!(rt8.distort(&p), p, epsilon = 1e-15);
    }

    #[test]
    fn test_equidistant_compresses_wide_angles() {
        let eq = Distortion::Equidistant {
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            k4: 0.0,
        };
        let d = eq.distort(&Vector2::new(1.0, 0.0));
        assert_relative_eq!(d.x, std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(eq.distort(&Vector2::zeros()), Vector2::zeros());
    }

    #[test]
    fn test_project() {
        let cam = build_camera(&model_with(Vec::new()), true).unwrap();
        let px = cam.project(&Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(px, Point2::new(320.0, 240.0));
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project(&Point3::new(10.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn test_camera_system_normalizes_extrinsic() {
        let q = UnitQuaternion::from_euler_angles(0.2, 0.0, -0.3);
        let mut rotation = q.to_rotation_matrix().into_inner();
        rotation *= 1.0 + 1e-7;
        let t = Transform::new(rotation, Vector3::new(0.05, 0.0, 0.0));

        let mut system = CameraSystem::new();
        let cam = build_camera(&model_with(Vec::new()), true).unwrap();
        let index = system.add_camera(&t, cam, DistortionType::RadialTangential);

        assert_eq!(index, 0);
        assert_eq!(system.num_cameras(), 1);
        let entry = system.camera(0).unwrap();
        assert_relative_eq!(entry.t_sc.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(entry.t_sc.rotation().determinant(), 1.0, epsilon = 1e-9);
        assert_eq!(entry.t_sc.x(), 0.05);
    }
}
