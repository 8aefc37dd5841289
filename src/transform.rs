//! Rigid 3D transforms used for sensor extrinsics and poses.

use std::fmt;
use std::ops::Mul;

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point3, Rotation3, Translation3, UnitQuaternion, Vector3,
};

/// A rigid body transform stored as a 3x3 rotation and a translation.
///
/// The all-zero transform is the *null* sentinel: it marks "no pose" and is
/// what the odometry driver returns when nothing could be computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The null (invalid) transform.
    pub fn null() -> Self {
        Self {
            rotation: Matrix3::zeros(),
            translation: Vector3::zeros(),
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and a translation vector.
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from the rows of a 3x4 `[R|t]` matrix.
    #[allow(clippy::too_many_arguments)]
    #[rustfmt::skip]
    pub fn from_rows(
        r11: f64, r12: f64, r13: f64, tx: f64,
        r21: f64, r22: f64, r23: f64, ty: f64,
        r31: f64, r32: f64, r33: f64, tz: f64,
    ) -> Self {
        Self {
            rotation: Matrix3::new(r11, r12, r13, r21, r22, r23, r31, r32, r33),
            translation: Vector3::new(tx, ty, tz),
        }
    }

    /// Pure translation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::new(x, y, z),
        }
    }

    pub fn from_quaternion(rotation: &UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: rotation.to_rotation_matrix().into_inner(),
            translation,
        }
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self::from_quaternion(&iso.rotation, iso.translation.vector)
    }

    pub fn is_null(&self) -> bool {
        self.rotation == Matrix3::zeros() && self.translation == Vector3::zeros()
    }

    pub fn is_identity(&self) -> bool {
        self.rotation == Matrix3::identity() && self.translation == Vector3::zeros()
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn z(&self) -> f64 {
        self.translation.z
    }

    /// Inverse of a rigid transform: `[Rᵀ | -Rᵀt]`. The inverse of null is null.
    pub fn inverse(&self) -> Self {
        if self.is_null() {
            return Self::null();
        }
        let rt = self.rotation.transpose();
        Self {
            rotation: rt,
            translation: -(rt * self.translation),
        }
    }

    /// Normalized rotation quaternion.
    ///
    /// The rotation block is re-orthonormalized first, so slightly drifted
    /// matrices coming from calibration files still yield a unit quaternion.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        let rotation = Rotation3::from_matrix(&self.rotation);
        UnitQuaternion::from_rotation_matrix(&rotation)
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.quaternion())
    }

    /// Homogeneous 4x4 matrix.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords + self.translation)
    }

    /// Roll, pitch and yaw in radians.
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        Rotation3::from_matrix_unchecked(self.rotation).euler_angles()
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        &self * &rhs
    }
}

impl Mul<&Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Transform {
        Transform {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }
        let (roll, pitch, yaw) = self.euler_angles();
        write!(
            f,
            "xyz=[{:.6}, {:.6}, {:.6}] rpy=[{:.6}, {:.6}, {:.6}]",
            self.x(),
            self.y(),
            self.z(),
            roll,
            pitch,
            yaw
        )
    }
}
