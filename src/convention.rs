//! Frame convention conversions between the rig descriptors, the estimator
//! and the reported odometry.
//!
//! * Camera extrinsics handed to the estimator are relative to the IMU:
//!   `T_BC = T_imu⁻¹ · T_cam`.
//! * Estimator poses are brought into the reporting frame with two fixed axis
//!   permutations: `P · T_WS · R`.
//! * Reported odometry is incremental: `T_prev⁻¹ · T_now`.

use crate::camera::StereoCameraModel;
use crate::transform::Transform;
use crate::types::Landmarks;

/// Axis flip applied on the left of estimator poses (negates x and y).
#[rustfmt::skip]
pub fn position_flip() -> Transform {
    Transform::from_rows(
        -1.0, 0.0, 0.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    )
}

/// Axis permutation applied on the right of estimator poses (swaps x and z,
/// negates y).
#[rustfmt::skip]
pub fn rotation_flip() -> Transform {
    Transform::from_rows(
        0.0, 0.0, 1.0, 0.0,
        0.0, -1.0, 0.0, 0.0,
        1.0, 0.0, 0.0, 0.0,
    )
}

/// Express a camera extrinsic relative to the IMU instead of the body frame.
pub fn camera_to_imu(imu_local: &Transform, camera_local: &Transform) -> Transform {
    imu_local.inverse() * *camera_local
}

/// Extrinsic of the right camera of a stereo pair, given the left one.
///
/// Unrectified pairs use the calibrated stereo rotation and translation.
/// Rectified pairs are the left extrinsic shifted by the baseline along the
/// body y axis. Returns `None` for an unrectified pair that carries no stereo
/// extrinsics.
pub fn stereo_right_extrinsic(
    left: &Transform,
    stereo: &StereoCameraModel,
    images_rectified: bool,
) -> Option<Transform> {
    if images_rectified {
        return Some(Transform::from_translation(0.0, stereo.baseline, 0.0) * *left);
    }
    let (r, t) = (stereo.r?, stereo.t?);
    Some(*left * Transform::new(r, t).inverse())
}

/// Estimator world pose in the reporting convention.
pub fn to_reporting_frame(estimator_pose: &Transform) -> Transform {
    position_flip() * *estimator_pose * rotation_flip()
}

/// Motion from the previously reported absolute pose to `current`.
pub fn incremental(previous: &Transform, current: &Transform) -> Transform {
    previous.inverse() * *current
}

/// Bring estimator landmarks into the reporting frame.
pub fn landmarks_to_reporting_frame(landmarks: &Landmarks) -> Landmarks {
    let flip = position_flip();
    landmarks
        .iter()
        .map(|(&id, p)| (id, flip.transform_point(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModel;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

    fn pose(roll: f64, pitch: f64, yaw: f64, t: [f64; 3]) -> Transform {
        let q = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        Transform::from_quaternion(&q, Vector3::from(t))
    }

    fn assert_transform_eq(a: &Transform, b: &Transform) {
        assert_relative_eq!(*a.rotation(), *b.rotation(), epsilon = 1e-12);
        assert_relative_eq!(*a.translation(), *b.translation(), epsilon = 1e-12);
    }

    #[test]
    fn test_flips_invert_to_identity() {
        for flip in [position_flip(), rotation_flip()] {
            assert_transform_eq(&(flip * flip.inverse()), &Transform::identity());
            assert_transform_eq(&(flip.inverse() * flip), &Transform::identity());
            assert_relative_eq!(flip.rotation().determinant(), 1.0);
        }
    }

    #[test]
    fn test_identity_pose_maps_to_rotation_flip_product() {
        let reported = to_reporting_frame(&Transform::identity());
        assert_transform_eq(&reported, &(position_flip() * rotation_flip()));
    }

    #[test]
    fn test_translation_axes() {
        let p = to_reporting_frame(&Transform::from_translation(1.0, 2.0, 3.0));
        assert_relative_eq!(*p.translation(), Vector3::new(-1.0, -2.0, 3.0));
    }

    #[test]
    fn test_incremental_is_deterministic() {
        let previous = pose(0.1, 0.2, 0.3, [1.0, 0.0, 0.0]);
        let absolute = pose(0.0, -0.1, 0.5, [0.5, 2.0, -1.0]);
        let corrected = to_reporting_frame(&absolute);
        let a = incremental(&previous, &corrected);
        let b = incremental(&previous, &to_reporting_frame(&absolute));
        assert_eq!(a, b);
        assert_transform_eq(&(previous * a), &corrected);
    }

    #[test]
    fn test_incremental_from_identity_is_absolute() {
        let current = pose(0.3, 0.0, 0.0, [0.0, 1.0, 0.0]);
        assert_transform_eq(&incremental(&Transform::identity(), &current), &current);
    }

    #[test]
    fn test_camera_to_imu() {
        let imu = Transform::from_translation(0.0, 0.0, 0.1);
        let cam = Transform::from_translation(0.2, 0.0, 0.1);
        let t = camera_to_imu(&imu, &cam);
        assert_relative_eq!(*t.translation(), Vector3::new(0.2, 0.0, 0.0));
        assert_transform_eq(&camera_to_imu(&Transform::identity(), &cam), &cam);
    }

    fn stereo() -> StereoCameraModel {
        let pose = Transform::identity();
        let cam = CameraModel::pinhole("cam", 640, 480, 400.0, 400.0, 320.0, 240.0, pose);
        StereoCameraModel::rectified(cam.clone(), cam, 0.12)
    }

    #[test]
    fn test_rectified_right_is_offset_by_baseline() {
        let left = pose(0.0, 0.0, std::f64::consts::FRAC_PI_2, [1.0, 0.0, 0.0]);
        let right = stereo_right_extrinsic(&left, &stereo(), true).unwrap();
        // Offset along the body y axis, whatever the left camera orientation.
        assert_relative_eq!(*right.translation(), Vector3::new(1.0, 0.12, 0.0), epsilon = 1e-12);
        assert_relative_eq!(*right.rotation(), *left.rotation());
    }

    #[test]
    fn test_rectified_right_with_optical_rotation() {
        // Optical frame: z forward, x right, y down in a x-forward body.
        #[rustfmt::skip]
        let left = Transform::from_rows(
            0.0, 0.0, 1.0, 0.0,
            -1.0, 0.0, 0.0, 0.0,
            0.0, -1.0, 0.0, 0.0,
        );
        let right = stereo_right_extrinsic(&left, &stereo(), true).unwrap();
        assert_eq!(*right.translation(), Vector3::new(0.0, 0.12, 0.0));
        assert_eq!(*right.rotation(), *left.rotation());
    }

    #[test]
    fn test_unrectified_right_uses_stereo_extrinsics() {
        // Right camera 0.1 m to the right: X_r = X_l - (0.1, 0, 0).
        let model = stereo().with_extrinsics(Matrix3::identity(), Vector3::new(-0.1, 0.0, 0.0));
        let right = stereo_right_extrinsic(&Transform::identity(), &model, false).unwrap();
        assert_relative_eq!(*right.translation(), Vector3::new(0.1, 0.0, 0.0));

        assert!(stereo_right_extrinsic(&Transform::identity(), &stereo(), false).is_none());
    }

    #[test]
    fn test_landmarks_flip() {
        let mut landmarks = Landmarks::new();
        landmarks.insert(7, Point3::new(1.0, 2.0, 3.0));
        let flipped = landmarks_to_reporting_frame(&landmarks);
        assert_eq!(flipped[&7], Point3::new(-1.0, -2.0, 3.0));
    }
}
