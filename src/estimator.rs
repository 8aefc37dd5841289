//! Contract between the odometry driver and a visual-inertial estimator.
//!
//! The estimator is opaque: the driver only feeds it measurements and
//! receives results through callbacks, which may run on any thread.

use std::sync::Arc;

use nalgebra::{SVector, Vector3};

use crate::config::VioParameters;
use crate::transform::Transform;
use crate::types::{Image, MapPoint};
use crate::Result;

/// Full estimator state at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullState {
    /// State time in seconds.
    pub stamp: f64,
    /// Pose of the tracked body frame in the estimator world frame (`T_WS`).
    pub t_ws: Transform,
    /// Velocity (world frame), gyro bias and accelerometer bias, stacked.
    pub speed_and_biases: SVector<f64, 9>,
    /// Bias-corrected angular rate in the sensor frame.
    pub omega_s: Vector3<f64>,
}

impl FullState {
    pub fn velocity(&self) -> Vector3<f64> {
        self.speed_and_biases.fixed_rows::<3>(0).into_owned()
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.speed_and_biases.fixed_rows::<3>(3).into_owned()
    }

    pub fn accel_bias(&self) -> Vector3<f64> {
        self.speed_and_biases.fixed_rows::<3>(6).into_owned()
    }
}

/// Called with every published state.
pub type FullStateCallback = Arc<dyn Fn(&FullState) + Send + Sync>;

/// Called with the stamp and the landmark set after each processed image.
pub type LandmarksCallback = Arc<dyn Fn(f64, &[MapPoint]) + Send + Sync>;

/// Measurement ingestion and result publication of an estimator.
///
/// The `add_*` methods return `false` when the measurement was not accepted,
/// typically because a non-blocking estimator is still busy.
pub trait Estimator: Send {
    /// Submit an IMU measurement (acceleration, angular velocity).
    fn add_imu_measurement(
        &mut self,
        stamp: f64,
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
    ) -> bool;

    /// Submit a single-channel image for the camera at `camera_index`.
    fn add_image(&mut self, stamp: f64, camera_index: usize, image: &Image) -> bool;

    /// When blocking, submissions wait until the estimator can take them.
    fn set_blocking(&mut self, blocking: bool);

    fn set_full_state_callback(&mut self, callback: FullStateCallback);

    fn set_landmarks_callback(&mut self, callback: LandmarksCallback);
}

/// Creates estimators for the driver once the calibration is known.
pub trait EstimatorFactory: Send {
    fn create(&self, params: &VioParameters) -> Result<Box<dyn Estimator>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_components() {
        let state = FullState {
            stamp: 1.0,
            t_ws: Transform::identity(),
            speed_and_biases: SVector::<f64, 9>::from_column_slice(&[
                1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.01, 0.02, 0.03,
            ]),
            omega_s: Vector3::zeros(),
        };
        assert_eq!(state.velocity(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(state.gyro_bias(), Vector3::new(0.1, 0.2, 0.3));
        assert_eq!(state.accel_bias(), Vector3::new(0.01, 0.02, 0.03));
    }
}
