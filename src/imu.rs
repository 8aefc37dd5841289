//! IMU measurement type.

use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};

use crate::transform::Transform;
use crate::{OdometryError, Result};

/// A single inertial measurement, modelled on `sensor_msgs/Imu`.
///
/// Each quantity carries a 3x3 covariance (row-major about x, y, z). A
/// covariance is `None` when the matching quantity was not measured, and the
/// sample is *empty* when none of them is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuSample {
    orientation: UnitQuaternion<f64>,
    orientation_covariance: Option<Matrix3<f64>>,
    angular_velocity: Vector3<f64>,
    angular_velocity_covariance: Option<Matrix3<f64>>,
    linear_acceleration: Vector3<f64>,
    linear_acceleration_covariance: Option<Matrix3<f64>>,
    local_transform: Transform,
}

impl Default for ImuSample {
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            orientation_covariance: None,
            angular_velocity: Vector3::zeros(),
            angular_velocity_covariance: None,
            linear_acceleration: Vector3::zeros(),
            linear_acceleration_covariance: None,
            local_transform: Transform::identity(),
        }
    }
}

fn check_covariance(name: &'static str, cov: &DMatrix<f64>) -> Result<Matrix3<f64>> {
    if cov.nrows() != 3 || cov.ncols() != 3 {
        return Err(OdometryError::InvalidCovariance {
            name,
            rows: cov.nrows(),
            cols: cov.ncols(),
        });
    }
    Ok(cov.fixed_view::<3, 3>(0, 0).into_owned())
}

impl ImuSample {
    /// Sample with gyroscope and accelerometer readings only.
    ///
    /// `local_transform` is the IMU pose relative to the rig's body frame.
    pub fn new(
        angular_velocity: Vector3<f64>,
        angular_velocity_covariance: &DMatrix<f64>,
        linear_acceleration: Vector3<f64>,
        linear_acceleration_covariance: &DMatrix<f64>,
        local_transform: Transform,
    ) -> Result<Self> {
        Ok(Self {
            angular_velocity,
            angular_velocity_covariance: Some(check_covariance(
                "angular velocity",
                angular_velocity_covariance,
            )?),
            linear_acceleration,
            linear_acceleration_covariance: Some(check_covariance(
                "linear acceleration",
                linear_acceleration_covariance,
            )?),
            local_transform,
            ..Self::default()
        })
    }

    /// Sample that also carries an orientation estimate.
    #[allow(clippy::too_many_arguments)]
    pub fn with_orientation(
        orientation: UnitQuaternion<f64>,
        orientation_covariance: &DMatrix<f64>,
        angular_velocity: Vector3<f64>,
        angular_velocity_covariance: &DMatrix<f64>,
        linear_acceleration: Vector3<f64>,
        linear_acceleration_covariance: &DMatrix<f64>,
        local_transform: Transform,
    ) -> Result<Self> {
        let mut sample = Self::new(
            angular_velocity,
            angular_velocity_covariance,
            linear_acceleration,
            linear_acceleration_covariance,
            local_transform,
        )?;
        sample.orientation = orientation;
        sample.orientation_covariance =
            Some(check_covariance("orientation", orientation_covariance)?);
        Ok(sample)
    }

    pub fn is_empty(&self) -> bool {
        self.orientation_covariance.is_none()
            && self.angular_velocity_covariance.is_none()
            && self.linear_acceleration_covariance.is_none()
    }

    pub fn orientation(&self) -> &UnitQuaternion<f64> {
        &self.orientation
    }

    pub fn orientation_covariance(&self) -> Option<&Matrix3<f64>> {
        self.orientation_covariance.as_ref()
    }

    pub fn angular_velocity(&self) -> &Vector3<f64> {
        &self.angular_velocity
    }

    pub fn angular_velocity_covariance(&self) -> Option<&Matrix3<f64>> {
        self.angular_velocity_covariance.as_ref()
    }

    pub fn linear_acceleration(&self) -> &Vector3<f64> {
        &self.linear_acceleration
    }

    pub fn linear_acceleration_covariance(&self) -> Option<&Matrix3<f64>> {
        self.linear_acceleration_covariance.as_ref()
    }

    /// IMU pose in the body frame.
    pub fn local_transform(&self) -> &Transform {
        &self.local_transform
    }
}
