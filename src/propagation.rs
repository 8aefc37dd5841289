//! Inertial dead-reckoning back-end.
//!
//! Integrates gyroscope and accelerometer samples into a pose with midpoint
//! integration, starting from an orientation aligned with gravity. Images only
//! timestamp the published states; there is no visual correction, so drift
//! grows without bound. Used by the demo and to exercise the threaded host.

use nalgebra::{SVector, UnitQuaternion, Vector3};

use crate::config::ImuParameters;
use crate::estimator::FullState;
use crate::threaded::Backend;
use crate::transform::Transform;
use crate::types::Image;

#[derive(Debug, Clone, Copy)]
struct ImuReading {
    stamp: f64,
    accel: Vector3<f64>,
    gyro: Vector3<f64>,
}

/// IMU propagation state in the world frame, z up.
pub struct ImuPropagator {
    gravity: Vector3<f64>,
    t_bs: Transform,
    gyro_bias: Vector3<f64>,
    accel_bias: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    last: Option<ImuReading>,
    images: u64,
}

impl ImuPropagator {
    pub fn new(params: &ImuParameters) -> Self {
        Self {
            gravity: Vector3::new(0.0, 0.0, -params.g),
            t_bs: params.t_bs,
            gyro_bias: Vector3::zeros(),
            accel_bias: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            last: None,
            images: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.last.is_some()
    }

    /// Number of images seen after initialization.
    pub fn images(&self) -> u64 {
        self.images
    }

    /// Align the initial orientation so that the measured specific force
    /// points along world +z.
    fn init_from(&mut self, accel: &Vector3<f64>) {
        self.rotation = UnitQuaternion::rotation_between(accel, &Vector3::z())
            .unwrap_or_else(UnitQuaternion::identity);
        log::info!(
            "IMU propagation initialized, roll {:.3} pitch {:.3}",
            self.rotation.euler_angles().0,
            self.rotation.euler_angles().1
        );
    }

    fn integrate(&mut self, prev: &ImuReading, curr: &ImuReading) {
        let dt = curr.stamp - prev.stamp;
        let omega = 0.5 * (prev.gyro + curr.gyro) - self.gyro_bias;
        let accel_sensor = 0.5 * (prev.accel + curr.accel) - self.accel_bias;

        self.rotation *= UnitQuaternion::from_scaled_axis(omega * dt);
        let accel_world = self.rotation * accel_sensor + self.gravity;

        self.position += self.velocity * dt + 0.5 * accel_world * dt * dt;
        self.velocity += accel_world * dt;
    }

    fn state(&self, stamp: f64) -> FullState {
        let t_ws = Transform::from_quaternion(&self.rotation, self.position);
        let mut speed_and_biases = SVector::<f64, 9>::zeros();
        speed_and_biases.fixed_rows_mut::<3>(0).copy_from(&self.velocity);
        speed_and_biases.fixed_rows_mut::<3>(3).copy_from(&self.gyro_bias);
        speed_and_biases.fixed_rows_mut::<3>(6).copy_from(&self.accel_bias);
        FullState {
            stamp,
            // Published for the body frame rather than the IMU.
            t_ws: t_ws * self.t_bs.inverse(),
            speed_and_biases,
            omega_s: self.last.map_or_else(Vector3::zeros, |r| r.gyro - self.gyro_bias),
        }
    }
}

impl Backend for ImuPropagator {
    fn process_imu(
        &mut self,
        stamp: f64,
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
    ) -> Option<FullState> {
        let curr = ImuReading {
            stamp,
            accel: *accel,
            gyro: *gyro,
        };
        match self.last {
            None => self.init_from(accel),
            Some(prev) if stamp <= prev.stamp => {
                log::warn!(
                    "IMU measurement at {:.6} not after previous {:.6}, dropped",
                    stamp,
                    prev.stamp
                );
                return None;
            }
            Some(prev) => self.integrate(&prev, &curr),
        }
        self.last = Some(curr);
        Some(self.state(stamp))
    }

    fn process_image(
        &mut self,
        stamp: f64,
        camera_index: usize,
        image: &Image,
    ) -> Option<FullState> {
        if !self.is_initialized() {
            log::debug!("Image from camera {} before first IMU measurement", camera_index);
            return None;
        }
        log::trace!(
            "Image {} from camera {} ({}x{})",
            self.images,
            camera_index,
            image.width(),
            image.height()
        );
        self.images += 1;
        Some(self.state(stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;
    use approx::assert_relative_eq;

    const G: f64 = 9.81;

    fn feed(
        prop: &mut ImuPropagator,
        samples: usize,
        rate: f64,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
    ) -> FullState {
        let mut last = None;
        for i in 0..=samples {
            last = prop.process_imu(i as f64 / rate, &accel, &gyro);
        }
        last.unwrap()
    }

    #[test]
    fn test_static_stays_put() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        let state = feed(&mut prop, 200, 200.0, Vector3::new(0.0, 0.0, G), Vector3::zeros());
        assert_relative_eq!(*state.t_ws.translation(), Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(state.velocity(), Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(*state.t_ws.rotation(), nalgebra::Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_constant_yaw_rate() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        let gyro = Vector3::new(0.0, 0.0, 0.5);
        let state = feed(&mut prop, 100, 100.0, Vector3::new(0.0, 0.0, G), gyro);
        let (roll, pitch, yaw) = state.t_ws.euler_angles();
        assert_relative_eq!(yaw, 0.5, epsilon = 1e-9);
        assert_relative_eq!(roll, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-9);
        assert_relative_eq!(state.omega_s, Vector3::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn test_constant_acceleration() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        // Gravity along z plus 1 m/s^2 forward. The initial alignment tilts
        // towards the total force, so start level with a pure gravity sample.
        prop.process_imu(0.0, &Vector3::new(0.0, 0.0, G), &Vector3::zeros());
        let accel = Vector3::new(1.0, 0.0, G);
        let mut state = None;
        for i in 1..=100 {
            state = prop.process_imu(i as f64 * 0.01, &accel, &Vector3::zeros());
        }
        let state = state.unwrap();
        // Midpoint of the first step averages in the gravity-only sample.
        assert_relative_eq!(state.velocity().x, 0.995, epsilon = 1e-9);
        assert_relative_eq!(state.t_ws.x(), 0.495025, epsilon = 1e-9);
    }

    #[test]
    fn test_initial_alignment_to_gravity() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        let tilted = Vector3::new(0.0, G * 0.5_f64.sin(), G * 0.5_f64.cos());
        let state = prop.process_imu(0.0, &tilted, &Vector3::zeros()).unwrap();
        let up = state.t_ws.rotation() * tilted.normalize();
        assert_relative_eq!(up, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        let accel = Vector3::new(0.0, 0.0, G);
        assert!(prop.process_imu(1.0, &accel, &Vector3::zeros()).is_some());
        assert!(prop.process_imu(1.0, &accel, &Vector3::zeros()).is_none());
        assert!(prop.process_imu(0.5, &accel, &Vector3::zeros()).is_none());
    }

    #[test]
    fn test_image_needs_imu() {
        let mut prop = ImuPropagator::new(&ImuParameters::default());
        let image = Image::filled(4, 4, PixelFormat::Mono8, 0);
        assert!(prop.process_image(0.0, 0, &image).is_none());
        prop.process_imu(0.0, &Vector3::new(0.0, 0.0, G), &Vector3::zeros());
        let state = prop.process_image(0.01, 0, &image).unwrap();
        assert_eq!(state.stamp, 0.01);
        assert_eq!(prop.images(), 1);
    }

    #[test]
    fn test_body_frame_offset() {
        let params = ImuParameters {
            t_bs: Transform::from_translation(0.0, 0.0, 0.1),
            ..ImuParameters::default()
        };
        let mut prop = ImuPropagator::new(&params);
        let state = prop.process_imu(0.0, &Vector3::new(0.0, 0.0, G), &Vector3::zeros()).unwrap();
        assert_relative_eq!(state.t_ws.z(), -0.1, epsilon = 1e-12);
    }
}
