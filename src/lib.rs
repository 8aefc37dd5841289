//! # vio-odometry - visual-inertial odometry driver
//!
//! Drives an asynchronous visual-inertial estimator from raw camera and IMU
//! samples. Provides:
//! - Camera calibration and lens distortion selection per camera
//! - Frame conventions between the rig, the estimator and reported odometry
//! - Thread-safe handoff of the latest estimator pose and landmarks
//! - A threaded estimator host with an IMU propagation back-end
//!
//! ## Quick Start
//! ```no_run
//! use vio_odometry::{DriverConfig, ImuPropagator, SensorData};
//! use vio_odometry::{ThreadedEstimatorFactory, VioOdometry, VioParameters};
//!
//! let factory = ThreadedEstimatorFactory::new(|p: &VioParameters| ImuPropagator::new(&p.imu));
//! let mut odom = VioOdometry::new(DriverConfig::from_env(), Box::new(factory));
//!
//! let data = SensorData::default();
//! let update = odom.process(&data).unwrap();
//! if !update.is_null() {
//!     println!("moved: {}", update.transform);
//! }
//! ```

pub mod error;
pub mod transform;
pub mod imu;
pub mod camera;
pub mod types;
pub mod camera_system;
pub mod convention;
pub mod handoff;
pub mod config;
pub mod estimator;
pub mod threaded;
pub mod propagation;
pub mod driver;

pub use error::OdometryError;
pub use types::*;
pub use transform::Transform;
pub use imu::ImuSample;
pub use camera::{CameraModel, StereoCameraModel};
pub use config::{DriverConfig, VioParameters};
pub use estimator::{Estimator, EstimatorFactory, FullState};
pub use threaded::{Backend, ThreadedEstimator, ThreadedEstimatorFactory};
pub use propagation::ImuPropagator;
pub use driver::{DriverState, VioOdometry};

/// Result type alias for odometry operations.
pub type Result<T> = std::result::Result<T, OdometryError>;
