//! Driver settings and the estimator parameter file.
//!
//! The driver itself is configured with [`DriverConfig`], either built in code
//! or read from `VIO_*` environment variables. The estimator parameters are
//! loaded from a JSON file whose path is part of the driver configuration.

use std::path::Path;

use serde::Deserialize;

use crate::camera_system::CameraSystem;
use crate::transform::Transform;
use crate::{OdometryError, Result};

/// Environment variable holding the estimator configuration path.
pub const ENV_CONFIG_PATH: &str = "VIO_CONFIG_PATH";
/// Environment variable for [`DriverConfig::images_already_rectified`].
pub const ENV_IMAGES_RECTIFIED: &str = "VIO_IMAGES_RECTIFIED";
/// Environment variable for [`DriverConfig::warmup_frames`].
pub const ENV_WARMUP_FRAMES: &str = "VIO_WARMUP_FRAMES";
/// Environment variable for [`DriverConfig::report_landmarks`].
pub const ENV_REPORT_LANDMARKS: &str = "VIO_REPORT_LANDMARKS";

/// Landmarks below this quality are not published.
pub const LANDMARK_QUALITY_THRESHOLD: f64 = 1.0e-2;
/// Quality at which a landmark is considered fully converged.
pub const MAX_LANDMARK_QUALITY: f64 = 0.05;

/// Settings of the odometry driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Path of the estimator parameter file. Must be non-empty.
    pub config_path: String,
    /// Images arrive undistorted, so cameras without raw distortion fall back
    /// to the rectified intrinsics.
    pub images_already_rectified: bool,
    /// Number of ingested images before poses are reported.
    pub warmup_frames: u32,
    /// Attach the estimator landmarks to each reported pose.
    pub report_landmarks: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            config_path: String::new(),
            images_already_rectified: true,
            warmup_frames: 10,
            report_landmarks: false,
        }
    }
}

impl DriverConfig {
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from `VIO_*` environment variables, using the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            config_path: read_env_string(ENV_CONFIG_PATH, &defaults.config_path),
            images_already_rectified: read_env_bool(
                ENV_IMAGES_RECTIFIED,
                defaults.images_already_rectified,
            ),
            warmup_frames: read_env_u32(ENV_WARMUP_FRAMES, defaults.warmup_frames),
            report_landmarks: read_env_bool(ENV_REPORT_LANDMARKS, defaults.report_landmarks),
        }
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .unwrap_or(default)
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

bitflags::bitflags! {
    /// What the estimator publishes through its callbacks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PublishFlags: u8 {
        /// Landmark sets after each processed image.
        const LANDMARKS            = 1 << 0;
        /// States propagated with every IMU measurement, not only at images.
        const IMU_PROPAGATED_STATE = 1 << 1;
    }
}

/// Frame in which a published quantity is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FrameName {
    /// Body frame of the rig.
    #[default]
    #[serde(rename = "B")]
    Body,
    /// IMU sensor frame.
    #[serde(rename = "S")]
    Sensor,
    /// World frame.
    #[serde(rename = "W")]
    World,
}

/// IMU noise model and extrinsics.
#[derive(Debug, Clone, PartialEq)]
pub struct ImuParameters {
    /// Measurement rate in Hz.
    pub rate: f64,
    /// Gravity magnitude [m/s^2].
    pub g: f64,
    /// IMU pose in the body frame.
    pub t_bs: Transform,
}

impl Default for ImuParameters {
    fn default() -> Self {
        Self {
            rate: 200.0,
            g: 9.81,
            t_bs: Transform::identity(),
        }
    }
}

/// Publishing options of the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishingParameters {
    /// Maximum rate of IMU-propagated state publications in Hz.
    pub publish_rate: f64,
    pub flags: PublishFlags,
    pub landmark_quality_threshold: f64,
    pub max_landmark_quality: f64,
    pub tracked_body_frame: FrameName,
    pub velocities_frame: FrameName,
}

impl Default for PublishingParameters {
    fn default() -> Self {
        Self {
            publish_rate: 200.0,
            flags: PublishFlags::empty(),
            landmark_quality_threshold: LANDMARK_QUALITY_THRESHOLD,
            max_landmark_quality: MAX_LANDMARK_QUALITY,
            tracked_body_frame: FrameName::Body,
            velocities_frame: FrameName::Body,
        }
    }
}

impl PublishingParameters {
    /// Options the odometry driver runs the estimator with: landmarks and
    /// IMU-propagated states at the IMU rate, both in the body frame.
    pub fn for_odometry(imu_rate: f64) -> Self {
        Self {
            publish_rate: imu_rate,
            flags: PublishFlags::LANDMARKS | PublishFlags::IMU_PROPAGATED_STATE,
            landmark_quality_threshold: LANDMARK_QUALITY_THRESHOLD,
            max_landmark_quality: MAX_LANDMARK_QUALITY,
            tracked_body_frame: FrameName::Body,
            velocities_frame: FrameName::Body,
        }
    }
}

/// Everything an estimator is constructed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VioParameters {
    pub imu: ImuParameters,
    pub publishing: PublishingParameters,
    pub camera_system: CameraSystem,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ImuFile {
    rate: f64,
    g: f64,
}

impl Default for ImuFile {
    fn default() -> Self {
        let d = ImuParameters::default();
        Self {
            rate: d.rate,
            g: d.g,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PublishingFile {
    publish_rate: Option<f64>,
    publish_landmarks: bool,
    publish_imu_propagated_state: bool,
    landmark_quality_threshold: f64,
    max_landmark_quality: f64,
    tracked_body_frame: FrameName,
    velocities_frame: FrameName,
}

impl Default for PublishingFile {
    fn default() -> Self {
        Self {
            publish_rate: None,
            publish_landmarks: false,
            publish_imu_propagated_state: false,
            landmark_quality_threshold: LANDMARK_QUALITY_THRESHOLD,
            max_landmark_quality: MAX_LANDMARK_QUALITY,
            tracked_body_frame: FrameName::Body,
            velocities_frame: FrameName::Body,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ParametersFile {
    imu: ImuFile,
    publishing: PublishingFile,
    cameras: Vec<serde_json::Value>,
}

impl VioParameters {
    /// Load estimator parameters from a JSON file.
    ///
    /// Camera calibrations found in the file are discarded: cameras always
    /// come from the sensor data.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(OdometryError::Config(
                "estimator configuration path is empty".into(),
            ));
        }
        let text = std::fs::read_to_string(path).map_err(|source| OdometryError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse estimator parameters from JSON text. Missing sections take
    /// their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: ParametersFile = serde_json::from_str(text)?;

        if !file.cameras.is_empty() {
            log::warn!(
                "Ignoring {} camera calibration(s) in the estimator configuration",
                file.cameras.len()
            );
        }

        let mut flags = PublishFlags::empty();
        flags.set(PublishFlags::LANDMARKS, file.publishing.publish_landmarks);
        flags.set(
            PublishFlags::IMU_PROPAGATED_STATE,
            file.publishing.publish_imu_propagated_state,
        );

        Ok(Self {
            imu: ImuParameters {
                rate: file.imu.rate,
                g: file.imu.g,
                t_bs: Transform::identity(),
            },
            publishing: PublishingParameters {
                publish_rate: file.publishing.publish_rate.unwrap_or(file.imu.rate),
                flags,
                landmark_quality_threshold: file.publishing.landmark_quality_threshold,
                max_landmark_quality: file.publishing.max_landmark_quality,
                tracked_body_frame: file.publishing.tracked_body_frame,
                velocities_frame: file.publishing.velocities_frame,
            },
            camera_system: CameraSystem::new(),
        })
    }
}
