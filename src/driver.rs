//! Odometry driver around an asynchronous visual-inertial estimator.
//!
//! The estimator is created lazily: IMU samples are cached until the first
//! image arrives, at which point the calibration of every camera is expressed
//! relative to the IMU and handed to the estimator. From then on every image
//! and IMU sample is forwarded, and the latest estimator pose is reported as
//! an incremental transform once the warm-up is over.

use std::sync::Arc;

use nalgebra::Matrix6;

use crate::camera::CameraModel;
use crate::camera_system::{build_camera, CameraSystem};
use crate::config::{DriverConfig, PublishingParameters, VioParameters};
use crate::convention;
use crate::estimator::{Estimator, EstimatorFactory, FullState};
use crate::handoff::StateHandoff;
use crate::imu::ImuSample;
use crate::transform::Transform;
use crate::types::{Image, MapPoint, OdometryUpdate, SensorData};
use crate::{OdometryError, Result};

/// Covariance diagonal reported for the very first frame.
pub const FIRST_FRAME_VARIANCE: f64 = 9999.0;
/// Covariance diagonal reported afterwards.
pub const TRACKING_VARIANCE: f64 = 1.0e-4;

/// Lifecycle of a [`VioOdometry`] session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nothing received since construction or reset.
    Uninitialized,
    /// An image arrived but no IMU sample has been seen yet.
    AwaitingFirstImu,
    /// An IMU sample is cached, waiting for an image to build the estimator.
    AwaitingFirstImage,
    /// The estimator exists and receives every measurement.
    Running,
}

/// Covariance attached to a reported pose.
pub fn covariance_for_frame(frames_processed: u64) -> Matrix6<f64> {
    let variance = if frames_processed == 0 {
        FIRST_FRAME_VARIANCE
    } else {
        TRACKING_VARIANCE
    };
    Matrix6::identity() * variance
}

/// Images of one call with the models describing them.
struct FrameSet {
    images: Vec<Image>,
    models: Vec<CameraModel>,
}

/// Visual-inertial odometry driver.
///
/// Single caller: `process` and `reset` take `&mut self`. The estimator
/// publishes on its own thread into a shared [`StateHandoff`].
pub struct VioOdometry {
    factory: Box<dyn EstimatorFactory>,
    config: DriverConfig,
    estimator: Option<Box<dyn Estimator>>,
    handoff: Arc<StateHandoff>,
    last_imu: Option<ImuSample>,
    /// Estimator camera index for each image of a frame set, `None` for
    /// cameras that could not be registered.
    active_cameras: Vec<Option<usize>>,
    images_processed: u64,
    frames_processed: u64,
    pose: Transform,
    state: DriverState,
}

impl VioOdometry {
    pub fn new(config: DriverConfig, factory: Box<dyn EstimatorFactory>) -> Self {
        log::info!(
            "VIO odometry: config {:?}, rectified {}, warm-up {} frames",
            config.config_path,
            config.images_already_rectified,
            config.warmup_frames
        );
        Self {
            factory,
            config,
            estimator: None,
            handoff: Arc::new(StateHandoff::new()),
            last_imu: None,
            active_cameras: Vec::new(),
            images_processed: 0,
            frames_processed: 0,
            pose: Transform::identity(),
            state: DriverState::Uninitialized,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Images accepted by the estimator since the last reset.
    pub fn images_processed(&self) -> u64 {
        self.images_processed
    }

    /// Calls to [`process`](Self::process) since the last reset.
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Last reported absolute pose in the reporting frame.
    pub fn pose(&self) -> &Transform {
        &self.pose
    }

    /// IMU sample cached for initialization.
    pub fn last_imu(&self) -> Option<&ImuSample> {
        self.last_imu.as_ref()
    }

    pub fn handoff(&self) -> &Arc<StateHandoff> {
        &self.handoff
    }

    /// Drop the estimator and start a new session.
    pub fn reset(&mut self) {
        // Joins the estimator thread before its handoff is replaced.
        self.estimator = None;
        self.handoff = Arc::new(StateHandoff::new());
        self.last_imu = None;
        self.active_cameras.clear();
        self.images_processed = 0;
        self.frames_processed = 0;
        self.pose = Transform::identity();
        self.state = DriverState::Uninitialized;
        log::info!("VIO odometry reset");
    }

    /// Feed one sensor sample and return the motion since the last reported
    /// pose.
    ///
    /// A null transform means no pose is available for this call. Errors
    /// are returned only for malformed input (`UnsupportedPixelFormat`,
    /// `ImageLayout`), which callers must treat as fatal.
    pub fn process(&mut self, data: &SensorData) -> Result<OdometryUpdate> {
        let result = self.process_sample(data);
        self.frames_processed += 1;
        result
    }

    fn process_sample(&mut self, data: &SensorData) -> Result<OdometryUpdate> {
        let mut imu_updated = false;
        if let Some(imu) = data.imu.as_ref().filter(|imu| !imu.is_empty()) {
            log::debug!(
                "IMU update stamp={:.6} acc={:?} gyr={:?}",
                data.stamp,
                imu.linear_acceleration().as_slice(),
                imu.angular_velocity().as_slice()
            );
            match self.estimator.as_mut() {
                Some(estimator) => {
                    imu_updated = estimator.add_imu_measurement(
                        data.stamp,
                        imu.linear_acceleration(),
                        imu.angular_velocity(),
                    );
                    if !imu_updated {
                        log::debug!("IMU update with stamp {:.6} delayed", data.stamp);
                    }
                }
                None => {
                    log::warn!("Ignoring IMU, waiting for an image to initialize...");
                    self.last_imu = Some(imu.clone());
                    self.state = DriverState::AwaitingFirstImage;
                }
            }
        }

        let mut image_updated = false;
        if data.has_image() {
            log::debug!("Image update stamp={:.6}", data.stamp);
            let frames = self.frame_set(data)?;
            if !frames.images.is_empty() {
                if self.estimator.is_none() && !self.initialize(&frames.models) {
                    return Ok(OdometryUpdate::null());
                }
                image_updated = self.submit_images(data.stamp, &frames.images)?;
                if image_updated {
                    self.images_processed += 1;
                }
            }
        }

        let mut update = OdometryUpdate::null();
        let warmed_up = self.images_processed > u64::from(self.config.warmup_frames);
        if (image_updated || imu_updated) && warmed_up {
            let p = self.handoff.last_pose();
            if !p.is_null() {
                let corrected = convention::to_reporting_frame(&p);
                update.transform = convention::incremental(&self.pose, &corrected);
                update.covariance = Some(covariance_for_frame(self.frames_processed));
                if self.config.report_landmarks {
                    update.landmarks = Some(convention::landmarks_to_reporting_frame(
                        &self.handoff.last_landmarks(),
                    ));
                }
                self.pose = corrected;
            }
            log::debug!("Odom update p={}", p);
        }
        Ok(update)
    }

    /// Split the input into per-camera images with models relative to the
    /// IMU.
    fn frame_set(&self, data: &SensorData) -> Result<FrameSet> {
        let imu_local = self
            .last_imu
            .as_ref()
            .map(|imu| *imu.local_transform())
            .unwrap_or_else(Transform::identity);
        let Some(image) = data.image.as_ref() else {
            return Ok(FrameSet {
                images: Vec::new(),
                models: Vec::new(),
            });
        };

        if let Some(stereo) = data.stereo.as_ref().filter(|s| s.is_valid_for_projection()) {
            let right_image = data
                .right_image
                .as_ref()
                .filter(|img| !img.is_empty())
                .ok_or_else(|| {
                    OdometryError::ImageLayout("stereo data without right image".into())
                })?;

            let mut left = stereo.left.clone();
            left.local_transform = convention::camera_to_imu(&imu_local, &left.local_transform);
            let right_local = convention::stereo_right_extrinsic(
                &left.local_transform,
                stereo,
                self.config.images_already_rectified,
            );

            let mut frames = FrameSet {
                images: vec![image.clone()],
                models: vec![left],
            };
            match right_local {
                Some(local_transform) => {
                    let mut right = stereo.right.clone();
                    right.local_transform = local_transform;
                    frames.images.push(right_image.clone());
                    frames.models.push(right);
                }
                None => log::error!(
                    "Stereo pair is not rectified and has no extrinsics, right camera ignored"
                ),
            }
            return Ok(frames);
        }

        let count = data.camera_models.len();
        if count == 0 {
            return Err(OdometryError::ImageLayout("image without camera model".into()));
        }
        if image.width() % count != 0 {
            return Err(OdometryError::ImageLayout(format!(
                "image width {} is not a multiple of {} cameras",
                image.width(),
                count
            )));
        }
        let sub_width = image.width() / count;
        let mut frames = FrameSet {
            images: Vec::with_capacity(count),
            models: Vec::with_capacity(count),
        };
        for (i, model) in data.camera_models.iter().enumerate() {
            if !model.is_valid_for_projection() {
                log::debug!("Camera {} ({}) not valid for projection, skipped", i, model.name);
                continue;
            }
            frames.images.push(if count == 1 {
                image.clone()
            } else {
                image.crop_columns(sub_width * i, sub_width)?
            });
            let mut model = model.clone();
            model.local_transform = convention::camera_to_imu(&imu_local, &model.local_transform);
            frames.models.push(model);
        }
        Ok(frames)
    }

    /// Build the estimator for the given cameras. Returns `false` when the
    /// estimator could not be created; the cached IMU sample is kept so the
    /// next image retries.
    fn initialize(&mut self, models: &[CameraModel]) -> bool {
        log::debug!("Initialization");
        let Some(imu) = self.last_imu.as_ref() else {
            log::warn!("Ignoring Image, waiting for imu to initialize...");
            self.state = DriverState::AwaitingFirstImu;
            return false;
        };

        let mut params = match VioParameters::load(&self.config.config_path) {
            Ok(params) => params,
            Err(e) => {
                log::error!("Estimator configuration not loaded: {}", e);
                return false;
            }
        };
        params.publishing = PublishingParameters::for_odometry(params.imu.rate);
        params.imu.t_bs = *imu.local_transform();

        let mut camera_system = CameraSystem::new();
        let mut active_cameras = Vec::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            match build_camera(model, self.config.images_already_rectified) {
                Some(camera) => {
                    log::info!("model {}: {}", i, model.local_transform);
                    let distortion_type = camera.distortion_type();
                    let index =
                        camera_system.add_camera(&model.local_transform, camera, distortion_type);
                    active_cameras.push(Some(index));
                }
                None => active_cameras.push(None),
            }
        }
        if camera_system.is_empty() {
            log::error!(
                "None of the {} camera(s) could be used, estimator not created",
                models.len()
            );
            return false;
        }
        params.camera_system = camera_system;

        let mut estimator = match self.factory.create(&params) {
            Ok(estimator) => estimator,
            Err(e) => {
                log::error!("Failed to create estimator: {}", e);
                return false;
            }
        };

        let handoff = self.handoff.clone();
        estimator.set_full_state_callback(Arc::new(move |state: &FullState| {
            handoff.publish_pose(state.t_ws);
        }));
        let handoff = self.handoff.clone();
        estimator.set_landmarks_callback(Arc::new(move |_stamp: f64, points: &[MapPoint]| {
            handoff.publish_landmarks(points);
        }));
        estimator.set_blocking(true);

        log::info!(
            "Estimator initialized with {} of {} camera(s)",
            params.camera_system.num_cameras(),
            models.len()
        );
        self.estimator = Some(estimator);
        self.active_cameras = active_cameras;
        self.state = DriverState::Running;
        true
    }

    /// Convert and submit every image with an active camera. Returns whether
    /// the last submission was accepted.
    fn submit_images(&mut self, stamp: f64, images: &[Image]) -> Result<bool> {
        let Some(estimator) = self.estimator.as_mut() else {
            return Ok(false);
        };
        let mut accepted = false;
        for (i, image) in images.iter().enumerate() {
            let Some(Some(camera_index)) = self.active_cameras.get(i).copied() else {
                continue;
            };
            let gray = image.to_intensity()?;
            accepted = estimator.add_image(stamp, camera_index, &gray);
            if !accepted {
                log::warn!("Image update with stamp {:.6} delayed...", stamp);
            }
        }
        Ok(accepted)
    }
}
