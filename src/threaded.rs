use crate::config::{PublishFlags, PublishingParameters, VioParameters};
use crate::estimator::{
    Estimator, EstimatorFactory, FullState, FullStateCallback, LandmarksCallback,
};
use crate::types::{Image, MapPoint};
use crate::{OdometryError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use nalgebra::Vector3;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default depth of the measurement queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Stamps closer than this are treated as equal when rate limiting.
const STAMP_TOLERANCE: f64 = 1.0e-6;

/// Estimation algorithm run by a [`ThreadedEstimator`] on its worker thread.
pub trait Backend: Send + 'static {
    /// Process an IMU measurement, returning the propagated state if any.
    fn process_imu(
        &mut self,
        stamp: f64,
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
    ) -> Option<FullState>;

    /// Process an image, returning the state at the image time if any.
    fn process_image(
        &mut self,
        stamp: f64,
        camera_index: usize,
        image: &Image,
    ) -> Option<FullState>;

    /// Current landmark estimates.
    fn landmarks(&self) -> Vec<MapPoint> {
        Vec::new()
    }
}

enum Measurement {
    Imu {
        stamp: f64,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
    },
    Image {
        stamp: f64,
        camera_index: usize,
        image: Image,
    },
}

#[derive(Default)]
struct Callbacks {
    full_state: Mutex<Option<FullStateCallback>>,
    landmarks: Mutex<Option<LandmarksCallback>>,
}

impl Callbacks {
    fn publish_state(&self, state: &FullState) {
        let callback = self
            .full_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    fn publish_landmarks(&self, stamp: f64, points: &[MapPoint]) {
        let callback = self
            .landmarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(stamp, points);
        }
    }
}

/// Runs a [`Backend`] on a dedicated thread behind the [`Estimator`] contract.
///
/// Measurements travel through a bounded queue. In blocking mode submissions
/// wait for room in the queue; otherwise a full queue rejects them. Results
/// are delivered through the callbacks on the worker thread.
pub struct ThreadedEstimator {
    sender: Option<Sender<Measurement>>,
    blocking: bool,
    callbacks: Arc<Callbacks>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ThreadedEstimator {
    /// Start the worker thread.
    pub fn spawn<B: Backend>(
        backend: B,
        publishing: PublishingParameters,
        queue_size: usize,
    ) -> Result<ThreadedEstimator> {
        let (sender, receiver) = crossbeam_channel::bounded(queue_size.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let callbacks = Arc::new(Callbacks::default());
        let callbacks_clone = callbacks.clone();

        let thread = std::thread::Builder::new()
            .name("vio-estimator".into())
            .spawn(move || {
                estimator_loop(backend, receiver, stop_clone, callbacks_clone, publishing);
            })
            .map_err(OdometryError::Spawn)?;

        Ok(ThreadedEstimator {
            sender: Some(sender),
            blocking: false,
            callbacks,
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Check if the worker is still running.
    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker and wait for it to finish.
    ///
    /// Fails with [`OdometryError::EstimatorStopped`] if the worker had
    /// panicked.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn submit(&self, measurement: Measurement) -> bool {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        if self.blocking {
            return match sender.send(measurement) {
                Ok(()) => true,
                Err(_) => {
                    log::warn!("Estimator thread gone, measurement dropped");
                    false
                }
            };
        }
        match sender.try_send(measurement) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("Estimator queue full, measurement deferred");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("Estimator thread gone, measurement dropped");
                false
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.sender.take();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| OdometryError::EstimatorStopped),
            None => Ok(()),
        }
    }
}

impl Drop for ThreadedEstimator {
    fn drop(&mut self) {
        if self.shutdown().is_err() {
            log::error!("Estimator thread panicked");
        }
    }
}

impl Estimator for ThreadedEstimator {
    fn add_imu_measurement(
        &mut self,
        stamp: f64,
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
    ) -> bool {
        self.submit(Measurement::Imu {
            stamp,
            accel: *accel,
            gyro: *gyro,
        })
    }

    fn add_image(&mut self, stamp: f64, camera_index: usize, image: &Image) -> bool {
        self.submit(Measurement::Image {
            stamp,
            camera_index,
            image: image.clone(),
        })
    }

    fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    fn set_full_state_callback(&mut self, callback: FullStateCallback) {
        *self
            .callbacks
            .full_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_landmarks_callback(&mut self, callback: LandmarksCallback) {
        *self
            .callbacks
            .landmarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

/// Landmarks worth publishing, with quality scaled to `[0, 1]` by the
/// maximum landmark quality.
fn publishable_landmarks(
    points: Vec<MapPoint>,
    publishing: &PublishingParameters,
) -> Vec<MapPoint> {
    points
        .into_iter()
        .filter(|mp| mp.quality >= publishing.landmark_quality_threshold)
        .map(|mp| MapPoint {
            quality: if publishing.max_landmark_quality > 0.0 {
                (mp.quality / publishing.max_landmark_quality).min(1.0)
            } else {
                1.0
            },
            ..mp
        })
        .collect()
}

/// The estimator loop runs in a dedicated thread until the stop flag is set
/// or every sender is gone.
fn estimator_loop<B: Backend>(
    mut backend: B,
    receiver: Receiver<Measurement>,
    stop_flag: Arc<AtomicBool>,
    callbacks: Arc<Callbacks>,
    publishing: PublishingParameters,
) {
    let min_interval = if publishing.publish_rate > 0.0 {
        1.0 / publishing.publish_rate
    } else {
        0.0
    };
    let mut last_published: Option<f64> = None;

    log::info!("Estimator thread started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("Estimator thread stopping (stop flag set)");
            break;
        }

        // Timeout to periodically check the stop flag
        let measurement = match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(m) => m,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("Estimator queue closed, stopping");
                break;
            }
        };

        match measurement {
            Measurement::Imu { stamp, accel, gyro } => {
                log::trace!("IMU {:.6}", stamp);
                let Some(state) = backend.process_imu(stamp, &accel, &gyro) else {
                    continue;
                };
                if !publishing.flags.contains(PublishFlags::IMU_PROPAGATED_STATE) {
                    continue;
                }
                let due = last_published
                    .map_or(true, |t| stamp - t >= min_interval - STAMP_TOLERANCE);
                if due {
                    last_published = Some(stamp);
                    callbacks.publish_state(&state);
                }
            }
            Measurement::Image {
                stamp,
                camera_index,
                image,
            } => {
                log::trace!("Image {:.6} camera {}", stamp, camera_index);
                let Some(state) = backend.process_image(stamp, camera_index, &image) else {
                    continue;
                };
                last_published = Some(stamp);
                callbacks.publish_state(&state);
                if publishing.flags.contains(PublishFlags::LANDMARKS) {
                    let points = publishable_landmarks(backend.landmarks(), &publishing);
                    callbacks.publish_landmarks(stamp, &points);
                }
            }
        }
    }
}

/// Creates a [`ThreadedEstimator`] around a freshly built back-end.
pub struct ThreadedEstimatorFactory<F> {
    make_backend: F,
    queue_size: usize,
}

impl<F> ThreadedEstimatorFactory<F> {
    pub fn new(make_backend: F) -> Self {
        Self {
            make_backend,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }
}

impl<F, B> EstimatorFactory for ThreadedEstimatorFactory<F>
where
    F: Fn(&VioParameters) -> B + Send,
    B: Backend,
{
    fn create(&self, params: &VioParameters) -> Result<Box<dyn Estimator>> {
        let backend = (self.make_backend)(params);
        let estimator =
            ThreadedEstimator::spawn(backend, params.publishing.clone(), self.queue_size)?;
        log::info!(
            "Estimator started with {} camera(s), queue size {}",
            params.camera_system.num_cameras(),
            self.queue_size
        );
        Ok(Box::new(estimator))
    }
}
