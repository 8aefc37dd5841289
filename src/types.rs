use std::collections::BTreeMap;

use nalgebra::{Matrix6, Point3};

use crate::camera::{CameraModel, StereoCameraModel};
use crate::imu::ImuSample;
use crate::transform::Transform;
use crate::{OdometryError, Result};

/// Pixel layout of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit single channel intensity.
    Mono8,
    /// 8-bit interleaved blue, green, red.
    Bgr8,
    /// 8-bit interleaved red, green, blue.
    Rgb8,
    /// 16-bit single channel (little-endian), typically depth.
    Mono16,
    /// 32-bit float single channel (little-endian).
    Float32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Float32 => 4,
        }
    }
}

/// Row-major image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Image {
    pub fn new(width: usize, height: usize, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = width * height * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(OdometryError::ImageLayout(format!(
                "{}x{} {:?} image needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Image filled with a constant byte value.
    pub fn filled(width: usize, height: usize, format: PixelFormat, value: u8) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![value; width * height * format.bytes_per_pixel()],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy the column range `[x, x + width)` into a new image.
    pub fn crop_columns(&self, x: usize, width: usize) -> Result<Image> {
        if x + width > self.width {
            return Err(OdometryError::ImageLayout(format!(
                "column range {}..{} outside image of width {}",
                x,
                x + width,
                self.width
            )));
        }
        let bpp = self.format.bytes_per_pixel();
        let stride = self.width * bpp;
        let mut data = Vec::with_capacity(width * self.height * bpp);
        for row in self.data.chunks_exact(stride) {
            data.extend_from_slice(&row[x * bpp..(x + width) * bpp]);
        }
        Ok(Image {
            width,
            height: self.height,
            format: self.format,
            data,
        })
    }

    /// Single-channel intensity version of the image.
    ///
    /// Color images are converted with the ITU-R BT.601 luma weights, `Mono8`
    /// is passed through. Any other layout is rejected.
    pub fn to_intensity(&self) -> Result<Image> {
        let (r, g, b) = match self.format {
            PixelFormat::Mono8 => return Ok(self.clone()),
            PixelFormat::Bgr8 => (2, 1, 0),
            PixelFormat::Rgb8 => (0, 1, 2),
            other => return Err(OdometryError::UnsupportedPixelFormat(other)),
        };
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[r] as f64 + 0.587 * px[g] as f64 + 0.114 * px[b] as f64;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Ok(Image {
            width: self.width,
            height: self.height,
            format: PixelFormat::Mono8,
            data,
        })
    }
}

/// Landmark set keyed by estimator landmark id.
pub type Landmarks = BTreeMap<u64, Point3<f64>>;

/// A landmark published by the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub id: u64,
    /// Position in the estimator's world frame.
    pub point: Point3<f64>,
    /// Quality score, higher is better.
    pub quality: f64,
}

/// Everything captured for one odometry step.
///
/// Either `stereo` is set (with `image` as the left and `right_image` as the
/// right frame), or `camera_models` describes the horizontally concatenated
/// sub-images of `image`.
#[derive(Debug, Clone, Default)]
pub struct SensorData {
    /// Capture time in seconds.
    pub stamp: f64,
    pub image: Option<Image>,
    pub right_image: Option<Image>,
    pub camera_models: Vec<CameraModel>,
    pub stereo: Option<StereoCameraModel>,
    pub imu: Option<ImuSample>,
}

impl SensorData {
    /// IMU-only data.
    pub fn from_imu(stamp: f64, imu: ImuSample) -> Self {
        Self {
            stamp,
            imu: Some(imu),
            ..Self::default()
        }
    }

    /// Single or multi-camera data.
    pub fn from_cameras(stamp: f64, image: Image, camera_models: Vec<CameraModel>) -> Self {
        Self {
            stamp,
            image: Some(image),
            camera_models,
            ..Self::default()
        }
    }

    /// Stereo pair data.
    pub fn from_stereo(stamp: f64, left: Image, right: Image, stereo: StereoCameraModel) -> Self {
        Self {
            stamp,
            image: Some(left),
            right_image: Some(right),
            stereo: Some(stereo),
            ..Self::default()
        }
    }

    pub fn with_imu(mut self, imu: ImuSample) -> Self {
        self.imu = Some(imu);
        self
    }

    pub(crate) fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(|img| !img.is_empty())
    }
}

/// Result of one odometry step.
#[derive(Debug, Clone, PartialEq)]
pub struct OdometryUpdate {
    /// Motion since the previously reported pose, null when none was produced.
    pub transform: Transform,
    /// Diagonal 6x6 covariance, used as a confidence signal.
    pub covariance: Option<Matrix6<f64>>,
    /// Landmarks in the reporting frame, when enabled.
    pub landmarks: Option<Landmarks>,
}

impl OdometryUpdate {
    pub fn null() -> Self {
        Self {
            transform: Transform::null(),
            covariance: None,
            landmarks: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.transform.is_null()
    }
}
