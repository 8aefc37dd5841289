//! Run the odometry driver on a synthetic rig turning in place.
//!
//! Usage: cargo run --example synthetic
//! Set VIO_CONFIG_PATH to use an existing estimator configuration.

use std::io::Write;

use nalgebra::{DMatrix, Vector3};
use vio_odometry::{
    CameraModel, DriverConfig, Image, ImuPropagator, ImuSample, PixelFormat, SensorData,
    ThreadedEstimatorFactory, Transform, VioOdometry, VioParameters,
};

const IMU_RATE: f64 = 200.0;
const IMU_PER_IMAGE: usize = 10;
const YAW_RATE: f64 = 0.2;

fn main() {
    env_logger::init();

    let mut config = DriverConfig::from_env();
    let _config_file = if config.config_path.is_empty() {
        let mut file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = write!(file, r#"{{ "imu": {{ "rate": {} }} }}"#, IMU_RATE) {
            eprintln!("Failed to write configuration file: {}", e);
            std::process::exit(1);
        }
        config.config_path = file.path().to_string_lossy().into_owned();
        Some(file)
    } else {
        None
    };
    config.warmup_frames = 5;

    let factory = ThreadedEstimatorFactory::new(|p: &VioParameters| ImuPropagator::new(&p.imu));
    let mut odom = VioOdometry::new(config, Box::new(factory));

    let cov = DMatrix::identity(3, 3) * 1.0e-4;
    let imu = match ImuSample::new(
        Vector3::new(0.0, 0.0, YAW_RATE),
        &cov,
        Vector3::new(0.0, 0.0, 9.81),
        &cov,
        Transform::identity(),
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid IMU sample: {}", e);
            std::process::exit(1);
        }
    };
    let camera_pose = Transform::from_translation(0.05, 0.0, 0.0);
    let camera = CameraModel::pinhole("cam0", 64, 48, 60.0, 60.0, 32.0, 24.0, camera_pose);
    let image = Image::filled(64, 48, PixelFormat::Bgr8, 128);

    println!("Simulating {} s at {} Hz IMU...", 10, IMU_RATE);

    let mut reported: u64 = 0;
    for i in 0..(10.0 * IMU_RATE) as usize {
        let stamp = i as f64 / IMU_RATE;
        let data = if i % IMU_PER_IMAGE == 0 {
            SensorData::from_cameras(stamp, image.clone(), vec![camera.clone()])
                .with_imu(imu.clone())
        } else {
            SensorData::from_imu(stamp, imu.clone())
        };

        let update = match odom.process(&data) {
            Ok(u) => u,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };
        if update.is_null() {
            continue;
        }
        reported += 1;

        // Print every ~40th pose to avoid flooding the terminal
        if reported % 40 == 1 {
            println!("t={:<6.3} delta {}  pose {}", stamp, update.transform, odom.pose());
        }
    }

    println!(
        "\nTotal: {} poses from {} frames ({} images ingested)",
        reported,
        odom.frames_processed(),
        odom.images_processed()
    );
}
