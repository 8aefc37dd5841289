use crate::types::PixelFormat;

/// Errors that can occur while driving the visual-inertial estimator.
#[derive(Debug, thiserror::Error)]
pub enum OdometryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read estimator configuration {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed estimator configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("{name} covariance must be 3x3, got {rows}x{cols}")]
    InvalidCovariance {
        name: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("Unsupported pixel format {0:?}, expected Mono8, Bgr8 or Rgb8")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("Image layout error: {0}")]
    ImageLayout(String),

    #[error("Failed to spawn estimator thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Estimator stopped")]
    EstimatorStopped,
}

impl OdometryError {
    /// Whether the error reflects an integration defect that the caller must
    /// treat as fatal rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OdometryError::UnsupportedPixelFormat(_) | OdometryError::ImageLayout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(OdometryError::UnsupportedPixelFormat(PixelFormat::Mono16).is_fatal());
        assert!(OdometryError::ImageLayout("odd width".into()).is_fatal());
        assert!(!OdometryError::Config("empty path".into()).is_fatal());
        assert!(!OdometryError::EstimatorStopped.is_fatal());
    }

    #[test]
    fn test_covariance_message() {
        let err = OdometryError::InvalidCovariance {
            name: "angular velocity",
            rows: 2,
            cols: 3,
        };
        assert_eq!(
            err.to_string(),
            "angular velocity covariance must be 3x3, got 2x3"
        );
    }
}
