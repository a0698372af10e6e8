//! Camera access
//!
//! A [`FrameSource`] opens the device, reads exactly one frame and releases
//! the device again on every call. Nothing holds the camera between
//! capture cycles, so other processes can use it in the meantime.

use crate::error::VisionError;
use image::RgbImage;
use std::sync::Arc;
use vigil_core::DeviceSelector;

/// Blocking single-frame camera access
pub trait FrameSource: Send + Sync {
    fn grab(&self, device: &DeviceSelector, resolution: (u32, u32)) -> Result<RgbImage, VisionError>;
}

/// The camera backend compiled into this build.
pub fn default_camera() -> Arc<dyn FrameSource> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(OpenCvCamera::new())
    }
    #[cfg(not(feature = "opencv"))]
    {
        Arc::new(UnavailableCamera)
    }
}

/// Stand-in for builds without a camera backend. Every grab fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCamera;

impl FrameSource for UnavailableCamera {
    fn grab(&self, device: &DeviceSelector, _resolution: (u32, u32)) -> Result<RgbImage, VisionError> {
        Err(VisionError::Camera(format!(
            "Cannot open camera {}: built without a camera backend (enable the `opencv` feature)",
            device
        )))
    }
}

#[cfg(feature = "opencv")]
pub use self::opencv_backend::OpenCvCamera;

#[cfg(feature = "opencv")]
mod opencv_backend {
    use super::FrameSource;
    use crate::error::VisionError;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, CAP_V4L2},
    };
    use tracing::{debug, warn};
    use vigil_core::DeviceSelector;

    /// V4L2 / UVC camera through OpenCV's `VideoCapture`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpenCvCamera;

    impl OpenCvCamera {
        pub fn new() -> Self {
            Self
        }

        fn open(device: &DeviceSelector) -> Result<VideoCapture, VisionError> {
            let capture = match device {
                DeviceSelector::Index(index) => VideoCapture::new(*index as i32, CAP_ANY),
                DeviceSelector::Path(path) => VideoCapture::from_file(&path.to_string_lossy(), CAP_V4L2),
            }
            .map_err(|e| VisionError::Camera(format!("Failed to open camera {}: {}", device, e)))?;

            if !capture.is_opened()? {
                return Err(VisionError::Camera(format!("Camera {} failed to open", device)));
            }
            Ok(capture)
        }
    }

    impl FrameSource for OpenCvCamera {
        fn grab(&self, device: &DeviceSelector, resolution: (u32, u32)) -> Result<RgbImage, VisionError> {
            let mut capture = Self::open(device)?;
            let (width, height) = resolution;

            let mut frame = Mat::default();
            let read = (|| -> opencv::Result<bool> {
                capture.set(CAP_PROP_FRAME_WIDTH, width as f64)?;
                capture.set(CAP_PROP_FRAME_HEIGHT, height as f64)?;
                capture.read(&mut frame)
            })();
            if let Err(e) = capture.release() {
                warn!("Failed to release camera {}: {}", device, e);
            }

            if !read.map_err(|e| VisionError::Camera(format!("Camera {} read failed: {}", device, e)))? || frame.empty() {
                return Err(VisionError::Camera(format!("Camera {} returned no frame", device)));
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
            let rgb = if rgb.is_continuous() { rgb } else { rgb.try_clone()? };

            let (cols, rows) = (rgb.cols() as u32, rgb.rows() as u32);
            debug!("Grabbed {}x{} frame from {}", cols, rows, device);
            RgbImage::from_raw(cols, rows, rgb.data_bytes()?.to_vec()).ok_or_else(|| {
                VisionError::Camera(format!("Unexpected frame layout from camera {}", device))
            })
        }
    }
}
