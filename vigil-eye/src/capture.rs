//! Capture producer
//!
//! Every interval: grab one frame, write it to the output directory, and
//! announce it on the local bus. A failed cycle is logged and skipped; the
//! loop only ends on shutdown.

use crate::camera::FrameSource;
use crate::error::VisionError;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vigil_bus::LocalBus;
use vigil_core::{ImageCaptureEvent, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Persisting,
    Publishing,
}

/// Counters for a finished capture loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub cycles: u64,
    pub published: u64,
    pub skipped: u64,
}

pub struct CaptureProducer {
    config: Arc<PipelineConfig>,
    camera: Arc<dyn FrameSource>,
    bus: Arc<dyn LocalBus>,
    state: Mutex<CaptureState>,
}

impl CaptureProducer {
    pub fn new(config: Arc<PipelineConfig>, camera: Arc<dyn FrameSource>, bus: Arc<dyn LocalBus>) -> Self {
        Self {
            config,
            camera,
            bus,
            state: Mutex::new(CaptureState::Idle),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    fn transition(&self, next: CaptureState) {
        let mut state = self.state.lock();
        debug!("Capture state {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Create the output directory and check the camera delivers a frame.
    ///
    /// Failure here is a startup error.
    pub async fn probe(&self) -> Result<(u32, u32), VisionError> {
        fs::create_dir_all(&self.config.output_directory)?;
        let frame = self.grab().await?;
        info!(
            "Camera {} ready, frames are {}x{}",
            self.config.device,
            frame.width(),
            frame.height()
        );
        Ok(frame.dimensions())
    }

    async fn grab(&self) -> Result<RgbImage, VisionError> {
        let camera = self.camera.clone();
        let device = self.config.device.clone();
        let resolution = self.config.resolution;
        tokio::task::spawn_blocking(move || camera.grab(&device, resolution))
            .await
            .map_err(|e| VisionError::Camera(format!("Capture task failed: {}", e)))?
    }

    /// One capture, persist and publish cycle.
    pub async fn cycle(&self) -> Result<ImageCaptureEvent, VisionError> {
        let result = self.run_cycle().await;
        self.transition(CaptureState::Idle);
        result
    }

    async fn run_cycle(&self) -> Result<ImageCaptureEvent, VisionError> {
        self.transition(CaptureState::Capturing);
        let frame = self.grab().await?;
        let captured_at = Utc::now();

        self.transition(CaptureState::Persisting);
        let dir = self.config.output_directory.clone();
        let quality = self.config.jpeg_quality;
        let path = tokio::task::spawn_blocking(move || persist_frame(&frame, &dir, captured_at, quality))
            .await
            .map_err(|e| VisionError::Processing(format!("Persist task failed: {}", e)))??;

        self.transition(CaptureState::Publishing);
        let event = ImageCaptureEvent::new(path, captured_at);
        let published = match event.to_payload() {
            Ok(payload) => match self.bus.publish(&self.config.local_topic, payload).await {
                Ok(()) => Ok(()),
                Err(e) => Err((e.maybe_delivered(), VisionError::Core(e.into()))),
            },
            Err(e) => Err((false, VisionError::Core(e))),
        };
        if let Err((maybe_delivered, e)) = published {
            if maybe_delivered {
                // The consumer may own the file now
                warn!("Delivery of {} is uncertain, keeping the frame", event.path().display());
            } else if let Err(rm) = fs::remove_file(event.path()) {
                warn!("Failed to remove unpublished frame {}: {}", event.path().display(), rm);
            }
            return Err(e);
        }

        info!("Published capture {}", event.path().display());
        Ok(event)
    }

    /// Run cycles until `shutdown` turns true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CaptureStats {
        let mut stats = CaptureStats::default();
        let interval = self.config.capture_interval();
        info!(
            "Capture loop started: device {}, every {:?}, topic {}",
            self.config.device, interval, self.config.local_topic
        );

        while !*shutdown.borrow() {
            stats.cycles += 1;
            match self.cycle().await {
                Ok(_) => stats.published += 1,
                Err(e) => {
                    stats.skipped += 1;
                    error!("Capture cycle skipped: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            "Capture loop stopped after {} cycle(s): {} published, {} skipped",
            stats.cycles, stats.published, stats.skipped
        );
        stats
    }
}

/// Write `frame` as JPEG into `dir` under `image_%Y%m%d_%H%M%S.jpg`.
///
/// An existing file is never overwritten: a `_N` suffix is added instead.
/// The frame is written to a hidden temporary file and renamed, so the
/// returned path always names a complete image.
pub fn persist_frame(frame: &RgbImage, dir: &Path, captured_at: DateTime<Utc>, quality: u8) -> Result<PathBuf, VisionError> {
    let stem = captured_at.format("image_%Y%m%d_%H%M%S").to_string();
    let mut path = dir.join(format!("{}.jpg", stem));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.jpg", stem, suffix));
        suffix += 1;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| stem.clone());
    let tmp = dir.join(format!(".{}.partial", file_name));

    let written = write_jpeg(frame, &tmp, quality).and_then(|_| fs::rename(&tmp, &path).map_err(VisionError::from));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    debug!("Persisted frame to {}", path.display());
    Ok(path)
}

/// Encode `image` as JPEG at `path`.
pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<(), VisionError> {
    let mut writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode_image(image)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::UnavailableCamera;
    use chrono::TimeZone;
    use image::Rgb;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vigil_bus::{BusError, BusMessage, InProcessBus, MessageHandler};
    use vigil_core::DeviceSelector;

    struct SolidCamera;

    impl FrameSource for SolidCamera {
        fn grab(&self, _: &DeviceSelector, (w, h): (u32, u32)) -> Result<RgbImage, VisionError> {
            Ok(RgbImage::from_pixel(w, h, Rgb([90, 120, 150])))
        }
    }

    struct Collect(tokio::sync::mpsc::UnboundedSender<JsonValue>);

    #[async_trait::async_trait]
    impl MessageHandler for Collect {
        async fn handle(&self, message: BusMessage) -> Result<(), BusError> {
            let _ = self.0.send(message.payload);
            Ok(())
        }
    }

    fn config(dir: &Path) -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig {
            output_directory: dir.to_path_buf(),
            resolution: (64, 48),
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn test_persist_frame_names_and_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let frame = RgbImage::new(16, 16);

        let first = persist_frame(&frame, dir.path(), at, 90).unwrap();
        let second = persist_frame(&frame, dir.path(), at, 90).unwrap();
        assert_eq!(first.file_name().unwrap(), "image_20240101_120000.jpg");
        assert_eq!(second.file_name().unwrap(), "image_20240101_120000_1.jpg");

        let decoded = image::open(&first).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_persist_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(persist_frame(&RgbImage::new(4, 4), &missing, Utc::now(), 90).is_err());
    }

    #[tokio::test]
    async fn test_cycle_publishes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(InProcessBus::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = bus.subscribe("camera/images", Arc::new(Collect(tx))).await.unwrap();

        let producer = CaptureProducer::new(config(dir.path()), Arc::new(SolidCamera), bus);
        let event = producer.cycle().await.unwrap();
        assert!(event.path().exists());
        assert_eq!(producer.state(), CaptureState::Idle);

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(ImageCaptureEvent::from_payload(&payload).unwrap(), event);
    }

    #[tokio::test]
    async fn test_device_failure_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let producer = CaptureProducer::new(
            config(dir.path()),
            Arc::new(UnavailableCamera),
            Arc::new(InProcessBus::new()),
        );
        assert!(matches!(producer.cycle().await, Err(VisionError::Camera(_))));
        assert_eq!(producer.state(), CaptureState::Idle);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(producer.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_failure_removes_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = (*config(dir.path())).clone();
        cfg.local_topic = "camera/#".to_string();
        let producer = CaptureProducer::new(Arc::new(cfg), Arc::new(SolidCamera), Arc::new(InProcessBus::new()));
        assert!(producer.cycle().await.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    struct CountingCamera(AtomicUsize);

    impl FrameSource for CountingCamera {
        fn grab(&self, device: &DeviceSelector, res: (u32, u32)) -> Result<RgbImage, VisionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            UnavailableCamera.grab(device, res)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(CountingCamera(AtomicUsize::new(0)));
        let producer = Arc::new(CaptureProducer::new(
            config(dir.path()),
            camera.clone(),
            Arc::new(InProcessBus::new()),
        ));
        let (stop, shutdown) = watch::channel(false);
        let task = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        stop.send(true).unwrap();
        let stats = task.await.unwrap();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.skipped, stats.cycles);
        assert!(stats.cycles >= 2);
        assert_eq!(camera.0.load(Ordering::SeqCst) as u64, stats.cycles);
    }
}
