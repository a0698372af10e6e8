//! Inference consumer
//!
//! The bus handler only decodes capture events and queues them. A single
//! worker takes events in order and runs the pipeline for each:
//!
//! 1. load the captured frame
//! 2. remote inference on a resized copy
//! 3. scale boxes to the frame's own size
//! 4. label, draw, and write the annotated frame
//! 5. publish the detection results
//! 6. upload the annotated frame
//! 7. delete both local files
//!
//! A failure in steps 1-4 drops the event and leaves the captured file in
//! place. Failures in 5 and 6 are logged and never prevent step 7.

use crate::annotate::DetectionAnnotator;
use crate::capture::write_jpeg;
use crate::error::VisionError;
use crate::inference::{ModelInferenceClient, RawDetections};
use crate::tensor::InputTensor;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vigil_bus::{BusError, BusMessage, DropOldestQueue, LocalBus, MessageHandler, PushOutcome, Subscription};
use vigil_core::{
    ArtifactStore, Error as CoreError, ImageCaptureEvent, InferenceOutcome, LabelTable, PipelineConfig,
    ResultPublisher,
};

/// What happened to one successfully inferred event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub source: PathBuf,
    pub outcome: InferenceOutcome,
    pub published: bool,
    /// Object location, when the upload succeeded
    pub uploaded: Option<String>,
    pub source_deleted: bool,
    pub annotated_deleted: bool,
}

/// Counters for a finished worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub failed: u64,
    pub abandoned: u64,
}

pub struct InferenceConsumer {
    config: Arc<PipelineConfig>,
    client: Arc<dyn ModelInferenceClient>,
    annotator: Arc<DetectionAnnotator>,
    publisher: Arc<dyn ResultPublisher>,
    store: Arc<dyn ArtifactStore>,
    queue: Arc<DropOldestQueue<ImageCaptureEvent>>,
}

impl InferenceConsumer {
    pub fn new(
        config: Arc<PipelineConfig>,
        client: Arc<dyn ModelInferenceClient>,
        labels: Arc<LabelTable>,
        publisher: Arc<dyn ResultPublisher>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let annotator = Arc::new(DetectionAnnotator::new(labels, config.max_detections));
        let queue = Arc::new(DropOldestQueue::new(config.queue_capacity));
        Self {
            config,
            client,
            annotator,
            publisher,
            store,
            queue,
        }
    }

    /// Bus handler feeding this consumer's queue.
    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        Arc::new(EnqueueHandler {
            queue: self.queue.clone(),
        })
    }

    /// Subscribe the queue to the configured local topic.
    pub async fn attach(&self, bus: &dyn LocalBus) -> Result<Subscription, BusError> {
        bus.subscribe(&self.config.local_topic, self.handler()).await
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Process events one at a time until shutdown.
    ///
    /// On shutdown the in-flight event gets the configured grace period to
    /// finish; after that it is abandoned. Events still queued stay on disk.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let grace = self.config.shutdown_grace();
        info!(
            "Inference worker started: model {} v{} at {}",
            self.config.model_name, self.config.model_version, self.config.inference_server
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                next = self.queue.pop() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let processing = self.process(&event);
            tokio::pin!(processing);
            let result = tokio::select! {
                result = &mut processing => Some(result),
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown requested, waiting up to {:?} for {}", grace, event.path().display());
                    tokio::time::timeout(grace, &mut processing).await.ok()
                }
            };

            match result {
                Some(Ok(_)) => stats.processed += 1,
                Some(Err(e)) => {
                    stats.failed += 1;
                    error!("Dropped event for {}: {}", event.path().display(), e);
                }
                None => {
                    stats.abandoned += 1;
                    warn!("Abandoned in-flight event for {} after {:?}", event.path().display(), grace);
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        let left = self.queue.close_and_drain();
        for event in &left {
            warn!("Unprocessed capture left on disk: {}", event.path().display());
        }
        info!(
            "Inference worker stopped: {} processed, {} failed, {} abandoned, {} unprocessed",
            stats.processed,
            stats.failed,
            stats.abandoned,
            left.len()
        );
        stats
    }

    /// Run the full pipeline for one event.
    pub async fn process(&self, event: &ImageCaptureEvent) -> Result<ProcessReport, VisionError> {
        let source = event.path().to_path_buf();
        info!("Running inference on {}", source.display());

        let (frame, input) = {
            let path = source.clone();
            let input_name = self.config.input_tensor_name.clone();
            tokio::task::spawn_blocking(move || -> Result<_, VisionError> {
                let frame = image::open(&path)?.to_rgb8();
                let input = InputTensor::from_image(input_name, &frame);
                Ok((frame, input))
            })
            .await
            .map_err(|e| VisionError::Processing(format!("Image load task failed: {}", e)))??
        };

        let tensors = self
            .client
            .predict(&input, &self.config.model_name, self.config.model_version)
            .await?;
        let detections = RawDetections::from_tensors(&tensors, &self.config.output_tensor_names)?;
        debug!(
            "Model reported {} detection(s) for {}",
            detections.num_detections,
            source.display()
        );

        let annotated_path = annotated_path_for(&self.config.output_directory, &source);
        let results = {
            let annotator = self.annotator.clone();
            let target = annotated_path.clone();
            let quality = self.config.jpeg_quality;
            tokio::task::spawn_blocking(move || -> Result<_, VisionError> {
                let annotation = annotator.annotate(&frame, &detections)?;
                if let Err(e) = write_jpeg(&annotation.image, &target, quality) {
                    let _ = fs::remove_file(&target);
                    return Err(e);
                }
                Ok(annotation.results)
            })
            .await
            .map_err(|e| VisionError::Processing(format!("Annotation task failed: {}", e)))??
        };
        let outcome = InferenceOutcome {
            results,
            annotated_path,
        };

        let published = match self.publisher.publish(&outcome.payload()).await {
            Ok(()) => {
                info!(
                    "Published {} detection(s) to {}",
                    outcome.results.len(),
                    self.config.result_topic
                );
                true
            }
            Err(e) => {
                error!("Result publish failed for {}: {}", source.display(), e);
                false
            }
        };

        let uploaded = match self.store.upload(&outcome.annotated_path).await {
            Ok(location) => {
                info!("Annotated frame uploaded to {}", location);
                Some(location)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", outcome.annotated_path.display(), e);
                None
            }
        };

        let source_deleted = remove_artifact(&source);
        let annotated_deleted = remove_artifact(&outcome.annotated_path);

        Ok(ProcessReport {
            source,
            outcome,
            published,
            uploaded,
            source_deleted,
            annotated_deleted,
        })
    }
}

/// `<output dir>/annotated_<source file name>`
pub fn annotated_path_for(output_directory: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame.jpg".to_string());
    output_directory.join(format!("annotated_{}", name))
}

fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            true
        }
        Err(e) => {
            let err = CoreError::Cleanup(format!("{}: {}", path.display(), e));
            error!("{}", err);
            false
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Decodes capture events and queues them for the worker.
///
/// When the queue is full the oldest pending event is dropped and its
/// frame deleted, since nothing else would ever clean it up.
struct EnqueueHandler {
    queue: Arc<DropOldestQueue<ImageCaptureEvent>>,
}

#[async_trait]
impl MessageHandler for EnqueueHandler {
    async fn handle(&self, message: BusMessage) -> Result<(), BusError> {
        let event = ImageCaptureEvent::from_payload(&message.payload)?;
        debug!("Received capture event for {}", event.path().display());
        match self.queue.push(event) {
            PushOutcome::Queued => {}
            PushOutcome::Evicted(old) => {
                warn!(
                    "Inference queue full ({}), dropping oldest event {}",
                    self.queue.capacity(),
                    old.path().display()
                );
                remove_artifact(old.path());
            }
            PushOutcome::Rejected(event) => {
                warn!("Consumer stopped, ignoring event {}", event.path().display());
            }
        }
        Ok(())
    }
}
