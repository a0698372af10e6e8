//! Remote detection inference
//!
//! [`GrpcInferenceClient`] speaks the KServe v2 gRPC protocol served by
//! OpenVINO Model Server and Triton. A fresh channel is opened per call;
//! the consumer's single worker keeps at most one call outstanding.

use crate::error::VisionError;
use crate::proto::{
    InferInputTensor, InferOutputTensor, InferRequestedOutputTensor, ModelInferRequest,
    ModelInferResponse, InferTensorContents, MODEL_INFER_PATH,
};
use crate::tensor::InputTensor;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Endpoint;
use tracing::{debug, warn};
use vigil_core::{DetectionBox, PipelineConfig};

/// Decoded output tensor, values widened or narrowed to `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<i64>,
    pub values: Vec<f32>,
}

pub type NamedTensors = HashMap<String, OutputTensor>;

/// Sends one image tensor to a model and returns its named outputs.
#[async_trait]
pub trait ModelInferenceClient: Send + Sync {
    async fn predict(
        &self,
        input: &InputTensor,
        model_name: &str,
        model_version: i64,
    ) -> Result<NamedTensors, VisionError>;
}

/// KServe v2 gRPC client
pub struct GrpcInferenceClient {
    address: String,
    timeout: Duration,
    output_names: Vec<String>,
}

impl GrpcInferenceClient {
    /// `address` is `host:port` or a full `http://` URI.
    pub fn new(address: impl Into<String>, timeout: Duration, output_names: Vec<String>) -> Self {
        Self {
            address: address.into(),
            timeout,
            output_names,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.inference_server.clone(),
            config.inference_timeout(),
            config.output_tensor_names.clone(),
        )
    }

    fn uri(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("http://{}", self.address)
        }
    }

    fn build_request(&self, input: &InputTensor, model_name: &str, model_version: i64) -> ModelInferRequest {
        ModelInferRequest {
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            id: String::new(),
            inputs: vec![InferInputTensor {
                name: input.name.clone(),
                datatype: "UINT8".to_string(),
                shape: input.shape.clone(),
                contents: None,
            }],
            outputs: self
                .output_names
                .iter()
                .map(|name| InferRequestedOutputTensor { name: name.clone() })
                .collect(),
            raw_input_contents: vec![input.data.clone()],
        }
    }

    async fn call(&self, request: ModelInferRequest) -> Result<ModelInferResponse, VisionError> {
        let endpoint = Endpoint::from_shared(self.uri())?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);
        let channel = endpoint.connect().await?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| VisionError::Transport(format!("Service was not ready: {}", e)))?;

        let codec: ProstCodec<ModelInferRequest, ModelInferResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(MODEL_INFER_PATH);
        let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl ModelInferenceClient for GrpcInferenceClient {
    async fn predict(
        &self,
        input: &InputTensor,
        model_name: &str,
        model_version: i64,
    ) -> Result<NamedTensors, VisionError> {
        let request = self.build_request(input, model_name, model_version);
        debug!("Calling model {} v{} at {}", model_name, model_version, self.address);

        let response = tokio::time::timeout(self.timeout, self.call(request))
            .await
            .map_err(|_| {
                VisionError::Transport(format!(
                    "No response from {} within {:?}",
                    self.address, self.timeout
                ))
            })??;

        decode_outputs(&response, &self.output_names)
    }
}

/// Extract the requested tensors from a response.
pub fn decode_outputs(response: &ModelInferResponse, wanted: &[String]) -> Result<NamedTensors, VisionError> {
    let mut tensors = NamedTensors::new();
    for (position, output) in response.outputs.iter().enumerate() {
        if !wanted.iter().any(|name| *name == output.name) {
            continue;
        }
        let raw = response.raw_output_contents.get(position).map(Vec::as_slice);
        let values = decode_values(output, raw)?;
        if element_count(&output.shape) != Some(values.len()) {
            return Err(VisionError::Malformed(format!(
                "Tensor {} has shape {:?} but {} values",
                output.name,
                output.shape,
                values.len()
            )));
        }
        tensors.insert(
            output.name.clone(),
            OutputTensor {
                shape: output.shape.clone(),
                values,
            },
        );
    }

    for name in wanted {
        if !tensors.contains_key(name) {
            return Err(VisionError::Malformed(format!("Missing output tensor {}", name)));
        }
    }
    Ok(tensors)
}

/// Number of elements a shape holds; `None` for negative or overflowing dims.
fn element_count(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |count, dim| {
        let dim = usize::try_from(*dim).ok()?;
        count.checked_mul(dim)
    })
}

fn decode_values(output: &InferOutputTensor, raw: Option<&[u8]>) -> Result<Vec<f32>, VisionError> {
    let typed = output.contents.as_ref();
    let has_typed = typed.map(has_values).unwrap_or(false);

    let values = match (output.datatype.as_str(), has_typed) {
        ("FP32", true) => typed.map(|c| c.fp32_contents.clone()),
        ("FP64", true) => typed.map(|c| c.fp64_contents.iter().map(|v| *v as f32).collect()),
        ("INT32", true) => typed.map(|c| c.int_contents.iter().map(|v| *v as f32).collect()),
        ("INT64", true) => typed.map(|c| c.int64_contents.iter().map(|v| *v as f32).collect()),
        ("FP32", false) => raw.map(|b| le_chunks::<4>(b).map(f32::from_le_bytes).collect()),
        ("FP64", false) => raw.map(|b| le_chunks::<8>(b).map(|c| f64::from_le_bytes(c) as f32).collect()),
        ("INT32", false) => raw.map(|b| le_chunks::<4>(b).map(|c| i32::from_le_bytes(c) as f32).collect()),
        ("INT64", false) => raw.map(|b| le_chunks::<8>(b).map(|c| i64::from_le_bytes(c) as f32).collect()),
        (other, _) => {
            return Err(VisionError::Malformed(format!(
                "Tensor {} has unsupported datatype {:?}",
                output.name, other
            )))
        }
    };

    values.ok_or_else(|| VisionError::Malformed(format!("Tensor {} carries no data", output.name)))
}

fn has_values(contents: &InferTensorContents) -> bool {
    !(contents.fp32_contents.is_empty()
        && contents.fp64_contents.is_empty()
        && contents.int_contents.is_empty()
        && contents.int64_contents.is_empty())
}

fn le_chunks<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    bytes.chunks_exact(N).filter_map(|chunk| chunk.try_into().ok())
}

/// Retries transient failures of an inner client.
///
/// Backoff is `base * 2^attempt` plus up to `max_jitter` of uniform random
/// delay. Malformed responses and server-side rejections are returned
/// immediately.
pub struct RetryingClient<C> {
    inner: C,
    retries: u32,
    base_delay: Duration,
    max_jitter: Duration,
}

impl<C: ModelInferenceClient> RetryingClient<C> {
    pub fn new(inner: C, retries: u32) -> Self {
        Self {
            inner,
            retries,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_jitter: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_jitter = max_jitter;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl<C: ModelInferenceClient> ModelInferenceClient for RetryingClient<C> {
    async fn predict(
        &self,
        input: &InputTensor,
        model_name: &str,
        model_version: i64,
    ) -> Result<NamedTensors, VisionError> {
        let mut attempt = 0;
        loop {
            match self.inner.predict(input, model_name, model_version).await {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    warn!(
                        "Inference attempt {} of {} failed: {}. Retrying in {:?}",
                        attempt,
                        self.retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Detection tensors of one frame, batch dimension removed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<DetectionBox>,
    pub classes: Vec<i64>,
    pub scores: Vec<f32>,
    pub num_detections: i64,
}

impl RawDetections {
    /// Interpret the four detection output tensors.
    ///
    /// `names` lists the boxes, classes, scores and count tensors in that
    /// order, as configured in `output_tensor_names`.
    pub fn from_tensors(tensors: &NamedTensors, names: &[String]) -> Result<Self, VisionError> {
        let [boxes_name, classes_name, scores_name, count_name] = names else {
            return Err(VisionError::Malformed(format!(
                "Expected 4 output tensor names, got {}",
                names.len()
            )));
        };
        let get = |name: &str| {
            tensors
                .get(name)
                .ok_or_else(|| VisionError::Malformed(format!("Missing output tensor {}", name)))
        };

        let boxes_tensor = get(boxes_name.as_str())?;
        if boxes_tensor.values.len() % 4 != 0 || boxes_tensor.shape.last() != Some(&4) {
            return Err(VisionError::Malformed(format!(
                "{} has shape {:?}, expected [1, N, 4]",
                boxes_name, boxes_tensor.shape
            )));
        }
        let boxes: Vec<DetectionBox> = boxes_tensor
            .values
            .chunks_exact(4)
            .filter_map(DetectionBox::from_slice)
            .collect();
        let classes: Vec<i64> = get(classes_name.as_str())?
            .values
            .iter()
            .map(|v| v.round() as i64)
            .collect();
        let scores = get(scores_name.as_str())?.values.clone();
        let num_detections = get(count_name.as_str())?
            .values
            .first()
            .map(|v| v.round() as i64)
            .ok_or_else(|| VisionError::Malformed(format!("{} is empty", count_name)))?;

        if classes.len() != boxes.len() || scores.len() != boxes.len() {
            return Err(VisionError::Malformed(format!(
                "Inconsistent detection tensors: {} boxes, {} classes, {} scores",
                boxes.len(),
                classes.len(),
                scores.len()
            )));
        }
        if num_detections < 0 {
            return Err(VisionError::Malformed(format!("num_detections is {}", num_detections)));
        }

        Ok(Self {
            boxes,
            classes,
            scores,
            num_detections,
        })
    }

    /// How many detections to report: `min(cap, num_detections)`, never
    /// more than the tensors actually hold.
    pub fn usable(&self, cap: usize) -> usize {
        cap.min(self.num_detections as usize).min(self.boxes.len())
    }
}
