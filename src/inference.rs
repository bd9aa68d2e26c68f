// src/inference.rs

use crate::types::{BackendKind, ModelConfig};
use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Scalar},
    dnn,
    prelude::*,
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info, warn};

/// Tensor in, tensor out. Input is a `[1, 3, size, size]` CHW float tensor;
/// output is the model's raw first output, flattened.
pub trait InferenceBackend: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, input: &[f32], size: usize) -> Result<Vec<f32>>;
}

/// Pick the backend once, at startup. `auto` prefers OpenCV DNN and falls
/// back to ONNX Runtime when the network cannot be imported.
pub fn build_backend(config: &ModelConfig) -> Result<Box<dyn InferenceBackend>> {
    let backend: Box<dyn InferenceBackend> = match config.backend {
        BackendKind::Ort => Box::new(OrtBackend::new(config)?),
        BackendKind::Opencv => Box::new(OpenCvBackend::new(config)?),
        BackendKind::Auto => match OpenCvBackend::new(config) {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                warn!("OpenCV DNN could not import {}: {:#}", config.path, e);
                Box::new(
                    OrtBackend::new(config).context("ONNX Runtime fallback also failed")?,
                )
            }
        },
    };

    info!("✓ Detector backend: {}", backend.name());
    Ok(backend)
}

pub struct OrtBackend {
    session: Session,
    input_name: String,
}

impl OrtBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading model via ONNX Runtime: {}", config.path);

        let mut builder = Session::builder()?;
        if config.use_cuda {
            info!("Enabling CUDA execution provider");
            builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()])?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .with_inter_threads(1)?
            .commit_from_file(&config.path)
            .context("Failed to load model")?;

        Ok(Self {
            session,
            input_name: config.input_name.clone(),
        })
    }
}

impl InferenceBackend for OrtBackend {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn infer(&mut self, input: &[f32], size: usize) -> Result<Vec<f32>> {
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])?;
        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        debug!("Model output shape: {:?}", output_shape);

        Ok(data.to_vec())
    }
}

pub struct OpenCvBackend {
    net: dnn::Net,
}

impl OpenCvBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading model via OpenCV DNN: {}", config.path);

        let mut net = dnn::read_net_from_onnx(&config.path)?;
        if config.use_cuda {
            net.set_preferable_backend(dnn::DNN_BACKEND_CUDA)?;
            net.set_preferable_target(dnn::DNN_TARGET_CUDA)?;
        }

        Ok(Self { net })
    }
}

impl InferenceBackend for OpenCvBackend {
    fn name(&self) -> &'static str {
        "opencv-dnn"
    }

    fn infer(&mut self, input: &[f32], size: usize) -> Result<Vec<f32>> {
        let side = size as i32;
        let flat = Mat::from_slice(input)?;
        let blob = flat.reshape_nd(1, &[1, 3, side, side])?.try_clone()?;

        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;

        Ok(output.data_typed::<f32>()?.to_vec())
    }
}
