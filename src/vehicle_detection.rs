// src/vehicle_detection.rs

use crate::inference::InferenceBackend;
use crate::preprocessing::{letterbox, Letterboxed};
use crate::types::{BoundingBox, Config, Detection, Frame, OutputLayout};
use anyhow::{bail, Result};
use ndarray::ArrayView2;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DetectorParams {
    pub input_size: usize,
    pub num_classes: usize,
    pub layout: OutputLayout,
    pub vehicle_classes: HashSet<usize>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl DetectorParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            input_size: config.model.input_size,
            num_classes: config.model.num_classes,
            layout: config.model.output_layout,
            vehicle_classes: config.detector.vehicle_classes.iter().copied().collect(),
            confidence_threshold: config.detector.confidence_threshold,
            nms_threshold: config.detector.nms_threshold,
        }
    }
}

pub struct VehicleDetector {
    backend: Box<dyn InferenceBackend>,
    params: DetectorParams,
}

impl VehicleDetector {
    pub fn new(backend: Box<dyn InferenceBackend>, params: DetectorParams) -> Self {
        Self { backend, params }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Vehicle detections for one frame. An absent or empty frame yields an
    /// empty result and never reaches the model.
    pub fn detect(&mut self, frame: Option<&Frame>) -> Result<Vec<Detection>> {
        let frame = match frame {
            Some(f) if !f.is_empty() => f,
            _ => return Ok(Vec::new()),
        };

        let input = letterbox(frame, self.params.input_size)?;
        let output = self.backend.infer(&input.tensor, input.size)?;
        let detections = self.postprocess(&output, &input, frame)?;

        debug!("Detected {} vehicles", detections.len());
        Ok(detections)
    }

    fn postprocess(
        &self,
        output: &[f32],
        input: &Letterboxed,
        frame: &Frame,
    ) -> Result<Vec<Detection>> {
        let classes = self.params.num_classes;

        // YOLOv5: [N, 5 + C] rows of cx, cy, w, h, obj, cls...
        // YOLOv8: [4 + C, N], no objectness
        let (preds, score_offset) = match self.params.layout {
            OutputLayout::Yolov5 => {
                let cols = 5 + classes;
                if output.len() % cols != 0 {
                    bail!(
                        "output length {} is not a multiple of {} (yolov5, {} classes)",
                        output.len(),
                        cols,
                        classes
                    );
                }
                (ArrayView2::from_shape((output.len() / cols, cols), output)?, 5)
            }
            OutputLayout::Yolov8 => {
                let rows = 4 + classes;
                if output.len() % rows != 0 {
                    bail!(
                        "output length {} is not a multiple of {} (yolov8, {} classes)",
                        output.len(),
                        rows,
                        classes
                    );
                }
                let view = ArrayView2::from_shape((rows, output.len() / rows), output)?;
                (view.reversed_axes(), 4)
            }
        };

        let (frame_w, frame_h) = (frame.width as f32, frame.height as f32);
        let mut candidates = Vec::new();

        for pred in preds.rows() {
            let objectness = if score_offset == 5 { pred[4] } else { 1.0 };

            let mut best_class = 0;
            let mut best_score = f32::MIN;
            for c in 0..classes {
                let score = pred[score_offset + c];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            let confidence = objectness * best_score;
            if confidence <= self.params.confidence_threshold
                || !self.params.vehicle_classes.contains(&best_class)
            {
                continue;
            }

            let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
            let (x1, y1) = input.unmap(cx - w / 2.0, cy - h / 2.0);
            let (x2, y2) = input.unmap(cx + w / 2.0, cy + h / 2.0);

            let (x1, y1) = (x1.clamp(0.0, frame_w), y1.clamp(0.0, frame_h));
            let (x2, y2) = (x2.clamp(0.0, frame_w), y2.clamp(0.0, frame_h));

            candidates.push(Detection {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
                confidence,
                class_id: best_class,
            });
        }

        Ok(nms(candidates, self.params.nms_threshold))
    }
}

/// Greedy non-maximum suppression, class-agnostic.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&det.bbox) < iou_threshold)
        {
            keep.push(det);
        }
    }

    keep
}
