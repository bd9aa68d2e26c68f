// src/measurement.rs
//
// One measurement cycle: N shots across every camera of every direction,
// reduced to a single congestion value per direction.

use crate::frame_source::FrameSource;
use crate::metrics::LoopMetrics;
use crate::types::{DirectionConfig, ProgramId};
use crate::vehicle_detection::VehicleDetector;
use serde::Serialize;
use tracing::{debug, warn};

/// Arithmetic mean of per-shot counts. Empty input is 0, not an error.
pub fn average(counts: &[u32]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    counts.iter().map(|&c| c as f64).sum::<f64>() / counts.len() as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectionLoad {
    pub name: String,
    pub program: ProgramId,
    /// Sum over cameras of each camera's mean count across its usable shots.
    pub congestion: f64,
    pub usable_shots: usize,
    pub expected_shots: usize,
}

pub fn measure(
    source: &mut dyn FrameSource,
    detector: &mut VehicleDetector,
    directions: &[DirectionConfig],
    shots: usize,
    metrics: &LoopMetrics,
) -> Vec<DirectionLoad> {
    // counts[direction][camera] -> one entry per usable shot
    let mut counts: Vec<Vec<Vec<u32>>> = directions
        .iter()
        .map(|d| vec![Vec::with_capacity(shots); d.cameras.len()])
        .collect();

    for shot in 0..shots {
        for (d_idx, direction) in directions.iter().enumerate() {
            for (c_idx, cam_id) in direction.cameras.iter().enumerate() {
                let frame = match source.read(cam_id) {
                    Some(frame) => frame,
                    None => {
                        metrics.inc(&metrics.absent_frames);
                        continue;
                    }
                };

                match detector.detect(Some(&frame)) {
                    Ok(detections) => {
                        let n = detections.len() as u32;
                        metrics.add(&metrics.vehicles_counted, n as u64);
                        debug!("shot {} cam {}: {} vehicles", shot + 1, cam_id, n);
                        counts[d_idx][c_idx].push(n);
                    }
                    Err(e) => {
                        warn!("Detection failed on cam {}: {:#}", cam_id, e);
                        metrics.inc(&metrics.absent_frames);
                    }
                }
            }
        }
    }

    directions
        .iter()
        .zip(counts)
        .map(|(direction, per_camera)| {
            let usable_shots: usize = per_camera.iter().map(Vec::len).sum();
            if usable_shots == 0 {
                warn!(
                    "No usable shots for direction '{}', treating it as uncongested",
                    direction.name
                );
            }
            DirectionLoad {
                name: direction.name.clone(),
                program: direction.program,
                congestion: per_camera.iter().map(|c| average(c)).sum(),
                usable_shots,
                expected_shots: shots * direction.cameras.len(),
            }
        })
        .collect()
}
