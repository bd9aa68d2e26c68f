// src/mask.rs
//
// Static per-camera exclusion masks. Each camera may have a JSON file
// `cam<ID>_mask.json` in the mask directory:
//
//     {"polygons": [[[x, y], [x, y], ...], ...]}
//
// Coordinates are absolute frame pixels. Pixels inside or on the edge of
// any polygon are zeroed before detection; everything else is kept.

use crate::error::MaskError;
use crate::types::Frame;
use opencv::{
    core::{self, Mat, Point, Scalar, Vector},
    imgproc,
    prelude::*,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct MaskFile {
    polygons: Vec<Vec<[f32; 2]>>,
}

#[derive(Debug, Clone, Default)]
pub struct Mask {
    polygons: Vec<Vec<(f32, f32)>>,
}

impl Mask {
    pub fn new(polygons: Vec<Vec<(f32, f32)>>) -> Self {
        Self { polygons }
    }

    pub fn from_file(path: &Path) -> Result<Self, MaskError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| MaskError::Io {
            path: display.clone(),
            source,
        })?;
        let parsed: MaskFile = serde_json::from_str(&text).map_err(|source| MaskError::Parse {
            path: display.clone(),
            source,
        })?;

        let mut polygons = Vec::with_capacity(parsed.polygons.len());
        for (index, poly) in parsed.polygons.into_iter().enumerate() {
            if poly.len() < 3 {
                return Err(MaskError::InvalidPolygon {
                    path: display,
                    index,
                    reason: format!("needs at least 3 points, got {}", poly.len()),
                });
            }
            if poly.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
                return Err(MaskError::InvalidPolygon {
                    path: display,
                    index,
                    reason: "non-finite coordinate".to_string(),
                });
            }
            polygons.push(poly.into_iter().map(|p| (p[0], p[1])).collect());
        }

        Ok(Self { polygons })
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// Single-channel raster of the frame size, 255 where excluded. Each
    /// polygon is filled on its own so overlapping polygons union, and
    /// boundary pixels count as inside. Vertices truncate to integer pixels.
    pub fn raster(&self, width: usize, height: usize) -> opencv::Result<Mat> {
        let mut raster = Mat::new_rows_cols_with_default(
            height as i32,
            width as i32,
            core::CV_8UC1,
            Scalar::all(0.0),
        )?;

        for poly in &self.polygons {
            let pts: Vector<Point> = poly
                .iter()
                .map(|&(x, y)| Point::new(x as i32, y as i32))
                .collect();
            let mut contours = Vector::<Vector<Point>>::new();
            contours.push(pts);
            imgproc::fill_poly(
                &mut raster,
                &contours,
                Scalar::all(255.0),
                imgproc::LINE_8,
                0,
                Point::new(0, 0),
            )?;
        }

        Ok(raster)
    }

    /// Zero every excluded pixel in place.
    pub fn apply(&self, frame: &mut Frame) -> opencv::Result<()> {
        if self.polygons.is_empty() || frame.is_empty() {
            return Ok(());
        }
        let raster = self.raster(frame.width, frame.height)?;
        for (pixel, &excluded) in frame.data.chunks_exact_mut(3).zip(raster.data_bytes()?) {
            if excluded != 0 {
                pixel.fill(0);
            }
        }
        Ok(())
    }
}

/// Load one mask per camera. A missing file means "no masking" for that
/// camera; a file that exists but cannot be parsed is an error.
pub fn load_masks<'a, I>(mask_dir: &Path, camera_ids: I) -> Result<HashMap<String, Mask>, MaskError>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut masks = HashMap::new();

    for cam_id in camera_ids {
        let path = mask_dir.join(format!("cam{}_mask.json", cam_id));
        if path.is_file() {
            let mask = Mask::from_file(&path)?;
            debug!(
                "Loaded mask for cam {} ({} polygons)",
                cam_id,
                mask.polygon_count()
            );
            masks.insert(cam_id.clone(), mask);
        } else {
            warn!(
                "Mask file not found for cam {} ({}), no masking applied",
                cam_id,
                path.display()
            );
            masks.insert(cam_id.clone(), Mask::default());
        }
    }

    Ok(masks)
}
