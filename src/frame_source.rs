// src/frame_source.rs

use crate::mask::Mask;
use crate::types::Frame;
use anyhow::{bail, Result};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

/// Next masked frame for a camera. `None` means the capture failed and the
/// shot must be skipped, which is not the same as a frame with no vehicles.
pub trait FrameSource: Send {
    fn read(&mut self, camera_id: &str) -> Option<Frame>;
}

struct CameraStream {
    uri: String,
    cap: Option<VideoCapture>,
    mask: Mask,
    /// Consecutive failed opens; reset once a capture opens.
    open_attempts: u64,
}

impl CameraStream {
    fn ensure_open(&mut self) -> Result<&mut VideoCapture> {
        if self.cap.is_none() {
            self.open_attempts += 1;
            let cap = VideoCapture::from_file(&self.uri, videoio::CAP_ANY)?;
            if !cap.is_opened()? {
                bail!("cannot open {} (attempt {})", self.uri, self.open_attempts);
            }
            if self.open_attempts > 1 {
                info!("Reopened {} after {} attempts", self.uri, self.open_attempts);
            }
            self.open_attempts = 0;
            self.cap = Some(cap);
        }
        match self.cap.as_mut() {
            Some(cap) => Ok(cap),
            None => bail!("capture for {} not initialized", self.uri),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let cap = self.ensure_open()?;

        let mut mat = Mat::default();
        if !VideoCaptureTrait::read(cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        Ok(Some(Frame {
            data: rgb_mat.data_bytes()?.to_vec(),
            width: rgb_mat.cols() as usize,
            height: rgb_mat.rows() as usize,
        }))
    }
}

/// One independent OpenCV capture per camera, each with its own static mask.
pub struct CameraFrameSource {
    streams: HashMap<String, CameraStream>,
}

impl CameraFrameSource {
    /// Open every configured camera. A camera that cannot be opened now is
    /// kept and retried on its next read.
    pub fn open(cameras: &BTreeMap<String, String>, mut masks: HashMap<String, Mask>) -> Self {
        let mut streams = HashMap::new();

        for (cam_id, uri) in cameras {
            let mut stream = CameraStream {
                uri: uri.clone(),
                cap: None,
                mask: masks.remove(cam_id).unwrap_or_default(),
                open_attempts: 0,
            };
            match stream.ensure_open() {
                Ok(_) => info!("✓ Camera {} opened ({})", cam_id, uri),
                Err(e) => error!("Cannot open camera {} ({}): {:#}", cam_id, uri, e),
            }
            streams.insert(cam_id.clone(), stream);
        }

        Self { streams }
    }
}

impl FrameSource for CameraFrameSource {
    fn read(&mut self, camera_id: &str) -> Option<Frame> {
        let stream = match self.streams.get_mut(camera_id) {
            Some(s) => s,
            None => {
                error!("Camera {} not initialized", camera_id);
                return None;
            }
        };

        let mut frame = match stream.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("Failed to read from camera {}, will reopen", camera_id);
                stream.cap = None;
                return None;
            }
            Err(e) => {
                warn!("Camera {} capture error: {:#}", camera_id, e);
                stream.cap = None;
                return None;
            }
        };

        // An unmasked frame must never reach the detector.
        if let Err(e) = stream.mask.apply(&mut frame) {
            error!("Cannot mask frame from camera {}: {}", camera_id, e);
            return None;
        }
        debug!(
            "Camera {}: {}x{} frame",
            camera_id, frame.width, frame.height
        );
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// `count` solid red PNGs readable as an OpenCV image sequence.
    fn image_sequence(dir: &Path, count: usize) -> String {
        for i in 0..count {
            image::RgbImage::from_pixel(8, 6, image::Rgb([255, 0, 0]))
                .save(dir.join(format!("frame_{:02}.png", i)))
                .unwrap();
        }
        dir.join("frame_%02d.png").to_string_lossy().into_owned()
    }

    fn cameras(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(id, uri)| (id.to_string(), uri.to_string()))
            .collect()
    }

    #[test]
    fn test_unknown_camera_is_absent() {
        let mut source = CameraFrameSource::open(&BTreeMap::new(), HashMap::new());
        assert!(source.read("7").is_none());
    }

    #[test]
    fn test_dead_camera_retried_on_every_read() {
        let mut source =
            CameraFrameSource::open(&cameras(&[("1", "/nonexistent/cam.mp4")]), HashMap::new());
        assert_eq!(source.streams["1"].open_attempts, 1);

        for attempt in 2..=4 {
            assert!(source.read("1").is_none());
            assert!(source.streams["1"].cap.is_none());
            assert_eq!(source.streams["1"].open_attempts, attempt);
        }
    }

    #[test]
    fn test_dead_camera_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let live = image_sequence(dir.path(), 3);
        let mut source = CameraFrameSource::open(
            &cameras(&[("1", "/nonexistent/cam.mp4"), ("2", &live)]),
            HashMap::new(),
        );

        for _ in 0..3 {
            assert!(source.read("1").is_none());
            let frame = source.read("2").expect("live camera frame");
            assert_eq!((frame.width, frame.height), (8, 6));
            // BGR capture converted back to RGB
            assert_eq!(&frame.data[..3], &[255, 0, 0]);
        }
    }

    #[test]
    fn test_stream_reopens_after_failed_read() {
        let dir = tempfile::tempdir().unwrap();
        let live = image_sequence(dir.path(), 2);
        let mut source = CameraFrameSource::open(&cameras(&[("2", &live)]), HashMap::new());

        assert!(source.read("2").is_some());
        assert!(source.read("2").is_some());

        // End of sequence behaves like a dropped stream
        assert!(source.read("2").is_none());
        assert!(source.streams["2"].cap.is_none());

        assert!(source.read("2").is_some());
        assert!(source.streams["2"].cap.is_some());
    }

    #[test]
    fn test_mask_applied_to_captured_frames() {
        let dir = tempfile::tempdir().unwrap();
        let live = image_sequence(dir.path(), 1);
        let masks = HashMap::from([(
            "2".to_string(),
            Mask::new(vec![vec![(0.0, 0.0), (3.0, 0.0), (3.0, 5.0), (0.0, 5.0)]]),
        )]);
        let mut source = CameraFrameSource::open(&cameras(&[("2", &live)]), masks);

        let frame = source.read("2").unwrap();
        for (i, px) in frame.data.chunks_exact(3).enumerate() {
            let expect: [u8; 3] = if i % 8 <= 3 { [0, 0, 0] } else { [255, 0, 0] };
            assert_eq!(px, &expect, "pixel {}", i);
        }
    }
}
