// src/preprocessing.rs

use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};

const PAD_VALUE: u8 = 114;

/// Model input plus the transform needed to map boxes back to frame pixels.
#[derive(Debug, Clone)]
pub struct Letterboxed {
    /// CHW, [0,1], `3 * size * size` values
    pub tensor: Vec<f32>,
    pub size: usize,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterboxed {
    /// Model-space point -> frame-space point
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit the frame inside a `size x size` square keeping aspect ratio,
/// pad with grey, normalize to [0,1] and convert HWC -> CHW.
pub fn letterbox(frame: &Frame, size: usize) -> Result<Letterboxed> {
    let (src_w, src_h) = (frame.width, frame.height);

    let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale) as usize).clamp(1, size);
    let scaled_h = ((src_h as f32 * scale) as usize).clamp(1, size);

    let pad_x = (size - scaled_w) as f32 / 2.0;
    let pad_y = (size - scaled_h) as f32 / 2.0;

    let resized = resize(frame, scaled_w, scaled_h)?;

    let mut canvas = vec![PAD_VALUE; size * size * 3];
    let (off_x, off_y) = (pad_x as usize, pad_y as usize);
    for y in 0..scaled_h {
        let src_row = &resized[y * scaled_w * 3..(y + 1) * scaled_w * 3];
        let dst_start = ((y + off_y) * size + off_x) * 3;
        canvas[dst_start..dst_start + scaled_w * 3].copy_from_slice(src_row);
    }

    let plane = size * size;
    let mut tensor = vec![0.0f32; 3 * plane];
    for (i, pixel) in canvas.chunks_exact(3).enumerate() {
        for c in 0..3 {
            tensor[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }

    Ok(Letterboxed {
        tensor,
        size,
        scale,
        pad_x,
        pad_y,
    })
}

/// Bilinear resize of a packed RGB frame.
fn resize(frame: &Frame, dst_w: usize, dst_h: usize) -> Result<Vec<u8>> {
    let packed = &frame.data[..frame.width * frame.height * 3];
    if (frame.width, frame.height) == (dst_w, dst_h) {
        return Ok(packed.to_vec());
    }

    let flat = Mat::from_slice(packed)?;
    let src = flat.reshape(3, frame.height as i32)?;
    let mut dst = Mat::default();
    imgproc::resize(
        &src,
        &mut dst,
        Size::new(dst_w as i32, dst_h as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    Ok(dst.data_bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_shape_and_padding() {
        let frame = Frame {
            data: vec![255u8; 640 * 320 * 3],
            width: 640,
            height: 320,
        };
        let lb = letterbox(&frame, 320).unwrap();
        assert_eq!(lb.tensor.len(), 3 * 320 * 320);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        // Top-left is padding, centre is image
        assert!((lb.tensor[0] - 114.0 / 255.0).abs() < 1e-6);
        assert!((lb.tensor[160 * 320 + 160] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unmap_inverts_transform() {
        let frame = Frame {
            data: vec![0u8; 1280 * 720 * 3],
            width: 1280,
            height: 720,
        };
        let lb = letterbox(&frame, 640).unwrap();
        let (x, y) = lb.unmap(320.0, 320.0);
        assert!((x - 640.0).abs() < 1.0);
        assert!((y - 360.0).abs() < 1.0);
    }

    #[test]
    fn test_resize_downscale_keeps_layout() {
        // Left half red, right half blue
        let (w, h) = (100, 40);
        let mut data = vec![0u8; w * h * 3];
        for (i, px) in data.chunks_exact_mut(3).enumerate() {
            px.copy_from_slice(if i % w < w / 2 { &[255, 0, 0] } else { &[0, 0, 255] });
        }
        let frame = Frame {
            data,
            width: w,
            height: h,
        };

        let dst = resize(&frame, 50, 20).unwrap();
        assert_eq!(dst.len(), 50 * 20 * 3);
        assert_eq!(&dst[..3], &[255, 0, 0]);
        assert_eq!(&dst[(50 - 1) * 3..50 * 3], &[0, 0, 255]);
    }

    #[test]
    fn test_same_size_is_exact_copy() {
        let frame = Frame {
            data: (0..4 * 4 * 3).map(|v| v as u8).collect(),
            width: 4,
            height: 4,
        };
        assert_eq!(resize(&frame, 4, 4).unwrap(), frame.data);
    }
}
