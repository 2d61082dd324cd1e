use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Hand, Landmark, NUM_LANDMARKS};

pub const PALM_INPUT_SIZE: u32 = 192;
pub const HANDPOSE_INPUT_SIZE: u32 = 224;

/// How a frame was letterboxed into a square model input.
#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// How a rotated square crop maps back onto the source frame.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {expected}",
            frame.rgba.len()
        ));
    }
    Ok(())
}

/// Scale the frame into a `target_size` square with symmetric padding and
/// pack it as a normalized NHWC tensor.
pub fn prepare_letterboxed(frame: &Frame, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;

    let scale = target_size as f32 / frame.width.max(frame.height) as f32;
    let new_w = (frame.width as f32 * scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * scale).round().max(1.0) as u32;

    let src = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    fir::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("letterbox resize failed")?;
    let resized = dst.into_vec();

    let pad_x = ((target_size as i64 - new_w as i64) / 2).max(0) as usize;
    let pad_y = ((target_size as i64 - new_h as i64) / 2).max(0) as usize;
    let mut canvas = vec![0u8; target_size as usize * target_size as usize * 4];
    for px in canvas.chunks_exact_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..new_h as usize {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[row * src_stride..(row + 1) * src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build letterbox tensor: {err}"))?;

    Ok((
        input,
        LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

/// Sample a rotated square region of the frame into a normalized NHWC tensor.
pub fn prepare_rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;

    let mut data = Vec::with_capacity(output_size as usize * output_size as usize * 3);
    let half = output_size as f32 / 2.0;
    let scale = side / output_size as f32;
    let (sin, cos) = angle.sin_cos();

    for y in 0..output_size {
        let dy = (y as f32 + 0.5 - half) * scale;
        for x in 0..output_size {
            let dx = (x as f32 + 0.5 - half) * scale;
            let src_x = center.0 + dx * cos - dy * sin;
            let src_y = center.1 + dx * sin + dy * cos;
            data.extend_from_slice(&sample_rgb(frame, src_x, src_y));
        }
    }

    let input =
        Array4::from_shape_vec((1, output_size as usize, output_size as usize, 3), data)
            .map_err(|err| anyhow!("failed to build crop tensor: {err}"))?;

    Ok((
        input,
        CropTransform {
            center,
            side,
            angle,
            output_size,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

impl CropTransform {
    /// Map a point in crop pixels back to source-frame pixels.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        let px = self.center.0 + dx * cos - dy * sin;
        let py = self.center.1 + dx * sin + dy * cos;
        (
            px.clamp(0.0, self.orig_w.saturating_sub(1) as f32),
            py.clamp(0.0, self.orig_h.saturating_sub(1) as f32),
        )
    }
}

/// Decode a flat `21 x (x, y, z)` model output into a `Hand` in normalized
/// image coordinates. Depth is rescaled the same way as x/y so hands from
/// different crop sizes stay comparable.
pub fn decode_hand(flat: &[f32], transform: &CropTransform) -> Result<Hand> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmark output length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    let frame_span = transform.orig_w.max(transform.orig_h).max(1) as f32;
    let depth_scale = transform.side / transform.output_size as f32 / frame_span;

    let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
    for (landmark, chunk) in landmarks.iter_mut().zip(flat.chunks_exact(3)) {
        let (px, py) = transform.project(chunk[0], chunk[1]);
        *landmark = Landmark {
            x: px / transform.orig_w.max(1) as f32,
            y: py / transform.orig_h.max(1) as f32,
            z: chunk[2] * depth_scale,
        };
    }

    Ok(Hand::new(landmarks))
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = (iy as u32 * frame.width + ix as u32) as usize * 4;
        if idx + 2 >= frame.rgba.len() {
            return [0.0, 0.0, 0.0];
        }
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    [
        lerp(lerp(c00[0], c10[0], fx), lerp(c01[0], c11[0], fx), fy),
        lerp(lerp(c00[1], c10[1], fx), lerp(c01[1], c11[1], fx), fy),
        lerp(lerp(c00[2], c10[2], fx), lerp(c01[2], c11[2], fx), fy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandLandmark;

    fn identity_transform(size: u32, frame: u32) -> CropTransform {
        CropTransform {
            center: (frame as f32 / 2.0, frame as f32 / 2.0),
            side: frame as f32,
            angle: 0.0,
            output_size: size,
            orig_w: frame,
            orig_h: frame,
        }
    }

    #[test]
    fn decode_requires_full_landmark_set() {
        let transform = identity_transform(224, 640);
        assert!(decode_hand(&[0.0; 30], &transform).is_err());
    }

    #[test]
    fn decoded_landmarks_are_normalized() {
        let transform = identity_transform(224, 640);
        // Crop center maps to frame center.
        let mut flat = vec![0.0f32; NUM_LANDMARKS * 3];
        flat[0] = 112.0;
        flat[1] = 112.0;
        let hand = decode_hand(&flat, &transform).unwrap();
        let wrist = hand.landmark(HandLandmark::Wrist);
        assert!((wrist.x - 0.5).abs() < 1e-3);
        assert!((wrist.y - 0.5).abs() < 1e-3);
    }

    #[test]
    fn projection_round_trips_the_center() {
        let transform = CropTransform {
            center: (100.0, 80.0),
            side: 120.0,
            angle: 0.7,
            output_size: 224,
            orig_w: 640,
            orig_h: 480,
        };
        let (px, py) = transform.project(112.0, 112.0);
        assert!((px - 100.0).abs() < 1.0);
        assert!((py - 80.0).abs() < 1.0);
    }
}
