use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

#[derive(Debug)]
pub struct RgbaImage {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode whatever pixel format the camera delivered into RGBA.
pub fn rgba_from_camera(frame: &Buffer) -> Result<RgbaImage> {
    let resolution = frame.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = frame.buffer();
    let pixels = width as usize * height as usize;

    let rgba = match frame.source_frame_format() {
        FrameFormat::NV12 => {
            check_len(data, pixels + pixels / 2, "NV12")?;
            let mut rgba = vec![0u8; pixels * 4];
            let image = YuvBiPlanarImage {
                y_plane: &data[..pixels],
                y_stride: width,
                uv_plane: &data[pixels..pixels + pixels / 2],
                uv_stride: width,
                width,
                height,
            };
            yuv_nv12_to_rgba(
                &image,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
                YuvConversionMode::Balanced,
            )
            .map_err(|err| anyhow!("NV12 conversion failed: {err:?}"))?;
            rgba
        }
        FrameFormat::YUYV => {
            check_len(data, pixels * 2, "YUYV")?;
            let mut rgba = vec![0u8; pixels * 4];
            let packed = YuvPackedImage {
                yuy: data,
                yuy_stride: width * 2,
                width,
                height,
            };
            yuyv422_to_rgba(
                &packed,
                &mut rgba,
                width * 4,
                YuvRange::Full,
                YuvStandardMatrix::Bt709,
            )
            .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;
            rgba
        }
        FrameFormat::MJPEG => decode_mjpeg(data)?,
        FrameFormat::RAWRGB => {
            check_len(data, pixels * 3, "RGB")?;
            interleave_rgb(data, pixels, false)
        }
        FrameFormat::RAWBGR => {
            check_len(data, pixels * 3, "BGR")?;
            interleave_rgb(data, pixels, true)
        }
        FrameFormat::GRAY => {
            check_len(data, pixels, "GRAY")?;
            expand_gray(data, pixels)
        }
    };

    Ok(RgbaImage {
        rgba,
        width,
        height,
    })
}

/// Flip every row in place so the stream reads as a selfie view.
pub fn mirror_horizontal(rgba: &mut [u8], width: u32) {
    let stride = width as usize * 4;
    if stride == 0 {
        return;
    }
    rgba.par_chunks_exact_mut(stride).for_each(|row| {
        let (mut left, mut right) = (0usize, width as usize - 1);
        while left < right {
            for byte in 0..4 {
                row.swap(left * 4 + byte, right * 4 + byte);
            }
            left += 1;
            right -= 1;
        }
    });
}

fn check_len(data: &[u8], expected: usize, format: &str) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{format} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn decode_mjpeg(data: &[u8]) -> Result<Vec<u8>> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    if let Some(info) = decoder.info() {
        let expected = info.width as usize * info.height as usize * 4;
        if rgba.len() < expected {
            return Err(anyhow!(
                "MJPEG decode produced {} bytes, expected {expected}",
                rgba.len()
            ));
        }
    }
    Ok(rgba)
}

fn interleave_rgb(data: &[u8], pixels: usize, swap_rb: bool) -> Vec<u8> {
    let mut rgba = vec![255u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            let (r, b) = if swap_rb { (src[2], src[0]) } else { (src[0], src[2]) };
            dst[0] = r;
            dst[1] = src[1];
            dst[2] = b;
        });
    rgba
}

fn expand_gray(data: &[u8], pixels: usize) -> Vec<u8> {
    let mut rgba = vec![255u8; pixels * 4];
    rgba.par_chunks_exact_mut(4)
        .zip(data[..pixels].par_iter().copied())
        .for_each(|(dst, value)| {
            dst[0] = value;
            dst[1] = value;
            dst[2] = value;
        });
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_swaps_row_ends() {
        // 2x2 frame with distinct pixel tags.
        let mut rgba = vec![
            1, 1, 1, 255, 2, 2, 2, 255, //
            3, 3, 3, 255, 4, 4, 4, 255,
        ];
        mirror_horizontal(&mut rgba, 2);
        assert_eq!(
            rgba,
            vec![
                2, 2, 2, 255, 1, 1, 1, 255, //
                4, 4, 4, 255, 3, 3, 3, 255,
            ]
        );
    }

    #[test]
    fn mirror_keeps_center_column() {
        let mut rgba = vec![
            1, 0, 0, 255, 2, 0, 0, 255, 3, 0, 0, 255, //
        ];
        mirror_horizontal(&mut rgba, 3);
        assert_eq!(rgba[0], 3);
        assert_eq!(rgba[4], 2);
        assert_eq!(rgba[8], 1);
    }
}
