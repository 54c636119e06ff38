//! Color-space conversion into packed 24-bit RGB.

use crate::traits::{rgb_len, Frame, FrameFormat, Result, UvcError};

/// Convert `src` into `dst` as packed RGB.
///
/// `dst` must hold at least `width * height * 3` bytes; its dimensions,
/// format and metadata are updated to describe the converted image.
pub fn any_to_rgb(src: &Frame, dst: &mut Frame) -> Result<()> {
    let pixels = src.width as usize * src.height as usize;
    let needed = rgb_len(src.width, src.height);
    if dst.data.len() < needed {
        return Err(UvcError::NoMem);
    }

    let out = dst.data.get_mut(..needed).ok_or(UvcError::NoMem)?;

    let converted = match src.format {
        FrameFormat::Yuyv => packed_422_to_rgb(&src.data, pixels, out, [0, 1, 2, 3]),
        FrameFormat::Uyvy => packed_422_to_rgb(&src.data, pixels, out, [1, 0, 3, 2]),
        FrameFormat::Nv12 => nv12_to_rgb(&src.data, src.width, src.height, out),
        FrameFormat::Rgb => {
            let data = source_slice(&src.data, pixels * 3)?;
            out.copy_from_slice(data);
            Ok(())
        }
        FrameFormat::Bgr => {
            let data = source_slice(&src.data, pixels * 3)?;
            for (bgr, rgb) in data.chunks_exact(3).zip(out.chunks_exact_mut(3)) {
                if let (&[b, g, r], [dr, dg, db]) = (bgr, rgb) {
                    (*dr, *dg, *db) = (r, g, b);
                }
            }
            Ok(())
        }
        FrameFormat::Gray8 => {
            let data = source_slice(&src.data, pixels)?;
            for (&luma, rgb) in data.iter().zip(out.chunks_exact_mut(3)) {
                rgb.fill(luma);
            }
            Ok(())
        }
        FrameFormat::Gray16 => {
            let data = source_slice(&src.data, pixels * 2)?;
            for (sample, rgb) in data.chunks_exact(2).zip(out.chunks_exact_mut(3)) {
                if let &[_, high] = sample {
                    rgb.fill(high);
                }
            }
            Ok(())
        }
        other @ (FrameFormat::Uncompressed
        | FrameFormat::Mjpeg
        | FrameFormat::H264
        | FrameFormat::Unknown) => Err(UvcError::NotSupported(format!(
            "no RGB conversion from {other}"
        ))),
    };
    converted?;

    dst.width = src.width;
    dst.height = src.height;
    dst.format = FrameFormat::Rgb;
    dst.metadata = src.metadata.clone();
    Ok(())
}

fn source_slice(data: &[u8], needed: usize) -> Result<&[u8]> {
    data.get(..needed).ok_or_else(|| {
        UvcError::InvalidParam(format!(
            "source frame holds {} bytes, {needed} required",
            data.len()
        ))
    })
}

/// Convert 4:2:2 packed pixel pairs. `order` gives the byte offsets of
/// `[Y0, U, Y1, V]` inside each 4-byte macropixel.
fn packed_422_to_rgb(data: &[u8], pixels: usize, out: &mut [u8], order: [usize; 4]) -> Result<()> {
    let data = source_slice(data, pixels * 2)?;
    let [y0_at, u_at, y1_at, v_at] = order;

    for (pair, rgb) in data.chunks_exact(4).zip(out.chunks_exact_mut(6)) {
        let byte = |at: usize| pair.get(at).copied().unwrap_or_default();
        let (u, v) = (byte(u_at), byte(v_at));
        let (r0, g0, b0) = yuv_to_rgb(byte(y0_at), u, v);
        let (r1, g1, b1) = yuv_to_rgb(byte(y1_at), u, v);
        rgb.copy_from_slice(&[r0, g0, b0, r1, g1, b1]);
    }

    Ok(())
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32, out: &mut [u8]) -> Result<()> {
    let (width, height) = (width as usize, height as usize);
    let chroma_width = width.div_ceil(2);
    let luma_len = width * height;
    let data = source_slice(data, luma_len + chroma_width * height.div_ceil(2) * 2)?;
    let (luma, chroma) = data.split_at(luma_len);

    for (index, rgb) in out.chunks_exact_mut(3).enumerate().take(luma_len) {
        let (x, y) = (index % width, index / width);
        let uv = ((y / 2) * chroma_width + x / 2) * 2;
        let y_val = luma.get(index).copied().unwrap_or_default();
        let u = chroma.get(uv).copied().unwrap_or(128);
        let v = chroma.get(uv + 1).copied().unwrap_or(128);
        let (r, g, b) = yuv_to_rgb(y_val, u, v);
        rgb.copy_from_slice(&[r, g, b]);
    }

    Ok(())
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
///
/// # Arguments
///
/// * `y` - Luminance value (16-235 for studio range)
/// * `u` - Blue-difference chroma value (16-240)
/// * `v` - Red-difference chroma value (16-240)
///
/// # Returns
///
/// RGB tuple with values clamped to 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FrameMetadata;

    fn frame(format: FrameFormat, width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            format,
            metadata: FrameMetadata {
                sequence: 7,
                ..FrameMetadata::default()
            },
        }
    }

    fn convert(src: &Frame) -> Result<Frame> {
        let mut dst = Frame::rgb(src.width, src.height, FrameMetadata::default());
        any_to_rgb(src, &mut dst)?;
        Ok(dst)
    }

    #[test]
    fn test_yuv_neutral_chroma_is_grey() {
        assert_eq!(yuv_to_rgb(100, 128, 128), (100, 100, 100));
    }

    #[test]
    fn test_yuv_clamps() {
        let (r, _, b) = yuv_to_rgb(255, 255, 255);
        assert_eq!((r, b), (255, 255));
        let (r, _, b) = yuv_to_rgb(0, 0, 0);
        assert_eq!((r, b), (0, 0));
    }

    #[test]
    fn test_yuyv_pair() {
        let src = frame(FrameFormat::Yuyv, 2, 1, vec![50, 128, 200, 128]);
        let dst = convert(&src).expect("conversion should succeed");
        assert_eq!(dst.data, vec![50, 50, 50, 200, 200, 200]);
        assert_eq!(dst.format, FrameFormat::Rgb);
        assert_eq!(dst.metadata.sequence, 7);
    }

    #[test]
    fn test_uyvy_matches_yuyv() {
        let yuyv = frame(FrameFormat::Yuyv, 2, 1, vec![81, 90, 145, 240]);
        let uyvy = frame(FrameFormat::Uyvy, 2, 1, vec![90, 81, 240, 145]);
        assert_eq!(
            convert(&yuyv).expect("yuyv").data,
            convert(&uyvy).expect("uyvy").data
        );
    }

    #[test]
    fn test_nv12_grey() {
        let mut data = vec![60; 4 * 2];
        data.extend_from_slice(&[128; 4]);
        let src = frame(FrameFormat::Nv12, 4, 2, data);
        let dst = convert(&src).expect("conversion should succeed");
        assert!(dst.data.iter().all(|&value| value == 60));
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let src = frame(FrameFormat::Bgr, 1, 1, vec![1, 2, 3]);
        assert_eq!(convert(&src).expect("bgr").data, vec![3, 2, 1]);
    }

    #[test]
    fn test_gray16_uses_high_byte() {
        let src = frame(FrameFormat::Gray16, 2, 1, vec![0xff, 0x12, 0x00, 0x80]);
        assert_eq!(
            convert(&src).expect("gray16").data,
            vec![0x12, 0x12, 0x12, 0x80, 0x80, 0x80]
        );
    }

    #[test]
    fn test_short_source_is_rejected() {
        let src = frame(FrameFormat::Yuyv, 4, 4, vec![0; 10]);
        assert!(matches!(convert(&src), Err(UvcError::InvalidParam(_))));
    }

    #[test]
    fn test_small_destination_is_rejected() {
        let src = frame(FrameFormat::Rgb, 2, 2, vec![0; 12]);
        let mut dst = Frame::rgb(1, 1, FrameMetadata::default());
        assert_eq!(any_to_rgb(&src, &mut dst), Err(UvcError::NoMem));
    }

    #[test]
    fn test_compressed_is_not_supported() {
        let src = frame(FrameFormat::Mjpeg, 2, 2, vec![0xff, 0xd8]);
        assert!(matches!(convert(&src), Err(UvcError::NotSupported(_))));
    }
}
