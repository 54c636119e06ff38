//! Frame validation utilities for test pattern verification.
//!
//! These check RGB frames produced by the capture callback against known
//! test patterns. Useful for integration testing with virtual cameras.

use crate::traits::{Frame, FrameFormat, Result, UvcError};

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u8 = 15;

fn invalid(message: String) -> UvcError {
    UvcError::InvalidParam(message)
}

fn require_rgb(frame: &Frame) -> Result<()> {
    if frame.format == FrameFormat::Rgb {
        Ok(())
    } else {
        Err(invalid(format!("expected an rgb frame, got {}", frame.format)))
    }
}

/// Validates that an RGB frame shows the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical stripes on the middle row.
pub fn validate_color_bars(frame: &Frame) -> Result<()> {
    require_rgb(frame)?;
    let bar_width = frame.width / 8;
    let center_y = frame.height / 2;

    for (bar_x, expected) in (0u32..).step_by(bar_width.max(1) as usize).zip(SMPTE_COLOR_BARS) {
        let sample_x = bar_x + bar_width / 2;
        let actual = frame
            .rgb_at(sample_x, center_y)
            .ok_or_else(|| invalid(format!("no pixel at ({sample_x}, {center_y})")))?;

        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(invalid(format!(
                "color bar mismatch at ({sample_x}, {center_y}): \
                 expected RGB{expected:?}, got RGB{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that an RGB frame shows a left-to-right luminance ramp.
///
/// Luminance along the middle row must never drop by more than rounding
/// error and must rise by at least 50 overall.
pub fn validate_gradient(frame: &Frame) -> Result<()> {
    require_rgb(frame)?;
    let center_y = frame.height / 2;

    let mut first: Option<f32> = None;
    let mut previous: Option<f32> = None;

    for x in (0..frame.width).step_by(10) {
        let (r, g, b) = frame
            .rgb_at(x, center_y)
            .ok_or_else(|| invalid(format!("no pixel at ({x}, {center_y})")))?;
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(prev) = previous {
            if luminance < prev - 1.0 {
                return Err(invalid(format!(
                    "gradient drops at x={x}: {luminance} < {prev}"
                )));
            }
        }
        first.get_or_insert(luminance);
        previous = Some(luminance);
    }

    match (first, previous) {
        (Some(first), Some(last)) if last - first >= 50.0 => Ok(()),
        (Some(first), Some(last)) => Err(invalid(format!(
            "insufficient luminance change for gradient: {}",
            last - first
        ))),
        _ => Err(invalid("empty frame".to_owned())),
    }
}

/// Validates that frame sequence numbers increment by one with no gaps.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(invalid("cannot validate empty frame sequence".to_owned()));
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.metadata.sequence.wrapping_add(1);
            if curr.metadata.sequence != expected {
                return Err(invalid(format!(
                    "frame sequence gap at index {}: expected {expected}, got {}",
                    index + 1,
                    curr.metadata.sequence
                )));
            }
        }
    }

    Ok(())
}

/// Whether all three channels are within `tolerance` of each other.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
