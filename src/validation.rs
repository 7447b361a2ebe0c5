//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that converted frames contain
//! expected test patterns. Useful for integration testing with virtual cameras.

use std::sync::Arc;

use thiserror::Error;

use crate::pool::PixelBuffer;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values a studio-range YUV color bar source converts to,
/// and what the mock driver renders for its color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
pub const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Minimum luminance rise across a frame for it to count as a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Reasons a frame fails validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A sample position fell outside the frame.
    #[error("pixel ({x}, {y}) out of bounds")]
    OutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// A color bar had the wrong color.
    #[error("color bar {bar} at ({x}, {y}): expected RGB{expected:?}, got RGB{actual:?}")]
    ColorBar {
        /// Bar index, left to right.
        bar: usize,
        /// Sample column.
        x: u32,
        /// Sample row.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Observed color.
        actual: (u8, u8, u8),
    },

    /// Luminance fell between two samples.
    #[error("gradient not increasing at x={x}: luminance {luminance} < previous {previous}")]
    GradientDecreasing {
        /// Sample column.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance at the previous sample.
        previous: f32,
    },

    /// The frame is too flat to be a gradient.
    #[error("insufficient luminance change for gradient: {0} (expected at least 50)")]
    GradientFlat(f32),

    /// No frames were given.
    #[error("cannot validate empty frame sequence")]
    EmptySequence,

    /// A sequence number did not increase.
    #[error("frame sequence not increasing at index {index}: {previous} then {current}")]
    SequenceOrder {
        /// Index of the offending frame.
        index: usize,
        /// Sequence number of the frame before it.
        previous: u32,
        /// Its own sequence number.
        current: u32,
    },
}

/// Result type for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;

fn rgb_at(frame: &PixelBuffer, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    frame
        .rgb_at(x, y)
        .ok_or(ValidationError::OutOfBounds { x, y })
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Checks 8 vertical stripes at their center positions, verifying that each
/// stripe contains the expected color with a tolerance for YUV-to-RGB
/// conversion inaccuracies.
pub fn validate_color_bars(frame: &PixelBuffer) -> Result<()> {
    let bar_width = frame.width() / 8;
    let center_y = frame.height() / 2;

    for (bar, expected) in SMPTE_COLOR_BARS.iter().enumerate() {
        // Sample the center of each bar
        #[allow(clippy::cast_possible_truncation)]
        let x = (bar as u32 * bar_width) + (bar_width / 2);

        let actual = rgb_at(frame, x, center_y)?;
        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(ValidationError::ColorBar {
                bar,
                x,
                y: center_y,
                expected: *expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples the center row and verifies that luminance increases
/// monotonically from left to right, with a significant overall change
/// (not a solid color).
pub fn validate_gradient(frame: &PixelBuffer) -> Result<()> {
    let center_y = frame.height() / 2;

    // Sample every 10 pixels to check for monotonic increase
    let mut first: Option<f32> = None;
    let mut previous: Option<f32> = None;

    for x in (0..frame.width()).step_by(10) {
        let (r, g, b) = rgb_at(frame, x, center_y)?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        // Allow small decreases due to rounding
        if let Some(previous) = previous.filter(|previous| luminance < previous - 1.0) {
            return Err(ValidationError::GradientDecreasing {
                x,
                luminance,
                previous,
            });
        }

        first.get_or_insert(luminance);
        previous = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, previous) {
        let rise = last - first;
        if rise < MIN_GRADIENT_RISE {
            return Err(ValidationError::GradientFlat(rise));
        }
    }

    Ok(())
}

/// Validates that frames taken from a session carry strictly increasing
/// sequence numbers. Gaps are allowed: stale frames are overwritten.
pub fn validate_frame_sequence(frames: &[Arc<PixelBuffer>]) -> Result<()> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [previous, current] = pair {
            if current.sequence() <= previous.sequence() {
                return Err(ValidationError::SequenceOrder {
                    index: index + 1,
                    previous: previous.sequence(),
                    current: current.sequence(),
                });
            }
        }
    }

    Ok(())
}

/// Helper function to check if two RGB colors match within a tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
