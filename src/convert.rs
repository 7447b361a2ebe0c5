//! Raw frame to RGB conversion.
//!
//! Variable-ROI modes carry sensor data behind an RGGB color filter and are
//! expanded with bilinear interpolation. Fixed modes go through a general
//! colorspace converter with an 8-bit or 16-bit input path chosen by the
//! pixel encoding.

use crate::error::{CaptureError, Result};
use crate::mode::PixelEncoding;
use crate::pool::{ChannelLayout, PixelBuffer};
use crate::traits::{ByteOrder, RawFrame};

/// Convert `frame` into `out`, which must be an RGB buffer of the frame's size.
pub fn convert_frame(
    frame: &RawFrame<'_>,
    variable_roi: bool,
    out: &mut PixelBuffer,
) -> Result<()> {
    if out.layout() != ChannelLayout::Rgb {
        return Err(CaptureError::Conversion(format!(
            "conversion target must be RGB, got {:?}",
            out.layout()
        )));
    }
    if out.width() != frame.width || out.height() != frame.height {
        return Err(CaptureError::Conversion(format!(
            "frame is {}x{} but target buffer is {}x{}",
            frame.width,
            frame.height,
            out.width(),
            out.height()
        )));
    }
    let expected = frame.encoding.frame_len(frame.width, frame.height);
    if frame.data.len() < expected {
        return Err(CaptureError::Conversion(format!(
            "short {} frame: {} bytes, expected {expected}",
            frame.encoding,
            frame.data.len()
        )));
    }

    if variable_roi {
        demosaic_rggb(frame, out);
    } else {
        convert_colorspace(frame, out);
    }
    out.set_metadata(frame.sequence, frame.timestamp);
    Ok(())
}

/// Reads samples out of a raw frame, narrowing 16-bit data to 8 bits.
struct Sampler<'a> {
    data: &'a [u8],
    wide: bool,
    big_endian: bool,
    shift: u32,
}

impl<'a> Sampler<'a> {
    fn new(frame: &RawFrame<'a>) -> Self {
        let depth = u32::from(frame.data_depth);
        let shift = if (9..=16).contains(&depth) { depth - 8 } else { 8 };
        Self {
            data: frame.data,
            wide: frame.encoding.is_16bit(),
            big_endian: frame.byte_order == ByteOrder::BigEndian,
            shift,
        }
    }

    /// Sample number `index`, counted in samples rather than bytes.
    fn get(&self, index: usize) -> u8 {
        if !self.wide {
            return self.data.get(index).copied().unwrap_or(0);
        }
        let offset = index * 2;
        let (Some(&a), Some(&b)) = (self.data.get(offset), self.data.get(offset + 1)) else {
            return 0;
        };
        let value = if self.big_endian {
            u16::from_be_bytes([a, b])
        } else {
            u16::from_le_bytes([a, b])
        };
        #[allow(clippy::cast_possible_truncation)]
        let narrowed = (value >> self.shift).min(255) as u8;
        narrowed
    }
}

/// Mirror an out-of-range coordinate back inside `0..len`.
///
/// Mirroring by one pixel keeps the Bayer parity of the neighbour.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn reflect(index: i64, len: u32) -> usize {
    let len = len as i64;
    let mirrored = if index < 0 {
        -index
    } else if index >= len {
        2 * len - 2 - index
    } else {
        index
    };
    let clamped = if mirrored < 0 {
        0
    } else if mirrored >= len {
        len - 1
    } else {
        mirrored
    };
    clamped as usize
}

/// Bilinear demosaic of an RGGB mosaic into RGB.
pub fn demosaic_rggb(frame: &RawFrame<'_>, out: &mut PixelBuffer) {
    let width = frame.width;
    let height = frame.height;
    let sampler = Sampler::new(frame);
    let at = |x: i64, y: i64| -> u16 {
        let index = reflect(y, height) * width as usize + reflect(x, width);
        u16::from(sampler.get(index))
    };
    #[allow(clippy::cast_possible_truncation)]
    let avg2 = |a: u16, b: u16| ((a + b) / 2) as u8;
    #[allow(clippy::cast_possible_truncation)]
    let avg4 = |a: u16, b: u16, c: u16, d: u16| ((a + b + c + d) / 4) as u8;

    let stride = width as usize * 3;
    for (row, line) in out.data_mut().chunks_exact_mut(stride).enumerate() {
        let y = row as i64;
        for (col, pixel) in line.chunks_exact_mut(3).enumerate() {
            let x = col as i64;
            #[allow(clippy::cast_possible_truncation)]
            let here = at(x, y) as u8;
            let cross = || avg4(at(x - 1, y), at(x + 1, y), at(x, y - 1), at(x, y + 1));
            let diagonal = || {
                avg4(
                    at(x - 1, y - 1),
                    at(x + 1, y - 1),
                    at(x - 1, y + 1),
                    at(x + 1, y + 1),
                )
            };
            let horizontal = || avg2(at(x - 1, y), at(x + 1, y));
            let vertical = || avg2(at(x, y - 1), at(x, y + 1));

            let rgb = match (row % 2 == 0, col % 2 == 0) {
                // red site
                (true, true) => [here, cross(), diagonal()],
                // green on a red row
                (true, false) => [horizontal(), here, vertical()],
                // green on a blue row
                (false, true) => [vertical(), here, horizontal()],
                // blue site
                (false, false) => [diagonal(), cross(), here],
            };
            pixel.copy_from_slice(&rgb);
        }
    }
}

/// General colorspace conversion of fixed-mode frames into RGB.
///
/// Raw encodings outside variable-ROI modes are treated as monochrome.
pub fn convert_colorspace(frame: &RawFrame<'_>, out: &mut PixelBuffer) {
    let pixels = frame.width as usize * frame.height as usize;
    let data = frame.data;
    let dst = out.data_mut();

    match frame.encoding {
        PixelEncoding::Rgb8 => {
            let len = pixels * 3;
            if let (Some(src), Some(dst)) = (data.get(..len), dst.get_mut(..len)) {
                dst.copy_from_slice(src);
            }
        }
        PixelEncoding::Mono8 | PixelEncoding::Raw8 => {
            for (gray, rgb) in data.iter().zip(dst.chunks_exact_mut(3)) {
                rgb.fill(*gray);
            }
        }
        PixelEncoding::Mono16 | PixelEncoding::Raw16 => {
            let sampler = Sampler::new(frame);
            for (index, rgb) in dst.chunks_exact_mut(3).enumerate() {
                rgb.fill(sampler.get(index));
            }
        }
        PixelEncoding::Rgb16 => {
            let sampler = Sampler::new(frame);
            for (index, channel) in dst.iter_mut().enumerate() {
                *channel = sampler.get(index);
            }
        }
        PixelEncoding::Yuv444 => {
            for (uyv, rgb) in data.chunks_exact(3).zip(dst.chunks_exact_mut(3)) {
                if let [u, y, v] = *uyv {
                    write_rgb(rgb, yuv_to_rgb(y, u, v));
                }
            }
        }
        PixelEncoding::Yuv422 => {
            for (uyvy, pair) in data.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
                if let [u, y0, v, y1] = *uyvy {
                    let (first, second) = pair.split_at_mut(3);
                    write_rgb(first, yuv_to_rgb(y0, u, v));
                    write_rgb(second, yuv_to_rgb(y1, u, v));
                }
            }
        }
        PixelEncoding::Yuyv => {
            for (yuyv, pair) in data.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
                if let [y0, u, y1, v] = *yuyv {
                    let (first, second) = pair.split_at_mut(3);
                    write_rgb(first, yuv_to_rgb(y0, u, v));
                    write_rgb(second, yuv_to_rgb(y1, u, v));
                }
            }
        }
        PixelEncoding::Yuv411 => {
            for (uyyvyy, quad) in data.chunks_exact(6).zip(dst.chunks_exact_mut(12)) {
                if let [u, y0, y1, v, y2, y3] = *uyyvyy {
                    for (rgb, y) in quad.chunks_exact_mut(3).zip([y0, y1, y2, y3]) {
                        write_rgb(rgb, yuv_to_rgb(y, u, v));
                    }
                }
            }
        }
    }
}

fn write_rgb(dst: &mut [u8], (r, g, b): (u8, u8, u8)) {
    dst.copy_from_slice(&[r, g, b]);
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula; results are clamped to 0-255.
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
    let clamp = |val: f32| -> u8 { val.round().clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}
