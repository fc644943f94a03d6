// PIXEL CONVERT - YUV to RGB Conversion
//
// Decoders hand out 4:2:0 planar pictures; sinks want packed 8-bit RGBA or
// BGRA. Fixed BT.601 limited-range coefficients, integer math only, so the
// output is bit-exact on every platform.
//
//   c = Y - 16, d = U - 128, e = V - 128
//   R = clamp((298c + 409e + 128) >> 8)
//   G = clamp((298c - 100d - 208e + 128) >> 8)
//   B = clamp((298c + 516d + 128) >> 8)

use crate::config::PackedFormat;
use crate::decode::YuvImage;
use crate::error::DecodeError;

// ============================================================================
// Converter
// ============================================================================

pub struct PixelConverter {
    format: PackedFormat,
    // Pre-computed products, one entry per 8-bit sample value
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl PixelConverter {
    pub fn new(format: PackedFormat) -> Self {
        let mut converter = Self {
            format,
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        converter.build_tables();
        converter
    }

    fn build_tables(&mut self) {
        for i in 0..256 {
            let y = i as i32 - 16;
            let uv = i as i32 - 128;

            self.y_table[i] = 298 * y + 128; // rounding term folded in
            self.u_table_g[i] = -100 * uv;
            self.u_table_b[i] = 516 * uv;
            self.v_table_r[i] = 409 * uv;
            self.v_table_g[i] = -208 * uv;
        }
    }

    pub fn format(&self) -> PackedFormat {
        self.format
    }

    /// Convert one pixel. Returned in R, G, B order.
    #[inline]
    pub fn pixel(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let c = self.y_table[y as usize];
        let (u, v) = (u as usize, v as usize);
        [
            clamp8((c + self.v_table_r[v]) >> 8),
            clamp8((c + self.u_table_g[u] + self.v_table_g[v]) >> 8),
            clamp8((c + self.u_table_b[u]) >> 8),
        ]
    }

    /// Convert `image` into `dst`, tightly packed at width x 4 bytes per row.
    pub fn convert(&self, image: &YuvImage<'_>, dst: &mut [u8]) -> Result<(), DecodeError> {
        let width = image.width as usize;
        let height = image.height as usize;
        let needed = self.format.buffer_size(image.width, image.height);
        if dst.len() < needed {
            return Err(DecodeError::OutputTooSmall {
                needed,
                capacity: dst.len(),
            });
        }
        if width == 0 || height == 0 {
            return Ok(());
        }

        let chroma_width = width.div_ceil(2);
        check_plane("Y", image.y, width, height, image.y_stride)?;
        check_plane("U", image.u, chroma_width, height.div_ceil(2), image.uv_stride)?;
        check_plane("V", image.v, chroma_width, height.div_ceil(2), image.uv_stride)?;

        let (r_idx, b_idx) = match self.format {
            PackedFormat::Rgba => (0, 2),
            PackedFormat::Bgra => (2, 0),
        };

        for (row, out) in dst[..needed].chunks_exact_mut(width * 4).enumerate() {
            let y_row = &image.y[row * image.y_stride..][..width];
            let uv_start = (row / 2) * image.uv_stride;
            let u_row = &image.u[uv_start..][..chroma_width];
            let v_row = &image.v[uv_start..][..chroma_width];

            for (x, px) in out.chunks_exact_mut(4).enumerate() {
                let [r, g, b] = self.pixel(y_row[x], u_row[x / 2], v_row[x / 2]);
                px[r_idx] = r;
                px[1] = g;
                px[b_idx] = b;
                px[3] = 255;
            }
        }

        Ok(())
    }
}

#[inline]
fn clamp8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn check_plane(name: &str, plane: &[u8], width: usize, height: usize, stride: usize) -> Result<(), DecodeError> {
    let needed = stride * (height - 1) + width;
    if stride < width || plane.len() < needed {
        return Err(DecodeError::UnsupportedLayout(format!(
            "{} plane: {} bytes, stride {} for {}x{}",
            name,
            plane.len(),
            stride,
            width,
            height
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
