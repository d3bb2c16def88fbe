use crate::error::{MosaicError, Result};
use crate::rect::Rect;

/// Byte layout of one pixel. Only byte-per-channel formats are supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Rgba8888,
    Bgra8888,
    Gray8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Exact buffer length for a `width`x`height` image.
    pub const fn buffer_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }

    pub fn check_len(self, width: u32, height: u32, len: usize) -> Result<()> {
        let expected = self.buffer_len(width, height);
        if len != expected {
            return Err(MosaicError::Usage(format!(
                "pixel buffer for {width}x{height} {self:?} must be {expected} bytes, got {len}"
            )));
        }
        Ok(())
    }
}

/// Write `src` (a tightly packed `region.width`x`region.height` image) into
/// `dst`, a tightly packed image `dst_width` pixels wide, at `region`.
pub fn copy_region(dst: &mut [u8], dst_width: u32, region: Rect, src: &[u8], format: PixelFormat) {
    let bpp = format.bytes_per_pixel();
    let row = region.width as usize * bpp;
    let stride = dst_width as usize * bpp;
    for y in 0..region.height as usize {
        let dst_off = (region.y as usize + y) * stride + region.x as usize * bpp;
        dst[dst_off..dst_off + row].copy_from_slice(&src[y * row..(y + 1) * row]);
    }
}

/// Copy `region` out of `src` (tightly packed, `src_width` pixels wide).
pub fn extract_region(src: &[u8], src_width: u32, region: Rect, format: PixelFormat) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let row = region.width as usize * bpp;
    let stride = src_width as usize * bpp;
    let mut out = Vec::with_capacity(row * region.height as usize);
    for y in 0..region.height as usize {
        let off = (region.y as usize + y) * stride + region.x as usize * bpp;
        out.extend_from_slice(&src[off..off + row]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_len_uses_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgba8888.buffer_len(3, 2), 24);
        assert_eq!(PixelFormat::Gray8.buffer_len(3, 2), 6);
        assert!(PixelFormat::Rgba8888.check_len(2, 2, 15).unwrap_err().is_usage());
    }

    #[test]
    fn copy_then_extract_region() {
        let mut canvas = vec![0u8; PixelFormat::Gray8.buffer_len(4, 4)];
        let region = Rect::new(1, 2, 2, 2);
        copy_region(&mut canvas, 4, region, &[1, 2, 3, 4], PixelFormat::Gray8);
        assert_eq!(&canvas[8..12], &[0, 1, 2, 0]);
        assert_eq!(&canvas[12..16], &[0, 3, 4, 0]);
        assert_eq!(extract_region(&canvas, 4, region, PixelFormat::Gray8), vec![1, 2, 3, 4]);
    }
}
