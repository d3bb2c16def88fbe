//! Capability traits a graphics backend implements for the atlas and
//! batching layers, plus the two implementations shipped with the crate.

use std::ops::Range;

use crate::error::BackendError;
use crate::pixel::PixelFormat;
use crate::rect::Rect;

mod gpu;
mod software;

pub use gpu::{GpuFrameTarget, WgpuBackend};
pub use software::{DrawCall, SoftwareBackend};

/// Backend handle of a physical texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Backend handle of a vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Texture operations. All calls are synchronous from the caller's view.
pub trait TextureBackend {
    /// `Err(BackendError::OutOfMemory)` signals resource exhaustion.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureId, BackendError>;

    fn destroy_texture(&mut self, texture: TextureId) -> Result<(), BackendError>;

    /// `data` is tightly packed, `region.width * region.height * bpp` bytes.
    fn upload_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn read_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
    ) -> Result<Vec<u8>, BackendError>;

    fn bind_to_unit(&mut self, texture: TextureId, unit: u32) -> Result<(), BackendError>;

    /// Number of texture units one draw can sample from.
    fn max_texture_units(&self) -> u32;
}

/// Vertex buffer and draw submission. A draw covers a contiguous range of
/// batch slots; each slot is one quad (four vertices, six indices).
pub trait DrawBackend {
    fn create_buffer(&mut self, size: u64) -> Result<BufferId, BackendError>;

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), BackendError>;

    fn begin_frame(&mut self) -> Result<(), BackendError>;

    /// Draw the quads of `slots` from `buffer` with the currently bound units.
    fn draw(&mut self, buffer: BufferId, slots: Range<u32>) -> Result<(), BackendError>;

    fn end_frame(&mut self) -> Result<(), BackendError>;
}

/// Everything the renderer needs from one backend.
pub trait RenderBackend: TextureBackend + DrawBackend {}

impl<T: TextureBackend + DrawBackend + ?Sized> RenderBackend for T {}

/// Six indices per quad for `slots` quads, corners ordered
/// top-left, bottom-left, top-right, bottom-right.
pub fn quad_indices(slots: u32) -> Vec<u16> {
    let mut indices = Vec::with_capacity(slots as usize * 6);
    for i in 0..slots {
        let base = (i * 4) as u16;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }
    indices
}
