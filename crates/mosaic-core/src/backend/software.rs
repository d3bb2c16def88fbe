use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::{BufferId, DrawBackend, TextureBackend, TextureId};
use crate::batcher::MAX_TEXTURE_UNITS;
use crate::error::BackendError;
use crate::pixel::{PixelFormat, copy_region, extract_region};
use crate::rect::Rect;

struct SoftTexture {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// One recorded draw submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub frame: u64,
    pub buffer: BufferId,
    pub slots: Range<u32>,
    /// Texture bound to each unit at submission time.
    pub units: Vec<Option<TextureId>>,
}

/// In-memory backend. Keeps texture contents on the CPU, records draws and
/// can simulate device exhaustion through a texture budget.
pub struct SoftwareBackend {
    textures: HashMap<u32, SoftTexture>,
    buffers: HashMap<u32, Vec<u8>>,
    units: Vec<Option<TextureId>>,
    next_id: u32,
    texture_budget: Option<usize>,
    rejected_uploads: HashSet<u32>,
    reject_writes: bool,
    frame: u64,
    draws: Vec<DrawCall>,
    uploads: usize,
    reads: usize,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            buffers: HashMap::new(),
            units: vec![None; MAX_TEXTURE_UNITS],
            next_id: 1,
            texture_budget: None,
            rejected_uploads: HashSet::new(),
            reject_writes: false,
            frame: 0,
            draws: Vec::new(),
            uploads: 0,
            reads: 0,
        }
    }

    /// Fail texture creation with `OutOfMemory` once `max` textures exist.
    pub fn with_texture_budget(mut self, max: usize) -> Self {
        self.texture_budget = Some(max);
        self
    }

    /// Make every later upload into `texture` fail with a device error.
    pub fn reject_uploads_to(&mut self, texture: TextureId) {
        self.rejected_uploads.insert(texture.0);
    }

    /// While set, vertex buffer writes fail with a device error.
    pub fn reject_buffer_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn bound(&self, unit: u32) -> Option<TextureId> {
        self.units.get(unit as usize).copied().flatten()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    /// Full contents of a texture, row-major and tightly packed.
    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.pixels.as_slice())
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, texture: TextureId, region: Rect) -> Result<&SoftTexture, BackendError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        if region.right() > tex.width || region.bottom() > tex.height {
            return Err(BackendError::OutOfBounds(format!(
                "{region:?} outside {}x{} texture",
                tex.width, tex.height
            )));
        }
        Ok(tex)
    }
}

impl TextureBackend for SoftwareBackend {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureId, BackendError> {
        if self.texture_budget.is_some_and(|max| self.textures.len() >= max) {
            return Err(BackendError::OutOfMemory);
        }
        let id = self.next();
        self.textures.insert(
            id,
            SoftTexture {
                width,
                height,
                format,
                pixels: vec![0; format.buffer_len(width, height)],
            },
        );
        Ok(TextureId(id))
    }

    fn destroy_texture(&mut self, texture: TextureId) -> Result<(), BackendError> {
        self.textures
            .remove(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        Ok(())
    }

    fn upload_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let format = self.texture(texture, region)?.format;
        if self.rejected_uploads.contains(&texture.0) {
            return Err(BackendError::Device(format!("upload into texture {} rejected", texture.0)));
        }
        if data.len() != format.buffer_len(region.width, region.height) {
            return Err(BackendError::OutOfBounds(format!(
                "{} bytes for {region:?}",
                data.len()
            )));
        }
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        copy_region(&mut tex.pixels, tex.width, region, data, format);
        self.uploads += 1;
        Ok(())
    }

    fn read_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
    ) -> Result<Vec<u8>, BackendError> {
        let tex = self.texture(texture, region)?;
        let out = extract_region(&tex.pixels, tex.width, region, tex.format);
        self.reads += 1;
        Ok(out)
    }

    fn bind_to_unit(&mut self, texture: TextureId, unit: u32) -> Result<(), BackendError> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UnknownTexture(texture.0));
        }
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or_else(|| BackendError::OutOfBounds(format!("texture unit {unit}")))?;
        *slot = Some(texture);
        Ok(())
    }

    fn max_texture_units(&self) -> u32 {
        self.units.len() as u32
    }
}

impl DrawBackend for SoftwareBackend {
    fn create_buffer(&mut self, size: u64) -> Result<BufferId, BackendError> {
        let id = self.next();
        self.buffers.insert(id, vec![0; size as usize]);
        Ok(BufferId(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        if self.reject_writes {
            return Err(BackendError::Device(format!("write into buffer {} rejected", buffer.0)));
        }
        let buf = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer.0))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.len() {
            return Err(BackendError::OutOfBounds(format!(
                "write {start}..{end} into {} byte buffer",
                buf.len()
            )));
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        self.buffers
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or(BackendError::UnknownBuffer(buffer.0))
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        self.frame += 1;
        Ok(())
    }

    fn draw(&mut self, buffer: BufferId, slots: Range<u32>) -> Result<(), BackendError> {
        if !self.buffers.contains_key(&buffer.0) {
            return Err(BackendError::UnknownBuffer(buffer.0));
        }
        self.draws.push(DrawCall {
            frame: self.frame,
            buffer,
            slots,
            units: self.units.clone(),
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_reports_out_of_memory() {
        let mut backend = SoftwareBackend::new().with_texture_budget(1);
        backend.create_texture(4, 4, PixelFormat::Rgba8888).unwrap();
        assert_eq!(
            backend.create_texture(4, 4, PixelFormat::Rgba8888),
            Err(BackendError::OutOfMemory)
        );
    }

    #[test]
    fn sub_region_round_trip() {
        let mut backend = SoftwareBackend::new();
        let tex = backend.create_texture(8, 8, PixelFormat::Gray8).unwrap();
        let region = Rect::new(2, 3, 3, 2);
        backend.upload_sub_region(tex, region, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(backend.read_sub_region(tex, region).unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(matches!(
            backend.read_sub_region(tex, Rect::new(7, 7, 2, 2)),
            Err(BackendError::OutOfBounds(_))
        ));
    }
}
