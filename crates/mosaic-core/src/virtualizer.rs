use std::collections::HashMap;

use log::{debug, info, warn};

use crate::atlas::AtlasId;
use crate::backend::{TextureBackend, TextureId};
use crate::error::{MosaicError, Result};
use crate::pixel::{PixelFormat, copy_region, extract_region};
use crate::rect::Rect;

/// How atlases map onto physical textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureMode {
    /// One physical texture per atlas.
    Normal,
    /// Atlases share a fixed pool of physical textures and are swapped in
    /// on bind.
    LowResource,
}

#[derive(Debug)]
struct PhysicalTexture {
    handle: TextureId,
    width: u32,
    height: u32,
    format: PixelFormat,
    owner: Option<AtlasId>,
    last_bound: u64,
}

impl PhysicalTexture {
    fn fits(&self, surface: &AtlasSurface) -> bool {
        self.width >= surface.width
            && self.height >= surface.height
            && self.format == surface.format
    }
}

#[derive(Debug)]
struct AtlasSurface {
    width: u32,
    height: u32,
    format: PixelFormat,
    physical: Option<TextureId>,
    /// Atlas content while it is not resident.
    shadow: Option<Vec<u8>>,
}

impl AtlasSurface {
    fn canvas(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }
}

/// Maps atlases onto backend textures.
///
/// Starts in [`TextureMode::Normal`] and switches to
/// [`TextureMode::LowResource`] for good the first time texture creation
/// reports exhaustion (or the configured budget is reached). From then on
/// the existing textures form the pool.
#[derive(Debug)]
pub struct Virtualizer {
    mode: TextureMode,
    pool: Vec<PhysicalTexture>,
    surfaces: HashMap<AtlasId, AtlasSurface>,
    budget: Option<usize>,
    tick: u64,
}

impl Virtualizer {
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            mode: TextureMode::Normal,
            pool: Vec::new(),
            surfaces: HashMap::new(),
            budget,
            tick: 0,
        }
    }

    pub fn mode(&self) -> TextureMode {
        self.mode
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_resident(&self, atlas: AtlasId) -> bool {
        self.surfaces
            .get(&atlas)
            .is_some_and(|s| s.physical.is_some())
    }

    pub fn physical_texture(&self, atlas: AtlasId) -> Option<TextureId> {
        self.surfaces.get(&atlas).and_then(|s| s.physical)
    }

    pub fn has_shadow(&self, atlas: AtlasId) -> bool {
        self.surfaces
            .get(&atlas)
            .is_some_and(|s| s.shadow.is_some())
    }

    /// Make `atlas` known. In normal mode this creates its texture, falling
    /// back to low-resource mode on exhaustion. In low-resource mode the pool
    /// must contain a texture able to hold the atlas.
    pub fn register<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        width: u32,
        height: u32,
        format: PixelFormat,
        backend: &mut B,
    ) -> Result<()> {
        if self.surfaces.contains_key(&atlas) {
            return Err(MosaicError::Usage(format!("{atlas:?} is already registered")));
        }
        let mut surface = AtlasSurface {
            width,
            height,
            format,
            physical: None,
            shadow: None,
        };

        if self.mode == TextureMode::Normal {
            match self.create_physical(width, height, format, backend) {
                Ok(handle) => {
                    self.tick += 1;
                    self.pool.push(PhysicalTexture {
                        handle,
                        width,
                        height,
                        format,
                        owner: Some(atlas),
                        last_bound: self.tick,
                    });
                    surface.physical = Some(handle);
                    self.surfaces.insert(atlas, surface);
                    return Ok(());
                }
                Err(MosaicError::Backend(e)) if e.is_exhaustion() => {
                    warn!(
                        "texture creation for {atlas:?} failed ({e}); \
                         switching to low-resource mode with {} textures",
                        self.pool.len()
                    );
                    self.mode = TextureMode::LowResource;
                }
                Err(e) => return Err(e),
            }
        }

        if !self.pool.iter().any(|p| p.fits(&surface)) {
            return Err(MosaicError::ResourceExhausted(format!(
                "no physical texture can hold a {width}x{height} {format:?} atlas"
            )));
        }
        self.surfaces.insert(atlas, surface);
        Ok(())
    }

    fn create_physical<B: TextureBackend + ?Sized>(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        backend: &mut B,
    ) -> Result<TextureId> {
        if self.budget.is_some_and(|max| self.pool.len() >= max) {
            return Err(crate::error::BackendError::OutOfMemory.into());
        }
        let handle = backend.create_texture(width, height, format)?;
        info!("created {width}x{height} physical texture {handle:?}");
        Ok(handle)
    }

    /// Forget `atlas`. Its texture is destroyed in normal mode and returned
    /// to the pool in low-resource mode.
    pub fn release_atlas<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        backend: &mut B,
    ) -> Result<()> {
        let surface = self
            .surfaces
            .remove(&atlas)
            .ok_or_else(|| MosaicError::Usage(format!("{atlas:?} is not registered")))?;
        let Some(handle) = surface.physical else {
            return Ok(());
        };
        let idx = self.pool_index(handle)?;
        match self.mode {
            TextureMode::Normal => {
                self.pool.remove(idx);
                backend.destroy_texture(handle)?;
            }
            TextureMode::LowResource => self.pool[idx].owner = None,
        }
        Ok(())
    }

    fn pool_index(&self, handle: TextureId) -> Result<usize> {
        self.pool
            .iter()
            .position(|p| p.handle == handle)
            .ok_or_else(|| MosaicError::Internal(format!("{handle:?} missing from texture pool")))
    }

    /// Make `atlas` resident, evicting the least recently bound atlas from a
    /// fitting pool texture if necessary. Returns the texture holding it.
    fn acquire<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        backend: &mut B,
    ) -> Result<TextureId> {
        self.tick += 1;
        let tick = self.tick;
        let surface = self
            .surfaces
            .get(&atlas)
            .ok_or_else(|| MosaicError::Usage(format!("{atlas:?} is not registered")))?;

        if let Some(handle) = surface.physical {
            let idx = self.pool_index(handle)?;
            self.pool[idx].last_bound = tick;
            return Ok(handle);
        }

        let idx = self
            .pool
            .iter()
            .position(|p| p.owner.is_none() && p.fits(surface))
            .or_else(|| {
                self.pool
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.fits(surface))
                    .min_by_key(|(_, p)| p.last_bound)
                    .map(|(idx, _)| idx)
            })
            .ok_or_else(|| {
                MosaicError::ResourceExhausted(format!(
                    "no physical texture fits {}x{} atlas {atlas:?}",
                    surface.width, surface.height
                ))
            })?;

        let handle = self.pool[idx].handle;
        if let Some(previous) = self.pool[idx].owner.take() {
            self.save(previous, handle, backend)?;
        }
        self.restore(atlas, handle, backend)?;
        self.pool[idx].owner = Some(atlas);
        self.pool[idx].last_bound = tick;
        Ok(handle)
    }

    /// Copy an evicted atlas's content into its shadow buffer.
    fn save<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        handle: TextureId,
        backend: &mut B,
    ) -> Result<()> {
        let surface = self.surfaces.get_mut(&atlas).ok_or_else(|| {
            MosaicError::Internal(format!("pool owner {atlas:?} is not registered"))
        })?;
        let pixels = backend.read_sub_region(handle, surface.canvas())?;
        surface.shadow = Some(pixels);
        surface.physical = None;
        debug!("saved {atlas:?} out of {handle:?}");
        Ok(())
    }

    /// Upload an atlas's shadow content into `handle` and drop the shadow.
    fn restore<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        handle: TextureId,
        backend: &mut B,
    ) -> Result<()> {
        let surface = self
            .surfaces
            .get_mut(&atlas)
            .ok_or_else(|| MosaicError::Usage(format!("{atlas:?} is not registered")))?;
        let len = surface.format.buffer_len(surface.width, surface.height);
        let pixels = surface.shadow.take().unwrap_or_else(|| vec![0; len]);
        backend.upload_sub_region(handle, surface.canvas(), &pixels)?;
        surface.physical = Some(handle);
        debug!("restored {atlas:?} into {handle:?}");
        Ok(())
    }

    /// Bind `atlas` to `unit`, swapping it in first if needed.
    pub fn bind<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        unit: u32,
        backend: &mut B,
    ) -> Result<TextureId> {
        let handle = self.acquire(atlas, backend)?;
        backend.bind_to_unit(handle, unit)?;
        Ok(handle)
    }

    fn checked_surface(&mut self, atlas: AtlasId, region: Rect) -> Result<&mut AtlasSurface> {
        let surface = self
            .surfaces
            .get_mut(&atlas)
            .ok_or_else(|| MosaicError::Usage(format!("{atlas:?} is not registered")))?;
        if region.is_empty() || !surface.canvas().contains_rect(&region) {
            return Err(MosaicError::Usage(format!(
                "{region:?} is outside the {}x{} atlas",
                surface.width, surface.height
            )));
        }
        Ok(surface)
    }

    /// Write pixels into `region` of `atlas`. Non-resident atlases receive
    /// the data in their shadow buffer; it reaches the GPU on the next bind.
    pub fn upload<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        region: Rect,
        data: &[u8],
        backend: &mut B,
    ) -> Result<()> {
        let surface = self.checked_surface(atlas, region)?;
        surface.format.check_len(region.width, region.height, data.len())?;
        match surface.physical {
            Some(handle) => backend.upload_sub_region(handle, region, data)?,
            None => {
                let (width, height, format) = (surface.width, surface.height, surface.format);
                let shadow = surface
                    .shadow
                    .get_or_insert_with(|| vec![0; format.buffer_len(width, height)]);
                copy_region(shadow, width, region, data, format);
            }
        }
        Ok(())
    }

    /// Read `region` of `atlas` from wherever its content currently lives.
    pub fn readback<B: TextureBackend + ?Sized>(
        &mut self,
        atlas: AtlasId,
        region: Rect,
        backend: &mut B,
    ) -> Result<Vec<u8>> {
        let surface = self.checked_surface(atlas, region)?;
        let pixels = match (&surface.physical, &surface.shadow) {
            (Some(handle), _) => backend.read_sub_region(*handle, region)?,
            (None, Some(shadow)) => extract_region(shadow, surface.width, region, surface.format),
            (None, None) => vec![0; surface.format.buffer_len(region.width, region.height)],
        };
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    const FMT: PixelFormat = PixelFormat::Gray8;

    #[test]
    fn normal_mode_creates_one_texture_per_atlas() {
        let mut backend = SoftwareBackend::new();
        let mut textures = Virtualizer::new(None);
        textures.register(AtlasId(1), 8, 8, FMT, &mut backend).unwrap();
        textures.register(AtlasId(2), 8, 8, FMT, &mut backend).unwrap();
        assert_eq!(textures.mode(), TextureMode::Normal);
        assert_eq!(backend.texture_count(), 2);
        assert!(textures.is_resident(AtlasId(1)));
        textures.release_atlas(AtlasId(1), &mut backend).unwrap();
        assert_eq!(backend.texture_count(), 1);
    }

    #[test]
    fn exhaustion_switches_to_low_resource_and_swaps() {
        let mut backend = SoftwareBackend::new().with_texture_budget(1);
        let mut textures = Virtualizer::new(None);
        let (a, b) = (AtlasId(1), AtlasId(2));
        textures.register(a, 4, 4, FMT, &mut backend).unwrap();
        textures.register(b, 4, 4, FMT, &mut backend).unwrap();
        assert_eq!(textures.mode(), TextureMode::LowResource);
        assert!(!textures.is_resident(b));

        textures.upload(a, Rect::new(0, 0, 2, 1), &[7, 8], &mut backend).unwrap();
        // b is not resident: the write lands in its shadow buffer.
        textures.upload(b, Rect::new(1, 1, 1, 1), &[9], &mut backend).unwrap();
        assert!(textures.has_shadow(b));

        let handle = textures.bind(b, 0, &mut backend).unwrap();
        assert!(textures.is_resident(b));
        assert!(!textures.is_resident(a));
        assert!(textures.has_shadow(a));
        assert_eq!(backend.bound(0), Some(handle));
        assert_eq!(textures.readback(b, Rect::new(1, 1, 1, 1), &mut backend).unwrap(), vec![9]);
        assert_eq!(textures.readback(a, Rect::new(0, 0, 2, 1), &mut backend).unwrap(), vec![7, 8]);

        textures.bind(a, 0, &mut backend).unwrap();
        assert_eq!(textures.readback(a, Rect::new(0, 0, 2, 1), &mut backend).unwrap(), vec![7, 8]);
        assert_eq!(textures.readback(b, Rect::new(1, 1, 1, 1), &mut backend).unwrap(), vec![9]);
        assert_eq!(backend.texture_count(), 1);
    }

    #[test]
    fn evicts_least_recently_bound() {
        let mut backend = SoftwareBackend::new();
        let mut textures = Virtualizer::new(Some(2));
        for id in 1..=3 {
            textures.register(AtlasId(id), 4, 4, FMT, &mut backend).unwrap();
        }
        textures.bind(AtlasId(2), 0, &mut backend).unwrap();
        textures.bind(AtlasId(1), 0, &mut backend).unwrap();
        textures.bind(AtlasId(3), 0, &mut backend).unwrap();
        // 2 was bound before 1, so it was the one swapped out.
        assert!(!textures.is_resident(AtlasId(2)));
        assert!(textures.is_resident(AtlasId(1)));
        assert!(textures.is_resident(AtlasId(3)));
    }

    #[test]
    fn low_resource_without_fitting_texture_is_exhaustion() {
        let mut backend = SoftwareBackend::new().with_texture_budget(1);
        let mut textures = Virtualizer::new(None);
        textures.register(AtlasId(1), 4, 4, FMT, &mut backend).unwrap();
        let err = textures
            .register(AtlasId(2), 8, 8, FMT, &mut backend)
            .unwrap_err();
        assert!(matches!(err, MosaicError::ResourceExhausted(_)));
    }

    #[test]
    fn upload_outside_atlas_is_usage_error() {
        let mut backend = SoftwareBackend::new();
        let mut textures = Virtualizer::new(None);
        textures.register(AtlasId(1), 4, 4, FMT, &mut backend).unwrap();
        let err = textures
            .upload(AtlasId(1), Rect::new(3, 3, 2, 2), &[0; 4], &mut backend)
            .unwrap_err();
        assert!(err.is_usage());
    }
}
