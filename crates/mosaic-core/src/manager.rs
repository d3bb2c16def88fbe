use std::collections::HashMap;

use log::{debug, info, warn};
use mosaic_config::{AtlasConfig, TextureConfig};

use crate::atlas::{Atlas, AtlasId};
use crate::backend::TextureBackend;
use crate::error::{MosaicError, Result};
use crate::fragment::{Fragment, FragmentId};
use crate::pixel::PixelFormat;
use crate::virtualizer::Virtualizer;

/// What [`AtlasManager::destroy`] changed besides removing the fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DestroyReport {
    /// Fragments moved into another atlas; their atlas and offset changed.
    pub migrated: Vec<FragmentId>,
    /// Fragments that failed to move and went back into their atlas at a
    /// different offset.
    pub relocated: Vec<FragmentId>,
    /// Atlases that became empty and were destroyed.
    pub destroyed_atlases: Vec<AtlasId>,
}

/// Owns every atlas and fragment and decides where fragments go.
#[derive(Debug)]
pub struct AtlasManager {
    width: u32,
    height: u32,
    allow_oversized: bool,
    rearrangement_threshold: f32,
    atlases: Vec<Atlas>,
    fragments: HashMap<FragmentId, Fragment>,
    textures: Virtualizer,
    next_atlas: u32,
    next_fragment: u32,
}

impl AtlasManager {
    pub fn new(atlas: &AtlasConfig, textures: &TextureConfig) -> Result<Self> {
        if !atlas.width.is_power_of_two() || !atlas.height.is_power_of_two() {
            return Err(MosaicError::Config(format!(
                "default atlas size {}x{} is not a power of two",
                atlas.width, atlas.height
            )));
        }
        if !(0.0..=1.0).contains(&atlas.rearrangement_threshold) {
            return Err(MosaicError::Config(format!(
                "rearrangement threshold {} outside [0, 1]",
                atlas.rearrangement_threshold
            )));
        }
        Ok(Self {
            width: atlas.width,
            height: atlas.height,
            allow_oversized: atlas.allow_oversized,
            rearrangement_threshold: atlas.rearrangement_threshold,
            atlases: Vec::new(),
            fragments: HashMap::new(),
            textures: Virtualizer::new(textures.max_physical_textures),
            next_atlas: 1,
            next_fragment: 1,
        })
    }

    pub fn atlases(&self) -> &[Atlas] {
        &self.atlases
    }

    pub fn atlas(&self, id: AtlasId) -> Option<&Atlas> {
        self.atlases.iter().find(|a| a.id() == id)
    }

    pub fn fragment(&self, id: FragmentId) -> Option<&Fragment> {
        self.fragments.get(&id)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Atlas currently holding `fragment`.
    pub fn atlas_of(&self, fragment: FragmentId) -> Option<AtlasId> {
        self.fragments.get(&fragment).and_then(Fragment::atlas)
    }

    pub fn textures(&self) -> &Virtualizer {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut Virtualizer {
        &mut self.textures
    }

    fn index_of(&self, id: AtlasId) -> Result<usize> {
        self.atlases
            .iter()
            .position(|a| a.id() == id)
            .ok_or_else(|| MosaicError::Internal(format!("{id:?} is not managed")))
    }

    fn create_atlas<B: TextureBackend + ?Sized>(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        oversized: bool,
        backend: &mut B,
    ) -> Result<usize> {
        let id = AtlasId(self.next_atlas);
        let atlas = Atlas::new(id, width, height, format, oversized)?;
        self.textures.register(id, width, height, format, backend)?;
        self.next_atlas += 1;
        self.atlases.push(atlas);
        info!("created {width}x{height} {format:?} atlas {id:?} (oversized: {oversized})");
        Ok(self.atlases.len() - 1)
    }

    fn destroy_atlas<B: TextureBackend + ?Sized>(
        &mut self,
        idx: usize,
        backend: &mut B,
    ) -> Result<AtlasId> {
        let atlas = self.atlases.remove(idx);
        self.textures.release_atlas(atlas.id(), backend)?;
        info!("destroyed atlas {:?}", atlas.id());
        Ok(atlas.id())
    }

    /// Lowest non-negative border ratio among atlases of `format`, skipping
    /// `exclude`. Stops at the first exact fit.
    fn select(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        exclude: Option<usize>,
    ) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, atlas) in self.atlases.iter().enumerate() {
            if Some(idx) == exclude || atlas.format() != format {
                continue;
            }
            let ratio = atlas.border_ratio(width, height);
            if ratio < 0.0 {
                continue;
            }
            if best.is_none_or(|(_, r)| ratio < r) {
                best = Some((idx, ratio));
                if ratio == 0.0 {
                    break;
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Store a new texture fragment and pack it into an atlas.
    ///
    /// Fragments larger than the default atlas get a dedicated atlas rounded
    /// up to powers of two, or a capacity error when oversized textures are
    /// disabled.
    pub fn create_texture<B: TextureBackend + ?Sized>(
        &mut self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        format: PixelFormat,
        backend: &mut B,
    ) -> Result<FragmentId> {
        if width == 0 || height == 0 {
            return Err(MosaicError::Usage(format!("texture size {width}x{height} is empty")));
        }
        let id = FragmentId(self.next_fragment);
        let mut fragment = Fragment::new(id, width, height, format, pixels)?;

        let oversized = width > self.width || height > self.height;
        let (idx, created) = if oversized {
            if !self.allow_oversized {
                return Err(MosaicError::Capacity(format!(
                    "{width}x{height} exceeds the {}x{} atlas size \
                     and oversized textures are disabled",
                    self.width, self.height
                )));
            }
            let w = width.checked_next_power_of_two().ok_or_else(|| {
                MosaicError::Capacity(format!("texture width {width} has no power-of-two atlas"))
            })?;
            let h = height.checked_next_power_of_two().ok_or_else(|| {
                MosaicError::Capacity(format!("texture height {height} has no power-of-two atlas"))
            })?;
            (self.create_atlas(w, h, format, true, backend)?, true)
        } else {
            match self.select(width, height, format, None) {
                Some(idx) => (idx, false),
                None => (self.create_atlas(self.width, self.height, format, false, backend)?, true),
            }
        };

        let inserted = self.atlases[idx].insert(&mut fragment, &mut self.textures, backend);
        match inserted {
            Ok(true) => {}
            Ok(false) => {
                return Err(MosaicError::Internal(format!(
                    "atlas {:?} was selected for {width}x{height} but rejected it",
                    self.atlases[idx].id()
                )));
            }
            Err(e) => {
                if created && self.atlases[idx].is_empty() {
                    self.destroy_atlas(idx, backend)?;
                }
                return Err(e);
            }
        }

        self.next_fragment += 1;
        self.fragments.insert(id, fragment);
        debug!("texture {id:?} ({width}x{height}) stored in atlas {:?}", self.atlases[idx].id());
        Ok(id)
    }

    /// Remove a fragment. A sparse atlas afterwards tries to hand its
    /// remaining fragments to other atlases; an empty atlas is destroyed.
    pub fn destroy<B: TextureBackend + ?Sized>(
        &mut self,
        id: FragmentId,
        backend: &mut B,
    ) -> Result<DestroyReport> {
        let fragment = self
            .fragments
            .remove(&id)
            .ok_or_else(|| MosaicError::Usage(format!("unknown texture {id:?}")))?;
        let mut report = DestroyReport::default();
        let Some(atlas_id) = fragment.atlas() else {
            return Ok(report);
        };
        let idx = self.index_of(atlas_id)?;
        self.atlases[idx].discard(&fragment)?;

        if !self.atlases[idx].is_empty()
            && self.atlases[idx].occupation() < self.rearrangement_threshold
        {
            self.migrate(idx, backend, &mut report);
        }
        if self.atlases[idx].is_empty() {
            report.destroyed_atlases.push(self.destroy_atlas(idx, backend)?);
        }
        Ok(report)
    }

    /// Move fragments out of atlas `idx` into other atlases where they fit.
    /// Best effort: failures are logged and the fragment stays in (or returns
    /// to) its atlas.
    fn migrate<B: TextureBackend + ?Sized>(
        &mut self,
        idx: usize,
        backend: &mut B,
        report: &mut DestroyReport,
    ) {
        let source_id = self.atlases[idx].id();
        for fid in self.atlases[idx].fragments().to_vec() {
            let Some(fragment) = self.fragments.get_mut(&fid) else {
                warn!("{source_id:?} lists unknown fragment {fid:?}");
                continue;
            };
            let (w, h, format) = (fragment.width(), fragment.height(), fragment.format());
            let target = {
                let mut best: Option<(usize, f32)> = None;
                for (i, atlas) in self.atlases.iter().enumerate() {
                    if i == idx || atlas.format() != format {
                        continue;
                    }
                    let ratio = atlas.border_ratio(w, h);
                    if ratio >= 0.0 && best.is_none_or(|(_, r)| ratio < r) {
                        best = Some((i, ratio));
                    }
                }
                best.map(|(i, _)| i)
            };
            let Some(target) = target else {
                continue;
            };

            let origin = fragment.position();
            if let Err(e) = self.atlases[idx].free(fragment, &mut self.textures, backend) {
                warn!("could not read back {fid:?} from {source_id:?}: {e}");
                continue;
            }
            match self.atlases[target].insert(fragment, &mut self.textures, backend) {
                Ok(true) => {
                    debug!(
                        "migrated {fid:?} from {source_id:?} to {:?}",
                        self.atlases[target].id()
                    );
                    report.migrated.push(fid);
                }
                outcome => {
                    warn!("migration of {fid:?} failed ({outcome:?}); keeping it in {source_id:?}");
                    match self.atlases[idx].insert(fragment, &mut self.textures, backend) {
                        Ok(true) if fragment.position() != origin => report.relocated.push(fid),
                        Ok(true) => {}
                        Ok(false) => warn!("no room left to restore {fid:?} into {source_id:?}"),
                        Err(e) => warn!("could not restore {fid:?} into {source_id:?}: {e}"),
                    }
                }
            }
        }
        if !self.atlases[idx].is_empty() {
            self.atlases[idx].defragment();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::virtualizer::TextureMode;

    fn manager(size: u32, allow_oversized: bool) -> AtlasManager {
        let atlas = AtlasConfig {
            width: size,
            height: size,
            allow_oversized,
            ..AtlasConfig::default()
        };
        AtlasManager::new(&atlas, &TextureConfig::default()).unwrap()
    }

    fn pixels(w: u32, h: u32, seed: u8) -> Vec<u8> {
        vec![seed; PixelFormat::Rgba8888.buffer_len(w, h)]
    }

    #[test]
    fn rejects_bad_config() {
        let bad_size = AtlasConfig {
            width: 100,
            ..AtlasConfig::default()
        };
        assert!(AtlasManager::new(&bad_size, &TextureConfig::default()).is_err());
        let bad_threshold = AtlasConfig {
            rearrangement_threshold: 1.5,
            ..AtlasConfig::default()
        };
        assert!(AtlasManager::new(&bad_threshold, &TextureConfig::default()).is_err());
    }

    #[test]
    fn exact_fit_and_new_atlas_on_demand() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        let a = mgr
            .create_texture(64, 32, pixels(64, 32, 1), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let b = mgr
            .create_texture(64, 32, pixels(64, 32, 2), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        assert_eq!(mgr.atlases().len(), 1);
        assert_eq!(mgr.atlas_of(a), mgr.atlas_of(b));

        let c = mgr
            .create_texture(8, 8, pixels(8, 8, 3), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        assert_eq!(mgr.atlases().len(), 2);
        assert_ne!(mgr.atlas_of(c), mgr.atlas_of(a));
    }

    #[test]
    fn oversized_gets_dedicated_power_of_two_atlas() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        let id = mgr
            .create_texture(100, 10, pixels(100, 10, 1), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let atlas = mgr.atlas(mgr.atlas_of(id).unwrap()).unwrap();
        assert!(atlas.is_oversized());
        assert_eq!((atlas.width(), atlas.height()), (128, 16));
    }

    #[test]
    fn oversized_disabled_is_capacity_error() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, false);
        let err = mgr
            .create_texture(65, 1, pixels(65, 1, 1), PixelFormat::Rgba8888, &mut backend)
            .unwrap_err();
        assert!(err.is_capacity());
        assert!(mgr.atlases().is_empty());
    }

    #[test]
    fn wrong_buffer_length_is_usage_error() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        let err = mgr
            .create_texture(4, 4, vec![0; 3], PixelFormat::Rgba8888, &mut backend)
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn destroying_last_fragment_destroys_atlas() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        let id = mgr
            .create_texture(16, 16, pixels(16, 16, 9), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let atlas = mgr.atlas_of(id).unwrap();
        let report = mgr.destroy(id, &mut backend).unwrap();
        assert_eq!(report.destroyed_atlases, vec![atlas]);
        assert!(mgr.atlases().is_empty());
        assert_eq!(backend.texture_count(), 0);
        assert!(mgr.destroy(id, &mut backend).unwrap_err().is_usage());
    }

    #[test]
    fn sparse_atlas_migrates_into_others() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        // Fill atlas 1 with a big fragment and a small one.
        let big = mgr
            .create_texture(64, 48, pixels(64, 48, 1), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let small = mgr
            .create_texture(8, 8, pixels(8, 8, 2), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        // Atlas 2 receives a fragment that leaves plenty of room.
        let other = mgr
            .create_texture(64, 32, pixels(64, 32, 3), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let first = mgr.atlas_of(big).unwrap();
        assert_eq!(mgr.atlas_of(small), Some(first));
        assert_ne!(mgr.atlas_of(other), Some(first));

        let report = mgr.destroy(big, &mut backend).unwrap();
        assert_eq!(report.migrated, vec![small]);
        assert_eq!(report.destroyed_atlases, vec![first]);
        assert_eq!(mgr.atlas_of(small), mgr.atlas_of(other));

        let frag = mgr.fragment(small).unwrap();
        let atlas = frag.atlas().unwrap();
        let rect = frag.rect_in_atlas().unwrap();
        let data = mgr.textures_mut().readback(atlas, rect, &mut backend).unwrap();
        assert_eq!(data, pixels(8, 8, 2));
    }

    #[test]
    fn failed_migration_reports_relocated_fragment() {
        let mut backend = SoftwareBackend::new();
        let mut mgr = manager(64, true);
        let big = mgr
            .create_texture(64, 48, pixels(64, 48, 1), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let small = mgr
            .create_texture(8, 8, pixels(8, 8, 2), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let other = mgr
            .create_texture(64, 32, pixels(64, 32, 3), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let first = mgr.atlas_of(small).unwrap();
        let before = mgr.fragment(small).unwrap().position();
        let target = mgr.textures().physical_texture(mgr.atlas_of(other).unwrap()).unwrap();
        backend.reject_uploads_to(target);

        let report = mgr.destroy(big, &mut backend).unwrap();
        assert!(report.migrated.is_empty());
        assert_eq!(report.relocated, vec![small]);
        assert!(report.destroyed_atlases.is_empty());
        assert_eq!(mgr.atlas_of(small), Some(first));

        let frag = mgr.fragment(small).unwrap();
        assert_ne!(frag.position(), before);
        let rect = frag.rect_in_atlas().unwrap();
        let data = mgr.textures_mut().readback(first, rect, &mut backend).unwrap();
        assert_eq!(data, pixels(8, 8, 2));
    }

    #[test]
    fn low_resource_fallback_keeps_textures_usable() {
        let mut backend = SoftwareBackend::new().with_texture_budget(1);
        let mut mgr = manager(32, true);
        let a = mgr
            .create_texture(32, 32, pixels(32, 32, 5), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        let b = mgr
            .create_texture(32, 32, pixels(32, 32, 6), PixelFormat::Rgba8888, &mut backend)
            .unwrap();
        assert_eq!(mgr.textures().mode(), TextureMode::LowResource);
        assert_eq!(mgr.atlases().len(), 2);

        for (id, seed) in [(a, 5), (b, 6), (a, 5)] {
            let atlas = mgr.atlas_of(id).unwrap();
            mgr.textures_mut().bind(atlas, 0, &mut backend).unwrap();
            let rect = mgr.fragment(id).unwrap().rect_in_atlas().unwrap();
            let data = mgr.textures_mut().readback(atlas, rect, &mut backend).unwrap();
            assert_eq!(data, pixels(32, 32, seed));
        }
    }
}
