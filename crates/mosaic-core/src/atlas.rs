use log::debug;

use crate::backend::TextureBackend;
use crate::error::{MosaicError, Result};
use crate::fragment::{Fragment, FragmentId, Placement};
use crate::free_space::FreeSpaceAllocator;
use crate::pixel::PixelFormat;
use crate::virtualizer::Virtualizer;

/// Handle of an atlas owned by the [`crate::AtlasManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtlasId(pub u32);

/// One atlas canvas: free-space allocator plus the fragments packed into it.
/// Pixel content lives behind the [`Virtualizer`].
#[derive(Debug)]
pub struct Atlas {
    id: AtlasId,
    format: PixelFormat,
    allocator: FreeSpaceAllocator,
    fragments: Vec<FragmentId>,
    oversized: bool,
}

impl Atlas {
    pub fn new(
        id: AtlasId,
        width: u32,
        height: u32,
        format: PixelFormat,
        oversized: bool,
    ) -> Result<Self> {
        Ok(Self {
            id,
            format,
            allocator: FreeSpaceAllocator::new(width, height)?,
            fragments: Vec::new(),
            oversized,
        })
    }

    pub fn id(&self) -> AtlasId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.allocator.width()
    }

    pub fn height(&self) -> u32 {
        self.allocator.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Created for a fragment larger than the default atlas size.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    pub fn allocator(&self) -> &FreeSpaceAllocator {
        &self.allocator
    }

    pub fn fragments(&self) -> &[FragmentId] {
        &self.fragments
    }

    pub fn contains(&self, fragment: FragmentId) -> bool {
        self.fragments.contains(&fragment)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn is_member(&self, fragment: &Fragment) -> bool {
        fragment.atlas() == Some(self.id) && self.contains(fragment.id())
    }

    /// Pack `fragment` into this atlas and upload its pixels.
    ///
    /// `Ok(true)` if it is (now) a member, `Ok(false)` if no free rectangle
    /// fits. Fragments placed in another atlas, or of another pixel format,
    /// are usage errors.
    pub fn insert<B: TextureBackend + ?Sized>(
        &mut self,
        fragment: &mut Fragment,
        textures: &mut Virtualizer,
        backend: &mut B,
    ) -> Result<bool> {
        if self.is_member(fragment) {
            return Ok(true);
        }
        if let Some(other) = fragment.atlas() {
            return Err(MosaicError::Usage(format!(
                "{:?} is already placed in {other:?}",
                fragment.id()
            )));
        }
        if fragment.format() != self.format {
            return Err(MosaicError::Usage(format!(
                "{:?} fragment cannot go into a {:?} atlas",
                fragment.format(),
                self.format
            )));
        }
        let Some(rect) = self.allocator.reserve(fragment.width(), fragment.height())? else {
            return Ok(false);
        };

        let Placement::Unplaced { pixels } = &fragment.placement else {
            return Err(MosaicError::Internal("unplaced fragment without pixels".into()));
        };
        if let Err(e) = textures.upload(self.id, rect, pixels, backend) {
            self.allocator.release(rect)?;
            return Err(e);
        }

        fragment.placement = Placement::Placed {
            atlas: self.id,
            x: rect.x,
            y: rect.y,
        };
        self.fragments.push(fragment.id());
        debug!("placed {:?} in {:?} at {rect:?}", fragment.id(), self.id);
        Ok(true)
    }

    /// Take `fragment` out of this atlas, reading its pixels back so it is a
    /// standalone fragment again. No-op for non-members.
    pub fn free<B: TextureBackend + ?Sized>(
        &mut self,
        fragment: &mut Fragment,
        textures: &mut Virtualizer,
        backend: &mut B,
    ) -> Result<()> {
        if !self.is_member(fragment) {
            return Ok(());
        }
        let rect = fragment
            .rect_in_atlas()
            .ok_or_else(|| MosaicError::Internal("member fragment without position".into()))?;
        let pixels = textures.readback(self.id, rect, backend)?;
        self.allocator.release(rect)?;
        self.fragments.retain(|id| *id != fragment.id());
        fragment.placement = Placement::Unplaced { pixels };
        Ok(())
    }

    /// Drop `fragment`'s rectangle without reading it back. Used when the
    /// fragment itself goes away. No-op for non-members.
    pub fn discard(&mut self, fragment: &Fragment) -> Result<()> {
        if !self.is_member(fragment) {
            return Ok(());
        }
        let rect = fragment
            .rect_in_atlas()
            .ok_or_else(|| MosaicError::Internal("member fragment without position".into()))?;
        self.allocator.release(rect)?;
        self.fragments.retain(|id| *id != fragment.id());
        Ok(())
    }

    pub fn occupation(&self) -> f32 {
        self.allocator.occupancy_ratio()
    }

    /// Waste ratio of the best fit for a `width`x`height` fragment, negative
    /// if it does not fit.
    pub fn border_ratio(&self, width: u32, height: u32) -> f32 {
        self.allocator.best_fit_waste_ratio(width, height)
    }

    pub(crate) fn defragment(&mut self) {
        self.allocator.defragment();
    }
}
