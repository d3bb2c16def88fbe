use crate::atlas::AtlasId;
use crate::error::Result;
use crate::pixel::PixelFormat;
use crate::rect::Rect;

/// Handle of a texture fragment owned by the [`crate::AtlasManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(pub u32);

/// Where a fragment's pixels live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Standalone, owning exactly `width * height * bpp` bytes.
    Unplaced { pixels: Vec<u8> },
    /// Packed into an atlas; the pixels belong to the atlas backing store.
    Placed { atlas: AtlasId, x: u32, y: u32 },
}

/// A sub-image that is either standalone or packed into an atlas.
#[derive(Clone, Debug)]
pub struct Fragment {
    id: FragmentId,
    width: u32,
    height: u32,
    format: PixelFormat,
    pub(crate) placement: Placement,
}

impl Fragment {
    /// Fails with a usage error when `pixels` does not match the size.
    pub fn new(
        id: FragmentId,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        format.check_len(width, height, pixels.len())?;
        Ok(Self {
            id,
            width,
            height,
            format,
            placement: Placement::Unplaced { pixels },
        })
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn is_placed(&self) -> bool {
        matches!(self.placement, Placement::Placed { .. })
    }

    pub fn atlas(&self) -> Option<AtlasId> {
        match self.placement {
            Placement::Placed { atlas, .. } => Some(atlas),
            Placement::Unplaced { .. } => None,
        }
    }

    /// Offset inside the atlas; `None` while unplaced.
    pub fn position(&self) -> Option<(u32, u32)> {
        match self.placement {
            Placement::Placed { x, y, .. } => Some((x, y)),
            Placement::Unplaced { .. } => None,
        }
    }

    pub fn rect_in_atlas(&self) -> Option<Rect> {
        self.position()
            .map(|(x, y)| Rect::new(x, y, self.width, self.height))
    }

    /// Standalone pixel data; `None` while placed.
    pub fn pixels(&self) -> Option<&[u8]> {
        match &self.placement {
            Placement::Unplaced { pixels } => Some(pixels),
            Placement::Placed { .. } => None,
        }
    }
}
