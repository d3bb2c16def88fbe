//! Texture atlasing and z-ordered quad batching.

pub use wgpu;

pub mod atlas;
pub mod backend;
pub mod batcher;
pub mod element;
pub mod error;
pub mod fragment;
pub mod free_space;
pub mod manager;
pub mod pixel;
pub mod rect;
pub mod virtualizer;

pub use atlas::{Atlas, AtlasId};
pub use backend::{
    BufferId, DrawBackend, DrawCall, GpuFrameTarget, RenderBackend, SoftwareBackend, TextureBackend,
    TextureId, WgpuBackend, quad_indices,
};
pub use batcher::{
    BatchContext, DEFAULT_SLOTS, DrawingGroup, MAX_TEXTURE_UNITS, Mosaic, MosaicVertex,
    VERTICES_PER_SLOT,
};
pub use element::{AttributeValue, Element, ElementAttribute, ElementId, ElementLookup};
pub use error::{BackendError, MosaicError, Result};
pub use fragment::{Fragment, FragmentId, Placement};
pub use free_space::FreeSpaceAllocator;
pub use manager::{AtlasManager, DestroyReport};
pub use pixel::PixelFormat;
pub use rect::Rect;
pub use virtualizer::{TextureMode, Virtualizer};
