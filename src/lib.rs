//! Mosaic: texture atlases and z-ordered quad batching on wgpu.
//!
//! Re-exports the workspace crates under one name.

pub use mosaic_config;
pub use mosaic_core;
pub use mosaic_scene;

pub use mosaic_config::MosaicConfig;
pub use mosaic_core::{
    AtlasManager, Element, ElementId, FragmentId, MosaicError, PixelFormat, Rect, SoftwareBackend,
    WgpuBackend,
};
pub use mosaic_scene::Renderer;

/// Load `mosaic.toml` plus environment overrides and validate the result.
pub fn load_config() -> anyhow::Result<MosaicConfig> {
    let config = MosaicConfig::load();
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}
