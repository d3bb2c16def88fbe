//! Mosaic configuration
//!
//! Settings are read from `mosaic.toml` and can be overridden through
//! `MOSAIC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest slot count whose quad indices still fit in `u16`.
pub const MAX_BATCH_SLOTS: usize = 16383;

/// Texture units the batching shader declares.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct MosaicConfig {
    pub atlas: AtlasConfig,
    pub batch: BatchConfig,
    pub textures: TextureConfig,
    pub scene: SceneConfig,
    pub window: WindowConfig,
}

/// Atlas packing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtlasConfig {
    /// Default atlas width, a power of two
    pub width: u32,
    /// Default atlas height, a power of two
    pub height: u32,
    /// Give textures larger than the default atlas a dedicated atlas
    pub allow_oversized: bool,
    /// Occupation below which a sparse atlas tries to move its fragments out
    pub rearrangement_threshold: f32,
}

/// Mosaic batch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Quads per mosaic
    pub slots: usize,
    /// Atlases one draw call may sample from
    pub max_texture_units: usize,
}

/// Physical texture settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TextureConfig {
    /// Cap on GPU textures; reaching it switches to low-resource mode
    pub max_physical_textures: Option<usize>,
}

/// Scene bookkeeping settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneConfig {
    /// Recycled mutation records kept per live element
    pub mutation_oversize_factor: f32,
}

/// Demo window settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// RGBA in `0.0..=1.0`
    pub clear_color: [f32; 4],
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            allow_oversized: true,
            rearrangement_threshold: 0.3,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            slots: 100,
            max_texture_units: MAX_TEXTURE_UNITS,
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            mutation_oversize_factor: 1.5,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Mosaic".to_string(),
            width: 1280,
            height: 720,
            clear_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

impl MosaicConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Load `mosaic.toml` from the current directory, or defaults if it is
    /// missing or unreadable
    pub fn load_or_default() -> Self {
        Self::load_from_file("mosaic.toml").unwrap_or_default()
    }

    /// Apply environment variable overrides. Unparsable values are ignored.
    pub fn merge_with_env(&mut self) {
        if let Ok(val) = std::env::var("MOSAIC_ATLAS_SIZE") {
            if let Ok(size) = val.parse::<u32>() {
                self.atlas.width = size;
                self.atlas.height = size;
            }
        }
        if let Ok(val) = std::env::var("MOSAIC_ALLOW_OVERSIZED") {
            self.atlas.allow_oversized = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("MOSAIC_REARRANGE_THRESHOLD") {
            if let Ok(t) = val.parse::<f32>() {
                self.atlas.rearrangement_threshold = t;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_BATCH_SLOTS") {
            if let Ok(slots) = val.parse::<usize>() {
                self.batch.slots = slots;
            }
        }
        if let Ok(val) = std::env::var("MOSAIC_TEXTURE_UNITS") {
            if let Ok(units) = val.parse::<usize>() {
                self.batch.max_texture_units = units;
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_MAX_TEXTURES") {
            if let Ok(max) = val.parse::<usize>() {
                self.textures.max_physical_textures = Some(max);
            }
        }

        // WIDTHxHEIGHT
        if let Ok(val) = std::env::var("MOSAIC_WINDOW_SIZE") {
            if let Some((w, h)) = val.split_once(['x', 'X']) {
                if let (Ok(w), Ok(h)) = (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
                    self.window.width = w;
                    self.window.height = h;
                }
            }
        }
    }

    /// File (or defaults), then environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_or_default();
        config.merge_with_env();
        config
    }

    /// Check value ranges the renderer depends on
    pub fn validate(&self) -> Result<(), String> {
        let a = &self.atlas;
        if !a.width.is_power_of_two() || !a.height.is_power_of_two() {
            return Err(format!(
                "atlas size {}x{} must be powers of two",
                a.width, a.height
            ));
        }
        if !(0.0..=1.0).contains(&a.rearrangement_threshold) {
            return Err(format!(
                "rearrangement_threshold {} must be within [0, 1]",
                a.rearrangement_threshold
            ));
        }
        let b = &self.batch;
        if b.slots == 0 || b.slots > MAX_BATCH_SLOTS {
            return Err(format!("batch slots {} must be within 1..={MAX_BATCH_SLOTS}", b.slots));
        }
        if b.max_texture_units == 0 || b.max_texture_units > MAX_TEXTURE_UNITS {
            return Err(format!(
                "max_texture_units {} must be within 1..={MAX_TEXTURE_UNITS}",
                b.max_texture_units
            ));
        }
        if !(self.scene.mutation_oversize_factor >= 0.0) {
            return Err(format!(
                "mutation_oversize_factor {} must not be negative",
                self.scene.mutation_oversize_factor
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(format!(
                "window size {}x{} must not be empty",
                self.window.width, self.window.height
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MosaicConfig::default();
        assert_eq!(config.atlas.width, 1024);
        assert!(config.atlas.allow_oversized);
        assert_eq!(config.batch.slots, 100);
        assert_eq!(config.textures.max_physical_textures, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = MosaicConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: MosaicConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: MosaicConfig = toml::from_str(
            "[atlas]\nwidth = 512\n\n[textures]\nmax_physical_textures = 2\n",
        )
        .unwrap();
        assert_eq!(parsed.atlas.width, 512);
        assert_eq!(parsed.atlas.height, 1024);
        assert_eq!(parsed.textures.max_physical_textures, Some(2));
        assert_eq!(parsed.window.title, "Mosaic");
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = MosaicConfig::load_from_file("does/not/exist.toml").unwrap_err();
        assert!(err.starts_with("Failed to read"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MosaicConfig::default();
        config.atlas.width = 1000;
        assert!(config.validate().is_err());

        let mut config = MosaicConfig::default();
        config.atlas.rearrangement_threshold = -0.1;
        assert!(config.validate().is_err());

        let mut config = MosaicConfig::default();
        config.batch.slots = MAX_BATCH_SLOTS + 1;
        assert!(config.validate().is_err());

        let mut config = MosaicConfig::default();
        config.batch.max_texture_units = 0;
        assert!(config.validate().is_err());

        let mut config = MosaicConfig::default();
        config.scene.mutation_oversize_factor = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_with_env() {
        unsafe {
            std::env::set_var("MOSAIC_ATLAS_SIZE", "256");
            std::env::set_var("MOSAIC_ALLOW_OVERSIZED", "false");
            std::env::set_var("MOSAIC_MAX_TEXTURES", "3");
            std::env::set_var("MOSAIC_WINDOW_SIZE", "800x600");
            std::env::set_var("MOSAIC_BATCH_SLOTS", "not-a-number");
        }

        let mut config = MosaicConfig::default();
        config.merge_with_env();

        assert_eq!((config.atlas.width, config.atlas.height), (256, 256));
        assert!(!config.atlas.allow_oversized);
        assert_eq!(config.textures.max_physical_textures, Some(3));
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.batch.slots, 100);

        unsafe {
            std::env::remove_var("MOSAIC_ATLAS_SIZE");
            std::env::remove_var("MOSAIC_ALLOW_OVERSIZED");
            std::env::remove_var("MOSAIC_MAX_TEXTURES");
            std::env::remove_var("MOSAIC_WINDOW_SIZE");
            std::env::remove_var("MOSAIC_BATCH_SLOTS");
        }
    }
}
