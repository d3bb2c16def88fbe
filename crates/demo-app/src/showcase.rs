//! Procedural textures and a grid of overlapping elements that animate
//! through the scene setters.

use anyhow::Result;
use mosaic_core::{Element, ElementId, FragmentId, PixelFormat, Rect, RenderBackend};
use mosaic_scene::Renderer;

const TILE: u32 = 96;
const GAP: i32 = 24;

fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let c = if (x / cell + y / cell) % 2 == 0 { a } else { b };
            out.extend_from_slice(&c);
        }
    }
    out
}

fn gradient(width: u32, height: u32, from: [u8; 3], to: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let t = y as f32 / (height.max(2) - 1) as f32;
        let mix = |i: usize| (from[i] as f32 + (to[i] as f32 - from[i] as f32) * t) as u8;
        for _ in 0..width {
            out.extend_from_slice(&[mix(0), mix(1), mix(2), 255]);
        }
    }
    out
}

fn rings(size: u32) -> Vec<u8> {
    let c = size as f32 / 2.0;
    let mut out = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
            let band = (d / 6.0) as u32 % 2 == 0;
            let alpha = if d > c { 0 } else { 255 };
            let rgb = if band { [240, 120, 40] } else { [30, 30, 60] };
            out.extend_from_slice(&[rgb[0], rgb[1], rgb[2], alpha]);
        }
    }
    out
}

/// Elements created at startup and the ones animated per frame.
pub struct Showcase {
    textures: Vec<FragmentId>,
    tiles: Vec<ElementId>,
    orbiters: Vec<ElementId>,
    pub marker: ElementId,
}

impl Showcase {
    pub fn build<B: RenderBackend>(
        renderer: &mut Renderer<B>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let fmt = PixelFormat::Rgba8888;
        let checker = checkerboard(64, 8, [255; 4], [20, 20, 20, 255]);
        let sky = gradient(32, 128, [40, 90, 200], [240, 240, 255]);
        let small_checker = checkerboard(16, 2, [200, 40, 40, 255], [255; 4]);
        let textures = vec![
            renderer.create_texture(64, 64, checker, fmt)?,
            renderer.create_texture(32, 128, sky, fmt)?,
            renderer.create_texture(128, 128, rings(128), fmt)?,
            renderer.create_texture(16, 16, small_checker, fmt)?,
        ];

        let cols = ((width as i32 - GAP) / (TILE as i32 + GAP)).max(1);
        let rows = ((height as i32 - GAP) / (TILE as i32 + GAP)).max(1);
        let mut tiles = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let i = (row * cols + col) as usize;
                let texture = (i % 5 != 4).then(|| textures[i % textures.len()]);
                let tint = [
                    (120 + (col * 40) % 135) as u8,
                    (120 + (row * 60) % 135) as u8,
                    200,
                    255,
                ];
                tiles.push(renderer.new_element(Element {
                    x: GAP + col * (TILE as i32 + GAP),
                    y: GAP + row * (TILE as i32 + GAP),
                    width: TILE,
                    height: TILE,
                    color: if texture.is_some() { [255; 4] } else { tint },
                    texture,
                    z_index: (i % 7) as i32,
                    ..Element::default()
                })?);
            }
        }

        let mut orbiters = Vec::new();
        for i in 0..6 {
            orbiters.push(renderer.new_element(Element {
                width: 48,
                height: 48,
                texture: Some(textures[2]),
                z_index: 3,
                color: [255, 255, 255, 220],
                texture_rect: if i % 2 == 0 { Rect::default() } else { Rect::new(32, 32, 64, 64) },
                ..Element::default()
            })?);
        }

        let marker = renderer.new_element(Element {
            x: width as i32 / 2 - 40,
            y: height as i32 / 2 - 40,
            width: 80,
            height: 80,
            color: [255, 60, 60, 200],
            z_index: 10,
            ..Element::default()
        })?;

        log::info!(
            "showcase: {} tiles, {} orbiters, {} atlases",
            tiles.len(),
            orbiters.len(),
            renderer.atlases().atlases().len()
        );
        Ok(Self {
            textures,
            tiles,
            orbiters,
            marker,
        })
    }

    /// Move the orbiters around the window centre and pulse one tile.
    pub fn animate<B: RenderBackend>(
        &self,
        renderer: &mut Renderer<B>,
        t: f32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius = (width.min(height) as f32 / 3.0).max(60.0);
        let scene = renderer.scene_mut();
        for (i, id) in self.orbiters.iter().enumerate() {
            let phase = t * 0.8 + i as f32 * std::f32::consts::TAU / self.orbiters.len() as f32;
            let x = cx + radius * phase.cos() - 24.0;
            let y = cy + radius * phase.sin() - 24.0;
            scene.set_position(*id, x as i32, y as i32)?;
            // Sweep through the tiles' z range so orbiters pass over and under.
            scene.set_z_index(*id, ((phase.sin() + 1.0) * 4.0) as i32)?;
        }
        if let Some(tile) = self.tiles.first() {
            let alpha = ((t * 2.0).sin() * 0.5 + 0.5) * 255.0;
            scene.set_color(*tile, [255, 255, 255, alpha as u8])?;
        }
        Ok(())
    }

    /// Swap the texture of every third tile to the next texture.
    pub fn rotate_textures<B: RenderBackend>(&self, renderer: &mut Renderer<B>) -> Result<()> {
        for id in self.tiles.iter().step_by(3) {
            let Some(current) = renderer.scene().get(*id).and_then(|e| e.texture) else {
                continue;
            };
            let next = self
                .textures
                .iter()
                .position(|t| *t == current)
                .map(|i| self.textures[(i + 1) % self.textures.len()]);
            renderer.scene_mut().set_texture(*id, next)?;
        }
        Ok(())
    }
}
