//! Z-ordered, fixed-capacity element batches ("mosaics") and their draw
//! groups.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};

use crate::atlas::AtlasId;
use crate::backend::{BufferId, RenderBackend};
use crate::element::{Element, ElementId, ElementLookup};
use crate::error::{MosaicError, Result};
use crate::manager::AtlasManager;
use crate::virtualizer::TextureMode;

/// Slots per mosaic unless configured otherwise.
pub const DEFAULT_SLOTS: usize = 100;

/// Texture units the mosaic shader samples from.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Vertex of one element corner. `uv` is in atlas pixels; `unit` is the
/// texture unit of the element's atlas or -1 for untextured elements.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MosaicVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
    pub unit: i32,
}

pub const VERTICES_PER_SLOT: usize = 4;

/// A contiguous run of occupied slots drawable with one set of bound
/// atlases. Atlas `i` is bound to unit `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawingGroup {
    pub first_slot: usize,
    pub last_slot: usize,
    pub atlases: Vec<AtlasId>,
}

impl DrawingGroup {
    fn starting_at(slot: usize) -> Self {
        Self {
            first_slot: slot,
            last_slot: slot,
            atlases: Vec::new(),
        }
    }

    pub fn unit_of(&self, atlas: AtlasId) -> Option<usize> {
        self.atlases.iter().position(|a| *a == atlas)
    }

    pub fn contains_slot(&self, slot: usize) -> bool {
        (self.first_slot..=self.last_slot).contains(&slot)
    }

    pub fn slot_range(&self) -> Range<u32> {
        self.first_slot as u32..self.last_slot as u32 + 1
    }
}

/// Everything a mosaic needs to rebuild its groups and vertex buffer.
pub struct BatchContext<'a, E: ElementLookup + ?Sized, B: RenderBackend + ?Sized> {
    pub elements: &'a E,
    pub atlases: &'a AtlasManager,
    pub backend: &'a mut B,
}

/// Fixed-capacity slot array kept in non-decreasing z-index order.
///
/// Occupied slots always form a prefix. Every structural change regenerates
/// the drawing groups and rewrites the whole vertex buffer.
#[derive(Debug)]
pub struct Mosaic {
    slots: Vec<Option<ElementId>>,
    groups: Vec<DrawingGroup>,
    vertices: Vec<MosaicVertex>,
    buffer: Option<BufferId>,
    max_units: usize,
    min_z: i32,
    max_z: i32,
}

impl Mosaic {
    pub fn new(capacity: usize, max_units: usize) -> Result<Self> {
        if capacity == 0 || capacity * VERTICES_PER_SLOT > u16::MAX as usize + 1 {
            return Err(MosaicError::Config(format!(
                "mosaic capacity {capacity} outside 1..={}",
                (u16::MAX as usize + 1) / VERTICES_PER_SLOT
            )));
        }
        if !(1..=MAX_TEXTURE_UNITS).contains(&max_units) {
            return Err(MosaicError::Config(format!(
                "texture unit count {max_units} outside 1..={MAX_TEXTURE_UNITS}"
            )));
        }
        Ok(Self {
            slots: vec![None; capacity],
            groups: Vec::new(),
            vertices: vec![MosaicVertex::default(); capacity * VERTICES_PER_SLOT],
            buffer: None,
            max_units,
            min_z: 0,
            max_z: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    pub fn is_full(&self) -> bool {
        self.slots.last().is_some_and(Option::is_some)
    }

    pub fn slots(&self) -> &[Option<ElementId>] {
        &self.slots
    }

    pub fn groups(&self) -> &[DrawingGroup] {
        &self.groups
    }

    pub fn vertices(&self) -> &[MosaicVertex] {
        &self.vertices
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Lowest z-index held, 0 when empty.
    pub fn min_z(&self) -> i32 {
        self.min_z
    }

    /// Highest z-index held, 0 when empty.
    pub fn max_z(&self) -> i32 {
        self.max_z
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.slots.contains(&Some(id))
    }

    /// Insert `id` after the last element with a smaller z-index.
    ///
    /// Returns the element pushed out of the last slot, or `id` itself when
    /// the mosaic is full and `id` would land past the end.
    pub fn insert<E, B>(
        &mut self,
        id: ElementId,
        ctx: &mut BatchContext<'_, E, B>,
    ) -> Result<Option<ElementId>>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        if self.contains(id) {
            return Err(MosaicError::Usage(format!("{id:?} is already in this mosaic")));
        }
        let z = element(ctx.elements, id)?.z_index;

        let mut slot = self.slots.len();
        while slot > 0 {
            match self.slots[slot - 1] {
                Some(occupant) if element(ctx.elements, occupant)?.z_index < z => break,
                _ => slot -= 1,
            }
        }
        if slot == self.slots.len() {
            return Ok(Some(id));
        }

        let previous = self.slots.clone();
        let mut carry = Some(id);
        for entry in &mut self.slots[slot..] {
            carry = std::mem::replace(entry, carry);
            if carry.is_none() {
                break;
            }
        }
        self.commit(previous, ctx)?;
        debug!("inserted {id:?} (z {z}) at slot {slot}, evicted {carry:?}");
        Ok(carry)
    }

    /// Remove `id` and close the gap.
    pub fn remove<E, B>(&mut self, id: ElementId, ctx: &mut BatchContext<'_, E, B>) -> Result<()>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        let idx = self
            .slots
            .iter()
            .position(|s| *s == Some(id))
            .ok_or_else(|| MosaicError::Usage(format!("{id:?} is not in this mosaic")))?;
        let previous = self.slots.clone();
        self.slots.remove(idx);
        self.slots.push(None);
        self.commit(previous, ctx)
    }

    /// `id` changed without changing its z-index. Groups are regenerated as
    /// well since a texture change can alter the atlas set.
    pub fn update<E, B>(&mut self, id: ElementId, ctx: &mut BatchContext<'_, E, B>) -> Result<()>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        if !self.contains(id) {
            return Err(MosaicError::Usage(format!("{id:?} is not in this mosaic")));
        }
        self.rebuild(ctx)
    }

    /// Re-resolve every element, e.g. after fragments migrated between
    /// atlases or the texture mode changed.
    pub fn refresh<E, B>(&mut self, ctx: &mut BatchContext<'_, E, B>) -> Result<()>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        self.rebuild(ctx)
    }

    /// Rebuild after a slot change; on failure put `previous` back so the
    /// mosaic keeps describing elements that are still valid.
    fn commit<E, B>(
        &mut self,
        previous: Vec<Option<ElementId>>,
        ctx: &mut BatchContext<'_, E, B>,
    ) -> Result<()>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        let Err(e) = self.rebuild(ctx) else {
            return Ok(());
        };
        self.slots = previous;
        if let Err(again) = self.rebuild(ctx) {
            warn!("mosaic rebuild failed after rollback: {again}");
        }
        Err(e)
    }

    fn rebuild<E, B>(&mut self, ctx: &mut BatchContext<'_, E, B>) -> Result<()>
    where
        E: ElementLookup + ?Sized,
        B: RenderBackend + ?Sized,
    {
        self.determine_z_bounds(ctx.elements)?;
        self.generate_groups(ctx.elements, ctx.atlases)?;
        self.write_vertices(ctx.elements, ctx.atlases)?;

        let bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let buffer = match self.buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = ctx.backend.create_buffer(bytes.len() as u64)?;
                self.buffer = Some(buffer);
                buffer
            }
        };
        ctx.backend.write_buffer(buffer, 0, bytes)?;
        Ok(())
    }

    fn determine_z_bounds<E: ElementLookup + ?Sized>(&mut self, elements: &E) -> Result<()> {
        let mut occupied = self.slots.iter().flatten();
        let first = occupied.next().copied();
        let last = occupied.last().copied().or(first);
        self.min_z = first.map(|id| element(elements, id)).transpose()?.map_or(0, |e| e.z_index);
        self.max_z = last.map(|id| element(elements, id)).transpose()?.map_or(0, |e| e.z_index);
        Ok(())
    }

    fn generate_groups<E: ElementLookup + ?Sized>(
        &mut self,
        elements: &E,
        atlases: &AtlasManager,
    ) -> Result<()> {
        let budget = match atlases.textures().mode() {
            TextureMode::LowResource => 1,
            TextureMode::Normal => self.max_units,
        };
        self.groups.clear();
        let mut current: Option<DrawingGroup> = None;

        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(id) = entry else {
                self.groups.extend(current.take());
                continue;
            };
            let atlas = atlas_of(atlases, element(elements, *id)?)?;
            let group = current.get_or_insert_with(|| DrawingGroup::starting_at(slot));

            match atlas {
                None => group.last_slot = slot,
                Some(atlas) if group.unit_of(atlas).is_some() => group.last_slot = slot,
                Some(atlas) if group.atlases.len() < budget => {
                    group.atlases.push(atlas);
                    group.last_slot = slot;
                }
                Some(atlas) => {
                    let mut next = DrawingGroup::starting_at(slot);
                    next.atlases.push(atlas);
                    self.groups.extend(current.replace(next));
                }
            }
        }
        self.groups.extend(current);
        Ok(())
    }

    fn write_vertices<E: ElementLookup + ?Sized>(
        &mut self,
        elements: &E,
        atlases: &AtlasManager,
    ) -> Result<()> {
        self.vertices.fill(MosaicVertex::default());
        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(id) = entry else {
                continue;
            };
            let el = element(elements, *id)?;
            let group = self
                .groups
                .iter()
                .find(|g| g.contains_slot(slot))
                .ok_or_else(|| MosaicError::Internal(format!("slot {slot} has no drawing group")))?;

            let (unit, uv) = match el.texture {
                None => (-1, [0.0; 4]),
                Some(fid) => {
                    let fragment = atlases.fragment(fid).ok_or_else(|| {
                        MosaicError::Usage(format!("{id:?} uses unknown texture {fid:?}"))
                    })?;
                    let (fx, fy) = fragment.position().ok_or_else(|| {
                        MosaicError::Internal(format!("texture {fid:?} is not placed"))
                    })?;
                    let unit = fragment
                        .atlas()
                        .and_then(|a| group.unit_of(a))
                        .ok_or_else(|| {
                            MosaicError::Internal(format!(
                                "atlas of {fid:?} missing from its group"
                            ))
                        })?;
                    let tr = if el.texture_rect.is_empty() {
                        crate::rect::Rect::new(0, 0, fragment.width(), fragment.height())
                    } else {
                        el.texture_rect
                    };
                    let u0 = (fx + tr.x) as f32;
                    let v0 = (fy + tr.y) as f32;
                    (unit as i32, [u0, v0, u0 + tr.width as f32, v0 + tr.height as f32])
                }
            };

            let (x0, y0) = (el.x as f32, el.y as f32);
            let (x1, y1) = (x0 + el.width as f32, y0 + el.height as f32);
            let [u0, v0, u1, v1] = uv;
            let corners = [
                ([x0, y0], [u0, v0]),
                ([x0, y1], [u0, v1]),
                ([x1, y0], [u1, v0]),
                ([x1, y1], [u1, v1]),
            ];
            let base = slot * VERTICES_PER_SLOT;
            for (i, (pos, uv)) in corners.into_iter().enumerate() {
                self.vertices[base + i] = MosaicVertex {
                    pos,
                    uv,
                    color: el.color,
                    unit,
                };
            }
        }
        Ok(())
    }

    /// Bind each group's atlases and issue one draw per group.
    pub fn draw<B: RenderBackend + ?Sized>(
        &self,
        atlases: &mut AtlasManager,
        backend: &mut B,
    ) -> Result<()> {
        let Some(buffer) = self.buffer else {
            return Ok(());
        };
        for group in &self.groups {
            for (unit, atlas) in group.atlases.iter().enumerate() {
                atlases.textures_mut().bind(*atlas, unit as u32, backend)?;
            }
            backend.draw(buffer, group.slot_range())?;
        }
        Ok(())
    }

    /// Release the vertex buffer.
    pub fn dispose<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            backend.destroy_buffer(buffer)?;
        }
        Ok(())
    }
}

fn element<E: ElementLookup + ?Sized>(elements: &E, id: ElementId) -> Result<&Element> {
    elements
        .element(id)
        .ok_or_else(|| MosaicError::Usage(format!("unknown element {id:?}")))
}

fn atlas_of(atlases: &AtlasManager, el: &Element) -> Result<Option<AtlasId>> {
    let Some(fid) = el.texture else {
        return Ok(None);
    };
    atlases
        .atlas_of(fid)
        .map(Some)
        .ok_or_else(|| MosaicError::Usage(format!("element uses unknown texture {fid:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mosaic_config::{AtlasConfig, TextureConfig};

    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::pixel::PixelFormat;

    struct World {
        elements: HashMap<ElementId, Element>,
        atlases: AtlasManager,
        backend: SoftwareBackend,
    }

    impl World {
        fn new(atlas_size: u32) -> Self {
            let config = AtlasConfig {
                width: atlas_size,
                height: atlas_size,
                ..AtlasConfig::default()
            };
            Self {
                elements: HashMap::new(),
                atlases: AtlasManager::new(&config, &TextureConfig::default()).unwrap(),
                backend: SoftwareBackend::new(),
            }
        }

        fn add(&mut self, id: u32, z: i32) -> ElementId {
            let el = Element {
                x: id as i32,
                width: 10,
                height: 10,
                z_index: z,
                ..Element::default()
            };
            self.elements.insert(ElementId(id), el);
            ElementId(id)
        }

        fn texture(&mut self, size: u32) -> crate::FragmentId {
            let pixels = vec![1; PixelFormat::Rgba8888.buffer_len(size, size)];
            self.atlases
                .create_texture(size, size, pixels, PixelFormat::Rgba8888, &mut self.backend)
                .unwrap()
        }

        fn ctx(&mut self) -> BatchContext<'_, HashMap<ElementId, Element>, SoftwareBackend> {
            BatchContext {
                elements: &self.elements,
                atlases: &self.atlases,
                backend: &mut self.backend,
            }
        }
    }

    fn z_order(mosaic: &Mosaic, world: &World) -> Vec<i32> {
        mosaic
            .slots()
            .iter()
            .flatten()
            .map(|id| world.elements[id].z_index)
            .collect()
    }

    #[test]
    fn keeps_slots_sorted_by_z() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(8, 4).unwrap();
        for (id, z) in [(1, 5), (2, 1), (3, 9), (4, 5), (5, -2)] {
            let el = world.add(id, z);
            assert_eq!(mosaic.insert(el, &mut world.ctx()).unwrap(), None);
        }
        assert_eq!(z_order(&mosaic, &world), vec![-2, 1, 5, 5, 9]);
        // Equal z: the newer element goes in front.
        assert_eq!(mosaic.slots()[2], Some(ElementId(4)));
        assert_eq!((mosaic.min_z(), mosaic.max_z()), (-2, 9));
    }

    #[test]
    fn overflow_evicts_greatest_z() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(4, 4).unwrap();
        for (id, z) in [(1, 3), (2, 8), (3, 1), (4, 5)] {
            let el = world.add(id, z);
            assert_eq!(mosaic.insert(el, &mut world.ctx()).unwrap(), None);
        }
        assert!(mosaic.is_full());
        let el = world.add(5, 4);
        assert_eq!(mosaic.insert(el, &mut world.ctx()).unwrap(), Some(ElementId(2)));
        assert_eq!(z_order(&mosaic, &world), vec![1, 3, 4, 5]);

        let el = world.add(6, 100);
        assert_eq!(mosaic.insert(el, &mut world.ctx()).unwrap(), Some(ElementId(6)));
        assert!(!mosaic.contains(ElementId(6)));
    }

    #[test]
    fn remove_closes_gap() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(4, 4).unwrap();
        for (id, z) in [(1, 1), (2, 2), (3, 3)] {
            let el = world.add(id, z);
            mosaic.insert(el, &mut world.ctx()).unwrap();
        }
        mosaic.remove(ElementId(2), &mut world.ctx()).unwrap();
        assert_eq!(mosaic.slots(), &[Some(ElementId(1)), Some(ElementId(3)), None, None]);
        assert!(mosaic.remove(ElementId(2), &mut world.ctx()).unwrap_err().is_usage());
    }

    #[test]
    fn groups_respect_unit_budget() {
        // Every 64x64 texture fills its own 64x64 atlas.
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(10, 2).unwrap();
        let textures: Vec<_> = (0..3).map(|_| world.texture(64)).collect();
        for (i, tex) in [0, 1, 0, 2, 2].into_iter().enumerate() {
            let el = world.add(i as u32 + 1, i as i32);
            world.elements.get_mut(&el).unwrap().texture = Some(textures[tex]);
            mosaic.insert(el, &mut world.ctx()).unwrap();
        }
        let plain = world.add(50, 10);
        mosaic.insert(plain, &mut world.ctx()).unwrap();

        let groups = mosaic.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].first_slot, groups[0].last_slot), (0, 2));
        assert_eq!(groups[0].atlases.len(), 2);
        assert_eq!((groups[1].first_slot, groups[1].last_slot), (3, 5));
        assert_eq!(groups[1].atlases.len(), 1);
    }

    #[test]
    fn vertices_carry_position_uv_and_unit() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(4, 4).unwrap();
        world.texture(16);
        let tex = world.texture(8);
        let (fx, fy) = world.atlases.fragment(tex).unwrap().position().unwrap();

        let el = world.add(1, 0);
        {
            let e = world.elements.get_mut(&el).unwrap();
            e.texture = Some(tex);
            e.texture_rect = crate::rect::Rect::new(2, 2, 4, 4);
            e.color = [1, 2, 3, 4];
        }
        let plain = world.add(2, 1);
        mosaic.insert(el, &mut world.ctx()).unwrap();
        mosaic.insert(plain, &mut world.ctx()).unwrap();

        let v = mosaic.vertices();
        assert_eq!(v[0].pos, [1.0, 0.0]);
        assert_eq!(v[1].pos, [1.0, 10.0]);
        assert_eq!(v[2].pos, [11.0, 0.0]);
        assert_eq!(v[3].uv, [(fx + 6) as f32, (fy + 6) as f32]);
        assert_eq!(v[0].unit, 0);
        assert_eq!(v[0].color, [1, 2, 3, 4]);
        assert_eq!(v[4].unit, -1);

        let buffer = mosaic.buffer().unwrap();
        let uploaded = world.backend.buffer_contents(buffer).unwrap();
        assert_eq!(uploaded, bytemuck::cast_slice::<MosaicVertex, u8>(mosaic.vertices()));
    }

    #[test]
    fn draw_binds_units_and_issues_one_call_per_group() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(4, 1).unwrap();
        let a = world.texture(64);
        let b = world.texture(64);
        for (id, tex) in [(1, a), (2, b)] {
            let el = world.add(id, id as i32);
            world.elements.get_mut(&el).unwrap().texture = Some(tex);
            mosaic.insert(el, &mut world.ctx()).unwrap();
        }
        mosaic.draw(&mut world.atlases, &mut world.backend).unwrap();
        let draws = world.backend.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].slots, 0..1);
        assert_eq!(draws[1].slots, 1..2);
        let tex_a = world.atlases.textures().physical_texture(world.atlases.atlas_of(a).unwrap());
        assert_eq!(draws[0].units[0], tex_a);
    }

    #[test]
    fn failed_insert_leaves_slots_untouched() {
        let mut world = World::new(64);
        let mut mosaic = Mosaic::new(4, 4).unwrap();
        for (id, z) in [(1, 1), (2, 3)] {
            let el = world.add(id, z);
            mosaic.insert(el, &mut world.ctx()).unwrap();
        }
        let before = mosaic.slots().to_vec();
        let vertices = mosaic.vertices().to_vec();

        let broken = world.add(3, 2);
        world.elements.get_mut(&broken).unwrap().texture = Some(crate::FragmentId(99));
        assert!(mosaic.insert(broken, &mut world.ctx()).unwrap_err().is_usage());
        assert_eq!(mosaic.slots(), before.as_slice());
        assert_eq!(mosaic.vertices(), vertices.as_slice());
        assert_eq!(mosaic.max_z(), 3);

        // Forgetting the rejected element does not break later rebuilds.
        world.elements.remove(&broken);
        let el = world.add(4, 2);
        assert_eq!(mosaic.insert(el, &mut world.ctx()).unwrap(), None);
        assert_eq!(z_order(&mosaic, &world), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(Mosaic::new(0, 4).is_err());
        assert!(Mosaic::new(10, 0).is_err());
        assert!(Mosaic::new(10, MAX_TEXTURE_UNITS + 1).is_err());
    }
}
