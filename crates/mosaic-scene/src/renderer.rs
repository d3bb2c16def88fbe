use std::collections::HashSet;

use log::{debug, info, warn};
use mosaic_config::{BatchConfig, MosaicConfig};
use mosaic_core::{
    AtlasManager, AttributeValue, BatchContext, Element, ElementAttribute, ElementId, FragmentId,
    Mosaic, MosaicError, PixelFormat, RenderBackend, Result, TextureMode,
};

use crate::mutation::SubscriptionToken;
use crate::scene::Scene;
use crate::tasks::{TaskQueue, TaskSender};

/// Owns the scene, the atlases, the mosaics and the backend, and turns scene
/// mutations into batch updates.
///
/// Mosaics are kept in z order: every element of mosaic `i` has a z-index no
/// greater than any element of mosaic `i + 1`.
pub struct Renderer<B: RenderBackend> {
    backend: B,
    atlases: AtlasManager,
    scene: Scene,
    subscription: SubscriptionToken,
    mosaics: Vec<Mosaic>,
    batch: BatchConfig,
    mode: TextureMode,
    tasks: TaskQueue<Self>,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(config: &MosaicConfig, backend: B) -> Result<Self> {
        config.validate().map_err(MosaicError::Config)?;
        let mut batch = config.batch.clone();
        let supported = backend.max_texture_units() as usize;
        if batch.max_texture_units > supported {
            info!(
                "backend supports {supported} texture units, lowering from {}",
                batch.max_texture_units
            );
            batch.max_texture_units = supported;
        }
        let atlases = AtlasManager::new(&config.atlas, &config.textures)?;
        let mut scene = Scene::new(config.scene.mutation_oversize_factor)?;
        let subscription = scene.subscribe();
        let mode = atlases.textures().mode();
        Ok(Self {
            backend,
            atlases,
            scene,
            subscription,
            mosaics: Vec::new(),
            batch,
            mode,
            tasks: TaskQueue::new(),
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Changes made here are applied by the next `process_mutations`.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn atlases(&self) -> &AtlasManager {
        &self.atlases
    }

    pub fn mosaics(&self) -> &[Mosaic] {
        &self.mosaics
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn texture_mode(&self) -> TextureMode {
        self.atlases.textures().mode()
    }

    pub fn tasks(&self) -> TaskSender<Self> {
        self.tasks.sender()
    }

    pub fn task_queue(&self) -> &TaskQueue<Self> {
        &self.tasks
    }

    /// Run `task` now when called on the rendering thread, otherwise queue it.
    pub fn execute<F>(&mut self, task: F)
    where
        F: FnOnce(&mut Self) + Send + 'static,
    {
        let queue = self.tasks.clone();
        queue.execute(task, self);
    }

    /// Run queued tasks. Only valid on the rendering thread.
    pub fn run_pending_tasks(&mut self) -> Result<usize> {
        let queue = self.tasks.clone();
        queue.run_pending(self)
    }

    pub fn new_element(&mut self, element: Element) -> Result<ElementId> {
        if let Some(texture) = element.texture {
            self.check_texture(texture)?;
        }
        let id = self.scene.insert(element);
        if let Err(e) = self.place(id) {
            self.unplace(id)?;
            self.scene.remove(id)?;
            return Err(e);
        }
        Ok(id)
    }

    pub fn release_element(&mut self, id: ElementId) -> Result<()> {
        if self.scene.get(id).is_none() {
            return Err(MosaicError::Usage(format!("unknown element {id:?}")));
        }
        self.unplace(id)?;
        self.scene.remove(id)?;
        Ok(())
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        format: PixelFormat,
    ) -> Result<FragmentId> {
        let id = self
            .atlases
            .create_texture(width, height, pixels, format, &mut self.backend)?;
        self.check_mode()?;
        Ok(id)
    }

    /// Fails while any element still samples from `id`.
    pub fn release_texture(&mut self, id: FragmentId) -> Result<()> {
        if self.scene.references(id) {
            return Err(MosaicError::Usage(format!("{id:?} is still used by an element")));
        }
        let report = self.atlases.destroy(id, &mut self.backend)?;
        if !report.migrated.is_empty() || !report.relocated.is_empty() {
            let moved: HashSet<FragmentId> =
                report.migrated.into_iter().chain(report.relocated).collect();
            let affected: Vec<usize> = self
                .mosaics
                .iter()
                .enumerate()
                .filter(|(_, mosaic)| {
                    mosaic
                        .slots()
                        .iter()
                        .flatten()
                        .filter_map(|el| self.scene.get(*el))
                        .any(|el| el.texture.is_some_and(|t| moved.contains(&t)))
                })
                .map(|(idx, _)| idx)
                .collect();
            debug!("{} fragments moved, refreshing {} mosaics", moved.len(), affected.len());
            self.refresh(&affected)?;
        }
        Ok(())
    }

    /// Apply recorded scene changes to the mosaics.
    ///
    /// A texture assignment naming an unknown texture is reverted and
    /// reported as a usage error once the remaining changes are applied.
    pub fn process_mutations(&mut self) -> Result<()> {
        let mutations = self.scene.drain_mutations(self.subscription)?;
        if mutations.is_empty() {
            return Ok(());
        }

        let mut reordered = Vec::new();
        let mut changed = HashSet::new();
        let mut rejected = Vec::new();
        for m in &mutations {
            let Some(element) = self.scene.get(m.element) else {
                continue;
            };
            if m.attribute == ElementAttribute::Texture && !rejected.contains(&m.element) {
                let unknown = element.texture.filter(|t| self.atlases.fragment(*t).is_none());
                if let Some(texture) = unknown {
                    // The first record of the batch holds the last applied value.
                    let restored = match m.previous {
                        AttributeValue::Texture(Some(t)) if self.atlases.fragment(t).is_none() => {
                            AttributeValue::Texture(None)
                        }
                        previous => previous,
                    };
                    self.scene.revert(m.element, m.attribute, restored)?;
                    rejected.push(m.element);
                    warn!("{:?} reverted: unknown texture {texture:?}", m.element);
                }
            }
            if m.attribute.affects_order() {
                if !reordered.contains(&m.element) {
                    reordered.push(m.element);
                }
            } else {
                changed.insert(m.element);
            }
        }

        // Take every reordered element out before placing any of them, so
        // placement never scans past an element whose z-index is stale.
        for &id in &reordered {
            changed.remove(&id);
            self.unplace(id)?;
        }
        for &id in &reordered {
            self.place(id)?;
        }
        let affected: Vec<usize> = self
            .mosaics
            .iter()
            .enumerate()
            .filter(|(_, mosaic)| mosaic.slots().iter().flatten().any(|id| changed.contains(id)))
            .map(|(idx, _)| idx)
            .collect();
        self.refresh(&affected)?;

        match rejected.first() {
            Some(id) => Err(MosaicError::Usage(format!(
                "texture change of {id:?} names an unknown texture and was reverted"
            ))),
            None => Ok(()),
        }
    }

    /// Run queued tasks, apply mutations and draw every mosaic in z order.
    pub fn render(&mut self) -> Result<()> {
        self.run_pending_tasks()?;
        self.process_mutations()?;
        self.backend.begin_frame()?;
        for mosaic in &self.mosaics {
            mosaic.draw(&mut self.atlases, &mut self.backend)?;
        }
        self.backend.end_frame()?;
        Ok(())
    }

    /// Release every mosaic's vertex buffer.
    pub fn dispose(&mut self) -> Result<()> {
        for mut mosaic in self.mosaics.drain(..) {
            mosaic.dispose(&mut self.backend)?;
        }
        Ok(())
    }

    fn check_texture(&self, texture: FragmentId) -> Result<()> {
        if self.atlases.fragment(texture).is_none() {
            return Err(MosaicError::Usage(format!("unknown texture {texture:?}")));
        }
        Ok(())
    }

    fn place(&mut self, id: ElementId) -> Result<()> {
        let z = self
            .scene
            .get(id)
            .map(|el| el.z_index)
            .ok_or_else(|| MosaicError::Usage(format!("unknown element {id:?}")))?;

        let mut idx = 0;
        while idx + 1 < self.mosaics.len() && self.mosaics[idx].max_z() < z {
            idx += 1;
        }

        let mut ctx = BatchContext {
            elements: &self.scene,
            atlases: &self.atlases,
            backend: &mut self.backend,
        };
        let mut carry = Some(id);
        while let Some(element) = carry {
            if idx == self.mosaics.len() {
                self.mosaics
                    .push(Mosaic::new(self.batch.slots, self.batch.max_texture_units)?);
                debug!("opened mosaic #{idx}");
            }
            let inserted = self.mosaics[idx].insert(element, &mut ctx);
            if inserted.is_err() && self.mosaics[idx].is_empty() {
                let mut mosaic = self.mosaics.remove(idx);
                mosaic.dispose(&mut *ctx.backend)?;
            }
            carry = inserted?;
            idx += 1;
        }
        Ok(())
    }

    fn unplace(&mut self, id: ElementId) -> Result<()> {
        let Some(idx) = self.mosaics.iter().position(|m| m.contains(id)) else {
            return Ok(());
        };
        let mut ctx = BatchContext {
            elements: &self.scene,
            atlases: &self.atlases,
            backend: &mut self.backend,
        };
        self.mosaics[idx].remove(id, &mut ctx)?;
        if self.mosaics[idx].is_empty() {
            let mut mosaic = self.mosaics.remove(idx);
            mosaic.dispose(&mut self.backend)?;
            debug!("dropped empty mosaic #{idx}");
        }
        Ok(())
    }

    fn refresh(&mut self, indices: &[usize]) -> Result<()> {
        let mut ctx = BatchContext {
            elements: &self.scene,
            atlases: &self.atlases,
            backend: &mut self.backend,
        };
        for &idx in indices {
            self.mosaics[idx].refresh(&mut ctx)?;
        }
        Ok(())
    }

    // Grouping depends on the texture mode, so a switch regroups everything.
    fn check_mode(&mut self) -> Result<()> {
        let mode = self.atlases.textures().mode();
        if mode != self.mode {
            info!("texture mode changed to {mode:?}, regrouping {} mosaics", self.mosaics.len());
            self.mode = mode;
            let all: Vec<usize> = (0..self.mosaics.len()).collect();
            self.refresh(&all)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mosaic_core::SoftwareBackend;

    use super::*;

    fn renderer(slots: usize) -> Renderer<SoftwareBackend> {
        let mut config = MosaicConfig::default();
        config.atlas.width = 64;
        config.atlas.height = 64;
        config.batch.slots = slots;
        Renderer::new(&config, SoftwareBackend::new()).unwrap()
    }

    fn at_z(z: i32) -> Element {
        Element {
            width: 4,
            height: 4,
            z_index: z,
            ..Element::default()
        }
    }

    fn z_layout(r: &Renderer<SoftwareBackend>) -> Vec<Vec<i32>> {
        r.mosaics()
            .iter()
            .map(|m| {
                m.slots()
                    .iter()
                    .flatten()
                    .map(|id| r.scene().get(*id).unwrap().z_index)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn overflow_cascades_into_new_mosaics() {
        let mut r = renderer(2);
        for z in [5, 1, 3, 2, 4] {
            r.new_element(at_z(z)).unwrap();
        }
        assert_eq!(z_layout(&r), vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn z_change_relocates_element() {
        let mut r = renderer(2);
        let ids: Vec<_> = [1, 2, 3, 4]
            .into_iter()
            .map(|z| r.new_element(at_z(z)).unwrap())
            .collect();
        r.scene_mut().set_z_index(ids[0], 10).unwrap();
        r.process_mutations().unwrap();
        assert_eq!(z_layout(&r), vec![vec![2], vec![3, 4], vec![10]]);
    }

    #[test]
    fn several_z_changes_in_one_pass_keep_order() {
        let mut r = renderer(2);
        let ids: Vec<_> = [10, 40, 45, 50, 60]
            .into_iter()
            .map(|z| r.new_element(at_z(z)).unwrap())
            .collect();
        r.scene_mut().set_z_index(ids[4], 20).unwrap();
        r.scene_mut().set_z_index(ids[2], 5).unwrap();
        r.process_mutations().unwrap();
        assert_eq!(z_layout(&r), vec![vec![5, 10], vec![20, 40], vec![50]]);
    }

    #[test]
    fn unknown_texture_assignment_is_reverted() {
        let mut r = renderer(4);
        let a = r.new_element(at_z(0)).unwrap();
        r.scene_mut().set_texture(a, Some(FragmentId(99))).unwrap();
        r.scene_mut().set_color(a, [9, 9, 9, 9]).unwrap();
        assert!(r.process_mutations().unwrap_err().is_usage());
        assert_eq!(r.scene().get(a).unwrap().texture, None);
        assert_eq!(r.mosaics()[0].vertices()[0].color, [9, 9, 9, 9]);

        let b = r.new_element(at_z(1)).unwrap();
        r.render().unwrap();
        assert_eq!(r.mosaics()[0].slots()[..2], [Some(a), Some(b)]);
    }

    #[test]
    fn failed_placement_leaves_no_trace() {
        let mut r = renderer(4);
        r.backend_mut().reject_buffer_writes(true);
        assert!(r.new_element(at_z(0)).is_err());
        assert!(r.scene().is_empty());
        assert!(r.mosaics().is_empty());

        r.backend_mut().reject_buffer_writes(false);
        r.new_element(at_z(1)).unwrap();
        assert_eq!(z_layout(&r), vec![vec![1]]);
    }

    #[test]
    fn relocated_textures_refresh_their_mosaics() {
        let mut r = renderer(4);
        let fmt = PixelFormat::Rgba8888;
        let big = r.create_texture(64, 48, vec![1; fmt.buffer_len(64, 48)], fmt).unwrap();
        let small = r.create_texture(8, 8, vec![2; fmt.buffer_len(8, 8)], fmt).unwrap();
        let other = r.create_texture(64, 32, vec![3; fmt.buffer_len(64, 32)], fmt).unwrap();
        r.new_element(Element {
            texture: Some(small),
            ..at_z(0)
        })
        .unwrap();
        assert_eq!(r.mosaics()[0].vertices()[0].uv, [0.0, 48.0]);

        let target = r
            .atlases()
            .textures()
            .physical_texture(r.atlases().atlas_of(other).unwrap())
            .unwrap();
        r.backend_mut().reject_uploads_to(target);
        r.release_texture(big).unwrap();

        assert_eq!(r.atlases().fragment(small).unwrap().position(), Some((0, 0)));
        assert_eq!(r.mosaics()[0].vertices()[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn empty_mosaics_are_dropped() {
        let mut r = renderer(1);
        let a = r.new_element(at_z(1)).unwrap();
        let b = r.new_element(at_z(2)).unwrap();
        assert_eq!(r.mosaics().len(), 2);
        r.release_element(a).unwrap();
        assert_eq!(z_layout(&r), vec![vec![2]]);
        r.release_element(b).unwrap();
        assert!(r.mosaics().is_empty());
        assert_eq!(r.backend().buffer_count(), 0);
    }

    #[test]
    fn texture_in_use_cannot_be_released() {
        let mut r = renderer(4);
        let pixels = vec![9; PixelFormat::Rgba8888.buffer_len(8, 8)];
        let tex = r.create_texture(8, 8, pixels, PixelFormat::Rgba8888).unwrap();
        let el = r
            .new_element(Element {
                texture: Some(tex),
                ..at_z(0)
            })
            .unwrap();
        assert!(r.release_texture(tex).unwrap_err().is_usage());
        r.scene_mut().set_texture(el, None).unwrap();
        r.release_texture(tex).unwrap();
        assert!(r.atlases().atlases().is_empty());
    }

    #[test]
    fn unknown_texture_is_rejected() {
        let mut r = renderer(4);
        let err = r
            .new_element(Element {
                texture: Some(FragmentId(99)),
                ..at_z(0)
            })
            .unwrap_err();
        assert!(err.is_usage());
        assert!(r.scene().is_empty());
    }

    #[test]
    fn render_draws_each_group() {
        let mut r = renderer(4);
        r.new_element(at_z(0)).unwrap();
        r.new_element(at_z(1)).unwrap();
        r.render().unwrap();
        let draws = r.backend().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].slots, 0..2);
    }
}
