use std::collections::HashMap;

use mosaic_core::{
    AttributeValue, Element, ElementAttribute, ElementId, ElementLookup, FragmentId, MosaicError,
    Rect, Result,
};

use crate::mutation::{Mutation, MutationQueue, SubscriptionToken};

/// Element store that records every attribute change.
#[derive(Debug)]
pub struct Scene {
    elements: HashMap<ElementId, Element>,
    next_id: u32,
    mutations: MutationQueue,
}

impl Scene {
    pub fn new(mutation_oversize_factor: f32) -> Result<Self> {
        Ok(Self {
            elements: HashMap::new(),
            next_id: 1,
            mutations: MutationQueue::new(mutation_oversize_factor)?,
        })
    }

    pub fn insert(&mut self, element: Element) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.elements.insert(id, element);
        id
    }

    pub fn remove(&mut self, id: ElementId) -> Result<Element> {
        self.elements
            .remove(&id)
            .ok_or_else(|| MosaicError::Usage(format!("unknown element {id:?}")))
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &Element)> {
        self.elements.iter().map(|(id, el)| (*id, el))
    }

    /// Whether any element samples from `texture`.
    pub fn references(&self, texture: FragmentId) -> bool {
        self.elements.values().any(|el| el.texture == Some(texture))
    }

    /// Assign one attribute, recording a mutation if the value changed.
    pub fn set(
        &mut self,
        id: ElementId,
        attribute: ElementAttribute,
        value: AttributeValue,
    ) -> Result<()> {
        let element = self
            .elements
            .get_mut(&id)
            .ok_or_else(|| MosaicError::Usage(format!("unknown element {id:?}")))?;
        let previous = element.set(attribute, value)?;
        if previous != value {
            self.mutations.push(Mutation {
                element: id,
                attribute,
                previous,
                value,
            });
        }
        Ok(())
    }

    /// Assign one attribute without recording a mutation. Used to undo a
    /// change that could not be applied.
    pub(crate) fn revert(
        &mut self,
        id: ElementId,
        attribute: ElementAttribute,
        value: AttributeValue,
    ) -> Result<()> {
        let element = self
            .elements
            .get_mut(&id)
            .ok_or_else(|| MosaicError::Usage(format!("unknown element {id:?}")))?;
        element.set(attribute, value)?;
        Ok(())
    }

    pub fn set_position(&mut self, id: ElementId, x: i32, y: i32) -> Result<()> {
        self.set(id, ElementAttribute::X, AttributeValue::Int(x))?;
        self.set(id, ElementAttribute::Y, AttributeValue::Int(y))
    }

    pub fn set_size(&mut self, id: ElementId, width: u32, height: u32) -> Result<()> {
        self.set(id, ElementAttribute::Width, AttributeValue::Size(width))?;
        self.set(id, ElementAttribute::Height, AttributeValue::Size(height))
    }

    pub fn set_color(&mut self, id: ElementId, color: [u8; 4]) -> Result<()> {
        let channels = [
            ElementAttribute::Red,
            ElementAttribute::Green,
            ElementAttribute::Blue,
            ElementAttribute::Alpha,
        ];
        for (attribute, value) in channels.into_iter().zip(color) {
            self.set(id, attribute, AttributeValue::Channel(value))?;
        }
        Ok(())
    }

    pub fn set_texture(&mut self, id: ElementId, texture: Option<FragmentId>) -> Result<()> {
        self.set(id, ElementAttribute::Texture, AttributeValue::Texture(texture))
    }

    /// Sampled part of the texture; an empty rectangle samples all of it.
    pub fn set_texture_rect(&mut self, id: ElementId, rect: Rect) -> Result<()> {
        self.set(id, ElementAttribute::TextureX, AttributeValue::Size(rect.x))?;
        self.set(id, ElementAttribute::TextureY, AttributeValue::Size(rect.y))?;
        self.set(id, ElementAttribute::TextureWidth, AttributeValue::Size(rect.width))?;
        self.set(id, ElementAttribute::TextureHeight, AttributeValue::Size(rect.height))
    }

    pub fn set_z_index(&mut self, id: ElementId, z_index: i32) -> Result<()> {
        self.set(id, ElementAttribute::ZIndex, AttributeValue::Int(z_index))
    }

    pub fn subscribe(&mut self) -> SubscriptionToken {
        self.mutations.subscribe(self.elements.len())
    }

    pub fn drain_mutations(&mut self, token: SubscriptionToken) -> Result<Vec<Mutation>> {
        self.mutations.drain(token, self.elements.len())
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.pending()
    }
}

impl ElementLookup for Scene {
    fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_record_only_changes() {
        let mut scene = Scene::new(1.5).unwrap();
        let token = scene.subscribe();
        let id = scene.insert(Element::default());

        scene.set_position(id, 0, 5).unwrap();
        scene.set_color(id, [255, 0, 255, 255]).unwrap();
        let drained = scene.drain_mutations(token).unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].attribute, ElementAttribute::Y);
        assert_eq!(drained[0].previous, AttributeValue::Int(0));
        assert_eq!(drained[1].attribute, ElementAttribute::Green);
        assert_eq!(drained[1].value, AttributeValue::Channel(0));
        assert_eq!(scene.get(id).unwrap().color, [255, 0, 255, 255]);
    }

    #[test]
    fn unknown_element_is_usage_error() {
        let mut scene = Scene::new(1.0).unwrap();
        assert!(scene.set_z_index(ElementId(42), 1).unwrap_err().is_usage());
        assert!(scene.remove(ElementId(42)).unwrap_err().is_usage());
    }

    #[test]
    fn revert_records_nothing() {
        let mut scene = Scene::new(1.0).unwrap();
        let token = scene.subscribe();
        let id = scene.insert(Element::default());
        scene
            .revert(id, ElementAttribute::Texture, AttributeValue::Texture(Some(FragmentId(7))))
            .unwrap();
        assert_eq!(scene.get(id).unwrap().texture, Some(FragmentId(7)));
        assert!(scene.drain_mutations(token).unwrap().is_empty());
    }

    #[test]
    fn texture_references_are_tracked() {
        let mut scene = Scene::new(1.0).unwrap();
        let id = scene.insert(Element::default());
        assert!(!scene.references(FragmentId(3)));
        scene.set_texture(id, Some(FragmentId(3))).unwrap();
        assert!(scene.references(FragmentId(3)));
        scene.set_texture_rect(id, Rect::new(1, 2, 3, 4)).unwrap();
        assert_eq!(scene.get(id).unwrap().texture_rect, Rect::new(1, 2, 3, 4));
    }
}
