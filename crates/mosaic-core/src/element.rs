use std::collections::HashMap;

use crate::error::{MosaicError, Result};
use crate::fragment::FragmentId;
use crate::rect::Rect;

/// Handle of a draw element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// An optionally textured rectangle.
///
/// `texture_rect` selects the sampled part of the fragment in fragment
/// pixels; an empty rectangle samples the whole fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub color: [u8; 4],
    pub texture: Option<FragmentId>,
    pub texture_rect: Rect,
    pub z_index: i32,
}

impl Default for Element {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            color: [255, 255, 255, 255],
            texture: None,
            texture_rect: Rect::default(),
            z_index: 0,
        }
    }
}

/// Element properties that can be observed changing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementAttribute {
    X,
    Y,
    Width,
    Height,
    Red,
    Green,
    Blue,
    Alpha,
    Texture,
    TextureX,
    TextureY,
    TextureWidth,
    TextureHeight,
    ZIndex,
}

impl ElementAttribute {
    pub const ALL: [ElementAttribute; 14] = [
        ElementAttribute::X,
        ElementAttribute::Y,
        ElementAttribute::Width,
        ElementAttribute::Height,
        ElementAttribute::Red,
        ElementAttribute::Green,
        ElementAttribute::Blue,
        ElementAttribute::Alpha,
        ElementAttribute::Texture,
        ElementAttribute::TextureX,
        ElementAttribute::TextureY,
        ElementAttribute::TextureWidth,
        ElementAttribute::TextureHeight,
        ElementAttribute::ZIndex,
    ];

    /// Changing this attribute may move the element between slots.
    pub fn affects_order(self) -> bool {
        self == ElementAttribute::ZIndex
    }

    /// Changing this attribute may change the atlases a batch needs.
    pub fn affects_grouping(self) -> bool {
        self == ElementAttribute::Texture
    }
}

/// Value of one [`ElementAttribute`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    Int(i32),
    Size(u32),
    Channel(u8),
    Texture(Option<FragmentId>),
}

impl Element {
    pub fn get(&self, attribute: ElementAttribute) -> AttributeValue {
        use ElementAttribute::*;
        match attribute {
            X => AttributeValue::Int(self.x),
            Y => AttributeValue::Int(self.y),
            Width => AttributeValue::Size(self.width),
            Height => AttributeValue::Size(self.height),
            Red => AttributeValue::Channel(self.color[0]),
            Green => AttributeValue::Channel(self.color[1]),
            Blue => AttributeValue::Channel(self.color[2]),
            Alpha => AttributeValue::Channel(self.color[3]),
            Texture => AttributeValue::Texture(self.texture),
            TextureX => AttributeValue::Size(self.texture_rect.x),
            TextureY => AttributeValue::Size(self.texture_rect.y),
            TextureWidth => AttributeValue::Size(self.texture_rect.width),
            TextureHeight => AttributeValue::Size(self.texture_rect.height),
            ZIndex => AttributeValue::Int(self.z_index),
        }
    }

    /// Assign `value` and return the previous value. A value of the wrong
    /// kind for `attribute` is a usage error.
    pub fn set(
        &mut self,
        attribute: ElementAttribute,
        value: AttributeValue,
    ) -> Result<AttributeValue> {
        use ElementAttribute::*;
        let previous = self.get(attribute);
        match (attribute, value) {
            (X, AttributeValue::Int(v)) => self.x = v,
            (Y, AttributeValue::Int(v)) => self.y = v,
            (ZIndex, AttributeValue::Int(v)) => self.z_index = v,
            (Width, AttributeValue::Size(v)) => self.width = v,
            (Height, AttributeValue::Size(v)) => self.height = v,
            (TextureX, AttributeValue::Size(v)) => self.texture_rect.x = v,
            (TextureY, AttributeValue::Size(v)) => self.texture_rect.y = v,
            (TextureWidth, AttributeValue::Size(v)) => self.texture_rect.width = v,
            (TextureHeight, AttributeValue::Size(v)) => self.texture_rect.height = v,
            (Red, AttributeValue::Channel(v)) => self.color[0] = v,
            (Green, AttributeValue::Channel(v)) => self.color[1] = v,
            (Blue, AttributeValue::Channel(v)) => self.color[2] = v,
            (Alpha, AttributeValue::Channel(v)) => self.color[3] = v,
            (Texture, AttributeValue::Texture(v)) => self.texture = v,
            (attribute, value) => {
                return Err(MosaicError::Usage(format!(
                    "{value:?} is not a valid value for {attribute:?}"
                )));
            }
        }
        Ok(previous)
    }
}

/// Resolves element ids for the batcher.
pub trait ElementLookup {
    fn element(&self, id: ElementId) -> Option<&Element>;
}

impl ElementLookup for HashMap<ElementId, Element> {
    fn element(&self, id: ElementId) -> Option<&Element> {
        self.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_returns_previous_value() {
        let mut el = Element::default();
        let prev = el.set(ElementAttribute::ZIndex, AttributeValue::Int(7)).unwrap();
        assert_eq!(prev, AttributeValue::Int(0));
        assert_eq!(el.z_index, 7);
        let prev = el.set(ElementAttribute::Alpha, AttributeValue::Channel(10)).unwrap();
        assert_eq!(prev, AttributeValue::Channel(255));
    }

    #[test]
    fn mismatched_value_kind_is_rejected() {
        let mut el = Element::default();
        let err = el
            .set(ElementAttribute::Width, AttributeValue::Int(-3))
            .unwrap_err();
        assert!(err.is_usage());
        assert_eq!(el.width, 0);
    }

    #[test]
    fn get_covers_every_attribute() {
        let el = Element::default();
        for attr in ElementAttribute::ALL {
            let mut copy = el.clone();
            assert_eq!(copy.set(attr, el.get(attr)).unwrap(), el.get(attr));
            assert_eq!(copy, el);
        }
    }
}
