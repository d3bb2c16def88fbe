/// Integer pixel rectangle inside an atlas canvas.
///
/// Compared by value. A rectangle produced by the allocator always has a
/// non-zero width and height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in pixels.
    pub fn size(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width >= width && self.height >= height
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(Rect::new(x, y, right - x, bottom - y))
    }

    /// Parts of `self` not covered by `other`, as up to four disjoint pieces:
    /// a full-width top band, a full-width bottom band, then left and right
    /// pieces of the middle band.
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let Some(cut) = self.intersection(other) else {
            return vec![*self];
        };
        let mut pieces = Vec::with_capacity(4);
        if cut.y > self.y {
            pieces.push(Rect::new(self.x, self.y, self.width, cut.y - self.y));
        }
        if cut.bottom() < self.bottom() {
            pieces.push(Rect::new(
                self.x,
                cut.bottom(),
                self.width,
                self.bottom() - cut.bottom(),
            ));
        }
        if cut.x > self.x {
            pieces.push(Rect::new(self.x, cut.y, cut.x - self.x, cut.height));
        }
        if cut.right() < self.right() {
            pieces.push(Rect::new(
                cut.right(),
                cut.y,
                self.right() - cut.right(),
                cut.height,
            ));
        }
        pieces
    }

    /// True when both rectangles touch along an edge segment of positive
    /// length. Corner contact does not count.
    pub fn shares_edge_with(&self, other: &Rect) -> bool {
        let vertical_overlap =
            self.y.max(other.y) < self.bottom().min(other.bottom());
        let horizontal_overlap =
            self.x.max(other.x) < self.right().min(other.right());
        (vertical_overlap && (self.right() == other.x || other.right() == self.x))
            || (horizontal_overlap && (self.bottom() == other.y || other.bottom() == self.y))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EdgeOrientation {
    Left,
    Top,
    Right,
    Bottom,
}

/// One side of a rectangle. `position` is the x (Left/Right) or y
/// (Top/Bottom) coordinate of the line, `start`/`length` its extent along it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Edge {
    pub orientation: EdgeOrientation,
    pub position: u32,
    pub start: u32,
    pub length: u32,
}

impl Edge {
    pub fn of(rect: &Rect, orientation: EdgeOrientation) -> Self {
        match orientation {
            EdgeOrientation::Left => Edge {
                orientation,
                position: rect.x,
                start: rect.y,
                length: rect.height,
            },
            EdgeOrientation::Right => Edge {
                orientation,
                position: rect.right(),
                start: rect.y,
                length: rect.height,
            },
            EdgeOrientation::Top => Edge {
                orientation,
                position: rect.y,
                start: rect.x,
                length: rect.width,
            },
            EdgeOrientation::Bottom => Edge {
                orientation,
                position: rect.bottom(),
                start: rect.x,
                length: rect.width,
            },
        }
    }

    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    /// Whether two parallel edges on the same line overlap or touch, so that
    /// together they form one contiguous run.
    pub fn continues(&self, other: &Edge) -> bool {
        self.orientation == other.orientation
            && self.position == other.position
            && self.start <= other.end()
            && other.start <= self.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(rects: &[Rect]) -> u64 {
        rects.iter().map(Rect::size).sum()
    }

    #[test]
    fn subtract_disjoint_returns_self() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 5, 5);
        assert_eq!(a.subtract(&b), vec![a]);
    }

    #[test]
    fn subtract_center_leaves_four_pieces() {
        let a = Rect::new(0, 0, 10, 10);
        let hole = Rect::new(3, 3, 4, 4);
        let pieces = a.subtract(&hole);
        assert_eq!(pieces.len(), 4);
        assert_eq!(area(&pieces), 100 - 16);
        for (i, p) in pieces.iter().enumerate() {
            assert!(!p.intersects(&hole));
            for q in &pieces[i + 1..] {
                assert!(!p.intersects(q));
            }
        }
    }

    #[test]
    fn subtract_covering_rect_is_empty() {
        let a = Rect::new(4, 4, 2, 2);
        assert!(a.subtract(&Rect::new(0, 0, 8, 8)).is_empty());
    }

    #[test]
    fn corner_contact_is_not_an_edge() {
        let a = Rect::new(0, 0, 4, 4);
        assert!(!a.shares_edge_with(&Rect::new(4, 4, 4, 4)));
        assert!(a.shares_edge_with(&Rect::new(4, 2, 4, 4)));
        assert!(a.shares_edge_with(&Rect::new(1, 4, 1, 1)));
    }

    #[test]
    fn edges_form_runs() {
        let a = Edge::of(&Rect::new(0, 0, 4, 4), EdgeOrientation::Bottom);
        let b = Edge::of(&Rect::new(4, 0, 4, 4), EdgeOrientation::Bottom);
        let c = Edge::of(&Rect::new(4, 0, 4, 2), EdgeOrientation::Bottom);
        assert!(a.continues(&b));
        assert!(!a.continues(&c));
    }
}
