use log::debug;

use crate::error::{MosaicError, Result};
use crate::rect::{Edge, EdgeOrientation, Rect};

/// Free-space bookkeeping for one atlas canvas.
///
/// The free set is a list of disjoint rectangles whose union is the canvas
/// minus every reserved rectangle. Iteration order is insertion order, which
/// keeps best-fit tie breaking deterministic.
#[derive(Debug, Clone)]
pub struct FreeSpaceAllocator {
    width: u32,
    height: u32,
    free: Vec<Rect>,
    allocated: Vec<Rect>,
}

impl FreeSpaceAllocator {
    /// Both dimensions must be powers of two.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if !width.is_power_of_two() || !height.is_power_of_two() {
            return Err(MosaicError::Config(format!(
                "canvas size {width}x{height} is not a power of two"
            )));
        }
        Ok(Self {
            width,
            height,
            free: vec![Rect::new(0, 0, width, height)],
            allocated: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn free_rectangles(&self) -> &[Rect] {
        &self.free
    }

    pub fn allocated_rectangles(&self) -> &[Rect] {
        &self.allocated
    }

    pub fn free_area(&self) -> u64 {
        self.free.iter().map(Rect::size).sum()
    }

    /// No reservation is outstanding.
    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Index of the free rectangle with the smallest size difference to the
    /// request. First match wins on ties.
    fn best_fit(&self, width: u32, height: u32) -> Option<(usize, u64)> {
        let requested = width as u64 * height as u64;
        let mut best: Option<(usize, u64)> = None;
        for (idx, free) in self.free.iter().enumerate() {
            if !free.fits(width, height) {
                continue;
            }
            let waste = free.size().abs_diff(requested);
            if best.is_none_or(|(_, w)| waste < w) {
                best = Some((idx, waste));
                if waste == 0 {
                    break;
                }
            }
        }
        best
    }

    /// Reserve a `width`x`height` rectangle. `Ok(None)` when nothing fits.
    pub fn reserve(&mut self, width: u32, height: u32) -> Result<Option<Rect>> {
        if width == 0 || height == 0 {
            return Err(MosaicError::Usage(format!(
                "cannot reserve a zero-sized rectangle ({width}x{height})"
            )));
        }
        let Some((idx, _)) = self.best_fit(width, height) else {
            return Ok(None);
        };
        let free = self.free.remove(idx);
        let placed = Rect::new(free.x, free.y, width, height);

        let right_w = free.width - width;
        let bottom_h = free.height - height;
        if right_w > 0 {
            self.free.push(Rect::new(placed.right(), free.y, right_w, height));
        }
        if bottom_h > 0 {
            self.free.push(Rect::new(free.x, placed.bottom(), width, bottom_h));
        }
        if right_w > 0 && bottom_h > 0 {
            self.free
                .push(Rect::new(placed.right(), placed.bottom(), right_w, bottom_h));
        }
        self.allocated.push(placed);
        debug!("reserved {placed:?} from {free:?}");
        Ok(Some(placed))
    }

    /// Return a previously reserved rectangle and coalesce it with its free
    /// neighbours.
    pub fn release(&mut self, rect: Rect) -> Result<()> {
        if rect.is_empty() {
            return Err(MosaicError::Usage(format!(
                "cannot release a zero-sized rectangle {rect:?}"
            )));
        }
        let Some(pos) = self.allocated.iter().position(|r| *r == rect) else {
            return Err(MosaicError::Usage(format!(
                "rectangle {rect:?} is not reserved in this canvas"
            )));
        };
        self.allocated.remove(pos);

        if self.allocated.is_empty() {
            self.free.clear();
            self.free.push(self.canvas());
            return Ok(());
        }

        self.free.push(rect);
        self.coalesce(rect);
        Ok(())
    }

    /// Grow `current` (a member of the free set) into the largest rectangle
    /// covered by itself and its edge neighbours, clipping the neighbours
    /// around it. Repeats until the merged rectangle stops growing.
    fn coalesce(&mut self, mut current: Rect) {
        loop {
            let neighbours: Vec<Rect> = self
                .free
                .iter()
                .copied()
                .filter(|r| *r != current && r.shares_edge_with(&current))
                .collect();
            if neighbours.is_empty() {
                return;
            }

            let mut members = Vec::with_capacity(neighbours.len() + 1);
            members.push(current);
            members.extend_from_slice(&neighbours);

            let merged = largest_covered(&current, &members);
            if merged == current {
                return;
            }

            self.free.retain(|r| !members.contains(r));
            for member in &members {
                self.free.extend(member.subtract(&merged));
            }
            self.free.push(merged);
            debug!("coalesced {current:?} into {merged:?}");
            current = merged;
        }
    }

    /// Rebuild the free set as horizontal bands, merging bands with identical
    /// horizontal spans. Reservations stay where they are.
    pub fn defragment(&mut self) {
        let mut ys: Vec<u32> = vec![0, self.height];
        for r in &self.allocated {
            ys.push(r.y);
            ys.push(r.bottom());
        }
        ys.sort_unstable();
        ys.dedup();

        let mut rebuilt: Vec<Rect> = Vec::new();
        // Rectangles from the previous band that may still grow downwards.
        let mut open: Vec<Rect> = Vec::new();
        for band in ys.windows(2) {
            let (y0, y1) = (band[0], band[1]);
            let mut blocked: Vec<(u32, u32)> = self
                .allocated
                .iter()
                .filter(|r| r.y < y1 && r.bottom() > y0)
                .map(|r| (r.x, r.right()))
                .collect();
            blocked.sort_unstable();

            let mut spans = Vec::new();
            let mut cursor = 0;
            for (x0, x1) in blocked {
                if x0 > cursor {
                    spans.push((cursor, x0));
                }
                cursor = cursor.max(x1);
            }
            if cursor < self.width {
                spans.push((cursor, self.width));
            }

            let mut next_open = Vec::with_capacity(spans.len());
            for (x0, x1) in spans {
                let grown = open
                    .iter()
                    .position(|r: &Rect| r.x == x0 && r.right() == x1 && r.bottom() == y0);
                match grown {
                    Some(idx) => {
                        let mut r = open.swap_remove(idx);
                        r.height += y1 - y0;
                        next_open.push(r);
                    }
                    None => next_open.push(Rect::new(x0, y0, x1 - x0, y1 - y0)),
                }
            }
            rebuilt.append(&mut open);
            open = next_open;
        }
        rebuilt.append(&mut open);
        rebuilt.sort_by_key(|r| (r.y, r.x));
        debug!(
            "defragmented free set: {} -> {} rectangles",
            self.free.len(),
            rebuilt.len()
        );
        self.free = rebuilt;
    }

    /// `1 - largest free rectangle / canvas area`. A heuristic, not the exact
    /// occupied share.
    pub fn occupancy_ratio(&self) -> f32 {
        let largest = self.free.iter().map(Rect::size).max().unwrap_or(0);
        let canvas = self.canvas().size();
        1.0 - (largest as f64 / canvas as f64) as f32
    }

    /// Waste of the best-fit candidate relative to the request, or a negative
    /// value when nothing fits.
    pub fn best_fit_waste_ratio(&self, width: u32, height: u32) -> f32 {
        if width == 0 || height == 0 {
            return -1.0;
        }
        match self.best_fit(width, height) {
            Some((_, waste)) => (waste as f64 / (width as f64 * height as f64)) as f32,
            None => -1.0,
        }
    }
}

/// Candidate boundaries for one side: positions of the contiguous edge runs
/// of `members` in `orientation` that lie outside `current` on that side.
fn run_positions(current: &Rect, members: &[Rect], orientation: EdgeOrientation) -> Vec<u32> {
    let mut edges: Vec<Edge> = members.iter().map(|m| Edge::of(m, orientation)).collect();
    edges.sort_by_key(|e| (e.position, e.start));

    let mut runs: Vec<Edge> = Vec::new();
    for edge in edges {
        match runs.last_mut() {
            Some(run) if run.continues(&edge) => {
                let end = run.end().max(edge.end());
                run.length = end - run.start;
            }
            _ => runs.push(edge),
        }
    }

    let mut positions: Vec<u32> = runs
        .iter()
        .map(|r| r.position)
        .filter(|p| match orientation {
            EdgeOrientation::Left => *p <= current.x,
            EdgeOrientation::Top => *p <= current.y,
            EdgeOrientation::Right => *p >= current.right(),
            EdgeOrientation::Bottom => *p >= current.bottom(),
        })
        .collect();
    positions.dedup();
    positions
}

/// Largest rectangle containing `current` that is fully covered by the
/// (disjoint) `members`. Ties prefer the origin closest to the canvas origin.
fn largest_covered(current: &Rect, members: &[Rect]) -> Rect {
    let lefts = run_positions(current, members, EdgeOrientation::Left);
    let tops = run_positions(current, members, EdgeOrientation::Top);
    let rights = run_positions(current, members, EdgeOrientation::Right);
    let bottoms = run_positions(current, members, EdgeOrientation::Bottom);

    let mut best = *current;
    for &y0 in &tops {
        for &x0 in &lefts {
            for &x1 in &rights {
                for &y1 in &bottoms {
                    let candidate = Rect::new(x0, y0, x1 - x0, y1 - y0);
                    let better = candidate.size() > best.size()
                        || (candidate.size() == best.size()
                            && (candidate.y, candidate.x) < (best.y, best.x));
                    if !better {
                        continue;
                    }
                    let covered: u64 = members
                        .iter()
                        .filter_map(|m| m.intersection(&candidate))
                        .map(|r| r.size())
                        .sum();
                    if covered == candidate.size() {
                        best = candidate;
                    }
                }
            }
        }
    }
    best
}
