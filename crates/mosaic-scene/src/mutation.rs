use std::collections::VecDeque;

use mosaic_core::{AttributeValue, ElementAttribute, ElementId, MosaicError, Result};

/// One recorded attribute change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub element: ElementId,
    pub attribute: ElementAttribute,
    pub previous: AttributeValue,
    pub value: AttributeValue,
}

/// Identifies the current subscriber of a [`MutationQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

/// Single-subscriber queue of element mutations.
///
/// Records live in an arena addressed by index; drained slots go back on a
/// freelist. After a drain the arena keeps at most
/// `ceil(oversize_factor * element_count)` slots.
#[derive(Debug)]
pub struct MutationQueue {
    arena: Vec<Option<Mutation>>,
    free: Vec<usize>,
    pending: VecDeque<usize>,
    subscriber: Option<u64>,
    generation: u64,
    oversize_factor: f32,
}

impl MutationQueue {
    pub fn new(oversize_factor: f32) -> Result<Self> {
        if !(oversize_factor >= 0.0) {
            return Err(MosaicError::Config(format!(
                "mutation oversize factor {oversize_factor} must not be negative"
            )));
        }
        Ok(Self {
            arena: Vec::new(),
            free: Vec::new(),
            pending: VecDeque::new(),
            subscriber: None,
            generation: 0,
            oversize_factor,
        })
    }

    /// Replace the subscriber. Records obtained for the previous one are
    /// discarded.
    pub fn subscribe(&mut self, element_count: usize) -> SubscriptionToken {
        if !self.pending.is_empty() {
            log::debug!("discarding {} mutations of the previous subscriber", self.pending.len());
        }
        self.pending.clear();
        self.recycle(element_count);
        self.generation += 1;
        self.subscriber = Some(self.generation);
        SubscriptionToken(self.generation)
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_some()
    }

    /// Record `mutation`. Dropped when nobody is subscribed.
    pub fn push(&mut self, mutation: Mutation) {
        if self.subscriber.is_none() {
            return;
        }
        let idx = match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Some(mutation);
                idx
            }
            None => {
                self.arena.push(Some(mutation));
                self.arena.len() - 1
            }
        };
        self.pending.push_back(idx);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Free slots kept for reuse.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Hand over every pending record in recording order.
    pub fn drain(
        &mut self,
        token: SubscriptionToken,
        element_count: usize,
    ) -> Result<Vec<Mutation>> {
        if self.subscriber != Some(token.0) {
            return Err(MosaicError::Usage(format!("{token:?} is no longer subscribed")));
        }
        let out: Vec<Mutation> = self
            .pending
            .drain(..)
            .filter_map(|idx| self.arena[idx].take())
            .collect();
        self.recycle(element_count);
        Ok(out)
    }

    fn retain_limit(&self, element_count: usize) -> usize {
        (self.oversize_factor as f64 * element_count as f64).ceil() as usize
    }

    // Only valid with nothing pending.
    fn recycle(&mut self, element_count: usize) {
        let limit = self.retain_limit(element_count);
        self.arena.truncate(limit);
        self.arena.fill(None);
        self.free.clear();
        self.free.extend((0..self.arena.len()).rev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(id: u32, z: i32) -> Mutation {
        Mutation {
            element: ElementId(id),
            attribute: ElementAttribute::ZIndex,
            previous: AttributeValue::Int(0),
            value: AttributeValue::Int(z),
        }
    }

    #[test]
    fn drains_in_order_exactly_once() {
        let mut queue = MutationQueue::new(1.5).unwrap();
        let token = queue.subscribe(4);
        queue.push(mutation(1, 1));
        queue.push(mutation(2, 2));
        queue.push(mutation(1, 3));
        let drained = queue.drain(token, 4).unwrap();
        assert_eq!(drained, vec![mutation(1, 1), mutation(2, 2), mutation(1, 3)]);
        assert!(queue.drain(token, 4).unwrap().is_empty());
    }

    #[test]
    fn push_without_subscriber_is_dropped() {
        let mut queue = MutationQueue::new(1.0).unwrap();
        queue.push(mutation(1, 1));
        assert_eq!(queue.pending(), 0);
        assert!(!queue.has_subscriber());
    }

    #[test]
    fn resubscribing_discards_outstanding_records() {
        let mut queue = MutationQueue::new(1.0).unwrap();
        let old = queue.subscribe(2);
        queue.push(mutation(1, 1));
        let new = queue.subscribe(2);
        assert_eq!(queue.pending(), 0);
        assert!(queue.drain(old, 2).unwrap_err().is_usage());
        assert!(queue.drain(new, 2).unwrap().is_empty());
    }

    #[test]
    fn pool_is_capped_by_element_count() {
        let mut queue = MutationQueue::new(1.5).unwrap();
        let token = queue.subscribe(0);
        for i in 0..10 {
            queue.push(mutation(i, i as i32));
        }
        queue.drain(token, 2).unwrap();
        assert_eq!(queue.pooled(), 3);

        for i in 0..2 {
            queue.push(mutation(i, 0));
        }
        assert_eq!(queue.pooled(), 1);
        queue.drain(token, 100).unwrap();
        assert_eq!(queue.pooled(), 3);
    }

    #[test]
    fn negative_factor_is_config_error() {
        assert!(matches!(MutationQueue::new(-0.5), Err(MosaicError::Config(_))));
        assert!(MutationQueue::new(f32::NAN).is_err());
    }
}
