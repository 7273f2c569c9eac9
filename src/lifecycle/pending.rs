//! Game-thread to render-thread handoff queue.
//!
//! Mutations originating on the game thread (an entity entering a render list,
//! a light being removed from an environment) are pushed here instead of being
//! applied to GPU-facing state. The render thread drains the queue once per
//! frame.
//!
//! Additions and removals share a single log and are applied in the order they
//! were enqueued. An add followed by a remove of the same item within one
//! window leaves it removed; a remove followed by an add leaves it present.

use parking_lot::Mutex;

/// One queued change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp<T> {
    Add(T),
    Remove(T),
}

/// Thread-safe ordered queue of additions and removals.
#[derive(Debug)]
pub struct PendingQueue<T> {
    ops: Mutex<Vec<PendingOp<T>>>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn push_add(&self, item: T) {
        self.ops.lock().push(PendingOp::Add(item));
    }

    pub fn push_remove(&self, item: T) {
        self.ops.lock().push(PendingOp::Remove(item));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Take every queued change, oldest first.
    pub fn drain(&self) -> Vec<PendingOp<T>> {
        std::mem::take(&mut *self.ops.lock())
    }
}

impl<T: PartialEq> PendingQueue<T> {
    /// Drain the queue into `items`, keeping it free of duplicates.
    ///
    /// Returns the number of changes that altered `items`.
    pub fn apply(&self, items: &mut Vec<T>) -> usize {
        crate::assert_render_thread!();
        let mut changed = 0;
        for op in self.drain() {
            match op {
                PendingOp::Add(item) => {
                    if !items.contains(&item) {
                        items.push(item);
                        changed += 1;
                    }
                }
                PendingOp::Remove(item) => {
                    if let Some(pos) = items.iter().position(|i| *i == item) {
                        items.remove(pos);
                        changed += 1;
                    }
                }
            }
        }
        changed
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_remove_leaves_removed() {
        let queue = PendingQueue::new();
        let mut items = Vec::new();
        queue.push_add(7u32);
        queue.push_remove(7u32);
        queue.apply(&mut items);
        assert!(items.is_empty());
    }

    #[test]
    fn test_remove_then_add_leaves_present() {
        let queue = PendingQueue::new();
        let mut items = vec![7u32];
        queue.push_remove(7);
        queue.push_add(7);
        assert_eq!(queue.apply(&mut items), 2);
        assert_eq!(items, vec![7]);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = PendingQueue::new();
        queue.push_add("a");
        queue.push_add("b");
        let ops = queue.drain();
        assert_eq!(ops, vec![PendingOp::Add("a"), PendingOp::Add("b")]);
        assert!(queue.is_empty());
    }
}
