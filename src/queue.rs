//! Priority-ordered pending queue.
//!
//! Higher priority dequeues first; items of equal priority keep their
//! arrival order.  Insertion walks past every entry whose priority is
//! greater than or equal to the new item's and links it there, so the
//! pop order is always a stable sort of the push order by descending
//! priority.
//!
//! ```text
//!  push(p=0)  push(p=1)  push(p=-1)  push(p=1)
//!
//!  head ─▶ [1]a ─▶ [1]b ─▶ [0] ─▶ [-1] ─▶ tail
//! ```

use std::collections::VecDeque;

/// Anything that can sit in a [`PriorityQueue`].
pub trait Prioritized {
    fn priority(&self) -> i32;
}

impl<T: Prioritized + ?Sized> Prioritized for Box<T> {
    fn priority(&self) -> i32 {
        (**self).priority()
    }
}

/// Stable descending-priority queue.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` after the last entry with priority >= its own.
    pub fn push(&mut self, item: T) {
        let priority = item.priority();
        let index = self
            .items
            .iter()
            .position(|queued| queued.priority() < priority)
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
    }

    /// Remove and return the highest-priority item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Remove every item, highest priority first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}
