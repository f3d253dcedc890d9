//! Playback queue
//!
//! FIFO of [`PlayableItem`]s shared between whoever enqueues (CLI, resolver
//! callbacks) and the engine worker that dequeues.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::models::PlayableItem;

#[derive(Debug, Default)]
pub struct Queue {
    items: Mutex<VecDeque<PlayableItem>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, item: PlayableItem) {
        self.items.lock().push_back(item);
    }

    /// Remove and return the oldest item
    pub fn dequeue_front(&self) -> Option<PlayableItem> {
        self.items.lock().pop_front()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Copy of the pending items, in play order
    pub fn peek_all(&self) -> Vec<PlayableItem> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.items.lock().iter().map(|item| item.title()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
