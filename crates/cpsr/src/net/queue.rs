use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Multi-producer queue drained by the simulation thread once per outer tick.
///
/// Network tasks push as records arrive; `drain` hands back everything in
/// arrival order and leaves the queue empty.
#[derive(Debug)]
pub struct Inbox<T> {
    items: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for Inbox<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Inbox<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
