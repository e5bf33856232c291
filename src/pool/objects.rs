//! Free lists of recyclable objects.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use super::Recycle;

/// A soft-capped free list. Items are cleaned on release; releases beyond
/// `max_idle` are dropped.
pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    max_idle: usize,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Recycle> ObjectPool<T> {
    pub fn new(max_idle: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
            factory: Box::new(factory),
        }
    }

    /// Take a clean item, creating one if the list is empty.
    pub fn acquire(&self) -> T {
        let reused = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        reused.unwrap_or_else(|| (self.factory)())
    }

    /// Clean `item` and keep it for reuse if there is room.
    pub fn release(&self, mut item: T) {
        item.clean();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(item);
        }
    }

    /// Items waiting on the free list.
    pub fn idle_count(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}
