use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) const DEFAULT_CAPACITY: usize = 10_000;

/// Shared ring of recent entries. Once `capacity` is reached the oldest entry is
/// evicted and counted.
#[derive(Debug)]
pub(crate) struct EventBuffer<T> {
    entries: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl<T> Clone for EventBuffer<T> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone(), capacity: self.capacity, evicted: self.evicted.clone() }
    }
}

impl<T: Clone> EventBuffer<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn push(&self, entry: T) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return everything buffered.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
