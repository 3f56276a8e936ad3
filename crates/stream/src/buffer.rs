use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::watermark::Timestamped;

/// Fixed-capacity history of emitted samples, oldest first.
///
/// Once full, every push evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct History<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> History<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `value`, returning the evicted sample when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = T>) {
        for v in values {
            self.push(v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Up to `n` most recent samples, oldest first.
    pub fn latest(&self, n: usize) -> Vec<T> {
        let skip = self.buf.len().saturating_sub(n);
        self.buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<T: Clone + Timestamped> History<T> {
    /// Samples newer than `timestamp`, oldest first.
    pub fn since(&self, timestamp: u64) -> Vec<T> {
        self.buf
            .iter()
            .filter(|s| s.timestamp() > timestamp)
            .cloned()
            .collect()
    }
}

/// History shared between a poller and late readers.
#[derive(Debug)]
pub struct SharedHistory<T> {
    inner: Arc<Mutex<History<T>>>,
}

impl<T> Clone for SharedHistory<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> SharedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(History::new(capacity))),
        }
    }

    /// Runs `f` with the history locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut History<T>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn latest(&self, n: usize) -> Vec<T> {
        self.with(|h| h.latest(n))
    }

    pub fn len(&self) -> usize {
        self.with(|h| h.len())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|h| h.is_empty())
    }
}

impl<T: Clone + Timestamped> SharedHistory<T> {
    pub fn since(&self, timestamp: u64) -> Vec<T> {
        self.with(|h| h.since(timestamp))
    }
}
