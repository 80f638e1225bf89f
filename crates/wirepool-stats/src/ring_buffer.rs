//! Fixed-capacity circular sample buffer.
//!
//! Once the buffer is full every push overwrites the oldest sample, so the
//! buffer always holds the most recent `capacity` values in insertion order.

use std::cmp::Ordering;

use crate::error::StatsError;

/// A fixed-capacity circular buffer.
///
/// Writes are O(1). Reads that need ordering (percentiles) operate on a
/// sorted copy of the current contents and never mutate the buffer.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Backing storage. Grows up to `capacity` and is then reused in place.
    slots: Vec<T>,
    /// Index of the oldest sample once the buffer has wrapped.
    head: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, StatsError> {
        if capacity == 0 {
            return Err(StatsError::ZeroCapacity);
        }

        Ok(Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        })
    }

    /// Append a sample, overwriting the oldest one when full.
    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Number of samples currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the next push will overwrite a sample.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Maximum number of samples the buffer retains.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every sample, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Oldest sample, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.slots.get(self.head)
    }

    /// Newest sample, without removing it.
    #[must_use]
    pub fn peek_last(&self) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }
        if self.is_full() {
            let newest = (self.head + self.capacity - 1) % self.capacity;
            self.slots.get(newest)
        } else {
            self.slots.last()
        }
    }

    /// Iterate from the oldest sample to the newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy the contents into a vector, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Clone + PartialOrd> RingBuffer<T> {
    /// Return the sample at quantile `p` (in `[0.0, 1.0]`).
    ///
    /// The contents are sorted ascending and the element at index
    /// `floor(len * p)` is returned, clamped to the last index. Returns `None`
    /// when the buffer is empty or `p` is outside the valid range.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<T> {
        if self.slots.is_empty() || !(0.0..=1.0).contains(&p) {
            return None;
        }

        let mut sorted = self.slots.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let len = sorted.len();
        let index = ((len as f64 * p).floor() as usize).min(len - 1);
        sorted.into_iter().nth(index)
    }
}

impl<T: Copy + Into<f64>> RingBuffer<T> {
    /// Arithmetic mean of the current contents, `None` when empty.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        if self.slots.is_empty() {
            return None;
        }
        let sum: f64 = self.slots.iter().map(|&v| v.into()).sum();
        Some(sum / self.slots.len() as f64)
    }
}
