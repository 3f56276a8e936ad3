use aurora_protocol::types::{ImuSample, LidarScan};

/// A sample carrying a device timestamp that strictly increases with
/// production order.
pub trait Timestamped {
    fn timestamp(&self) -> u64;
}

impl Timestamped for ImuSample {
    fn timestamp(&self) -> u64 {
        self.timestamp_ns
    }
}

impl Timestamped for LidarScan {
    fn timestamp(&self) -> u64 {
        self.timestamp_ns
    }
}

/// Newest timestamp emitted so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    last_seen: u64,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(last_seen: u64) -> Self {
        Self { last_seen }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Keeps the samples newer than the watermark, in timestamp order, and
    /// raises the watermark to the newest one kept. Repeated timestamps
    /// within the batch are emitted once.
    pub fn filter<T: Timestamped>(&mut self, mut batch: Vec<T>) -> Vec<T> {
        batch.sort_by_key(Timestamped::timestamp);
        let mut fresh = Vec::with_capacity(batch.len());
        for sample in batch {
            let ts = sample.timestamp();
            if ts > self.last_seen {
                self.last_seen = ts;
                fresh.push(sample);
            }
        }
        fresh
    }

    /// True when some sample in `batch` was already covered, i.e. the peek
    /// overlapped the previous one.
    pub fn overlaps<T: Timestamped>(&self, batch: &[T]) -> bool {
        batch.iter().any(|s| s.timestamp() <= self.last_seen)
    }

    pub fn reset(&mut self) {
        self.last_seen = 0;
    }
}
