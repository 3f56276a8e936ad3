//! Transfer rate estimation from device-reported percentages.

use std::time::Duration;

use tokio::time::Instant;

struct RateSample {
    progress: f32,
    timestamp: Instant,
}

/// Estimates progress rate (percent per second) over a sliding window.
pub struct ProgressRate {
    samples: Vec<RateSample>,
    max_samples: usize,
    window_size: Duration,
}

impl ProgressRate {
    /// Creates a new estimator.
    ///
    /// - `window_size`: time window for rate calculation (default 10 s).
    /// - `max_samples`: maximum retained samples (default 50).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: Vec::new(),
            max_samples: max_samples.unwrap_or(50).max(2),
            window_size: window_size.unwrap_or(Duration::from_secs(10)),
        }
    }

    /// Records the progress observed now.
    pub fn add_sample(&mut self, progress: f32) {
        let now = Instant::now();
        self.samples.push(RateSample {
            progress,
            timestamp: now,
        });

        let window = self.window_size;
        self.samples
            .retain(|sample| now.duration_since(sample.timestamp) <= window);

        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Average rate in percent per second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn percent_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let delta = (last.progress - first.progress).max(0.0) as f64;
        delta / elapsed.as_secs_f64()
    }

    /// Estimated time until 100% from `current` progress.
    ///
    /// Returns `None` while the rate is zero.
    pub fn eta(&self, current: f32) -> Option<Duration> {
        let rate = self.percent_per_second();
        if rate <= 0.0 {
            return None;
        }
        let remaining = (100.0 - current.clamp(0.0, 100.0)) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for ProgressRate {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn no_samples() {
        let rate = ProgressRate::default();
        assert_eq!(rate.percent_per_second(), 0.0);
        assert!(rate.eta(10.0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_rate_and_eta() {
        let mut rate = ProgressRate::default();
        rate.add_sample(10.0);
        tokio::time::advance(Duration::from_secs(2)).await;
        rate.add_sample(30.0);

        assert!((rate.percent_per_second() - 10.0).abs() < 1e-6);
        let eta = rate.eta(30.0).unwrap();
        assert_eq!(eta.as_secs(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn old_samples_leave_window() {
        let mut rate = ProgressRate::new(Some(Duration::from_secs(5)), None);
        rate.add_sample(0.0);
        tokio::time::advance(Duration::from_secs(10)).await;
        rate.add_sample(50.0);
        // Only the latest sample is left.
        assert_eq!(rate.percent_per_second(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_samples_bound() {
        let mut rate = ProgressRate::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            rate.add_sample(i as f32);
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(rate.samples.len() <= 5);
        rate.reset();
        assert_eq!(rate.percent_per_second(), 0.0);
    }
}
