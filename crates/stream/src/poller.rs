//! Periodic peek loop feeding deduplicated samples to a channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::StreamError;
use crate::buffer::SharedHistory;
use crate::source::SampleSource;
use crate::watermark::Watermark;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    pub interval: Duration,
    /// Largest batch requested per peek.
    pub max_count: u32,
    pub history_capacity: usize,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_count: 64,
            history_capacity: 1024,
        }
    }
}

impl PollerOptions {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.interval.is_zero() {
            return Err(StreamError::InvalidOptions("interval must be positive".into()));
        }
        if self.max_count == 0 {
            return Err(StreamError::InvalidOptions("max_count must be positive".into()));
        }
        if self.history_capacity == 0 {
            return Err(StreamError::InvalidOptions(
                "history_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Counters describing a poller's run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub polls: u64,
    pub failed_polls: u64,
    /// Samples returned by the device, duplicates included.
    pub received: u64,
    pub emitted: u64,
    /// Polls whose batch shared nothing with what was already emitted.
    pub possible_gaps: u64,
}

/// Peeks a [`SampleSource`] and forwards only samples not seen before.
pub struct SamplePoller<S: SampleSource> {
    source: S,
    options: PollerOptions,
    watermark: Watermark,
    history: SharedHistory<S::Sample>,
    stats: PollerStats,
}

impl<S: SampleSource> SamplePoller<S> {
    pub fn new(source: S, options: PollerOptions) -> Result<Self, StreamError> {
        options.validate()?;
        Ok(Self {
            source,
            options,
            watermark: Watermark::new(),
            history: SharedHistory::new(options.history_capacity),
            stats: PollerStats::default(),
        })
    }

    /// Handle to the emitted-sample history; stays valid after the poller
    /// stops.
    pub fn history(&self) -> SharedHistory<S::Sample> {
        self.history.clone()
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
    }

    /// Peeks once and returns the new samples, already recorded in the
    /// history.
    pub async fn poll_once(&mut self) -> Result<Vec<S::Sample>, StreamError> {
        self.stats.polls += 1;
        let batch = match self.source.peek(self.options.max_count).await {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.failed_polls += 1;
                return Err(e.into());
            }
        };
        self.stats.received += batch.len() as u64;

        if self.watermark.last_seen() > 0
            && !batch.is_empty()
            && !self.watermark.overlaps(&batch)
        {
            self.stats.possible_gaps += 1;
            debug!(
                source = self.source.kind(),
                last_seen = self.watermark.last_seen(),
                "peek did not overlap previous batch, samples may have been missed"
            );
        }

        let fresh = self.watermark.filter(batch);
        self.stats.emitted += fresh.len() as u64;
        if !fresh.is_empty() {
            self.history.with(|h| h.extend(fresh.iter().cloned()));
        }
        Ok(fresh)
    }

    /// Polls every interval until `cancel` fires or the receiver is
    /// dropped. Each non-empty batch of new samples is sent as one message.
    ///
    /// Transient device errors are logged and polling continues; any other
    /// device error ends the run.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<Vec<S::Sample>>,
        cancel: CancellationToken,
    ) -> Result<PollerStats, StreamError> {
        info!(
            source = self.source.kind(),
            interval_ms = self.options.interval.as_millis() as u64,
            max_count = self.options.max_count,
            "sample poller started"
        );
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once().await {
                Ok(fresh) if fresh.is_empty() => {}
                Ok(fresh) => {
                    if tx.send(fresh).await.is_err() {
                        debug!(source = self.source.kind(), "sample receiver dropped");
                        break;
                    }
                }
                Err(StreamError::Device(e)) if e.is_transient() => {
                    warn!(source = self.source.kind(), error = %e, "peek failed");
                }
                Err(e) => {
                    error!(source = self.source.kind(), error = %e, "sample poller stopping");
                    return Err(e);
                }
            }
        }

        info!(
            source = self.source.kind(),
            emitted = self.stats.emitted,
            possible_gaps = self.stats.possible_gaps,
            "sample poller stopped"
        );
        Ok(self.stats)
    }
}

impl<S: SampleSource + 'static> SamplePoller<S> {
    /// Runs the poller on its own task.
    pub fn spawn(
        self,
        tx: mpsc::Sender<Vec<S::Sample>>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<PollerStats, StreamError>> {
        tokio::spawn(self.run(tx, cancel))
    }
}
