use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use avsync_types::TrackCache;

use crate::media::{Rational, rescale};
use crate::packet_queue::QueueStats;

/// Events-per-second estimate over a sliding window of timestamps.
#[derive(Debug)]
pub struct RateSampler {
    stamps: VecDeque<Instant>,
    capacity: usize,
}

impl Default for RateSampler {
    fn default() -> Self {
        Self::new(120)
    }
}

impl RateSampler {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Records an event at `now` and returns the current rate.
    pub fn add(&mut self, now: Instant) -> f64 {
        if self.stamps.len() == self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
        self.rate()
    }

    pub fn rate(&self) -> f64 {
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else {
            return 0.0;
        };
        let span = last.duration_since(*first);
        if span < Duration::from_millis(1) {
            return 0.0;
        }
        (self.stamps.len() - 1) as f64 / span.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.stamps.clear();
    }
}

/// Counters updated by the decode and presentation threads.
#[derive(Debug, Default)]
pub struct Statistics {
    /// Frames dropped by the video decode thread before queueing.
    pub frame_drops_early: AtomicU64,
    /// Frames skipped by the refresh loop.
    pub frame_drops_late: AtomicU64,
    /// Playable position (current + cached) in milliseconds, -1 when unknown.
    pub playable_duration_ms: AtomicI64,
    /// Video minus master clock in microseconds, `i64::MIN` when unknown.
    pub av_diff_us: AtomicI64,
    decode_rate: Mutex<RateSampler>,
    display_rate: Mutex<RateSampler>,
}

impl Statistics {
    pub fn new() -> Self {
        let stats = Self::default();
        stats.playable_duration_ms.store(-1, Ordering::Relaxed);
        stats.av_diff_us.store(i64::MIN, Ordering::Relaxed);
        stats
    }

    pub fn frame_decoded(&self) {
        self.decode_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(Instant::now());
    }

    pub fn frame_displayed(&self) {
        self.display_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(Instant::now());
    }

    pub fn decode_fps(&self) -> f64 {
        self.decode_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate()
    }

    pub fn display_fps(&self) -> f64 {
        self.display_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate()
    }

    pub fn av_diff_ms(&self) -> Option<i64> {
        match self.av_diff_us.load(Ordering::Relaxed) {
            i64::MIN => None,
            us => Some(us / 1000),
        }
    }

    /// Clear per-source counters when a new source is prepared.
    pub fn clear(&self) {
        self.frame_drops_early.store(0, Ordering::Relaxed);
        self.frame_drops_late.store(0, Ordering::Relaxed);
        self.playable_duration_ms.store(-1, Ordering::Relaxed);
        self.av_diff_us.store(i64::MIN, Ordering::Relaxed);
        self.decode_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.display_rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

/// Cache occupancy of a queue whose packets use `time_base`.
pub fn track_cache(stats: QueueStats, time_base: Rational) -> TrackCache {
    let duration_ms = if time_base.num > 0 && time_base.den > 0 {
        rescale(stats.duration, time_base, Rational::new(1, 1000))
    } else {
        0
    };
    TrackCache {
        bytes: stats.bytes as u64,
        packets: stats.packets as u64,
        duration_ms,
    }
}
