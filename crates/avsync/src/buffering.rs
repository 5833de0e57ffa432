//! Cache-fill measurement and the adaptive high-water mark.
//!
//! The controller is pure bookkeeping; the engine feeds it queue levels and decides
//! what to post. Time-based fill wins whenever a valid cached duration exists,
//! otherwise the byte fill is used.

use crate::config::EngineConfig;

/// Cache level of one open stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamLevel {
    /// Cached duration, `None` when the stream time base is unusable.
    pub duration_ms: Option<i64>,
    pub bytes: usize,
    pub packets: usize,
    pub aborted: bool,
}

/// Levels of the audio and video queues; `None` for a stream that is not open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheLevels {
    pub audio: Option<StreamLevel>,
    pub video: Option<StreamLevel>,
}

impl CacheLevels {
    /// Stream whose emptiness starts buffering: audio if present, else video.
    pub fn indicator(&self) -> Option<StreamLevel> {
        self.audio.or(self.video)
    }
}

/// Result of one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillReport {
    /// Fill against the current high-water mark, -1 when nothing is measurable.
    pub percent: i32,
    /// Cached duration used for the time fill.
    pub cached_ms: Option<i64>,
    /// At or above 100%.
    pub full: bool,
}

#[derive(Clone, Debug)]
pub struct BufferingController {
    first_ms: i64,
    next_ms: i64,
    last_ms: i64,
    current_ms: i64,
    hwm_bytes: usize,
}

/// `value * 1005 / (base * 10)` rounded, so 99.5% already reads as 100.
fn fill_percent(value: i64, base: i64) -> i32 {
    if base <= 0 {
        return -1;
    }
    let num = i128::from(value) * 1005;
    let den = i128::from(base) * 10;
    ((num + den / 2) / den).clamp(0, i128::from(i32::MAX)) as i32
}

impl BufferingController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            first_ms: config.first_high_water_mark_ms,
            next_ms: config.next_high_water_mark_ms,
            last_ms: config.last_high_water_mark_ms,
            current_ms: config.first_high_water_mark_ms,
            hwm_bytes: config.high_water_mark_bytes,
        }
    }

    pub fn current_ms(&self) -> i64 {
        self.current_ms
    }

    /// Back to the fast first mark (open, seek, first frame pending).
    pub fn reset_to_first(&mut self) {
        self.current_ms = self.first_ms;
    }

    pub fn measure(&self, levels: &CacheLevels) -> FillReport {
        let mut time_percent = None;
        let mut cached_ms = None;
        if self.current_ms > 0 {
            let audio = levels.audio.and_then(|l| l.duration_ms).filter(|d| *d > 0);
            let video = levels.video.and_then(|l| l.duration_ms).filter(|d| *d > 0);
            let cached = match (audio, video) {
                (Some(a), Some(v)) => Some(a.min(v)),
                (a, v) => a.or(v),
            };
            if let Some(cached) = cached {
                cached_ms = Some(cached);
                time_percent = Some(fill_percent(cached, self.current_ms));
            }
        }

        let size_percent = (self.hwm_bytes > 0).then(|| {
            let bytes = levels.audio.map_or(0, |l| l.bytes) + levels.video.map_or(0, |l| l.bytes);
            fill_percent(bytes as i64, self.hwm_bytes as i64)
        });

        let full = match time_percent {
            Some(p) => p >= 100,
            None => size_percent.is_some_and(|p| p >= 100),
        };
        let percent = match (time_percent, size_percent) {
            (Some(t), Some(s)) => t.min(s),
            (Some(t), None) => t,
            (None, Some(s)) => s,
            (None, None) => -1,
        };
        FillReport {
            percent,
            cached_ms,
            full,
        }
    }

    /// Raises the mark after a rebuffer: to `next` first, then doubling, capped at `last`.
    pub fn escalate(&mut self) -> i64 {
        let mut hwm = if self.current_ms < self.next_ms {
            self.next_ms
        } else {
            self.current_ms.saturating_mul(2)
        };
        if hwm > self.last_ms {
            hwm = self.last_ms;
        }
        self.current_ms = hwm;
        tracing::debug!(hwm_ms = hwm, "buffering high water mark raised");
        hwm
    }

    /// Whether buffering may end: the indicator holds data and every open stream has
    /// at least `min_packets` (or is aborted).
    pub fn can_end(levels: &CacheLevels, min_packets: usize) -> bool {
        let Some(indicator) = levels.indicator() else {
            return false;
        };
        if indicator.packets == 0 {
            return false;
        }
        let ready = |level: Option<StreamLevel>| {
            level.is_none_or(|l| l.packets >= min_packets || l.aborted)
        };
        ready(levels.audio) && ready(levels.video)
    }
}
