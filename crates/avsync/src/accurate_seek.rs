//! Cross-stream accurate-seek coordination.
//!
//! After a seek lands on the nearest keyframe, the audio and video decode threads
//! discard frames until they reach the requested position, then wait for each other
//! so both resume from the same point. State lives under one mutex with one condvar
//! per stream. Every wait is bounded by a deadline fixed when the seek is armed, and a
//! completion is posted exactly once per armed seek.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use avsync_types::{MediaType, Message};

use crate::message::Notifier;

/// Decision for one decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// Per-stream drop bookkeeping, owned by the decode thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropTracker {
    generation: u64,
    drops: u32,
}

impl DropTracker {
    pub fn drops(&self) -> u32 {
        self.drops
    }
}

/// Tolerances applied by [`AccurateSeek::filter`].
#[derive(Clone, Copy, Debug)]
pub struct FilterParams {
    pub max_deviation_us: i64,
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
    Landed,
    Timeout,
    MissingTimestamp,
    PastVideo,
}

#[derive(Debug, Default)]
struct SeekSync {
    seek_pos_us: i64,
    audio_req: bool,
    video_req: bool,
    audio_open: bool,
    video_open: bool,
    /// First drop of the current generation.
    drop_start: Option<Instant>,
    deadline: Option<Instant>,
    video_pts_us: Option<i64>,
    audio_pts_us: Option<i64>,
    generation: u64,
    completed_generation: u64,
    aborted: bool,
}

impl SeekSync {
    fn requested(&self, kind: MediaType) -> bool {
        match kind {
            MediaType::Audio => self.audio_req,
            MediaType::Video => self.video_req,
            MediaType::Subtitle => false,
        }
    }

    fn set_requested(&mut self, kind: MediaType, on: bool) {
        match kind {
            MediaType::Audio => self.audio_req = on,
            MediaType::Video => self.video_req = on,
            MediaType::Subtitle => {}
        }
    }
}

fn peer(kind: MediaType) -> MediaType {
    match kind {
        MediaType::Audio => MediaType::Video,
        _ => MediaType::Audio,
    }
}

#[derive(Debug, Default)]
pub struct AccurateSeek {
    state: Mutex<SeekSync>,
    audio_cond: Condvar,
    video_cond: Condvar,
}

impl AccurateSeek {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SeekSync> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cond(&self, kind: MediaType) -> &Condvar {
        match kind {
            MediaType::Audio => &self.audio_cond,
            _ => &self.video_cond,
        }
    }

    /// Starts a protocol run for the streams open at seek time.
    pub fn arm(&self, seek_pos_us: i64, audio: bool, video: bool, timeout: Duration) {
        let mut st = self.lock();
        st.generation += 1;
        st.seek_pos_us = seek_pos_us;
        st.audio_req = audio;
        st.video_req = video;
        st.audio_open = audio;
        st.video_open = video;
        st.drop_start = None;
        st.deadline = Some(Instant::now() + timeout);
        st.video_pts_us = None;
        st.audio_pts_us = None;
        st.aborted = false;
        tracing::info!(
            seek_pos_us,
            audio,
            video,
            generation = st.generation,
            "accurate seek armed"
        );
        self.audio_cond.notify_all();
        self.video_cond.notify_all();
    }

    /// Clears both requests and wakes both sides; used on stop.
    pub fn cancel(&self) {
        let mut st = self.lock();
        st.aborted = true;
        st.audio_req = false;
        st.video_req = false;
        self.audio_cond.notify_all();
        self.video_cond.notify_all();
    }

    /// Allows new protocol runs after [`AccurateSeek::cancel`].
    pub fn reset(&self) {
        let mut st = self.lock();
        st.aborted = false;
        st.audio_req = false;
        st.video_req = false;
    }

    pub fn is_requested(&self, kind: MediaType) -> bool {
        self.lock().requested(kind)
    }

    /// Called when a stream closes mid-protocol so its peer never waits on it.
    pub fn withdraw(&self, kind: MediaType) {
        let mut st = self.lock();
        st.set_requested(kind, false);
        match kind {
            MediaType::Audio => st.audio_open = false,
            MediaType::Video => st.video_open = false,
            MediaType::Subtitle => {}
        }
        self.cond(peer(kind)).notify_all();
    }

    /// Classifies a decoded frame whose timestamp is `ts_us` (frame end for audio).
    pub fn filter(
        &self,
        kind: MediaType,
        ts_us: Option<i64>,
        tracker: &mut DropTracker,
        params: FilterParams,
        notifier: &Notifier,
    ) -> Verdict {
        let mut st = self.lock();
        if st.aborted || !st.requested(kind) {
            return Verdict::Keep;
        }
        let generation = st.generation;
        let now = Instant::now();

        let Some(ts) = ts_us else {
            return self.resolve(st, kind, None, Resolution::MissingTimestamp, notifier);
        };
        match kind {
            MediaType::Video => st.video_pts_us = Some(ts),
            _ => st.audio_pts_us = Some(ts),
        }

        let deviation = st.seek_pos_us - ts;
        if deviation <= params.max_deviation_us {
            tracing::info!(
                stream = kind.as_str(),
                drops = tracker.drops,
                ts_us = ts,
                seek_pos_us = st.seek_pos_us,
                "accurate seek landed"
            );
            tracker.drops = 0;
            return self.resolve(st, kind, Some(ts), Resolution::Landed, notifier);
        }

        if tracker.generation != generation {
            tracker.generation = generation;
            tracker.drops = 0;
            if st.drop_start.is_none() {
                st.drop_start = Some(now);
            }
            tracing::debug!(stream = kind.as_str(), deviation, "accurate seek dropping");
        }
        tracker.drops += 1;

        let audio_past_video = kind == MediaType::Audio
            && st.video_open
            && !st.video_req
            && st.video_pts_us.is_some_and(|v| ts > v);
        if audio_past_video {
            return self.resolve(st, kind, Some(ts), Resolution::PastVideo, notifier);
        }

        let start = st.drop_start.unwrap_or(now);
        if now.duration_since(start) <= params.timeout {
            return Verdict::Drop;
        }
        self.resolve(st, kind, Some(ts), Resolution::Timeout, notifier)
    }

    fn resolve(
        &self,
        mut st: MutexGuard<'_, SeekSync>,
        kind: MediaType,
        ts_us: Option<i64>,
        resolution: Resolution,
        notifier: &Notifier,
    ) -> Verdict {
        let generation = st.generation;
        let other = peer(kind);
        if resolution != Resolution::Landed {
            tracing::warn!(stream = kind.as_str(), ?resolution, "accurate seek fell back");
        }

        st.set_requested(kind, false);
        self.cond(other).notify_all();

        let deadline = st.deadline.unwrap_or_else(Instant::now);
        while st.requested(other) && !st.aborted && st.generation == generation {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    stream = other.as_str(),
                    "accurate seek peer missed the deadline"
                );
                st.set_requested(other, false);
                break;
            }
            st = self
                .cond(kind)
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        if st.aborted {
            return Verdict::Keep;
        }
        if st.generation != generation {
            // A newer seek was armed while waiting; this frame predates it.
            st.set_requested(kind, true);
            return Verdict::Drop;
        }
        if st.completed_generation != generation {
            st.completed_generation = generation;
            st.drop_start = None;
            let position_ms = ts_us.unwrap_or(st.seek_pos_us) / 1000;
            tracing::info!(position_ms, "accurate seek complete");
            notifier.post(Message::AccurateSeekComplete { position_ms });
        }
        Verdict::Keep
    }
}
