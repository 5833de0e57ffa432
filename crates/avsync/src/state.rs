//! Engine context shared by reference with every worker thread.
//!
//! Locking rules:
//! - `play` serialises pause/step/buffering transitions
//! - `seek` guards the pending seek request and pairs with `continue_read`
//! - the accurate-seek mutex lives in [`AccurateSeek`]
//! - `buffering` may be held while taking `play`, never the other way round
//! - no two of these are held across a blocking wait

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use avsync_types::{EndReason, EngineStatus, MediaType, Message, SyncType, TrackCache};

use crate::accurate_seek::{AccurateSeek, FilterParams};
use crate::audio_render::RenderState;
use crate::buffering::{BufferingController, CacheLevels, StreamLevel};
use crate::clock::{Clock, wall_time};
use crate::codec::CodecFactory;
use crate::config::EngineConfig;
use crate::decoder::{DecoderStatus, PumpHooks};
use crate::frame_queue::FrameQueue;
use crate::media::{AudioBuffer, Rational, StreamInfo, SubtitleEvent, TIME_BASE_US};
use crate::message::Notifier;
use crate::packet_queue::PacketQueue;
use crate::sink::{AudioOutput, SubtitleSink, VideoSink};
use crate::source::{Interrupt, SourceOpener};
use crate::status::{Statistics, track_cache};
use crate::video_thread::VideoPicture;

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub opener: Arc<dyn SourceOpener>,
    pub codecs: Arc<dyn CodecFactory>,
    pub video_sink: Arc<dyn VideoSink>,
    pub audio_output: Arc<dyn AudioOutput>,
    pub subtitle_sink: Option<Arc<dyn SubtitleSink>>,
}

/// Pause, step, and buffering flags guarded by the play mutex.
#[derive(Debug, Default)]
pub struct PlayState {
    /// Effective pause state of clocks and output.
    pub paused: bool,
    /// Pause requested by the host.
    pub pause_req: bool,
    pub buffering_on: bool,
    /// Current buffering episode was triggered by a seek.
    pub seek_buffering: bool,
    /// Display exactly one frame, then pause again.
    pub step: bool,
    /// Show the first frame after a seek even while paused.
    pub step_on_seeking: bool,
    /// Host wants playback running once buffering ends.
    pub auto_resume: bool,
    /// Wall time at which the last shown frame was due.
    pub frame_timer: f64,
}

/// Pending seek request, guarded by the seek mutex.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeekRequest {
    /// Target in microseconds (or bytes).
    pub pos: i64,
    /// Signed distance from the position at request time.
    pub rel: i64,
    pub by_bytes: bool,
    pub requested_at: Option<Instant>,
}

/// Index of an open stream, lock-free.
#[derive(Debug)]
pub struct StreamSlot(AtomicUsize);

impl Default for StreamSlot {
    fn default() -> Self {
        Self(AtomicUsize::new(usize::MAX))
    }
}

impl StreamSlot {
    pub fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::Acquire) {
            usize::MAX => None,
            idx => Some(idx),
        }
    }

    pub fn set(&self, idx: Option<usize>) {
        self.0.store(idx.unwrap_or(usize::MAX), Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.get().is_some()
    }
}

/// Asynchronous stream selection handled by the read thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRequest {
    Open(usize),
    Close(usize),
}

/// Source level facts filled in by the read thread.
#[derive(Clone, Debug, Default)]
pub struct MediaInfo {
    pub uri: Option<String>,
    pub format: String,
    pub duration_us: Option<i64>,
    pub start_time_us: Option<i64>,
    pub bit_rate: u64,
    pub realtime: bool,
    /// Longest plausible gap between two video frames, seconds.
    pub max_frame_duration: f64,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn time_base(&self, idx: Option<usize>) -> Option<Rational> {
        idx.and_then(|i| self.streams.get(i)).map(|s| s.time_base)
    }
}

/// One-shot notification latches.
#[derive(Debug, Default)]
pub struct Milestones {
    pub first_video_frame_rendered: AtomicBool,
    pub first_audio_frame_rendered: AtomicBool,
    /// Post the after-seek notification on the next decoded video frame.
    pub after_seek_frame: AtomicBool,
    /// Audio serial whose first rendered sample posts the seek rendering notification.
    pub audio_seek_serial: AtomicU64,
    pub seek_started: Mutex<Option<Instant>>,
}

impl Milestones {
    pub fn clear(&self) {
        self.first_video_frame_rendered.store(false, Ordering::Release);
        self.first_audio_frame_rendered.store(false, Ordering::Release);
        self.after_seek_frame.store(false, Ordering::Release);
        self.audio_seek_serial.store(0, Ordering::Release);
        *self.seek_started.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn elapsed_since_seek_ms(&self) -> i64 {
        self.seek_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(0, |t| t.elapsed().as_millis() as i64)
    }
}

pub struct Shared {
    pub config: EngineConfig,
    pub notifier: Notifier,
    pub collab: Collaborators,

    pub audioq: Arc<PacketQueue>,
    pub videoq: Arc<PacketQueue>,
    pub subtitleq: Arc<PacketQueue>,
    pub pictq: FrameQueue<VideoPicture>,
    pub sampq: FrameQueue<AudioBuffer>,
    pub subpq: FrameQueue<SubtitleEvent>,

    pub audclk: Clock,
    pub vidclk: Clock,
    pub extclk: Clock,

    pub auddec: Arc<DecoderStatus>,
    pub viddec: Arc<DecoderStatus>,
    pub subdec: Arc<DecoderStatus>,

    pub audio_stream: StreamSlot,
    pub video_stream: StreamSlot,
    pub subtitle_stream: StreamSlot,
    pub stream_requests: Mutex<Vec<StreamRequest>>,

    pub play: Mutex<PlayState>,
    /// Signalled when `PlayState::pause_req` changes and on abort.
    pub play_cond: Condvar,
    pub seek: Mutex<SeekRequest>,
    /// Wakes the read thread: new seek, queue drained, abort.
    pub continue_read: Condvar,
    seek_req: AtomicBool,
    /// Target of the last serviced seek in microseconds.
    pub seek_pos_us: AtomicI64,
    pub accurate: AccurateSeek,
    pub buffering: Mutex<BufferingController>,
    pub media: Mutex<MediaInfo>,
    pub stats: Statistics,
    pub render: Mutex<RenderState>,
    pub milestones: Milestones,

    /// Lock-free mirrors of `PlayState::paused` and `PlayState::step` for the
    /// audio callback, which must not take the play mutex.
    pub paused_flag: AtomicBool,
    pub step_flag: AtomicBool,
    pub abort: AtomicBool,
    pub eof: AtomicBool,
    pub force_refresh: AtomicBool,
    pub interrupt: Interrupt,
    deferred_error: AtomicI32,
    pub end_reason: Mutex<Option<EndReason>>,

    volume: AtomicU32,
    playback_rate: AtomicU32,
    loop_count: AtomicU32,
    max_buffer_size: AtomicUsize,
    accurate_seek_timeout_ms: AtomicU64,
}

impl Shared {
    pub fn new(config: EngineConfig, notifier: Notifier, collab: Collaborators) -> Self {
        let audioq = Arc::new(PacketQueue::new("audio"));
        let videoq = Arc::new(PacketQueue::new("video"));
        let subtitleq = Arc::new(PacketQueue::new("subtitle"));
        let pictq = FrameQueue::new("picture", videoq.clone(), config.picture_queue_size, true);
        let sampq = FrameQueue::new("sample", audioq.clone(), config.sample_queue_size, true);
        let subpq = FrameQueue::new("subtitle", subtitleq.clone(), config.subtitle_queue_size, false);
        let audclk = Clock::new("audio", Some(audioq.serial_handle()));
        let vidclk = Clock::new("video", Some(videoq.serial_handle()));
        let extclk = Clock::new("external", None);
        let buffering = BufferingController::new(&config);
        Self {
            volume: AtomicU32::new(config.volume.clamp(0.0, 1.0).to_bits()),
            playback_rate: AtomicU32::new(config.playback_rate.to_bits()),
            loop_count: AtomicU32::new(config.loop_count),
            max_buffer_size: AtomicUsize::new(config.max_buffer_size),
            accurate_seek_timeout_ms: AtomicU64::new(config.accurate_seek_timeout_ms.max(0) as u64),
            config,
            notifier,
            collab,
            audioq,
            videoq,
            subtitleq,
            pictq,
            sampq,
            subpq,
            audclk,
            vidclk,
            extclk,
            auddec: Arc::default(),
            viddec: Arc::default(),
            subdec: Arc::default(),
            audio_stream: StreamSlot::default(),
            video_stream: StreamSlot::default(),
            subtitle_stream: StreamSlot::default(),
            stream_requests: Mutex::new(Vec::new()),
            play: Mutex::new(PlayState::default()),
            play_cond: Condvar::new(),
            seek: Mutex::new(SeekRequest::default()),
            continue_read: Condvar::new(),
            seek_req: AtomicBool::new(false),
            seek_pos_us: AtomicI64::new(0),
            accurate: AccurateSeek::new(),
            buffering: Mutex::new(buffering),
            media: Mutex::new(MediaInfo::default()),
            stats: Statistics::new(),
            render: Mutex::new(RenderState::default()),
            milestones: Milestones::default(),
            paused_flag: AtomicBool::new(false),
            step_flag: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            force_refresh: AtomicBool::new(false),
            interrupt: Interrupt::default(),
            deferred_error: AtomicI32::new(0),
            end_reason: Mutex::new(None),
        }
    }

    pub fn play(&self) -> MutexGuard<'_, PlayState> {
        self.play.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn media(&self) -> MutexGuard<'_, MediaInfo> {
        self.media.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn post(&self, msg: Message) {
        self.notifier.post(msg);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn queue(&self, kind: MediaType) -> &Arc<PacketQueue> {
        match kind {
            MediaType::Audio => &self.audioq,
            MediaType::Video => &self.videoq,
            MediaType::Subtitle => &self.subtitleq,
        }
    }

    pub fn stream_slot(&self, kind: MediaType) -> &StreamSlot {
        match kind {
            MediaType::Audio => &self.audio_stream,
            MediaType::Video => &self.video_stream,
            MediaType::Subtitle => &self.subtitle_stream,
        }
    }

    pub fn decoder_status(&self, kind: MediaType) -> &Arc<DecoderStatus> {
        match kind {
            MediaType::Audio => &self.auddec,
            MediaType::Video => &self.viddec,
            MediaType::Subtitle => &self.subdec,
        }
    }

    /// Master clock kind given which streams are open.
    pub fn master_sync_type(&self) -> SyncType {
        match self.config.sync {
            SyncType::VideoMaster if self.video_stream.is_open() => SyncType::VideoMaster,
            SyncType::VideoMaster | SyncType::AudioMaster if self.audio_stream.is_open() => {
                SyncType::AudioMaster
            }
            _ => SyncType::External,
        }
    }

    pub fn clock(&self, sync: SyncType) -> &Clock {
        match sync {
            SyncType::AudioMaster => &self.audclk,
            SyncType::VideoMaster => &self.vidclk,
            SyncType::External => &self.extclk,
        }
    }

    pub fn master_clock(&self) -> Option<f64> {
        self.clock(self.master_sync_type()).get()
    }

    /// Applies `pause_on` to clocks and the output device.
    pub fn stream_toggle_pause(&self, st: &mut PlayState, pause_on: bool) {
        if st.paused && !pause_on {
            st.frame_timer += wall_time() - self.vidclk.last_updated();
            self.vidclk.set(self.vidclk.get(), self.vidclk.serial());
            self.audclk.set(self.audclk.get(), self.audclk.serial());
        }
        self.extclk.set(self.extclk.get(), self.extclk.serial());
        if st.step && (st.pause_req || st.buffering_on) {
            st.paused = pause_on;
            self.vidclk.set_paused(pause_on);
            self.extclk.set_paused(pause_on);
        } else {
            st.paused = pause_on;
            self.audclk.set_paused(pause_on);
            self.vidclk.set_paused(pause_on);
            self.extclk.set_paused(pause_on);
            self.collab.audio_output.pause(pause_on);
        }
        self.publish(st);
        tracing::debug!(paused = pause_on, step = st.step, "pause state applied");
    }

    /// Derives the effective pause state from the request and buffering flags.
    pub fn stream_update_pause(&self, st: &mut PlayState) {
        let pause_on = !st.step && (st.pause_req || st.buffering_on);
        self.stream_toggle_pause(st, pause_on);
    }

    /// Host pause/resume.
    pub fn toggle_pause(&self, st: &mut PlayState, pause_on: bool) {
        if st.step && pause_on {
            return;
        }
        if st.pause_req && !pause_on {
            self.vidclk.set(self.vidclk.get(), self.vidclk.serial());
            self.audclk.set(self.audclk.get(), self.audclk.serial());
        }
        st.pause_req = pause_on;
        st.auto_resume = !pause_on;
        self.stream_update_pause(st);
        st.step = false;
        self.publish(st);
        self.play_cond.notify_all();
    }

    /// Blocks while the host has pause requested; returns early on abort.
    pub fn wait_while_pause_requested(&self) {
        let mut st = self.play();
        while st.pause_req && !self.is_aborted() {
            st = self
                .play_cond
                .wait_timeout(st, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn step_to_next_frame(&self, st: &mut PlayState) {
        st.step = true;
        if st.paused {
            self.stream_toggle_pause(st, false);
        }
        self.publish(st);
    }

    /// Refreshes the lock-free mirrors after `st` changed.
    pub fn publish(&self, st: &PlayState) {
        self.paused_flag.store(st.paused, Ordering::Release);
        self.step_flag.store(st.step, Ordering::Release);
    }

    pub fn toggle_buffering(&self, on: bool) {
        let mut st = self.play();
        self.toggle_buffering_locked(&mut st, on);
    }

    pub fn toggle_buffering_locked(&self, st: &mut PlayState, on: bool) {
        if !self.config.packet_buffering {
            return;
        }
        if on && !st.buffering_on {
            st.buffering_on = true;
            self.stream_update_pause(st);
            let seek = self.seek_pending();
            st.seek_buffering = seek;
            tracing::info!(seek, "buffering start");
            self.post(Message::BufferingStart { seek });
        } else if !on && st.buffering_on {
            st.buffering_on = false;
            self.stream_update_pause(st);
            let seek = std::mem::take(&mut st.seek_buffering);
            tracing::info!(seek, "buffering end");
            self.post(Message::BufferingEnd { seek });
        }
    }

    /// Queues a stream open/close for the read thread.
    pub fn request_stream(&self, req: StreamRequest) {
        self.stream_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(req);
        self.wake_reader();
    }

    pub fn take_stream_requests(&self) -> Vec<StreamRequest> {
        std::mem::take(&mut *self.stream_requests.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_req.load(Ordering::Acquire)
    }

    /// Arms a seek unless one is already pending; returns whether it was armed.
    pub fn request_seek(&self, pos: i64, rel: i64, by_bytes: bool) -> bool {
        let mut req = self.seek.lock().unwrap_or_else(PoisonError::into_inner);
        if self.seek_req.load(Ordering::Acquire) {
            return false;
        }
        *req = SeekRequest {
            pos,
            rel,
            by_bytes,
            requested_at: Some(Instant::now()),
        };
        self.seek_req.store(true, Ordering::Release);
        self.continue_read.notify_all();
        true
    }

    /// Arms a seek to `ms` from the container start; returns whether it was armed.
    ///
    /// With accurate seek on, a target at or past the end completes playback instead.
    pub fn seek_to_ms(&self, ms: i64) -> bool {
        let mut pos = ms_to_us(ms.max(0));
        let (duration_us, start_us) = {
            let media = self.media();
            (media.duration_us, media.start_time_us)
        };
        if self.config.accurate_seek && duration_us.is_some_and(|d| d > 0 && pos >= d) {
            tracing::info!(ms, "seek past the end, completing");
            let mut st = self.play();
            self.toggle_pause(&mut st, true);
            drop(st);
            self.set_end_reason(Some(EndReason::Eof));
            self.post(Message::Completed);
            return false;
        }
        if let Some(start) = start_us.filter(|s| *s > 0) {
            pos += start;
        }
        let armed = self.request_seek(pos, 0, false);
        if armed {
            *self
                .milestones
                .seek_started
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            tracing::debug!(ms, pos, "seek requested");
        }
        armed
    }

    /// Takes the pending seek request, if any.
    pub fn take_seek(&self) -> Option<SeekRequest> {
        let req = self.seek.lock().unwrap_or_else(PoisonError::into_inner);
        self.seek_req.load(Ordering::Acquire).then_some(*req)
    }

    /// Marks the pending seek as serviced.
    pub fn finish_seek(&self) {
        let _req = self.seek.lock().unwrap_or_else(PoisonError::into_inner);
        self.seek_req.store(false, Ordering::Release);
    }

    /// Waits on `continue_read` for at most `timeout`.
    pub fn wait_continue_read(&self, timeout: Duration) {
        let guard = self.seek.lock().unwrap_or_else(PoisonError::into_inner);
        if self.seek_req.load(Ordering::Acquire) || self.is_aborted() {
            return;
        }
        let _ = self
            .continue_read
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn wake_reader(&self) {
        let _guard = self.seek.lock().unwrap_or_else(PoisonError::into_inner);
        self.continue_read.notify_all();
    }

    fn stream_level(&self, kind: MediaType, time_base: Option<Rational>) -> Option<StreamLevel> {
        self.stream_slot(kind).get()?;
        let queue = self.queue(kind);
        let stats = queue.stats();
        let duration_ms = time_base
            .filter(|tb| tb.num > 0 && tb.den > 0)
            .map(|tb| track_cache(stats, tb).duration_ms);
        Some(StreamLevel {
            duration_ms,
            bytes: stats.bytes,
            packets: stats.packets,
            aborted: queue.is_aborted(),
        })
    }

    pub fn cache_levels(&self) -> CacheLevels {
        let (audio_tb, video_tb) = {
            let media = self.media();
            (
                media.time_base(self.audio_stream.get()),
                media.time_base(self.video_stream.get()),
            )
        };
        CacheLevels {
            audio: self.stream_level(MediaType::Audio, audio_tb),
            video: self.stream_level(MediaType::Video, video_tb),
        }
    }

    pub fn track_cache(&self, kind: MediaType) -> TrackCache {
        let tb = self.media().time_base(self.stream_slot(kind).get());
        match tb {
            Some(tb) if self.stream_slot(kind).is_open() => track_cache(self.queue(kind).stats(), tb),
            _ => TrackCache::default(),
        }
    }

    /// Measures cache fill, reports it, and ends buffering once full.
    pub fn check_buffering(&self) {
        let levels = self.cache_levels();
        let mut ctl = self.buffering.lock().unwrap_or_else(PoisonError::into_inner);
        let report = ctl.measure(&levels);
        let position_ms = report.cached_ms.map(|cached| self.current_position_ms() + cached);
        self.stats
            .playable_duration_ms
            .store(position_ms.unwrap_or(-1), Ordering::Relaxed);
        if report.percent != 0 {
            self.post(Message::BufferingUpdate {
                position_ms: position_ms.unwrap_or(-1),
                percent: report.percent,
            });
        }
        if !report.full {
            return;
        }
        let mut st = self.play();
        if !st.buffering_on {
            return;
        }
        if BufferingController::can_end(&levels, self.config.min_min_frames) {
            ctl.escalate();
            self.toggle_buffering_locked(&mut st, false);
        }
    }

    /// Nudges the external clock speed to keep live queues at a steady depth.
    pub fn check_external_clock_speed(&self) {
        let cfg = &self.config;
        let video = self.video_stream.is_open().then(|| self.videoq.len());
        let audio = self.audio_stream.is_open().then(|| self.audioq.len());
        let speed = self.extclk.speed();
        let low = |n: Option<usize>| n.is_some_and(|n| n <= cfg.external_clock_min_frames);
        let high = |n: Option<usize>| n.is_none_or(|n| n > cfg.external_clock_max_frames);
        let rate = f64::from(self.playback_rate());
        if low(video) || low(audio) {
            self.extclk
                .set_speed((speed - cfg.external_clock_speed_step).max(cfg.external_clock_speed_min * rate));
        } else if high(video) && high(audio) {
            self.extclk
                .set_speed((speed + cfg.external_clock_speed_step).min(cfg.external_clock_speed_max * rate));
        } else if speed != rate {
            let step = cfg.external_clock_speed_step * (rate - speed).signum();
            let next = speed + step;
            let next = if (rate - next).signum() != (rate - speed).signum() { rate } else { next };
            self.extclk.set_speed(next);
        }
    }

    /// Playback position in milliseconds relative to the container start.
    pub fn current_position_ms(&self) -> i64 {
        let start_diff = self
            .media()
            .start_time_us
            .filter(|s| *s > 0)
            .map_or(0, |s| s / 1000);
        let pos = if self.seek_pending() {
            self.seek.lock().unwrap_or_else(PoisonError::into_inner).pos / 1000
        } else {
            match self.master_clock() {
                Some(clock) => (clock * 1000.0) as i64,
                None => self.seek_pos_us.load(Ordering::Acquire) / 1000,
            }
        };
        if pos < 0 || pos < start_diff {
            0
        } else {
            pos - start_diff
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.media().duration_us.map(|d| d / 1000)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn playback_rate(&self) -> f32 {
        f32::from_bits(self.playback_rate.load(Ordering::Relaxed))
    }

    /// Stores the rate and rescales every clock.
    pub fn set_playback_rate(&self, rate: f32) {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        self.playback_rate.store(rate.to_bits(), Ordering::Relaxed);
        for clock in [&self.audclk, &self.vidclk, &self.extclk] {
            clock.set_speed(f64::from(rate));
        }
        if !self.collab.audio_output.set_playback_rate(rate) && self.audio_stream.is_open() {
            tracing::warn!(rate, "audio output cannot time-stretch");
        }
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count.load(Ordering::Relaxed)
    }

    pub fn set_loop_count(&self, count: u32) {
        self.loop_count.store(count, Ordering::Relaxed);
    }

    /// Consumes one loop iteration; `true` when playback should wrap around.
    pub fn consume_loop(&self) -> bool {
        self.loop_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 => Some(0),
                1 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }

    pub fn max_buffer_size(&self) -> usize {
        let bit_rate = self.media().bit_rate;
        let cfg = EngineConfig {
            max_buffer_size: self.max_buffer_size.load(Ordering::Relaxed),
            ..self.config.clone()
        };
        cfg.effective_max_buffer_size(bit_rate)
    }

    pub fn set_max_buffer_size(&self, bytes: usize) {
        self.max_buffer_size.store(bytes, Ordering::Relaxed);
        self.wake_reader();
    }

    pub fn accurate_seek_timeout(&self) -> Duration {
        Duration::from_millis(self.accurate_seek_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_accurate_seek_timeout(&self, ms: u64) {
        self.accurate_seek_timeout_ms.store(ms, Ordering::Relaxed);
    }

    pub fn accurate_filter_params(&self) -> FilterParams {
        FilterParams {
            max_deviation_us: self.config.max_deviation_ms * 1000,
            timeout: self.accurate_seek_timeout(),
        }
    }

    /// Whether the demuxer may ignore backpressure.
    pub fn infinite_buffer(&self) -> bool {
        self.config
            .infinite_buffer
            .unwrap_or_else(|| self.media().realtime)
    }

    /// Keeps the first error; it replaces completion once playback drains.
    pub fn record_error(&self, code: i32) {
        let _ = self
            .deferred_error
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn deferred_error(&self) -> Option<i32> {
        match self.deferred_error.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    pub fn set_end_reason(&self, reason: Option<EndReason>) {
        *self.end_reason.lock().unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// Aborts every queue and wakes every waiter.
    pub fn abort_all(&self) {
        self.abort.store(true, Ordering::Release);
        self.interrupt.set();
        for q in [&self.audioq, &self.videoq, &self.subtitleq] {
            q.abort();
        }
        self.pictq.signal();
        self.sampq.signal();
        self.subpq.signal();
        self.accurate.cancel();
        self.wake_reader();
        let _play = self.play();
        self.play_cond.notify_all();
    }

    /// Resets per-source state before a new prepare.
    pub fn reset_for_prepare(&self, uri: &str) {
        self.abort.store(false, Ordering::Release);
        self.interrupt.clear();
        self.eof.store(false, Ordering::Release);
        self.force_refresh.store(false, Ordering::Release);
        self.deferred_error.store(0, Ordering::Release);
        self.seek_req.store(false, Ordering::Release);
        self.seek_pos_us.store(0, Ordering::Release);
        self.accurate.reset();
        self.milestones.clear();
        self.stats.clear();
        self.set_end_reason(None);
        for clock in [&self.audclk, &self.vidclk, &self.extclk] {
            clock.set(None, 0);
            clock.set_paused(false);
        }
        self.take_stream_requests();
        *self.media() = MediaInfo {
            uri: Some(uri.to_string()),
            max_frame_duration: self.config.max_frame_duration,
            ..MediaInfo::default()
        };
        self.buffering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_to_first();
        let mut st = self.play();
        *st = PlayState::default();
        self.publish(&st);
    }

    pub fn snapshot(&self) -> EngineStatus {
        let (paused, buffering) = {
            let st = self.play();
            (st.paused, st.buffering_on)
        };
        let (uri, bit_rate) = {
            let media = self.media();
            (media.uri.clone(), media.bit_rate)
        };
        EngineStatus {
            uri,
            paused,
            buffering,
            position_ms: Some(self.current_position_ms()),
            duration_ms: self.duration_ms(),
            master: self.master_sync_type(),
            audio_stream: self.audio_stream.get(),
            video_stream: self.video_stream.get(),
            subtitle_stream: self.subtitle_stream.get(),
            audio_cache: self.track_cache(MediaType::Audio),
            video_cache: self.track_cache(MediaType::Video),
            bit_rate,
            frame_drops_early: self.stats.frame_drops_early.load(Ordering::Relaxed),
            frame_drops_late: self.stats.frame_drops_late.load(Ordering::Relaxed),
            av_diff_ms: self.stats.av_diff_ms(),
            video_fps: self.stats.display_fps(),
            end_reason: *self.end_reason.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Seek position in microseconds for a millisecond request.
pub fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(TIME_BASE_US / 1000)
}

impl PumpHooks for Shared {
    fn on_starved(&self, queue: &PacketQueue) {
        let indicator = if self.audio_stream.is_open() {
            &self.audioq
        } else {
            &self.videoq
        };
        if std::ptr::eq(queue, indicator.as_ref()) {
            self.toggle_buffering(true);
        }
    }

    fn on_queue_empty(&self) {
        self.wake_reader();
    }

    fn notify(&self, msg: Message) {
        self.post(msg);
    }

    fn record_error(&self, code: i32) {
        Shared::record_error(self, code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Packet, PacketFlags};
    use crate::testing::{SyntheticMedia, VIDEO_STREAM, test_shared};

    fn video_packet(ts: i64, duration: i64) -> Packet {
        Packet {
            stream_index: VIDEO_STREAM,
            pts: Some(ts),
            dts: Some(ts),
            duration,
            pos: -1,
            flags: PacketFlags {
                key: true,
                discontinuity: false,
            },
            data: Arc::from(vec![0u8; 64]),
        }
    }

    fn high_water_mark(shared: &Shared) -> i64 {
        shared
            .buffering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_ms()
    }

    #[test]
    fn high_water_mark_rises_only_when_buffering_ends() {
        let shared = test_shared(None);
        shared.media().streams = SyntheticMedia::default().streams();
        shared.videoq.start();
        shared.video_stream.set(Some(VIDEO_STREAM));
        shared.toggle_buffering(true);
        let first = high_water_mark(&shared);

        // Enough media for the mark but fewer packets than the floor.
        shared.videoq.put(video_packet(0, first * 2));
        shared.check_buffering();
        shared.check_buffering();
        assert!(shared.play().buffering_on);
        assert_eq!(high_water_mark(&shared), first);

        shared.videoq.put(video_packet(first * 2, 40));
        shared.check_buffering();
        assert!(!shared.play().buffering_on);
        let raised = high_water_mark(&shared);
        assert!(raised > first);

        shared.check_buffering();
        assert_eq!(high_water_mark(&shared), raised);
    }

    #[test]
    fn pause_wait_returns_on_resume_and_on_abort() {
        let shared = Arc::new(test_shared(None));
        {
            let mut st = shared.play();
            shared.toggle_pause(&mut st, true);
        }
        let waiter = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                shared.wait_while_pause_requested();
                started.elapsed()
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        {
            let mut st = shared.play();
            shared.toggle_pause(&mut st, false);
        }
        assert!(waiter.join().unwrap() < Duration::from_secs(1));

        {
            let mut st = shared.play();
            shared.toggle_pause(&mut st, true);
        }
        let waiter = {
            let shared = shared.clone();
            std::thread::spawn(move || shared.wait_while_pause_requested())
        };
        std::thread::sleep(Duration::from_millis(30));
        shared.abort_all();
        waiter.join().unwrap();
    }
}
