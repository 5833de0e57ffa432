//! Host-facing control surface.
//!
//! Every call returns immediately; seeks and stream selection complete on the
//! engine threads and report back through the [`MessageReceiver`].

use std::sync::{Arc, PoisonError};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use anyhow::{Result, bail};
use avsync_types::{EndReason, EngineStatus, MediaType, PropertyId, PropertyValue};

use crate::config::EngineConfig;
use crate::message::{self, MessageReceiver};
use crate::read_thread;
use crate::refresh;
use crate::state::{Collaborators, Shared, StreamRequest};

pub struct Player {
    shared: Arc<Shared>,
    read: Option<JoinHandle<()>>,
    refresh: Option<JoinHandle<()>>,
}

impl Player {
    pub fn new(config: EngineConfig, collab: Collaborators) -> (Self, MessageReceiver) {
        let (notifier, rx) = message::channel();
        let shared = Arc::new(Shared::new(config, notifier, collab));
        let player = Self {
            shared,
            read: None,
            refresh: None,
        };
        (player, rx)
    }

    /// Opens `uri` asynchronously; `Prepared` or `Error` follows on the channel.
    pub fn prepare(&mut self, uri: &str) -> Result<()> {
        if self.read.is_some() {
            bail!("a source is already prepared; stop it first");
        }
        tracing::info!(uri, "prepare");
        self.shared.reset_for_prepare(uri);

        let shared = self.shared.clone();
        self.refresh = Some(thread::spawn(move || refresh::run(shared)));
        let shared = self.shared.clone();
        let uri = uri.to_string();
        self.read = Some(thread::spawn(move || read_thread::run(shared, uri)));
        Ok(())
    }

    pub fn start(&self) {
        tracing::debug!("start");
        let mut st = self.shared.play();
        self.shared.toggle_pause(&mut st, false);
        drop(st);
        self.shared.wake_reader();
    }

    pub fn pause(&self) {
        tracing::debug!("pause");
        let mut st = self.shared.play();
        self.shared.toggle_pause(&mut st, true);
    }

    /// Aborts every thread and waits for them: demux (which joins the decoders),
    /// then the refresh loop.
    pub fn stop(&mut self) {
        if self.read.is_none() && self.refresh.is_none() {
            return;
        }
        tracing::info!("stop");
        self.shared.abort_all();
        if let Some(handle) = self.read.take() {
            if handle.join().is_err() {
                tracing::error!("read thread panicked");
            }
        }
        if let Some(handle) = self.refresh.take() {
            if handle.join().is_err() {
                tracing::error!("refresh thread panicked");
            }
        }
        let mut reason = self
            .shared
            .end_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reason.get_or_insert(EndReason::Stopped);
    }

    /// Seeks to `ms` from the start; ignored while another seek is pending.
    pub fn seek_to(&self, ms: i64) {
        if !self.shared.seek_to_ms(ms) {
            tracing::debug!(ms, "seek not armed");
        }
    }

    pub fn step_to_next_frame(&self) {
        let mut st = self.shared.play();
        self.shared.step_to_next_frame(&mut st);
    }

    /// Number of times to play the source; 0 loops forever.
    pub fn set_loop(&self, count: u32) {
        self.shared.set_loop_count(count);
    }

    pub fn set_playback_rate(&self, rate: f32) {
        tracing::info!(rate, "playback rate");
        self.shared.set_playback_rate(rate);
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume);
    }

    /// Opens or closes stream `idx`; `StreamChanged` follows on the channel.
    pub fn select_stream(&self, idx: usize, selected: bool) -> Result<()> {
        let kind = self.shared.media().streams.get(idx).map(|s| s.media_type);
        match kind {
            None => bail!("no stream {idx}"),
            Some(None) => bail!("stream {idx} carries no playable media"),
            Some(Some(_)) => {}
        }
        let req = if selected {
            StreamRequest::Open(idx)
        } else {
            StreamRequest::Close(idx)
        };
        tracing::info!(?req, "stream selection");
        self.shared.request_stream(req);
        Ok(())
    }

    pub fn get_property(&self, id: PropertyId) -> PropertyValue {
        let s = &*self.shared;
        let stream = |kind: MediaType| {
            PropertyValue::Int(s.stream_slot(kind).get().map_or(-1, |idx| idx as i64))
        };
        match id {
            PropertyId::AudioCachedDurationMs => {
                PropertyValue::Int(s.track_cache(MediaType::Audio).duration_ms)
            }
            PropertyId::VideoCachedDurationMs => {
                PropertyValue::Int(s.track_cache(MediaType::Video).duration_ms)
            }
            PropertyId::AudioCachedBytes => {
                PropertyValue::Int(s.track_cache(MediaType::Audio).bytes as i64)
            }
            PropertyId::VideoCachedBytes => {
                PropertyValue::Int(s.track_cache(MediaType::Video).bytes as i64)
            }
            PropertyId::AudioCachedPackets => {
                PropertyValue::Int(s.track_cache(MediaType::Audio).packets as i64)
            }
            PropertyId::VideoCachedPackets => {
                PropertyValue::Int(s.track_cache(MediaType::Video).packets as i64)
            }
            PropertyId::PlayableDurationMs => {
                PropertyValue::Int(s.stats.playable_duration_ms.load(Ordering::Relaxed))
            }
            PropertyId::BitRate => PropertyValue::Int(s.media().bit_rate as i64),
            PropertyId::FrameDropsEarly => {
                PropertyValue::Int(s.stats.frame_drops_early.load(Ordering::Relaxed) as i64)
            }
            PropertyId::FrameDropsLate => {
                PropertyValue::Int(s.stats.frame_drops_late.load(Ordering::Relaxed) as i64)
            }
            PropertyId::AvDiffMs => PropertyValue::Int(s.stats.av_diff_ms().unwrap_or(0)),
            PropertyId::MaxBufferSize => PropertyValue::Int(s.max_buffer_size() as i64),
            PropertyId::AccurateSeekTimeoutMs => {
                PropertyValue::Int(s.accurate_seek_timeout().as_millis() as i64)
            }
            PropertyId::PlaybackRate => PropertyValue::Float(f64::from(s.playback_rate())),
            PropertyId::Volume => PropertyValue::Float(f64::from(s.volume())),
            PropertyId::SelectedAudioStream => stream(MediaType::Audio),
            PropertyId::SelectedVideoStream => stream(MediaType::Video),
            PropertyId::SelectedSubtitleStream => stream(MediaType::Subtitle),
        }
    }

    pub fn set_property(&self, id: PropertyId, value: PropertyValue) -> Result<()> {
        match id {
            PropertyId::MaxBufferSize => {
                self.shared
                    .set_max_buffer_size(value.as_i64().max(0) as usize);
            }
            PropertyId::AccurateSeekTimeoutMs => {
                self.shared
                    .set_accurate_seek_timeout(value.as_i64().max(0) as u64);
            }
            PropertyId::PlaybackRate => self.set_playback_rate(value.as_f64() as f32),
            PropertyId::Volume => self.set_volume(value.as_f64() as f32),
            other => bail!("property {other:?} is read-only"),
        }
        Ok(())
    }

    pub fn current_position_ms(&self) -> i64 {
        self.shared.current_position_ms()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.shared.duration_ms()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.snapshot()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
