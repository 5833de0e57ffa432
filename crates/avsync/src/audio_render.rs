//! Pull-side audio path driven by the platform audio callback.
//!
//! [`AudioRenderer::render`] never blocks on a queue: when no current sample frame is
//! ready it writes silence. After filling the device buffer it derives the audio
//! clock from the end of the buffered frame minus what the device has not played yet.

use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard, PoisonError};

use avsync_types::{MediaType, Message, SyncType, warning_code};

use crate::clock::wall_time;
use crate::media::AudioBuffer;
use crate::sink::AudioParams;
use crate::state::Shared;

/// Sample frames of silence written when nothing is decodable.
const SILENCE_FRAMES: usize = 256;

/// How long audio may wait for the first video frame before starting anyway.
const AV_START_WAIT: f64 = 2.0;

#[derive(Debug, Default)]
struct CurrentBuffer {
    /// `None` for a silence block.
    samples: Option<Arc<[f32]>>,
    len: usize,
    index: usize,
}

impl CurrentBuffer {
    fn remaining(&self) -> usize {
        self.len - self.index
    }

    fn exhausted(&self) -> bool {
        self.index >= self.len
    }
}

/// Render-side state, shared with the refresh thread for step-mode fast forward.
#[derive(Debug, Default)]
pub struct RenderState {
    params: Option<AudioParams>,
    buf: CurrentBuffer,
    /// End time of the current buffer in seconds.
    audio_clock: Option<f64>,
    audio_clock_serial: u64,
    callback_time: f64,
    av_start_wait: Option<f64>,
}

impl RenderState {
    pub fn set_params(&mut self, params: AudioParams) {
        self.params = Some(params);
    }

    pub fn params(&self) -> Option<AudioParams> {
        self.params
    }

    /// Forgets the partially played buffer, e.g. after a seek.
    pub fn discard_current(&mut self) {
        self.buf = CurrentBuffer::default();
    }

    pub fn reset(&mut self) {
        *self = RenderState {
            params: self.params,
            ..RenderState::default()
        };
    }

    fn samples_per_sec(&self) -> f64 {
        self.params
            .map_or(0.0, |p| f64::from(p.sample_rate) * f64::from(p.channels))
    }

    fn channels(&self) -> usize {
        self.params.map_or(2, |p| usize::from(p.channels.max(1)))
    }
}

/// Handle the audio output pulls samples through.
#[derive(Clone)]
pub struct AudioRenderer {
    shared: Arc<Shared>,
}

impl AudioRenderer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Fills `out` with interleaved samples in the negotiated layout, or silence.
    pub fn render(&self, out: &mut [f32]) {
        let shared = &*self.shared;
        let now = wall_time();
        let mut rs = lock(shared);
        rs.callback_time = now;
        let volume = shared.volume();

        let mut got_frame = false;
        let mut rest_len = 0;
        let mut written = 0;
        while written < out.len() {
            if rs.buf.exhausted() {
                if decode_next(shared, &mut rs) {
                    got_frame = true;
                } else {
                    let len = SILENCE_FRAMES * rs.channels();
                    rs.buf = CurrentBuffer {
                        samples: None,
                        len,
                        index: 0,
                    };
                }
            }
            if shared.auddec.pkt_serial() != shared.audioq.serial() {
                rs.buf.index = rs.buf.len;
                out[written..].fill(0.0);
                shared.collab.audio_output.flush();
                got_frame = false;
                rest_len = 0;
                break;
            }
            rest_len = rs.buf.remaining().min(out.len() - written);
            let dst = &mut out[written..written + rest_len];
            match &rs.buf.samples {
                Some(src) => {
                    let src = &src[rs.buf.index..rs.buf.index + rest_len];
                    if volume >= 1.0 {
                        dst.copy_from_slice(src);
                    } else {
                        for (d, s) in dst.iter_mut().zip(src) {
                            *d = s * volume;
                        }
                    }
                }
                None => dst.fill(0.0),
            }
            written += rest_len;
            rs.buf.index += rest_len;
        }

        let Some(audio_clock) = rs.audio_clock else {
            return;
        };
        let sps = rs.samples_per_sec();
        if sps <= 0.0 {
            return;
        }
        let serial = rs.audio_clock_serial;
        let callback_time = rs.callback_time;

        if !got_frame && rest_len == 0 {
            if let Some(last) = shared.audclk.pts() {
                let pts = last + out.len() as f64 / sps;
                shared.audclk.set_at(Some(pts), serial, callback_time);
                shared
                    .extclk
                    .sync_to_slave(&shared.audclk, shared.config.nosync_threshold);
            }
        } else {
            let pts = audio_clock
                - rs.buf.remaining() as f64 / sps
                - shared.collab.audio_output.latency();

            let video_running = shared.video_stream.is_open()
                && shared.viddec.finished() != Some(shared.videoq.serial())
                && shared.auddec.finished() != Some(shared.audioq.serial())
                && !shared.accurate.is_requested(MediaType::Audio);
            if video_running {
                let step = shared.step_flag.load(Ordering::Acquire);
                let video_pts = if step {
                    shared.vidclk.pts()
                } else {
                    shared.vidclk.get()
                };
                let threshold = if step {
                    shared.config.sync_threshold_min
                } else {
                    shared.config.sync_threshold_max
                };
                if let Some(video_pts) = video_pts
                    && video_pts - pts > threshold
                {
                    shared.audclk.set_at(Some(pts), serial, callback_time);
                    shared
                        .extclk
                        .sync_to_slave(&shared.audclk, shared.config.nosync_threshold);
                    tracing::debug!(behind = video_pts - pts, "audio behind video, skipping ahead");
                    fast_forward(shared, &mut rs, video_pts - pts);
                    return;
                }
            }
            shared.audclk.set_at(Some(pts), serial, callback_time);
            shared
                .extclk
                .sync_to_slave(&shared.audclk, shared.config.nosync_threshold);

            if got_frame
                && !shared
                    .milestones
                    .first_audio_frame_rendered
                    .swap(true, Ordering::AcqRel)
            {
                tracing::info!("first audio frame rendered");
                shared.post(Message::AudioRenderingStart);
            }
        }

        if serial != 0
            && shared
                .milestones
                .audio_seek_serial
                .compare_exchange(serial, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let audio_master = shared.master_sync_type() == SyncType::AudioMaster;
            shared.post(Message::AudioSeekRenderingStart { audio_master });
        }
    }
}

fn lock(shared: &Shared) -> MutexGuard<'_, RenderState> {
    shared.render.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loads the next current-generation sample frame; `false` means render silence.
fn decode_next(shared: &Shared, rs: &mut RenderState) -> bool {
    if shared.paused_flag.load(Ordering::Acquire) {
        return false;
    }

    if shared.config.sync_av_start
        && shared.video_stream.is_open()
        && !shared.viddec.first_frame_decoded()
        && shared.viddec.finished() != Some(shared.videoq.serial())
    {
        let now = wall_time();
        let start = *rs.av_start_wait.get_or_insert(now);
        if now - start <= AV_START_WAIT {
            return false;
        }
    }

    let item = loop {
        let Some(item) = shared.sampq.peek() else {
            return false;
        };
        shared.sampq.next();
        if item.meta.serial == shared.audioq.serial() {
            break item;
        }
    };

    if let (Some(next), Some(cur)) = (shared.sampq.peek().and_then(|n| n.meta.pts), item.meta.pts)
        && next > 0.0
        && cur > 0.0
    {
        let ratio = if next > cur { next / cur } else { cur / next };
        if ratio > shared.config.saltation_ratio {
            tracing::warn!(cur, next, "audio timestamp jump");
            shared.post(Message::Warning {
                code: warning_code::TIMESTAMP_SALTATION,
                value: ratio as i64,
            });
        }
    }

    let samples = remap_channels(&item.payload, rs.channels());
    rs.buf = CurrentBuffer {
        len: samples.len(),
        samples: Some(samples),
        index: 0,
    };
    rs.audio_clock = item.meta.pts.map(|pts| pts + item.payload.duration());
    rs.audio_clock_serial = item.meta.serial;
    true
}

/// Converts an interleaved buffer to `channels` by dropping or repeating channels.
fn remap_channels(buf: &AudioBuffer, channels: usize) -> Arc<[f32]> {
    let src_channels = usize::from(buf.channels.max(1));
    if src_channels == channels {
        return buf.samples.clone();
    }
    let frames = buf.frames();
    let mut out = Vec::with_capacity(frames * channels);
    for frame in buf.samples.chunks_exact(src_channels) {
        for ch in 0..channels {
            out.push(frame[ch % src_channels]);
        }
    }
    Arc::from(out)
}

/// Drops up to `diff` seconds of queued audio; returns how far audio still lags video.
fn consume(shared: &Shared, rs: &mut RenderState, diff: f64) -> f64 {
    let sps = rs.samples_per_sec();
    if sps <= 0.0 {
        return 0.0;
    }
    let channels = rs.channels();
    let len_want = ((diff * sps) as usize) / channels * channels;
    let mut len = len_want;
    let mut got_frame = false;
    let mut rest_len = 0;
    while len > 0 {
        if rs.buf.exhausted() {
            if decode_next(shared, rs) {
                got_frame = true;
            } else {
                rs.buf = CurrentBuffer {
                    samples: None,
                    len: SILENCE_FRAMES * channels,
                    index: 0,
                };
            }
        }
        if shared.auddec.pkt_serial() != shared.audioq.serial() {
            rs.buf.index = rs.buf.len;
            got_frame = false;
            break;
        }
        rest_len = rs.buf.remaining().min(len);
        len -= rest_len;
        rs.buf.index += rest_len;
    }

    let Some(audio_clock) = rs.audio_clock else {
        return 0.0;
    };
    let pts = if !got_frame && rest_len == 0 {
        match shared.audclk.pts() {
            Some(last) => last + len_want as f64 / sps,
            None => 0.0,
        }
    } else {
        audio_clock - rs.buf.remaining() as f64 / sps - shared.collab.audio_output.latency()
    };
    shared.audclk.set_at(Some(pts), rs.audio_clock_serial, rs.callback_time);
    shared
        .extclk
        .sync_to_slave(&shared.audclk, shared.config.nosync_threshold);

    let step = shared.step_flag.load(Ordering::Acquire);
    let video_pts = if step {
        shared.vidclk.pts()
    } else {
        shared.vidclk.get()
    };
    let threshold = if step {
        shared.config.sync_threshold_min
    } else {
        shared.config.sync_threshold_max
    };
    match video_pts {
        Some(video_pts) if video_pts - pts > threshold => video_pts - pts,
        _ => 0.0,
    }
}

/// Skips lagging audio in at most three rounds, then drops what the device holds.
fn fast_forward(shared: &Shared, rs: &mut RenderState, mut diff: f64) {
    for _ in 0..3 {
        if diff < 0.01 {
            break;
        }
        diff = consume(shared, rs, diff);
    }
    shared.collab.audio_output.flush();
}

/// Step-mode resynchronisation requested by the refresh thread.
pub(crate) fn consume_audio_buffer(shared: &Shared) {
    let mut rs = lock(shared);
    rs.callback_time = wall_time();
    fast_forward(shared, &mut rs, 0.01);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_queue::FrameMeta;
    use crate::testing::test_shared;

    fn setup() -> Arc<Shared> {
        let shared = Arc::new(test_shared(None));
        shared.audioq.start();
        shared.audio_stream.set(Some(0));
        shared.auddec.set_pkt_serial(shared.audioq.serial());
        lock(&shared).set_params(AudioParams {
            sample_rate: 1000,
            channels: 1,
        });
        shared
    }

    fn push(shared: &Shared, pts: f64, value: f32, frames: usize) {
        let serial = shared.audioq.serial();
        shared.sampq.peek_writable().unwrap().commit(
            FrameMeta {
                pts: Some(pts),
                duration: frames as f64 / 1000.0,
                pos: -1,
                serial,
            },
            AudioBuffer {
                sample_rate: 1000,
                channels: 1,
                samples: Arc::from(vec![value; frames]),
            },
        );
    }

    #[test]
    fn plays_queued_samples_then_silence() {
        let shared = setup();
        push(&shared, 1.0, 0.5, 4);
        let renderer = AudioRenderer::new(shared.clone());
        let mut out = [1.0f32; 8];
        renderer.render(&mut out);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn volume_scales_output() {
        let shared = setup();
        shared.set_volume(0.5);
        push(&shared, 1.0, 0.8, 4);
        let mut out = [0.0f32; 4];
        AudioRenderer::new(shared.clone()).render(&mut out);
        assert!(out.iter().all(|s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn paused_renders_silence_without_consuming() {
        let shared = setup();
        push(&shared, 1.0, 0.5, 4);
        shared.paused_flag.store(true, Ordering::Release);
        let mut out = [1.0f32; 4];
        AudioRenderer::new(shared.clone()).render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(shared.sampq.nb_remaining(), 1);
    }

    #[test]
    fn stale_generation_is_skipped() {
        let shared = setup();
        push(&shared, 1.0, 0.9, 4);
        shared.audioq.flush();
        shared.auddec.set_pkt_serial(shared.audioq.serial());
        push(&shared, 5.0, 0.3, 4);
        let mut out = [0.0f32; 4];
        AudioRenderer::new(shared.clone()).render(&mut out);
        assert_eq!(out, [0.3; 4]);
    }

    #[test]
    fn clock_follows_rendered_position() {
        let shared = setup();
        push(&shared, 2.0, 0.1, 100);
        let mut out = [0.0f32; 40];
        AudioRenderer::new(shared.clone()).render(&mut out);
        // 100 ms buffer starting at 2.0 s, 40 ms played.
        let pts = shared.audclk.pts().unwrap();
        assert!((pts - 2.04).abs() < 1e-9, "{pts}");
        assert!(shared.milestones.first_audio_frame_rendered.load(Ordering::Acquire));
    }

    #[test]
    fn channel_remap_duplicates_mono() {
        let buf = AudioBuffer {
            sample_rate: 1000,
            channels: 1,
            samples: Arc::from(vec![0.1, 0.2]),
        };
        assert_eq!(&*remap_channels(&buf, 2), &[0.1, 0.1, 0.2, 0.2]);
    }
}
