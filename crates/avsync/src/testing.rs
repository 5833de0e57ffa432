//! Synthetic collaborators and end-to-end playback scenarios.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::bail;
use avsync_types::MediaType;

use crate::audio_render::AudioRenderer;
use crate::codec::{Codec, CodecFactory, ReceiveStatus, SendStatus};
use crate::config::EngineConfig;
use crate::media::{
    AudioBuffer, Frame, FramePayload, Packet, PacketFlags, Picture, PixelFormat, Rational,
    StreamInfo, SubtitleContent, SubtitleEvent,
};
use crate::message;
use crate::sink::{AudioOutput, AudioParams, OverlayHandle, SubtitleSink, VideoSink};
use crate::source::{Interrupt, MediaSource, ReadError, SeekTarget, SourceOpener};
use crate::state::{Collaborators, Shared};

pub(crate) const VIDEO_STREAM: usize = 0;
pub(crate) const AUDIO_STREAM: usize = 1;

/// Shape of the generated A/V source. Timestamps are in milliseconds.
#[derive(Clone, Debug)]
pub(crate) struct SyntheticMedia {
    pub duration_ms: i64,
    pub video_frame_ms: i64,
    pub audio_packet_ms: i64,
    pub keyframe_ms: i64,
    pub video_packet_bytes: usize,
    pub audio_packet_bytes: usize,
    pub sample_rate: u32,
    /// Latency before the first packet, like a slow network open.
    pub first_read_delay: Duration,
    /// Flag the first packet at or after this time as a discontinuity.
    pub discontinuity_at_ms: Option<i64>,
    /// Time the video codec spends on each packet.
    pub video_decode_delay: Duration,
    /// Make every source seek fail.
    pub seek_fails: bool,
}

impl Default for SyntheticMedia {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            video_frame_ms: 40,
            audio_packet_ms: 20,
            keyframe_ms: 2000,
            video_packet_bytes: 4096,
            audio_packet_bytes: 256,
            sample_rate: 8000,
            first_read_delay: Duration::ZERO,
            discontinuity_at_ms: None,
            video_decode_delay: Duration::ZERO,
            seek_fails: false,
        }
    }
}

impl SyntheticMedia {
    pub fn streams(&self) -> Vec<StreamInfo> {
        let base = StreamInfo {
            index: VIDEO_STREAM,
            media_type: Some(MediaType::Video),
            time_base: Rational::new(1, 1000),
            start_time: Some(0),
            avg_frame_rate: Rational::new(1000, self.video_frame_ms as i32),
            codec_name: "synthetic-video".into(),
            width: 16,
            height: 16,
            sample_rate: 0,
            channels: 0,
            attached_pic: None,
        };
        let audio = StreamInfo {
            index: AUDIO_STREAM,
            media_type: Some(MediaType::Audio),
            avg_frame_rate: Rational::new(0, 1),
            codec_name: "synthetic-audio".into(),
            width: 0,
            height: 0,
            sample_rate: self.sample_rate,
            channels: 1,
            ..base.clone()
        };
        vec![base, audio]
    }
}

pub(crate) struct SyntheticSource {
    media: SyntheticMedia,
    streams: Vec<StreamInfo>,
    interrupt: Interrupt,
    next_video_ms: i64,
    next_audio_ms: i64,
    started: bool,
    discontinuity_sent: bool,
}

impl SyntheticSource {
    pub fn new(media: SyntheticMedia, interrupt: Interrupt) -> Self {
        Self {
            streams: media.streams(),
            media,
            interrupt,
            next_video_ms: 0,
            next_audio_ms: 0,
            started: false,
            discontinuity_sent: false,
        }
    }

    fn packet(&mut self, stream_index: usize, ts: i64, duration: i64, bytes: usize, key: bool) -> Packet {
        let discontinuity = match self.media.discontinuity_at_ms {
            Some(at) if ts >= at && !self.discontinuity_sent => {
                self.discontinuity_sent = true;
                true
            }
            _ => false,
        };
        Packet {
            stream_index,
            pts: Some(ts),
            dts: Some(ts),
            duration,
            pos: ts,
            flags: PacketFlags { key, discontinuity },
            data: Arc::from(vec![0u8; bytes.max(1)]),
        }
    }
}

impl MediaSource for SyntheticSource {
    fn format_name(&self) -> &str {
        "synthetic"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        if self.interrupt.is_set() {
            return Err(ReadError::Exit);
        }
        if !self.started {
            self.started = true;
            thread::sleep(self.media.first_read_delay);
        }
        let end = self.media.duration_ms;
        let video_left = self.next_video_ms < end;
        let audio_left = self.next_audio_ms < end;
        if video_left && (!audio_left || self.next_video_ms <= self.next_audio_ms) {
            let ts = self.next_video_ms;
            self.next_video_ms += self.media.video_frame_ms;
            let key = ts % self.media.keyframe_ms == 0;
            Ok(self.packet(VIDEO_STREAM, ts, self.media.video_frame_ms, self.media.video_packet_bytes, key))
        } else if audio_left {
            let ts = self.next_audio_ms;
            self.next_audio_ms += self.media.audio_packet_ms;
            Ok(self.packet(AUDIO_STREAM, ts, self.media.audio_packet_ms, self.media.audio_packet_bytes, true))
        } else {
            Err(ReadError::Eof)
        }
    }

    fn seek(&mut self, target: SeekTarget) -> anyhow::Result<()> {
        if target.by_bytes {
            bail!("byte seeking unsupported");
        }
        if self.media.seek_fails {
            bail!("seek to {} us failed", target.target);
        }
        let ms = (target.target / 1000).clamp(0, self.media.duration_ms);
        let key = ms - ms % self.media.keyframe_ms;
        self.next_video_ms = key;
        self.next_audio_ms = key;
        Ok(())
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.media.duration_ms * 1000)
    }

    fn start_time_us(&self) -> Option<i64> {
        Some(0)
    }
}

pub(crate) struct SyntheticOpener(pub SyntheticMedia);

impl SourceOpener for SyntheticOpener {
    fn open(&self, uri: &str, interrupt: Interrupt) -> anyhow::Result<Box<dyn MediaSource>> {
        if uri.starts_with("missing") {
            bail!("{uri}: no such file");
        }
        Ok(Box::new(SyntheticSource::new(self.0.clone(), interrupt)))
    }
}

/// One frame per packet. Pictures carry their pts in the first eight bytes.
struct SyntheticCodec {
    media_type: MediaType,
    sample_rate: u32,
    delay: Duration,
    out: VecDeque<Frame>,
    draining: bool,
}

impl Codec for SyntheticCodec {
    fn send(&mut self, packet: &Packet) -> SendStatus {
        if packet.is_null() {
            self.draining = true;
            return SendStatus::Accepted;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let payload = match self.media_type {
            MediaType::Audio => {
                let frames = (i64::from(self.sample_rate) * packet.duration / 1000).max(1) as usize;
                FramePayload::Audio(AudioBuffer {
                    sample_rate: self.sample_rate,
                    channels: 1,
                    samples: Arc::from(vec![0.25f32; frames]),
                })
            }
            MediaType::Video => FramePayload::Video(Picture {
                width: 16,
                height: 16,
                format: PixelFormat(0),
                sar: Rational::new(1, 1),
                hardware: false,
                data: Arc::from(packet.pts.unwrap_or(-1).to_le_bytes().to_vec()),
            }),
            MediaType::Subtitle => FramePayload::Subtitle(SubtitleContent::Text("synthetic".into())),
        };
        self.out.push_back(Frame {
            pts: packet.pts,
            pkt_dts: packet.dts,
            best_effort_timestamp: packet.pts,
            duration: packet.duration,
            pos: packet.pos,
            payload,
        });
        SendStatus::Accepted
    }

    fn receive(&mut self) -> ReceiveStatus {
        match self.out.pop_front() {
            Some(frame) => ReceiveStatus::Frame(frame),
            None if self.draining => {
                self.draining = false;
                ReceiveStatus::Eof
            }
            None => ReceiveStatus::Again,
        }
    }

    fn flush(&mut self) {
        self.out.clear();
        self.draining = false;
    }
}

pub(crate) struct SyntheticCodecs {
    pub video_decode_delay: Duration,
}

impl CodecFactory for SyntheticCodecs {
    fn open(&self, stream: &StreamInfo) -> anyhow::Result<Box<dyn Codec>> {
        let Some(media_type) = stream.media_type else {
            bail!("stream {} has no media type", stream.index);
        };
        let delay = match media_type {
            MediaType::Video => self.video_decode_delay,
            _ => Duration::ZERO,
        };
        Ok(Box::new(SyntheticCodec {
            media_type,
            sample_rate: stream.sample_rate,
            delay,
            out: VecDeque::new(),
            draining: false,
        }))
    }
}

/// Records the pts (ms) of every displayed picture.
#[derive(Default)]
pub(crate) struct RecordingVideoSink {
    next_handle: AtomicU64,
    contents: Mutex<HashMap<u64, i64>>,
    displayed: Mutex<Vec<i64>>,
    display_delay: Duration,
}

impl RecordingVideoSink {
    /// A display that blocks for `delay` on every picture.
    pub fn slow(delay: Duration) -> Self {
        Self {
            display_delay: delay,
            ..Default::default()
        }
    }

    pub fn displayed(&self) -> Vec<i64> {
        self.displayed.lock().unwrap().clone()
    }
}

impl VideoSink for RecordingVideoSink {
    fn create_overlay(&self, _width: u32, _height: u32, _format: PixelFormat) -> anyhow::Result<OverlayHandle> {
        Ok(OverlayHandle(self.next_handle.fetch_add(1, Ordering::Relaxed)))
    }

    fn free_overlay(&self, overlay: OverlayHandle) {
        self.contents.lock().unwrap().remove(&overlay.0);
    }

    fn fill_from_frame(&self, overlay: OverlayHandle, picture: &Picture) -> anyhow::Result<()> {
        let mut pts = [0u8; 8];
        pts.copy_from_slice(&picture.data[..8]);
        self.contents
            .lock()
            .unwrap()
            .insert(overlay.0, i64::from_le_bytes(pts));
        Ok(())
    }

    fn display(&self, overlay: OverlayHandle) {
        if let Some(pts) = self.contents.lock().unwrap().get(&overlay.0) {
            self.displayed.lock().unwrap().push(*pts);
        }
        if !self.display_delay.is_zero() {
            thread::sleep(self.display_delay);
        }
    }
}

/// Audio device pulling 10 ms blocks in real time.
#[derive(Default)]
pub(crate) struct FakeAudioOutput {
    running: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl AudioOutput for FakeAudioOutput {
    fn open(&self, wanted: AudioParams, renderer: AudioRenderer) -> anyhow::Result<AudioParams> {
        self.close();
        let stop = Arc::new(AtomicBool::new(false));
        let block = (wanted.sample_rate as usize / 100).max(1) * usize::from(wanted.channels.max(1));
        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = vec![0.0f32; block];
                while !stop.load(Ordering::Acquire) {
                    renderer.render(&mut buf);
                    thread::sleep(Duration::from_millis(10));
                }
            })
        };
        *self.running.lock().unwrap() = Some((stop, handle));
        Ok(wanted)
    }

    fn pause(&self, _paused: bool) {}

    fn close(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some((stop, handle)) = running {
            stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingSubtitles {
    pushed: Mutex<Vec<SubtitleEvent>>,
    active: Mutex<Vec<SubtitleEvent>>,
}

impl RecordingSubtitles {
    pub fn pushed(&self) -> Vec<SubtitleEvent> {
        self.pushed.lock().unwrap().clone()
    }
}

impl SubtitleSink for RecordingSubtitles {
    fn push(&self, event: SubtitleEvent) {
        self.pushed.lock().unwrap().push(event.clone());
        self.active.lock().unwrap().push(event);
    }

    fn drop_before(&self, pts: f64) {
        self.active
            .lock()
            .unwrap()
            .retain(|e| e.start + e.duration >= pts);
    }

    fn visible_at(&self, pts: f64) -> Option<SubtitleContent> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.start <= pts && pts < e.start + e.duration)
            .map(|e| e.content.clone())
    }

    fn flush(&self) {
        self.active.lock().unwrap().clear();
    }
}

pub(crate) fn collaborators(
    media: SyntheticMedia,
    video: Arc<RecordingVideoSink>,
    subtitles: Option<Arc<RecordingSubtitles>>,
) -> Collaborators {
    Collaborators {
        codecs: Arc::new(SyntheticCodecs {
            video_decode_delay: media.video_decode_delay,
        }),
        opener: Arc::new(SyntheticOpener(media)),
        video_sink: video,
        audio_output: Arc::new(FakeAudioOutput::default()),
        subtitle_sink: subtitles.map(|s| s as Arc<dyn SubtitleSink>),
    }
}

/// Engine context over synthetic collaborators; notifications are discarded.
pub(crate) fn test_shared(subtitles: Option<Arc<RecordingSubtitles>>) -> Shared {
    shared_with_config(EngineConfig::default(), subtitles)
}

pub(crate) fn shared_with_config(config: EngineConfig, subtitles: Option<Arc<RecordingSubtitles>>) -> Shared {
    let (notifier, _rx) = message::channel();
    let collab = collaborators(
        SyntheticMedia::default(),
        Arc::new(RecordingVideoSink::default()),
        subtitles,
    );
    Shared::new(config, notifier, collab)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::Player;
    use crate::message::MessageReceiver;
    use avsync_types::{EndReason, Message, PropertyId, error_code};

    fn start(config: EngineConfig, media: SyntheticMedia) -> (Player, MessageReceiver, Arc<RecordingVideoSink>) {
        start_with_sink(config, media, RecordingVideoSink::default())
    }

    fn start_with_sink(
        config: EngineConfig,
        media: SyntheticMedia,
        sink: RecordingVideoSink,
    ) -> (Player, MessageReceiver, Arc<RecordingVideoSink>) {
        let video = Arc::new(sink);
        let (mut player, rx) = Player::new(config, collaborators(media, video.clone(), None));
        player.prepare("synthetic://av").unwrap();
        (player, rx, video)
    }

    /// Collects messages up to and including the first one matching `done`.
    fn wait_for(rx: &MessageReceiver, timeout: Duration, done: impl Fn(&Message) -> bool) -> Vec<Message> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(msg) => {
                    let hit = done(&msg);
                    seen.push(msg);
                    if hit {
                        return seen;
                    }
                }
                Err(_) => panic!("timed out, saw {seen:?}"),
            }
        }
    }

    fn drain_for(rx: &MessageReceiver, window: Duration) -> Vec<Message> {
        let deadline = Instant::now() + window;
        let mut seen = Vec::new();
        while let Ok(msg) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            seen.push(msg);
        }
        seen
    }

    fn position(msgs: &[Message], pred: impl Fn(&Message) -> bool) -> Option<usize> {
        msgs.iter().position(pred)
    }

    #[test]
    fn accurate_seek_lands_on_target() {
        let config = EngineConfig {
            accurate_seek: true,
            max_deviation_ms: 20,
            accurate_seek_timeout_ms: 500,
            ..Default::default()
        };
        let (mut player, rx, video) = start(config, SyntheticMedia::default());
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);

        player.seek_to(7000);
        let mut msgs = wait_for(&rx, Duration::from_secs(5), |m| {
            matches!(m, Message::AccurateSeekComplete { .. })
        });
        msgs.extend(drain_for(&rx, Duration::from_millis(700)));
        let completes = msgs
            .iter()
            .filter(|m| matches!(m, Message::AccurateSeekComplete { .. }))
            .count();
        assert_eq!(completes, 1, "{msgs:?}");
        assert!(msgs.contains(&Message::SeekComplete {
            position_ms: 7000,
            status: 0
        }));

        let first = video
            .displayed()
            .into_iter()
            .find(|pts| *pts >= 5000)
            .expect("a picture after the seek was displayed");
        assert!((6980..=7020).contains(&first), "first picture after seek at {first} ms");
        player.stop();
    }

    #[test]
    fn buffering_starts_before_it_ends_and_demux_respects_the_limit() {
        const LIMIT: usize = 2 * 1024 * 1024;
        let config = EngineConfig {
            max_buffer_size: LIMIT,
            ..Default::default()
        };
        let media = SyntheticMedia {
            video_packet_bytes: 40 * 1024,
            first_read_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let (mut player, rx, _video) = start(config, media);
        let msgs = wait_for(&rx, Duration::from_secs(5), |m| {
            matches!(m, Message::BufferingEnd { .. })
        });
        let started = position(&msgs, |m| matches!(m, Message::BufferingStart { seek: false }));
        let ended = position(&msgs, |m| matches!(m, Message::BufferingEnd { .. }));
        assert!(started.is_some() && started < ended, "{msgs:?}");

        thread::sleep(Duration::from_millis(300));
        let queued = player.get_property(PropertyId::AudioCachedBytes).as_i64()
            + player.get_property(PropertyId::VideoCachedBytes).as_i64();
        assert!(queued > 0);
        assert!((queued as usize) < LIMIT + 64 * 1024, "{queued} bytes queued");
        player.stop();
    }

    #[test]
    fn loops_then_completes() {
        let config = EngineConfig {
            loop_count: 2,
            ..Default::default()
        };
        let media = SyntheticMedia {
            duration_ms: 400,
            ..Default::default()
        };
        let (mut player, rx, _video) = start(config, media);
        let msgs = wait_for(&rx, Duration::from_secs(10), |m| *m == Message::Completed);
        let looped = position(&msgs, |m| matches!(m, Message::SeekComplete { position_ms: 0, .. }));
        assert!(looped.is_some(), "{msgs:?}");
        assert_eq!(player.status().end_reason, Some(EndReason::Eof));
        player.stop();
        assert_eq!(player.status().end_reason, Some(EndReason::Eof));
    }

    #[test]
    fn open_failure_reports_error() {
        let video = Arc::new(RecordingVideoSink::default());
        let (mut player, rx) = Player::new(
            EngineConfig::default(),
            collaborators(SyntheticMedia::default(), video, None),
        );
        player.prepare("missing://file").unwrap();
        let msgs = wait_for(&rx, Duration::from_secs(2), |m| matches!(m, Message::Error { .. }));
        assert_eq!(
            msgs.last(),
            Some(&Message::Error {
                code: error_code::OPEN_INPUT
            })
        );
        assert!(!msgs.contains(&Message::Prepared));
        player.stop();
        assert_eq!(player.status().end_reason, Some(EndReason::Error));
    }

    #[test]
    fn stop_releases_a_paused_player() {
        let config = EngineConfig {
            start_on_prepared: false,
            ..Default::default()
        };
        let (mut player, rx, _video) = start(config, SyntheticMedia::default());
        wait_for(&rx, Duration::from_secs(2), |m| *m == Message::Prepared);
        assert!(player.status().paused);
        player.stop();
        assert_eq!(player.status().end_reason, Some(EndReason::Stopped));
    }

    /// Displayed pts with consecutive repaints of one picture collapsed.
    fn distinct(mut shown: Vec<i64>) -> Vec<i64> {
        shown.dedup();
        shown
    }

    #[test]
    fn step_shows_one_picture_and_stays_paused() {
        let (mut player, rx, video) = start(EngineConfig::default(), SyntheticMedia::default());
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);
        thread::sleep(Duration::from_millis(200));
        player.pause();
        thread::sleep(Duration::from_millis(150));
        let before = distinct(video.displayed());
        thread::sleep(Duration::from_millis(150));
        assert_eq!(distinct(video.displayed()), before, "a paused player kept presenting");

        player.step_to_next_frame();
        thread::sleep(Duration::from_millis(300));
        let after = distinct(video.displayed());
        assert_eq!(after.len(), before.len() + 1, "{before:?} -> {after:?}");
        assert!(after.last() > before.last());
        assert!(player.status().paused);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(distinct(video.displayed()), after);
        player.stop();
    }

    #[test]
    fn pacer_drops_pictures_that_are_already_late() {
        let (mut player, rx, video) = start_with_sink(
            EngineConfig::default(),
            SyntheticMedia::default(),
            RecordingVideoSink::slow(Duration::from_millis(120)),
        );
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);
        thread::sleep(Duration::from_millis(1500));
        let late = player.get_property(PropertyId::FrameDropsLate).as_i64();
        let shown = distinct(video.displayed());
        player.stop();

        assert!(late > 0, "no late drops, shown {shown:?}");
        assert!(shown.windows(2).all(|w| w[0] < w[1]), "{shown:?}");
        assert!(
            shown.windows(2).any(|w| w[1] - w[0] > 40),
            "every picture was shown: {shown:?}"
        );
    }

    #[test]
    fn accurate_seek_falls_back_when_decoding_is_slow() {
        let config = EngineConfig {
            accurate_seek: true,
            max_deviation_ms: 20,
            accurate_seek_timeout_ms: 200,
            framedrop: 0,
            ..Default::default()
        };
        let media = SyntheticMedia {
            video_decode_delay: Duration::from_millis(25),
            ..Default::default()
        };
        let (mut player, rx, video) = start(config, media);
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);

        let seek_at = Instant::now();
        player.seek_to(7000);
        let mut msgs = wait_for(&rx, Duration::from_secs(3), |m| {
            matches!(m, Message::AccurateSeekComplete { .. })
        });
        assert!(seek_at.elapsed() < Duration::from_millis(1500), "{msgs:?}");
        msgs.extend(drain_for(&rx, Duration::from_millis(700)));
        let completes = msgs
            .iter()
            .filter(|m| matches!(m, Message::AccurateSeekComplete { .. }))
            .count();
        assert_eq!(completes, 1, "{msgs:?}");

        let first = video
            .displayed()
            .into_iter()
            .find(|pts| *pts >= 5000)
            .expect("a picture after the seek was displayed");
        assert!((6000..6980).contains(&first), "first picture after seek at {first} ms");
        player.stop();
    }

    #[test]
    fn failed_seek_reports_io_and_keeps_playing() {
        let config = EngineConfig {
            accurate_seek: true,
            accurate_seek_timeout_ms: 300,
            ..Default::default()
        };
        let media = SyntheticMedia {
            seek_fails: true,
            ..Default::default()
        };
        let (mut player, rx, video) = start(config, media);
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);

        player.seek_to(7000);
        let mut msgs = wait_for(&rx, Duration::from_secs(2), |m| {
            matches!(m, Message::SeekComplete { .. })
        });
        assert_eq!(
            msgs.last(),
            Some(&Message::SeekComplete {
                position_ms: 7000,
                status: error_code::IO
            })
        );
        let shown = video.displayed().len();
        msgs.extend(drain_for(&rx, Duration::from_millis(800)));
        assert!(
            !msgs.iter().any(|m| matches!(m, Message::AccurateSeekComplete { .. })),
            "{msgs:?}"
        );
        assert!(video.displayed().len() > shown);
        assert!(video.displayed().iter().all(|pts| *pts < 5000));
        player.stop();
    }

    #[test]
    fn audio_stream_can_be_deselected_and_reselected() {
        let (mut player, rx, _video) = start(EngineConfig::default(), SyntheticMedia::default());
        wait_for(&rx, Duration::from_secs(5), |m| *m == Message::VideoRenderingStart);
        let selected = |player: &Player| player.get_property(PropertyId::SelectedAudioStream).as_i64();
        assert_eq!(selected(&player), AUDIO_STREAM as i64);

        player.select_stream(AUDIO_STREAM, false).unwrap();
        wait_for(&rx, Duration::from_secs(2), |m| {
            *m == Message::StreamChanged {
                stream: AUDIO_STREAM,
                selected: false,
            }
        });
        assert_eq!(selected(&player), -1);

        player.select_stream(AUDIO_STREAM, true).unwrap();
        let msgs = wait_for(&rx, Duration::from_secs(2), |m| {
            matches!(m, Message::StreamChanged { selected: true, .. })
        });
        assert_eq!(
            msgs.last(),
            Some(&Message::StreamChanged {
                stream: AUDIO_STREAM,
                selected: true
            })
        );
        assert_eq!(selected(&player), AUDIO_STREAM as i64);
        assert!(player.select_stream(9, true).is_err());
        player.stop();
    }
}
