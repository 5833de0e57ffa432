//! Demux thread: opens the source, starts stream components, and feeds the packet
//! queues while servicing seeks, backpressure, end of stream, and stream selection.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use avsync_types::{EndReason, MediaType, Message, error_code};

use crate::audio_render::AudioRenderer;
use crate::audio_thread;
use crate::decoder::{Decoder, DecoderOptions};
use crate::media::{Packet, StreamInfo};
use crate::sink::AudioParams;
use crate::source::{MediaSource, ReadError, SeekTarget};
use crate::state::{SeekRequest, Shared, StreamRequest, ms_to_us};
use crate::subtitle_thread;
use crate::video_thread;

/// Longest plausible frame gap for sources whose timestamps never jump.
const MAX_FRAME_DURATION_CONTINUOUS: f64 = 3600.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadState {
    Opening,
    Probing,
    Running,
    Seeking,
    EofWait,
    Closed,
}

/// Why a stream component could not be opened.
#[derive(Debug)]
struct ComponentError {
    code: i32,
    source: anyhow::Error,
}

impl ComponentError {
    fn codec(source: anyhow::Error) -> Self {
        Self {
            code: error_code::CODEC_OPEN,
            source,
        }
    }
}

/// Decode threads of the open stream components.
#[derive(Default)]
struct Components {
    audio: Option<JoinHandle<()>>,
    video: Option<JoinHandle<()>>,
    subtitle: Option<JoinHandle<()>>,
}

impl Components {
    fn handle(&mut self, kind: MediaType) -> &mut Option<JoinHandle<()>> {
        match kind {
            MediaType::Audio => &mut self.audio,
            MediaType::Video => &mut self.video,
            MediaType::Subtitle => &mut self.subtitle,
        }
    }
}

struct Reader {
    shared: Arc<Shared>,
    state: ReadState,
    components: Components,
    prepared: bool,
    completed: bool,
    queue_attachments: bool,
    last_buffering_check: Option<Instant>,
}

pub(crate) fn run(shared: Arc<Shared>, uri: String) {
    let mut reader = Reader::new(shared);

    match reader.prepare(&uri) {
        Ok(mut source) => reader.read_loop(source.as_mut()),
        Err(code) => {
            let shared = &reader.shared;
            if !reader.prepared || !shared.is_aborted() {
                shared.set_end_reason(Some(EndReason::Error));
                shared.post(Message::Error { code });
            }
        }
    }

    for kind in [MediaType::Audio, MediaType::Video, MediaType::Subtitle] {
        reader.close_component(kind);
    }
    reader.enter(ReadState::Closed);
}

impl Reader {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            state: ReadState::Opening,
            components: Components::default(),
            prepared: false,
            completed: false,
            queue_attachments: true,
            last_buffering_check: None,
        }
    }

    fn enter(&mut self, state: ReadState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "read state");
            self.state = state;
        }
    }

    /// Opens and probes the source, then starts the best stream of each kind.
    fn prepare(&mut self, uri: &str) -> Result<Box<dyn MediaSource>, i32> {
        let shared = self.shared.clone();
        self.enter(ReadState::Opening);
        let mut source = match shared.collab.opener.open(uri, shared.interrupt.clone()) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(uri, "open input failed: {e:#}");
                return Err(error_code::OPEN_INPUT);
            }
        };
        shared.post(Message::OpenInput {
            format: source.format_name().to_string(),
        });

        self.enter(ReadState::Probing);
        if let Err(e) = source.find_stream_info() {
            tracing::error!(uri, "could not find stream parameters: {e:#}");
            return Err(error_code::OPEN_INPUT);
        }
        shared.post(Message::FindStreamInfo);

        {
            let mut media = shared.media();
            media.format = source.format_name().to_string();
            media.duration_us = source.duration_us();
            media.start_time_us = source.start_time_us();
            media.bit_rate = source.bit_rate();
            media.realtime = source.is_realtime();
            media.max_frame_duration = if source.has_discontinuous_timestamps() {
                shared.config.max_frame_duration
            } else {
                MAX_FRAME_DURATION_CONTINUOUS
            };
            media.streams = source.streams().to_vec();
            tracing::info!(
                uri,
                format = %media.format,
                duration_us = ?media.duration_us,
                bit_rate = media.bit_rate,
                streams = media.streams.len(),
                "source opened"
            );
        }

        for kind in [MediaType::Audio, MediaType::Video, MediaType::Subtitle] {
            let Some(idx) = self.best_stream(kind) else {
                continue;
            };
            if let Err(e) = self.open_component(idx) {
                tracing::error!(
                    stream = idx,
                    kind = kind.as_str(),
                    "stream open failed: {:#}",
                    e.source
                );
                shared.post(Message::StreamFatal {
                    stream: idx,
                    code: e.code,
                });
            }
        }
        shared.post(Message::ComponentOpen);

        if !shared.audio_stream.is_open() && !shared.video_stream.is_open() {
            tracing::error!(uri, "no audio or video stream could be opened");
            return Err(error_code::NO_STREAM);
        }
        tracing::info!(
            max_buffer_size = shared.max_buffer_size(),
            infinite = shared.infinite_buffer(),
            "demux limits"
        );

        if !shared.config.start_on_prepared {
            let mut st = shared.play();
            shared.toggle_pause(&mut st, true);
        }
        if let Some(idx) = shared.video_stream.get() {
            let (width, height) = shared
                .media()
                .streams
                .get(idx)
                .map_or((0, 0), |s| (s.width, s.height));
            if width > 0 && height > 0 {
                shared.post(Message::VideoSizeChanged { width, height });
            }
        }

        self.prepared = true;
        shared.post(Message::Prepared);

        if !shared.config.start_on_prepared {
            shared.wait_while_pause_requested();
        }
        {
            let mut st = shared.play();
            if st.auto_resume {
                st.auto_resume = false;
                shared.post(Message::RequestStart);
            }
        }
        if shared.config.seek_at_start_ms > 0 {
            shared.seek_to_ms(shared.config.seek_at_start_ms);
        }
        Ok(source)
    }

    /// First usable stream of `kind`, honouring the disable switches.
    fn best_stream(&self, kind: MediaType) -> Option<usize> {
        let cfg = &self.shared.config;
        let disabled = match kind {
            MediaType::Audio => cfg.audio_disable,
            MediaType::Video => cfg.video_disable,
            MediaType::Subtitle => cfg.subtitle_disable || self.shared.collab.subtitle_sink.is_none(),
        };
        if disabled {
            return None;
        }
        self.shared
            .media()
            .streams
            .iter()
            .find(|s| s.media_type == Some(kind))
            .map(|s| s.index)
    }

    fn stream_info(&self, idx: usize) -> Option<StreamInfo> {
        self.shared.media().streams.get(idx).cloned()
    }

    /// Opens the codec, the output, and the decode thread of stream `idx`.
    fn open_component(&mut self, idx: usize) -> Result<(), ComponentError> {
        let shared = self.shared.clone();
        let stream = self
            .stream_info(idx)
            .ok_or_else(|| ComponentError::codec(anyhow!("no stream {idx}")))?;
        let Some(kind) = stream.media_type else {
            return Err(ComponentError::codec(anyhow!("stream {idx} carries no playable media")));
        };
        if kind == MediaType::Subtitle && shared.collab.subtitle_sink.is_none() {
            return Err(ComponentError::codec(anyhow!("no subtitle engine attached")));
        }
        if let Some(current) = shared.stream_slot(kind).get() {
            self.close_component(kind);
            shared.post(Message::StreamChanged {
                stream: current,
                selected: false,
            });
        }

        let codec = shared
            .collab
            .codecs
            .open(&stream)
            .with_context(|| format!("open {} codec {}", kind.as_str(), stream.codec_name))
            .map_err(ComponentError::codec)?;
        let cfg = &shared.config;
        let options = DecoderOptions {
            reorder: cfg.reorder,
            copy_hw_frame: cfg.copy_hw_frame,
            packet_buffering: cfg.packet_buffering,
            hw_retry_budget: cfg.hw_retry_budget,
        };
        let queue = shared.queue(kind).clone();
        let status = shared.decoder_status(kind).clone();
        let mut decoder = Decoder::new(&stream, kind, codec, queue.clone(), status, options);

        let handle = match kind {
            MediaType::Audio => {
                let wanted = AudioParams {
                    sample_rate: stream.sample_rate,
                    channels: stream.channels,
                };
                {
                    let mut rs = shared.render.lock().unwrap_or_else(PoisonError::into_inner);
                    rs.reset();
                    rs.set_params(wanted);
                }
                let obtained = shared
                    .collab
                    .audio_output
                    .open(wanted, AudioRenderer::new(shared.clone()))
                    .context("open audio output")
                    .map_err(|source| ComponentError {
                        code: error_code::AUDIO_OUTPUT,
                        source,
                    })?;
                if obtained != wanted {
                    tracing::info!(?wanted, ?obtained, "audio output layout differs from the stream");
                }
                shared
                    .render
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .set_params(obtained);
                decoder.set_start_pts(stream.start_time, stream.time_base);
                queue.start();
                shared.audio_stream.set(Some(idx));
                shared.collab.audio_output.pause(false);
                let worker = shared.clone();
                thread::spawn(move || audio_thread::run(worker, decoder))
            }
            MediaType::Video => {
                queue.start();
                shared.video_stream.set(Some(idx));
                self.queue_attachments = true;
                let worker = shared.clone();
                let frame_rate = stream.avg_frame_rate;
                thread::spawn(move || video_thread::run(worker, decoder, frame_rate))
            }
            MediaType::Subtitle => {
                queue.start();
                shared.subtitle_stream.set(Some(idx));
                let worker = shared.clone();
                thread::spawn(move || subtitle_thread::run(worker, decoder))
            }
        };
        *self.components.handle(kind) = Some(handle);
        tracing::info!(
            stream = idx,
            kind = kind.as_str(),
            codec = %stream.codec_name,
            "stream component opened"
        );
        Ok(())
    }

    /// Stops the decode thread of `kind` and releases what it queued.
    fn close_component(&mut self, kind: MediaType) {
        let shared = self.shared.clone();
        let slot = shared.stream_slot(kind);
        let Some(idx) = slot.get() else {
            return;
        };
        shared.queue(kind).abort();
        match kind {
            MediaType::Audio => shared.sampq.signal(),
            MediaType::Video => shared.pictq.signal(),
            MediaType::Subtitle => shared.subpq.signal(),
        }
        if let Some(handle) = self.components.handle(kind).take() {
            if handle.join().is_err() {
                tracing::error!(stream = idx, kind = kind.as_str(), "decode thread panicked");
            }
        }
        shared.queue(kind).flush();

        match kind {
            MediaType::Audio => {
                shared.collab.audio_output.close();
                shared.sampq.clear();
                shared
                    .render
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .reset();
            }
            MediaType::Video => {
                for picture in shared.pictq.clear() {
                    if let Some(overlay) = picture.overlay {
                        shared.collab.video_sink.free_overlay(overlay);
                    }
                }
            }
            MediaType::Subtitle => {
                shared.subpq.clear();
                if let Some(sink) = shared.collab.subtitle_sink.as_ref() {
                    sink.flush();
                }
                shared.collab.video_sink.show_subtitle(None);
            }
        }
        slot.set(None);
        if kind != MediaType::Subtitle {
            shared.accurate.withdraw(kind);
        }
        shared.decoder_status(kind).reset();
        tracing::info!(stream = idx, kind = kind.as_str(), "stream component closed");
    }

    fn read_loop(&mut self, source: &mut dyn MediaSource) {
        let shared = self.shared.clone();
        self.enter(ReadState::Running);

        while !shared.is_aborted() {
            self.service_stream_requests();

            if let Some(req) = shared.take_seek() {
                self.service_seek(source, req);
            }

            if self.queue_attachments {
                self.queue_attachments = false;
                self.queue_attached_picture();
            }

            if !shared.infinite_buffer() && !shared.seek_pending() && self.queues_full() {
                if !shared.eof.load(Ordering::Acquire) {
                    shared.toggle_buffering(false);
                }
                shared.wait_continue_read(Duration::from_millis(10));
                continue;
            }

            if self.playback_drained() {
                if shared.consume_loop() {
                    let start_us = ms_to_us(shared.config.seek_at_start_ms.max(0));
                    tracing::info!(start_us, remaining = shared.loop_count(), "looping to start");
                    shared.request_seek(start_us, 0, false);
                } else if self.completed {
                    while !shared.is_aborted() && !shared.seek_pending() {
                        shared.wait_continue_read(Duration::from_millis(100));
                    }
                    continue;
                } else {
                    self.complete();
                }
            }

            match source.read_packet() {
                Ok(packet) => {
                    shared.eof.store(false, Ordering::Release);
                    self.dispatch(packet);
                }
                Err(ReadError::Again) => {
                    shared.wait_continue_read(Duration::from_millis(10));
                    continue;
                }
                Err(err) => {
                    self.on_read_end(err);
                    continue;
                }
            }

            self.maybe_check_buffering();
        }
        tracing::debug!("read loop exited");
    }

    fn service_stream_requests(&mut self) {
        let shared = self.shared.clone();
        for req in shared.take_stream_requests() {
            match req {
                StreamRequest::Open(idx) => {
                    let already_open = [MediaType::Audio, MediaType::Video, MediaType::Subtitle]
                        .into_iter()
                        .any(|k| shared.stream_slot(k).get() == Some(idx));
                    if already_open {
                        continue;
                    }
                    match self.open_component(idx) {
                        Ok(()) => shared.post(Message::StreamChanged {
                            stream: idx,
                            selected: true,
                        }),
                        Err(e) => {
                            tracing::warn!(stream = idx, "stream selection failed: {:#}", e.source);
                            shared.post(Message::StreamFatal {
                                stream: idx,
                                code: e.code,
                            });
                        }
                    }
                }
                StreamRequest::Close(idx) => {
                    let kind = [MediaType::Audio, MediaType::Video, MediaType::Subtitle]
                        .into_iter()
                        .find(|k| shared.stream_slot(*k).get() == Some(idx));
                    if let Some(kind) = kind {
                        self.close_component(kind);
                        shared.post(Message::StreamChanged {
                            stream: idx,
                            selected: false,
                        });
                    }
                }
            }
        }
    }

    fn service_seek(&mut self, source: &mut dyn MediaSource, req: SeekRequest) {
        let shared = self.shared.clone();
        self.enter(ReadState::Seeking);
        let target = SeekTarget {
            min: if req.rel > 0 { req.pos - req.rel + 2 } else { i64::MIN },
            target: req.pos,
            max: if req.rel < 0 { req.pos - req.rel - 2 } else { i64::MAX },
            by_bytes: req.by_bytes,
        };
        tracing::info!(pos = req.pos, rel = req.rel, by_bytes = req.by_bytes, "seeking");

        shared.toggle_buffering(true);
        if shared.audio_stream.is_open() {
            shared.collab.audio_output.flush();
        }
        shared.post(Message::BufferingUpdate {
            position_ms: 0,
            percent: 0,
        });

        let status = match source.seek(target) {
            Ok(()) => {
                for kind in [MediaType::Audio, MediaType::Video, MediaType::Subtitle] {
                    if shared.stream_slot(kind).is_open() {
                        shared.queue(kind).flush();
                    }
                }
                if let Some(sink) = shared.collab.subtitle_sink.as_ref() {
                    sink.flush();
                }
                if req.by_bytes {
                    shared.extclk.set(None, 0);
                } else {
                    shared.extclk.set(Some(req.pos as f64 / 1_000_000.0), 0);
                }
                shared.seek_pos_us.store(req.pos, Ordering::Release);
                shared
                    .milestones
                    .audio_seek_serial
                    .store(shared.audioq.serial(), Ordering::Release);
                0
            }
            Err(e) => {
                tracing::error!(pos = req.pos, "error while seeking: {e:#}");
                error_code::IO
            }
        };

        shared
            .buffering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_to_first();
        shared.finish_seek();
        shared.milestones.after_seek_frame.store(true, Ordering::Release);
        self.queue_attachments = true;
        shared.eof.store(false, Ordering::Release);
        self.completed = false;
        {
            let mut st = shared.play();
            if st.auto_resume {
                st.pause_req = false;
                if shared.config.packet_buffering {
                    st.buffering_on = true;
                }
                st.auto_resume = false;
                shared.stream_update_pause(&mut st);
            }
            st.step_on_seeking = true;
        }

        if status == 0 && shared.config.accurate_seek && !req.by_bytes {
            while let Some(frame) = shared.sampq.peek() {
                if frame.meta.serial == shared.audioq.serial() {
                    break;
                }
                shared.sampq.next();
            }
            shared
                .render
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .discard_current();
            shared.accurate.arm(
                req.pos,
                shared.audio_stream.is_open(),
                shared.video_stream.is_open(),
                shared.accurate_seek_timeout(),
            );
        }

        shared.post(Message::SeekComplete {
            position_ms: req.pos / 1000,
            status,
        });
        shared.toggle_buffering(true);

        if !shared.video_stream.is_open()
            && shared.milestones.after_seek_frame.swap(false, Ordering::AcqRel)
        {
            let elapsed_ms = shared.milestones.elapsed_since_seek_ms();
            shared.post(Message::AfterSeekFirstFrame { elapsed_ms });
        }
        self.enter(ReadState::Running);
    }

    /// Queues cover art once, followed by a drain marker.
    fn queue_attached_picture(&self) {
        let shared = &self.shared;
        let Some(idx) = shared.video_stream.get() else {
            return;
        };
        let Some(picture) = self.stream_info(idx).and_then(|s| s.attached_pic) else {
            return;
        };
        tracing::debug!(stream = idx, "queueing attached picture");
        shared.videoq.put(picture);
        shared.videoq.put_null(idx);
    }

    /// Whether demuxing must pause: too many bytes, or every stream has enough.
    fn queues_full(&self) -> bool {
        let shared = &self.shared;
        let bytes = shared.audioq.bytes() + shared.videoq.bytes() + shared.subtitleq.bytes();
        if bytes >= shared.max_buffer_size() {
            return true;
        }
        [MediaType::Audio, MediaType::Video, MediaType::Subtitle]
            .into_iter()
            .all(|kind| self.has_enough_packets(kind))
    }

    fn has_enough_packets(&self, kind: MediaType) -> bool {
        let shared = &self.shared;
        let Some(idx) = shared.stream_slot(kind).get() else {
            return true;
        };
        let queue = shared.queue(kind);
        if queue.is_aborted() {
            return true;
        }
        let Some(stream) = self.stream_info(idx) else {
            return true;
        };
        if stream.is_attached_pic() {
            return true;
        }
        let stats = queue.stats();
        stats.packets > shared.config.min_frames
            && (stats.duration == 0 || stream.time_base.seconds(stats.duration) > 1.0)
    }

    /// Every open audio/video pipeline has drained its current generation.
    fn playback_drained(&self) -> bool {
        let shared = &self.shared;
        if shared.paused_flag.load(Ordering::Acquire) && !self.completed {
            return false;
        }
        if shared.step_flag.load(Ordering::Acquire) {
            return false;
        }
        let audio_done = !shared.audio_stream.is_open()
            || (shared.auddec.finished() == Some(shared.audioq.serial())
                && shared.sampq.nb_remaining() == 0);
        let video_done = !shared.video_stream.is_open()
            || (shared.viddec.finished() == Some(shared.videoq.serial())
                && shared.pictq.nb_remaining() == 0);
        audio_done && video_done
    }

    fn complete(&mut self) {
        let shared = self.shared.clone();
        self.completed = true;
        {
            let mut st = shared.play();
            st.auto_resume = false;
            shared.toggle_buffering_locked(&mut st, false);
            shared.toggle_pause(&mut st, true);
        }
        self.enter(ReadState::EofWait);
        match shared.deferred_error() {
            Some(code) => {
                tracing::warn!(code, "playback drained after an error");
                shared.set_end_reason(Some(EndReason::Error));
                shared.post(Message::Error { code });
            }
            None => {
                tracing::info!("playback completed");
                shared.set_end_reason(Some(EndReason::Eof));
                shared.post(Message::Completed);
            }
        }
    }

    fn dispatch(&self, packet: Packet) {
        let shared = &self.shared;
        if packet.flags.discontinuity {
            for kind in [MediaType::Audio, MediaType::Video] {
                if shared.stream_slot(kind).is_open() {
                    let serial = shared.queue(kind).bump_serial();
                    tracing::info!(kind = kind.as_str(), serial, "timestamp discontinuity");
                }
            }
        }
        if !self.in_play_range(&packet) {
            return;
        }

        let idx = packet.stream_index;
        if shared.audio_stream.get() == Some(idx) {
            shared.audioq.put(packet);
        } else if shared.video_stream.get() == Some(idx) {
            if !self.stream_info(idx).is_some_and(|s| s.is_attached_pic()) {
                shared.videoq.put(packet);
            }
        } else if shared.subtitle_stream.get() == Some(idx) {
            shared.subtitleq.put(packet);
        }
    }

    fn in_play_range(&self, packet: &Packet) -> bool {
        let Some(limit_ms) = self.shared.config.play_duration_ms else {
            return true;
        };
        let Some(ts) = packet.pts.or(packet.dts) else {
            return true;
        };
        let Some(stream) = self.stream_info(packet.stream_index) else {
            return true;
        };
        let offset = stream.time_base.seconds(ts - stream.start_time.unwrap_or(0));
        let start = self.shared.config.seek_at_start_ms.max(0) as f64 / 1000.0;
        offset - start <= limit_ms as f64 / 1000.0
    }

    fn on_read_end(&mut self, err: ReadError) {
        let shared = self.shared.clone();
        match err {
            ReadError::Io(e) => {
                tracing::error!("source read failed: {e:#}");
                self.mark_eof();
                shared.record_error(error_code::IO);
            }
            ReadError::Exit => {
                tracing::debug!("source read interrupted");
                self.mark_eof();
            }
            ReadError::Eof | ReadError::Again => {
                if !shared.eof.load(Ordering::Acquire) {
                    tracing::info!("end of input");
                    shared.check_buffering();
                    self.mark_eof();
                }
            }
        }
        if shared.eof.load(Ordering::Acquire) {
            shared.toggle_buffering(false);
            shared.wait_continue_read(Duration::from_millis(100));
        }
        shared.wait_continue_read(Duration::from_millis(10));
    }

    /// Queues drain markers so every decoder flushes out its tail.
    fn mark_eof(&self) {
        let shared = &self.shared;
        for kind in [MediaType::Audio, MediaType::Video, MediaType::Subtitle] {
            if let Some(idx) = shared.stream_slot(kind).get() {
                shared.queue(kind).put_null(idx);
            }
        }
        shared.eof.store(true, Ordering::Release);
    }

    fn maybe_check_buffering(&mut self) {
        let shared = &self.shared;
        if !shared.config.packet_buffering {
            return;
        }
        let milestones = &shared.milestones;
        let first_frame_pending = (shared.video_stream.is_open()
            && !milestones.first_video_frame_rendered.load(Ordering::Acquire))
            || (shared.audio_stream.is_open()
                && !milestones.first_audio_frame_rendered.load(Ordering::Acquire));
        let fast = first_frame_pending || shared.play().seek_buffering;
        let period = Duration::from_millis(if fast {
            shared.config.fast_buffering_check_ms
        } else {
            shared.config.buffering_check_ms
        });
        let now = Instant::now();
        if self
            .last_buffering_check
            .is_some_and(|last| now.duration_since(last) < period)
        {
            return;
        }
        self.last_buffering_check = Some(now);
        if first_frame_pending {
            shared
                .buffering
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset_to_first();
        }
        shared.check_buffering();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::media::PacketFlags;
    use crate::testing::{AUDIO_STREAM, SyntheticMedia, VIDEO_STREAM, shared_with_config};

    fn reader(config: EngineConfig) -> Reader {
        let shared = Arc::new(shared_with_config(config, None));
        shared.media().streams = SyntheticMedia::default().streams();
        for kind in [MediaType::Video, MediaType::Audio] {
            let idx = match kind {
                MediaType::Video => VIDEO_STREAM,
                _ => AUDIO_STREAM,
            };
            shared.queue(kind).start();
            shared.stream_slot(kind).set(Some(idx));
        }
        Reader::new(shared)
    }

    fn packet(stream_index: usize, ts: i64, bytes: usize, discontinuity: bool) -> Packet {
        Packet {
            stream_index,
            pts: Some(ts),
            dts: Some(ts),
            duration: 40,
            pos: -1,
            flags: PacketFlags {
                key: true,
                discontinuity,
            },
            data: Arc::from(vec![0u8; bytes]),
        }
    }

    #[test]
    fn discontinuity_opens_a_new_generation_without_dropping_packets() {
        let r = reader(EngineConfig::default());
        let shared = &r.shared;
        r.dispatch(packet(VIDEO_STREAM, 0, 100, false));
        let (audio_serial, video_serial) = (shared.audioq.serial(), shared.videoq.serial());

        r.dispatch(packet(AUDIO_STREAM, 40, 10, true));

        assert_eq!(shared.audioq.serial(), audio_serial + 1);
        assert_eq!(shared.videoq.serial(), video_serial + 1);
        assert_eq!(shared.videoq.bytes(), 100);
        assert_eq!(shared.audioq.bytes(), 10);
    }

    #[test]
    fn packets_of_unselected_streams_are_dropped() {
        let r = reader(EngineConfig::default());
        r.dispatch(packet(7, 0, 100, false));
        assert_eq!(r.shared.audioq.len() + r.shared.videoq.len(), 0);
    }

    #[test]
    fn queues_are_full_at_the_byte_limit() {
        let r = reader(EngineConfig::default());
        r.shared.set_max_buffer_size(1000);
        r.dispatch(packet(VIDEO_STREAM, 0, 600, false));
        assert!(!r.queues_full());
        r.dispatch(packet(VIDEO_STREAM, 40, 400, false));
        assert!(r.queues_full());
    }

    #[test]
    fn enough_packets_needs_count_and_a_second_of_media() {
        let config = EngineConfig {
            min_frames: 2,
            ..Default::default()
        };
        let r = reader(config);
        for i in 0..5 {
            r.dispatch(packet(VIDEO_STREAM, i * 40, 10, false));
        }
        assert!(!r.has_enough_packets(MediaType::Video), "200 ms queued");
        for i in 5..30 {
            r.dispatch(packet(VIDEO_STREAM, i * 40, 10, false));
        }
        assert!(r.has_enough_packets(MediaType::Video));
        assert!(!r.has_enough_packets(MediaType::Audio));
        assert!(r.has_enough_packets(MediaType::Subtitle), "closed streams never block");

        r.shared.audioq.abort();
        assert!(r.has_enough_packets(MediaType::Audio));
    }

    #[test]
    fn play_duration_bounds_dispatch() {
        let config = EngineConfig {
            seek_at_start_ms: 1000,
            play_duration_ms: Some(500),
            ..Default::default()
        };
        let r = reader(config);
        assert!(r.in_play_range(&packet(VIDEO_STREAM, 1400, 1, false)));
        assert!(r.in_play_range(&packet(VIDEO_STREAM, 1500, 1, false)));
        assert!(!r.in_play_range(&packet(VIDEO_STREAM, 1540, 1, false)));
    }
}
