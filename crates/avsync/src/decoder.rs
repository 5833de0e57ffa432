//! Packet → frame pump coupling one [`Codec`] to one [`PacketQueue`].
//!
//! Each call to [`Decoder::decode_frame`] runs the pump until it can hand back a frame,
//! the current generation is fully drained, or the queue is aborted:
//! - drain the codec while the held serial matches the queue serial
//! - otherwise drop stale packets without feeding them
//! - pull the next packet; a serial change flushes the codec and resets `next_pts`
//! - feed it; a codec refusing input it just asked for keeps the packet pending

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use avsync_types::{MediaType, Message, error_code};

use crate::codec::{Codec, CodecError, ReceiveStatus, SendStatus};
use crate::config::ReorderPolicy;
use crate::media::{Frame, FramePayload, Rational, StreamInfo, rescale};
use crate::packet_queue::{PacketQueue, QueueGet, QueuedPacket};

/// Decoder progress shared with the demux, refresh, and render threads.
#[derive(Debug, Default)]
pub struct DecoderStatus {
    /// Serial whose pipeline is fully drained, 0 for none.
    finished: AtomicU64,
    pkt_serial: AtomicU64,
    first_frame_decoded: AtomicBool,
}

impl DecoderStatus {
    pub fn finished(&self) -> Option<u64> {
        match self.finished.load(Ordering::Acquire) {
            0 => None,
            serial => Some(serial),
        }
    }

    fn set_finished(&self, serial: Option<u64>) {
        self.finished.store(serial.unwrap_or(0), Ordering::Release);
    }

    /// Serial of the packet the decoder is working on.
    pub fn pkt_serial(&self) -> u64 {
        self.pkt_serial.load(Ordering::Acquire)
    }

    pub(crate) fn set_pkt_serial(&self, serial: u64) {
        self.pkt_serial.store(serial, Ordering::Release);
    }

    pub fn first_frame_decoded(&self) -> bool {
        self.first_frame_decoded.load(Ordering::Acquire)
    }

    /// Returns `true` the first time it is called.
    fn mark_first_frame(&self) -> bool {
        !self.first_frame_decoded.swap(true, Ordering::AcqRel)
    }

    pub fn reset(&self) {
        self.set_finished(None);
        self.pkt_serial.store(0, Ordering::Release);
        self.first_frame_decoded.store(false, Ordering::Release);
    }
}

/// Engine callbacks the pump needs while waiting for packets.
pub trait PumpHooks {
    /// `queue` ran dry before its generation finished.
    fn on_starved(&self, _queue: &PacketQueue) {}

    /// `queue` is empty; the demuxer may want to read more.
    fn on_queue_empty(&self) {}

    fn notify(&self, _msg: Message) {}

    /// Error to report instead of completion once playback drains.
    fn record_error(&self, _code: i32) {}
}

/// Result of one pump invocation.
#[derive(Debug)]
pub enum DecodeOutcome {
    Frame(Frame),
    /// The current generation is fully drained.
    Finished,
    Aborted,
    /// Unrecoverable failure; the stream must be closed.
    Fatal(i32),
}

/// Per-stream decode settings.
#[derive(Clone, Copy, Debug)]
pub struct DecoderOptions {
    pub reorder: ReorderPolicy,
    pub copy_hw_frame: bool,
    pub packet_buffering: bool,
    pub hw_retry_budget: u32,
}

pub struct Decoder {
    media_type: MediaType,
    stream_index: usize,
    codec: Box<dyn Codec>,
    queue: Arc<PacketQueue>,
    status: Arc<DecoderStatus>,
    options: DecoderOptions,
    pkt_timebase: Rational,
    pkt_serial: u64,
    pending: Option<QueuedPacket>,
    next_pts: Option<i64>,
    next_pts_tb: Rational,
    start_pts: Option<i64>,
    start_pts_tb: Rational,
    hw_failed_count: u32,
    reported_hardware: Option<bool>,
}

impl Decoder {
    pub fn new(
        stream: &StreamInfo,
        media_type: MediaType,
        codec: Box<dyn Codec>,
        queue: Arc<PacketQueue>,
        status: Arc<DecoderStatus>,
        options: DecoderOptions,
    ) -> Self {
        status.reset();
        Self {
            media_type,
            stream_index: stream.index,
            codec,
            queue,
            status,
            options,
            pkt_timebase: stream.time_base,
            pkt_serial: 0,
            pending: None,
            next_pts: None,
            next_pts_tb: stream.time_base,
            start_pts: None,
            start_pts_tb: stream.time_base,
            hw_failed_count: 0,
            reported_hardware: None,
        }
    }

    /// Timestamp `next_pts` falls back to after a serial change.
    pub fn set_start_pts(&mut self, pts: Option<i64>, time_base: Rational) {
        self.start_pts = pts;
        self.start_pts_tb = time_base;
        self.next_pts = pts;
        self.next_pts_tb = time_base;
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Serial of the packet that produced the last frame.
    pub fn pkt_serial(&self) -> u64 {
        self.pkt_serial
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    pub fn status(&self) -> &Arc<DecoderStatus> {
        &self.status
    }

    pub fn pkt_timebase(&self) -> Rational {
        self.pkt_timebase
    }

    pub fn decode_frame(&mut self, hooks: &dyn PumpHooks) -> DecodeOutcome {
        loop {
            if self.queue.serial() == self.pkt_serial {
                loop {
                    if self.queue.is_aborted() {
                        return DecodeOutcome::Aborted;
                    }
                    match self.codec.receive() {
                        ReceiveStatus::Frame(frame) => return self.finish_frame(frame, hooks),
                        ReceiveStatus::Eof => {
                            self.status.set_finished(Some(self.pkt_serial));
                            self.codec.flush();
                            tracing::debug!(
                                stream = self.stream_index,
                                serial = self.pkt_serial,
                                "decoder drained"
                            );
                            return DecodeOutcome::Finished;
                        }
                        ReceiveStatus::Again => break,
                        ReceiveStatus::Error(err) => {
                            tracing::warn!(stream = self.stream_index, ?err, "codec receive failed");
                            break;
                        }
                    }
                }
            } else if self.queue.is_aborted() {
                return DecodeOutcome::Aborted;
            }

            let item = loop {
                if self.queue.is_empty() {
                    hooks.on_queue_empty();
                }
                let item = match self.pending.take() {
                    Some(item) => item,
                    None => {
                        let Some(item) = self.next_packet(hooks) else {
                            return DecodeOutcome::Aborted;
                        };
                        if item.serial != self.pkt_serial {
                            self.on_serial_change(item.serial);
                        }
                        item
                    }
                };
                if self.queue.serial() == self.pkt_serial {
                    break item;
                }
            };

            if self.queue.is_aborted() {
                return DecodeOutcome::Aborted;
            }
            match self.codec.send(&item.packet) {
                SendStatus::Accepted => {}
                SendStatus::Again => {
                    tracing::error!(
                        stream = self.stream_index,
                        "codec refused input after asking for more"
                    );
                    self.pending = Some(item);
                }
                SendStatus::Error(err) => {
                    if let Some(outcome) = self.on_send_error(err, hooks) {
                        return outcome;
                    }
                }
            }
        }
    }

    fn on_serial_change(&mut self, serial: u64) {
        self.pkt_serial = serial;
        self.status.set_pkt_serial(serial);
        self.codec.flush();
        self.status.set_finished(None);
        self.hw_failed_count = 0;
        self.next_pts = self.start_pts;
        self.next_pts_tb = self.start_pts_tb;
    }

    /// Blocking get that raises buffering when the queue runs dry.
    fn next_packet(&self, hooks: &dyn PumpHooks) -> Option<QueuedPacket> {
        if !self.options.packet_buffering {
            return match self.queue.get(true) {
                QueueGet::Packet(item) => Some(item),
                _ => None,
            };
        }
        loop {
            let item = match self.queue.get(false) {
                QueueGet::Packet(item) => item,
                QueueGet::Aborted => return None,
                QueueGet::Empty => {
                    if self.status.finished().is_none() {
                        hooks.on_starved(&self.queue);
                    }
                    match self.queue.get(true) {
                        QueueGet::Packet(item) => item,
                        _ => return None,
                    }
                }
            };
            if self.status.finished() == Some(item.serial) {
                continue;
            }
            return Some(item);
        }
    }

    fn finish_frame(&mut self, mut frame: Frame, hooks: &dyn PumpHooks) -> DecodeOutcome {
        match self.media_type {
            MediaType::Video => {
                match self.options.reorder {
                    ReorderPolicy::Auto => frame.pts = frame.best_effort_timestamp,
                    ReorderPolicy::Dts => frame.pts = frame.pkt_dts,
                    ReorderPolicy::Pts => {}
                }
                let hardware = frame.picture().is_some_and(|p| p.hardware);
                if self.reported_hardware != Some(hardware) {
                    if self.reported_hardware.is_some() {
                        tracing::warn!(hardware, "video decoder type changed");
                    }
                    self.reported_hardware = Some(hardware);
                    hooks.notify(Message::VideoDecoderOpen { hardware });
                }
                if self.options.copy_hw_frame && hardware {
                    let fallback = frame.clone();
                    frame = match self.codec.transfer_hw_frame(frame) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!("hardware frame transfer failed: {e:#}");
                            fallback
                        }
                    };
                }
            }
            MediaType::Audio => {
                if let FramePayload::Audio(buf) = &frame.payload {
                    let tb = Rational::new(1, buf.sample_rate as i32);
                    frame.pts = match (frame.pts, self.next_pts) {
                        (Some(pts), _) => Some(rescale(pts, self.pkt_timebase, tb)),
                        (None, Some(next)) => Some(rescale(next, self.next_pts_tb, tb)),
                        (None, None) => None,
                    };
                    if let Some(pts) = frame.pts {
                        self.next_pts = Some(pts + buf.frames() as i64);
                        self.next_pts_tb = tb;
                    }
                }
            }
            MediaType::Subtitle => {}
        }
        if self.status.mark_first_frame() {
            match self.media_type {
                MediaType::Video => hooks.notify(Message::VideoDecodedStart),
                MediaType::Audio => hooks.notify(Message::AudioDecodedStart),
                MediaType::Subtitle => {}
            }
        }
        DecodeOutcome::Frame(frame)
    }

    fn on_send_error(&mut self, err: CodecError, hooks: &dyn PumpHooks) -> Option<DecodeOutcome> {
        tracing::error!(stream = self.stream_index, ?err, "codec send failed");
        match err {
            CodecError::Unsupported => {
                if !self.status.first_frame_decoded() {
                    hooks.record_error(error_code::UNSUPPORTED);
                }
                None
            }
            _ if self.codec.is_hardware() => {
                self.hw_failed_count += 1;
                (self.hw_failed_count > self.options.hw_retry_budget)
                    .then_some(DecodeOutcome::Fatal(error_code::HW_DECODE))
            }
            _ => None,
        }
    }

    /// Flushes and closes the codec.
    pub fn close(&mut self) {
        self.codec.flush();
        self.codec.close();
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioBuffer, Packet, PixelFormat, Picture};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        fed: Vec<Option<i64>>,
        flushes: usize,
    }

    /// One frame per packet; drains on a null packet.
    struct EchoCodec {
        media_type: MediaType,
        out: VecDeque<Frame>,
        draining: bool,
        refuse_next: bool,
        fail_sends: bool,
        hardware: bool,
        log: Arc<Mutex<Log>>,
    }

    impl EchoCodec {
        fn new(media_type: MediaType, log: Arc<Mutex<Log>>) -> Self {
            Self {
                media_type,
                out: VecDeque::new(),
                draining: false,
                refuse_next: false,
                fail_sends: false,
                hardware: false,
                log,
            }
        }
    }

    impl Codec for EchoCodec {
        fn send(&mut self, packet: &Packet) -> SendStatus {
            if self.refuse_next {
                self.refuse_next = false;
                return SendStatus::Again;
            }
            if self.fail_sends {
                return SendStatus::Error(CodecError::InvalidData);
            }
            if packet.is_null() {
                self.draining = true;
                return SendStatus::Accepted;
            }
            self.log.lock().unwrap().fed.push(packet.pts);
            let payload = match self.media_type {
                MediaType::Audio => FramePayload::Audio(AudioBuffer {
                    sample_rate: 1000,
                    channels: 1,
                    samples: Arc::from(vec![0.0f32; 20]),
                }),
                _ => FramePayload::Video(Picture {
                    width: 4,
                    height: 4,
                    format: PixelFormat(0),
                    sar: Rational::new(1, 1),
                    hardware: false,
                    data: Arc::from(vec![0u8; 4]),
                }),
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
            self.log.lock().unwrap().flushes += 1;
        }

        fn is_hardware(&self) -> bool {
            self.hardware
        }
    }

    #[derive(Default)]
    struct Hooks {
        messages: Mutex<Vec<Message>>,
        starved: AtomicU64,
    }

    impl PumpHooks for Hooks {
        fn on_starved(&self, _queue: &PacketQueue) {
            self.starved.fetch_add(1, Ordering::Relaxed);
        }

        fn notify(&self, msg: Message) {
            self.messages.lock().unwrap().push(msg);
        }
    }

    fn stream(media_type: MediaType) -> StreamInfo {
        StreamInfo {
            index: 0,
            media_type: Some(media_type),
            time_base: Rational::new(1, 1000),
            start_time: Some(0),
            avg_frame_rate: Rational::new(25, 1),
            codec_name: "echo".into(),
            width: 4,
            height: 4,
            sample_rate: 1000,
            channels: 1,
            attached_pic: None,
        }
    }

    fn pkt(pts: Option<i64>) -> Packet {
        Packet {
            pts,
            dts: pts,
            duration: 20,
            pos: -1,
            data: Arc::from(vec![1u8; 8]),
            ..Default::default()
        }
    }

    fn decoder(media_type: MediaType, codec: EchoCodec, buffering: bool) -> Decoder {
        let queue = Arc::new(PacketQueue::new("test"));
        queue.start();
        Decoder::new(
            &stream(media_type),
            media_type,
            Box::new(codec),
            queue,
            Arc::new(DecoderStatus::default()),
            DecoderOptions {
                reorder: ReorderPolicy::Auto,
                copy_hw_frame: false,
                packet_buffering: buffering,
                hw_retry_budget: 2,
            },
        )
    }

    fn expect_frame(outcome: DecodeOutcome) -> Frame {
        match outcome {
            DecodeOutcome::Frame(frame) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn drains_to_finished_for_current_serial() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut dec = decoder(MediaType::Video, EchoCodec::new(MediaType::Video, log), false);
        let hooks = Hooks::default();
        dec.queue().put(pkt(Some(0)));
        dec.queue().put(pkt(Some(40)));
        dec.queue().put_null(0);

        assert_eq!(expect_frame(dec.decode_frame(&hooks)).pts, Some(0));
        assert_eq!(expect_frame(dec.decode_frame(&hooks)).pts, Some(40));
        assert!(matches!(dec.decode_frame(&hooks), DecodeOutcome::Finished));
        assert_eq!(dec.status().finished(), Some(dec.queue().serial()));

        let messages = hooks.messages.lock().unwrap();
        assert!(messages.contains(&Message::VideoDecodedStart));
        assert!(messages.contains(&Message::VideoDecoderOpen { hardware: false }));
    }

    #[test]
    fn stale_packets_never_reach_the_codec() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut dec = decoder(
            MediaType::Video,
            EchoCodec::new(MediaType::Video, log.clone()),
            false,
        );
        let hooks = Hooks::default();
        dec.queue().put(pkt(Some(0)));
        expect_frame(dec.decode_frame(&hooks));

        dec.queue().put(pkt(Some(40)));
        dec.queue().bump_serial();
        dec.queue().put(pkt(Some(5000)));

        let frame = expect_frame(dec.decode_frame(&hooks));
        assert_eq!(frame.pts, Some(5000));
        assert_eq!(dec.pkt_serial(), dec.queue().serial());
        let log = log.lock().unwrap();
        assert_eq!(log.fed, vec![Some(0), Some(5000)]);
        assert_eq!(log.flushes, 2);
    }

    #[test]
    fn refused_packet_is_resubmitted() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut codec = EchoCodec::new(MediaType::Video, log.clone());
        codec.refuse_next = true;
        let mut dec = decoder(MediaType::Video, codec, false);
        dec.queue().put(pkt(Some(80)));
        let frame = expect_frame(dec.decode_frame(&Hooks::default()));
        assert_eq!(frame.pts, Some(80));
        assert_eq!(log.lock().unwrap().fed, vec![Some(80)]);
    }

    #[test]
    fn hardware_failures_escalate_after_budget() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut codec = EchoCodec::new(MediaType::Video, log);
        codec.fail_sends = true;
        codec.hardware = true;
        let mut dec = decoder(MediaType::Video, codec, false);
        for i in 0..3 {
            dec.queue().put(pkt(Some(i * 40)));
        }
        match dec.decode_frame(&Hooks::default()) {
            DecodeOutcome::Fatal(code) => assert_eq!(code, error_code::HW_DECODE),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert!(dec.queue().is_empty());
    }

    #[test]
    fn audio_gap_fills_missing_pts() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut dec = decoder(MediaType::Audio, EchoCodec::new(MediaType::Audio, log), false);
        let hooks = Hooks::default();
        dec.queue().put(pkt(Some(100)));
        dec.queue().put(pkt(None));

        let first = expect_frame(dec.decode_frame(&hooks));
        assert_eq!(first.pts, Some(100));
        let second = expect_frame(dec.decode_frame(&hooks));
        assert_eq!(second.pts, Some(120));
    }

    #[test]
    fn empty_queue_raises_starvation_then_aborts() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut dec = decoder(MediaType::Audio, EchoCodec::new(MediaType::Audio, log), true);
        let queue = dec.queue().clone();
        let hooks = Arc::new(Hooks::default());
        let handle = {
            let hooks = hooks.clone();
            std::thread::spawn(move || matches!(dec.decode_frame(&*hooks), DecodeOutcome::Aborted))
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        queue.abort();
        assert!(handle.join().unwrap());
        assert_eq!(hooks.starved.load(Ordering::Relaxed), 1);
    }
}
