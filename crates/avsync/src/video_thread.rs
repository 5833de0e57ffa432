//! Video decode thread: pulls pictures from the pump, applies early drop and the
//! accurate-seek filter, and uploads survivors into sink overlays.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use avsync_types::{MediaType, Message, SyncType};

use crate::accurate_seek::{DropTracker, Verdict};
use crate::decoder::{DecodeOutcome, Decoder};
use crate::frame_queue::FrameMeta;
use crate::media::{Frame, Picture, PixelFormat, Rational};
use crate::sink::OverlayHandle;
use crate::state::{Shared, StreamRequest};

/// A queued picture: the overlay holding its pixels plus its geometry.
#[derive(Clone, Debug)]
pub struct VideoPicture {
    /// `None` when the sink could not allocate an overlay.
    pub overlay: Option<OverlayHandle>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sar: Rational,
}

struct VideoWorker {
    shared: Arc<Shared>,
    frame_duration: f64,
    tracker: DropTracker,
    continuous_drops: u32,
    last_size: Option<(u32, u32)>,
    last_sar: Option<Rational>,
}

pub(crate) fn run(shared: Arc<Shared>, mut decoder: Decoder, frame_rate: Rational) {
    let frame_duration = if frame_rate.num > 0 && frame_rate.den > 0 {
        f64::from(frame_rate.den) / f64::from(frame_rate.num)
    } else {
        0.0
    };
    let mut worker = VideoWorker {
        shared,
        frame_duration,
        tracker: DropTracker::default(),
        continuous_drops: 0,
        last_size: None,
        last_sar: None,
    };
    tracing::debug!(stream = decoder.stream_index(), "video thread started");

    loop {
        match decoder.decode_frame(&*worker.shared) {
            DecodeOutcome::Frame(frame) => {
                if !worker.handle_frame(&decoder, frame) {
                    break;
                }
            }
            DecodeOutcome::Finished => continue,
            DecodeOutcome::Aborted => break,
            DecodeOutcome::Fatal(code) => {
                let stream = decoder.stream_index();
                tracing::error!(stream, code, "video stream failed, closing it");
                worker.shared.post(Message::StreamFatal { stream, code });
                worker.shared.accurate.withdraw(MediaType::Video);
                worker.shared.request_stream(StreamRequest::Close(stream));
                break;
            }
        }
    }
    decoder.close();
    tracing::debug!(stream = decoder.stream_index(), "video thread exited");
}

impl VideoWorker {
    /// Returns `false` once the picture queue is aborted.
    fn handle_frame(&mut self, decoder: &Decoder, frame: Frame) -> bool {
        let shared = self.shared.clone();
        shared.stats.frame_decoded();
        let serial = decoder.pkt_serial();
        let pts = frame.pts.map(|ticks| decoder.pkt_timebase().seconds(ticks));

        if self.should_drop_early(pts, serial) {
            shared.stats.frame_drops_early.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(?pts, "video frame dropped early");
            return true;
        }

        if shared.config.accurate_seek && !shared.seek_pending() {
            let ts_us = pts.map(|p| (p * 1_000_000.0) as i64);
            let verdict = shared.accurate.filter(
                MediaType::Video,
                ts_us,
                &mut self.tracker,
                shared.accurate_filter_params(),
                &shared.notifier,
            );
            if verdict == Verdict::Drop {
                return true;
            }
        }

        let Some(picture) = frame.picture().cloned() else {
            return true;
        };
        let duration = if self.frame_duration > 0.0 {
            self.frame_duration
        } else {
            decoder.pkt_timebase().seconds(frame.duration)
        };
        self.queue_picture(
            &picture,
            FrameMeta {
                pts,
                duration,
                pos: frame.pos,
                serial,
            },
        )
    }

    fn should_drop_early(&mut self, pts: Option<f64>, serial: u64) -> bool {
        let shared = &*self.shared;
        let framedrop = shared.config.framedrop;
        if framedrop == 0 || shared.master_sync_type() == SyncType::VideoMaster {
            return false;
        }
        if shared.play().step_on_seeking {
            return false;
        }
        let (Some(pts), Some(master)) = (pts, shared.master_clock()) else {
            return false;
        };
        let diff = pts - master;
        let late = diff.is_finite()
            && diff.abs() < shared.config.nosync_threshold
            && diff < 0.0
            && serial == shared.vidclk.serial()
            && !shared.videoq.is_empty();
        if !late {
            return false;
        }
        self.continuous_drops += 1;
        if self.continuous_drops > framedrop {
            self.continuous_drops = 0;
            return false;
        }
        true
    }

    fn queue_picture(&mut self, picture: &Picture, meta: FrameMeta) -> bool {
        let shared = &*self.shared;
        let Some(mut slot) = shared.pictq.peek_writable() else {
            return false;
        };
        let sink = &shared.collab.video_sink;

        let reusable = slot.take_payload().and_then(|old| {
            let same = old.width == picture.width
                && old.height == picture.height
                && old.format == picture.format;
            match old.overlay {
                Some(handle) if same => Some(handle),
                Some(handle) => {
                    sink.free_overlay(handle);
                    None
                }
                None => None,
            }
        });
        let overlay = match reusable {
            Some(handle) => Some(handle),
            None => match sink.create_overlay(picture.width, picture.height, picture.format) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(
                        width = picture.width,
                        height = picture.height,
                        "overlay allocation failed: {e:#}"
                    );
                    None
                }
            },
        };

        if let Some(handle) = overlay {
            sink.lock(handle);
            if let Err(e) = sink.fill_from_frame(handle, picture) {
                tracing::warn!("overlay upload failed: {e:#}");
            }
            sink.unlock(handle);
        }

        if self.last_size != Some((picture.width, picture.height)) {
            self.last_size = Some((picture.width, picture.height));
            shared.post(Message::VideoSizeChanged {
                width: picture.width,
                height: picture.height,
            });
        }
        if picture.sar.num > 0 && self.last_sar != Some(picture.sar) {
            self.last_sar = Some(picture.sar);
            shared.post(Message::SarChanged {
                num: picture.sar.num,
                den: picture.sar.den,
            });
        }

        slot.commit(
            meta,
            VideoPicture {
                overlay,
                width: picture.width,
                height: picture.height,
                format: picture.format,
                sar: picture.sar,
            },
        );

        if meta.serial == shared.videoq.serial()
            && shared
                .milestones
                .after_seek_frame
                .swap(false, Ordering::AcqRel)
        {
            let elapsed_ms = shared.milestones.elapsed_since_seek_ms();
            tracing::info!(elapsed_ms, "first frame after seek decoded");
            shared.post(Message::AfterSeekFirstFrame { elapsed_ms });
        }
        true
    }
}
