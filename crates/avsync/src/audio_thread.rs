//! Audio decode thread: pump → accurate-seek filter → sample queue.

use std::sync::Arc;

use avsync_types::{MediaType, Message};

use crate::accurate_seek::{DropTracker, Verdict};
use crate::decoder::{DecodeOutcome, Decoder};
use crate::frame_queue::FrameMeta;
use crate::state::{Shared, StreamRequest};

pub(crate) fn run(shared: Arc<Shared>, mut decoder: Decoder) {
    let mut tracker = DropTracker::default();
    tracing::debug!(stream = decoder.stream_index(), "audio thread started");

    loop {
        let frame = match decoder.decode_frame(&*shared) {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Finished => continue,
            DecodeOutcome::Aborted => break,
            DecodeOutcome::Fatal(code) => {
                let stream = decoder.stream_index();
                tracing::error!(stream, code, "audio stream failed, closing it");
                shared.post(Message::StreamFatal { stream, code });
                shared.accurate.withdraw(MediaType::Audio);
                shared.request_stream(StreamRequest::Close(stream));
                break;
            }
        };
        let Some(buf) = frame.audio().cloned() else {
            continue;
        };
        shared.stats.frame_decoded();

        // The pump already rescaled audio pts into 1/sample_rate.
        let pts = frame
            .pts
            .filter(|_| buf.sample_rate > 0)
            .map(|ticks| ticks as f64 / f64::from(buf.sample_rate));
        let duration = buf.duration();

        if shared.config.accurate_seek && !shared.seek_pending() {
            let end_us = pts.map(|p| ((p + duration) * 1_000_000.0) as i64);
            let verdict = shared.accurate.filter(
                MediaType::Audio,
                end_us,
                &mut tracker,
                shared.accurate_filter_params(),
                &shared.notifier,
            );
            if verdict == Verdict::Drop {
                continue;
            }
        }

        let Some(slot) = shared.sampq.peek_writable() else {
            break;
        };
        let serial = decoder.pkt_serial();
        slot.commit(
            FrameMeta {
                pts,
                duration,
                pos: frame.pos,
                serial,
            },
            buf,
        );
        if shared.audioq.serial() != serial {
            tracing::trace!(serial, "queued audio from a stale generation");
        }
    }
    decoder.close();
    tracing::debug!(stream = decoder.stream_index(), "audio thread exited");
}
