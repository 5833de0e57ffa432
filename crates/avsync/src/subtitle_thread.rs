//! Subtitle decode thread and the hand-off of decoded events to the subtitle engine.

use std::sync::Arc;

use avsync_types::Message;

use crate::decoder::{DecodeOutcome, Decoder};
use crate::frame_queue::FrameMeta;
use crate::media::{FramePayload, SubtitleEvent};
use crate::state::{Shared, StreamRequest};

pub(crate) fn run(shared: Arc<Shared>, mut decoder: Decoder) {
    tracing::debug!(stream = decoder.stream_index(), "subtitle thread started");
    loop {
        let frame = match decoder.decode_frame(&*shared) {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Finished => continue,
            DecodeOutcome::Aborted => break,
            DecodeOutcome::Fatal(code) => {
                let stream = decoder.stream_index();
                tracing::error!(stream, code, "subtitle stream failed, closing it");
                shared.post(Message::StreamFatal { stream, code });
                shared.request_stream(StreamRequest::Close(stream));
                break;
            }
        };
        let FramePayload::Subtitle(content) = frame.payload else {
            continue;
        };
        let tb = decoder.pkt_timebase();
        let Some(start) = frame.pts.map(|ticks| tb.seconds(ticks)) else {
            tracing::debug!("subtitle event without timestamp skipped");
            continue;
        };
        let duration = tb.seconds(frame.duration);
        let Some(slot) = shared.subpq.peek_writable() else {
            break;
        };
        slot.commit(
            FrameMeta {
                pts: Some(start),
                duration,
                pos: frame.pos,
                serial: decoder.pkt_serial(),
            },
            SubtitleEvent {
                start,
                duration,
                content,
            },
        );
    }
    decoder.close();
    tracing::debug!(stream = decoder.stream_index(), "subtitle thread exited");
}

/// Moves decoded events of the current generation into the subtitle engine.
pub(crate) fn forward_pending(shared: &Shared) {
    let Some(sink) = shared.collab.subtitle_sink.as_ref() else {
        shared.subpq.discard_pending();
        return;
    };
    let serial = shared.subtitleq.serial();
    while let Some(item) = shared.subpq.peek() {
        if item.meta.serial == serial {
            sink.push(item.payload);
        }
        shared.subpq.next();
    }
}

/// Updates the subtitle shown with a frame displayed at `pts`.
pub(crate) fn show_at(shared: &Shared, pts: Option<f64>) {
    let Some(sink) = shared.collab.subtitle_sink.as_ref() else {
        return;
    };
    if !shared.subtitle_stream.is_open() {
        return;
    }
    forward_pending(shared);
    let Some(pts) = pts else {
        return;
    };
    sink.drop_before(pts);
    let visible = sink.visible_at(pts);
    shared.collab.video_sink.show_subtitle(visible.as_ref());
}
