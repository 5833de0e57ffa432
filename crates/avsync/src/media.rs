//! Plain media units exchanged with the demux and decode collaborators.
//!
//! Payloads are reference counted (`Arc`) so a frame can sit in a queue slot while
//! a sink still holds it, without copying sample or pixel data.

use std::sync::Arc;

use avsync_types::MediaType;

/// Microseconds per second, the unit used for seek positions and container times.
pub const TIME_BASE_US: i64 = 1_000_000;

/// A rational time base (`num / den` seconds per tick).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Microsecond time base.
    pub const MICROS: Rational = Rational::new(1, 1_000_000);

    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    /// Converts `ticks` of this time base to seconds.
    pub fn seconds(self, ticks: i64) -> f64 {
        ticks as f64 * self.to_f64()
    }
}

/// Rescales `value` from time base `from` to time base `to`, rounding to nearest.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if !from.is_valid() || !to.is_valid() {
        return value;
    }
    let mut num = i128::from(value) * i128::from(from.num) * i128::from(to.den);
    let mut den = i128::from(from.den) * i128::from(to.num);
    if den < 0 {
        num = -num;
        den = -den;
    }
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Description of one elementary stream in a source.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub index: usize,
    /// `None` for data streams the engine ignores.
    pub media_type: Option<MediaType>,
    pub time_base: Rational,
    /// First timestamp of the stream in `time_base` units.
    pub start_time: Option<i64>,
    pub avg_frame_rate: Rational,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Cover art carried as a single packet.
    pub attached_pic: Option<Packet>,
}

impl StreamInfo {
    pub fn is_attached_pic(&self) -> bool {
        self.attached_pic.is_some()
    }
}

/// Packet flags set by the demuxer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub key: bool,
    /// Timestamps restart after this packet; stale queued data must be retagged.
    pub discontinuity: bool,
}

/// One compressed unit of a stream.
///
/// A packet with empty `data` is a drain marker: feeding it to a codec asks it to
/// flush out buffered frames.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Duration in stream time base units.
    pub duration: i64,
    /// Byte position in the source, -1 when unknown.
    pub pos: i64,
    pub flags: PacketFlags,
    pub data: Arc<[u8]>,
}

impl Packet {
    /// Drain marker for `stream_index`.
    pub fn null(stream_index: usize) -> Self {
        Self {
            stream_index,
            pos: -1,
            data: Arc::from(Vec::new()),
            ..Default::default()
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Interleaved `f32` PCM.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Arc<[f32]>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / usize::from(self.channels)
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / f64::from(self.sample_rate)
        }
    }
}

/// Pixel layout of a decoded picture, opaque to the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

/// A decoded picture.
#[derive(Clone, Debug)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Sample aspect ratio, `0/1` when unknown.
    pub sar: Rational,
    /// Frame still lives in device memory.
    pub hardware: bool,
    pub data: Arc<[u8]>,
}

/// Content of a subtitle event.
#[derive(Clone, Debug, PartialEq)]
pub enum SubtitleContent {
    Text(String),
    Bitmap {
        width: u32,
        height: u32,
        rgba: Arc<[u8]>,
    },
}

/// A decoded subtitle event with absolute timing in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleEvent {
    pub start: f64,
    pub duration: f64,
    pub content: SubtitleContent,
}

/// Decoded payload of a frame.
#[derive(Clone, Debug)]
pub enum FramePayload {
    Audio(AudioBuffer),
    Video(Picture),
    Subtitle(SubtitleContent),
}

/// A decoded frame as produced by a codec.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Presentation timestamp in the stream's time base.
    pub pts: Option<i64>,
    /// Decode timestamp of the packet the frame came from.
    pub pkt_dts: Option<i64>,
    /// Codec-estimated timestamp.
    pub best_effort_timestamp: Option<i64>,
    /// Display duration in the stream's time base, 0 when unknown.
    pub duration: i64,
    pub pos: i64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn audio(&self) -> Option<&AudioBuffer> {
        match &self.payload {
            FramePayload::Audio(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn picture(&self) -> Option<&Picture> {
        match &self.payload {
            FramePayload::Video(pic) => Some(pic),
            _ => None,
        }
    }
}
