use serde::{Deserialize, Serialize};

/// Kind of elementary stream carried by a media source.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Audio,
    Video,
    Subtitle,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Subtitle => "subtitle",
        }
    }
}

/// Which clock is treated as ground truth for presentation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    #[default]
    AudioMaster,
    VideoMaster,
    External,
}

/// Reason why playback ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Natural end of stream/file.
    Eof,
    /// Open, decode, or I/O error interrupted playback.
    Error,
    /// Playback was explicitly stopped by a command.
    Stopped,
}

/// Engine error codes carried by [`Message::Error`] and fatal notifications.
pub mod error_code {
    /// The source could not be opened or probed.
    pub const OPEN_INPUT: i32 = -1;
    /// No audio or video stream could be opened.
    pub const NO_STREAM: i32 = -2;
    /// An I/O error was hit while reading the source.
    pub const IO: i32 = -5;
    /// A codec could not be opened.
    pub const CODEC_OPEN: i32 = -22;
    /// The decoder reported a feature it does not implement.
    pub const UNSUPPORTED: i32 = -38;
    /// Hardware decoding failed past its retry budget.
    pub const HW_DECODE: i32 = -1000;
    /// The audio output device could not be opened.
    pub const AUDIO_OUTPUT: i32 = -1001;
}

/// Warning codes carried by [`Message::Warning`].
pub mod warning_code {
    /// Successive timestamps of one stream jumped by an implausible ratio.
    pub const TIMESTAMP_SALTATION: i32 = 1;
}

/// Notification posted by the engine on its message channel.
///
/// Every variant maps onto a stable numeric `code` plus up to four integer
/// arguments, see [`Message::code`] and [`Message::args`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// The source was opened; `format` names the container.
    OpenInput { format: String },
    /// Stream probing finished.
    FindStreamInfo,
    /// Stream components were opened.
    ComponentOpen,
    /// The engine is ready to play.
    Prepared,
    /// Playback reached the end and is not looping.
    Completed,
    /// A pipeline-fatal error occurred.
    Error { code: i32 },
    /// Playback stalled waiting for data.
    BufferingStart { seek: bool },
    /// Enough data was cached to resume.
    BufferingEnd { seek: bool },
    /// Periodic cache fill report.
    BufferingUpdate { position_ms: i64, percent: i32 },
    /// The source seek finished; `status` is 0 on success.
    SeekComplete { position_ms: i64, status: i32 },
    /// Accurate seek landed (or fell back) at `position_ms`.
    AccurateSeekComplete { position_ms: i64 },
    /// First frame presented after a seek, `elapsed_ms` since the request.
    AfterSeekFirstFrame { elapsed_ms: i64 },
    /// The video codec was opened or switched implementation.
    VideoDecoderOpen { hardware: bool },
    /// A stream was closed after a fatal decode condition.
    StreamFatal { stream: usize, code: i32 },
    VideoDecodedStart,
    AudioDecodedStart,
    VideoRenderingStart,
    AudioRenderingStart,
    /// First audio rendered after a seek.
    AudioSeekRenderingStart { audio_master: bool },
    VideoSizeChanged { width: u32, height: u32 },
    /// Sample aspect ratio of the video stream changed.
    SarChanged { num: i32, den: i32 },
    /// A stream was selected or deselected.
    StreamChanged { stream: usize, selected: bool },
    Warning { code: i32, value: i64 },
    /// The engine paused itself and asks the host to resume it.
    RequestStart,
}

impl Message {
    /// Stable numeric code of the notification.
    pub fn code(&self) -> u32 {
        match self {
            Message::OpenInput { .. } => 1,
            Message::FindStreamInfo => 2,
            Message::ComponentOpen => 3,
            Message::Prepared => 200,
            Message::Completed => 300,
            Message::Error { .. } => 100,
            Message::BufferingStart { .. } => 500,
            Message::BufferingEnd { .. } => 501,
            Message::BufferingUpdate { .. } => 502,
            Message::SeekComplete { .. } => 600,
            Message::AccurateSeekComplete { .. } => 900,
            Message::AfterSeekFirstFrame { .. } => 404,
            Message::VideoDecoderOpen { .. } => 10001,
            Message::StreamFatal { .. } => 10002,
            Message::VideoDecodedStart => 10004,
            Message::AudioDecodedStart => 10003,
            Message::VideoRenderingStart => 402,
            Message::AudioRenderingStart => 403,
            Message::AudioSeekRenderingStart { .. } => 10005,
            Message::VideoSizeChanged { .. } => 400,
            Message::SarChanged { .. } => 401,
            Message::StreamChanged { .. } => 10006,
            Message::Warning { .. } => 10007,
            Message::RequestStart => 10008,
        }
    }

    /// Integer arguments of the notification, zero-padded.
    pub fn args(&self) -> [i64; 4] {
        match self {
            Message::Error { code } => [i64::from(*code), 0, 0, 0],
            Message::BufferingStart { seek } | Message::BufferingEnd { seek } => {
                [i64::from(*seek), 0, 0, 0]
            }
            Message::BufferingUpdate {
                position_ms,
                percent,
            } => [*position_ms, i64::from(*percent), 0, 0],
            Message::SeekComplete {
                position_ms,
                status,
            } => [*position_ms, i64::from(*status), 0, 0],
            Message::AccurateSeekComplete { position_ms } => [*position_ms, 0, 0, 0],
            Message::AfterSeekFirstFrame { elapsed_ms } => [*elapsed_ms, 0, 0, 0],
            Message::VideoDecoderOpen { hardware } => [i64::from(*hardware), 0, 0, 0],
            Message::StreamFatal { stream, code } => [*stream as i64, i64::from(*code), 0, 0],
            Message::AudioSeekRenderingStart { audio_master } => {
                [i64::from(*audio_master), 0, 0, 0]
            }
            Message::VideoSizeChanged { width, height } => {
                [i64::from(*width), i64::from(*height), 0, 0]
            }
            Message::SarChanged { num, den } => [i64::from(*num), i64::from(*den), 0, 0],
            Message::StreamChanged { stream, selected } => {
                [*stream as i64, i64::from(*selected), 0, 0]
            }
            Message::Warning { code, value } => [i64::from(*code), *value, 0, 0],
            _ => [0; 4],
        }
    }
}

/// Property identifiers readable through `get_property`, some also writable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PropertyId {
    AudioCachedDurationMs,
    VideoCachedDurationMs,
    AudioCachedBytes,
    VideoCachedBytes,
    AudioCachedPackets,
    VideoCachedPackets,
    PlayableDurationMs,
    BitRate,
    /// Frames dropped by the decode thread before queueing.
    FrameDropsEarly,
    /// Frames dropped by the presentation pacer.
    FrameDropsLate,
    /// Video clock minus master clock, in milliseconds.
    AvDiffMs,
    /// Writable. Demux backpressure threshold in bytes, 0 for automatic.
    MaxBufferSize,
    /// Writable. Accurate seek timeout in milliseconds.
    AccurateSeekTimeoutMs,
    /// Writable.
    PlaybackRate,
    /// Writable.
    Volume,
    SelectedAudioStream,
    SelectedVideoStream,
    SelectedSubtitleStream,
}

/// Value read from or written to a property.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
}

impl PropertyValue {
    pub fn as_i64(self) -> i64 {
        match self {
            PropertyValue::Int(v) => v,
            PropertyValue::Float(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            PropertyValue::Int(v) => v as f64,
            PropertyValue::Float(v) => v,
        }
    }
}

/// Cache occupancy of one track's packet queue.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackCache {
    /// Queued compressed bytes.
    pub bytes: u64,
    /// Queued packet count.
    pub packets: u64,
    /// Queued duration in milliseconds, 0 when the time base is unknown.
    pub duration_ms: i64,
}

/// Point-in-time snapshot of the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    /// Source currently opened, if any.
    pub uri: Option<String>,
    /// `true` when playback is paused, buffering, or idle.
    pub paused: bool,
    /// `true` while the engine waits for data.
    pub buffering: bool,
    /// Current playback position in milliseconds.
    pub position_ms: Option<i64>,
    /// Total media duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Clock used as presentation ground truth.
    pub master: SyncType,
    /// Index of the selected audio stream.
    pub audio_stream: Option<usize>,
    /// Index of the selected video stream.
    pub video_stream: Option<usize>,
    /// Index of the selected subtitle stream.
    pub subtitle_stream: Option<usize>,
    pub audio_cache: TrackCache,
    pub video_cache: TrackCache,
    /// Container bit rate in bits per second.
    pub bit_rate: u64,
    pub frame_drops_early: u64,
    pub frame_drops_late: u64,
    /// Video clock minus master clock in milliseconds.
    pub av_diff_ms: Option<i64>,
    /// Presented video frames per second, averaged over the last second.
    pub video_fps: f64,
    /// End reason when playback transitions to idle.
    pub end_reason: Option<EndReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_args_pad_to_four() {
        let msg = Message::BufferingUpdate {
            position_ms: 1500,
            percent: 42,
        };
        assert_eq!(msg.code(), 502);
        assert_eq!(msg.args(), [1500, 42, 0, 0]);
        assert_eq!(Message::Prepared.args(), [0; 4]);
    }

    #[test]
    fn message_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Message::BufferingStart { seek: true }).unwrap();
        assert_eq!(json, r#"{"kind":"buffering_start","seek":true}"#);
    }

    #[test]
    fn end_reason_is_snake_case() {
        let json = serde_json::to_string(&EndReason::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
    }

    #[test]
    fn property_value_converts() {
        assert_eq!(PropertyValue::Float(2.7).as_i64(), 2);
        assert_eq!(PropertyValue::Int(3).as_f64(), 3.0);
    }
}
