//! Output boundaries: video overlays, the audio device, and the subtitle engine.

use crate::audio_render::AudioRenderer;
use crate::media::{Picture, PixelFormat, SubtitleContent, SubtitleEvent};

/// Opaque handle of an overlay owned by a [`VideoSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub u64);

/// Video presentation surface.
///
/// Overlays are created and filled by the video decode thread and displayed by the
/// refresh thread, so implementations synchronise internally.
pub trait VideoSink: Send + Sync {
    fn create_overlay(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> anyhow::Result<OverlayHandle>;

    fn free_overlay(&self, _overlay: OverlayHandle) {}

    fn lock(&self, _overlay: OverlayHandle) {}

    fn unlock(&self, _overlay: OverlayHandle) {}

    fn fill_from_frame(&self, overlay: OverlayHandle, picture: &Picture) -> anyhow::Result<()>;

    fn display(&self, overlay: OverlayHandle);

    /// Subtitle visible with the frame just displayed, if any.
    fn show_subtitle(&self, _content: Option<&SubtitleContent>) {}
}

/// Sample layout negotiated with the audio device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Platform audio device pulling samples through an [`AudioRenderer`].
pub trait AudioOutput: Send + Sync {
    /// Opens the device and starts pulling from `renderer`; returns the obtained layout.
    fn open(&self, wanted: AudioParams, renderer: AudioRenderer) -> anyhow::Result<AudioParams>;

    fn pause(&self, paused: bool);

    /// Discards samples already handed to the device.
    fn flush(&self) {}

    fn close(&self);

    /// Seconds of audio buffered between the render callback and the speaker.
    fn latency(&self) -> f64 {
        0.0
    }

    /// Applies a time-stretch rate; returns `false` when unsupported.
    fn set_playback_rate(&self, _rate: f32) -> bool {
        false
    }
}

/// External subtitle engine.
pub trait SubtitleSink: Send + Sync {
    fn push(&self, event: SubtitleEvent);

    /// Forgets events that ended before `pts`.
    fn drop_before(&self, pts: f64);

    fn visible_at(&self, pts: f64) -> Option<SubtitleContent>;

    fn flush(&self);
}
