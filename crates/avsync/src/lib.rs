//! Audio/video playback synchronization and scheduling engine.
//!
//! A [`Player`] owns one demux thread, one decode thread per open stream, and a
//! refresh thread pacing video against the master clock. Demuxing, decoding, and
//! output are delegated to the collaborators in [`Collaborators`].

pub mod accurate_seek;
pub mod audio_render;
mod audio_thread;
pub mod buffering;
pub mod clock;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod frame_queue;
pub mod media;
pub mod message;
pub mod packet_queue;
mod player;
mod read_thread;
pub mod refresh;
pub mod sink;
pub mod source;
mod state;
pub mod status;
mod subtitle_thread;
mod video_thread;

#[cfg(test)]
pub(crate) mod testing;

pub use audio_render::AudioRenderer;
pub use avsync_types;
pub use avsync_types::{EndReason, EngineStatus, MediaType, Message, PropertyId, PropertyValue, SyncType};
pub use codec::{Codec, CodecError, CodecFactory, ReceiveStatus, SendStatus};
pub use config::{EngineConfig, ReorderPolicy};
pub use media::{AudioBuffer, Frame, FramePayload, Packet, PacketFlags, Picture, PixelFormat, Rational, StreamInfo, SubtitleContent, SubtitleEvent};
pub use message::MessageReceiver;
pub use player::Player;
pub use sink::{AudioOutput, AudioParams, OverlayHandle, SubtitleSink, VideoSink};
pub use source::{Interrupt, MediaSource, ReadError, SeekTarget, SourceOpener};
pub use state::Collaborators;
pub use video_thread::VideoPicture;
