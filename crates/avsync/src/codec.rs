//! Decode library boundary.
//!
//! The engine never decodes bit streams itself; it drives a [`Codec`] through the
//! send/receive protocol and interprets the typed status values below.

use crate::media::{Frame, Packet, StreamInfo};

/// Codec failure classes the decoder pump distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Malformed input; the packet is skipped.
    InvalidData,
    /// The bit stream uses a feature the codec does not implement.
    Unsupported,
    /// Hardware decode session failed.
    Hardware,
    /// Any other failure, with a codec specific code.
    Other(i32),
}

/// Outcome of [`Codec::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    Accepted,
    /// Output must be drained with [`Codec::receive`] before more input fits.
    Again,
    Error(CodecError),
}

/// Outcome of [`Codec::receive`].
#[derive(Debug)]
pub enum ReceiveStatus {
    Frame(Frame),
    /// More input is needed.
    Again,
    /// Fully drained after a drain marker.
    Eof,
    Error(CodecError),
}

/// An opened decoder for one stream.
pub trait Codec: Send {
    /// Feeds a packet; a null packet starts draining.
    fn send(&mut self, packet: &Packet) -> SendStatus;

    fn receive(&mut self) -> ReceiveStatus;

    /// Drops internal state so decoding can restart at a new position.
    fn flush(&mut self);

    fn close(&mut self) {}

    /// Whether frames come out in device memory.
    fn is_hardware(&self) -> bool {
        false
    }

    /// Copies a device-memory frame into system memory.
    fn transfer_hw_frame(&mut self, frame: Frame) -> anyhow::Result<Frame> {
        Ok(frame)
    }
}

/// Opens codecs for streams.
pub trait CodecFactory: Send + Sync {
    fn open(&self, stream: &StreamInfo) -> anyhow::Result<Box<dyn Codec>>;
}
