//! Demux boundary: a media source yields packets and honours seeks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::media::{Packet, StreamInfo};

/// Why [`MediaSource::read_packet`] produced no packet.
#[derive(Debug)]
pub enum ReadError {
    /// Clean end of input.
    Eof,
    /// Nothing available right now; try again shortly.
    Again,
    /// The read was interrupted by [`Interrupt`].
    Exit,
    /// Transport or container failure.
    Io(anyhow::Error),
}

/// Seek window in microseconds; the source lands anywhere inside `min..=max`,
/// preferably at the last keyframe at or before `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekTarget {
    pub min: i64,
    pub target: i64,
    pub max: i64,
    /// Interpret the values as byte offsets.
    pub by_bytes: bool,
}

/// Cooperative cancellation flag handed to blocking source operations.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An opened, demuxable input.
pub trait MediaSource: Send {
    /// Container name, for logs and notifications.
    fn format_name(&self) -> &str;

    fn streams(&self) -> &[StreamInfo];

    /// Reads ahead to fill in stream parameters.
    fn find_stream_info(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError>;

    fn seek(&mut self, target: SeekTarget) -> anyhow::Result<()>;

    /// Total duration in microseconds.
    fn duration_us(&self) -> Option<i64>;

    /// Container start time in microseconds.
    fn start_time_us(&self) -> Option<i64> {
        None
    }

    /// Container bit rate in bits per second, 0 when unknown.
    fn bit_rate(&self) -> u64 {
        0
    }

    /// Live sources that cannot be paced from the reader side.
    fn is_realtime(&self) -> bool {
        false
    }

    /// Timestamps may wrap or jump; prefer byte seeking.
    fn has_discontinuous_timestamps(&self) -> bool {
        false
    }
}

/// Opens sources by URI.
pub trait SourceOpener: Send + Sync {
    fn open(&self, uri: &str, interrupt: Interrupt) -> anyhow::Result<Box<dyn MediaSource>>;
}
