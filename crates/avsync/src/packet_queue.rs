//! Thread-safe FIFO of compressed packets for one stream.
//!
//! Every entry is tagged with the queue's serial at insertion time. A flush or a
//! discontinuity bumps the serial, which marks everything a consumer already holds
//! as stale without any cross-thread cancellation:
//! - demux thread → `put`
//! - decode thread → `get` (blocking)
//! - clocks read the serial lock-free through [`PacketQueue::serial_handle`]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::media::Packet;

/// A packet together with the serial it was queued under.
#[derive(Clone, Debug)]
pub struct QueuedPacket {
    pub packet: Packet,
    pub serial: u64,
}

/// Result of [`PacketQueue::get`].
#[derive(Debug)]
pub enum QueueGet {
    Packet(QueuedPacket),
    /// Non-blocking get on an empty queue.
    Empty,
    /// The queue was aborted; terminal.
    Aborted,
}

/// Occupancy counters of a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets: usize,
    pub bytes: usize,
    /// Sum of packet durations in stream time base units.
    pub duration: i64,
}

struct Inner {
    items: VecDeque<QueuedPacket>,
    bytes: usize,
    duration: i64,
    abort: bool,
}

pub struct PacketQueue {
    name: &'static str,
    inner: Mutex<Inner>,
    cond: Condvar,
    serial: Arc<AtomicU64>,
    aborted: AtomicBool,
}

impl PacketQueue {
    /// Creates an aborted queue; call [`PacketQueue::start`] before use.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                bytes: 0,
                duration: 0,
                abort: true,
            }),
            cond: Condvar::new(),
            serial: Arc::new(AtomicU64::new(0)),
            aborted: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Clears the abort flag and opens a new generation.
    pub fn start(&self) {
        let mut g = self.lock();
        g.abort = false;
        self.aborted.store(false, Ordering::Release);
        let serial = self.serial.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(queue = self.name, serial, "packet queue started");
    }

    /// Sets the abort flag and wakes every waiter.
    pub fn abort(&self) {
        let mut g = self.lock();
        g.abort = true;
        self.aborted.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Appends a packet; returns `false` (dropping it) if the queue is aborted.
    pub fn put(&self, packet: Packet) -> bool {
        let mut g = self.lock();
        if g.abort {
            return false;
        }
        let serial = self.serial.load(Ordering::Acquire);
        g.bytes += packet.size();
        g.duration += packet.duration;
        g.items.push_back(QueuedPacket { packet, serial });
        self.cond.notify_one();
        true
    }

    /// Appends a drain marker for `stream_index`.
    pub fn put_null(&self, stream_index: usize) -> bool {
        self.put(Packet::null(stream_index))
    }

    /// Pops the oldest packet, waiting for one when `block` is set.
    pub fn get(&self, block: bool) -> QueueGet {
        let mut g = self.lock();
        loop {
            if g.abort {
                return QueueGet::Aborted;
            }
            if let Some(item) = g.items.pop_front() {
                g.bytes -= item.packet.size();
                g.duration -= item.packet.duration;
                return QueueGet::Packet(item);
            }
            if !block {
                return QueueGet::Empty;
            }
            g = self.cond.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drops every queued packet and opens a new generation.
    pub fn flush(&self) {
        let mut g = self.lock();
        g.items.clear();
        g.bytes = 0;
        g.duration = 0;
        let serial = self.serial.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(queue = self.name, serial, "packet queue flushed");
    }

    /// Opens a new generation without dropping queued packets.
    ///
    /// Packets queued from now on carry the new serial; the ones already queued keep
    /// their old tag and are discarded by their consumer.
    pub fn bump_serial(&self) -> u64 {
        let _g = self.lock();
        let serial = self.serial.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(queue = self.name, serial, "packet queue discontinuity");
        serial
    }

    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::Acquire)
    }

    /// Shared view of the serial for clocks.
    pub fn serial_handle(&self) -> Arc<AtomicU64> {
        self.serial.clone()
    }

    pub fn stats(&self) -> QueueStats {
        let g = self.lock();
        QueueStats {
            packets: g.items.len(),
            bytes: g.bytes,
            duration: g.duration,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> usize {
        self.lock().bytes
    }

    pub fn duration(&self) -> i64 {
        self.lock().duration
    }
}
