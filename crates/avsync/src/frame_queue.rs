//! Fixed-capacity ring of decoded frames for one stream.
//!
//! One writer (the decode thread) and one reader (refresh loop or audio render) share
//! the ring. With `keep_last` the most recently shown slot stays readable through
//! [`FrameQueue::peek_last`] so an idle refresh can redraw it.
//!
//! Abort is borrowed from the stream's [`PacketQueue`]: once that queue is aborted,
//! blocked writers and readers return `None` after [`FrameQueue::signal`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::packet_queue::PacketQueue;

/// Timing of a queued frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameMeta {
    /// Presentation time in seconds.
    pub pts: Option<f64>,
    /// Nominal display duration in seconds.
    pub duration: f64,
    /// Byte position of the source packet, -1 when unknown.
    pub pos: i64,
    pub serial: u64,
}

/// A frame read out of the queue.
#[derive(Clone, Debug)]
pub struct QueuedFrame<T> {
    pub meta: FrameMeta,
    pub payload: T,
}

struct Slot<T> {
    meta: FrameMeta,
    payload: Option<T>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: bool,
}

impl<T> Inner<T> {
    fn remaining(&self) -> usize {
        self.size - usize::from(self.rindex_shown)
    }

    fn read(&self, offset: usize) -> Option<QueuedFrame<T>>
    where
        T: Clone,
    {
        let idx = (self.rindex + offset) % self.slots.len();
        let slot = &self.slots[idx];
        slot.payload.clone().map(|payload| QueuedFrame {
            meta: slot.meta,
            payload,
        })
    }
}

pub struct FrameQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    max_size: usize,
    keep_last: bool,
    pktq: Arc<PacketQueue>,
}

/// A reserved write slot returned by [`FrameQueue::peek_writable`].
///
/// The slot stays reserved until [`WriteSlot::commit`]; only one writer may hold one.
pub struct WriteSlot<'a, T> {
    queue: &'a FrameQueue<T>,
    index: usize,
}

impl<T: Clone> WriteSlot<'_, T> {
    /// Takes the payload left in this slot by an earlier frame, for reuse.
    pub fn take_payload(&mut self) -> Option<T> {
        self.queue.lock().slots[self.index].payload.take()
    }

    /// Fills the slot and makes it visible to the reader.
    pub fn commit(self, meta: FrameMeta, payload: T) {
        let mut g = self.queue.lock();
        let slot = &mut g.slots[self.index];
        slot.meta = meta;
        slot.payload = Some(payload);
        g.windex = (g.windex + 1) % g.slots.len();
        g.size += 1;
        self.queue.cond.notify_all();
    }
}

impl<T: Clone> FrameQueue<T> {
    pub fn new(name: &'static str, pktq: Arc<PacketQueue>, max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.max(1);
        let slots = (0..max_size)
            .map(|_| Slot {
                meta: FrameMeta::default(),
                payload: None,
            })
            .collect();
        Self {
            name,
            inner: Mutex::new(Inner {
                slots,
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: false,
            }),
            cond: Condvar::new(),
            max_size,
            keep_last,
            pktq,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wakes blocked readers and writers so they can observe an abort.
    pub fn signal(&self) {
        let _g = self.lock();
        self.cond.notify_all();
    }

    /// Waits for a free slot; `None` once the stream is aborted.
    pub fn peek_writable(&self) -> Option<WriteSlot<'_, T>> {
        let mut g = self.lock();
        while g.size >= self.max_size && !self.pktq.is_aborted() {
            g = self.cond.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if self.pktq.is_aborted() {
            return None;
        }
        Some(WriteSlot {
            queue: self,
            index: g.windex,
        })
    }

    /// Waits for an unshown frame; `None` once the stream is aborted.
    pub fn peek_readable(&self) -> Option<QueuedFrame<T>> {
        let mut g = self.lock();
        while g.remaining() == 0 && !self.pktq.is_aborted() {
            g = self.cond.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if self.pktq.is_aborted() {
            return None;
        }
        let shown = usize::from(g.rindex_shown);
        g.read(shown)
    }

    /// First unshown frame, without waiting.
    pub fn peek(&self) -> Option<QueuedFrame<T>> {
        let g = self.lock();
        if g.remaining() == 0 {
            return None;
        }
        g.read(usize::from(g.rindex_shown))
    }

    /// Frame after [`FrameQueue::peek`], without waiting.
    pub fn peek_next(&self) -> Option<QueuedFrame<T>> {
        let g = self.lock();
        if g.remaining() < 2 {
            return None;
        }
        g.read(usize::from(g.rindex_shown) + 1)
    }

    /// Most recently shown frame (or the next one if nothing was shown yet).
    pub fn peek_last(&self) -> Option<QueuedFrame<T>> {
        let g = self.lock();
        if g.size == 0 {
            return None;
        }
        g.read(0)
    }

    /// Advances past the current frame.
    pub fn next(&self) {
        let mut g = self.lock();
        if g.size == 0 {
            return;
        }
        if self.keep_last && !g.rindex_shown {
            g.rindex_shown = true;
            return;
        }
        g.rindex = (g.rindex + 1) % g.slots.len();
        g.size -= 1;
        self.cond.notify_all();
    }

    /// Drops every unshown frame.
    pub fn discard_pending(&self) {
        while self.nb_remaining() > 0 {
            self.next();
        }
    }

    /// Number of frames not yet shown.
    pub fn nb_remaining(&self) -> usize {
        self.lock().remaining()
    }

    pub fn rindex_shown(&self) -> bool {
        self.lock().rindex_shown
    }

    /// Source byte position of the last shown frame if it belongs to the current generation.
    pub fn last_pos(&self) -> Option<i64> {
        let g = self.lock();
        let slot = &g.slots[g.rindex];
        (g.rindex_shown && slot.meta.serial == self.pktq.serial()).then_some(slot.meta.pos)
    }

    /// Empties the ring when the stream is closed, handing back every payload.
    pub fn clear(&self) -> Vec<T> {
        let mut g = self.lock();
        let drained = g.slots.iter_mut().filter_map(|slot| slot.payload.take()).collect();
        g.rindex = 0;
        g.windex = 0;
        g.size = 0;
        g.rindex_shown = false;
        self.cond.notify_all();
        drained
    }
}
