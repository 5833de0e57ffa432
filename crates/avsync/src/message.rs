//! Notification channel from the engine to its host.
//!
//! Posting never blocks: the channel is unbounded and a disconnected receiver simply
//! drops messages.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

pub use avsync_types::Message;

/// Sending half, cloned into every engine thread.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Sender<Message>,
}

/// Receiving half handed to the host.
#[derive(Debug)]
pub struct MessageReceiver {
    rx: Receiver<Message>,
}

pub fn channel() -> (Notifier, MessageReceiver) {
    let (tx, rx) = unbounded();
    (Notifier { tx }, MessageReceiver { rx })
}

impl Notifier {
    pub fn post(&self, msg: Message) {
        tracing::debug!(code = msg.code(), ?msg, "notify");
        let _ = self.tx.send(msg);
    }
}

impl MessageReceiver {
    /// Blocks until the next message, `None` once the engine is gone.
    pub fn recv(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Message, TryRecvError> {
        self.rx.try_recv()
    }

    /// Underlying channel, for `select!` loops.
    pub fn receiver(&self) -> &Receiver<Message> {
        &self.rx
    }
}
