// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process channel pair for host-based testing
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - loopback_pair(): two connected `LoopbackChannel` ends
//!   - LoopbackChannel::recv_timeout(): bounded wait used by tests
//!
//! INVARIANTS:
//!   - Frames (bytes and handles) arrive whole and in order
//!   - Dropping one end surfaces `IpcError::PeerClosed` on the other
//!
//! DEPENDENCIES:
//!   - std::sync::mpsc: frame queues
//!   - parking_lot::Mutex: makes the receiver shareable behind `&self`

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use crate::channel::{Channel, Frame};
use crate::{IpcError, Result};

/// Creates two connected in-memory channel ends.
pub fn loopback_pair() -> (LoopbackChannel, LoopbackChannel) {
    let (a_tx, a_rx) = mpsc::channel::<Frame>();
    let (b_tx, b_rx) = mpsc::channel::<Frame>();
    (LoopbackChannel::new(a_tx, b_rx), LoopbackChannel::new(b_tx, a_rx))
}

/// One end of an in-process channel.
pub struct LoopbackChannel {
    tx: Sender<Frame>,
    rx: Mutex<Receiver<Frame>>,
}

impl LoopbackChannel {
    fn new(tx: Sender<Frame>, rx: Receiver<Frame>) -> Self {
        Self { tx, rx: Mutex::new(rx) }
    }

    /// Like [`Channel::recv`] but gives up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame> {
        self.rx.lock().recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => IpcError::Timeout,
            RecvTimeoutError::Disconnected => IpcError::PeerClosed,
        })
    }
}

impl Channel for LoopbackChannel {
    fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| IpcError::PeerClosed)
    }

    fn recv(&self) -> Result<Frame> {
        self.rx.lock().recv().map_err(|_| IpcError::PeerClosed)
    }
}
