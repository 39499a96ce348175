/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.
//!
//! Broadcasting is split in two. [`SenderHandle::broadcast`] places a message in a bounded queue and
//! returns immediately, so a slow network never stalls the state machine. The broadcaster thread
//! drains the queue into the [`Network`]. When the queue is full, the message is dropped and the
//! caller is told so; consensus recovers from the loss through its timeouts.

use std::{
    fmt::{self, Display, Formatter},
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::consensus::messages::ConsensusMessage;

use super::network::Network;

/// Handle for queueing messages to be broadcast to the [`Network`].
#[derive(Clone)]
pub struct SenderHandle {
    queue: SyncSender<ConsensusMessage>,
}

impl SenderHandle {
    /// Create a handle backed by a queue of `capacity` messages, and the receiving end of that queue.
    pub fn new(capacity: usize) -> (SenderHandle, Receiver<ConsensusMessage>) {
        let (queue, outbox) = mpsc::sync_channel(capacity);
        (SenderHandle { queue }, outbox)
    }

    /// Queue `message` for broadcasting without blocking.
    pub fn broadcast(&self, message: ConsensusMessage) -> Result<(), BroadcastError> {
        self.queue.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => BroadcastError::QueueFull,
            TrySendError::Disconnected(_) => BroadcastError::Disconnected,
        })
    }
}

/// Reasons a message could not be queued for broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    /// The broadcaster has fallen behind and the queue is at capacity.
    QueueFull,

    /// The broadcaster thread is gone.
    Disconnected,
}

impl Display for BroadcastError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::QueueFull => write!(f, "broadcast queue is full"),
            BroadcastError::Disconnected => write!(f, "broadcaster is disconnected"),
        }
    }
}

impl std::error::Error for BroadcastError {}

/// Spawn the broadcaster thread, which drains `outbox` into the `network` until it receives a
/// shutdown signal or every [`SenderHandle`] is dropped.
pub(crate) fn start_broadcasting<N: Network + 'static>(
    mut network: N,
    outbox: Receiver<ConsensusMessage>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match outbox.recv_timeout(Duration::from_millis(10)) {
            Ok(message) => network.broadcast(message),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use crate::{
        consensus::messages::{Vote, VoteKind},
        types::{
            crypto_primitives::Keypair,
            data_types::{Height, Round},
        },
    };

    use super::*;

    fn nil_pre_vote() -> ConsensusMessage {
        let keypair = Keypair::new(SigningKey::from_bytes(&[3u8; 32]));
        Vote::new(
            &keypair,
            Height::new(1),
            Round::new(0),
            None,
            VoteKind::PreVote,
        )
        .into()
    }

    #[test]
    fn full_queue_drops_message() {
        let (sender, outbox) = SenderHandle::new(1);

        assert_eq!(sender.broadcast(nil_pre_vote()), Ok(()));
        assert_eq!(
            sender.broadcast(nil_pre_vote()),
            Err(BroadcastError::QueueFull)
        );

        assert!(outbox.try_recv().is_ok());
        assert!(outbox.try_recv().is_err());
    }

    #[test]
    fn dropped_outbox_disconnects() {
        let (sender, outbox) = SenderHandle::new(4);
        drop(outbox);

        assert_eq!(
            sender.broadcast(nil_pre_vote()),
            Err(BroadcastError::Disconnected)
        );
    }
}
