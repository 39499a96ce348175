/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    block_source::BlockSource,
    chain::Chain,
    consensus::supervisor::{ConsensusContext, ConsensusContextError},
    events::{Event, ReceiveMessageEvent},
    storage::pluggables::KVStore,
};

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for messages and routes them to the
/// [`ConsensusContext`] until it receives a shutdown signal.
///
/// Messages are handled one at a time, in the order the network returns them.
pub(crate) fn start_polling<N, B, C, K>(
    mut network: N,
    consensus_context: ConsensusContext<B, C, K>,
    event_publisher: Option<Sender<Event>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()>
where
    N: Network + 'static,
    B: BlockSource,
    C: Chain,
    K: KVStore,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, message)) = network.recv() {
            if event_publisher.is_some() {
                Event::publish(
                    &event_publisher,
                    Event::ReceiveMessage(ReceiveMessageEvent {
                        timestamp: SystemTime::now(),
                        origin: origin.to_bytes(),
                        message: message.clone(),
                    }),
                );
            }

            match consensus_context.handle_message(message) {
                Ok(_) => (),
                Err(ConsensusContextError::StaleMessage { .. }) => (),
                Err(ConsensusContextError::Disposed) => return,
                Err(err) => log::warn!("Failed to handle message: {}", err),
            }
        } else {
            thread::sleep(Duration::from_millis(1))
        }
    })
}
