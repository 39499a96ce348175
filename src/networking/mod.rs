/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! Consensus never talks to the [`Network`](network::Network) directly. Outgoing messages are handed
//! to a bounded queue through a [`SenderHandle`](sending::SenderHandle) and drained by a broadcaster
//! thread, and incoming messages are pulled by a poller thread and routed to the
//! [`ConsensusContext`](crate::consensus::supervisor::ConsensusContext).

pub mod network;

pub(crate) mod receiving;

pub mod sending;
