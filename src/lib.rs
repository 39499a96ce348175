/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Tendermint Byzantine fault tolerant consensus algorithm.
//!
//! A set of validators, each holding some voting power, agrees on one block per height. Agreement on
//! a height proceeds in rounds. In each round a designated proposer broadcasts a block, validators
//! PreVote and then PreCommit it, and the block is decided once validators holding more than two
//! thirds of the voting power PreCommit it. Safety holds as long as less than a third of the voting
//! power is faulty; liveness additionally needs the network to eventually deliver messages within the
//! round timeouts.
//!
//! ## Using the crate
//!
//! The library user provides four pluggable collaborators:
//! 1. A [`BlockSource`](block_source::BlockSource) that proposes and validates block contents.
//! 2. A [`Chain`](chain::Chain) that decided blocks are appended to, and that knows the validator set
//!    of every height.
//! 3. A [`Network`](networking::network::Network) that broadcasts and receives consensus messages.
//! 4. A [`KVStore`](storage::pluggables::KVStore) that persists the commits of recent heights.
//!
//! and then builds and starts a [replica](replica).
//!
//! ## Crate structure
//!
//! - [`consensus`]: the per-height state machine and its supervisor.
//! - [`types`]: blocks, validator sets, and primitive types.
//! - [`networking`], [`storage`]: the transport and persistence seams.
//! - [`events`], [`logging`]: observability.

pub mod block_source;

pub mod chain;

pub mod consensus;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod networking;

pub mod replica;

pub mod storage;

pub mod types;
