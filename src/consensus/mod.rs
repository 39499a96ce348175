/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Tendermint consensus core.
//!
//! Consensus on a single height runs inside a [`Context`](context::Context): a state machine that
//! moves through rounds, each made of a Propose, a PreVote, and a PreCommit step, until it observes a
//! two-thirds PreCommit quorum for a proposed block and decides it.
//!
//! The [`ConsensusContext`](supervisor::ConsensusContext) supervises the contexts of a replica. It
//! starts the context of the next height once the previous block is committed, routes incoming
//! messages to the context of their height, and disposes of the contexts of finished heights.
//!
//! ## Safety and liveness
//!
//! Safety rests on *locking*. A validator that PreCommits a block in round `r` locks on it, and only
//! PreVotes another block in a later round if that block carries proof (a two-thirds PreVote quorum
//! in a round at or after `r`) that the rest of the network has moved on. Two conflicting blocks can
//! therefore never both gather a PreCommit quorum at the same height, as long as less than a third
//! of the voting power is faulty.
//!
//! Liveness rests on timeouts that grow with the round number, and on skipping ahead to a future
//! round as soon as more than a third of the voting power is observed to be in it.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod context;

pub mod messages;

pub(crate) mod round_store;

pub mod supervisor;

pub mod timeouts;

pub mod types;

/// Acquire `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
