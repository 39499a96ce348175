/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted while a replica runs consensus, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published
//! into a channel and dispatched to user-registered handlers by the [event bus](crate::event_bus)
//! thread, so handlers never run on the consensus threads.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    consensus::{
        context::MessageRejection,
        messages::{ConsensusMessage, MessageKind, Propose, Vote},
        timeouts::TimeoutKind,
    },
    networking::sending::BroadcastError,
    types::data_types::{CryptoHash, Height, Round, VerifyingKeyBytes},
};

pub enum Event {
    // Events that start or finish a unit of consensus.
    StartHeight(StartHeightEvent),
    StartRound(StartRoundEvent),
    Decide(DecideEvent),
    CommitBlock(CommitBlockEvent),
    // Events that update the safety state of a height.
    UpdateLock(UpdateLockEvent),
    UpdateValid(UpdateValidEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    BroadcastFailed(BroadcastFailedEvent),
    // Events that involve receiving a consensus message.
    ReceiveMessage(ReceiveMessageEvent),
    RejectMessage(RejectMessageEvent),
    // Timer and collaborator events.
    Timeout(TimeoutEvent),
    CollaboratorFault(CollaboratorFaultEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// A replica started running consensus on `height`.
pub struct StartHeightEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub has_last_commit: bool,
}

/// A replica entered `round` of `height`, in which `proposer` proposes.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub proposer: VerifyingKeyBytes,
}

/// A replica saw a two-thirds PreCommit quorum for `block` and decided it for `height`.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

/// A decided block was appended to the chain.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub block: CryptoHash,
}

/// A replica locked on `block` in `round`.
pub struct UpdateLockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

/// A replica saw a two-thirds PreVote quorum for `block` in `round`.
pub struct UpdateValidEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block: CryptoHash,
}

/// A replica broadcast a proposal.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub propose: Propose,
}

/// A replica broadcast a PreVote or a PreCommit.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

/// A message could not be handed to the broadcaster.
pub struct BroadcastFailedEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub kind: MessageKind,
    pub error: BroadcastError,
}

/// A replica received a message from `origin`.
pub struct ReceiveMessageEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKeyBytes,
    pub message: ConsensusMessage,
}

/// A message failed validation and was dropped.
pub struct RejectMessageEvent {
    pub timestamp: SystemTime,
    pub signer: VerifyingKeyBytes,
    pub height: Height,
    pub round: Round,
    pub kind: MessageKind,
    pub reason: MessageRejection,
}

/// A `kind` timeout of `round` expired while the replica was still in the step it guards.
pub struct TimeoutEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub kind: TimeoutKind,
    pub timeout: Duration,
}

/// The block source or the chain failed.
pub struct CollaboratorFaultEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub fault: String,
}
