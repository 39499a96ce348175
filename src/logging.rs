/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [Vote](crate::events::VoteEvent) is printed:
//!
//! ```text
//! Vote, 1701329264, Id5u7f6, 12, 0, PreCommit, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the voter's public key.
//! - The fourth and fifth values are the height and round of the vote.
//! - The sixth value is the vote kind.
//! - The seventh value is the first seven characters of the Base64 encoding of the hash of the block
//!   voted for, or `nil`.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, types::data_types::CryptoHash};

// Names of each event in PascalCase for printing:
pub const START_HEIGHT: &str = "StartHeight";
pub const START_ROUND: &str = "StartRound";
pub const DECIDE: &str = "Decide";
pub const COMMIT_BLOCK: &str = "CommitBlock";

pub const UPDATE_LOCK: &str = "UpdateLock";
pub const UPDATE_VALID: &str = "UpdateValid";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const BROADCAST_FAILED: &str = "BroadcastFailed";

pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const REJECT_MESSAGE: &str = "RejectMessage";

pub const TIMEOUT: &str = "Timeout";
pub const COLLABORATOR_FAULT: &str = "CollaboratorFault";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartHeightEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_height_event: &StartHeightEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_HEIGHT,
                secs_since_unix_epoch(start_height_event.timestamp),
                start_height_event.height,
                start_height_event.has_last_commit
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.height,
                start_round_event.round,
                first_seven_base64_chars(&start_round_event.proposer)
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.height,
                decide_event.round,
                first_seven_base64_chars(&decide_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateLockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_lock_event: &UpdateLockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_LOCK,
                secs_since_unix_epoch(update_lock_event.timestamp),
                update_lock_event.height,
                update_lock_event.round,
                first_seven_base64_chars(&update_lock_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateValidEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_valid_event: &UpdateValidEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_VALID,
                secs_since_unix_epoch(update_valid_event.timestamp),
                update_valid_event.height,
                update_valid_event.round,
                first_seven_base64_chars(&update_valid_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            let propose = &propose_event.propose;
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose.height,
                propose.round,
                first_seven_base64_chars(&propose.block_hash.bytes()),
                propose
                    .valid_round
                    .map_or(String::from("-1"), |round| round.to_string())
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            let vote = &vote_event.vote;
            log::info!(
                "{}, {}, {}, {}, {}, {:?}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                first_seven_base64_chars(&vote.validator),
                vote.height,
                vote.round,
                vote.kind,
                block_info(&vote.block_hash)
            )
        };
        Box::new(logger)
    }
}

impl Logger for BroadcastFailedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_failed_event: &BroadcastFailedEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}, {:?}",
                BROADCAST_FAILED,
                secs_since_unix_epoch(broadcast_failed_event.timestamp),
                broadcast_failed_event.height,
                broadcast_failed_event.round,
                broadcast_failed_event.kind,
                broadcast_failed_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_message_event: &ReceiveMessageEvent| {
            let message = &receive_message_event.message;
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_MESSAGE,
                secs_since_unix_epoch(receive_message_event.timestamp),
                first_seven_base64_chars(&receive_message_event.origin),
                message.kind(),
                message.height(),
                message.round(),
                block_info(&message.block_hash())
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_message_event: &RejectMessageEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {:?}",
                REJECT_MESSAGE,
                secs_since_unix_epoch(reject_message_event.timestamp),
                first_seven_base64_chars(&reject_message_event.signer),
                reject_message_event.kind,
                reject_message_event.height,
                reject_message_event.round,
                reject_message_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_event: &TimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                TIMEOUT,
                secs_since_unix_epoch(timeout_event.timestamp),
                timeout_event.height,
                timeout_event.round,
                timeout_event.kind,
                timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollaboratorFaultEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collaborator_fault_event: &CollaboratorFaultEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                COLLABORATOR_FAULT,
                secs_since_unix_epoch(collaborator_fault_event.timestamp),
                collaborator_fault_event.height,
                collaborator_fault_event.fault
            )
        };
        Box::new(logger)
    }
}

pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

fn block_info(block_hash: &Option<CryptoHash>) -> String {
    match block_hash {
        Some(hash) => first_seven_base64_chars(&hash.bytes()),
        None => String::from("nil"),
    }
}
