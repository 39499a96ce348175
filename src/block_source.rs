/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definitions for the pluggable producer and validator of block contents.
//!
//! Consensus decides *which* block is final at each height. *What* goes into a block, and whether a
//! block's contents are acceptable, is decided by the library user's implementation of
//! [`BlockSource`].
//!
//! ## Determinism
//!
//! `validate` must be deterministic: every honest replica must reach the same verdict on the same
//! block, otherwise honest replicas may split their PreVotes and fail to reach a quorum.
//!
//! ## Timing
//!
//! `propose_candidate` may take a while (for example, to execute transactions). Consensus calls it
//! outside of its internal locks and discards the result if the round moved on in the meantime.
//! Implementations should still return well within the Propose timeout, or the round will fail.

use std::fmt::{self, Display, Formatter};

use crate::{
    consensus::types::BlockCommit,
    types::{
        block::Block,
        data_types::{Height, Round},
    },
};

pub trait BlockSource: Send + 'static {
    /// Called when this replica proposes in `request.round` of `request.height` and has no valid
    /// value from an earlier round to re-propose.
    ///
    /// The returned block must have `request.height` as its height, and should carry
    /// `request.last_commit` as its `last_commit`.
    fn propose_candidate(
        &mut self,
        request: ProposeCandidateRequest,
    ) -> Result<Block, ProposeBlockError>;

    /// Called once for every structurally valid proposal this replica receives, including its own,
    /// after the block's last commit was checked against the previous height's validator set.
    fn validate(&mut self, block: &Block) -> Result<(), InvalidBlock>;
}

/// Arguments of [`BlockSource::propose_candidate`].
pub struct ProposeCandidateRequest<'a> {
    pub height: Height,
    pub round: Round,
    pub last_commit: Option<&'a BlockCommit>,
}

/// The block source could not produce a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeBlockError {
    pub reason: String,
}

impl ProposeBlockError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Display for ProposeBlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not propose a block: {}", self.reason)
    }
}

impl std::error::Error for ProposeBlockError {}

/// The block source rejected a proposed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBlock {
    pub reason: String,
}

impl InvalidBlock {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Display for InvalidBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block: {}", self.reason)
    }
}

impl std::error::Error for InvalidBlock {}
