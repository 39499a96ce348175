/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to the consensus state machine: steps, tallies and commits.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    data_types::{CryptoHash, Height, Round, TotalPower, VerifyingKeyBytes},
    signed_messages::SignedMessage,
    validator_set::ValidatorSet,
};

use super::messages::{Vote, VoteKind};

/// Phase within a round.
///
/// `Default` is the state of a [`Context`](super::context::Context) that has not been started yet.
/// `EndCommit` is terminal for the height. Within a round, steps only move forward; starting a new
/// round resets the step to `Propose`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Default,
    Propose,
    PreVote,
    PreCommit,
    EndCommit,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Default => "Default",
            Step::Propose => "Propose",
            Step::PreVote => "PreVote",
            Step::PreCommit => "PreCommit",
            Step::EndCommit => "EndCommit",
        };
        write!(f, "{}", name)
    }
}

/// Which votes to count in a tally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tally {
    /// Every vote, nil or not, regardless of the block.
    Any,
    /// Only nil votes.
    Nil,
    /// Only votes for the given block.
    Block(CryptoHash),
}

impl Tally {
    pub(crate) fn matches(&self, block_hash: &Option<CryptoHash>) -> bool {
        match self {
            Tally::Any => true,
            Tally::Nil => block_hash.is_none(),
            Tally::Block(hash) => block_hash.as_ref() == Some(hash),
        }
    }
}

/// Aggregated PreCommits that finalise `block_hash` at `height`.
///
/// A `BlockCommit` is produced from the votes a node stored for the decided round, attached to the
/// next height's proposal as its `last_commit`, and persisted so that the next height can start
/// after a restart. It may contain nil PreCommits or PreCommits for other blocks; only the ones for
/// `block_hash` count toward the quorum.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockCommit {
    pub height: Height,
    pub round: Round,
    pub block_hash: CryptoHash,
    pub votes: Vec<Vote>,
}

impl BlockCommit {
    /// Check that this commit is valid evidence of finality under `validator_set`.
    pub fn is_correct(&self, validator_set: &ValidatorSet) -> Result<(), InvalidCommit> {
        let mut seen: HashSet<VerifyingKeyBytes> = HashSet::new();
        let mut power = TotalPower::new(0);

        for vote in &self.votes {
            if vote.height != self.height || vote.round != self.round {
                return Err(InvalidCommit::MismatchedVote {
                    validator: vote.validator,
                });
            }
            if vote.kind != VoteKind::PreCommit {
                return Err(InvalidCommit::NotAPreCommit {
                    validator: vote.validator,
                });
            }
            let validator_power = validator_set
                .power(&vote.validator)
                .ok_or(InvalidCommit::UnknownValidator {
                    validator: vote.validator,
                })?;
            if !seen.insert(vote.validator) {
                return Err(InvalidCommit::DuplicateValidator {
                    validator: vote.validator,
                });
            }
            if !vote.is_correctly_self_signed() {
                return Err(InvalidCommit::BadSignature {
                    validator: vote.validator,
                });
            }
            if vote.block_hash == Some(self.block_hash) {
                power += validator_power;
            }
        }

        if power < validator_set.quorum() {
            return Err(InvalidCommit::InsufficientPower {
                collected: power,
                quorum: validator_set.quorum(),
            });
        }

        Ok(())
    }
}

/// Reasons a [`BlockCommit`] fails [`is_correct`](BlockCommit::is_correct).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidCommit {
    /// A vote is for a different height or round than the commit.
    MismatchedVote { validator: VerifyingKeyBytes },

    /// A vote is a PreVote.
    NotAPreCommit { validator: VerifyingKeyBytes },

    /// A vote was cast by a key outside the validator set.
    UnknownValidator { validator: VerifyingKeyBytes },

    /// Two votes come from the same validator.
    DuplicateValidator { validator: VerifyingKeyBytes },

    /// A vote's signature does not verify.
    BadSignature { validator: VerifyingKeyBytes },

    /// The votes for the committed block do not reach a quorum.
    InsufficientPower {
        collected: TotalPower,
        quorum: TotalPower,
    },
}

/// A block decided by a [`Context`](super::context::Context), handed to its supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub height: Height,
    pub round: Round,
    pub block: Block,
}

/// Read-only snapshot of a [`Context`](super::context::Context)'s progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextStatus {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    pub locked_round: Option<Round>,
    pub valid_round: Option<Round>,
}

impl Display for ContextStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let fmt_round = |round: Option<Round>| match round {
            Some(round) => round.int() as i64,
            None => -1,
        };
        write!(
            f,
            "height: {}, round: {}, step: {}, locked_round: {}, valid_round: {}",
            self.height,
            self.round,
            self.step,
            fmt_round(self.locked_round),
            fmt_round(self.valid_round)
        )
    }
}
