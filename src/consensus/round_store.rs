/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-round storage of the consensus messages received for one height.
//!
//! The store is append-only. Each validator contributes at most one message per `(round, kind)`:
//! repeating a message is a no-op, and sending a different message under the same key is treated as
//! equivocation and dropped, so that no validator's power is ever counted twice toward a threshold.
//!
//! Readers take a [`RoundMessages`] snapshot of one round and evaluate their predicates on it, so a
//! concurrent insert never tears a read.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use crate::types::{
    block::Block,
    data_types::{Round, TotalPower, VerifyingKeyBytes},
    validator_set::ValidatorSet,
};

use super::{
    lock,
    messages::{Propose, Vote, VoteKind},
    types::Tally,
};

/// A structurally valid proposal together with its decoded block and the block source's verdict
/// on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Proposal {
    pub(crate) propose: Propose,
    pub(crate) block: Block,
    pub(crate) is_valid: bool,
}

/// Result of inserting a message into a [`RoundStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    Duplicate,
    Equivocation,
}

/// Messages stored for a single round.
#[derive(Clone, Debug, Default)]
pub(crate) struct RoundMessages {
    proposal: Option<Proposal>,
    pre_votes: BTreeMap<VerifyingKeyBytes, Vote>,
    pre_commits: BTreeMap<VerifyingKeyBytes, Vote>,
}

impl RoundMessages {
    pub(crate) fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    pub(crate) fn votes(&self, kind: VoteKind) -> impl Iterator<Item = &Vote> {
        match kind {
            VoteKind::PreVote => self.pre_votes.values(),
            VoteKind::PreCommit => self.pre_commits.values(),
        }
    }

    /// Sum the power of the validators whose `kind` votes match `tally`.
    pub(crate) fn vote_power(
        &self,
        kind: VoteKind,
        tally: Tally,
        validator_set: &ValidatorSet,
    ) -> TotalPower {
        let mut power = TotalPower::new(0);
        for vote in self.votes(kind).filter(|vote| tally.matches(&vote.block_hash)) {
            if let Some(validator_power) = validator_set.power(&vote.validator) {
                power += validator_power;
            }
        }
        power
    }

    /// Check whether the `kind` votes matching `tally` reach a quorum.
    pub(crate) fn has_quorum(
        &self,
        kind: VoteKind,
        tally: Tally,
        validator_set: &ValidatorSet,
    ) -> bool {
        self.vote_power(kind, tally, validator_set) >= validator_set.quorum()
    }

    /// Sum the power of the distinct validators that sent any message in this round.
    pub(crate) fn sender_power(&self, validator_set: &ValidatorSet) -> TotalPower {
        let mut senders: BTreeSet<VerifyingKeyBytes> = BTreeSet::new();
        if let Some(proposal) = &self.proposal {
            senders.insert(proposal.propose.proposer);
        }
        senders.extend(self.pre_votes.keys().copied());
        senders.extend(self.pre_commits.keys().copied());

        let mut power = TotalPower::new(0);
        for sender in senders {
            if let Some(validator_power) = validator_set.power(&sender) {
                power += validator_power;
            }
        }
        power
    }
}

/// Thread-safe, append-only mapping from round to the messages received in that round.
#[derive(Debug, Default)]
pub(crate) struct RoundStore {
    rounds: Mutex<BTreeMap<Round, RoundMessages>>,
}

impl RoundStore {
    pub(crate) fn new() -> RoundStore {
        RoundStore {
            rounds: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn insert_proposal(
        &self,
        propose: Propose,
        block: Block,
        is_valid: bool,
    ) -> InsertOutcome {
        let mut rounds = lock(&self.rounds);
        let round = rounds.entry(propose.round).or_default();
        if let Some(existing) = &round.proposal {
            return if existing.propose == propose {
                InsertOutcome::Duplicate
            } else {
                InsertOutcome::Equivocation
            };
        }
        round.proposal = Some(Proposal {
            propose,
            block,
            is_valid,
        });
        InsertOutcome::Inserted
    }

    pub(crate) fn insert_vote(&self, vote: Vote) -> InsertOutcome {
        let mut rounds = lock(&self.rounds);
        let round = rounds.entry(vote.round).or_default();
        let votes = match vote.kind {
            VoteKind::PreVote => &mut round.pre_votes,
            VoteKind::PreCommit => &mut round.pre_commits,
        };
        if let Some(existing) = votes.get(&vote.validator) {
            return if *existing == vote {
                InsertOutcome::Duplicate
            } else {
                InsertOutcome::Equivocation
            };
        }
        votes.insert(vote.validator, vote);
        InsertOutcome::Inserted
    }

    /// Get the proposal stored for `round`, if any.
    pub(crate) fn proposal(&self, round: Round) -> Option<Propose> {
        lock(&self.rounds)
            .get(&round)
            .and_then(|round| round.proposal.as_ref())
            .map(|proposal| proposal.propose.clone())
    }

    /// Clone the messages stored for `round`. Empty if nothing was received for it.
    pub(crate) fn snapshot(&self, round: Round) -> RoundMessages {
        lock(&self.rounds).get(&round).cloned().unwrap_or_default()
    }

    /// Get the rounds strictly above `round` that hold at least one message, in ascending order.
    pub(crate) fn rounds_above(&self, round: Round) -> Vec<Round> {
        lock(&self.rounds)
            .range((std::ops::Bound::Excluded(round), std::ops::Bound::Unbounded))
            .map(|(round, _)| *round)
            .collect()
    }
}
