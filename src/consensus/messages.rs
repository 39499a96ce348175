/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged by validators while agreeing on a height.
//!
//! All three message kinds share one sum type, [`ConsensusMessage`]. Every message is signed by its
//! sender over the Borsh encoding of its other fields, see [`SignedMessage`].

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::Keypair,
    data_types::{CryptoHash, Height, Round, SignatureBytes, VerifyingKeyBytes},
    signed_messages::SignedMessage,
};

/// A message broadcast by a validator as part of consensus on one height.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Propose(Propose),
    PreVote(Vote),
    PreCommit(Vote),
}

impl ConsensusMessage {
    pub fn height(&self) -> Height {
        match self {
            ConsensusMessage::Propose(propose) => propose.height,
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote) => vote.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            ConsensusMessage::Propose(propose) => propose.round,
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote) => vote.round,
        }
    }

    /// The validator that signed the message.
    pub fn signer(&self) -> VerifyingKeyBytes {
        match self {
            ConsensusMessage::Propose(propose) => propose.proposer,
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote) => vote.validator,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ConsensusMessage::Propose(_) => MessageKind::Propose,
            ConsensusMessage::PreVote(_) => MessageKind::PreVote,
            ConsensusMessage::PreCommit(_) => MessageKind::PreCommit,
        }
    }

    /// The block the message is about. `None` for nil votes.
    pub fn block_hash(&self) -> Option<CryptoHash> {
        match self {
            ConsensusMessage::Propose(propose) => Some(propose.block_hash),
            ConsensusMessage::PreVote(vote) | ConsensusMessage::PreCommit(vote) => vote.block_hash,
        }
    }
}

impl From<Propose> for ConsensusMessage {
    fn from(propose: Propose) -> Self {
        ConsensusMessage::Propose(propose)
    }
}

impl From<Vote> for ConsensusMessage {
    fn from(vote: Vote) -> Self {
        match vote.kind {
            VoteKind::PreVote => ConsensusMessage::PreVote(vote),
            VoteKind::PreCommit => ConsensusMessage::PreCommit(vote),
        }
    }
}

/// Discriminant of [`ConsensusMessage`], used to key stored messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    Propose,
    PreVote,
    PreCommit,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Propose => write!(f, "Propose"),
            MessageKind::PreVote => write!(f, "PreVote"),
            MessageKind::PreCommit => write!(f, "PreCommit"),
        }
    }
}

/// A proposal of `block` for `round` of `height`, broadcast by the round's proposer.
///
/// `valid_round` is the round in which the proposer saw a two-thirds PreVote quorum for the block,
/// or `None` if the block is a fresh candidate.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Propose {
    pub height: Height,
    pub round: Round,
    pub block_hash: CryptoHash,
    pub block_bytes: Vec<u8>,
    pub valid_round: Option<Round>,
    pub proposer: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl Propose {
    /// Create a `Propose` for `block`, signed by `keypair`.
    pub fn new(
        keypair: &Keypair,
        round: Round,
        block: &Block,
        valid_round: Option<Round>,
    ) -> Propose {
        let proposer = keypair.public_bytes();
        let block_bytes = block.try_to_vec().unwrap();
        let message_bytes = Self::signing_bytes(
            block.height,
            round,
            &block.hash,
            &block_bytes,
            valid_round,
            &proposer,
        );
        Propose {
            height: block.height,
            round,
            block_hash: block.hash,
            block_bytes,
            valid_round,
            proposer,
            signature: keypair.sign(&message_bytes),
        }
    }

    /// Decode the proposed block.
    pub fn block(&self) -> Result<Block, std::io::Error> {
        Block::try_from_slice(&self.block_bytes)
    }

    fn signing_bytes(
        height: Height,
        round: Round,
        block_hash: &CryptoHash,
        block_bytes: &[u8],
        valid_round: Option<Round>,
        proposer: &VerifyingKeyBytes,
    ) -> Vec<u8> {
        (
            height,
            round,
            block_hash,
            block_bytes,
            valid_round,
            proposer,
        )
            .try_to_vec()
            .unwrap()
    }
}

impl SignedMessage for Propose {
    fn message_bytes(&self) -> Vec<u8> {
        Self::signing_bytes(
            self.height,
            self.round,
            &self.block_hash,
            &self.block_bytes,
            self.valid_round,
            &self.proposer,
        )
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer(&self) -> VerifyingKeyBytes {
        self.proposer
    }
}

/// Which of the two voting steps a [`Vote`] belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum VoteKind {
    PreVote,
    PreCommit,
}

impl From<VoteKind> for MessageKind {
    fn from(kind: VoteKind) -> Self {
        match kind {
            VoteKind::PreVote => MessageKind::PreVote,
            VoteKind::PreCommit => MessageKind::PreCommit,
        }
    }
}

/// A validator's PreVote or PreCommit for `block_hash` in `round` of `height`. A `None`
/// `block_hash` is a nil vote.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<CryptoHash>,
    pub validator: VerifyingKeyBytes,
    pub kind: VoteKind,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Create a `Vote` signed by `keypair`.
    pub fn new(
        keypair: &Keypair,
        height: Height,
        round: Round,
        block_hash: Option<CryptoHash>,
        kind: VoteKind,
    ) -> Vote {
        let validator = keypair.public_bytes();
        let message_bytes = (height, round, block_hash, validator, kind)
            .try_to_vec()
            .unwrap();
        Vote {
            height,
            round,
            block_hash,
            validator,
            kind,
            signature: keypair.sign(&message_bytes),
        }
    }

    pub fn is_nil(&self) -> bool {
        self.block_hash.is_none()
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        (
            self.height,
            self.round,
            self.block_hash,
            self.validator,
            self.kind,
        )
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer(&self) -> VerifyingKeyBytes {
        self.validator
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    #[test]
    fn tampered_vote_fails_verification() {
        let keypair = Keypair::new(SigningKey::from_bytes(&[3u8; 32]));
        let vote = Vote::new(
            &keypair,
            Height::new(1),
            Round::new(0),
            Some(CryptoHash::new([9u8; 32])),
            VoteKind::PreVote,
        );
        assert!(vote.is_correctly_self_signed());

        let mut tampered = vote.clone();
        tampered.block_hash = None;
        assert!(!tampered.is_correctly_self_signed());

        let message = ConsensusMessage::from(vote);
        assert_eq!(message.kind(), MessageKind::PreVote);
    }
}
