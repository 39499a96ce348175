/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::consensus::types::BlockCommit;

use super::{
    crypto_primitives::{CryptoHasher, Digest},
    data_types::{CryptoHash, Data, Height},
};

/// The unit that consensus agrees on, one per [`Height`].
///
/// `last_commit` carries the aggregated PreCommits that finalised the block at `height - 1`. It is
/// `None` for the first height after genesis only; validators treat any other block without one as
/// invalid.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: Height,
    pub hash: CryptoHash,
    pub last_commit: Option<BlockCommit>,
    pub data_hash: CryptoHash,
    pub data: Data,
}

impl Block {
    /// Create a new `Block`, computing its hash from the other fields.
    pub fn new(
        height: Height,
        last_commit: Option<BlockCommit>,
        data_hash: CryptoHash,
        data: Data,
    ) -> Block {
        Block {
            height,
            hash: Block::hash(height, &last_commit, &data_hash),
            last_commit,
            data_hash,
            data,
        }
    }

    /// Compute the SHA256 hash over the height, last commit and data hash of a block.
    pub fn hash(
        height: Height,
        last_commit: &Option<BlockCommit>,
        data_hash: &CryptoHash,
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(height.to_le_bytes());
        hasher.update(last_commit.try_to_vec().unwrap());
        hasher.update(data_hash.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Check whether the stored `hash` matches the block's contents.
    pub fn is_correct(&self) -> bool {
        self.hash == Block::hash(self.height, &self.last_commit, &self.data_hash)
    }
}
