/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait definition for the pluggable chain that decided blocks are appended to.
//!
//! The chain owns the committed history: it stores decided blocks, knows its tip, and knows which
//! validator set runs consensus at each height. Consensus only ever appends to it, one block per
//! height, in order.

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::Block,
    data_types::{CryptoHash, Height},
    validator_set::ValidatorSet,
};

pub trait Chain: Send + 'static {
    /// Append a decided `block`. `block.height` is always `tip().height + 1`.
    fn append(&mut self, block: &Block) -> Result<(), AppendBlockError>;

    /// Get the highest block on the chain. Before consensus starts, this is the genesis block at
    /// height 0.
    fn tip(&self) -> ChainTip;

    /// Get the validators that run consensus on `height`.
    fn validator_set(&self, height: Height) -> ValidatorSet;
}

/// Height and hash of the highest block on a [`Chain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub height: Height,
    pub hash: CryptoHash,
}

/// Enumerates the ways [`Chain::append`] can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendBlockError {
    /// The block does not extend the current tip.
    NotNextHeight { tip: Height, block: Height },

    /// The chain refused the block's contents.
    InvalidBlock { reason: String },

    /// The chain's storage failed.
    Storage { reason: String },
}

impl Display for AppendBlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AppendBlockError::NotNextHeight { tip, block } => {
                write!(f, "block at height {} does not extend tip {}", block, tip)
            }
            AppendBlockError::InvalidBlock { reason } => write!(f, "invalid block: {}", reason),
            AppendBlockError::Storage { reason } => write!(f, "storage failure: {}", reason),
        }
    }
}

impl std::error::Error for AppendBlockError {}
