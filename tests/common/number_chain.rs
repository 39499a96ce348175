//! An in-memory [`Chain`] and a [`BlockSource`] whose blocks carry a single number: the height they
//! were proposed for.

use std::sync::{Arc, Mutex};

use tenderbft::{
    block_source::{BlockSource, InvalidBlock, ProposeBlockError, ProposeCandidateRequest},
    chain::{AppendBlockError, Chain, ChainTip},
    consensus::types::BlockCommit,
    types::{
        block::Block,
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, Data, Datum, Height},
        validator_set::ValidatorSet,
    },
};

/// A chain whose every height is run by the same validator set. Clones share the same blocks, so
/// a test can keep a clone to inspect what consensus appended.
#[derive(Clone)]
pub(crate) struct NumberChain {
    blocks: Arc<Mutex<Vec<Block>>>,
    validator_set: ValidatorSet,
}

impl NumberChain {
    /// Create a chain holding only the genesis block.
    pub(crate) fn new(validator_set: ValidatorSet) -> NumberChain {
        NumberChain {
            blocks: Arc::new(Mutex::new(Vec::new())),
            validator_set,
        }
    }

    /// Get the block at `height`, if it was appended.
    pub(crate) fn block(&self, height: Height) -> Option<Block> {
        let index = height.int().checked_sub(1)?;
        self.blocks.lock().unwrap().get(index as usize).cloned()
    }

    pub(crate) fn height(&self) -> Height {
        self.tip().height
    }

    /// Append blocks without a last commit until the tip is at `height`.
    pub(crate) fn extend_to(&mut self, height: Height) {
        while self.height() < height {
            let block = number_block(self.height() + 1);
            self.append(&block).unwrap();
        }
    }
}

impl Chain for NumberChain {
    fn append(&mut self, block: &Block) -> Result<(), AppendBlockError> {
        let mut blocks = self.blocks.lock().unwrap();
        let tip = Height::new(blocks.len() as u64);
        if block.height != tip + 1 {
            return Err(AppendBlockError::NotNextHeight {
                tip,
                block: block.height,
            });
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn tip(&self) -> ChainTip {
        match self.blocks.lock().unwrap().last() {
            Some(block) => ChainTip {
                height: block.height,
                hash: block.hash,
            },
            None => ChainTip {
                height: Height::new(0),
                hash: CryptoHash::nil(),
            },
        }
    }

    fn validator_set(&self, _: Height) -> ValidatorSet {
        self.validator_set.clone()
    }
}

/// How a [`NumberBlockSource`] responds to consensus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behaviour {
    Honest,

    /// Every call to `propose_candidate` fails.
    FailToPropose,

    /// Every block fails validation.
    RejectAll,
}

pub(crate) struct NumberBlockSource {
    behaviour: Behaviour,
}

impl NumberBlockSource {
    pub(crate) fn new(behaviour: Behaviour) -> NumberBlockSource {
        NumberBlockSource { behaviour }
    }
}

impl BlockSource for NumberBlockSource {
    fn propose_candidate(
        &mut self,
        request: ProposeCandidateRequest,
    ) -> Result<Block, ProposeBlockError> {
        if self.behaviour == Behaviour::FailToPropose {
            return Err(ProposeBlockError::new("mempool unavailable"));
        }

        let data = number_data(request.height);
        Ok(Block::new(
            request.height,
            request.last_commit.cloned(),
            data_hash(&data),
            data,
        ))
    }

    fn validate(&mut self, block: &Block) -> Result<(), InvalidBlock> {
        if self.behaviour == Behaviour::RejectAll {
            return Err(InvalidBlock::new("rejecting every block"));
        }

        let height_datum = Datum::new(block.height.to_le_bytes().to_vec());
        if block.data.vec().first() != Some(&height_datum) {
            return Err(InvalidBlock::new("data does not start with the block's height"));
        }
        if block.data_hash != data_hash(&block.data) {
            return Err(InvalidBlock::new("data hash mismatch"));
        }
        Ok(())
    }
}

/// Build the block a [`NumberBlockSource`] proposes at `height` when there is no last commit.
pub(crate) fn number_block(height: Height) -> Block {
    number_block_with_commit(height, None)
}

/// Build the block a [`NumberBlockSource`] proposes at `height` when handed `last_commit`.
pub(crate) fn number_block_with_commit(height: Height, last_commit: Option<BlockCommit>) -> Block {
    let data = number_data(height);
    Block::new(height, last_commit, data_hash(&data), data)
}

/// Build a valid block at `height` that differs from [`number_block`] and from other salts.
pub(crate) fn salted_block(height: Height, salt: u8) -> Block {
    let data = Data::new(vec![
        Datum::new(height.to_le_bytes().to_vec()),
        Datum::new(vec![salt]),
    ]);
    Block::new(height, None, data_hash(&data), data)
}

fn number_data(height: Height) -> Data {
    Data::new(vec![Datum::new(height.to_le_bytes().to_vec())])
}

fn data_hash(data: &Data) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for datum in data.iter() {
        hasher.update(datum.bytes());
    }
    CryptoHash::new(hasher.finalize().into())
}
