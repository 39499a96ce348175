/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of consensus state.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::{consensus::types::BlockCommit, types::data_types::Height};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn last_commit(&self, height: Height) -> Result<Option<BlockCommit>, KVGetError> {
        let key = concat(&variables::LAST_COMMITS, &height.to_le_bytes());
        if let Some(bytes) = self.get(&key) {
            Ok(Some(BlockCommit::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::LastCommit { height },
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    fn last_commit_heights(&self) -> Result<Vec<Height>, KVGetError> {
        if let Some(bytes) = self.get(&variables::LAST_COMMIT_HEIGHTS) {
            Vec::<Height>::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::LastCommitHeights,
                    source: err,
                }
            })
        } else {
            Ok(Vec::new())
        }
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError {
        key: Key,
        source: std::io::Error,
    },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "could not deserialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVGetError {}

/// Error when trying to serialize a value before writing it to the [key value store][KVStore].
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError {
        key: Key,
        source: std::io::Error,
    },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "could not serialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVSetError {}

#[derive(Debug)]
pub enum Key {
    LastCommit { height: Height },
    LastCommitHeights,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::LastCommit { height } => write!(f, "Last Commit for height {}", height),
            Key::LastCommitHeights => write!(f, "Last Commit Heights"),
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
