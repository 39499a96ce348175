/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cache of the [`BlockCommit`]s of recent heights, persisted in a [`KVStore`].
//!
//! Entries are indexed by a list of their heights, so pruning never has to scan the store. Every
//! update of an entry and of the index is written in one [`WriteBatch`].

use std::fmt::{self, Display, Formatter};

use borsh::BorshSerialize;

use crate::{consensus::types::BlockCommit, types::data_types::Height};

use super::{
    pluggables::{KVGetError, KVSetError, KVStore, Key, WriteBatch},
    variables::{self, concat},
};

pub struct LastCommitStore<K: KVStore> {
    kv_store: K,
}

impl<K: KVStore> LastCommitStore<K> {
    pub fn new(kv_store: K) -> Self {
        Self { kv_store }
    }

    /// Get the commit that decided the block at `height`, if it is cached.
    pub fn get(&self, height: Height) -> Result<Option<BlockCommit>, LastCommitStoreError> {
        Ok(self.kv_store.last_commit(height)?)
    }

    /// Get the heights that have a cached commit, in ascending order.
    pub fn heights(&self) -> Result<Vec<Height>, LastCommitStoreError> {
        Ok(self.kv_store.last_commit_heights()?)
    }

    /// Cache `commit` under its height, replacing any previous entry for that height.
    pub fn put(&mut self, commit: &BlockCommit) -> Result<(), LastCommitStoreError> {
        let mut heights = self.heights()?;
        if let Err(position) = heights.binary_search(&commit.height) {
            heights.insert(position, commit.height);
        }

        let mut wb = K::WriteBatch::new();
        wb.set(
            &concat(&variables::LAST_COMMITS, &commit.height.to_le_bytes()),
            &commit
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastCommit {
                        height: commit.height,
                    },
                    source: err,
                })?,
        );
        Self::set_heights(&mut wb, &heights)?;
        self.kv_store.write(wb);
        Ok(())
    }

    /// Remove the oldest cached commits until at most `max_entries` remain, never removing the
    /// commit of `height - 1`, which the context of `height` still needs. Returns the removed heights.
    pub fn prune(
        &mut self,
        height: Height,
        max_entries: usize,
    ) -> Result<Vec<Height>, LastCommitStoreError> {
        let heights = self.heights()?;
        if heights.len() <= max_entries {
            return Ok(Vec::new());
        }

        let in_use = height.prev();
        let mut excess = heights.len() - max_entries;
        let mut removed = Vec::new();
        let mut remaining = Vec::new();
        for stored in heights {
            if excess > 0 && Some(stored) != in_use {
                removed.push(stored);
                excess -= 1;
            } else {
                remaining.push(stored);
            }
        }

        let mut wb = K::WriteBatch::new();
        for stored in &removed {
            wb.delete(&concat(&variables::LAST_COMMITS, &stored.to_le_bytes()));
        }
        Self::set_heights(&mut wb, &remaining)?;
        self.kv_store.write(wb);
        Ok(removed)
    }

    fn set_heights(wb: &mut K::WriteBatch, heights: &[Height]) -> Result<(), KVSetError> {
        wb.set(
            &variables::LAST_COMMIT_HEIGHTS,
            &heights
                .try_to_vec()
                .map_err(|err| KVSetError::SerializeValueError {
                    key: Key::LastCommitHeights,
                    source: err,
                })?,
        );
        Ok(())
    }
}

#[derive(Debug)]
pub enum LastCommitStoreError {
    KVGetError(KVGetError),
    KVSetError(KVSetError),
}

impl From<KVGetError> for LastCommitStoreError {
    fn from(value: KVGetError) -> Self {
        LastCommitStoreError::KVGetError(value)
    }
}

impl From<KVSetError> for LastCommitStoreError {
    fn from(value: KVSetError) -> Self {
        LastCommitStoreError::KVSetError(value)
    }
}

impl Display for LastCommitStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LastCommitStoreError::KVGetError(err) => write!(f, "{}", err),
            LastCommitStoreError::KVSetError(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for LastCommitStoreError {}
