/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each persisted variable is stored in the user-provided key-value
//! store.
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Last Commits|[`Height`](crate::types::data_types::Height) -> [`BlockCommit`](crate::consensus::types::BlockCommit)|Mapping between a height and the commit that decided the block at that height.|
//! |Last Commit Heights|[`Vec<Height>`]|The heights that currently have an entry in Last Commits, in ascending order.|
//!
//! Mappings are stored at `concat(prefix, key)`, with heights encoded as little-endian `u64`s.
//! Single values are stored directly at their prefix. All values are Borsh-serialized.

pub const LAST_COMMITS: [u8; 1] = [0];
pub const LAST_COMMIT_HEIGHTS: [u8; 1] = [1];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
