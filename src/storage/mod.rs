/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence of the state a replica needs to resume consensus after a restart.
//!
//! The only state consensus persists on its own is the *last commit* of recent heights: the
//! PreCommits that decided each block. The next height's proposal carries the previous height's
//! last commit, so a replica restarting at height `h` must be able to read the commit of `h - 1`
//! even though the context that produced it is gone. Blocks themselves live in the
//! [`Chain`](crate::chain::Chain).

pub mod last_commits;

pub mod pluggables;

pub(crate) mod variables;
