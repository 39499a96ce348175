/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the crate.
//!
//! Types specific to the consensus state machine live in [`crate::consensus::types`] and
//! [`crate::consensus::messages`].

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod signed_messages;

pub mod validator_set;
