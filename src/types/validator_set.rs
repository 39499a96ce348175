/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validator set of a height, its thresholds, and proposer selection.

use std::{collections::HashMap, slice};

use super::{
    crypto_primitives::VerifyingKey,
    data_types::{Height, Power, Round, TotalPower, VerifyingKeyBytes},
};

/// Stores the identities of validators and their voting powers.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// `VerifyingKey`s. Every honest node therefore sees the same order, which is what
/// [`proposer`](Self::proposer) indexes into.
///
/// ## Limits to total power
///
/// Users must make sure that the total power of the validator set does not exceed `u128::MAX/2`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    powers: HashMap<VerifyingKeyBytes, Power>,
}

impl Default for ValidatorSet {
    fn default() -> Self {
        ValidatorSet::new()
    }
}

impl ValidatorSet {
    /// Create an empty validator set.
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
            powers: HashMap::new(),
        }
    }

    /// Put a `validator` with the specified `power` into the validator set, placing them in a position that
    /// preserves the [ordering of validators](Self#ordering-of-validators).
    ///
    /// If `validator` already exists in the validator set, this function updates its power instead.
    pub fn put(&mut self, validator: &VerifyingKey, power: Power) {
        let validator_bytes = validator.to_bytes();
        if let Err(insert_pos) = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            self.validators.insert(insert_pos, *validator);
        }

        self.powers.insert(validator_bytes, power);
    }

    /// Get the power of the validator identified by `validator`, if it is in the validator set.
    pub fn power(&self, validator: &VerifyingKeyBytes) -> Option<Power> {
        self.powers.get(validator).copied()
    }

    /// Get the sum of the powers of all of the validators inside the validator set.
    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for power in self.powers.values() {
            total_power += *power
        }
        total_power
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKeyBytes) -> bool {
        self.powers.contains_key(validator)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get the number of validators currently in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the validator that proposes in `round` of `height`: `validators[(height + round) % len]`.
    ///
    /// Returns `None` if the validator set is empty.
    pub fn proposer(&self, height: Height, round: Round) -> Option<VerifyingKey> {
        if self.is_empty() {
            return None;
        }
        let len = self.validators.len() as u64;
        let index = (height.int() % len + round.int() as u64 % len) % len;
        Some(self.validators[index as usize])
    }

    /// Compute the total power that a set of votes must match or exceed (`>=`) in order to count as a
    /// quorum under the validator set, i.e., strictly more than two-thirds of the total power.
    pub fn quorum(&self) -> TotalPower {
        TotalPower::new(self.total_power().int().saturating_mul(2) / 3 + 1)
    }

    /// Compute the total power that the senders of a future round must match or exceed (`>=`) for a
    /// node to skip to that round, i.e., strictly more than one-third of the total power.
    pub fn skip_threshold(&self) -> TotalPower {
        TotalPower::new(self.total_power().int() / 3 + 1)
    }
}
