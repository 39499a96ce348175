/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use ed25519_dalek::VerifyingKey;

use crate::{consensus::messages::ConsensusMessage, types::validator_set::ValidatorSet};

pub trait Network: Clone + Send {
    /// Inform the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers (including listeners) without blocking. Delivery is best effort:
    /// consensus tolerates lost messages through its timeouts.
    fn broadcast(&mut self, message: ConsensusMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, ConsensusMessage)>;
}
