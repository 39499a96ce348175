/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`SignedMessage`] trait shared by every consensus message.

use super::{
    crypto_primitives::{Signature, Verifier, VerifyingKey},
    data_types::{SignatureBytes, VerifyingKeyBytes},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against a `VerifyingKey`.
pub trait SignedMessage: Clone {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Get the bytes of the verifying key that claims to have produced the signature.
    fn signer(&self) -> VerifyingKeyBytes;

    /// Verify that `signature_bytes` is a signature created by `verifying_key` over `message_bytes`.
    fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        let signature = Signature::from_bytes(&self.signature_bytes().bytes());
        verifying_key
            .verify(&self.message_bytes(), &signature)
            .is_ok()
    }

    /// Verify the signature against the message's own claimed signer. Returns false if the claimed
    /// signer is not a valid Ed25519 point.
    fn is_correctly_self_signed(&self) -> bool {
        match VerifyingKey::from_bytes(&self.signer()) {
            Ok(verifying_key) => self.is_correct(&verifying_key),
            Err(_) => false,
        }
    }
}
