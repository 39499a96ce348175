use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use tenderbft::types::{
    crypto_primitives::Keypair, data_types::Power, validator_set::ValidatorSet,
};

/// Generate `n` random signing keys, sorted in the same order as they appear in a [`ValidatorSet`],
/// so that `signing_keys[i]` is the validator at position `i`.
pub(crate) fn sorted_signing_keys(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    let mut signing_keys: Vec<SigningKey> =
        (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();
    signing_keys.sort_by_key(|signing_key| signing_key.verifying_key().to_bytes());
    signing_keys
}

pub(crate) fn sorted_keypairs(n: usize) -> Vec<Keypair> {
    sorted_signing_keys(n).into_iter().map(Keypair::new).collect()
}

/// A validator set in which every one of `keypairs` has a power of 1.
pub(crate) fn equal_power_validator_set(keypairs: &[Keypair]) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for keypair in keypairs {
        validator_set.put(&keypair.public(), Power::new(1));
    }
    validator_set
}
