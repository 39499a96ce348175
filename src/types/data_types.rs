/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Index of the block that a consensus instance agrees on.
///
/// Height 0 belongs to the genesis block, which is on the chain before consensus starts. The first
/// height decided by consensus is therefore 1.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(u64);

impl Height {
    /// Create a new `Height` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Height`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `Height`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Get the height directly below this one, or `None` if this is the genesis height.
    pub fn prev(&self) -> Option<Height> {
        self.0.checked_sub(1).map(Height)
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Height {
    type Output = Height;
    fn add(self, rhs: u64) -> Self::Output {
        Height::new(self.0.add(rhs))
    }
}

impl AddAssign<u64> for Height {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<Height> for Height {
    type Output = u64;
    fn sub(self, rhs: Height) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Attempt number within a [`Height`]. Starts at 0 and increases by 1 every time a round fails to
/// decide, or jumps ahead when enough validators are seen in a later round.
///
/// Places where a round may be absent (for example, the round a value was locked in before any
/// lock happened) use `Option<Round>`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u32);

impl Round {
    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the initial `Round`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u32` of this `Round`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u32> for Round {
    type Output = Round;
    fn add(self, rhs: u32) -> Self::Output {
        Round(self.0.saturating_add(rhs))
    }
}

/// 32-byte cryptographic hash.
///
/// Block hashes are always SHA256 hashes. The all-zero hash is reserved as the "nil" hash and never
/// identifies a real block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash.
    pub const fn nil() -> Self {
        Self([0u8; 32])
    }

    /// Check whether this is the all-zero hash.
    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SignatureBytes").field(&&self.0[..8]).finish()
    }
}

/// Bytes of an Ed25519 verifying key. Messages carry these rather than
/// [`VerifyingKey`](super::crypto_primitives::VerifyingKey) since the latter does not implement the
/// Borsh traits.
pub type VerifyingKeyBytes = [u8; 32];

/// Arbitrary data provided by a [`BlockSource`](crate::block_source::BlockSource) to be stored in a
/// [`Block`](super::block::Block). Consensus never looks inside it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct Data(Vec<Datum>);

impl Data {
    /// Create a new `Data` wrapping `datum_vec`.
    pub fn new(datum_vec: Vec<Datum>) -> Self {
        Self(datum_vec)
    }

    /// Get a reference to the inner `Vec<Datum>` of this `Data`.
    pub const fn vec(&self) -> &Vec<Datum> {
        &self.0
    }

    /// Get how many `Datum`s are in this `Data`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether this `Data` holds no `Datum`s.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate through the `Datum`s in the order they were provided to [`new`](Self::new).
    pub fn iter(&self) -> std::slice::Iter<'_, Datum> {
        self.0.iter()
    }
}

/// Unit of [`Data`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Datum(Vec<u8>);

impl Datum {
    /// Create a new `Datum` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner `Vec<u8>` of this `Datum`.
    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }
}

/// Weight of a specific validator's votes in consensus decisions.
///
/// The higher the power, the more weight the validator's votes have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` wrapping `int`.
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Power`]s of some validators in a [`ValidatorSet`](super::validator_set::ValidatorSet).
///
/// The inner type is `u128` so that summing up large `Power`s does not overflow.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` wrapping `int`.
    pub fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0.add_assign(rhs.0 as u128)
    }
}

impl Display for TotalPower {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
