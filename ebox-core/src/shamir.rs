//! Shamir share container and split/combine over the configuration key.
//!
//! The 32-byte configuration key is split over GF(256) with a 1-based share
//! index; any `threshold` of the resulting shares reconstruct it. Share
//! values are zeroized on drop.

use rand::rngs::OsRng;
use sharks::{Share, Sharks};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};
use crate::format::{KEY_SIZE, SHARE_SIZE};

/// A single Shamir share: a 1-based index and a 32-byte value.
///
/// The value is zeroized when the share is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    index: u8,
    value: [u8; KEY_SIZE],
}

impl KeyShare {
    /// Returns the 1-based share index.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Returns the 32-byte share value.
    #[must_use]
    pub const fn value(&self) -> &[u8; KEY_SIZE] {
        &self.value
    }

    /// Encodes the share as its 33-byte wire form (index ‖ value).
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(SHARE_SIZE));
        bytes.push(self.index);
        bytes.extend_from_slice(&self.value);
        bytes
    }

    /// Decodes a share from its 33-byte wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadLength`] if the input is not exactly 33 bytes or
    /// the index byte is zero (share indices are 1-based).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARE_SIZE {
            return Err(Error::BadLength {
                context: "shamir share",
                expected: SHARE_SIZE,
                found: bytes.len(),
            });
        }
        let index = bytes[0];
        if index == 0 {
            return Err(Error::BadLength {
                context: "shamir share index",
                expected: 1,
                found: 0,
            });
        }
        let mut value = [0u8; KEY_SIZE];
        value.copy_from_slice(&bytes[1..]);
        Ok(Self { index, value })
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShare")
            .field("index", &self.index)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Splits a 32-byte secret into `count` shares, any `threshold` of which
/// reconstruct it.
pub(crate) fn split(secret: &[u8; KEY_SIZE], threshold: u8, count: u8) -> Result<Vec<KeyShare>> {
    let sharks = Sharks(threshold);
    let dealer = sharks.dealer_rng(secret, &mut OsRng);
    let mut shares = Vec::with_capacity(usize::from(count));
    for share in dealer.take(usize::from(count)) {
        let mut bytes = Vec::from(&share);
        let parsed = KeyShare::from_bytes(&bytes);
        bytes.zeroize();
        shares.push(parsed?);
    }
    Ok(shares)
}

/// Combines shares back into the 32-byte secret.
///
/// The caller is responsible for checking the share count against the
/// threshold first; any failure out of the underlying arithmetic (repeated
/// indices, mismatched lengths) is reported as [`Error::CorruptRecovery`].
pub(crate) fn combine(shares: &[KeyShare], threshold: u8) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let sharks = Sharks(threshold);
    let mut raw = Vec::with_capacity(shares.len());
    for share in shares {
        let bytes = share.to_bytes();
        raw.push(Share::try_from(bytes.as_slice()).map_err(|_| Error::CorruptRecovery)?);
    }
    let mut secret = sharks.recover(&raw).map_err(|_| Error::CorruptRecovery)?;
    if secret.len() != KEY_SIZE {
        secret.zeroize();
        return Err(Error::CorruptRecovery);
    }
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    out.copy_from_slice(&secret);
    secret.zeroize();
    Ok(out)
}
