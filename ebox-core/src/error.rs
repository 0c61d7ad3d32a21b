//! Error types for ebox operations.
//!
//! Every fallible operation in this crate returns a structured [`Error`];
//! nothing aborts the process. Decode errors carry the field or tag that was
//! being read so that a corrupt container can be diagnosed without dumping
//! its (secret-bearing) contents.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by ebox sealing, unlocking, recovery, and codecs.
#[derive(Debug, Error)]
pub enum Error {
    /// Input ended while a field was still being read.
    #[error("truncated input while reading {context}")]
    Truncated {
        /// The field that was being read.
        context: &'static str,
    },

    /// The leading magic bytes did not match.
    #[error("bad magic bytes: expected {expected:?}, found {}", hex::encode(.found))]
    BadMagic {
        /// The magic bytes that were expected.
        expected: &'static [u8],
        /// The bytes actually found.
        found: Vec<u8>,
    },

    /// The object carries a format version this implementation does not know.
    #[error("unsupported format version {found}")]
    UnsupportedVersion {
        /// The version byte found.
        found: u8,
    },

    /// The object kind byte named an object this decoder cannot handle.
    #[error("unexpected object kind {found:#04x}")]
    BadKind {
        /// The kind byte found.
        found: u8,
    },

    /// A tag was invalid in its position, or a mandatory tag was absent.
    #[error("bad tag {tag:#04x} in {context}")]
    BadTag {
        /// The object being decoded.
        context: &'static str,
        /// The offending (or missing) tag.
        tag: u8,
    },

    /// A fixed-size field had the wrong length.
    #[error("bad length for {context}: expected {expected}, found {found}")]
    BadLength {
        /// The field being decoded.
        context: &'static str,
        /// The length required.
        expected: usize,
        /// The length found.
        found: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in {context}")]
    InvalidString {
        /// The field being decoded.
        context: &'static str,
    },

    /// A public key could not be parsed or is not usable for sealing.
    #[error("unusable public key: {context}")]
    PubkeyUnusable {
        /// Where the key came from.
        context: &'static str,
    },

    /// The template has no configurations at all.
    #[error("template has no configurations")]
    NoConfigs,

    /// The template violates a structural invariant.
    #[error("invalid template: {reason}")]
    InvalidTemplate {
        /// What is wrong with it.
        reason: String,
    },

    /// The payload length is outside the permitted 1..=255 byte range.
    #[error("payload length {len} out of range (1..=255 bytes)")]
    PayloadTooLong {
        /// The offending length.
        len: usize,
    },

    /// The recovery token exceeds 255 bytes.
    #[error("recovery token length {len} out of range (max 255 bytes)")]
    TokenTooLong {
        /// The offending length.
        len: usize,
    },

    /// Sealing to a recipient key failed.
    #[error("seal failed: {context}")]
    SealFailed {
        /// The step that failed.
        context: &'static str,
    },

    /// Unsealing failed: wrong private key or tampered box.
    #[error("unseal failed: {context}")]
    UnsealFailed {
        /// The step that failed.
        context: &'static str,
    },

    /// The sealed box has not been unsealed yet.
    #[error("box has not been unsealed")]
    NotUnsealed,

    /// No part of the chosen primary configuration has been unsealed.
    #[error("no unsealed part available to unlock this configuration")]
    NotUnlocked,

    /// The configuration is of the wrong type for this operation.
    #[error("operation requires a {expected} configuration")]
    WrongConfigType {
        /// The configuration type the operation needs.
        expected: &'static str,
    },

    /// Fewer parts have responded than the recovery threshold requires.
    #[error("insufficient shares for recovery: need {needed}, have {have}")]
    InsufficientShares {
        /// The configuration threshold.
        needed: usize,
        /// How many responses have been accepted.
        have: usize,
    },

    /// A response did not match any outstanding challenge.
    #[error("response does not match any outstanding challenge")]
    BadResponse,

    /// A response was delivered for a part that already responded.
    #[error("response was already accepted for this part")]
    Duplicate,

    /// The challenge description exceeds the wire limit.
    #[error("description length {len} exceeds maximum of 254 bytes")]
    DescTooLong {
        /// The offending length.
        len: usize,
    },

    /// The recovery ciphertext failed to authenticate, or the combined
    /// shares were inconsistent. No partial key material is retained.
    #[error("recovery data is corrupt or shares are inconsistent")]
    CorruptRecovery,

    /// The ebox was already unlocked or recovered.
    #[error("ebox is already unlocked or recovered")]
    AlreadyRecovered,

    /// A configuration index was out of range.
    #[error("configuration index {index} out of range")]
    BadConfigIndex {
        /// The offending index.
        index: usize,
    },

    /// A part index was out of range.
    #[error("part index {index} out of range")]
    BadPartIndex {
        /// The offending index.
        index: usize,
    },
}
