//! ECDH-sealed boxes: a small plaintext sealed to a P-256 recipient key.
//!
//! Sealing generates an ephemeral keypair, runs ECDH against the recipient
//! key, expands the shared secret with HKDF-SHA256, and encrypts the
//! plaintext with XChaCha20-Poly1305. Only the holder of the recipient
//! private key (normally a PIV token's key-management slot) can unseal.
//!
//! The software [`EcdhBox::unseal`] computes exactly what the card computes;
//! callers driving real hardware unseal out-of-band and attach the result
//! with [`EcdhBox::attach_plaintext`].
//!
//! # Binary Layout
//!
//! ```text
//! version(1) ‖ recipient_pub ‖ ephemeral_pub ‖ nonce ‖ ciphertext
//! ```
//!
//! where every field after the version is a length-prefixed byte string and
//! the public keys are SEC1 compressed points.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::format::{ECDH_BOX_VERSION, LABEL_ECDH_BOX, NONCE_SIZE};
use crate::wire::{WireReader, WireWriter};

/// A plaintext sealed to a recipient public key.
///
/// After decoding, the box is sealed; the plaintext becomes available only
/// after [`EcdhBox::unseal`] or [`EcdhBox::attach_plaintext`]. The plaintext
/// buffer is zeroized when the box is dropped.
#[derive(Clone)]
pub struct EcdhBox {
    recipient: PublicKey,
    ephemeral: PublicKey,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    plaintext: Option<Zeroizing<Vec<u8>>>,
}

impl EcdhBox {
    /// Seals `plaintext` to the recipient public key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SealFailed`] if key derivation or encryption fails.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Self> {
        let ephemeral_secret = SecretKey::random(&mut OsRng);
        let ephemeral = ephemeral_secret.public_key();
        let key = derive_box_key(&ephemeral_secret, recipient, &ephemeral, recipient)?;

        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).expect("getrandom failed");

        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: LABEL_ECDH_BOX,
                },
            )
            .map_err(|_| Error::SealFailed {
                context: "aead encrypt",
            })?;

        Ok(Self {
            recipient: *recipient,
            ephemeral,
            nonce,
            ciphertext,
            plaintext: None,
        })
    }

    /// Unseals the box with the recipient private key, retaining the
    /// plaintext on the box.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsealFailed`] if the key does not match the
    /// recipient or the ciphertext has been tampered with.
    pub fn unseal(&mut self, secret: &SecretKey) -> Result<()> {
        let key = derive_box_key(secret, &self.ephemeral, &self.ephemeral, &self.recipient)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: self.ciphertext.as_slice(),
                    aad: LABEL_ECDH_BOX,
                },
            )
            .map_err(|_| Error::UnsealFailed {
                context: "aead decrypt",
            })?;
        self.plaintext = Some(Zeroizing::new(plaintext));
        Ok(())
    }

    /// Attaches a plaintext that was unsealed out-of-band (by real PIV
    /// hardware). The buffer is owned and zeroized with the box.
    pub fn attach_plaintext(&mut self, plaintext: Vec<u8>) {
        self.plaintext = Some(Zeroizing::new(plaintext));
    }

    /// Returns whether the plaintext is available.
    #[must_use]
    pub const fn is_unsealed(&self) -> bool {
        self.plaintext.is_some()
    }

    /// Returns the unsealed plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotUnsealed`] if the box has not been unsealed.
    pub fn plaintext(&self) -> Result<&[u8]> {
        self.plaintext
            .as_ref()
            .map(|p| p.as_slice())
            .ok_or(Error::NotUnsealed)
    }

    /// Returns the recipient public key the box is sealed to.
    #[must_use]
    pub const fn recipient(&self) -> &PublicKey {
        &self.recipient
    }

    /// Returns the ephemeral public key used for sealing.
    #[must_use]
    pub const fn ephemeral(&self) -> &PublicKey {
        &self.ephemeral
    }

    /// Encodes the sealed form. The plaintext, if attached, is never
    /// encoded.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u8(ECDH_BOX_VERSION);
        w.put_bytes(&encode_pubkey(&self.recipient));
        w.put_bytes(&encode_pubkey(&self.ephemeral));
        w.put_bytes(&self.nonce);
        w.put_bytes(&self.ciphertext);
        w.into_bytes()
    }

    /// Decodes a sealed box.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the input is truncated, the version is
    /// unknown, or a public key is unusable.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let version = r.get_u8("ecdh box version")?;
        if version != ECDH_BOX_VERSION {
            return Err(Error::UnsupportedVersion { found: version });
        }
        let recipient = decode_pubkey(r.get_bytes("ecdh box recipient")?, "ecdh box recipient")?;
        let ephemeral = decode_pubkey(r.get_bytes("ecdh box ephemeral")?, "ecdh box ephemeral")?;
        let nonce_bytes = r.get_bytes("ecdh box nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::BadLength {
                context: "ecdh box nonce",
                expected: NONCE_SIZE,
                found: nonce_bytes.len(),
            });
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let ciphertext = r.get_bytes("ecdh box ciphertext")?.to_vec();
        if !r.is_empty() {
            return Err(Error::BadLength {
                context: "ecdh box trailing data",
                expected: 0,
                found: r.remaining(),
            });
        }

        Ok(Self {
            recipient,
            ephemeral,
            nonce,
            ciphertext,
            plaintext: None,
        })
    }
}

impl std::fmt::Debug for EcdhBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhBox")
            .field("ciphertext_len", &self.ciphertext.len())
            .field(
                "plaintext",
                &if self.plaintext.is_some() {
                    "[REDACTED]"
                } else {
                    "<sealed>"
                },
            )
            .finish()
    }
}

/// Encodes a public key as a SEC1 compressed point.
pub(crate) fn encode_pubkey(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Decodes a SEC1 point into a public key.
pub(crate) fn decode_pubkey(bytes: &[u8], context: &'static str) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| Error::PubkeyUnusable { context })
}

/// Derives the box encryption key from an ECDH agreement.
///
/// Both sides bind the key to the ephemeral and recipient points, so either
/// scalar (ephemeral at seal, recipient at unseal) with the other party's
/// point yields the same key.
fn derive_box_key(
    scalar: &SecretKey,
    peer: &PublicKey,
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>> {
    let shared = p256::ecdh::diffie_hellman(scalar.to_nonzero_scalar(), peer.as_affine());
    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());

    let mut info = Vec::with_capacity(LABEL_ECDH_BOX.len() + 66);
    info.extend_from_slice(LABEL_ECDH_BOX);
    info.extend_from_slice(ephemeral.to_encoded_point(true).as_bytes());
    info.extend_from_slice(recipient.to_encoded_point(true).as_bytes());

    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(&info, &mut okm[..]).map_err(|_| Error::SealFailed {
        context: "hkdf expand",
    })?;
    Ok(okm)
}
