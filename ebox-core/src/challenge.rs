//! Challenge/response codec for the recovery protocol.
//!
//! A challenge is issued for one part of a recovery configuration and
//! travels to the remote token holder sealed to that part's slot key. It
//! carries everything the remote side needs: the challenge identity (id and
//! nonce), display fields for the operator (hostname, timestamp,
//! description, verification words), the ephemeral key to seal the response
//! to, and the part's own sealed keybox, which the remote card must unseal
//! to obtain its share.
//!
//! # Binary Layout
//!
//! ```text
//! Challenge: version(1) ‖ type(1)=REQUEST ‖ id(8) ‖ nonce ‖ hostname
//!            ‖ created_at(u64) ‖ description ‖ slot_id(1) ‖ ephemeral_pub
//!            ‖ slot_pub ‖ cak (empty if none) ‖ words(4) ‖ keybox
//! Response:  version(1) ‖ type(1)=RESPONSE ‖ id(8) ‖ nonce ‖ share(33)
//! ```
//!
//! Variable-length fields are length-prefixed byte strings. Trailing bytes
//! after the known fields are ignored on decode, so future versions can
//! append fields.

use p256::PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::ecdh_box::{decode_pubkey, encode_pubkey, EcdhBox};
use crate::error::{Error, Result};
use crate::format::{
    CHALLENGE_ID_SIZE, CHALLENGE_NONCE_SIZE, CHALLENGE_VERSION, CHAL_TYPE_REQUEST,
    CHAL_TYPE_RESPONSE, CONFIG_NONCE_SIZE, SHARE_SIZE, WORD_COUNT,
};
use crate::shamir::KeyShare;
use crate::wire::{WireReader, WireWriter};
use crate::words;

/// A recovery challenge for a single part.
///
/// Issued by [`crate::recovery::RecoverySession::challenge`] and decoded on
/// the remote side with [`Challenge::decode`] after the transport box has
/// been unsealed. The challenge identity is zeroized on drop.
pub struct Challenge {
    pub(crate) id: [u8; CHALLENGE_ID_SIZE],
    pub(crate) nonce: [u8; CHALLENGE_NONCE_SIZE],
    pub(crate) hostname: String,
    pub(crate) created_at: u64,
    pub(crate) description: String,
    pub(crate) slot_id: u8,
    pub(crate) ephemeral_pub: PublicKey,
    pub(crate) slot_pub: PublicKey,
    pub(crate) cak: Option<PublicKey>,
    pub(crate) words: [u8; WORD_COUNT],
    pub(crate) keybox: EcdhBox,
}

impl Challenge {
    /// Returns the 8-byte challenge id.
    #[must_use]
    pub const fn id(&self) -> &[u8; CHALLENGE_ID_SIZE] {
        &self.id
    }

    /// Returns the issuing host's name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the creation time as seconds since the Unix epoch.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns the human-readable description of what is being recovered.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the PIV slot id the challenged key lives in.
    #[must_use]
    pub const fn slot_id(&self) -> u8 {
        self.slot_id
    }

    /// Returns the slot public key of the challenged part.
    #[must_use]
    pub const fn slot_pubkey(&self) -> &PublicKey {
        &self.slot_pub
    }

    /// Returns the card-authentication key of the challenged part, if any.
    #[must_use]
    pub const fn cak(&self) -> Option<&PublicKey> {
        self.cak.as_ref()
    }

    /// Returns the four verification words for operator display.
    #[must_use]
    pub fn words(&self) -> [&'static str; WORD_COUNT] {
        self.words.map(words::word)
    }

    /// Returns the part's sealed keybox. The remote card must unseal this
    /// to obtain the share before [`Challenge::respond`] can run.
    #[must_use]
    pub const fn keybox(&self) -> &EcdhBox {
        &self.keybox
    }

    /// Returns mutable access to the keybox, for the unsealing caller.
    pub fn keybox_mut(&mut self) -> &mut EcdhBox {
        &mut self.keybox
    }

    /// Encodes the challenge plaintext (before transport sealing).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u8(CHALLENGE_VERSION);
        w.put_u8(CHAL_TYPE_REQUEST);
        w.put_raw(&self.id);
        w.put_bytes(&self.nonce);
        w.put_str(&self.hostname);
        w.put_u64(self.created_at);
        w.put_str(&self.description);
        w.put_u8(self.slot_id);
        w.put_bytes(&encode_pubkey(&self.ephemeral_pub));
        w.put_bytes(&encode_pubkey(&self.slot_pub));
        match &self.cak {
            Some(cak) => w.put_bytes(&encode_pubkey(cak)),
            None => w.put_bytes(&[]),
        }
        w.put_raw(&self.words);
        w.put_bytes(&self.keybox.encode());
        w.into_bytes()
    }

    /// Decodes a challenge plaintext, after the transport box has been
    /// unsealed by the remote card.
    ///
    /// # Errors
    ///
    /// Returns a decode error on truncation, an unknown version, a wrong
    /// record type, or malformed fields.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let version = r.get_u8("challenge version")?;
        if version != CHALLENGE_VERSION {
            return Err(Error::UnsupportedVersion { found: version });
        }
        let record_type = r.get_u8("challenge type")?;
        if record_type != CHAL_TYPE_REQUEST {
            return Err(Error::BadTag {
                context: "challenge type",
                tag: record_type,
            });
        }

        let mut id = [0u8; CHALLENGE_ID_SIZE];
        id.copy_from_slice(r.get_raw(CHALLENGE_ID_SIZE, "challenge id")?);

        let nonce_bytes = r.get_bytes("challenge nonce")?;
        if nonce_bytes.len() != CHALLENGE_NONCE_SIZE {
            return Err(Error::BadLength {
                context: "challenge nonce",
                expected: CHALLENGE_NONCE_SIZE,
                found: nonce_bytes.len(),
            });
        }
        let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        let hostname = r.get_str("challenge hostname")?;
        let created_at = r.get_u64("challenge created_at")?;
        let description = r.get_str("challenge description")?;
        let slot_id = r.get_u8("challenge slot id")?;
        let ephemeral_pub = decode_pubkey(
            r.get_bytes("challenge ephemeral key")?,
            "challenge ephemeral key",
        )?;
        let slot_pub = decode_pubkey(r.get_bytes("challenge slot key")?, "challenge slot key")?;

        let cak_bytes = r.get_bytes("challenge cak")?;
        let cak = if cak_bytes.is_empty() {
            None
        } else {
            Some(decode_pubkey(cak_bytes, "challenge cak")?)
        };

        let mut word_indices = [0u8; WORD_COUNT];
        word_indices.copy_from_slice(r.get_raw(WORD_COUNT, "challenge words")?);

        let keybox = EcdhBox::decode(r.get_bytes("challenge keybox")?)?;

        Ok(Self {
            id,
            nonce,
            hostname,
            created_at,
            description,
            slot_id,
            ephemeral_pub,
            slot_pub,
            cak,
            words: word_indices,
            keybox,
        })
    }

    /// Builds the sealed response transport blob for this challenge.
    ///
    /// The keybox must have been unsealed first; its plaintext supplies the
    /// share, which is echoed back together with the challenge id and nonce
    /// inside a box sealed to the challenge's ephemeral key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotUnsealed`] if the keybox has not been unsealed,
    /// [`Error::BadLength`] if its plaintext is malformed, and
    /// [`Error::SealFailed`] if the response cannot be sealed.
    pub fn respond(&self) -> Result<Vec<u8>> {
        let plaintext = self.keybox.plaintext()?;
        if plaintext.len() != CONFIG_NONCE_SIZE + SHARE_SIZE {
            return Err(Error::BadLength {
                context: "recovery part plaintext",
                expected: CONFIG_NONCE_SIZE + SHARE_SIZE,
                found: plaintext.len(),
            });
        }
        let share = KeyShare::from_bytes(&plaintext[CONFIG_NONCE_SIZE..])?;

        let mut w = WireWriter::new();
        w.put_u8(CHALLENGE_VERSION);
        w.put_u8(CHAL_TYPE_RESPONSE);
        w.put_raw(&self.id);
        w.put_bytes(&self.nonce);
        w.put_bytes(&share.to_bytes());
        let body = Zeroizing::new(w.into_bytes());

        let respbox = EcdhBox::seal(&self.ephemeral_pub, &body)?;
        Ok(respbox.encode())
    }
}

impl Drop for Challenge {
    fn drop(&mut self) {
        self.id.zeroize();
        self.nonce.zeroize();
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge")
            .field("id", &hex::encode(self.id))
            .field("hostname", &self.hostname)
            .field("description", &self.description)
            .field("words", &self.words())
            .finish()
    }
}

/// A decoded recovery response: the challenge identity plus the share.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct Response {
    pub(crate) id: [u8; CHALLENGE_ID_SIZE],
    pub(crate) nonce: [u8; CHALLENGE_NONCE_SIZE],
    pub(crate) share: KeyShare,
}

impl Response {
    /// Decodes a response plaintext (after the engine unseals the response
    /// box with its ephemeral secret).
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let version = r.get_u8("response version")?;
        if version != CHALLENGE_VERSION {
            return Err(Error::UnsupportedVersion { found: version });
        }
        let record_type = r.get_u8("response type")?;
        if record_type != CHAL_TYPE_RESPONSE {
            return Err(Error::BadTag {
                context: "response type",
                tag: record_type,
            });
        }

        let mut id = [0u8; CHALLENGE_ID_SIZE];
        id.copy_from_slice(r.get_raw(CHALLENGE_ID_SIZE, "response id")?);

        let nonce_bytes = r.get_bytes("response nonce")?;
        if nonce_bytes.len() != CHALLENGE_NONCE_SIZE {
            return Err(Error::BadLength {
                context: "response nonce",
                expected: CHALLENGE_NONCE_SIZE,
                found: nonce_bytes.len(),
            });
        }
        let mut nonce = [0u8; CHALLENGE_NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        let share = KeyShare::from_bytes(r.get_bytes("response share")?)?;

        Ok(Self { id, nonce, share })
    }
}

#[cfg(test)]
mod tests {
    use p256::SecretKey;
    use rand::rngs::OsRng;

    use super::*;

    fn sample_challenge() -> (SecretKey, Challenge) {
        let slot_secret = SecretKey::random(&mut OsRng);
        let slot_pub = slot_secret.public_key();
        let ephemeral_pub = SecretKey::random(&mut OsRng).public_key();

        let mut boxed = Vec::new();
        boxed.extend_from_slice(&[0x55u8; CONFIG_NONCE_SIZE]);
        boxed.push(1);
        boxed.extend_from_slice(&[0x66u8; 32]);
        let keybox = EcdhBox::seal(&slot_pub, &boxed).unwrap();

        let id = [0x01u8; CHALLENGE_ID_SIZE];
        let nonce = [0x02u8; CHALLENGE_NONCE_SIZE];
        let challenge = Challenge {
            id,
            nonce,
            hostname: "vault-host".to_owned(),
            created_at: 1_700_000_000,
            description: "ZFS filesystem tank/secrets".to_owned(),
            slot_id: crate::format::SLOT_KEY_MGMT,
            ephemeral_pub,
            slot_pub,
            cak: None,
            words: words::verification_indices(&id, &nonce),
            keybox,
        };
        (slot_secret, challenge)
    }

    #[test]
    fn test_codec_roundtrip() {
        let (_, challenge) = sample_challenge();
        let encoded = challenge.encode();
        let decoded = Challenge::decode(&encoded).unwrap();

        assert_eq!(decoded.id(), challenge.id());
        assert_eq!(decoded.hostname(), "vault-host");
        assert_eq!(decoded.created_at(), 1_700_000_000);
        assert_eq!(decoded.description(), "ZFS filesystem tank/secrets");
        assert_eq!(decoded.slot_id(), crate::format::SLOT_KEY_MGMT);
        assert_eq!(decoded.slot_pubkey(), challenge.slot_pubkey());
        assert!(decoded.cak().is_none());
        assert_eq!(decoded.words(), challenge.words());
    }

    #[test]
    fn test_decode_ignores_trailing_fields() {
        let (_, challenge) = sample_challenge();
        let mut encoded = challenge.encode();
        encoded.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let decoded = Challenge::decode(&encoded).unwrap();
        assert_eq!(decoded.id(), challenge.id());
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let (_, challenge) = sample_challenge();
        let mut encoded = challenge.encode();
        encoded[1] = CHAL_TYPE_RESPONSE;
        assert!(matches!(
            Challenge::decode(&encoded),
            Err(Error::BadTag { .. })
        ));
    }

    #[test]
    fn test_words_match_derivation() {
        let (_, challenge) = sample_challenge();
        let expected = words::verification_words(&challenge.id, &challenge.nonce);
        assert_eq!(challenge.words(), expected);
    }

    #[test]
    fn test_respond_requires_unsealed_keybox() {
        let (_, challenge) = sample_challenge();
        assert!(matches!(challenge.respond(), Err(Error::NotUnsealed)));
    }

    #[test]
    fn test_respond_roundtrip() {
        let (slot_secret, mut challenge) = sample_challenge();
        let ephemeral_secret = SecretKey::random(&mut OsRng);
        challenge.ephemeral_pub = ephemeral_secret.public_key();

        challenge.keybox_mut().unseal(&slot_secret).unwrap();
        let blob = challenge.respond().unwrap();

        let mut respbox = EcdhBox::decode(&blob).unwrap();
        respbox.unseal(&ephemeral_secret).unwrap();
        let response = Response::decode(respbox.plaintext().unwrap()).unwrap();

        assert_eq!(response.id, challenge.id);
        assert_eq!(response.nonce, challenge.nonce);
        assert_eq!(response.share.index(), 1);
        assert_eq!(response.share.value(), &[0x66u8; 32]);
    }

    #[test]
    fn test_respond_rejects_malformed_keybox_plaintext() {
        let (_, mut challenge) = sample_challenge();
        challenge.keybox_mut().attach_plaintext(vec![1, 2, 3]);
        assert!(matches!(
            challenge.respond(),
            Err(Error::BadLength { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_nonce() {
        let (_, challenge) = sample_challenge();
        let rendered = format!("{challenge:?}");
        assert!(rendered.contains("vault-host"));
        assert!(!rendered.contains("0202"));
    }
}
