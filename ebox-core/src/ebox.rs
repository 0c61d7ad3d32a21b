//! The ebox container: sealing, primary unlock, and key installation.
//!
//! An ebox binds a payload key to a template snapshot. Every primary part
//! carries the payload sealed directly to its token; every recovery
//! configuration carries the payload encrypted under a derived configuration
//! key whose Shamir shares are sealed to the member tokens.
//!
//! # Binary Layout
//!
//! ```text
//! Ebox:   magic(4) ‖ version(1) ‖ kind(1) ‖ nconfigs(1) ‖ configs…
//! Config: type(1) ‖ threshold(1) ‖ nparts(1) ‖ recovery: bytestring ‖ parts…
//! Part:   tag stream (PUBKEY, NAME, CAK, GUID, BOX) terminated by END
//! ```
//!
//! The `recovery` byte string is empty for primary configurations; for
//! recovery configurations it is the 24-byte AEAD nonce followed by the
//! authenticated ciphertext of the payload/token pair.

// Binary format code uses small length casts that are safe
#![allow(clippy::cast_possible_truncation)]

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::ecdh_box::EcdhBox;
use crate::error::{Error, Result};
use crate::format::{
    BOX_MAGIC, CONFIG_NONCE_SIZE, KEY_SIZE, KIND_EBOX, LABEL_RECOVERY_BOX, LABEL_RECOVERY_KEY,
    MAX_PAYLOAD_SIZE, NONCE_SIZE, SHARE_SIZE, VERSION_1, VERSION_2,
};
use crate::recovery::RecoverySession;
use crate::template::{
    read_object_header, read_part_tlv, write_part_tlv, ConfigType, Tpl, TplConfig, TplPart,
};
use crate::wire::{WireReader, WireWriter};

/// The AEAD-encrypted payload/token pair stored on a recovery
/// configuration.
#[derive(Clone)]
pub(crate) struct RecoveryCiphertext {
    pub(crate) nonce: [u8; NONCE_SIZE],
    pub(crate) ciphertext: Vec<u8>,
}

/// One sealed part inside an ebox configuration.
pub struct EboxPart {
    tpl: TplPart,
    keybox: EcdhBox,
}

impl EboxPart {
    /// Returns the template part this part was sealed for.
    #[must_use]
    pub const fn template(&self) -> &TplPart {
        &self.tpl
    }

    /// Returns the sealed box for this part.
    #[must_use]
    pub const fn keybox(&self) -> &EcdhBox {
        &self.keybox
    }

    /// Returns mutable access to the sealed box, for callers driving a PIV
    /// unseal.
    pub fn keybox_mut(&mut self) -> &mut EcdhBox {
        &mut self.keybox
    }

    /// Returns whether this part's box has been unsealed.
    #[must_use]
    pub const fn is_unsealed(&self) -> bool {
        self.keybox.is_unsealed()
    }
}

/// One configuration inside a sealed ebox.
pub struct EboxConfig {
    config_type: ConfigType,
    threshold: u8,
    parts: Vec<EboxPart>,
    recovery: Option<RecoveryCiphertext>,
}

impl EboxConfig {
    /// Returns the configuration type.
    #[must_use]
    pub const fn config_type(&self) -> ConfigType {
        self.config_type
    }

    /// Returns the threshold N.
    #[must_use]
    pub const fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Returns the ordered sealed parts.
    #[must_use]
    pub fn parts(&self) -> &[EboxPart] {
        &self.parts
    }

    /// Returns mutable access to the parts, for callers driving PIV
    /// unseals.
    pub fn parts_mut(&mut self) -> &mut [EboxPart] {
        &mut self.parts
    }

    pub(crate) const fn recovery(&self) -> Option<&RecoveryCiphertext> {
        self.recovery.as_ref()
    }
}

/// A sealed container binding a payload key to a template.
pub struct Ebox {
    version: u8,
    tpl: Tpl,
    configs: Vec<EboxConfig>,
    key: Option<Zeroizing<Vec<u8>>>,
    token: Option<Zeroizing<Vec<u8>>>,
}

impl Ebox {
    /// Seals `payload` (and an optional recovery token) under every
    /// configuration of `tpl`.
    ///
    /// The payload is canonically a 32-byte symmetric key; up to 255 bytes
    /// are permitted. All intermediate secret material is zeroized before
    /// return, on success and on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConfigs`] or [`Error::InvalidTemplate`] for a
    /// malformed template, [`Error::PayloadTooLong`] /
    /// [`Error::TokenTooLong`] for out-of-range inputs, and
    /// [`Error::SealFailed`] if a part cannot be sealed.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn seal(tpl: &Tpl, payload: &[u8], token: Option<&[u8]>) -> Result<Self> {
        tpl.validate()?;
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLong { len: payload.len() });
        }
        if let Some(token) = token {
            if token.len() > MAX_PAYLOAD_SIZE {
                return Err(Error::TokenTooLong { len: token.len() });
            }
        }

        let tpl = tpl.clone();
        let pair = encode_pair(payload, token);

        let mut configs = Vec::with_capacity(tpl.configs().len());
        for tconfig in tpl.configs() {
            let config = match tconfig.config_type() {
                ConfigType::Primary => seal_primary(tconfig, &pair)?,
                ConfigType::Recovery => seal_recovery(tconfig, &pair)?,
            };
            configs.push(config);
        }
        tracing::debug!(configs = configs.len(), "sealed ebox");

        Ok(Self {
            version: if token.is_some() { VERSION_2 } else { VERSION_1 },
            tpl,
            configs,
            key: None,
            token: None,
        })
    }

    /// Returns the format version this ebox was sealed or decoded with.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Returns the template snapshot this ebox was sealed from.
    #[must_use]
    pub const fn template(&self) -> &Tpl {
        &self.tpl
    }

    /// Returns the sealed configurations.
    #[must_use]
    pub fn configs(&self) -> &[EboxConfig] {
        &self.configs
    }

    /// Returns mutable access to one configuration, for callers driving
    /// PIV unseals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadConfigIndex`] if the index is out of range.
    pub fn config_mut(&mut self, index: usize) -> Result<&mut EboxConfig> {
        self.configs
            .get_mut(index)
            .ok_or(Error::BadConfigIndex { index })
    }

    /// Returns whether a payload key has been installed by unlock or
    /// recovery.
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Returns the installed payload key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotUnlocked`] if the ebox has not been unlocked or
    /// recovered yet.
    pub fn key(&self) -> Result<&[u8]> {
        match &self.key {
            Some(key) => Ok(key.as_slice()),
            None => Err(Error::NotUnlocked),
        }
    }

    /// Returns the recovery token, if one was sealed in and the ebox has
    /// been unlocked or recovered.
    #[must_use]
    pub fn recovery_token(&self) -> Option<&[u8]> {
        self.token.as_ref().map(|t| t.as_slice())
    }

    /// Unlocks the ebox through a primary configuration.
    ///
    /// The caller must already have unsealed at least one of the
    /// configuration's part boxes (via [`EcdhBox::unseal`] or
    /// [`EcdhBox::attach_plaintext`]). Subsequent calls return the already
    /// installed key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadConfigIndex`] for an out-of-range index,
    /// [`Error::WrongConfigType`] if the configuration is not primary, and
    /// [`Error::NotUnlocked`] if no part has been unsealed.
    pub fn unlock(&mut self, config_index: usize) -> Result<&[u8]> {
        if self.key.is_none() {
            let config = self
                .configs
                .get(config_index)
                .ok_or(Error::BadConfigIndex {
                    index: config_index,
                })?;
            if config.config_type() != ConfigType::Primary {
                return Err(Error::WrongConfigType {
                    expected: "primary",
                });
            }

            let mut unsealed = None;
            for part in config.parts() {
                if let Ok(plaintext) = part.keybox().plaintext() {
                    unsealed = Some(decode_pair(plaintext)?);
                    break;
                }
            }
            let Some((payload, token)) = unsealed else {
                return Err(Error::NotUnlocked);
            };
            tracing::debug!(config = config_index, "ebox unlocked via primary part");
            self.key = Some(payload);
            self.token = token;
        }
        match &self.key {
            Some(key) => Ok(key.as_slice()),
            None => Err(Error::NotUnlocked),
        }
    }

    /// Begins a recovery session over a recovery configuration.
    ///
    /// `hostname` identifies the issuing host inside the challenges; the
    /// core performs no environment I/O, so the caller supplies it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadConfigIndex`] for an out-of-range index or
    /// [`Error::WrongConfigType`] if the configuration is not a recovery
    /// configuration.
    pub fn begin_recovery(
        &mut self,
        config_index: usize,
        hostname: &str,
    ) -> Result<RecoverySession<'_>> {
        RecoverySession::new(self, config_index, hostname)
    }

    pub(crate) fn install_secrets(
        &mut self,
        key: Zeroizing<Vec<u8>>,
        token: Option<Zeroizing<Vec<u8>>>,
    ) {
        self.key = Some(key);
        self.token = token;
    }

    /// Encodes the sealed ebox to its binary form. Installed keys are never
    /// encoded.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(self.version);
        w.put_u8(KIND_EBOX);
        w.put_u8(self.configs.len() as u8);
        for config in &self.configs {
            w.put_u8(config.config_type.as_u8());
            w.put_u8(config.threshold);
            w.put_u8(config.parts.len() as u8);
            match &config.recovery {
                Some(recovery) => {
                    let mut body = Vec::with_capacity(NONCE_SIZE + recovery.ciphertext.len());
                    body.extend_from_slice(&recovery.nonce);
                    body.extend_from_slice(&recovery.ciphertext);
                    w.put_bytes(&body);
                }
                None => w.put_bytes(&[]),
            }
            for part in &config.parts {
                write_part_tlv(&mut w, &part.tpl, Some(&part.keybox));
            }
        }
        w.into_bytes()
    }

    /// Decodes a sealed ebox from its binary form.
    ///
    /// Unknown part tags are skipped, so an ebox written by a newer
    /// implementation still decodes to the known subset.
    ///
    /// # Errors
    ///
    /// Returns a decode error on truncation, bad magic, unsupported
    /// version, wrong object kind, or malformed parts.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        let version = read_object_header(&mut r, KIND_EBOX)?;

        let nconfigs = r.get_u8("ebox config count")?;
        let mut configs = Vec::with_capacity(usize::from(nconfigs));
        let mut tpl = Tpl::new();
        for _ in 0..nconfigs {
            let config_type = ConfigType::from_u8(r.get_u8("config type")?)?;
            let threshold = r.get_u8("config threshold")?;
            let nparts = r.get_u8("config part count")?;

            let recovery_bytes = r.get_bytes("config recovery ciphertext")?;
            let recovery = if recovery_bytes.is_empty() {
                None
            } else {
                if recovery_bytes.len() < NONCE_SIZE {
                    return Err(Error::BadLength {
                        context: "config recovery ciphertext",
                        expected: NONCE_SIZE,
                        found: recovery_bytes.len(),
                    });
                }
                let mut nonce = [0u8; NONCE_SIZE];
                nonce.copy_from_slice(&recovery_bytes[..NONCE_SIZE]);
                Some(RecoveryCiphertext {
                    nonce,
                    ciphertext: recovery_bytes[NONCE_SIZE..].to_vec(),
                })
            };

            let mut parts = Vec::with_capacity(usize::from(nparts));
            let mut tconfig = TplConfig::new(config_type, threshold);
            for _ in 0..nparts {
                let fields = read_part_tlv(&mut r, true)?;
                let (tpl_part, keybox) = fields.into_part("ebox part")?;
                let keybox = keybox.ok_or(Error::BadTag {
                    context: "ebox part",
                    tag: crate::format::TAG_BOX,
                })?;
                tconfig.add_part(tpl_part.clone());
                parts.push(EboxPart {
                    tpl: tpl_part,
                    keybox,
                });
            }
            tpl.add_config(tconfig);

            configs.push(EboxConfig {
                config_type,
                threshold,
                parts,
                recovery,
            });
        }

        Ok(Self {
            version,
            tpl,
            configs,
            key: None,
            token: None,
        })
    }

    /// Encodes the ebox as base64 for ASCII storage contexts (such as
    /// filesystem properties).
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD.encode(self.encode())
    }

    /// Decodes an ebox from its base64 form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidString`] for malformed base64, or any decode
    /// error from the binary form.
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|_| Error::InvalidString {
                context: "ebox base64",
            })?;
        Self::decode(&bytes)
    }
}

impl std::fmt::Debug for Ebox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ebox")
            .field("version", &self.version)
            .field("configs", &self.configs.len())
            .field(
                "key",
                &if self.key.is_some() {
                    "[REDACTED]"
                } else {
                    "<locked>"
                },
            )
            .finish()
    }
}

/// Encodes the payload/token pair sealed into primary boxes and the
/// recovery ciphertext. The token byte string is empty when absent.
pub(crate) fn encode_pair(payload: &[u8], token: Option<&[u8]>) -> Zeroizing<Vec<u8>> {
    let mut w = WireWriter::new();
    w.put_bytes(payload);
    w.put_bytes(token.unwrap_or(&[]));
    Zeroizing::new(w.into_bytes())
}

/// Decodes the payload/token pair. An empty token byte string decodes to
/// `None`.
pub(crate) fn decode_pair(
    bytes: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, Option<Zeroizing<Vec<u8>>>)> {
    let mut r = WireReader::new(bytes);
    let payload = r.get_bytes("sealed payload")?;
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::BadLength {
            context: "sealed payload",
            expected: KEY_SIZE,
            found: payload.len(),
        });
    }
    let token = r.get_bytes("sealed token")?;
    let token = if token.is_empty() {
        None
    } else {
        Some(Zeroizing::new(token.to_vec()))
    };
    Ok((Zeroizing::new(payload.to_vec()), token))
}

/// Derives the configuration key K_c = H(label ‖ nonce ‖ payload pair).
pub(crate) fn derive_config_key(
    config_nonce: &[u8; CONFIG_NONCE_SIZE],
    pair: &[u8],
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();
    hasher.update(LABEL_RECOVERY_KEY);
    hasher.update(config_nonce);
    hasher.update(pair);
    let digest = hasher.finalize();

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&digest);
    key
}

fn seal_primary(tconfig: &TplConfig, pair: &[u8]) -> Result<EboxConfig> {
    let part = &tconfig.parts()[0];
    let keybox = EcdhBox::seal(part.pubkey(), pair)?;
    Ok(EboxConfig {
        config_type: ConfigType::Primary,
        threshold: 1,
        parts: vec![EboxPart {
            tpl: part.clone(),
            keybox,
        }],
        recovery: None,
    })
}

fn seal_recovery(tconfig: &TplConfig, pair: &[u8]) -> Result<EboxConfig> {
    let mut config_nonce = Zeroizing::new([0u8; CONFIG_NONCE_SIZE]);
    getrandom::getrandom(&mut config_nonce[..]).expect("getrandom failed");

    let config_key = derive_config_key(&config_nonce, pair);

    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).expect("getrandom failed");
    let cipher = XChaCha20Poly1305::new(Key::from_slice(config_key.as_slice()));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: pair,
                aad: LABEL_RECOVERY_BOX,
            },
        )
        .map_err(|_| Error::SealFailed {
            context: "recovery box encrypt",
        })?;

    let shares = crate::shamir::split(
        &config_key,
        tconfig.threshold(),
        tconfig.parts().len() as u8,
    )?;

    let mut parts = Vec::with_capacity(tconfig.parts().len());
    for (tpl_part, share) in tconfig.parts().iter().zip(shares) {
        let mut boxed = Zeroizing::new(Vec::with_capacity(CONFIG_NONCE_SIZE + SHARE_SIZE));
        boxed.extend_from_slice(&config_nonce[..]);
        boxed.extend_from_slice(&share.to_bytes());
        let keybox = EcdhBox::seal(tpl_part.pubkey(), &boxed)?;
        parts.push(EboxPart {
            tpl: tpl_part.clone(),
            keybox,
        });
    }

    Ok(EboxConfig {
        config_type: ConfigType::Recovery,
        threshold: tconfig.threshold(),
        parts,
        recovery: Some(RecoveryCiphertext { nonce, ciphertext }),
    })
}

#[cfg(test)]
mod tests {
    use p256::SecretKey;
    use rand::rngs::OsRng;

    use super::*;
    use crate::format::{
        CONFIG_PRIMARY, TAG_BOX, TAG_END, TAG_GUID, TAG_PUBKEY, VERSION_1,
    };
    use crate::template::Guid;

    fn card() -> (SecretKey, TplPart) {
        let secret = SecretKey::random(&mut OsRng);
        let part = TplPart::new(secret.public_key(), Guid::generate());
        (secret, part)
    }

    fn primary_template() -> (SecretKey, Tpl) {
        let (secret, part) = card();
        let mut config = TplConfig::new(ConfigType::Primary, 1);
        config.add_part(part);
        let mut tpl = Tpl::new();
        tpl.add_config(config);
        (secret, tpl)
    }

    #[test]
    fn test_seal_and_unlock_primary() {
        let (secret, tpl) = primary_template();
        let payload = [0x00u8; KEY_SIZE];
        let mut ebox = Ebox::seal(&tpl, &payload, None).unwrap();
        assert_eq!(ebox.version(), VERSION_1);
        assert!(!ebox.is_unlocked());
        assert!(matches!(ebox.key(), Err(Error::NotUnlocked)));

        // Without an unseal, unlock refuses.
        assert!(matches!(ebox.unlock(0), Err(Error::NotUnlocked)));

        ebox.config_mut(0).unwrap().parts_mut()[0]
            .keybox_mut()
            .unseal(&secret)
            .unwrap();
        assert_eq!(ebox.unlock(0).unwrap(), &payload[..]);
        assert!(ebox.is_unlocked());
        assert!(ebox.recovery_token().is_none());

        // Unlock is idempotent once the key is installed.
        assert_eq!(ebox.unlock(0).unwrap(), &payload[..]);
        assert_eq!(ebox.key().unwrap(), &payload[..]);
    }

    #[test]
    fn test_seal_with_token_installs_token_on_unlock() {
        let (secret, tpl) = primary_template();
        let payload = [0x42u8; KEY_SIZE];
        let mut ebox = Ebox::seal(&tpl, &payload, Some(b"escrow token")).unwrap();
        assert_eq!(ebox.version(), VERSION_2);

        ebox.config_mut(0).unwrap().parts_mut()[0]
            .keybox_mut()
            .unseal(&secret)
            .unwrap();
        assert_eq!(ebox.unlock(0).unwrap(), &payload[..]);
        assert_eq!(ebox.recovery_token(), Some(&b"escrow token"[..]));
    }

    #[test]
    fn test_seal_rejects_bad_inputs() {
        let (_, tpl) = primary_template();
        assert!(matches!(
            Ebox::seal(&tpl, &[], None),
            Err(Error::PayloadTooLong { len: 0 })
        ));
        assert!(matches!(
            Ebox::seal(&tpl, &[0u8; 300], None),
            Err(Error::PayloadTooLong { len: 300 })
        ));
        assert!(matches!(
            Ebox::seal(&tpl, &[1u8; 32], Some(&[0u8; 300])),
            Err(Error::TokenTooLong { len: 300 })
        ));
        assert!(matches!(
            Ebox::seal(&Tpl::new(), &[1u8; 32], None),
            Err(Error::NoConfigs)
        ));
    }

    #[test]
    fn test_unlock_rejects_recovery_config() {
        let (s1, p1) = card();
        let (_, p2) = card();
        let mut config = TplConfig::new(ConfigType::Recovery, 2);
        config.add_part(p1);
        config.add_part(p2);
        let mut tpl = Tpl::new();
        tpl.add_config(config);

        let mut ebox = Ebox::seal(&tpl, &[7u8; KEY_SIZE], None).unwrap();
        ebox.config_mut(0).unwrap().parts_mut()[0]
            .keybox_mut()
            .unseal(&s1)
            .unwrap();
        assert!(matches!(
            ebox.unlock(0),
            Err(Error::WrongConfigType { expected: "primary" })
        ));
        assert!(matches!(
            ebox.unlock(9),
            Err(Error::BadConfigIndex { .. })
        ));
    }

    #[test]
    fn test_codec_roundtrip() {
        let (_, part) = card();
        let mut primary = TplConfig::new(ConfigType::Primary, 1);
        primary.add_part(part.clone());

        let (_, r1) = card();
        let (_, r2) = card();
        let (_, r3) = card();
        let mut recovery = TplConfig::new(ConfigType::Recovery, 2);
        recovery.add_part(r1);
        recovery.add_part(r2);
        recovery.add_part(r3);

        let mut tpl = Tpl::new();
        tpl.add_config(primary);
        tpl.add_config(recovery);

        let ebox = Ebox::seal(&tpl, &[0xA5u8; KEY_SIZE], None).unwrap();
        let encoded = ebox.encode();
        let decoded = Ebox::decode(&encoded).unwrap();

        assert_eq!(decoded.encode(), encoded);
        assert_eq!(decoded.version(), ebox.version());
        assert_eq!(decoded.template(), ebox.template());
        assert_eq!(decoded.configs().len(), 2);
        assert_eq!(decoded.configs()[1].threshold(), 2);
        assert_eq!(decoded.configs()[1].parts().len(), 3);
        assert!(decoded.configs()[1].recovery().is_some());
    }

    #[test]
    fn test_base64_roundtrip() {
        let (_, tpl) = primary_template();
        let ebox = Ebox::seal(&tpl, &[9u8; KEY_SIZE], None).unwrap();
        let armored = ebox.to_base64();
        let decoded = Ebox::from_base64(&armored).unwrap();
        assert_eq!(decoded.encode(), ebox.encode());
    }

    #[test]
    fn test_decode_skips_unknown_part_tags() {
        // Hand-build an ebox whose part carries an unknown tag 0xFE.
        let secret = SecretKey::random(&mut OsRng);
        let pubkey = secret.public_key();
        let guid = Guid::generate();
        let pair = encode_pair(&[0x31u8; KEY_SIZE], None);
        let keybox = EcdhBox::seal(&pubkey, &pair).unwrap();

        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_EBOX);
        w.put_u8(1);
        w.put_u8(CONFIG_PRIMARY);
        w.put_u8(1);
        w.put_u8(1);
        w.put_bytes(&[]); // no recovery ciphertext
        w.put_u8(TAG_PUBKEY);
        w.put_bytes(&crate::ecdh_box::encode_pubkey(&pubkey));
        w.put_u8(0xFE);
        w.put_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        w.put_u8(TAG_GUID);
        w.put_bytes(guid.as_bytes());
        w.put_u8(TAG_BOX);
        w.put_bytes(&keybox.encode());
        w.put_u8(TAG_END);

        let mut ebox = Ebox::decode(&w.into_bytes()).unwrap();
        assert_eq!(ebox.configs().len(), 1);
        assert_eq!(ebox.configs()[0].parts()[0].template().guid(), &guid);

        // The re-encoded form (unknown tag dropped) still round-trips and
        // still unlocks.
        let reencoded = ebox.encode();
        Ebox::decode(&reencoded).unwrap();

        ebox.config_mut(0).unwrap().parts_mut()[0]
            .keybox_mut()
            .unseal(&secret)
            .unwrap();
        assert_eq!(ebox.unlock(0).unwrap(), &[0x31u8; KEY_SIZE][..]);
    }

    #[test]
    fn test_decode_rejects_part_without_box() {
        let pubkey = SecretKey::random(&mut OsRng).public_key();
        let guid = Guid::generate();

        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_EBOX);
        w.put_u8(1);
        w.put_u8(CONFIG_PRIMARY);
        w.put_u8(1);
        w.put_u8(1);
        w.put_bytes(&[]);
        w.put_u8(TAG_PUBKEY);
        w.put_bytes(&crate::ecdh_box::encode_pubkey(&pubkey));
        w.put_u8(TAG_GUID);
        w.put_bytes(guid.as_bytes());
        w.put_u8(TAG_END);

        assert!(matches!(
            Ebox::decode(&w.into_bytes()),
            Err(Error::BadTag {
                tag: TAG_BOX,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_stream_kind() {
        let (_, tpl) = primary_template();
        let ebox = Ebox::seal(&tpl, &[3u8; KEY_SIZE], None).unwrap();
        let mut encoded = ebox.encode();
        encoded[5] = crate::format::KIND_STREAM;
        assert!(matches!(
            Ebox::decode(&encoded),
            Err(Error::BadKind { .. })
        ));
    }

    #[test]
    fn test_pair_codec() {
        let pair = encode_pair(b"payload", Some(b"token"));
        let (payload, token) = decode_pair(&pair).unwrap();
        assert_eq!(payload.as_slice(), b"payload");
        assert_eq!(token.as_deref().map(Vec::as_slice), Some(&b"token"[..]));

        let pair = encode_pair(b"payload", None);
        let (_, token) = decode_pair(&pair).unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn test_config_key_derivation_is_deterministic() {
        let nonce = [0x10u8; CONFIG_NONCE_SIZE];
        let pair = encode_pair(&[0x20u8; KEY_SIZE], None);
        let k1 = derive_config_key(&nonce, &pair);
        let k2 = derive_config_key(&nonce, &pair);
        assert_eq!(*k1, *k2);

        let other_nonce = [0x11u8; CONFIG_NONCE_SIZE];
        let k3 = derive_config_key(&other_nonce, &pair);
        assert_ne!(*k1, *k3);
    }

    #[test]
    fn test_tampered_recovery_ciphertext_detected() {
        let mut secrets = Vec::new();
        let mut config = TplConfig::new(ConfigType::Recovery, 2);
        for _ in 0..3 {
            let (secret, part) = card();
            secrets.push(secret);
            config.add_part(part);
        }
        let mut tpl = Tpl::new();
        tpl.add_config(config);
        let mut ebox = Ebox::seal(&tpl, &[0xAAu8; KEY_SIZE], None).unwrap();

        // Flip one byte of the stored recovery ciphertext.
        ebox.configs[0].recovery.as_mut().unwrap().ciphertext[3] ^= 0xFF;

        let mut session = ebox.begin_recovery(0, "host").unwrap();
        for index in [0usize, 1] {
            let blob = session.challenge(index, "desc").unwrap();
            let mut outer = EcdhBox::decode(&blob).unwrap();
            outer.unseal(&secrets[index]).unwrap();
            let mut challenge =
                crate::challenge::Challenge::decode(outer.plaintext().unwrap()).unwrap();
            challenge.keybox_mut().unseal(&secrets[index]).unwrap();
            let response = challenge.respond().unwrap();
            session.accept_response(&response).unwrap();
        }

        assert!(matches!(session.recover(), Err(Error::CorruptRecovery)));
        drop(session);
        assert!(!ebox.is_unlocked());
    }

    #[test]
    fn test_debug_redacts_key() {
        let (secret, tpl) = primary_template();
        let payload = [0x66u8; KEY_SIZE];
        let mut ebox = Ebox::seal(&tpl, &payload, None).unwrap();
        ebox.config_mut(0).unwrap().parts_mut()[0]
            .keybox_mut()
            .unseal(&secret)
            .unwrap();
        ebox.unlock(0).unwrap();
        let rendered = format!("{ebox:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("102")); // 0x66
    }
}
