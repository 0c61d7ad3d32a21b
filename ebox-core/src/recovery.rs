//! Recovery engine: the challenge/response state machine over one recovery
//! configuration.
//!
//! Each part moves through `Idle → Challenged → Responded → Combined`.
//! Challenges may be issued in any order and responses may arrive in any
//! order; the engine holds at most one outstanding challenge per part, and
//! issuing a new challenge for a part invalidates the previous one. Every
//! challenge uses a fresh ephemeral keypair, never reused.
//!
//! The session borrows the ebox mutably, so a recovery is owned by exactly
//! one caller at a time. Abandoning a recovery is dropping the session; all
//! per-part challenge state (ephemeral scalars, nonces, partial shares) is
//! zeroized on drop.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::challenge::{Challenge, Response};
use crate::ebox::{decode_pair, Ebox};
use crate::ecdh_box::EcdhBox;
use crate::error::{Error, Result};
use crate::format::{
    CHALLENGE_ID_SIZE, CHALLENGE_NONCE_SIZE, LABEL_RECOVERY_BOX, MAX_DESCRIPTION_LEN,
    SLOT_KEY_MGMT, WORD_COUNT,
};
use crate::shamir::{self, KeyShare};
use crate::template::ConfigType;
use crate::words;

/// An outstanding challenge: the identity the response must echo, plus the
/// ephemeral secret that unseals it.
struct Outstanding {
    id: [u8; CHALLENGE_ID_SIZE],
    nonce: [u8; CHALLENGE_NONCE_SIZE],
    ephemeral: SecretKey,
    ephemeral_pub: PublicKey,
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        // The ephemeral SecretKey zeroizes itself on drop.
        self.id.zeroize();
        self.nonce.zeroize();
    }
}

/// An accepted response: the stored share plus the challenge's ephemeral
/// public key, kept so re-deliveries of the same response are recognized.
struct Accepted {
    ephemeral_pub: PublicKey,
    share: KeyShare,
}

enum PartState {
    Idle,
    Challenged(Outstanding),
    Responded(Accepted),
    Combined,
}

/// Externally visible state of one part in a recovery session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartStatus {
    /// No challenge has been issued for this part.
    Idle,
    /// A challenge is outstanding and awaiting its response.
    Challenged,
    /// A response has been accepted; the share is held.
    Responded,
    /// The share was consumed by a successful recovery.
    Combined,
}

/// A recovery session over one recovery configuration of an ebox.
///
/// Created by [`Ebox::begin_recovery`]. The session drives challenges and
/// responses for the configuration's parts and, once the threshold is met,
/// recovers and installs the payload key on the ebox.
pub struct RecoverySession<'a> {
    ebox: &'a mut Ebox,
    config_index: usize,
    hostname: String,
    states: Vec<PartState>,
}

impl<'a> RecoverySession<'a> {
    pub(crate) fn new(ebox: &'a mut Ebox, config_index: usize, hostname: &str) -> Result<Self> {
        let config = ebox
            .configs()
            .get(config_index)
            .ok_or(Error::BadConfigIndex {
                index: config_index,
            })?;
        if config.config_type() != ConfigType::Recovery {
            return Err(Error::WrongConfigType {
                expected: "recovery",
            });
        }
        let nparts = config.parts().len();
        Ok(Self {
            ebox,
            config_index,
            hostname: hostname.to_owned(),
            states: (0..nparts).map(|_| PartState::Idle).collect(),
        })
    }

    /// Returns the number of parts in the configuration.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.states.len()
    }

    /// Returns the configuration threshold N.
    #[must_use]
    pub fn threshold(&self) -> usize {
        usize::from(self.ebox.configs()[self.config_index].threshold())
    }

    /// Returns how many parts have responded and still hold a share.
    #[must_use]
    pub fn responded(&self) -> usize {
        self.states
            .iter()
            .filter(|state| matches!(state, PartState::Responded(_)))
            .count()
    }

    /// Returns the state of one part, or `None` for an out-of-range index.
    #[must_use]
    pub fn status(&self, part_index: usize) -> Option<PartStatus> {
        self.states.get(part_index).map(|state| match state {
            PartState::Idle => PartStatus::Idle,
            PartState::Challenged(_) => PartStatus::Challenged,
            PartState::Responded(_) => PartStatus::Responded,
            PartState::Combined => PartStatus::Combined,
        })
    }

    /// Returns the verification words of the outstanding challenge for a
    /// part, for operator display, or `None` if no challenge is
    /// outstanding.
    #[must_use]
    pub fn words(&self, part_index: usize) -> Option<[&'static str; WORD_COUNT]> {
        match self.states.get(part_index) {
            Some(PartState::Challenged(out)) => {
                Some(words::verification_words(&out.id, &out.nonce))
            }
            _ => None,
        }
    }

    /// Issues a challenge for one part and returns the transport blob (an
    /// encoded box sealed to the part's slot key).
    ///
    /// A fresh ephemeral keypair and challenge identity are generated each
    /// call; re-challenging a part discards any previous outstanding
    /// challenge or stored share for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadPartIndex`] for an out-of-range part,
    /// [`Error::DescTooLong`] if the description exceeds 254 bytes,
    /// [`Error::AlreadyRecovered`] if this part's share was already
    /// combined, and [`Error::SealFailed`] if the challenge cannot be
    /// sealed.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn challenge(&mut self, part_index: usize, description: &str) -> Result<Vec<u8>> {
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(Error::DescTooLong {
                len: description.len(),
            });
        }
        if part_index >= self.states.len() {
            return Err(Error::BadPartIndex { index: part_index });
        }
        if matches!(self.states[part_index], PartState::Combined) {
            return Err(Error::AlreadyRecovered);
        }

        let ephemeral = SecretKey::random(&mut OsRng);
        let ephemeral_pub = ephemeral.public_key();
        let mut outstanding = Outstanding {
            id: [0u8; CHALLENGE_ID_SIZE],
            nonce: [0u8; CHALLENGE_NONCE_SIZE],
            ephemeral,
            ephemeral_pub,
        };
        getrandom::getrandom(&mut outstanding.id).expect("getrandom failed");
        getrandom::getrandom(&mut outstanding.nonce).expect("getrandom failed");

        let part = &self.ebox.configs()[self.config_index].parts()[part_index];
        let challenge = Challenge {
            id: outstanding.id,
            nonce: outstanding.nonce,
            hostname: self.hostname.clone(),
            created_at: unix_now(),
            description: description.to_owned(),
            slot_id: SLOT_KEY_MGMT,
            ephemeral_pub,
            slot_pub: *part.template().pubkey(),
            cak: part.template().cak().copied(),
            words: words::verification_indices(&outstanding.id, &outstanding.nonce),
            keybox: part.keybox().clone(),
        };
        let plaintext = Zeroizing::new(challenge.encode());
        let transport = EcdhBox::seal(part.template().pubkey(), &plaintext)?.encode();

        tracing::debug!(part = part_index, "issued recovery challenge");
        self.states[part_index] = PartState::Challenged(outstanding);
        Ok(transport)
    }

    /// Accepts a response transport blob and stores the share it carries.
    /// Returns the index of the part the response was for.
    ///
    /// The response box's recipient key identifies the outstanding
    /// challenge; the id and nonce inside are compared in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadResponse`] if the blob does not match any
    /// outstanding challenge (stale challenge id, wrong nonce, or garbage),
    /// and [`Error::Duplicate`] if the matched part has already responded;
    /// the duplicate delivery leaves all state unchanged.
    pub fn accept_response(&mut self, blob: &[u8]) -> Result<usize> {
        let mut respbox = EcdhBox::decode(blob)?;
        let recipient = *respbox.recipient();

        let mut matched = None;
        for (index, state) in self.states.iter().enumerate() {
            match state {
                PartState::Challenged(out) if out.ephemeral_pub == recipient => {
                    matched = Some(index);
                    break;
                }
                PartState::Responded(acc) if acc.ephemeral_pub == recipient => {
                    return Err(Error::Duplicate);
                }
                _ => {}
            }
        }
        let Some(index) = matched else {
            return Err(Error::BadResponse);
        };
        let PartState::Challenged(out) = &self.states[index] else {
            return Err(Error::BadResponse);
        };

        respbox
            .unseal(&out.ephemeral)
            .map_err(|_| Error::BadResponse)?;
        let plaintext = respbox.plaintext()?;
        let response = Response::decode(plaintext).map_err(|_| Error::BadResponse)?;

        let id_ok: bool = response.id[..].ct_eq(&out.id[..]).into();
        let nonce_ok: bool = response.nonce[..].ct_eq(&out.nonce[..]).into();
        if !id_ok || !nonce_ok {
            return Err(Error::BadResponse);
        }

        let ephemeral_pub = out.ephemeral_pub;
        let share = response.share.clone();
        drop(response);

        tracing::debug!(part = index, "accepted recovery response");
        self.states[index] = PartState::Responded(Accepted {
            ephemeral_pub,
            share,
        });
        Ok(index)
    }

    /// Combines the stored shares, decrypts the recovery ciphertext, and
    /// installs the payload key (and token) on the ebox. Responded parts
    /// move to `Combined`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRecovered`] if the ebox is already unlocked,
    /// [`Error::InsufficientShares`] if fewer than N parts have responded,
    /// and [`Error::CorruptRecovery`] if the ciphertext fails to
    /// authenticate or the shares are inconsistent; in every failure case
    /// all partial key material is zeroized before returning.
    pub fn recover(&mut self) -> Result<&[u8]> {
        if self.ebox.is_unlocked() {
            return Err(Error::AlreadyRecovered);
        }

        let config = &self.ebox.configs()[self.config_index];
        let threshold = config.threshold();
        let needed = usize::from(threshold);
        let recovery = config.recovery().cloned().ok_or(Error::CorruptRecovery)?;

        let shares: Vec<KeyShare> = self
            .states
            .iter()
            .filter_map(|state| match state {
                PartState::Responded(acc) => Some(acc.share.clone()),
                _ => None,
            })
            .collect();
        if shares.len() < needed {
            return Err(Error::InsufficientShares {
                needed,
                have: shares.len(),
            });
        }

        let config_key = shamir::combine(&shares, threshold)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(config_key.as_slice()));
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&recovery.nonce),
                Payload {
                    msg: recovery.ciphertext.as_slice(),
                    aad: LABEL_RECOVERY_BOX,
                },
            )
            .map_err(|_| Error::CorruptRecovery)?;
        let plaintext = Zeroizing::new(plaintext);
        let (payload, token) = decode_pair(&plaintext)?;

        self.ebox.install_secrets(payload, token);
        for state in &mut self.states {
            if matches!(state, PartState::Responded(_)) {
                *state = PartState::Combined;
            }
        }
        tracing::debug!(config = self.config_index, "ebox recovered");
        self.ebox.key()
    }
}

/// Seconds since the Unix epoch, saturating to zero before it.
fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
