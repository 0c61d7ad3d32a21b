//! Wire format constants: magics, versions, object kinds, and part tags.
//!
//! Every persisted object starts with a 4-byte magic, a 1-byte version, and
//! a 1-byte object kind. Parts are encoded as a tag stream terminated by
//! [`TAG_END`]; every non-END tag's value is a length-prefixed byte string,
//! so decoders can skip tags they do not know.

/// Magic bytes at the start of every persisted ebox object.
pub const BOX_MAGIC: &[u8; 4] = b"EBOX";

/// Base format version.
pub const VERSION_1: u8 = 1;

/// Format version that adds recovery-token support.
pub const VERSION_2: u8 = 2;

/// Object kind byte for templates.
pub const KIND_TEMPLATE: u8 = 0x01;

/// Object kind byte for sealed eboxes.
pub const KIND_EBOX: u8 = 0x02;

/// Object kind byte reserved for stream containers (not implemented).
pub const KIND_STREAM: u8 = 0x03;

/// Configuration type byte for primary configurations.
pub const CONFIG_PRIMARY: u8 = 0x01;

/// Configuration type byte for recovery configurations.
pub const CONFIG_RECOVERY: u8 = 0x02;

/// Part tag terminating a part's tag stream.
pub const TAG_END: u8 = 0;

/// Part tag carrying the EC public key of the PIV slot.
pub const TAG_PUBKEY: u8 = 1;

/// Part tag carrying the human-readable UTF-8 label.
pub const TAG_NAME: u8 = 2;

/// Part tag carrying the card-authentication public key.
pub const TAG_CAK: u8 = 3;

/// Part tag carrying the 16-byte card GUID.
pub const TAG_GUID: u8 = 4;

/// Part tag carrying the sealed ECDH box (ebox parts only).
pub const TAG_BOX: u8 = 5;

/// Version byte of the sealed ECDH box encoding.
pub const ECDH_BOX_VERSION: u8 = 1;

/// Version byte of the challenge/response encoding.
pub const CHALLENGE_VERSION: u8 = 1;

/// Challenge type byte for outgoing requests.
pub const CHAL_TYPE_REQUEST: u8 = 1;

/// Challenge type byte for responses.
pub const CHAL_TYPE_RESPONSE: u8 = 2;

/// Size of a card GUID in bytes.
pub const GUID_SIZE: usize = 16;

/// Size of an XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of the per-configuration nonce sealed into recovery part boxes.
pub const CONFIG_NONCE_SIZE: usize = 32;

/// Size of the per-challenge nonce echoed by responses.
pub const CHALLENGE_NONCE_SIZE: usize = 32;

/// Size of a challenge identifier in bytes.
pub const CHALLENGE_ID_SIZE: usize = 8;

/// Size of a derived configuration key (and of the canonical payload).
pub const KEY_SIZE: usize = 32;

/// Size of an encoded Shamir share: index byte plus 32-byte value.
pub const SHARE_SIZE: usize = 33;

/// Number of human-verification words derived per challenge.
pub const WORD_COUNT: usize = 4;

/// Maximum payload (and recovery token) length in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Maximum challenge description length in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 254;

/// PIV key-management slot id, the slot part keys are sealed to.
pub const SLOT_KEY_MGMT: u8 = 0x9D;

/// Domain separation label for ECDH box key derivation.
pub const LABEL_ECDH_BOX: &[u8] = b"ebox:ecdh-box";

/// Domain separation label for configuration key derivation.
pub const LABEL_RECOVERY_KEY: &[u8] = b"ebox:recovery-key";

/// Domain separation label (AAD) for the recovery ciphertext.
pub const LABEL_RECOVERY_BOX: &[u8] = b"ebox:recovery-box";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_constants() {
        assert_eq!(BOX_MAGIC.len(), 4);
        assert_eq!(SHARE_SIZE, KEY_SIZE + 1);
        assert_eq!(MAX_DESCRIPTION_LEN, MAX_PAYLOAD_SIZE - 1);
        assert_ne!(KIND_TEMPLATE, KIND_EBOX);
        assert_ne!(TAG_END, TAG_PUBKEY);
    }
}
