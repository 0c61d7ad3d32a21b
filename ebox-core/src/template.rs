//! Access-policy templates: configurations and the PIV parts behind them.
//!
//! A template is an ordered list of configurations, each either PRIMARY
//! (one part, threshold 1) or RECOVERY (threshold N out of M parts). Each
//! part names one PIV token by its slot public key and card GUID. Templates
//! are declarative; sealing an ebox takes a deep-copied snapshot.
//!
//! # Binary Layout
//!
//! ```text
//! Template: magic(4) ‖ version(1) ‖ kind(1) ‖ nconfigs(1) ‖ configs…
//! Config:   type(1) ‖ threshold(1) ‖ nparts(1) ‖ parts…
//! Part:     tag stream (PUBKEY, NAME, CAK, GUID) terminated by END
//! ```
//!
//! Unknown part tags are skipped on decode, preserving forward
//! compatibility with future part fields.

use p256::PublicKey;

use crate::ecdh_box::{decode_pubkey, encode_pubkey, EcdhBox};
use crate::error::{Error, Result};
use crate::format::{
    BOX_MAGIC, CONFIG_PRIMARY, CONFIG_RECOVERY, GUID_SIZE, KIND_TEMPLATE, TAG_BOX, TAG_CAK,
    TAG_END, TAG_GUID, TAG_NAME, TAG_PUBKEY, VERSION_1, VERSION_2,
};
use crate::wire::{WireReader, WireWriter};

/// A 16-byte card GUID identifying a physical PIV token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid([u8; GUID_SIZE]);

impl Guid {
    /// Creates a GUID from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; GUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a random GUID (useful for tests and provisioning).
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; GUID_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Returns the raw GUID bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; GUID_SIZE] {
        &self.0
    }

    /// Renders the GUID as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a GUID from a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadLength`] if the string is not exactly 16 bytes of
    /// hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::BadLength {
            context: "guid hex",
            expected: GUID_SIZE * 2,
            found: s.len(),
        })?;
        let arr: [u8; GUID_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| Error::BadLength {
            context: "guid hex",
            expected: GUID_SIZE,
            found: b.len(),
        })?;
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({})", self.to_hex())
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The type of an access configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    /// A single token that unlocks the ebox on its own.
    Primary,
    /// A threshold of tokens assembled through challenge/response recovery.
    Recovery,
}

impl ConfigType {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Primary => CONFIG_PRIMARY,
            Self::Recovery => CONFIG_RECOVERY,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self> {
        match value {
            CONFIG_PRIMARY => Ok(Self::Primary),
            CONFIG_RECOVERY => Ok(Self::Recovery),
            tag => Err(Error::BadTag {
                context: "config type",
                tag,
            }),
        }
    }
}

/// One PIV token's position in a configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct TplPart {
    pubkey: PublicKey,
    name: Option<String>,
    cak: Option<PublicKey>,
    guid: Guid,
}

impl TplPart {
    /// Creates a part from its slot public key and card GUID.
    #[must_use]
    pub const fn new(pubkey: PublicKey, guid: Guid) -> Self {
        Self {
            pubkey,
            name: None,
            cak: None,
            guid,
        }
    }

    /// Sets the human-readable label for the part.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the card-authentication public key for the part.
    #[must_use]
    pub fn with_cak(mut self, cak: PublicKey) -> Self {
        self.cak = Some(cak);
        self
    }

    /// Returns the slot public key.
    #[must_use]
    pub const fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    /// Returns the human-readable label, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the card-authentication public key, if any.
    #[must_use]
    pub const fn cak(&self) -> Option<&PublicKey> {
        self.cak.as_ref()
    }

    /// Returns the card GUID.
    #[must_use]
    pub const fn guid(&self) -> &Guid {
        &self.guid
    }
}

/// One configuration inside a template.
#[derive(Clone, Debug, PartialEq)]
pub struct TplConfig {
    config_type: ConfigType,
    threshold: u8,
    parts: Vec<TplPart>,
}

impl TplConfig {
    /// Creates an empty configuration of the given type and threshold.
    #[must_use]
    pub const fn new(config_type: ConfigType, threshold: u8) -> Self {
        Self {
            config_type,
            threshold,
            parts: Vec::new(),
        }
    }

    /// Appends a part to the configuration.
    pub fn add_part(&mut self, part: TplPart) {
        self.parts.push(part);
    }

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

    /// Returns the ordered parts.
    #[must_use]
    pub fn parts(&self) -> &[TplPart] {
        &self.parts
    }

    /// Checks the structural invariants for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTemplate`] if a PRIMARY configuration does
    /// not have exactly one part with threshold 1, or a RECOVERY
    /// configuration violates M ≥ N ≥ 1, M ≥ 2, or M ≤ 255.
    pub fn validate(&self) -> Result<()> {
        let m = self.parts.len();
        let n = usize::from(self.threshold);
        match self.config_type {
            ConfigType::Primary => {
                if m != 1 || n != 1 {
                    return Err(Error::InvalidTemplate {
                        reason: format!(
                            "primary configuration must have exactly one part and \
                             threshold 1, got {m} parts, threshold {n}"
                        ),
                    });
                }
            }
            ConfigType::Recovery => {
                if n < 1 || m < 2 || m < n {
                    return Err(Error::InvalidTemplate {
                        reason: format!(
                            "recovery configuration requires M >= N >= 1 and M >= 2, \
                             got {m} parts, threshold {n}"
                        ),
                    });
                }
                if m > 255 {
                    return Err(Error::InvalidTemplate {
                        reason: format!("recovery configuration has too many parts ({m})"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A declarative access policy: an ordered list of configurations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tpl {
    configs: Vec<TplConfig>,
}

impl Tpl {
    /// Creates an empty template.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            configs: Vec::new(),
        }
    }

    /// Appends a configuration to the template.
    pub fn add_config(&mut self, config: TplConfig) {
        self.configs.push(config);
    }

    /// Returns the ordered configurations.
    #[must_use]
    pub fn configs(&self) -> &[TplConfig] {
        &self.configs
    }

    /// Checks the structural invariants of the whole template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoConfigs`] for an empty template, or
    /// [`Error::InvalidTemplate`] if any configuration is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.configs.is_empty() {
            return Err(Error::NoConfigs);
        }
        if self.configs.len() > 255 {
            return Err(Error::InvalidTemplate {
                reason: format!("too many configurations ({})", self.configs.len()),
            });
        }
        for config in &self.configs {
            config.validate()?;
        }
        Ok(())
    }

    /// Encodes the template to its binary form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        // Callers are expected to have validated; encode what is present.
        #[allow(clippy::cast_possible_truncation)]
        let nconfigs = self.configs.len() as u8;
        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_TEMPLATE);
        w.put_u8(nconfigs);
        for config in &self.configs {
            #[allow(clippy::cast_possible_truncation)]
            let nparts = config.parts.len() as u8;
            w.put_u8(config.config_type.as_u8());
            w.put_u8(config.threshold);
            w.put_u8(nparts);
            for part in &config.parts {
                write_part_tlv(&mut w, part, None);
            }
        }
        w.into_bytes()
    }

    /// Decodes a template from its binary form.
    ///
    /// # Errors
    ///
    /// Returns a decode error on truncation, bad magic, unsupported version,
    /// wrong object kind, or malformed parts.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        read_object_header(&mut r, KIND_TEMPLATE)?;

        let nconfigs = r.get_u8("template config count")?;
        let mut configs = Vec::with_capacity(usize::from(nconfigs));
        for _ in 0..nconfigs {
            let config_type = ConfigType::from_u8(r.get_u8("config type")?)?;
            let threshold = r.get_u8("config threshold")?;
            let nparts = r.get_u8("config part count")?;
            let mut config = TplConfig::new(config_type, threshold);
            for _ in 0..nparts {
                let fields = read_part_tlv(&mut r, false)?;
                let (part, _) = fields.into_part("template part")?;
                config.add_part(part);
            }
            configs.push(config);
        }
        Ok(Self { configs })
    }

    /// Encodes the template as base64 for ASCII storage contexts.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD.encode(self.encode())
    }

    /// Decodes a template from its base64 form.
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
                context: "template base64",
            })?;
        Self::decode(&bytes)
    }
}

/// Reads and validates the magic/version/kind prefix of a persisted object.
/// Returns the format version.
pub(crate) fn read_object_header(r: &mut WireReader<'_>, expected_kind: u8) -> Result<u8> {
    let magic = r.get_raw(BOX_MAGIC.len(), "object magic")?;
    if magic != BOX_MAGIC {
        return Err(Error::BadMagic {
            expected: BOX_MAGIC,
            found: magic.to_vec(),
        });
    }
    let version = r.get_u8("object version")?;
    if version != VERSION_1 && version != VERSION_2 {
        return Err(Error::UnsupportedVersion { found: version });
    }
    let kind = r.get_u8("object kind")?;
    if kind != expected_kind {
        return Err(Error::BadKind { found: kind });
    }
    Ok(version)
}

/// Accumulated part fields from a tag stream.
#[derive(Default)]
pub(crate) struct PartFields {
    pubkey: Option<PublicKey>,
    name: Option<String>,
    cak: Option<PublicKey>,
    guid: Option<Guid>,
    keybox: Option<EcdhBox>,
}

impl PartFields {
    /// Converts accumulated fields into a part, checking mandatory tags.
    pub(crate) fn into_part(self, context: &'static str) -> Result<(TplPart, Option<EcdhBox>)> {
        let pubkey = self.pubkey.ok_or(Error::BadTag {
            context,
            tag: TAG_PUBKEY,
        })?;
        let guid = self.guid.ok_or(Error::BadTag {
            context,
            tag: TAG_GUID,
        })?;
        let mut part = TplPart::new(pubkey, guid);
        if let Some(name) = self.name {
            part = part.with_name(name);
        }
        if let Some(cak) = self.cak {
            part = part.with_cak(cak);
        }
        Ok((part, self.keybox))
    }
}

/// Writes one part as a tag stream, with its sealed box when encoding an
/// ebox part.
pub(crate) fn write_part_tlv(w: &mut WireWriter, part: &TplPart, keybox: Option<&EcdhBox>) {
    w.put_u8(TAG_PUBKEY);
    w.put_bytes(&encode_pubkey(&part.pubkey));
    if let Some(name) = &part.name {
        w.put_u8(TAG_NAME);
        w.put_str(name);
    }
    if let Some(cak) = &part.cak {
        w.put_u8(TAG_CAK);
        w.put_bytes(&encode_pubkey(cak));
    }
    w.put_u8(TAG_GUID);
    w.put_bytes(part.guid.as_bytes());
    if let Some(keybox) = keybox {
        w.put_u8(TAG_BOX);
        w.put_bytes(&keybox.encode());
    }
    w.put_u8(TAG_END);
}

/// Reads one part's tag stream. Unknown tags are skipped; [`TAG_BOX`] is
/// only accepted when `allow_box` is set (ebox parts).
pub(crate) fn read_part_tlv(r: &mut WireReader<'_>, allow_box: bool) -> Result<PartFields> {
    let mut fields = PartFields::default();
    loop {
        let tag = r.get_u8("part tag")?;
        match tag {
            TAG_END => break,
            TAG_PUBKEY => {
                fields.pubkey = Some(decode_pubkey(r.get_bytes("part pubkey")?, "part pubkey")?);
            }
            TAG_NAME => fields.name = Some(r.get_str("part name")?),
            TAG_CAK => {
                fields.cak = Some(decode_pubkey(r.get_bytes("part cak")?, "part cak")?);
            }
            TAG_GUID => {
                let bytes = r.get_bytes("part guid")?;
                if bytes.len() != GUID_SIZE {
                    return Err(Error::BadLength {
                        context: "part guid",
                        expected: GUID_SIZE,
                        found: bytes.len(),
                    });
                }
                let mut guid = [0u8; GUID_SIZE];
                guid.copy_from_slice(bytes);
                fields.guid = Some(Guid::new(guid));
            }
            TAG_BOX if allow_box => {
                fields.keybox = Some(EcdhBox::decode(r.get_bytes("part box")?)?);
            }
            TAG_BOX => {
                return Err(Error::BadTag {
                    context: "template part",
                    tag,
                });
            }
            // Unknown tag: skip its byte-string value.
            _ => {
                let _ = r.get_bytes("unknown part tag")?;
            }
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use p256::SecretKey;
    use rand::rngs::OsRng;

    use super::*;
    use crate::format::VERSION_1;

    fn part(name: &str) -> TplPart {
        let pubkey = SecretKey::random(&mut OsRng).public_key();
        TplPart::new(pubkey, Guid::generate()).with_name(name)
    }

    fn sample_template() -> Tpl {
        let mut primary = TplConfig::new(ConfigType::Primary, 1);
        primary.add_part(part("laptop"));

        let mut recovery = TplConfig::new(ConfigType::Recovery, 2);
        recovery.add_part(part("alice"));
        recovery.add_part(part("bob"));
        recovery.add_part(part("carol"));

        let mut tpl = Tpl::new();
        tpl.add_config(primary);
        tpl.add_config(recovery);
        tpl
    }

    #[test]
    fn test_validate_accepts_sample() {
        sample_template().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(Tpl::new().validate(), Err(Error::NoConfigs)));
    }

    #[test]
    fn test_validate_rejects_bad_primary() {
        let mut config = TplConfig::new(ConfigType::Primary, 1);
        config.add_part(part("a"));
        config.add_part(part("b"));
        let mut tpl = Tpl::new();
        tpl.add_config(config);
        assert!(matches!(
            tpl.validate(),
            Err(Error::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_recovery() {
        // M = 1 is below the minimum of 2.
        let mut config = TplConfig::new(ConfigType::Recovery, 1);
        config.add_part(part("only"));
        let mut tpl = Tpl::new();
        tpl.add_config(config);
        assert!(matches!(
            tpl.validate(),
            Err(Error::InvalidTemplate { .. })
        ));

        // N > M.
        let mut config = TplConfig::new(ConfigType::Recovery, 3);
        config.add_part(part("a"));
        config.add_part(part("b"));
        let mut tpl = Tpl::new();
        tpl.add_config(config);
        assert!(matches!(
            tpl.validate(),
            Err(Error::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn test_codec_roundtrip() {
        let tpl = sample_template();
        let encoded = tpl.encode();
        let decoded = Tpl::decode(&encoded).unwrap();
        assert_eq!(tpl, decoded);
    }

    #[test]
    fn test_base64_roundtrip() {
        let tpl = sample_template();
        let armored = tpl.to_base64();
        let decoded = Tpl::from_base64(&armored).unwrap();
        assert_eq!(tpl, decoded);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut encoded = sample_template().encode();
        encoded[0] = b'X';
        assert!(matches!(
            Tpl::decode(&encoded),
            Err(Error::BadMagic { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_kind() {
        let mut encoded = sample_template().encode();
        encoded[5] = crate::format::KIND_STREAM;
        assert!(matches!(
            Tpl::decode(&encoded),
            Err(Error::BadKind { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_box_tag_in_template() {
        let pubkey = SecretKey::random(&mut OsRng).public_key();
        let sealed = EcdhBox::seal(&pubkey, b"x").unwrap();

        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_TEMPLATE);
        w.put_u8(1);
        w.put_u8(CONFIG_PRIMARY);
        w.put_u8(1);
        w.put_u8(1);
        w.put_u8(TAG_PUBKEY);
        w.put_bytes(&encode_pubkey(&pubkey));
        w.put_u8(TAG_BOX);
        w.put_bytes(&sealed.encode());
        w.put_u8(TAG_END);

        assert!(matches!(
            Tpl::decode(&w.into_bytes()),
            Err(Error::BadTag { .. })
        ));
    }

    #[test]
    fn test_decode_skips_unknown_tags() {
        let pubkey = SecretKey::random(&mut OsRng).public_key();
        let guid = Guid::generate();

        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_TEMPLATE);
        w.put_u8(1);
        w.put_u8(CONFIG_PRIMARY);
        w.put_u8(1);
        w.put_u8(1);
        w.put_u8(TAG_PUBKEY);
        w.put_bytes(&encode_pubkey(&pubkey));
        w.put_u8(0xFE);
        w.put_bytes(&[1, 2, 3, 4]);
        w.put_u8(TAG_GUID);
        w.put_bytes(guid.as_bytes());
        w.put_u8(TAG_END);

        let tpl = Tpl::decode(&w.into_bytes()).unwrap();
        assert_eq!(tpl.configs().len(), 1);
        let part = &tpl.configs()[0].parts()[0];
        assert_eq!(part.guid(), &guid);
        assert_eq!(part.pubkey(), &pubkey);
    }

    #[test]
    fn test_decode_rejects_missing_mandatory_tag() {
        let pubkey = SecretKey::random(&mut OsRng).public_key();

        let mut w = WireWriter::new();
        w.put_raw(BOX_MAGIC);
        w.put_u8(VERSION_1);
        w.put_u8(KIND_TEMPLATE);
        w.put_u8(1);
        w.put_u8(CONFIG_PRIMARY);
        w.put_u8(1);
        w.put_u8(1);
        w.put_u8(TAG_PUBKEY);
        w.put_bytes(&encode_pubkey(&pubkey));
        w.put_u8(TAG_END); // no GUID

        assert!(matches!(
            Tpl::decode(&w.into_bytes()),
            Err(Error::BadTag {
                tag: TAG_GUID,
                ..
            })
        ));
    }

    #[test]
    fn test_clone_is_deep() {
        let tpl = sample_template();
        let mut cloned = tpl.clone();
        cloned.add_config(TplConfig::new(ConfigType::Primary, 1));
        assert_eq!(tpl.configs().len(), 2);
        assert_eq!(cloned.configs().len(), 3);
    }

    #[test]
    fn test_guid_hex_roundtrip() {
        let guid = Guid::new([0xAB; GUID_SIZE]);
        let hex = guid.to_hex();
        assert_eq!(Guid::from_hex(&hex).unwrap(), guid);
        assert!(Guid::from_hex("abcd").is_err());
    }
}
