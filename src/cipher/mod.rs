//! Cipher schemes used by providers to hide resource locators
//!
//! Each provider names an ordered list of [`CipherScheme`]s. Schemes are data:
//! the engine interprets them with the small closed set of implementations in
//! this module and never evaluates provider code.

pub mod block;
pub mod deriver;
pub mod engine;
pub mod keys;
pub mod rc4;
pub mod substitution;
pub mod xor_stream;

pub use block::{BlockCipherId, Reinterpret};
pub use deriver::{KeyDeriver, KnownPlaintextSample};
pub use engine::{CipherEngine, DecodeOutcome, KeyOrigin};
pub use keys::{KeyEntry, KeyMaterial, Keystream, SchemeKey};

use crate::error::UnsealError;
use crate::platform::EncodedPayload;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};

const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(true)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard base64 accepting padded and unpadded input
pub(crate) const STANDARD_LENIENT: GeneralPurpose =
    GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);

/// URL-safe base64 accepting padded and unpadded input
pub(crate) const URL_SAFE_LENIENT: GeneralPurpose =
    GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

/// How stream-cipher ciphertext is carried inside the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Base64,
    Base64Url,
    /// Each char is one byte (Latin-1)
    Raw,
}

impl PayloadEncoding {
    pub fn decode(&self, text: &str) -> Result<Vec<u8>, UnsealError> {
        match self {
            PayloadEncoding::Base64 => Ok(STANDARD_LENIENT.decode(strip_whitespace(text))?),
            PayloadEncoding::Base64Url => Ok(URL_SAFE_LENIENT.decode(strip_whitespace(text))?),
            PayloadEncoding::Raw => text
                .chars()
                .map(|c| {
                    u8::try_from(c as u32).map_err(|_| {
                        UnsealError::Decode(format!("Raw payload char {:?} exceeds one byte", c))
                    })
                })
                .collect(),
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            PayloadEncoding::Base64 => STANDARD_LENIENT.encode(bytes),
            PayloadEncoding::Base64Url => URL_SAFE_LENIENT.encode(bytes),
            PayloadEncoding::Raw => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Where an RC4 scheme takes its key from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Recovered material from the key store
    #[default]
    Stored,
    /// The auxiliary id extracted next to the payload
    Auxiliary,
}

/// A provider cipher scheme. Key-bearing variants reference stored
/// [`KeyMaterial`] through `(provider, version)`, never literal keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CipherScheme {
    Substitution {
        alphabet: String,
    },
    XorStream {
        version: u32,
        window: usize,
        /// Provider diff table, `window` bytes (empty means all zero)
        #[serde(default, with = "keys::b64")]
        header: Vec<u8>,
        #[serde(default)]
        encoding: PayloadEncoding,
        #[serde(default)]
        known_prefix: Option<String>,
    },
    Rc4 {
        version: u32,
        #[serde(default)]
        key_source: KeySource,
        #[serde(default)]
        encoding: PayloadEncoding,
        #[serde(default)]
        known_prefix: Option<String>,
    },
    BlockCipherSubst {
        version: u32,
        cipher: BlockCipherId,
        #[serde(default)]
        alphabet: Option<String>,
        #[serde(default)]
        reinterpret: Reinterpret,
        #[serde(default)]
        known_prefix: Option<String>,
    },
}

impl CipherScheme {
    /// Short tag used in logs and attempt records
    pub fn tag(&self) -> String {
        match self {
            CipherScheme::Substitution { .. } => "substitution".to_string(),
            CipherScheme::XorStream { version, window, .. } => {
                format!("xor_stream/w{}@v{}", window, version)
            }
            CipherScheme::Rc4 {
                version,
                key_source: KeySource::Auxiliary,
                ..
            } => format!("rc4/aux@v{}", version),
            CipherScheme::Rc4 { version, .. } => format!("rc4@v{}", version),
            CipherScheme::BlockCipherSubst {
                version, cipher, ..
            } => format!("block/{}@v{}", cipher, version),
        }
    }

    /// Scheme version, for schemes whose key lives in the store
    pub fn version(&self) -> Option<u32> {
        match self {
            CipherScheme::Substitution { .. } => None,
            CipherScheme::Rc4 {
                key_source: KeySource::Auxiliary,
                ..
            } => None,
            CipherScheme::XorStream { version, .. }
            | CipherScheme::Rc4 { version, .. }
            | CipherScheme::BlockCipherSubst { version, .. } => Some(*version),
        }
    }

    pub fn scheme_key(&self, provider: &str) -> Option<SchemeKey> {
        self.version().map(|version| SchemeKey::new(provider, version))
    }

    pub fn known_prefix(&self) -> Option<&str> {
        match self {
            CipherScheme::Substitution { .. } => None,
            CipherScheme::XorStream { known_prefix, .. }
            | CipherScheme::Rc4 { known_prefix, .. }
            | CipherScheme::BlockCipherSubst { known_prefix, .. } => known_prefix.as_deref(),
        }
    }

    /// Reject parameter combinations no payload could satisfy
    pub fn check(&self) -> Result<(), UnsealError> {
        match self {
            CipherScheme::Substitution { alphabet } => {
                substitution::SubstitutionAlphabet::new(alphabet).map(|_| ())
            }
            CipherScheme::XorStream { window, header, .. } => {
                if *window == 0 {
                    return Err(UnsealError::Config("XOR window must be positive".to_string()));
                }
                if !header.is_empty() && header.len() != *window {
                    return Err(UnsealError::Config(format!(
                        "XOR header has {} bytes, window is {}",
                        header.len(),
                        window
                    )));
                }
                Ok(())
            }
            CipherScheme::Rc4 { .. } => Ok(()),
            CipherScheme::BlockCipherSubst { alphabet, .. } => match alphabet {
                Some(alphabet) => substitution::SubstitutionAlphabet::new(alphabet).map(|_| ()),
                None => Ok(()),
            },
        }
    }
}

/// Candidate plaintext produced by one scheme; judged only by validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResult {
    pub bytes: Vec<u8>,
    pub scheme: String,
}

impl DecodedResult {
    pub fn new(bytes: Vec<u8>, scheme: String) -> Self {
        Self { bytes, scheme }
    }

    /// Candidate as text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

fn wrong_material(scheme: &CipherScheme, material: &KeyMaterial) -> UnsealError {
    UnsealError::Decode(format!(
        "Scheme {} cannot use {} material",
        scheme.tag(),
        material.kind()
    ))
}

/// Decode `payload` with `scheme`. Pure: key lookup and derivation happen in
/// [`CipherEngine`]; schemes that need a key fail without one.
pub fn decode(
    payload: &EncodedPayload,
    scheme: &CipherScheme,
    material: Option<&KeyMaterial>,
) -> Result<DecodedResult, UnsealError> {
    let missing_key = || {
        UnsealError::UnsupportedSchemeVersion {
            provider: payload.provider.clone(),
            version: scheme.version().unwrap_or_default(),
        }
    };

    let bytes = match scheme {
        CipherScheme::Substitution { alphabet } => substitution::decode(alphabet, &payload.data)?,
        CipherScheme::XorStream {
            window, encoding, ..
        } => {
            let cipher = encoding.decode(&payload.data)?;
            match material.ok_or_else(missing_key)? {
                KeyMaterial::Keystream(keystream) => {
                    keystream.check()?;
                    if keystream.window != *window {
                        return Err(UnsealError::Decode(format!(
                            "Stored keystream window {} does not match scheme window {}",
                            keystream.window, window
                        )));
                    }
                    xor_stream::decode(&cipher, keystream)
                }
                other => return Err(wrong_material(scheme, other)),
            }
        }
        CipherScheme::Rc4 {
            key_source,
            encoding,
            ..
        } => {
            let cipher = encoding.decode(&payload.data)?;
            match key_source {
                KeySource::Auxiliary => {
                    let aux = payload.aux.as_deref().ok_or_else(|| {
                        UnsealError::Decode("RC4 scheme needs an auxiliary id".to_string())
                    })?;
                    rc4::apply(aux.as_bytes(), &cipher)?
                }
                KeySource::Stored => match material.ok_or_else(missing_key)? {
                    KeyMaterial::FixedKey { key } => rc4::apply(key, &cipher)?,
                    other => return Err(wrong_material(scheme, other)),
                },
            }
        }
        CipherScheme::BlockCipherSubst {
            cipher,
            alphabet,
            reinterpret,
            ..
        } => {
            let data = block::ciphertext_bytes(&payload.data, alphabet.as_deref(), *reinterpret)?;
            match material.ok_or_else(missing_key)? {
                KeyMaterial::BlockKey { key, iv } => block::decrypt(*cipher, key, iv, &data)?,
                other => return Err(wrong_material(scheme, other)),
            }
        }
    };

    Ok(DecodedResult::new(bytes, scheme.tag()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &str, aux: Option<&str>) -> EncodedPayload {
        EncodedPayload {
            provider: "test".to_string(),
            data: data.to_string(),
            aux: aux.map(str::to_string),
            key_candidates: Vec::new(),
            origin_url: "https://player.example/e/1".to_string(),
        }
    }

    #[test]
    fn test_payload_encoding_round_trip() {
        let bytes = vec![0u8, 0xff, 0x10, b'a'];
        for encoding in [
            PayloadEncoding::Base64,
            PayloadEncoding::Base64Url,
            PayloadEncoding::Raw,
        ] {
            assert_eq!(encoding.decode(&encoding.encode(&bytes)).unwrap(), bytes);
        }
        assert!(PayloadEncoding::Raw.decode("\u{0100}").is_err());
    }

    #[test]
    fn test_scheme_serde_and_tag() {
        let json = r#"{"kind":"xor_stream","version":2,"window":19,"known_prefix":"https://example.tv/"}"#;
        let scheme: CipherScheme = serde_json::from_str(json).unwrap();
        assert_eq!(scheme.tag(), "xor_stream/w19@v2");
        assert_eq!(scheme.version(), Some(2));
        assert_eq!(scheme.known_prefix(), Some("https://example.tv/"));
        assert!(scheme.check().is_ok());

        let aux: CipherScheme =
            serde_json::from_str(r#"{"kind":"rc4","version":1,"key_source":"auxiliary"}"#).unwrap();
        assert_eq!(aux.tag(), "rc4/aux@v1");
        assert_eq!(aux.version(), None);

        let block: CipherScheme = serde_json::from_str(
            r#"{"kind":"block_cipher_subst","version":4,"cipher":"aes-256-cbc","reinterpret":"reverse"}"#,
        )
        .unwrap();
        assert_eq!(block.tag(), "block/aes-256-cbc@v4");
    }

    #[test]
    fn test_scheme_check_rejects_bad_header() {
        let scheme = CipherScheme::XorStream {
            version: 1,
            window: 4,
            header: vec![1, 2],
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        assert!(scheme.check().is_err());
    }

    #[test]
    fn test_decode_rc4_auxiliary_key() {
        let cipher = rc4::apply(b"k3y-1d", b"https://cdn.example/v.mp4").unwrap();
        let scheme = CipherScheme::Rc4 {
            version: 1,
            key_source: KeySource::Auxiliary,
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        let p = payload(&PayloadEncoding::Base64.encode(&cipher), Some("k3y-1d"));
        let result = decode(&p, &scheme, None).unwrap();
        assert_eq!(result.text(), Some("https://cdn.example/v.mp4"));
        assert_eq!(result.scheme, "rc4/aux@v1");
    }

    #[test]
    fn test_decode_without_material() {
        let scheme = CipherScheme::Rc4 {
            version: 7,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        let err = decode(&payload("AAAA", None), &scheme, None).unwrap_err();
        assert!(matches!(
            err,
            UnsealError::UnsupportedSchemeVersion { version: 7, .. }
        ));
    }

    #[test]
    fn test_decode_wrong_material_kind() {
        let scheme = CipherScheme::Rc4 {
            version: 1,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        let material = KeyMaterial::BlockKey {
            key: vec![0; 16],
            iv: vec![0; 16],
        };
        let err = decode(&payload("AAAA", None), &scheme, Some(&material)).unwrap_err();
        assert!(matches!(err, UnsealError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_inconsistent_keystream() {
        let scheme = CipherScheme::XorStream {
            version: 5,
            window: 4,
            header: vec![],
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        // seed shorter than the window
        let short = KeyMaterial::Keystream(Keystream {
            window: 4,
            header: vec![],
            seed: vec![1, 2],
        });
        let err = decode(&payload("AAAAAAAA", None), &scheme, Some(&short)).unwrap_err();
        assert!(matches!(err, UnsealError::Decode(_)));

        // consistent material for a different window
        let other_window = KeyMaterial::Keystream(Keystream {
            window: 2,
            header: vec![],
            seed: vec![1, 2],
        });
        let err = decode(&payload("AAAAAAAA", None), &scheme, Some(&other_window)).unwrap_err();
        assert!(matches!(err, UnsealError::Decode(_)));
    }
}
