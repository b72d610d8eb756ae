//! Known-plaintext key recovery
//!
//! Given one payload whose plaintext prefix is known, solve for reusable key
//! material. Every result is checked by re-encoding the known prefix with the
//! derived key before it is returned; unverified material is never published.

use crate::cipher::block::{self, BLOCK_SIZE};
use crate::cipher::keys::{KeyMaterial, Keystream, SchemeKey};
use crate::cipher::{rc4, xor_stream, CipherScheme, KeySource, STANDARD_LENIENT};
use crate::error::UnsealError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound on candidate keys tried per derivation
pub const MAX_CANDIDATES: usize = 64;

/// Out-of-band sample used to seed the key store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPlaintextSample {
    pub provider: String,
    pub scheme_version: u32,
    /// Payload exactly as it appears in the page
    pub ciphertext: String,
    pub known_prefix: String,
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// Stateless, deterministic key deriver
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver;

impl KeyDeriver {
    pub fn new() -> Self {
        Self
    }

    /// Solve key material for `scheme` from one payload and its known prefix.
    ///
    /// `candidates` are tried in order for schemes whose key cannot be computed
    /// from plaintext alone (RC4 and block ciphers).
    pub fn derive_key(
        &self,
        key: &SchemeKey,
        scheme: &CipherScheme,
        sample: &str,
        known_prefix: &[u8],
        candidates: &[String],
    ) -> Result<KeyMaterial, UnsealError> {
        let fail = |reason: String| UnsealError::KeyDerivationFailed {
            provider: key.provider.clone(),
            version: key.version,
            reason,
        };

        if known_prefix.is_empty() {
            return Err(fail("empty known plaintext".to_string()));
        }

        let material = match scheme {
            CipherScheme::Substitution { .. } => {
                return Err(fail("substitution schemes carry no key".to_string()))
            }
            CipherScheme::XorStream {
                window,
                header,
                encoding,
                ..
            } => {
                let cipher = encoding.decode(sample)?;
                derive_keystream(*window, header, &cipher, known_prefix).map_err(fail)?
            }
            CipherScheme::Rc4 {
                key_source: KeySource::Auxiliary,
                ..
            } => return Err(fail("auxiliary RC4 keys are per request".to_string())),
            CipherScheme::Rc4 { encoding, .. } => {
                let cipher = encoding.decode(sample)?;
                derive_rc4(&cipher, known_prefix, candidates).map_err(fail)?
            }
            CipherScheme::BlockCipherSubst {
                cipher,
                alphabet,
                reinterpret,
                ..
            } => {
                let data = block::ciphertext_bytes(sample, alphabet.as_deref(), *reinterpret)?;
                derive_block(*cipher, &data, known_prefix, candidates).map_err(fail)?
            }
        };

        debug!(key = %key, kind = material.kind(), "Derived key material");
        Ok(material)
    }
}

fn derive_keystream(
    window: usize,
    header: &[u8],
    cipher: &[u8],
    known_prefix: &[u8],
) -> Result<KeyMaterial, String> {
    if window == 0 {
        return Err("window must be positive".to_string());
    }
    if known_prefix.len() < window {
        return Err(format!(
            "known plaintext has {} bytes, window needs {}",
            known_prefix.len(),
            window
        ));
    }
    if cipher.len() < known_prefix.len() {
        return Err("sample is shorter than the known plaintext".to_string());
    }
    if !header.is_empty() && header.len() != window {
        return Err(format!(
            "header has {} bytes, window is {}",
            header.len(),
            window
        ));
    }

    let seed = cipher[..window]
        .iter()
        .zip(&known_prefix[..window])
        .map(|(c, p)| c ^ p)
        .collect();
    let keystream = Keystream {
        window,
        header: header.to_vec(),
        seed,
    };

    // prefix bytes past the window test the recurrence itself
    let reencoded = xor_stream::encode(known_prefix, &keystream);
    if reencoded != cipher[..known_prefix.len()] {
        let offset = reencoded
            .iter()
            .zip(cipher)
            .position(|(a, b)| a != b)
            .unwrap_or(known_prefix.len());
        return Err(format!(
            "recurrence diverges from known plaintext at byte {}",
            offset
        ));
    }

    Ok(KeyMaterial::Keystream(keystream))
}

/// Raw candidate bytes, then the base64 reading if it decodes
fn candidate_keys(candidates: &[String]) -> Vec<Vec<u8>> {
    let mut keys: Vec<Vec<u8>> = Vec::new();
    for candidate in candidates.iter().take(MAX_CANDIDATES) {
        let raw = candidate.as_bytes().to_vec();
        if !raw.is_empty() && !keys.contains(&raw) {
            keys.push(raw);
        }
        if let Ok(decoded) = STANDARD_LENIENT.decode(candidate.trim()) {
            if !decoded.is_empty() && !keys.contains(&decoded) {
                keys.push(decoded);
            }
        }
    }
    keys
}

fn derive_rc4(
    cipher: &[u8],
    known_prefix: &[u8],
    candidates: &[String],
) -> Result<KeyMaterial, String> {
    if cipher.len() < known_prefix.len() {
        return Err("sample is shorter than the known plaintext".to_string());
    }
    let keys = candidate_keys(candidates);
    if keys.is_empty() {
        return Err("no candidate keys available".to_string());
    }

    let target = &cipher[..known_prefix.len()];
    for key in keys {
        match rc4::apply(&key, known_prefix) {
            Ok(reencoded) if reencoded == target => {
                return Ok(KeyMaterial::FixedKey { key });
            }
            _ => continue,
        }
    }
    Err("no candidate key reproduces the known plaintext".to_string())
}

fn derive_block(
    cipher: block::BlockCipherId,
    data: &[u8],
    known_prefix: &[u8],
    candidates: &[String],
) -> Result<KeyMaterial, String> {
    if known_prefix.len() < BLOCK_SIZE {
        return Err(format!(
            "known plaintext has {} bytes, IV solving needs {}",
            known_prefix.len(),
            BLOCK_SIZE
        ));
    }
    if data.len() < BLOCK_SIZE {
        return Err("sample is shorter than one block".to_string());
    }
    let keys: Vec<Vec<u8>> = candidate_keys(candidates)
        .into_iter()
        .filter(|key| key.len() == cipher.key_len())
        .collect();
    if keys.is_empty() {
        return Err(format!(
            "no {}-byte candidate keys available",
            cipher.key_len()
        ));
    }

    for key in keys {
        let Some(iv) = block::solve_iv(cipher, &key, data, known_prefix) else {
            continue;
        };
        let Ok(plain) = block::decrypt(cipher, &key, &iv, data) else {
            continue;
        };
        if !plain.starts_with(known_prefix) {
            continue;
        }
        match block::encrypt(cipher, &key, &iv, &plain) {
            Ok(reencoded) if reencoded == data => return Ok(KeyMaterial::BlockKey { key, iv }),
            _ => continue,
        }
    }
    Err("no candidate key reproduces the known plaintext".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{BlockCipherId, PayloadEncoding, Reinterpret};

    const PREFIX: &str = "https://example.tv/";
    const PLAIN: &str = "https://example.tv/stream/4f9a2c71/index.m3u8?t=Zx81Qp&e=1767225600&s=hd1080";
    const HEADER: [u8; 19] = [
        0x3c, 0x91, 0x07, 0xe2, 0x55, 0x1a, 0xd8, 0x6f, 0x20, 0xb4, 0x09, 0x7e, 0xc1, 0x33, 0x8a,
        0x4d, 0xf6, 0x12, 0x9b,
    ];
    const SEED: [u8; 19] = [
        0xa7, 0x0e, 0x63, 0xd4, 0x18, 0xbb, 0x42, 0xf9, 0x5c, 0x81, 0x2d, 0xe0, 0x76, 0x1f, 0xc8,
        0x35, 0x9a, 0x4b, 0x60,
    ];

    fn xor_scheme(known_prefix: &str) -> CipherScheme {
        CipherScheme::XorStream {
            version: 1,
            window: 19,
            header: HEADER.to_vec(),
            encoding: PayloadEncoding::Base64,
            known_prefix: Some(known_prefix.to_string()),
        }
    }

    fn provider_keystream() -> Keystream {
        Keystream {
            window: 19,
            header: HEADER.to_vec(),
            seed: SEED.to_vec(),
        }
    }

    #[test]
    fn test_window_19_fixture_recovers_full_plaintext() {
        assert_eq!(PREFIX.len(), 19);
        assert_eq!(PLAIN.len(), 76);

        let cipher = xor_stream::encode(PLAIN.as_bytes(), &provider_keystream());
        assert_eq!(cipher.len(), 76);
        let sample = PayloadEncoding::Base64.encode(&cipher);

        let key = SchemeKey::new("embedbox", 1);
        let material = KeyDeriver::new()
            .derive_key(&key, &xor_scheme(PREFIX), &sample, PREFIX.as_bytes(), &[])
            .unwrap();

        let KeyMaterial::Keystream(keystream) = &material else {
            panic!("expected keystream material");
        };
        assert_eq!(keystream.seed, SEED.to_vec());

        let decoded = xor_stream::decode(&cipher, keystream);
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "https://example.tv/stream/4f9a2c71/index.m3u8?t=Zx81Qp&e=1767225600&s=hd1080"
        );
    }

    #[test]
    fn test_derived_keystream_round_trips_other_messages() {
        let cipher = xor_stream::encode(PLAIN.as_bytes(), &provider_keystream());
        let sample = PayloadEncoding::Base64.encode(&cipher);
        let material = KeyDeriver::new()
            .derive_key(
                &SchemeKey::new("embedbox", 1),
                &xor_scheme(PREFIX),
                &sample,
                PREFIX.as_bytes(),
                &[],
            )
            .unwrap();
        let KeyMaterial::Keystream(keystream) = material else {
            panic!("expected keystream material");
        };

        let other = b"https://example.tv/vod/0001/playlist.m3u8?token=ffffffffffffffffffffffffffffffffffffffff";
        let encoded = xor_stream::encode(other, &keystream);
        assert_eq!(xor_stream::decode(&encoded, &keystream), other.to_vec());
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let cipher = xor_stream::encode(PLAIN.as_bytes(), &provider_keystream());
        let sample = PayloadEncoding::Base64.encode(&cipher);
        let key = SchemeKey::new("embedbox", 1);
        let deriver = KeyDeriver::new();
        let first = deriver
            .derive_key(&key, &xor_scheme(PREFIX), &sample, PREFIX.as_bytes(), &[])
            .unwrap();
        let second = deriver
            .derive_key(&key, &xor_scheme(PREFIX), &sample, PREFIX.as_bytes(), &[])
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_changed_header_fails_self_check() {
        let cipher = xor_stream::encode(PLAIN.as_bytes(), &provider_keystream());
        let sample = PayloadEncoding::Base64.encode(&cipher);
        let mut drifted = HEADER;
        drifted[0] ^= 0xff;
        let scheme = CipherScheme::XorStream {
            version: 1,
            window: 19,
            header: drifted.to_vec(),
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };

        // a prefix longer than the window exercises the recurrence
        let long_prefix = &PLAIN.as_bytes()[..30];
        let err = KeyDeriver::new()
            .derive_key(&SchemeKey::new("embedbox", 1), &scheme, &sample, long_prefix, &[])
            .unwrap_err();
        match err {
            UnsealError::KeyDerivationFailed { reason, .. } => {
                assert!(reason.contains("byte 19"), "{}", reason)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_prefix_shorter_than_window() {
        let cipher = xor_stream::encode(PLAIN.as_bytes(), &provider_keystream());
        let sample = PayloadEncoding::Base64.encode(&cipher);
        let err = KeyDeriver::new()
            .derive_key(
                &SchemeKey::new("embedbox", 1),
                &xor_scheme("https://"),
                &sample,
                b"https://",
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, UnsealError::KeyDerivationFailed { .. }));
    }

    #[test]
    fn test_rc4_candidate_search() {
        let key = "d2a1f09c7b3e4856a9c0e1f2b3d4c5e6";
        let plain = br#"{"file":"https://cdn.example/h/index.m3u8"}"#;
        let cipher = rc4::apply(key.as_bytes(), plain).unwrap();
        let scheme = CipherScheme::Rc4 {
            version: 3,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: Some(r#"{"file":""#.to_string()),
        };
        let candidates = vec![
            "not-the-key".to_string(),
            "0000000000000000".to_string(),
            key.to_string(),
        ];
        let material = KeyDeriver::new()
            .derive_key(
                &SchemeKey::new("jsoncdn", 3),
                &scheme,
                &PayloadEncoding::Base64.encode(&cipher),
                br#"{"file":""#,
                &candidates,
            )
            .unwrap();
        assert_eq!(
            material,
            KeyMaterial::FixedKey {
                key: key.as_bytes().to_vec()
            }
        );
    }

    #[test]
    fn test_rc4_without_candidates() {
        let scheme = CipherScheme::Rc4 {
            version: 3,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        let err = KeyDeriver::new()
            .derive_key(&SchemeKey::new("p", 3), &scheme, "AAAAAAAA", b"{\"", &[])
            .unwrap_err();
        assert!(matches!(err, UnsealError::KeyDerivationFailed { .. }));
    }

    #[test]
    fn test_block_key_and_iv_recovery() {
        let key = b"0123456789abcdef0123456789abcdef";
        let iv = b"fedcba9876543210";
        let alphabet = "zyxwvutsrqponmlkjihgfedcbaZYXWVUTSRQPONMLKJIHGFEDCBA0123456789+/";
        let plain = br#"{"sources":[{"file":"https://cdn.example/hls/master.m3u8","type":"hls"}]}"#;
        let encrypted = block::encrypt(BlockCipherId::Aes256Cbc, key, iv, plain).unwrap();
        let sample =
            block::ciphertext_text(&encrypted, Some(alphabet), Reinterpret::Reverse).unwrap();

        let scheme = CipherScheme::BlockCipherSubst {
            version: 2,
            cipher: BlockCipherId::Aes256Cbc,
            alphabet: Some(alphabet.to_string()),
            reinterpret: Reinterpret::Reverse,
            known_prefix: None,
        };
        let candidates = vec![
            "short".to_string(),
            "ffffffffffffffffffffffffffffffff".to_string(),
            String::from_utf8(key.to_vec()).unwrap(),
        ];
        let material = KeyDeriver::new()
            .derive_key(
                &SchemeKey::new("jsoncdn", 2),
                &scheme,
                &sample,
                br#"{"sources":[{"file":""#,
                &candidates,
            )
            .unwrap();
        assert_eq!(
            material,
            KeyMaterial::BlockKey {
                key: key.to_vec(),
                iv: iv.to_vec()
            }
        );
    }

    #[test]
    fn test_substitution_has_no_key() {
        let scheme = CipherScheme::Substitution {
            alphabet: crate::cipher::substitution::STANDARD_ALPHABET.to_string(),
        };
        let err = KeyDeriver::new()
            .derive_key(&SchemeKey::new("p", 1), &scheme, "", b"x", &[])
            .unwrap_err();
        assert!(matches!(err, UnsealError::KeyDerivationFailed { .. }));
    }
}
