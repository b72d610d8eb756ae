//! Key material recovered for provider cipher schemes

use crate::error::UnsealError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key for recovered material: one entry per provider format epoch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemeKey {
    pub provider: String,
    pub version: u32,
}

impl SchemeKey {
    pub fn new(provider: &str, version: u32) -> Self {
        Self {
            provider: provider.to_string(),
            version,
        }
    }
}

impl fmt::Display for SchemeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.provider, self.version)
    }
}

/// Ciphertext-feedback keystream.
///
/// The first `window` bytes are the recovered `seed`; every later byte follows
/// `ks[i] = ks[i - W] ^ cipher[i - W] ^ header[i mod W]`, so the stream for any
/// message length is rebuilt from the ciphertext alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keystream {
    pub window: usize,
    #[serde(with = "b64")]
    pub header: Vec<u8>,
    #[serde(with = "b64")]
    pub seed: Vec<u8>,
}

impl Keystream {
    /// Check the material is internally consistent: a non-zero window, a seed
    /// of exactly `window` bytes, and a header that is empty or `window` long
    pub fn check(&self) -> Result<(), UnsealError> {
        if self.window == 0 {
            return Err(UnsealError::Decode("Keystream window is zero".to_string()));
        }
        if self.seed.len() != self.window {
            return Err(UnsealError::Decode(format!(
                "Keystream seed is {} bytes, window is {}",
                self.seed.len(),
                self.window
            )));
        }
        if !self.header.is_empty() && self.header.len() != self.window {
            return Err(UnsealError::Decode(format!(
                "Keystream header is {} bytes, window is {}",
                self.header.len(),
                self.window
            )));
        }
        Ok(())
    }

    /// Keystream byte at `index`, given every earlier keystream and cipher byte
    pub fn byte_at(&self, index: usize, keystream: &[u8], cipher: &[u8]) -> u8 {
        if index < self.window {
            return self.seed[index];
        }
        let back = index - self.window;
        keystream[back] ^ cipher[back] ^ self.header_at(index)
    }

    /// Expand the keystream over the full length of `cipher`
    pub fn expand(&self, cipher: &[u8]) -> Vec<u8> {
        let mut keystream = Vec::with_capacity(cipher.len());
        for index in 0..cipher.len() {
            let byte = self.byte_at(index, &keystream, cipher);
            keystream.push(byte);
        }
        keystream
    }

    fn header_at(&self, index: usize) -> u8 {
        if self.header.is_empty() {
            0
        } else {
            self.header[index % self.window]
        }
    }
}

/// Reusable key material for one `SchemeKey`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyMaterial {
    Keystream(Keystream),
    FixedKey {
        #[serde(with = "b64")]
        key: Vec<u8>,
    },
    BlockKey {
        #[serde(with = "b64")]
        key: Vec<u8>,
        #[serde(with = "b64")]
        iv: Vec<u8>,
    },
}

impl KeyMaterial {
    /// Structural check for material that did not come from the deriver.
    /// Fixed and block keys are length-checked by their ciphers.
    pub fn check(&self) -> Result<(), UnsealError> {
        match self {
            KeyMaterial::Keystream(keystream) => keystream.check(),
            KeyMaterial::FixedKey { .. } | KeyMaterial::BlockKey { .. } => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KeyMaterial::Keystream(_) => "keystream",
            KeyMaterial::FixedKey { .. } => "fixed_key",
            KeyMaterial::BlockKey { .. } => "block_key",
        }
    }
}

/// Stored material. Entries are replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub material: KeyMaterial,
    pub derived_at: DateTime<Utc>,
}

impl KeyEntry {
    pub fn new(material: KeyMaterial) -> Self {
        Self {
            material,
            derived_at: Utc::now(),
        }
    }
}

pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_key_display() {
        assert_eq!(SchemeKey::new("embedbox", 3).to_string(), "embedbox@v3");
    }

    #[test]
    fn test_keystream_expand_uses_feedback() {
        let ks = Keystream {
            window: 2,
            header: vec![0x10, 0x20],
            seed: vec![0xAA, 0xBB],
        };
        let cipher = [0x01, 0x02, 0x03, 0x04, 0x05];
        let stream = ks.expand(&cipher);
        assert_eq!(stream.len(), 5);
        assert_eq!(stream[0], 0xAA);
        assert_eq!(stream[1], 0xBB);
        assert_eq!(stream[2], 0xAA ^ 0x01 ^ 0x10);
        assert_eq!(stream[3], 0xBB ^ 0x02 ^ 0x20);
        assert_eq!(stream[4], stream[2] ^ 0x03 ^ 0x10);
    }

    #[test]
    fn test_keystream_check() {
        let good = Keystream {
            window: 2,
            header: vec![],
            seed: vec![1, 2],
        };
        assert!(good.check().is_ok());
        assert!(KeyMaterial::Keystream(good.clone()).check().is_ok());

        let short_seed = Keystream {
            seed: vec![1],
            ..good.clone()
        };
        assert!(matches!(short_seed.check(), Err(UnsealError::Decode(_))));

        let short_header = Keystream {
            header: vec![9],
            ..good.clone()
        };
        assert!(short_header.check().is_err());

        let zero = Keystream {
            window: 0,
            header: vec![],
            seed: vec![],
        };
        assert!(zero.check().is_err());
    }

    #[test]
    fn test_key_material_serde() {
        let material = KeyMaterial::BlockKey {
            key: vec![1, 2, 3],
            iv: vec![4, 5],
        };
        let json = serde_json::to_string(&material).unwrap();
        assert_eq!(json, r#"{"kind":"block_key","key":"AQID","iv":"BAU="}"#);
        let back: KeyMaterial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, material);
    }
}
