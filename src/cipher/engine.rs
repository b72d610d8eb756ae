//! Cipher engine: key lookup, on-demand derivation and scheme dispatch

use crate::cipher::deriver::KeyDeriver;
use crate::cipher::keys::{KeyEntry, KeyMaterial, SchemeKey};
use crate::cipher::{decode, CipherScheme, DecodedResult};
use crate::error::UnsealError;
use crate::platform::EncodedPayload;
use crate::utils::cache::KeyStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the key behind a decode came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Scheme carries no stored key
    Unkeyed,
    /// Read from the key store
    Cached,
    /// Derived from this payload and installed
    Derived,
}

#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub result: DecodedResult,
    pub key_origin: KeyOrigin,
}

/// Decodes payloads, deriving and caching key material as needed
pub struct CipherEngine {
    keys: Arc<dyn KeyStore>,
    deriver: KeyDeriver,
}

impl CipherEngine {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self {
            keys,
            deriver: KeyDeriver::new(),
        }
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.keys
    }

    /// Decode `payload` with `scheme`, deriving key material from the scheme's
    /// known prefix when the store has none
    pub async fn decode(
        &self,
        payload: &EncodedPayload,
        scheme: &CipherScheme,
    ) -> Result<DecodeOutcome, UnsealError> {
        let Some(key) = scheme.scheme_key(&payload.provider) else {
            return Ok(DecodeOutcome {
                result: decode(payload, scheme, None)?,
                key_origin: KeyOrigin::Unkeyed,
            });
        };

        if let Some(entry) = self.keys.get(&key).await {
            match entry.material.check() {
                Ok(()) => {
                    debug!(key = %key, "Key store hit");
                    return Ok(DecodeOutcome {
                        result: decode(payload, scheme, Some(&entry.material))?,
                        key_origin: KeyOrigin::Cached,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding malformed stored key");
                    self.keys.evict(&key).await;
                }
            }
        }

        let known_prefix = scheme.known_prefix().ok_or_else(|| {
            UnsealError::UnsupportedSchemeVersion {
                provider: key.provider.clone(),
                version: key.version,
            }
        })?;

        let mut candidates = payload.key_candidates.clone();
        if let Some(aux) = &payload.aux {
            candidates.push(aux.clone());
        }

        let material = match self.deriver.derive_key(
            &key,
            scheme,
            &payload.data,
            known_prefix.as_bytes(),
            &candidates,
        ) {
            Ok(material) => material,
            Err(e) => {
                if e.evicts_key() {
                    self.keys.evict(&key).await;
                }
                return Err(e);
            }
        };

        let result = decode(payload, scheme, Some(&material))?;
        self.install(key, material).await;
        Ok(DecodeOutcome {
            result,
            key_origin: KeyOrigin::Derived,
        })
    }

    /// Install freshly derived material, replacing any previous entry
    pub async fn install(&self, key: SchemeKey, material: KeyMaterial) {
        info!(key = %key, kind = material.kind(), "Installing key material");
        self.keys.put(key, Arc::new(KeyEntry::new(material))).await;
    }

    /// Evict the stored material behind `scheme` for `provider`
    pub async fn evict(&self, provider: &str, scheme: &CipherScheme) {
        if let Some(key) = scheme.scheme_key(provider) {
            warn!(key = %key, "Evicting key material");
            self.keys.evict(&key).await;
        }
    }

    /// Derive from an out-of-band sample and install on success
    pub async fn derive_and_install(
        &self,
        key: SchemeKey,
        scheme: &CipherScheme,
        sample: &str,
        known_prefix: &[u8],
        candidates: &[String],
    ) -> Result<(), UnsealError> {
        match self
            .deriver
            .derive_key(&key, scheme, sample, known_prefix, candidates)
        {
            Ok(material) => {
                self.install(key, material).await;
                Ok(())
            }
            Err(e) => {
                if e.evicts_key() {
                    self.keys.evict(&key).await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::keys::Keystream;
    use crate::cipher::{rc4, xor_stream, KeySource, PayloadEncoding};
    use crate::utils::cache::MemoryKeyStore;
    use tokio_test::{assert_err, assert_ok};

    fn payload(provider: &str, data: String, candidates: Vec<String>) -> EncodedPayload {
        EncodedPayload {
            provider: provider.to_string(),
            data,
            aux: None,
            key_candidates: candidates,
            origin_url: "https://player.example/e/1".to_string(),
        }
    }

    fn xor_scheme(known_prefix: Option<&str>) -> CipherScheme {
        CipherScheme::XorStream {
            version: 5,
            window: 8,
            header: vec![],
            encoding: PayloadEncoding::Base64,
            known_prefix: known_prefix.map(str::to_string),
        }
    }

    fn encrypt_xor(plain: &str) -> String {
        let keystream = Keystream {
            window: 8,
            header: vec![],
            seed: vec![9, 8, 7, 6, 5, 4, 3, 2],
        };
        PayloadEncoding::Base64.encode(&xor_stream::encode(plain.as_bytes(), &keystream))
    }

    #[tokio::test]
    async fn test_derives_once_then_reads_cache() {
        let store = Arc::new(MemoryKeyStore::new());
        let engine = CipherEngine::new(store.clone());
        let scheme = xor_scheme(Some("https://"));

        let first = payload("p", encrypt_xor("https://cdn.example/a.m3u8"), vec![]);
        let outcome = assert_ok!(engine.decode(&first, &scheme).await);
        assert_eq!(outcome.key_origin, KeyOrigin::Derived);
        assert_eq!(outcome.result.text(), Some("https://cdn.example/a.m3u8"));
        assert!(store.get(&SchemeKey::new("p", 5)).await.is_some());

        let second = payload("p", encrypt_xor("https://cdn.example/b.mp4"), vec![]);
        let outcome = assert_ok!(engine.decode(&second, &scheme).await);
        assert_eq!(outcome.key_origin, KeyOrigin::Cached);
        assert_eq!(outcome.result.text(), Some("https://cdn.example/b.mp4"));
    }

    #[tokio::test]
    async fn test_malformed_stored_keystream_is_rederived() {
        let store = Arc::new(MemoryKeyStore::new());
        let key = SchemeKey::new("p", 5);
        let malformed = Keystream {
            window: 4,
            header: vec![],
            seed: vec![1, 2],
        };
        store
            .put(key.clone(), Arc::new(KeyEntry::new(KeyMaterial::Keystream(malformed))))
            .await;

        let engine = CipherEngine::new(store.clone());
        let data = payload("p", encrypt_xor("https://cdn.example/c.m3u8"), vec![]);
        let outcome = assert_ok!(engine.decode(&data, &xor_scheme(Some("https://"))).await);
        assert_eq!(outcome.key_origin, KeyOrigin::Derived);
        assert_eq!(outcome.result.text(), Some("https://cdn.example/c.m3u8"));

        let stored = store.get(&key).await.unwrap();
        assert!(stored.material.check().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_stored_keystream_without_prefix() {
        let store = Arc::new(MemoryKeyStore::new());
        let key = SchemeKey::new("p", 5);
        let malformed = Keystream {
            window: 8,
            header: vec![1, 2, 3],
            seed: vec![0; 8],
        };
        store
            .put(key.clone(), Arc::new(KeyEntry::new(KeyMaterial::Keystream(malformed))))
            .await;

        let engine = CipherEngine::new(store.clone());
        let data = payload("p", encrypt_xor("https://cdn.example/c.m3u8"), vec![]);
        let err = assert_err!(engine.decode(&data, &xor_scheme(None)).await);
        assert!(matches!(err, UnsealError::UnsupportedSchemeVersion { .. }));
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_without_key_or_prefix() {
        let engine = CipherEngine::new(Arc::new(MemoryKeyStore::new()));
        let p = payload("p", encrypt_xor("https://cdn.example/a.m3u8"), vec![]);
        let err = assert_err!(engine.decode(&p, &xor_scheme(None)).await);
        assert!(matches!(
            err,
            UnsealError::UnsupportedSchemeVersion { version: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_rc4_derivation_uses_payload_candidates() {
        let store = Arc::new(MemoryKeyStore::new());
        let engine = CipherEngine::new(store.clone());
        let key = "Zk3vQ81pLm0aXc7R";
        let cipher = rc4::apply(key.as_bytes(), b"https://cdn.example/v/1080.mp4").unwrap();
        let scheme = CipherScheme::Rc4 {
            version: 2,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: Some("https://".to_string()),
        };
        let p = payload(
            "p",
            PayloadEncoding::Base64.encode(&cipher),
            vec!["jwplayer".to_string(), key.to_string()],
        );

        let outcome = assert_ok!(engine.decode(&p, &scheme).await);
        assert_eq!(outcome.key_origin, KeyOrigin::Derived);
        assert_eq!(outcome.result.text(), Some("https://cdn.example/v/1080.mp4"));
    }

    #[tokio::test]
    async fn test_failed_derivation_evicts() {
        let store = Arc::new(MemoryKeyStore::new());
        let engine = CipherEngine::new(store.clone());
        let scheme = CipherScheme::Rc4 {
            version: 2,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: Some("https://".to_string()),
        };
        let p = payload("p", PayloadEncoding::Base64.encode(b"garbage-bytes"), vec![]);
        let err = assert_err!(engine.decode(&p, &scheme).await);
        assert!(err.evicts_key());
        assert!(store.get(&SchemeKey::new("p", 2)).await.is_none());
    }

    #[tokio::test]
    async fn test_evict() {
        let store = Arc::new(MemoryKeyStore::new());
        let engine = CipherEngine::new(store.clone());
        let scheme = xor_scheme(None);
        engine
            .install(
                SchemeKey::new("p", 5),
                KeyMaterial::FixedKey { key: vec![1; 8] },
            )
            .await;
        engine.evict("p", &scheme).await;
        assert!(store.get(&SchemeKey::new("p", 5)).await.is_none());
    }
}
