//! # unseal - provider resolution and cipher recovery
//!
//! Resolves an opaque content reference into a playable stream locator by
//! walking third-party provider hop chains, extracting the obfuscated payload
//! from the terminal page and recovering the plaintext with a closed set of
//! cipher schemes.
//!
//! ## Features
//!
//! - Declarative provider table (hops, token rules, extraction rules)
//! - Substitution, XOR stream, RC4 and block cipher schemes
//! - Known-plaintext key recovery with a persisted key store
//! - Concurrent provider attempts; the first validated locator wins
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unseal::platform::{HttpTransport, ProviderRegistry};
//! use unseal::utils::cache::MemoryKeyStore;
//! use unseal::Resolver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Resolver::new(
//!         Arc::new(ProviderRegistry::builtin()?),
//!         Arc::new(HttpTransport::new()?),
//!         Arc::new(MemoryKeyStore::new()),
//!     )?;
//!
//!     let locator = resolver.resolve("tt0133093", None).await?;
//!     println!("{} ({})", locator.url, locator.kind);
//!
//!     Ok(())
//! }
//! ```

pub mod cipher;
pub mod cli;
pub mod core;
pub mod error;
pub mod platform;
pub mod utils;

// Re-export main types
pub use cipher::{CipherEngine, CipherScheme, DecodedResult, KeyDeriver, KnownPlaintextSample};
pub use crate::core::{LocatorKind, PlayableLocator, Resolver, ResolverOptions, Validator, ValidatorConfig};
pub use error::{AttemptLog, AttemptRecord, ExtractionError, UnsealError};
pub use platform::{ChainWalker, EncodedPayload, ProviderRegistry, ResolveHint, Transport};

/// Result type alias for unseal operations
pub type Result<T> = std::result::Result<T, UnsealError>;
