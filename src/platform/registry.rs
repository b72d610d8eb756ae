//! Provider descriptors and the static registry that owns them

use crate::cipher::CipherScheme;
use crate::error::UnsealError;
use crate::platform::extractor::ExtractionRule;
use crate::platform::transport::HeaderSet;
use crate::utils::url::placeholders;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const BUILTIN_PROVIDERS: &str = include_str!("../../config/providers.json");

/// How a hop sets its `Referer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefererRule {
    #[default]
    None,
    /// Final URL of the previous hop; nothing on hop 0
    PreviousHop,
    Fixed { url: String },
}

/// How a non-terminal hop yields the token for the next hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenRule {
    /// Group 1 of a regex over the response body
    BodyRegex { pattern: String },
    /// Dotted path into a JSON response
    JsonField { path: String },
    /// Group 1 of a regex over the final (post-redirect) URL
    FinalUrl { pattern: String },
}

impl TokenRule {
    fn check(&self) -> Result<(), UnsealError> {
        match self {
            TokenRule::BodyRegex { pattern } | TokenRule::FinalUrl { pattern } => {
                Regex::new(pattern)?;
                Ok(())
            }
            TokenRule::JsonField { path } if path.is_empty() => {
                Err(UnsealError::Config("Token JSON path is empty".to_string()))
            }
            TokenRule::JsonField { .. } => Ok(()),
        }
    }
}

fn default_forward() -> bool {
    true
}

/// One request/response step of a provider chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSpec {
    pub name: String,
    /// URL template; binds `{seed}`, `{token}` (the seed on hop 0) and the
    /// names of earlier hops
    pub url: String,
    /// Header templates, bound like the URL
    #[serde(default)]
    pub headers: HeaderSet,
    #[serde(default)]
    pub referer: RefererRule,
    /// Required on every hop but the last
    #[serde(default)]
    pub token: Option<TokenRule>,
    /// Bind this hop's token as `{token}` for the next hop
    #[serde(default = "default_forward")]
    pub forward: bool,
}

/// Everything the engine knows about one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    /// Sent on every hop, under the hop's own headers
    #[serde(default)]
    pub headers: HeaderSet,
    pub hops: Vec<HopSpec>,
    pub extraction: ExtractionRule,
    /// Tried in order against the same payload
    pub schemes: Vec<CipherScheme>,
    /// Headers the caller must replay on the locator fetch
    #[serde(default)]
    pub locator_headers: HeaderSet,
    /// Replay `Referer`/`Origin` of the terminal hop on the locator fetch
    #[serde(default)]
    pub replay_referer: bool,
}

impl ProviderDescriptor {
    /// Reject descriptors the walker could never complete
    pub fn check(&self) -> Result<(), UnsealError> {
        let fail = |reason: String| UnsealError::Config(format!("Provider '{}': {}", self.id, reason));

        if self.id.trim().is_empty() {
            return Err(UnsealError::Config("Provider with empty id".to_string()));
        }
        if self.hops.is_empty() {
            return Err(fail("no hops".to_string()));
        }
        if self.schemes.is_empty() {
            return Err(fail("no cipher schemes".to_string()));
        }

        let mut bound: BTreeSet<String> =
            BTreeSet::from(["seed".to_string(), "token".to_string()]);
        let last = self.hops.len() - 1;
        for (index, hop) in self.hops.iter().enumerate() {
            let templates = std::iter::once(hop.url.as_str()).chain(hop.headers.iter().map(|(_, v)| v));
            for template in templates {
                if let Some(name) = placeholders(template).into_iter().find(|n| !bound.contains(n)) {
                    return Err(fail(format!("hop '{}' uses unbound placeholder '{}'", hop.name, name)));
                }
            }

            if index < last {
                let token = hop
                    .token
                    .as_ref()
                    .ok_or_else(|| fail(format!("hop '{}' has no token rule", hop.name)))?;
                token.check()?;
                bound.insert(hop.name.clone());
                if hop.forward {
                    bound.insert("token".to_string());
                }
            }
        }

        self.extraction
            .check()
            .map_err(|e| fail(e.to_string()))?;
        for scheme in &self.schemes {
            scheme.check().map_err(|e| fail(e.to_string()))?;
        }
        Ok(())
    }

    /// Store versions of this provider's keyed schemes
    pub fn scheme_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self.schemes.iter().filter_map(CipherScheme::version).collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    pub fn scheme_tags(&self) -> Vec<String> {
        self.schemes.iter().map(CipherScheme::tag).collect()
    }
}

/// Optional restriction of the provider search order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveHint {
    pub providers: Vec<String>,
}

impl ResolveHint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    providers: Vec<ProviderDescriptor>,
}

/// Immutable provider table, loaded once at startup
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderDescriptor>>,
}

impl ProviderRegistry {
    /// Registry compiled into the binary
    pub fn builtin() -> Result<Self, UnsealError> {
        Self::from_json(BUILTIN_PROVIDERS)
    }

    /// Load a registry file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, UnsealError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&content)?;
        info!("Loaded {} providers from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self, UnsealError> {
        let file: RegistryFile = serde_json::from_str(json)?;
        Self::from_descriptors(file.providers)
    }

    pub fn from_descriptors(descriptors: Vec<ProviderDescriptor>) -> Result<Self, UnsealError> {
        let mut seen = BTreeSet::new();
        for descriptor in &descriptors {
            descriptor.check()?;
            if !seen.insert(descriptor.id.clone()) {
                return Err(UnsealError::Config(format!(
                    "Duplicate provider id '{}'",
                    descriptor.id
                )));
            }
            debug!(
                provider = %descriptor.id,
                hops = descriptor.hops.len(),
                schemes = descriptor.schemes.len(),
                "Registered provider"
            );
        }
        Ok(Self {
            providers: descriptors.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProviderDescriptor>> {
        self.providers.iter().find(|p| p.id == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderDescriptor>> {
        self.providers.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in search order: the hint's order when it names any,
    /// otherwise registry order
    pub fn ordered(
        &self,
        hint: Option<&ResolveHint>,
    ) -> Result<Vec<Arc<ProviderDescriptor>>, UnsealError> {
        let Some(hint) = hint.filter(|h| !h.providers.is_empty()) else {
            return Ok(self.providers.clone());
        };

        let mut ordered: Vec<Arc<ProviderDescriptor>> = Vec::with_capacity(hint.providers.len());
        for id in &hint.providers {
            let descriptor = self
                .get(id)
                .ok_or_else(|| UnsealError::UnknownProvider(id.clone()))?;
            if !ordered.iter().any(|p| p.id == descriptor.id) {
                ordered.push(descriptor);
            }
        }
        Ok(ordered)
    }

    /// Current keyed scheme versions per provider
    pub fn current_versions(&self) -> HashMap<String, Vec<u32>> {
        self.providers
            .iter()
            .map(|p| (p.id.clone(), p.scheme_versions()))
            .collect()
    }
}
