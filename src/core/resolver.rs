//! Resolution controller: speculative provider attempts, first success wins

use crate::cipher::{CipherEngine, CipherScheme, KeyOrigin, KnownPlaintextSample, SchemeKey};
use crate::core::locator::PlayableLocator;
use crate::core::validation::{Validator, ValidatorConfig};
use crate::error::{AttemptLog, AttemptRecord, UnsealError};
use crate::platform::{ChainWalker, EncodedPayload, ProviderDescriptor, ProviderRegistry, ResolveHint, Transport};
use crate::utils::cache::KeyStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Providers attempted concurrently
    pub workers: usize,
    /// Bound on one provider's hops, decode and validation
    pub provider_timeout: Duration,
    /// Skip a provider after this many consecutive key derivation failures
    pub disable_after: Option<u32>,
    pub validator: ValidatorConfig,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            provider_timeout: Duration::from_secs(30),
            disable_after: None,
            validator: ValidatorConfig::default(),
        }
    }
}

/// Consecutive key derivation failures per provider
#[derive(Debug, Default)]
pub struct ProviderHealth {
    failures: Mutex<HashMap<String, u32>>,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure and return the new streak
    pub async fn record_failure(&self, provider: &str) -> u32 {
        let mut failures = self.failures.lock().await;
        let streak = failures.entry(provider.to_string()).or_insert(0);
        *streak += 1;
        *streak
    }

    pub async fn reset(&self, provider: &str) {
        self.failures.lock().await.remove(provider);
    }

    pub async fn failures(&self, provider: &str) -> u32 {
        self.failures.lock().await.get(provider).copied().unwrap_or(0)
    }

    pub async fn is_disabled(&self, provider: &str, threshold: Option<u32>) -> bool {
        match threshold {
            Some(limit) => self.failures(provider).await >= limit,
            None => false,
        }
    }
}

/// Per-provider pipeline shared by every worker task
struct Pipeline {
    walker: ChainWalker,
    engine: CipherEngine,
    validator: Validator,
    health: ProviderHealth,
    disable_after: Option<u32>,
}

impl Pipeline {
    /// Walk the provider once, then try each scheme against the payload.
    /// Every failed provider/scheme pair is appended to `records`.
    async fn attempt(
        &self,
        descriptor: &ProviderDescriptor,
        seed: &str,
        cancel: &CancellationToken,
        records: &mut Vec<AttemptRecord>,
    ) -> Result<PlayableLocator, UnsealError> {
        let id = descriptor.id.as_str();

        if self.health.is_disabled(id, self.disable_after).await {
            let err = UnsealError::ProviderDisabled(format!(
                "{} consecutive key derivation failures",
                self.health.failures(id).await
            ));
            warn!(provider = id, "Skipping disabled provider");
            records.push(AttemptRecord::new(id, None, &err));
            return Err(err);
        }

        let payload = match self.walker.walk(descriptor, seed, cancel).await {
            Ok(payload) => payload,
            Err(UnsealError::Cancelled) => return Err(UnsealError::Cancelled),
            Err(e) => {
                warn!(provider = id, error = %e, "Provider chain failed");
                records.push(AttemptRecord::new(id, None, &e));
                return Err(e);
            }
        };

        let mut last_error = None;
        for scheme in &descriptor.schemes {
            let tag = scheme.tag();
            match self.try_scheme(descriptor, &payload, scheme).await {
                Ok(locator) => {
                    self.health.reset(id).await;
                    info!(provider = id, scheme = %tag, kind = %locator.kind, "Candidate accepted");
                    return Ok(locator);
                }
                Err(e) => {
                    if e.evicts_key() {
                        let streak = self.health.record_failure(id).await;
                        warn!(provider = id, scheme = %tag, streak, error = %e, "Key derivation failed");
                    } else {
                        debug!(provider = id, scheme = %tag, error = %e, "Scheme attempt failed");
                    }
                    records.push(AttemptRecord::new(id, Some(&tag), &e));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            UnsealError::Config(format!("Provider '{}' has no cipher schemes", id))
        }))
    }

    async fn try_scheme(
        &self,
        descriptor: &ProviderDescriptor,
        payload: &EncodedPayload,
        scheme: &CipherScheme,
    ) -> Result<PlayableLocator, UnsealError> {
        let outcome = self.engine.decode(payload, scheme).await?;
        if outcome.key_origin == KeyOrigin::Derived {
            self.health.reset(&descriptor.id).await;
        }

        let verdict = self.validator.validate(&outcome.result);
        if !verdict.passed {
            if outcome.key_origin == KeyOrigin::Cached {
                self.engine.evict(&descriptor.id, scheme).await;
            }
            return Err(verdict.into_error());
        }

        debug!(
            provider = %descriptor.id,
            predicate = ?verdict.matched,
            "Candidate passed validation"
        );
        PlayableLocator::from_verdict(descriptor, payload, &outcome.result.scheme, &verdict)
    }
}

/// Resolves a content reference to a playable locator
pub struct Resolver {
    registry: Arc<ProviderRegistry>,
    pipeline: Arc<Pipeline>,
    options: ResolverOptions,
}

impl Resolver {
    /// Create a resolver with default options
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn Transport>,
        keys: Arc<dyn KeyStore>,
    ) -> Result<Self, UnsealError> {
        Self::with_options(registry, transport, keys, ResolverOptions::default())
    }

    pub fn with_options(
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn Transport>,
        keys: Arc<dyn KeyStore>,
        options: ResolverOptions,
    ) -> Result<Self, UnsealError> {
        let pipeline = Pipeline {
            walker: ChainWalker::new(transport),
            engine: CipherEngine::new(keys),
            validator: Validator::new(options.validator.clone())?,
            health: ProviderHealth::new(),
            disable_after: options.disable_after,
        };
        Ok(Self {
            registry,
            pipeline: Arc::new(pipeline),
            options,
        })
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn health(&self) -> &ProviderHealth {
        &self.pipeline.health
    }

    /// Resolve `content_ref`. Providers run concurrently on at most
    /// `workers` tasks; the first accepted candidate cancels the rest, which
    /// stop at their next hop boundary and are drained before returning.
    /// Fails only with `Exhausted` (or a bad hint) after every provider and
    /// scheme has been tried.
    pub async fn resolve(
        &self,
        content_ref: &str,
        hint: Option<&ResolveHint>,
    ) -> Result<PlayableLocator, UnsealError> {
        let providers = self.registry.ordered(hint)?;
        info!(
            content_ref,
            providers = providers.len(),
            workers = self.options.workers,
            "Resolving"
        );

        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for descriptor in providers {
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let seed = content_ref.to_string();
            let timeout = self.options.provider_timeout;

            tasks.spawn(async move {
                let mut records = Vec::new();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (records, Err(UnsealError::Cancelled));
                };
                if cancel.is_cancelled() {
                    return (records, Err(UnsealError::Cancelled));
                }

                let attempt = pipeline.attempt(&descriptor, &seed, &cancel, &mut records);
                let outcome = match tokio::time::timeout(timeout, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let err = UnsealError::Timeout(format!(
                            "provider exceeded {}",
                            humantime::format_duration(timeout)
                        ));
                        warn!(provider = %descriptor.id, error = %err, "Provider timed out");
                        records.push(AttemptRecord::new(&descriptor.id, None, &err));
                        Err(err)
                    }
                };
                (records, outcome)
            });
        }

        let mut log = AttemptLog::new();
        let mut accepted: Option<PlayableLocator> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((records, Ok(locator))) => {
                    log.extend(records);
                    if accepted.is_none() {
                        cancel.cancel();
                        accepted = Some(locator);
                    }
                }
                Ok((records, Err(_))) => log.extend(records),
                Err(e) => warn!("Provider task failed: {}", e),
            }
        }

        match accepted {
            Some(locator) => {
                info!(provider = %locator.provider, scheme = %locator.scheme, "Resolved");
                Ok(locator)
            }
            None => {
                warn!(attempts = log.len(), "All providers exhausted");
                Err(UnsealError::Exhausted(log))
            }
        }
    }

    /// Derive and install key material from an out-of-band sample
    pub async fn install_sample(&self, sample: &KnownPlaintextSample) -> Result<(), UnsealError> {
        let descriptor = self
            .registry
            .get(&sample.provider)
            .ok_or_else(|| UnsealError::UnknownProvider(sample.provider.clone()))?;
        let scheme = descriptor
            .schemes
            .iter()
            .find(|s| s.version() == Some(sample.scheme_version))
            .ok_or_else(|| UnsealError::UnsupportedSchemeVersion {
                provider: sample.provider.clone(),
                version: sample.scheme_version,
            })?;

        let key = SchemeKey::new(&sample.provider, sample.scheme_version);
        let health = &self.pipeline.health;
        match self
            .pipeline
            .engine
            .derive_and_install(
                key,
                scheme,
                &sample.ciphertext,
                sample.known_prefix.as_bytes(),
                &sample.candidates,
            )
            .await
        {
            Ok(()) => {
                health.reset(&sample.provider).await;
                Ok(())
            }
            Err(e) => {
                if e.evicts_key() {
                    health.record_failure(&sample.provider).await;
                }
                Err(e)
            }
        }
    }
}
