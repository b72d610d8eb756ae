//! Playable locators returned to callers

use crate::core::validation::ValidationVerdict;
use crate::error::UnsealError;
use crate::platform::{set_referer, EncodedPayload, HeaderSet, ProviderDescriptor};
use crate::utils::url::{is_hls, resolve_against};
use serde::Serialize;
use std::fmt;

/// Delivery variant of a locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    Hls,
    Progressive,
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorKind::Hls => write!(f, "hls"),
            LocatorKind::Progressive => write!(f, "progressive"),
        }
    }
}

/// Resolved resource plus the headers the caller must replay to fetch it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayableLocator {
    pub url: String,
    pub kind: LocatorKind,
    #[serde(skip_serializing_if = "HeaderSet::is_empty")]
    pub headers: HeaderSet,
    pub provider: String,
    pub scheme: String,
}

impl PlayableLocator {
    /// Build the locator for an accepted candidate
    pub fn from_verdict(
        descriptor: &ProviderDescriptor,
        payload: &EncodedPayload,
        scheme: &str,
        verdict: &ValidationVerdict,
    ) -> Result<Self, UnsealError> {
        let raw = verdict.locator.as_deref().ok_or_else(|| {
            UnsealError::ValidationFailed("accepted candidate carries no locator".to_string())
        })?;
        let url = resolve_against(&payload.origin_url, raw)?;

        let kind = if verdict.declared_hls || is_hls(&url) {
            LocatorKind::Hls
        } else {
            LocatorKind::Progressive
        };

        let mut headers = HeaderSet::new();
        if descriptor.replay_referer {
            set_referer(&mut headers, &payload.origin_url);
        }
        headers.merge(&descriptor.locator_headers);

        Ok(Self {
            url,
            kind,
            headers,
            provider: descriptor.id.clone(),
            scheme: scheme.to_string(),
        })
    }
}
