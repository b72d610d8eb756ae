//! Chain walker: executes a provider's hops in order

use crate::error::UnsealError;
use crate::platform::extractor::{extract, EncodedPayload};
use crate::platform::registry::{HopSpec, ProviderDescriptor, RefererRule, TokenRule};
use crate::platform::transport::{HeaderSet, HopRequest, HopResponse, Transport};
use crate::utils::json;
use crate::utils::url::{bind_template, bind_url_template, origin_of};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Walks provider hop chains over a shared transport
#[derive(Clone)]
pub struct ChainWalker {
    transport: Arc<dyn Transport>,
}

impl ChainWalker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Walk every hop of `descriptor` starting from `seed` and extract the
    /// payload from the terminal hop. Cancellation is observed between hops;
    /// a request already in flight is allowed to finish.
    pub async fn walk(
        &self,
        descriptor: &ProviderDescriptor,
        seed: &str,
        cancel: &CancellationToken,
    ) -> Result<EncodedPayload, UnsealError> {
        let mut bindings = BTreeMap::new();
        bindings.insert("seed".to_string(), seed.to_string());
        bindings.insert("token".to_string(), seed.to_string());

        let last = descriptor.hops.len().saturating_sub(1);
        let mut previous_url: Option<String> = None;

        for (index, hop) in descriptor.hops.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(provider = %descriptor.id, hop = %hop.name, "Walk cancelled");
                return Err(UnsealError::Cancelled);
            }

            let request = build_request(descriptor, hop, &bindings, previous_url.as_deref())?;
            debug!(provider = %descriptor.id, hop = %hop.name, index, "Walking hop");

            let response = self.transport.fetch(&request).await?;
            if !response.is_success() {
                return Err(UnsealError::UpstreamUnavailable(format!(
                    "hop '{}' returned HTTP {}",
                    hop.name, response.status
                )));
            }

            if index == last {
                let payload = extract(
                    &descriptor.id,
                    &response.body,
                    &response.final_url,
                    &descriptor.extraction,
                )?;
                return Ok(payload);
            }

            let token = extract_token(hop, &response)?;
            bindings.insert(hop.name.clone(), token.clone());
            if hop.forward {
                bindings.insert("token".to_string(), token);
            }
            previous_url = Some(response.final_url);
        }

        Err(UnsealError::Config(format!(
            "Provider '{}' has no hops",
            descriptor.id
        )))
    }
}

fn build_request(
    descriptor: &ProviderDescriptor,
    hop: &HopSpec,
    bindings: &BTreeMap<String, String>,
    previous_url: Option<&str>,
) -> Result<HopRequest, UnsealError> {
    let url = bind_url_template(&hop.url, bindings)?;

    let mut headers = descriptor.headers.clone();
    for (name, template) in hop.headers.iter() {
        headers.insert(name, &bind_template(template, bindings)?);
    }

    let referer = match &hop.referer {
        RefererRule::None => None,
        RefererRule::PreviousHop => previous_url.map(str::to_string),
        RefererRule::Fixed { url } => Some(bind_url_template(url, bindings)?),
    };
    if let Some(referer) = referer {
        set_referer(&mut headers, &referer);
    }

    Ok(HopRequest { url, headers })
}

/// Set `Referer`, and `Origin` when the referer has one
pub fn set_referer(headers: &mut HeaderSet, referer: &str) {
    headers.insert("Referer", referer);
    if let Some(origin) = origin_of(referer) {
        headers.insert("Origin", &origin);
    }
}

fn extract_token(hop: &HopSpec, response: &HopResponse) -> Result<String, UnsealError> {
    let not_found = |reason: String| UnsealError::TokenNotFound {
        hop: hop.name.clone(),
        reason,
    };

    match &hop.token {
        Some(TokenRule::BodyRegex { pattern }) => {
            capture(&Regex::new(pattern)?, &response.body)
                .ok_or_else(|| not_found(format!("body did not match {}", pattern)))
        }
        Some(TokenRule::FinalUrl { pattern }) => {
            capture(&Regex::new(pattern)?, &response.final_url)
                .ok_or_else(|| not_found(format!("final URL did not match {}", pattern)))
        }
        Some(TokenRule::JsonField { path }) => json::text_at(&response.body, path)
            .ok_or_else(|| not_found(format!("no JSON field {}", path))),
        None => Err(not_found("hop has no token rule".to_string())),
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}
