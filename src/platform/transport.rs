//! HTTP transport for provider hops

use crate::error::UnsealError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Desktop browser user agents; one is picked per transport
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
];

/// Header names and values; names compare case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderSet(BTreeMap<String, String>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert, replacing any header with the same name in any case
    pub fn insert(&mut self, name: &str, value: &str) {
        self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        self.0.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Overlay `other` on top of this set
    pub fn merge(&mut self, other: &HeaderSet) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_header_map(&self) -> Result<HeaderMap, UnsealError> {
        let mut map = HeaderMap::new();
        for (name, value) in self.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UnsealError::Config(format!("Invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| UnsealError::Config(format!("Invalid value for header {}", name)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-hop request timeout
    pub timeout: Duration,
    /// User agent override
    pub user_agent: Option<String>,
    /// Proxy URL
    pub proxy_url: Option<String>,
    /// Force HTTP/1.1 only
    pub http1_only: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            proxy_url: None,
            http1_only: false,
        }
    }
}

/// One hop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopRequest {
    pub url: String,
    pub headers: HeaderSet,
}

/// Raw hop response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResponse {
    pub status: u16,
    /// URL after following redirects
    pub final_url: String,
    pub body: String,
}

impl HopResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A single stateless request/response exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &HopRequest) -> Result<HopResponse, UnsealError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
    user_agent: String,
}

impl HttpTransport {
    /// Create a transport with default configuration
    pub fn new() -> Result<Self, UnsealError> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with custom configuration
    pub fn with_config(config: TransportConfig) -> Result<Self, UnsealError> {
        let user_agent = match &config.user_agent {
            Some(user_agent) => user_agent.clone(),
            None => USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
        };

        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .user_agent(user_agent.clone());

        if config.http1_only {
            builder = builder.http1_only();
        }

        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            config,
            user_agent,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Create a GET request with common browser headers
    pub fn create_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Accept", "text/html,application/json;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("DNT", "1")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &HopRequest) -> Result<HopResponse, UnsealError> {
        debug!(url = %request.url, headers = request.headers.len(), "Fetching hop");

        let response = self
            .create_request(&request.url)
            .headers(request.headers.to_header_map()?)
            .send()
            .await
            .map_err(|e| UnsealError::UpstreamUnavailable(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| UnsealError::UpstreamUnavailable(format!("{}: {}", request.url, e)))?;

        debug!(status, bytes = body.len(), "Hop response received");
        Ok(HopResponse {
            status,
            final_url,
            body,
        })
    }
}
