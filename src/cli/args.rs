//! Command line argument parsing

use crate::core::ResolverOptions;
use crate::platform::{ResolveHint, TransportConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// unseal - resolve a content reference to a playable stream locator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Content reference (identifier or URL) handed to the providers
    #[arg(required_unless_present = "list_providers")]
    pub content_ref: Option<String>,

    /// Restrict and order providers (e.g. 'embedbox,jsoncdn')
    #[arg(short, long, value_name = "IDS", value_delimiter = ',')]
    pub providers: Vec<String>,

    /// Provider table to use instead of the builtin one
    #[arg(long, value_name = "PATH")]
    pub registry: Option<PathBuf>,

    /// Persist derived key material in this JSON file
    #[arg(long, value_name = "PATH")]
    pub key_store: Option<PathBuf>,

    /// Known-plaintext samples to install before resolving
    #[arg(long, value_name = "PATH")]
    pub samples: Option<PathBuf>,

    /// Per-hop HTTP timeout (e.g., 10s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "10s")]
    pub timeout: humantime::Duration,

    /// Budget for one provider's hops, decode and validation
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub provider_timeout: humantime::Duration,

    /// Providers attempted concurrently
    #[arg(short, long, default_value = "4")]
    pub workers: usize,

    /// Skip a provider after N consecutive key derivation failures
    #[arg(long, value_name = "N")]
    pub disable_after: Option<u32>,

    /// Override User-Agent header
    #[arg(long, value_name = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Proxy URL (http/https/socks)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Force HTTP/1.1
    #[arg(long)]
    pub http1_only: bool,

    /// Print the locator as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the headers the locator must be fetched with
    #[arg(long)]
    pub headers: bool,

    /// List configured providers and exit
    #[arg(long)]
    pub list_providers: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Get per-hop timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        self.timeout.into()
    }

    /// Get per-provider timeout as Duration
    pub fn provider_timeout_duration(&self) -> Duration {
        self.provider_timeout.into()
    }

    /// Get output verbosity level
    pub fn verbosity_level(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default log filter when RUST_LOG is unset
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity_level() {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "info",
            VerbosityLevel::Verbose => "debug",
        }
    }

    /// Provider hint, if any providers were named
    pub fn resolve_hint(&self) -> Option<ResolveHint> {
        let providers: Vec<&str> = self
            .providers
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if providers.is_empty() {
            None
        } else {
            Some(ResolveHint::new().with_providers(providers))
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout_duration(),
            user_agent: self.user_agent.clone(),
            proxy_url: self.proxy.clone(),
            http1_only: self.http1_only,
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            workers: self.workers,
            provider_timeout: self.provider_timeout_duration(),
            disable_after: self.disable_after,
            ..Default::default()
        }
    }
}

/// Output verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Quiet (only errors)
    Quiet,
    /// Normal
    Normal,
    /// Verbose (debug info)
    Verbose,
}


// Implement Default for Args to make tests work
impl Default for Args {
    fn default() -> Self {
        Self {
            content_ref: None,
            providers: Vec::new(),
            registry: None,
            key_store: None,
            samples: None,
            timeout: humantime::Duration::from(Duration::from_secs(10)),
            provider_timeout: humantime::Duration::from(Duration::from_secs(30)),
            workers: 4,
            disable_after: None,
            user_agent: None,
            proxy: None,
            http1_only: false,
            json: false,
            headers: false,
            list_providers: false,
            verbose: false,
            quiet: false,
        }
    }
}
