//! Main entry point for the unseal CLI

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unseal::cipher::KnownPlaintextSample;
use unseal::cli::{Args, OutputFormatter};
use unseal::platform::{HttpTransport, ProviderRegistry};
use unseal::utils::cache::{FileKeyStore, KeyStore, MemoryKeyStore};
use unseal::{Resolver, UnsealError};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_filter());
    debug!("Starting unseal with args: {:?}", args);

    let mut formatter = OutputFormatter::new(args.verbosity_level());

    let registry = match &args.registry {
        Some(path) => ProviderRegistry::load(path)
            .with_context(|| format!("loading provider table {}", path.display()))?,
        None => ProviderRegistry::builtin().context("loading builtin provider table")?,
    };

    if args.list_providers {
        formatter.print_providers(&registry);
        return Ok(());
    }

    let content_ref = args
        .content_ref
        .clone()
        .context("a content reference is required")?;

    let keys = open_key_store(&args, &registry).await?;
    let transport = HttpTransport::with_config(args.transport_config())?;
    let resolver = Resolver::with_options(
        Arc::new(registry),
        Arc::new(transport),
        keys,
        args.resolver_options(),
    )?;

    if let Some(path) = &args.samples {
        install_samples(&resolver, path, &formatter).await?;
    }

    let hint = args.resolve_hint();
    let start_time = Instant::now();
    formatter.start_spinner(&format!("Resolving {}", content_ref));
    let outcome = resolver.resolve(&content_ref, hint.as_ref()).await;
    formatter.finish_spinner();

    match outcome {
        Ok(locator) => {
            info!(provider = %locator.provider, kind = %locator.kind, "Locator ready");
            if args.json {
                formatter.print_json(&locator)?;
            } else {
                formatter.print_locator(&locator, start_time.elapsed(), args.headers);
            }
            Ok(())
        }
        Err(UnsealError::Exhausted(log)) => {
            formatter.print_attempts(&log);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Pick the key store: persisted when a path is given, in-memory otherwise
async fn open_key_store(args: &Args, registry: &ProviderRegistry) -> Result<Arc<dyn KeyStore>> {
    match &args.key_store {
        Some(path) => {
            let store = FileKeyStore::open(path)
                .await
                .with_context(|| format!("opening key store {}", path.display()))?;
            let pruned = store.prune_stale(&registry.current_versions()).await;
            if pruned > 0 {
                info!(pruned, "Dropped keys for retired scheme versions");
            }
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryKeyStore::new())),
    }
}

/// Install out-of-band samples; a sample that fails to derive is skipped
async fn install_samples(resolver: &Resolver, path: &Path, formatter: &OutputFormatter) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading samples {}", path.display()))?;
    let samples: Vec<KnownPlaintextSample> =
        serde_json::from_str(&text).with_context(|| format!("parsing samples {}", path.display()))?;

    let outcomes = join_all(samples.iter().map(|sample| resolver.install_sample(sample))).await;

    let mut installed = 0;
    for (sample, outcome) in samples.iter().zip(outcomes) {
        match outcome {
            Ok(()) => installed += 1,
            Err(e) => {
                warn!(provider = %sample.provider, version = sample.scheme_version, error = %e, "Sample rejected");
                formatter.warning(&format!("Sample for {} rejected: {}", sample.provider, e));
            }
        }
    }
    formatter.debug(&format!("Installed {}/{} samples", installed, samples.len()));
    Ok(())
}

/// Initialize logging system
fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}
