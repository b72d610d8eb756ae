//! Output formatting and progress display

use crate::cli::args::VerbosityLevel;
use crate::core::PlayableLocator;
use crate::error::AttemptLog;
use crate::platform::ProviderRegistry;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Output formatter for unseal
pub struct OutputFormatter {
    verbosity: VerbosityLevel,
    spinner: Option<ProgressBar>,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            spinner: None,
        }
    }

    /// Show a spinner while a resolution is in flight
    pub fn start_spinner(&mut self, message: &str) -> Option<ProgressBar> {
        if self.verbosity == VerbosityLevel::Quiet {
            return None;
        }

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));

        self.spinner = Some(spinner.clone());
        Some(spinner)
    }

    /// Remove the spinner
    pub fn finish_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    /// Print info message
    pub fn info(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            eprintln!("ℹ️  {}", message);
        }
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            eprintln!("✅ {}", message.green());
        }
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            eprintln!("⚠️  {}", message.yellow());
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        eprintln!("❌ {}", message.red());
    }

    /// Print debug message
    pub fn debug(&self, message: &str) {
        if self.verbosity == VerbosityLevel::Verbose {
            eprintln!("🐛 {}", message.dimmed());
        }
    }

    /// Print the resolved locator; the URL always goes to stdout
    pub fn print_locator(&self, locator: &PlayableLocator, elapsed: Duration, with_headers: bool) {
        self.success(&format!(
            "Resolved via {} ({}, {}) in {}",
            locator.provider,
            locator.scheme,
            locator.kind,
            format_duration(elapsed)
        ));
        println!("{}", locator.url);

        if with_headers {
            for line in header_lines(locator) {
                println!("{}", line);
            }
        }
    }

    /// Print the resolved locator as JSON
    pub fn print_json(&self, locator: &PlayableLocator) -> Result<(), serde_json::Error> {
        println!("{}", serde_json::to_string_pretty(locator)?);
        Ok(())
    }

    /// Print every failed attempt of an exhausted resolution
    pub fn print_attempts(&self, log: &AttemptLog) {
        self.error(&format!("No provider produced a playable locator ({} attempts)", log.len()));
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }

        for record in log.iter() {
            let scheme = record.scheme.as_deref().unwrap_or("-");
            eprintln!(
                "  {} {} {}",
                record.provider.bold(),
                scheme.cyan(),
                record.reason.dimmed()
            );
        }
    }

    /// Print the provider table
    pub fn print_providers(&self, registry: &ProviderRegistry) {
        for line in provider_lines(registry) {
            println!("{}", line);
        }
    }
}

fn header_lines(locator: &PlayableLocator) -> Vec<String> {
    locator
        .headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect()
}

fn provider_lines(registry: &ProviderRegistry) -> Vec<String> {
    registry
        .iter()
        .map(|descriptor| {
            format!(
                "{:<12} {} hop{}  {}",
                descriptor.id.bold(),
                descriptor.hops.len(),
                if descriptor.hops.len() == 1 { "" } else { "s" },
                descriptor.scheme_tags().join(", ").cyan()
            )
        })
        .collect()
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    if total_seconds == 0 {
        format!("{}ms", duration.as_millis())
    } else if total_seconds < 60 {
        format!("{}s", total_seconds)
    } else if total_seconds < 3600 {
        let minutes = total_seconds / 60;
        let seconds = total_seconds % 60;
        if seconds == 0 {
            format!("{}m", minutes)
        } else {
            format!("{}m {}s", minutes, seconds)
        }
    } else {
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        if minutes == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}
