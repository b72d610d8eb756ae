//! Payload extraction from terminal hop bodies

use crate::error::ExtractionError;
use crate::platform::unpack;
use crate::utils::json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Encoded payload isolated from the terminal hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub provider: String,
    pub data: String,
    /// Side-channel id found next to the payload
    pub aux: Option<String>,
    /// Strings from the page that may be key material
    pub key_candidates: Vec<String>,
    /// Final URL of the terminal hop
    pub origin_url: String,
}

fn default_min_len() -> usize {
    32
}

/// Structural locator for the payload inside a page body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadLocator {
    /// First block-level element with a non-empty `id` whose text has no
    /// markup and is longer than `min_len`. The `id` becomes the aux value.
    HiddenElement {
        #[serde(default = "default_min_len")]
        min_len: usize,
        /// Substring every candidate must contain
        #[serde(default)]
        require: Option<String>,
    },
    /// Regex whose `payload` group (or group 1) is the payload
    Regex {
        pattern: String,
        #[serde(default)]
        aux: Option<String>,
    },
    /// Dotted path into a JSON body
    JsonField {
        path: String,
        #[serde(default)]
        aux: Option<String>,
    },
    /// Regex applied to the unpacked text of packed scripts
    PackedScript {
        pattern: String,
        #[serde(default)]
        aux: Option<String>,
    },
}

/// How a provider's terminal body yields its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    #[serde(flatten)]
    pub locator: PayloadLocator,
    /// Regex whose captures are offered as candidate keys
    #[serde(default)]
    pub key_candidates: Option<String>,
}

impl ExtractionRule {
    pub fn new(locator: PayloadLocator) -> Self {
        Self {
            locator,
            key_candidates: None,
        }
    }

    pub fn with_key_candidates(mut self, pattern: &str) -> Self {
        self.key_candidates = Some(pattern.to_string());
        self
    }

    /// Compile every pattern in the rule
    pub fn check(&self) -> Result<(), ExtractionError> {
        let mut patterns: Vec<&str> = Vec::new();
        match &self.locator {
            PayloadLocator::HiddenElement { .. } => {}
            PayloadLocator::Regex { pattern, aux } | PayloadLocator::PackedScript { pattern, aux } => {
                patterns.push(pattern);
                patterns.extend(aux.as_deref());
            }
            PayloadLocator::JsonField { path, .. } => {
                if path.is_empty() {
                    return Err(ExtractionError::InvalidRule("empty JSON path".to_string()));
                }
            }
        }
        patterns.extend(self.key_candidates.as_deref());
        for pattern in patterns {
            compile(pattern)?;
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex, ExtractionError> {
    Regex::new(pattern).map_err(|e| ExtractionError::InvalidRule(format!("{}: {}", pattern, e)))
}

/// Isolate the payload for `provider` from a terminal hop body
pub fn extract(
    provider: &str,
    body: &str,
    origin_url: &str,
    rule: &ExtractionRule,
) -> Result<EncodedPayload, ExtractionError> {
    let (data, aux) = match &rule.locator {
        PayloadLocator::HiddenElement { min_len, require } => {
            hidden_element(body, *min_len, require.as_deref())?
        }
        PayloadLocator::Regex { pattern, aux } => {
            let data = unique(regex_matches(&compile(pattern)?, body))?;
            let aux = match aux {
                Some(aux) => Some(first_capture(&compile(aux)?, body, "auxiliary id")?),
                None => None,
            };
            (data, aux)
        }
        PayloadLocator::JsonField { path, aux } => {
            let document: serde_json::Value = serde_json::from_str(body)
                .map_err(|_| ExtractionError::NotFound("body is not JSON".to_string()))?;
            let data = json::lookup(&document, path)
                .and_then(json::as_text)
                .ok_or_else(|| ExtractionError::NotFound(format!("JSON field {}", path)))?;
            let aux = match aux {
                Some(aux_path) => Some(
                    json::lookup(&document, aux_path)
                        .and_then(json::as_text)
                        .ok_or_else(|| ExtractionError::NotFound(format!("JSON field {}", aux_path)))?,
                ),
                None => None,
            };
            (data, aux)
        }
        PayloadLocator::PackedScript { pattern, aux } => {
            let unpacked = unpack::unpack_all(body)?;
            if unpacked.is_empty() {
                return Err(ExtractionError::NotFound("packed script".to_string()));
            }
            let re = compile(pattern)?;
            let data = unique(unpacked.iter().flat_map(|text| regex_matches(&re, text)).collect())?;
            let aux = match aux {
                Some(aux) => {
                    let aux_re = compile(aux)?;
                    let found = unpacked
                        .iter()
                        .map(String::as_str)
                        .chain(std::iter::once(body))
                        .find_map(|text| first_capture(&aux_re, text, "auxiliary id").ok());
                    Some(found.ok_or_else(|| ExtractionError::NotFound("auxiliary id".to_string()))?)
                }
                None => None,
            };
            (data, aux)
        }
    };

    let key_candidates = match &rule.key_candidates {
        Some(pattern) => dedup(regex_matches(&compile(pattern)?, body)),
        None => Vec::new(),
    };

    debug!(
        provider,
        payload_len = data.len(),
        has_aux = aux.is_some(),
        candidates = key_candidates.len(),
        "Payload extracted"
    );

    Ok(EncodedPayload {
        provider: provider.to_string(),
        data,
        aux,
        key_candidates,
        origin_url: origin_url.to_string(),
    })
}

/// Captured text of every match: the `payload` group, else group 1, else
/// the whole match
fn regex_matches(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| {
            caps.name("payload")
                .or_else(|| caps.get(1))
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn first_capture(re: &Regex, text: &str, what: &str) -> Result<String, ExtractionError> {
    regex_matches(re, text)
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::NotFound(what.to_string()))
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Exactly one distinct candidate, or an error naming why not
fn unique(candidates: Vec<String>) -> Result<String, ExtractionError> {
    let mut distinct = dedup(candidates);
    match distinct.len() {
        0 => Err(ExtractionError::NotFound("no candidate matched".to_string())),
        1 => Ok(distinct.remove(0)),
        count => Err(ExtractionError::AmbiguousMatch { count }),
    }
}

fn hidden_element(
    body: &str,
    min_len: usize,
    require: Option<&str>,
) -> Result<(String, Option<String>), ExtractionError> {
    let element_re = compile(
        r"(?is)<(div|span|p|section|article|pre|code|textarea)\b([^>]*)>([^<]*)</(div|span|p|section|article|pre|code|textarea)\s*>",
    )?;
    let id_re = compile(r#"(?i)\bid\s*=\s*["']([^"']+)["']"#)?;

    let mut found: Vec<(String, String)> = Vec::new();
    for caps in element_re.captures_iter(body) {
        if !caps[1].eq_ignore_ascii_case(&caps[4]) {
            continue;
        }
        let Some(id) = id_re.captures(&caps[2]).map(|c| c[1].trim().to_string()) else {
            continue;
        };
        let text = caps[3].trim();
        if id.is_empty() || text.len() <= min_len {
            continue;
        }
        if let Some(required) = require {
            if !text.contains(required) {
                continue;
            }
        }
        if !found.iter().any(|(existing, _)| existing == text) {
            found.push((text.to_string(), id));
        }
    }

    match found.len() {
        0 => Err(ExtractionError::NotFound(format!(
            "no identified element with more than {} characters",
            min_len
        ))),
        1 => {
            let (text, id) = found.remove(0);
            Ok((text, Some(id)))
        }
        count => Err(ExtractionError::AmbiguousMatch { count }),
    }
}
