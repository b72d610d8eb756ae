//! URL utilities for hop templates and locator handling

use crate::error::UnsealError;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use url::{form_urlencoded, Url};

fn placeholder_regex() -> Result<&'static Regex, regex::Error> {
    static PLACEHOLDER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}"))
        .as_ref()
        .map_err(Clone::clone)
}

/// Bind `{name}` placeholders verbatim; used for header values
pub fn bind_template(
    template: &str,
    bindings: &BTreeMap<String, String>,
) -> Result<String, UnsealError> {
    bind_with(template, bindings, str::to_string)
}

/// Bind `{name}` placeholders in a URL template, percent-encoding each value
/// so a bound value never adds path segments, a query or a fragment
pub fn bind_url_template(
    template: &str,
    bindings: &BTreeMap<String, String>,
) -> Result<String, UnsealError> {
    bind_with(template, bindings, encode_component)
}

fn bind_with(
    template: &str,
    bindings: &BTreeMap<String, String>,
    encode: impl Fn(&str) -> String,
) -> Result<String, UnsealError> {
    let mut missing = None;
    let bound = placeholder_regex()?.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match bindings.get(name) {
            Some(value) => encode(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(UnsealError::Config(format!(
            "Template '{}' references unbound placeholder '{}'",
            template, name
        )));
    }

    Ok(bound.into_owned())
}

/// Percent-encode one URL component. `byte_serialize` writes a space as `+`
/// and a literal `+` as `%2B`, so every remaining `+` is a space.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Placeholder names referenced by a template, in order of appearance
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .map(|re| {
            re.captures_iter(template)
                .map(|caps| caps[1].to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Serialized origin (`scheme://host[:port]`) of a URL
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.origin().ascii_serialization())
}

/// Resolve a possibly relative locator against the URL it was found on
pub fn resolve_against(base: &str, candidate: &str) -> Result<String, UnsealError> {
    if let Ok(absolute) = Url::parse(candidate) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(base)?;
    Ok(base.join(candidate)?.to_string())
}

/// Check if the locator path ends with one of the given extensions
pub fn has_extension(url: &str, extensions: &[String]) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };
    extensions
        .iter()
        .any(|ext| path.ends_with(&ext.to_ascii_lowercase()))
}

/// Check if the URL points at an HLS playlist
pub fn is_hls(url: &str) -> bool {
    has_extension(url, &[".m3u8".to_string()])
}
