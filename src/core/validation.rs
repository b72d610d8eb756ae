//! Structural validation of decoded candidates

use crate::cipher::DecodedResult;
use crate::error::UnsealError;
use crate::utils::json;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Structural tests a candidate can pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Predicate {
    /// JSON document carrying a locator field
    StructuredJson,
    /// Contains a recognized `scheme://authority` substring
    SchemeAuthority,
    /// Contains a path ending in a recognized media extension
    KnownExtension,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Predicate::StructuredJson => "structured-json",
            Predicate::SchemeAuthority => "scheme+authority",
            Predicate::KnownExtension => "known-extension",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub matched: Option<Predicate>,
    /// Locator found by the matching predicate, possibly relative
    pub locator: Option<String>,
    /// JSON candidate declared an HLS stream
    pub declared_hls: bool,
    /// Why the candidate failed, or which predicate accepted it
    pub reason: String,
}

impl ValidationVerdict {
    fn pass(predicate: Predicate, locator: String, declared_hls: bool) -> Self {
        Self {
            passed: true,
            matched: Some(predicate),
            locator: Some(locator),
            declared_hls,
            reason: format!("matched {}", predicate),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            matched: None,
            locator: None,
            declared_hls: false,
            reason: reason.into(),
        }
    }

    /// Failure as an error for the attempt log
    pub fn into_error(self) -> UnsealError {
        UnsealError::ValidationFailed(self.reason)
    }
}

/// What the validator recognizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    pub schemes: Vec<String>,
    pub extensions: Vec<String>,
    /// JSON fields that carry a locator, in preference order
    pub json_fields: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            schemes: vec!["http".to_string(), "https".to_string()],
            extensions: [".m3u8", ".mp4", ".mpd", ".webm", ".mkv"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            json_fields: ["file", "url", "source", "sources", "link"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

/// Deterministic, side-effect-free candidate validator
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
    authority_re: Regex,
    extension_re: Regex,
    scheme_re: Regex,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Result<Self, UnsealError> {
        if config.schemes.is_empty() || config.extensions.is_empty() {
            return Err(UnsealError::Config(
                "Validator needs at least one scheme and one extension".to_string(),
            ));
        }

        let schemes: Vec<String> = config.schemes.iter().map(|s| regex::escape(s)).collect();
        let authority_re = Regex::new(&format!(
            r#"(?i)\b(?:{})://[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::\d+)?(?:[/?#][^\s"'<>\\]*)?"#,
            schemes.join("|")
        ))?;

        let extensions: Vec<String> = config
            .extensions
            .iter()
            .map(|e| regex::escape(e.trim_start_matches('.')))
            .collect();
        let extension_re = Regex::new(&format!(
            r#"(?i)[^\s"'<>\\]*\.(?:{})(?:[?#][^\s"'<>\\]*)?(?:$|[\s"'<>\\])"#,
            extensions.join("|")
        ))?;

        Ok(Self {
            config,
            authority_re,
            extension_re,
            scheme_re: Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*):")?,
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate one candidate
    pub fn validate(&self, candidate: &DecodedResult) -> ValidationVerdict {
        let Some(text) = candidate.text() else {
            return ValidationVerdict::fail("candidate is not UTF-8");
        };
        if text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
        {
            return ValidationVerdict::fail("candidate contains control characters");
        }
        let text = text.trim();
        if text.is_empty() {
            return ValidationVerdict::fail("candidate is empty");
        }

        if text.starts_with('{') || text.starts_with('[') {
            if let Ok(document) = serde_json::from_str::<Value>(text) {
                return match self.json_locator(&document, 0) {
                    Some((locator, _)) if !self.scheme_allowed(&locator) => {
                        ValidationVerdict::fail(format!("JSON locator has a foreign scheme: {}", locator))
                    }
                    Some((locator, declared_hls)) => {
                        ValidationVerdict::pass(Predicate::StructuredJson, locator, declared_hls)
                    }
                    None => ValidationVerdict::fail(format!(
                        "JSON candidate has none of the fields {}",
                        self.config.json_fields.join(", ")
                    )),
                };
            }
        }

        if let Some(found) = self.authority_re.find(text) {
            return ValidationVerdict::pass(Predicate::SchemeAuthority, found.as_str().to_string(), false);
        }

        if let Some(found) = self.extension_re.find(text) {
            let locator = found
                .as_str()
                .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '\\'));
            if !locator.is_empty() && self.scheme_allowed(locator) {
                return ValidationVerdict::pass(Predicate::KnownExtension, locator.to_string(), false);
            }
        }

        ValidationVerdict::fail("no scheme+authority or known extension in candidate")
    }

    /// A locator either has no `scheme:` prefix (relative) or one of the
    /// configured schemes
    fn scheme_allowed(&self, locator: &str) -> bool {
        match self.scheme_re.captures(locator) {
            Some(caps) => self
                .config
                .schemes
                .iter()
                .any(|scheme| scheme.eq_ignore_ascii_case(&caps[1])),
            None => true,
        }
    }

    /// First locator field in preference order; arrays yield their first
    /// element and nested objects are searched one level deep
    fn json_locator(&self, value: &Value, depth: usize) -> Option<(String, bool)> {
        match value {
            Value::Array(items) => items.first().and_then(|item| self.json_locator(item, depth)),
            Value::Object(map) => {
                let declared_hls = map
                    .get("type")
                    .and_then(json::as_text)
                    .map(|t| {
                        let t = t.to_ascii_lowercase();
                        t == "hls" || t.contains("mpegurl")
                    })
                    .unwrap_or(false);

                for field in &self.config.json_fields {
                    let Some(found) = map.get(field) else {
                        continue;
                    };
                    match found {
                        Value::String(s) if !s.trim().is_empty() => {
                            return Some((s.trim().to_string(), declared_hls));
                        }
                        Value::Array(_) | Value::Object(_) if depth < 2 => {
                            if let Some((locator, nested_hls)) = self.json_locator(found, depth + 1) {
                                return Some((locator, declared_hls || nested_hls));
                            }
                        }
                        _ => {}
                    }
                }
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str) -> DecodedResult {
        DecodedResult::new(text.as_bytes().to_vec(), "test".to_string())
    }

    fn validator() -> Validator {
        Validator::new(ValidatorConfig::default()).unwrap()
    }

    #[test]
    fn test_scheme_authority() {
        let verdict = validator().validate(&candidate(
            "https://example.tv/stream/4f9a2c71/index.m3u8?t=Zx81Qp&e=1767225600",
        ));
        assert!(verdict.passed);
        assert_eq!(verdict.matched, Some(Predicate::SchemeAuthority));
        assert_eq!(
            verdict.locator.as_deref(),
            Some("https://example.tv/stream/4f9a2c71/index.m3u8?t=Zx81Qp&e=1767225600")
        );
    }

    #[test]
    fn test_scheme_authority_inside_text() {
        let verdict =
            validator().validate(&candidate(r#"player.src("https://cdn.example/v/1.mp4");"#));
        assert_eq!(verdict.locator.as_deref(), Some("https://cdn.example/v/1.mp4"));
    }

    #[test]
    fn test_structured_json() {
        let verdict = validator().validate(&candidate(
            r#"{"sources":[{"file":"/hls/abc/master.m3u8","type":"hls"}],"tracks":[]}"#,
        ));
        assert!(verdict.passed);
        assert_eq!(verdict.matched, Some(Predicate::StructuredJson));
        assert_eq!(verdict.locator.as_deref(), Some("/hls/abc/master.m3u8"));
        assert!(verdict.declared_hls);
    }

    #[test]
    fn test_json_without_locator_fields() {
        let verdict = validator().validate(&candidate(r#"{"status":"ok","id":7}"#));
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("file, url"));
    }

    #[test]
    fn test_known_extension_relative() {
        let verdict = validator().validate(&candidate("/v/9f8e/video.MP4?e=1"));
        assert_eq!(verdict.matched, Some(Predicate::KnownExtension));
        assert_eq!(verdict.locator.as_deref(), Some("/v/9f8e/video.MP4?e=1"));
    }

    #[test]
    fn test_rejects_garbage() {
        let v = validator();
        let binary = DecodedResult::new(vec![0xff, 0xfe, 0x00, 0x41], "rc4".to_string());
        assert_eq!(v.validate(&binary).reason, "candidate is not UTF-8");

        let control = candidate("https://cdn.example/\u{0007}a.mp4");
        assert!(!v.validate(&control).passed);

        assert!(!v.validate(&candidate("   ")).passed);
        assert!(!v.validate(&candidate("hello world")).passed);
        assert!(!v.validate(&candidate("ftp://files.example/a.txt")).passed);
        assert!(!v.validate(&candidate("ftp://files.example/a.mp4")).passed);
        assert!(!v.validate(&candidate("javascript:x//a.mp4")).passed);
        assert!(!v.validate(&candidate(r#"{"file":"ftp://files.example/a.m3u8"}"#)).passed);
    }

    #[test]
    fn test_extension_keeps_configured_schemes() {
        let v = validator();
        let verdict = v.validate(&candidate("HTTPS:/cdn.example/v/a.mp4"));
        assert!(verdict.passed);
        assert_eq!(verdict.matched, Some(Predicate::KnownExtension));

        let verdict = v.validate(&candidate("clip.mp4?at=12:30"));
        assert_eq!(verdict.locator.as_deref(), Some("clip.mp4?at=12:30"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let v = validator();
        for text in ["https://a.example/x.m3u8", "nope", r#"{"url":"u.mp4"}"#] {
            assert_eq!(v.validate(&candidate(text)), v.validate(&candidate(text)));
        }
    }

    #[test]
    fn test_empty_config_rejected() {
        let config = ValidatorConfig {
            schemes: vec![],
            ..Default::default()
        };
        assert!(Validator::new(config).is_err());
    }

    #[test]
    fn test_rc4_fixture_is_key_sensitive() {
        use crate::cipher::{decode, CipherScheme, KeyMaterial, KeySource, PayloadEncoding};
        use crate::platform::EncodedPayload;

        const CIPHERTEXT: &str = "lw+Db6OaXN+GvU6iyEERFonFXpGo4Qz/YzM6QWqkIATP2YXVWlHnzqKgN9LosLQn";
        let key: Vec<u8> = (0x40u8..0x60).collect();
        assert_eq!(key.len(), 32);

        let scheme = CipherScheme::Rc4 {
            version: 3,
            key_source: KeySource::Stored,
            encoding: PayloadEncoding::Base64,
            known_prefix: None,
        };
        let payload = EncodedPayload {
            provider: "fixture".to_string(),
            data: CIPHERTEXT.to_string(),
            aux: None,
            key_candidates: Vec::new(),
            origin_url: "https://player.example/e/1".to_string(),
        };
        assert_eq!(PayloadEncoding::Base64.decode(CIPHERTEXT).unwrap().len(), 48);

        let v = validator();
        let decoded = decode(&payload, &scheme, Some(&KeyMaterial::FixedKey { key: key.clone() })).unwrap();
        assert_eq!(decoded.text(), Some(r#"{"file":"https://cdn.example/v/7Qx9/index.m3u8"}"#));
        let verdict = v.validate(&decoded);
        assert!(verdict.passed);
        assert_eq!(verdict.matched, Some(Predicate::StructuredJson));
        assert_eq!(verdict.locator.as_deref(), Some("https://cdn.example/v/7Qx9/index.m3u8"));

        for index in 0..key.len() {
            let mut altered = key.clone();
            altered[index] ^= 0xff;
            let decoded = decode(&payload, &scheme, Some(&KeyMaterial::FixedKey { key: altered })).unwrap();
            assert!(!v.validate(&decoded).passed, "key byte {} altered", index);
        }
    }
}
