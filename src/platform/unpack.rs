//! Static unpacker for `eval(function(p,a,c,k,e,d){...})` packed scripts
//!
//! Packed scripts carry a template of base-N word indices plus a `|`-joined
//! dictionary. Unpacking is plain substitution; nothing is evaluated.

use crate::error::ExtractionError;
use regex::{Captures, Regex};
use tracing::debug;

const DIGITS: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const PACKED_PATTERN: &str = r#"(?s)eval\(function\(p,a,c,k,e,[rd]\)\{.*?\}\s*\(\s*'((?:[^'\\]|\\.)*)'\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*'((?:[^'\\]|\\.)*)'\.split\('\|'\)"#;

/// Unpack every packed block in `body`, in document order
pub fn unpack_all(body: &str) -> Result<Vec<String>, ExtractionError> {
    let re = Regex::new(PACKED_PATTERN)
        .map_err(|e| ExtractionError::InvalidRule(e.to_string()))?;

    re.captures_iter(body)
        .map(|caps| {
            let radix = parse_number(&caps, 2)?;
            let count = parse_number(&caps, 3)?;
            let words: Vec<String> = unescape(&caps[4]).split('|').map(str::to_string).collect();
            if words.len() != count {
                debug!(count, words = words.len(), "Packed dictionary size differs from count");
            }
            unpack(&unescape(&caps[1]), radix, &words)
        })
        .collect()
}

fn parse_number(caps: &Captures<'_>, group: usize) -> Result<usize, ExtractionError> {
    caps[group]
        .parse()
        .map_err(|_| ExtractionError::NotFound(format!("packed header field {}", &caps[group])))
}

/// Replace each base-`radix` word in `template` with its dictionary entry
pub fn unpack(template: &str, radix: usize, words: &[String]) -> Result<String, ExtractionError> {
    if !(2..=DIGITS.len()).contains(&radix) {
        return Err(ExtractionError::NotFound(format!(
            "packed radix {} outside 2..=62",
            radix
        )));
    }

    let word_re =
        Regex::new(r"\b\w+\b").map_err(|e| ExtractionError::InvalidRule(e.to_string()))?;
    let unpacked = word_re.replace_all(template, |caps: &Captures<'_>| {
        let word = &caps[0];
        decode_index(word, radix)
            .and_then(|index| words.get(index))
            .filter(|replacement| !replacement.is_empty())
            .cloned()
            .unwrap_or_else(|| word.to_string())
    });
    Ok(unpacked.into_owned())
}

fn decode_index(word: &str, radix: usize) -> Option<usize> {
    word.chars().try_fold(0usize, |acc, c| {
        let digit = DIGITS.find(c).filter(|&d| d < radix)?;
        acc.checked_mul(radix)?.checked_add(digit)
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
