//! Custom base64 alphabet substitution

use crate::cipher::STANDARD_LENIENT;
use crate::error::UnsealError;
use base64::Engine;

/// The RFC 4648 base64 alphabet
pub const STANDARD_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A permutation of the standard base64 alphabet
#[derive(Debug, Clone)]
pub struct SubstitutionAlphabet {
    to_standard: [u8; 256],
    from_standard: [u8; 256],
}

impl SubstitutionAlphabet {
    /// Build the translation tables, rejecting anything but a 64-symbol ASCII permutation
    pub fn new(custom: &str) -> Result<Self, UnsealError> {
        let custom = custom.as_bytes();
        if custom.len() != 64 {
            return Err(UnsealError::Config(format!(
                "Substitution alphabet must have 64 symbols, got {}",
                custom.len()
            )));
        }

        let mut to_standard = [0u8; 256];
        let mut from_standard = [0u8; 256];
        for (&symbol, &standard) in custom.iter().zip(STANDARD_ALPHABET.as_bytes()) {
            if !symbol.is_ascii_graphic() || symbol == b'=' {
                return Err(UnsealError::Config(format!(
                    "Invalid substitution symbol {:?}",
                    symbol as char
                )));
            }
            if to_standard[symbol as usize] != 0 {
                return Err(UnsealError::Config(format!(
                    "Duplicate substitution symbol {:?}",
                    symbol as char
                )));
            }
            to_standard[symbol as usize] = standard;
            from_standard[standard as usize] = symbol;
        }

        Ok(Self {
            to_standard,
            from_standard,
        })
    }

    /// Map custom-alphabet text back onto the standard alphabet
    pub fn to_standard(&self, text: &str) -> Result<String, UnsealError> {
        let mut out = String::with_capacity(text.len());
        for byte in text.bytes() {
            match byte {
                b'=' => out.push('='),
                b if b.is_ascii_whitespace() => {}
                b => match self.to_standard[b as usize] {
                    0 => {
                        return Err(UnsealError::Decode(format!(
                            "Symbol {:?} is outside the substitution alphabet",
                            b as char
                        )))
                    }
                    mapped => out.push(mapped as char),
                },
            }
        }
        Ok(out)
    }

    /// Map standard base64 text onto the custom alphabet
    pub fn from_standard(&self, text: &str) -> String {
        text.bytes()
            .map(|b| match self.from_standard[b as usize] {
                0 => b as char,
                mapped => mapped as char,
            })
            .collect()
    }
}

/// Reverse the alphabet permutation, then base64-decode
pub fn decode(alphabet: &str, text: &str) -> Result<Vec<u8>, UnsealError> {
    let table = SubstitutionAlphabet::new(alphabet)?;
    let standard = table.to_standard(text)?;
    Ok(STANDARD_LENIENT.decode(standard)?)
}

/// Base64-encode, then apply the alphabet permutation
pub fn encode(alphabet: &str, bytes: &[u8]) -> Result<String, UnsealError> {
    let table = SubstitutionAlphabet::new(alphabet)?;
    Ok(table.from_standard(&STANDARD_LENIENT.encode(bytes)))
}
