//! Block cipher behind a substitution alphabet

use crate::cipher::{substitution, STANDARD_LENIENT};
use crate::error::UnsealError;
use aes::cipher::{Block, BlockDecrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use std::fmt;

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

pub const BLOCK_SIZE: usize = 16;

/// Supported block ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockCipherId {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl BlockCipherId {
    pub fn key_len(&self) -> usize {
        match self {
            BlockCipherId::Aes128Cbc => 16,
            BlockCipherId::Aes192Cbc => 24,
            BlockCipherId::Aes256Cbc => 32,
        }
    }
}

impl fmt::Display for BlockCipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockCipherId::Aes128Cbc => "aes-128-cbc",
            BlockCipherId::Aes192Cbc => "aes-192-cbc",
            BlockCipherId::Aes256Cbc => "aes-256-cbc",
        };
        f.write_str(name)
    }
}

/// Byte reinterpretation between base64 decoding and decryption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reinterpret {
    #[default]
    None,
    Reverse,
    NestedBase64,
}

impl Reinterpret {
    fn apply(&self, bytes: Vec<u8>) -> Result<Vec<u8>, UnsealError> {
        match self {
            Reinterpret::None => Ok(bytes),
            Reinterpret::Reverse => Ok(bytes.into_iter().rev().collect()),
            Reinterpret::NestedBase64 => {
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| UnsealError::Decode("Nested base64 is not text".to_string()))?;
                Ok(STANDARD_LENIENT.decode(text.trim())?)
            }
        }
    }

    fn invert(&self, bytes: Vec<u8>) -> Vec<u8> {
        match self {
            Reinterpret::None => bytes,
            Reinterpret::Reverse => bytes.into_iter().rev().collect(),
            Reinterpret::NestedBase64 => STANDARD_LENIENT.encode(bytes).into_bytes(),
        }
    }
}

/// Undo the text stages: substitution reverse, base64, reinterpretation
pub fn ciphertext_bytes(
    text: &str,
    alphabet: Option<&str>,
    reinterpret: Reinterpret,
) -> Result<Vec<u8>, UnsealError> {
    let decoded = match alphabet {
        Some(alphabet) => substitution::decode(alphabet, text)?,
        None => STANDARD_LENIENT.decode(text.trim())?,
    };
    reinterpret.apply(decoded)
}

/// Apply the text stages in producing order
pub fn ciphertext_text(
    bytes: &[u8],
    alphabet: Option<&str>,
    reinterpret: Reinterpret,
) -> Result<String, UnsealError> {
    let reinterpreted = reinterpret.invert(bytes.to_vec());
    match alphabet {
        Some(alphabet) => substitution::encode(alphabet, &reinterpreted),
        None => Ok(STANDARD_LENIENT.encode(reinterpreted)),
    }
}

fn invalid_length(_: impl fmt::Debug) -> UnsealError {
    UnsealError::Decode("Invalid block cipher key or IV length".to_string())
}

fn bad_padding(_: impl fmt::Debug) -> UnsealError {
    UnsealError::Decode("Block cipher padding check failed".to_string())
}

/// CBC decrypt with PKCS#7 unpadding
pub fn decrypt(
    cipher: BlockCipherId,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, UnsealError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(UnsealError::Decode(format!(
            "Ciphertext length {} is not a positive multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }
    match cipher {
        BlockCipherId::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(bad_padding),
        BlockCipherId::Aes192Cbc => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(bad_padding),
        BlockCipherId::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(bad_padding),
    }
}

/// CBC encrypt with PKCS#7 padding
pub fn encrypt(
    cipher: BlockCipherId,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, UnsealError> {
    let encrypted = match cipher {
        BlockCipherId::Aes128Cbc => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        BlockCipherId::Aes192Cbc => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        BlockCipherId::Aes256Cbc => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<Pkcs7>(data),
    };
    Ok(encrypted)
}

fn raw_decrypt_block<C: KeyInit + BlockDecrypt>(key: &[u8], block: &[u8]) -> Option<Vec<u8>> {
    let cipher = C::new_from_slice(key).ok()?;
    let mut buffer = Block::<C>::clone_from_slice(block);
    cipher.decrypt_block(&mut buffer);
    Some(buffer.to_vec())
}

/// Solve the CBC IV from the first ciphertext block and its known plaintext:
/// `IV = D_k(C0) ^ P0`
pub fn solve_iv(
    cipher: BlockCipherId,
    key: &[u8],
    first_block: &[u8],
    known_plain: &[u8],
) -> Option<Vec<u8>> {
    if first_block.len() < BLOCK_SIZE || known_plain.len() < BLOCK_SIZE {
        return None;
    }
    let block = &first_block[..BLOCK_SIZE];
    let decrypted = match cipher {
        BlockCipherId::Aes128Cbc => raw_decrypt_block::<Aes128>(key, block)?,
        BlockCipherId::Aes192Cbc => raw_decrypt_block::<Aes192>(key, block)?,
        BlockCipherId::Aes256Cbc => raw_decrypt_block::<Aes256>(key, block)?,
    };
    Some(
        decrypted
            .iter()
            .zip(&known_plain[..BLOCK_SIZE])
            .map(|(d, p)| d ^ p)
            .collect(),
    )
}
