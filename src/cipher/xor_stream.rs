//! XOR stream scheme with ciphertext-feedback keystream

use crate::cipher::keys::Keystream;

/// Decode `cipher`, rebuilding the keystream from the ciphertext as it goes
pub fn decode(cipher: &[u8], keystream: &Keystream) -> Vec<u8> {
    keystream
        .expand(cipher)
        .iter()
        .zip(cipher)
        .map(|(k, c)| k ^ c)
        .collect()
}

/// Encode `plain`; each keystream byte depends on ciphertext already produced
pub fn encode(plain: &[u8], keystream: &Keystream) -> Vec<u8> {
    let mut stream = Vec::with_capacity(plain.len());
    let mut cipher = Vec::with_capacity(plain.len());
    for (index, byte) in plain.iter().enumerate() {
        let k = keystream.byte_at(index, &stream, &cipher);
        stream.push(k);
        cipher.push(byte ^ k);
    }
    cipher
}
