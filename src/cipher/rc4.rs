//! RC4 stream cipher

use crate::error::UnsealError;

/// RC4 state after key scheduling
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Result<Self, UnsealError> {
        if key.is_empty() || key.len() > 256 {
            return Err(UnsealError::Decode(format!(
                "RC4 key must be 1..=256 bytes, got {}",
                key.len()
            )));
        }

        let mut state = [0u8; 256];
        for (index, slot) in state.iter_mut().enumerate() {
            *slot = index as u8;
        }

        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Ok(Self { state, i: 0, j: 0 })
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        let index = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[index as usize]
    }

    /// XOR `data` with the generated stream
    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|byte| byte ^ self.next_byte()).collect()
    }
}

/// One-shot RC4 transform (encryption and decryption are the same operation)
pub fn apply(key: &[u8], data: &[u8]) -> Result<Vec<u8>, UnsealError> {
    Ok(Rc4::new(key)?.apply(data))
}
