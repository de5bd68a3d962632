//! Random short code generation.

use rand::Rng;

use crate::{Code, CodeGenerator, CoreError};

/// Shortest generated code.
pub const MIN_CODE_LENGTH: usize = 6;
/// Longest generated code.
pub const MAX_CODE_LENGTH: usize = 8;

const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draws codes from the thread-local RNG. Every call is independent: the
/// length is uniform in `[min_len, max_len]` and each character is uniform
/// over the 62-character alphabet.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl RandomCodeGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self, min_len: usize, max_len: usize) -> Result<Code, CoreError> {
        if min_len == 0 || max_len < min_len {
            return Err(CoreError::Generation(format!(
                "invalid range {min_len}..={max_len}"
            )));
        }
        let mut rng = rand::rng();
        let len = rng.random_range(min_len..=max_len);
        let s: String = (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Code::new(s)
    }
}
