//! Random identifiers that scope per-job output directories.

use rand::Rng;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Characters per fragment; two fragments give roughly 113 bits.
const FRAGMENT_LEN: usize = 11;

/// Source of identifiers for job working directories.
pub trait IdGenerator: Send + Sync + 'static {
    /// Produce a fresh identifier made of filesystem-safe characters.
    fn generate(&self) -> String;
}

/// Two concatenated random base-36 fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base36IdGenerator;

impl IdGenerator for Base36IdGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::rng();
        let mut id = String::with_capacity(FRAGMENT_LEN * 2);
        for _ in 0..2 {
            for _ in 0..FRAGMENT_LEN {
                let idx = rng.random_range(0..ALPHABET.len());
                id.push(ALPHABET[idx] as char);
            }
        }
        id
    }
}
