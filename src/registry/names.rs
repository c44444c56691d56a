//! Short and secure instance names
//!
//! Eight-character slugs over `[0-9a-z]`, drawn from one shared
//! entropy-seeded generator.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of a generated name
pub const NAME_LENGTH: usize = 8;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Shared name generator
pub struct SecureNameGenerator {
    rng: Mutex<StdRng>,
}

impl SecureNameGenerator {
    /// Generator seeded from the OS entropy source
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and benches
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Draw one name
    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock();
        (0..NAME_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for SecureNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `s` has the shape of a generated name
pub fn is_valid_name(s: &str) -> bool {
    s.len() == NAME_LENGTH && s.bytes().all(|b| ALPHABET.contains(&b))
}
