use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use transfer_core::StoreTransaction;
use tracing::warn;

use crate::error::{BookingError, BookingResult};

/// Upper-case letters and digits without the look-alikes `0 O 1 I`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const MIN_LENGTH: usize = 6;
pub const MAX_LENGTH: usize = 8;

/// Produces short human-typeable booking confirmation codes.
///
/// With 32 symbols and 8 characters the space is ~1.1e12 codes, so the
/// collision retry in [`generate_unique`](Self::generate_unique) almost never
/// runs more than once.
pub struct ConfirmationCodeGenerator {
    length: usize,
    max_attempts: u32,
    rng: Mutex<StdRng>,
}

impl ConfirmationCodeGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self::with_rng(length, max_attempts, StdRng::from_entropy())
    }

    /// Deterministic sequence, for tests.
    pub fn seeded(length: usize, max_attempts: u32, seed: u64) -> Self {
        Self::with_rng(length, max_attempts, StdRng::seed_from_u64(seed))
    }

    fn with_rng(length: usize, max_attempts: u32, rng: StdRng) -> Self {
        Self {
            length: length.clamp(MIN_LENGTH, MAX_LENGTH),
            max_attempts: max_attempts.max(1),
            rng: Mutex::new(rng),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock();
        (0..self.length)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// Draw codes until one is not taken in the store, as seen by `tx`.
    pub async fn generate_unique(&self, tx: &mut dyn StoreTransaction) -> BookingResult<String> {
        for attempt in 1..=self.max_attempts {
            let code = self.generate();
            if !tx.confirmation_code_exists(&code).await? {
                return Ok(code);
            }
            warn!("Confirmation code collision on attempt {}", attempt);
        }
        Err(BookingError::CodeSpaceExhausted(self.max_attempts))
    }
}

impl Default for ConfirmationCodeGenerator {
    fn default() -> Self {
        Self::new(MAX_LENGTH, 5)
    }
}

pub fn is_well_formed(code: &str) -> bool {
    (MIN_LENGTH..=MAX_LENGTH).contains(&code.len()) && code.bytes().all(|b| ALPHABET.contains(&b))
}
