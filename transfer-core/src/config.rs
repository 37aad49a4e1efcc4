use serde::Deserialize;
use crate::models::WaitPolicy;

/// Tunables of the booking path.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BookingRules {
    /// Bound on waiting for a contended schedule or booking row.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Fail immediately on contention instead of waiting `lock_wait_ms`.
    #[serde(default)]
    pub no_wait: bool,
    #[serde(default = "default_code_length")]
    pub confirmation_code_length: usize,
    #[serde(default = "default_code_attempts")]
    pub max_code_attempts: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_lock_wait_ms() -> u64 { 250 }
fn default_code_length() -> usize { 8 }
fn default_code_attempts() -> u32 { 5 }
fn default_currency() -> String { "RUB".to_string() }

impl BookingRules {
    pub fn wait_policy(&self) -> WaitPolicy {
        if self.no_wait {
            WaitPolicy::NoWait
        } else {
            WaitPolicy::bounded_ms(self.lock_wait_ms)
        }
    }
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            lock_wait_ms: default_lock_wait_ms(),
            no_wait: false,
            confirmation_code_length: default_code_length(),
            max_code_attempts: default_code_attempts(),
            currency: default_currency(),
        }
    }
}
