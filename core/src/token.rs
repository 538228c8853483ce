use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic source of round tokens.
///
/// Every invalidation/switch round is tagged with one token; a message whose
/// token is not the current one belongs to a closed round and must be
/// discarded. The seed is wall-clock microseconds so a restarted coordinator
/// always mints tokens newer than any it published before.
#[derive(Debug)]
pub struct TokenMint {
    current: u64,
}

impl TokenMint {
    pub fn new() -> Self {
        Self {
            current: current_timestamp_us(),
        }
    }

    /// Mint with an explicit seed. Useful for deterministic tests.
    pub fn with_seed(seed: u64) -> Self {
        Self { current: seed }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Advance to the next token and return it.
    pub fn advance(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// Returns true iff `token` belongs to the open round.
    pub fn redeem(&self, token: u64) -> bool {
        token == self.current
    }
}

impl Default for TokenMint {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_micros() as u64
}
