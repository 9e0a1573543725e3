use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;
use ulid::{Generator, Ulid};

static TOME_IDS: Lazy<TomeIdGenerator> = Lazy::new(TomeIdGenerator::new);

/// Identifier stamped into every tome manifest.
pub type TomeId = Ulid;

/// Thread-safe ULID generator for tome identities.
pub struct TomeIdGenerator {
    inner: Mutex<Generator>,
}

impl TomeIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`TomeId`] in a monotonic, time-ordered sequence.
    ///
    /// Falls back to a random ULID if the generator overflows within one millisecond
    /// or its lock was poisoned.
    pub fn generate(&self) -> TomeId {
        match self.inner.lock() {
            Ok(mut guard) => guard.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        }
    }
}

impl Default for TomeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Next identifier from the process-wide generator.
pub(crate) fn next_tome_id() -> TomeId {
    TOME_IDS.generate()
}

/// Milliseconds since the unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}
