//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples room and relay logic from system
//! resources (time, randomness). The production server backs it with the OS
//! clock and `getrandom`; the harness backs it with a virtual clock and a
//! seeded RNG so liveness tests can advance time without sleeping.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Instant;

/// Failure to obtain random bytes.
///
/// Tokens and password salts are only ever minted from successfully filled
/// buffers; callers turn this into a `SERVER_ERROR` instead of issuing a
/// predictable token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntropyError {
    /// The entropy source reported an error.
    #[error("entropy source unavailable: {0}")]
    Unavailable(String),

    /// The entropy source kept producing values that already exist.
    #[error("entropy source produced {attempts} colliding values in a row")]
    Degenerate {
        /// Consecutive attempts that collided.
        attempts: u32,
    },
}

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool and MUST
    /// report failure instead of falling back to a fixed pattern.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;
}
