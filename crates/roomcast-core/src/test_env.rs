//! Minimal environment for unit tests inside this crate.
//!
//! Integration tests use the harness `SimEnv`; this one only exists because
//! the harness depends on this crate.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::env::{EntropyError, Environment};

#[derive(Clone)]
pub(crate) struct TestEnv {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
    counter: Arc<AtomicU64>,
    broken: bool,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            counter: Arc::new(AtomicU64::new(1)),
            broken: false,
        }
    }

    /// Environment whose entropy source always fails.
    pub(crate) fn without_entropy() -> Self {
        Self { broken: true, ..Self::new() }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Counter-derived bytes: distinct per call, never all zero.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        if self.broken {
            return Err(EntropyError::Unavailable("test entropy disabled".to_string()));
        }
        for chunk in buffer.chunks_mut(8) {
            let value = self.counter.fetch_add(1, Ordering::Relaxed);
            let bytes = value.wrapping_mul(0x9E37_79B9_7F4A_7C15).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        Ok(())
    }
}
