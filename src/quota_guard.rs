//! # Quota Guard Module
//!
//! Backoff state for the shared spreadsheet quota. When the datastore
//! signals a rate limit, the guard opens for a long fixed interval and
//! every gateway call made in that window fails fast instead of touching
//! the API again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate-limit backoff guard for spreadsheet operations.
///
/// # State machine
///
/// - **Closed**: normal operation, calls pass through
/// - **Open**: a rate-limit signal was seen; calls fail fast until the
///   cooldown interval elapses, then the guard closes again on its own
#[derive(Debug)]
pub struct QuotaGuard {
    tripped_at: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl QuotaGuard {
    /// Create a guard with the given cooldown interval.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            tripped_at: Mutex::new(None),
            cooldown,
        }
    }

    /// Check whether the guard is open (calls should fail fast).
    ///
    /// Automatically resets to closed once the cooldown has elapsed.
    pub fn is_open(&self) -> bool {
        let mut tripped = self.tripped_at.lock().expect("quota guard lock poisoned");
        match *tripped {
            Some(at) if at.elapsed() < self.cooldown => true,
            Some(_) => {
                *tripped = None;
                false
            }
            None => false,
        }
    }

    /// Record a rate-limit signal, opening the guard for one cooldown.
    pub fn trip(&self) {
        let mut tripped = self.tripped_at.lock().expect("quota guard lock poisoned");
        *tripped = Some(Instant::now());
    }
}
