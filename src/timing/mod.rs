//! Settle delays and cancellation
//!
//! Every wait in the controller goes through a [`Sleeper`] so the delay is a
//! named, injectable duration instead of a bare `thread::sleep`.

use crate::errors::AutofocusError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Blocking wait used for motor and sensor settle delays.
///
/// Implementations block only the calling worker.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Shared operator abort flag.
///
/// Once set, adapters stop issuing actuator commands. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            log::warn!("Autofocus cancellation requested");
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been triggered.
    pub fn check(&self) -> Result<(), AutofocusError> {
        if self.is_cancelled() {
            Err(AutofocusError::Cancelled)
        } else {
            Ok(())
        }
    }
}
