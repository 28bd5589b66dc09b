use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame slot is closed")]
pub struct SlotClosed;

struct SlotInner<T> {
    item: Option<T>,
    published: u64,
    overwritten: u64,
    closed: bool,
}

/// Single-slot, latest-wins hand-off between a frame producer and the
/// frame source that consumes it.
///
/// Publishing replaces any frame nobody has taken yet; a reader always gets
/// the newest frame, never a stale one queued behind it.
pub struct LatestFrameSlot<T> {
    inner: Mutex<SlotInner<T>>,
    cv: Condvar,
}

impl<T> Default for LatestFrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestFrameSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                item: None,
                published: 0,
                overwritten: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `item`, returning the unread frame it replaced, if any.
    ///
    /// Publishing into a closed slot drops the item.
    pub fn publish(&self, item: T) -> Option<T> {
        let mut g = self.lock();
        if g.closed {
            return None;
        }
        let previous = g.item.replace(item);
        if previous.is_some() {
            g.overwritten = g.overwritten.saturating_add(1);
        }
        g.published = g.published.saturating_add(1);
        self.cv.notify_one();
        previous
    }

    /// Take the newest frame, waiting up to `timeout` for one to arrive.
    ///
    /// `Ok(None)` means the timeout elapsed.
    pub fn take(&self, timeout: Duration) -> Result<Option<T>, SlotClosed> {
        let mut g = self.lock();

        if timeout == Duration::ZERO {
            return match g.item.take() {
                Some(item) => Ok(Some(item)),
                None if g.closed => Err(SlotClosed),
                None => Ok(None),
            };
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = g.item.take() {
                return Ok(Some(item));
            }
            if g.closed {
                return Err(SlotClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Frames replaced before anyone read them.
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }

    /// Close the slot, dropping any pending frame and waking waiters.
    pub fn close(&self) -> Option<T> {
        let mut g = self.lock();
        g.closed = true;
        self.cv.notify_all();
        g.item.take()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
