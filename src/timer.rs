//! A single-deadline timer owned by the component that polls it.

use std::task::Poll;

use tokio::time::Instant;

/// A timer with at most one pending deadline.
///
/// Setting a new deadline replaces the previous one, so arming always
/// cancels whatever was pending. The timer never fires on its own; its
/// owner polls it with the current time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Instant>,
}

impl Timer {
    /// Sets the timer to expire at `time`.
    #[inline]
    pub fn set(&mut self, time: Instant) {
        self.expiration = Some(time);
    }

    /// Cancels the timer.
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    /// Returns true if a deadline is pending.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    /// Returns true if the pending deadline is at or before `now`.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expiration, Some(deadline) if deadline <= now)
    }

    /// The pending deadline, if any.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.expiration
    }

    /// Disarms the timer and returns `Ready` if it has expired by `now`.
    #[inline]
    pub fn poll_expiration(&mut self, now: Instant) -> Poll<()> {
        if self.is_expired(now) {
            self.cancel();
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
