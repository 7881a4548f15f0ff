//! Retransmission timer with exponential backoff, RFC 6298 section 5.
//!
//! The timer does not give up after a fixed number of retries. Backoff is
//! capped at the RTO upper bound and retransmissions continue until the
//! [`ConnectionTimeoutGuard`](crate::guard::ConnectionTimeoutGuard) declares
//! the connection dead.

use std::{task::Poll, time::Duration};

use tokio::time::Instant;

use crate::timer::Timer;

/// Observable state of a [`RetransmitTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitState {
    /// Nothing outstanding.
    Idle,
    /// A segment is outstanding and a deadline is pending.
    Armed,
}

/// Retransmission timer of one connection.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timer: Timer,
    upper_bound: Duration,
    backoff_rto: Duration,
    retry_count: u32,
    /// First transmission time of the outstanding segment.
    sent_at: Option<Instant>,
}

impl RetransmitTimer {
    /// Creates an idle timer whose backoff never exceeds `upper_bound`.
    pub fn new(upper_bound: Duration) -> Self {
        Self {
            timer: Timer::default(),
            upper_bound,
            backoff_rto: Duration::ZERO,
            retry_count: 0,
            sent_at: None,
        }
    }

    /// Arms the timer for a freshly sent segment.
    ///
    /// Any pending deadline is replaced and backoff starts over at `rto`.
    pub fn arm(&mut self, now: Instant, rto: Duration) {
        self.backoff_rto = rto.min(self.upper_bound);
        self.retry_count = 0;
        self.sent_at = Some(now);
        self.timer.set(now + self.backoff_rto);
        log::debug!("retransmit timer armed for {:?}", self.backoff_rto);
    }

    /// Disarms the timer without taking an RTT sample.
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.retry_count = 0;
        self.sent_at = None;
    }

    /// Handles a cumulative ACK covering the outstanding segment.
    ///
    /// Returns the RTT sample to feed the estimator, which is only taken if
    /// the segment was never retransmitted (Karn's algorithm). Returns
    /// `None` if the timer was idle.
    pub fn on_ack(&mut self, now: Instant) -> Option<Duration> {
        let sent_at = self.sent_at?;
        let sample = (self.retry_count == 0).then(|| now.saturating_duration_since(sent_at));
        if sample.is_none() {
            log::debug!(
                "ack after {} retransmission(s), rtt sample discarded",
                self.retry_count
            );
        }
        self.cancel();
        sample
    }

    /// Checks the deadline against `now`.
    ///
    /// On expiry the backoff doubles (capped at the upper bound), the retry
    /// count increments and the timer re-arms itself. `Ready` tells the
    /// caller to retransmit the outstanding segment.
    pub fn poll_expiration(&mut self, now: Instant) -> Poll<()> {
        if self.timer.poll_expiration(now).is_pending() {
            return Poll::Pending;
        }

        self.backoff_rto = self.backoff_rto.saturating_mul(2).min(self.upper_bound);
        self.retry_count = self.retry_count.saturating_add(1);
        self.timer.set(now + self.backoff_rto);
        log::debug!(
            "retransmit timeout #{}, backing off to {:?}",
            self.retry_count,
            self.backoff_rto
        );
        Poll::Ready(())
    }

    /// Current state.
    pub fn state(&self) -> RetransmitState {
        if self.timer.is_armed() {
            RetransmitState::Armed
        } else {
            RetransmitState::Idle
        }
    }

    /// Whether a segment is awaiting acknowledgment.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Timeout the timer is currently armed with.
    #[inline]
    pub fn backoff_rto(&self) -> Duration {
        self.backoff_rto
    }

    /// Consecutive retransmissions without a fresh ACK.
    #[inline]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the timer fires next.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}
